use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct LrcpConfig {
    pub listen_addr: SocketAddr,

    /// This is the maximum number of *unescaped* payload bytes in a single outbound `data`
    ///  message. Escaping can expand a payload to twice its length in the worst case, so this
    ///  must leave enough room below the peer's datagram limit for framing and escaping.
    pub max_chunk_len: usize,

    /// Inbound datagrams of this size or bigger are dropped without parsing. LRCP messages are
    ///  required to be shorter than 1000 bytes, so anything filling the receive buffer is
    ///  either truncated or garbage.
    pub max_datagram_len: usize,

    pub resend_interval: Duration,
    /// number of times an unacknowledged chunk is re-sent before it is abandoned
    pub max_resends: u32,

    /// The session registry is split into this many independently locked shards, so that
    ///  retransmission sweeps over some sessions do not block dispatch on others.
    pub registry_shards: usize,

    /// Abandoning a chunk leaves the peer without a way to ever receive that part of the
    ///  stream. If this is set, the session is closed when that happens; otherwise it is kept
    ///  (and will typically be stuck).
    pub close_session_on_resend_exhaustion: bool,
}

impl LrcpConfig {
    pub const DEFAULT_PORT: u16 = 10008;

    pub fn new(listen_addr: SocketAddr) -> LrcpConfig {
        LrcpConfig {
            listen_addr,
            max_chunk_len: 789,
            max_datagram_len: 1000,
            resend_interval: Duration::from_secs(3),
            max_resends: 20,
            registry_shards: 16,
            close_session_on_resend_exhaustion: false,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_chunk_len == 0 {
            bail!("max chunk length must be positive");
        }
        if self.max_chunk_len >= self.max_datagram_len {
            bail!("max chunk length {} does not fit into datagrams of {} bytes", self.max_chunk_len, self.max_datagram_len);
        }
        if self.registry_shards == 0 {
            bail!("session registry needs at least one shard");
        }
        if self.resend_interval.is_zero() {
            bail!("resend interval must be positive");
        }
        Ok(())
    }
}

impl Default for LrcpConfig {
    fn default() -> Self {
        Self::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, Self::DEFAULT_PORT)))
    }
}
