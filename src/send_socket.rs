use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// Sends a single encoded LRCP message to a peer as one UDP datagram. The server sends replies
///  through this, and the retransmission sweeper sends re-sent `data` chunks and `close` messages.
///  Tests replace it with a mock or a recording fake.
///
/// NB: Sending is fire-and-forget. A lost `data` chunk is covered by retransmission, a lost `ack`
///  or `close` by the peer re-sending what triggered it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for UdpSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("sending {} byte LRCP message to {:?}", packet_buf.len(), to);

        match self.send_to(packet_buf, to).await {
            Ok(num_sent) if num_sent < packet_buf.len() => {
                error!("LRCP message to {:?} was truncated: sent {} of {} bytes", to, num_sent, packet_buf.len());
            }
            Ok(_) => {}
            Err(e) => {
                error!("error sending LRCP message to {:?}: {}", to, e);
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        UdpSocket::local_addr(self)
            .expect("bound UdpSocket should have a local addr")
    }
}
