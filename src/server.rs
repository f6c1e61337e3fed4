use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use crate::config::LrcpConfig;
use crate::engine::LrcpEngine;
use crate::registry::SessionRegistry;
use crate::send_socket::SendSocket;
use crate::sweeper::RetransmissionSweeper;


/// LrcpServer is where the parts of the protocol come together: it owns the UDP socket, feeds
///  incoming datagrams to the protocol engine one after the other, sends the replies, and runs
///  the retransmission sweeper alongside.
pub struct LrcpServer {
    config: Arc<LrcpConfig>,
    socket: Arc<UdpSocket>,
    engine: LrcpEngine,
    sweeper: RetransmissionSweeper,
    cancel_sender: broadcast::Sender<()>,
}

impl LrcpServer {
    pub async fn new(config: Arc<LrcpConfig>) -> anyhow::Result<LrcpServer> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.listen_addr).await?);
        info!("bound LRCP socket to {:?}", socket.local_addr()?);

        let registry = Arc::new(SessionRegistry::new(config.registry_shards));
        let (cancel_sender, _) = broadcast::channel(1);

        Ok(LrcpServer {
            engine: LrcpEngine::new(config.clone(), registry.clone()),
            sweeper: RetransmissionSweeper::new(config.clone(), registry, socket.clone()),
            config,
            socket,
            cancel_sender,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.engine.registry()
    }

    /// Runs until [LrcpServer::cancel] is called, or until receiving from the socket fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut cancel_receiver = self.cancel_sender.subscribe();

        select! {
            result = self.recv_loop() => result,
            _ = self.sweeper.run() => Ok(()),
            _ = cancel_receiver.recv() => {
                info!("shutting down LRCP server");
                Ok(())
            }
        }
    }

    pub fn cancel(&self) {
        if let Err(err) = self.cancel_sender.send(()) {
            warn!(?err, "error canceling LRCP server - is it running?");
        }
    }

    async fn recv_loop(&self) -> anyhow::Result<()> {
        info!("starting receive loop");

        // a datagram filling the whole buffer may have been truncated - the engine drops those
        let mut buf = vec![0u8; self.config.max_datagram_len];
        loop {
            let (num_read, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!(error = ?e, "error receiving from datagram socket");
                    return Err(e.into());
                }
            };

            trace!("received datagram from {:?}: {:?}", from, String::from_utf8_lossy(&buf[..num_read]));

            let replies = self.engine.handle_datagram(&buf[..num_read], from).await;
            if !replies.is_empty() {
                debug!("sending {} replies", replies.len());
            }
            for outbound in replies {
                self.socket.do_send_packet(outbound.to, &outbound.message.encode()).await;
            }
        }
    }
}
