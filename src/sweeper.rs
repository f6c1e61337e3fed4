use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use crate::codec::LrcpMessage;
use crate::config::LrcpConfig;
use crate::registry::SessionRegistry;
use crate::send_socket::SendSocket;


/// Periodically re-sends all chunks that were not acknowledged yet. There is no back-off and no
///  per-chunk timer: every chunk that is outstanding when a sweep starts is re-sent, until it
///  was re-sent `max_resends` times - then it is abandoned.
///
/// The sweeper runs concurrently with message dispatch, coordinating only through the registry
///  and the per-session locks. A session that is closed while a sweep is in progress may get one
///  last, stale retransmission.
pub struct RetransmissionSweeper {
    config: Arc<LrcpConfig>,
    registry: Arc<SessionRegistry>,
    send_socket: Arc<dyn SendSocket>,
}

impl RetransmissionSweeper {
    pub fn new(config: Arc<LrcpConfig>, registry: Arc<SessionRegistry>, send_socket: Arc<dyn SendSocket>) -> RetransmissionSweeper {
        RetransmissionSweeper {
            config,
            registry,
            send_socket,
        }
    }

    /// sweeps forever - this is meant to be cancelled by dropping the future
    pub async fn run(&self) {
        info!("starting retransmission sweeper for {:?}, interval {:?}", self.send_socket.local_addr(), self.config.resend_interval);

        loop {
            sleep(self.config.resend_interval).await;
            self.sweep().await;
        }
    }

    pub async fn sweep(&self) {
        let sessions = self.registry.snapshot().await;
        trace!("retransmission sweep over {} sessions", sessions.len());

        for session in sessions {
            let pass = session.state().await
                .collect_retransmissions(self.config.max_resends);

            for message in &pass.resends {
                if let LrcpMessage::Data { ordinal, .. } = message {
                    debug!("session {}: re-sending chunk at {}", session.id(), ordinal);
                }
                self.send_socket.do_send_packet(session.peer_addr(), &message.encode()).await;
            }

            if pass.abandoned.is_empty() {
                continue;
            }

            warn!("session {}: giving up on chunks at {:?} after {} re-sends", session.id(), pass.abandoned, self.config.max_resends);
            if self.config.close_session_on_resend_exhaustion && self.registry.remove_if_same(&session).await {
                let close = LrcpMessage::Close { session: session.id().clone() };
                self.send_socket.do_send_packet(session.peer_addr(), &close.encode()).await;
            }
        }
    }
}
