use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use crate::codec::{LrcpMessage, SessionId};
use crate::config::LrcpConfig;
use crate::registry::SessionRegistry;


/// A message to be sent, together with its destination
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub message: LrcpMessage,
}

/// The protocol state machine: it takes one inbound message at a time, updates the session it
///  refers to, and returns the replies. It does no I/O itself, and it expects to be called for one
///  message after the other - the retransmission sweeper is the only other party touching
///  sessions concurrently.
pub struct LrcpEngine {
    config: Arc<LrcpConfig>,
    registry: Arc<SessionRegistry>,
}

impl LrcpEngine {
    pub fn new(config: Arc<LrcpConfig>, registry: Arc<SessionRegistry>) -> LrcpEngine {
        LrcpEngine {
            config,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Parses and dispatches a raw datagram. Anything unparseable is dropped without reply.
    pub async fn handle_datagram(&self, buf: &[u8], from: SocketAddr) -> Vec<Outbound> {
        if buf.len() >= self.config.max_datagram_len {
            debug!("datagram from {:?} has {} bytes, exceeding the maximum of {} - dropping", from, buf.len(), self.config.max_datagram_len);
            return Vec::new();
        }

        match LrcpMessage::try_parse(buf) {
            Ok(msg) => self.dispatch(msg, from).await,
            Err(e) => {
                debug!("dropping invalid datagram from {:?}: {}", from, e);
                Vec::new()
            }
        }
    }

    pub async fn dispatch(&self, msg: LrcpMessage, from: SocketAddr) -> Vec<Outbound> {
        trace!("dispatching {:?} from {:?}", msg, from);

        match msg {
            LrcpMessage::Connect { session } => self.on_connect(session, from).await,
            LrcpMessage::Ack { session, ordinal } => self.on_ack(session, ordinal, from).await,
            LrcpMessage::Data { session, ordinal, payload } => self.on_data(session, ordinal, payload, from).await,
            LrcpMessage::Close { session } => self.on_close(session, from).await,
        }
    }

    /// `connect` is idempotent: a re-sent connect for an existing session is acknowledged
    ///  without touching the session
    async fn on_connect(&self, session: SessionId, from: SocketAddr) -> Vec<Outbound> {
        let (_, is_new) = self.registry.get_or_create(&session, from).await;
        if !is_new {
            debug!("session {} exists already - acknowledging connect", session);
        }

        vec![Outbound {
            to: from,
            message: LrcpMessage::Ack { session, ordinal: 0 },
        }]
    }

    async fn on_ack(&self, session_id: SessionId, ordinal: u32, from: SocketAddr) -> Vec<Outbound> {
        let session = match self.registry.get(&session_id).await {
            Some(s) => s,
            None => return Self::close_unknown(session_id, from),
        };

        let mut state = session.state().await;

        if ordinal < state.largest_acked() {
            debug!("session {}: stale ack for {} (already acked {}) - ignoring", session_id, ordinal, state.largest_acked());
            return Vec::new();
        }

        if ordinal < state.sent_offset() {
            debug!("session {}: peer acked {} of {} sent bytes - re-sending the rest", session_id, ordinal, state.sent_offset());
            return state.sent_data_from(ordinal, self.config.max_chunk_len)
                .into_iter()
                .map(|message| Outbound { to: from, message })
                .collect();
        }

        if ordinal > state.sent_offset() {
            warn!("session {}: peer acked {} bytes, but only {} were sent - closing session", session_id, ordinal, state.sent_offset());
            drop(state);
            self.registry.remove(&session_id).await;
            return vec![Outbound {
                to: session.peer_addr(),
                message: LrcpMessage::Close { session: session_id },
            }];
        }

        let num_cleared = state.acknowledge(ordinal);
        trace!("session {}: ack for {} cleared {} outstanding chunks", session_id, ordinal, num_cleared);
        Vec::new()
    }

    async fn on_data(&self, session_id: SessionId, ordinal: u32, payload: Bytes, from: SocketAddr) -> Vec<Outbound> {
        let session = match self.registry.get(&session_id).await {
            Some(s) => s,
            None => return Self::close_unknown(session_id, from),
        };

        let mut state = session.state().await;

        let have = state.received_len() as u64;
        let start = ordinal as u64;
        let end = start + payload.len() as u64;

        if start > have {
            debug!("session {}: data at {}, but only {} bytes received - requesting re-send", session_id, ordinal, have);
            return vec![Outbound {
                to: from,
                message: LrcpMessage::Ack { session: session_id, ordinal: have as u32 },
            }];
        }

        if start < have && end <= have {
            debug!("session {}: duplicate data for {}..{} - ignoring", session_id, start, end);
            return Vec::new();
        }

        if end > u32::MAX as u64 {
            warn!("session {}: data up to {} exceeds the maximum stream length - dropping", session_id, end);
            return Vec::new();
        }

        let has_new_lines = state.append_received(&payload[(have - start) as usize..]);

        let mut replies = vec![Outbound {
            to: from,
            message: LrcpMessage::Ack { session: session_id.clone(), ordinal: state.received_len() },
        }];

        if has_new_lines {
            state.refresh_reversed();
            let chunks = state.chunk_unsent(self.config.max_chunk_len);
            trace!("session {}: sending {} new chunks, now at {}", session_id, chunks.len(), state.sent_offset());

            replies.extend(chunks.into_iter()
                .map(|message| Outbound { to: from, message }));
        }
        replies
    }

    async fn on_close(&self, session_id: SessionId, from: SocketAddr) -> Vec<Outbound> {
        let to = match self.registry.remove(&session_id).await {
            Some(session) => session.peer_addr(),
            None => from,
        };

        vec![Outbound {
            to,
            message: LrcpMessage::Close { session: session_id },
        }]
    }

    fn close_unknown(session_id: SessionId, from: SocketAddr) -> Vec<Outbound> {
        debug!("message for unknown session {} from {:?} - replying with close", session_id, from);
        vec![Outbound {
            to: from,
            message: LrcpMessage::Close { session: session_id },
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5555))
    }

    fn new_engine() -> LrcpEngine {
        LrcpEngine::new(Arc::new(LrcpConfig::default()), Arc::new(SessionRegistry::new(4)))
    }

    fn connect(s: &'static str) -> LrcpMessage {
        LrcpMessage::Connect { session: s.into() }
    }
    fn ack(s: &'static str, ordinal: u32) -> LrcpMessage {
        LrcpMessage::Ack { session: s.into(), ordinal }
    }
    fn data(s: &'static str, ordinal: u32, payload: &'static [u8]) -> LrcpMessage {
        LrcpMessage::Data { session: s.into(), ordinal, payload: Bytes::from_static(payload) }
    }
    fn close(s: &'static str) -> LrcpMessage {
        LrcpMessage::Close { session: s.into() }
    }

    async fn send(engine: &LrcpEngine, msg: LrcpMessage) -> Vec<LrcpMessage> {
        engine.dispatch(msg, peer()).await
            .into_iter()
            .map(|o| o.message)
            .collect()
    }

    async fn received(engine: &LrcpEngine, s: &'static str) -> Vec<u8> {
        engine.registry().get(&s.into()).await.unwrap()
            .state().await
            .received()
            .to_vec()
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let engine = new_engine();
        assert_eq!(send(&engine, connect("s")).await, vec![ack("s", 0)]);
        assert_eq!(send(&engine, data("s", 0, b"abc")).await, vec![ack("s", 3)]);

        assert_eq!(send(&engine, connect("s")).await, vec![ack("s", 0)]);
        assert_eq!(received(&engine, "s").await, b"abc");
        assert_eq!(engine.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_overlapping_data_is_absorbed() {
        let engine = new_engine();
        send(&engine, connect("s")).await;

        assert_eq!(send(&engine, data("s", 0, b"AB")).await, vec![ack("s", 2)]);
        assert_eq!(send(&engine, data("s", 0, b"ABC")).await, vec![ack("s", 3)]);
        assert_eq!(received(&engine, "s").await, b"ABC");
    }

    #[tokio::test]
    async fn test_duplicate_data_gets_no_reply() {
        let engine = new_engine();
        send(&engine, connect("s")).await;
        send(&engine, data("s", 0, b"ABC")).await;

        assert!(send(&engine, data("s", 0, b"AB")).await.is_empty());
        assert!(send(&engine, data("s", 1, b"BC")).await.is_empty());
        assert_eq!(received(&engine, "s").await, b"ABC");
    }

    #[tokio::test]
    async fn test_gap_is_resynchronized() {
        let engine = new_engine();
        send(&engine, connect("s")).await;
        send(&engine, data("s", 0, b"abc")).await;

        assert_eq!(send(&engine, data("s", 5, b"XY")).await, vec![ack("s", 3)]);
        assert_eq!(received(&engine, "s").await, b"abc");
    }

    #[tokio::test]
    async fn test_empty_data_at_end_is_acked() {
        let engine = new_engine();
        send(&engine, connect("s")).await;
        send(&engine, data("s", 0, b"abc")).await;

        assert_eq!(send(&engine, data("s", 3, b"")).await, vec![ack("s", 3)]);
    }

    #[tokio::test]
    async fn test_line_reversal_end_to_end() {
        let engine = new_engine();
        assert_eq!(send(&engine, connect("s1")).await, vec![ack("s1", 0)]);
        assert_eq!(send(&engine, data("s1", 0, b"hello\n")).await, vec![ack("s1", 6), data("s1", 0, b"olleh\n")]);

        let session = engine.registry().get(&"s1".into()).await.unwrap();
        assert_eq!(session.state().await.outstanding().len(), 1);

        assert!(send(&engine, ack("s1", 6)).await.is_empty());
        assert!(session.state().await.outstanding().is_empty());
        assert_eq!(session.state().await.largest_acked(), 6);
    }

    #[tokio::test]
    async fn test_partial_lines_are_held_back() {
        let engine = new_engine();
        send(&engine, connect("s")).await;

        assert_eq!(send(&engine, data("s", 0, b"foo")).await, vec![ack("s", 3)]);
        assert_eq!(send(&engine, data("s", 3, b"bar\nba")).await, vec![ack("s", 9)]);
        assert_eq!(send(&engine, data("s", 9, b"z\n")).await, vec![ack("s", 11), data("s", 0, b"raboof\nzab\n")]);
        assert_eq!(send(&engine, data("s", 11, b"x\n")).await, vec![ack("s", 13), data("s", 11, b"x\n")]);
    }

    #[tokio::test]
    async fn test_long_output_is_chunked() {
        let engine = new_engine();
        send(&engine, connect("s")).await;

        let mut line = vec![b'a'; 1000];
        line.push(b'\n');
        let replies = send(&engine, LrcpMessage::Data { session: "s".into(), ordinal: 0, payload: Bytes::from(line) }).await;
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], ack("s", 1001));
        match (&replies[1], &replies[2]) {
            (LrcpMessage::Data { ordinal: o1, payload: p1, .. }, LrcpMessage::Data { ordinal: o2, payload: p2, .. }) => {
                assert_eq!((*o1, p1.len()), (0, 789));
                assert_eq!((*o2, p2.len()), (789, 212));
            }
            other => panic!("expected two data messages, got {:?}", other),
        }

        // acking the first chunk only is treated as a request to re-send the rest
        assert_eq!(send(&engine, ack("s", 789)).await.len(), 1);
        assert!(send(&engine, ack("s", 1001)).await.is_empty());
        let session = engine.registry().get(&"s".into()).await.unwrap();
        assert!(session.state().await.outstanding().is_empty());
    }

    #[tokio::test]
    async fn test_resend_on_nack() {
        let engine = new_engine();
        send(&engine, connect("s1")).await;
        send(&engine, data("s1", 0, b"hello\n")).await;

        assert_eq!(send(&engine, ack("s1", 0)).await, vec![data("s1", 0, b"olleh\n")]);
        assert_eq!(send(&engine, ack("s1", 2)).await, vec![data("s1", 2, b"leh\n")]);
    }

    #[tokio::test]
    async fn test_stale_ack_is_ignored() {
        let engine = new_engine();
        send(&engine, connect("s")).await;
        send(&engine, data("s", 0, b"ab\n")).await;
        send(&engine, ack("s", 3)).await;

        assert!(send(&engine, ack("s", 1)).await.is_empty());
        assert!(send(&engine, ack("s", 3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_protocol_violation_closes_session() {
        let engine = new_engine();
        send(&engine, connect("s1")).await;
        send(&engine, data("s1", 0, b"hello\n")).await;

        assert_eq!(send(&engine, ack("s1", 1000)).await, vec![close("s1")]);
        assert!(engine.registry().get(&"s1".into()).await.is_none());
        assert_eq!(send(&engine, data("s1", 0, b"x")).await, vec![close("s1")]);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let engine = new_engine();
        assert_eq!(send(&engine, ack("nope", 0)).await, vec![close("nope")]);
        assert_eq!(send(&engine, data("nope", 0, b"x")).await, vec![close("nope")]);
        assert!(engine.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_close() {
        let engine = new_engine();
        send(&engine, connect("s")).await;

        assert_eq!(send(&engine, close("s")).await, vec![close("s")]);
        assert!(engine.registry().is_empty().await);

        // closing an absent session is not an error
        assert_eq!(send(&engine, close("s")).await, vec![close("s")]);
    }

    #[tokio::test]
    async fn test_close_targets_session_peer() {
        let engine = new_engine();
        let session_peer = SocketAddr::from(([10, 0, 0, 1], 1234));
        engine.dispatch(connect("s"), session_peer).await;

        let replies = engine.dispatch(close("s"), peer()).await;
        assert_eq!(replies, vec![Outbound { to: session_peer, message: close("s") }]);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let engine = new_engine();
        send(&engine, connect("a")).await;
        send(&engine, connect("b")).await;

        send(&engine, data("a", 0, b"one\n")).await;
        assert_eq!(send(&engine, data("b", 0, b"two\n")).await, vec![ack("b", 4), data("b", 0, b"owt\n")]);
        assert_eq!(received(&engine, "a").await, b"one\n");
    }

    #[tokio::test]
    async fn test_handle_datagram() {
        let engine = new_engine();

        let replies = engine.handle_datagram(b"/connect/12345/", peer()).await;
        assert_eq!(replies, vec![Outbound { to: peer(), message: ack("12345", 0) }]);

        let replies = engine.handle_datagram(b"/data/12345/0/a\\/b\n/", peer()).await;
        assert_eq!(replies.iter().map(|o| o.message.encode()).collect::<Vec<_>>(), vec![
            Bytes::from_static(b"/ack/12345/4/"),
            Bytes::from_static(b"/data/12345/0/b\\/a\n/"),
        ]);
    }

    #[tokio::test]
    async fn test_handle_datagram_drops_garbage() {
        let engine = new_engine();
        assert!(engine.handle_datagram(b"/connect/12345", peer()).await.is_empty());
        assert!(engine.handle_datagram(b"/data/12345/0/a/b/", peer()).await.is_empty());
        assert!(engine.handle_datagram(b"hello", peer()).await.is_empty());
        assert!(engine.registry().is_empty().await);

        let oversized = format!("/connect/{}/", "x".repeat(1000));
        assert!(engine.handle_datagram(oversized.as_bytes(), peer()).await.is_empty());
        assert!(engine.registry().is_empty().await);
    }
}
