use std::collections::BTreeMap;
use std::net::SocketAddr;
use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;
use crate::codec::{LrcpMessage, SessionId};
use crate::line_reversal::reverse_lines;


/// A `data` message that was sent and is not yet covered by a cumulative ack, together with the
///  bookkeeping for re-sending it.
#[derive(Debug, Clone)]
pub struct OutstandingChunk {
    pub message: LrcpMessage,
    /// the ordinal *after* the chunk's last byte
    pub end_ordinal: u32,
    pub resend_count: u32,
}

/// result of a single retransmission sweep over a session's outstanding chunks
#[derive(Debug, Default)]
pub struct RetransmissionPass {
    pub resends: Vec<LrcpMessage>,
    /// start ordinals of chunks that exceeded the resend limit and were dropped
    pub abandoned: Vec<u32>,
}

/// The state of both directions of a session's stream. Ordinals are byte offsets, and they are
///  u32 on the wire - the protocol engine ensures that `received` never grows beyond `u32::MAX`
///  bytes, and the other lengths are bounded by that.
#[derive(Debug)]
pub struct StreamState {
    session: SessionId,

    /// bytes received from the peer, in order and without gaps
    received: Vec<u8>,
    /// line reversal of `received`, ready to be sent back
    reversed: Vec<u8>,

    /// number of bytes of `reversed` that were chunked and sent (at least once)
    sent_offset: u32,
    largest_acked: u32,

    /// keyed by the chunk's start ordinal; chunks are contiguous
    outstanding: BTreeMap<u32, OutstandingChunk>,
}

impl StreamState {
    fn new(session: SessionId) -> StreamState {
        StreamState {
            session,
            received: Vec::new(),
            reversed: Vec::new(),
            sent_offset: 0,
            largest_acked: 0,
            outstanding: BTreeMap::new(),
        }
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }

    pub fn received_len(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn reversed(&self) -> &[u8] {
        &self.reversed
    }

    pub fn sent_offset(&self) -> u32 {
        self.sent_offset
    }

    pub fn largest_acked(&self) -> u32 {
        self.largest_acked
    }

    pub fn outstanding(&self) -> &BTreeMap<u32, OutstandingChunk> {
        &self.outstanding
    }

    /// Appends data that was not received before. Returns `true` if the stream now ends with a
    ///  complete line, i.e. there may be new reversed output.
    pub fn append_received(&mut self, new_data: &[u8]) -> bool {
        self.received.extend_from_slice(new_data);
        !new_data.is_empty() && self.received.last() == Some(&b'\n')
    }

    pub fn refresh_reversed(&mut self) {
        self.reversed = reverse_lines(&self.received);
        trace!("session {}: {} bytes of reversed output", self.session, self.reversed.len());
    }

    /// Splits reversed output that was not sent yet into chunks of at most `max_chunk_len` bytes,
    ///  registering each of them as outstanding. The chunks are returned in stream order.
    pub fn chunk_unsent(&mut self, max_chunk_len: usize) -> Vec<LrcpMessage> {
        let unsent = &self.reversed[self.sent_offset as usize..];

        let mut result = Vec::new();
        for chunk in unsent.chunks(max_chunk_len) {
            let ordinal = self.sent_offset;
            let end_ordinal = ordinal + chunk.len() as u32;

            let message = LrcpMessage::Data {
                session: self.session.clone(),
                ordinal,
                payload: Bytes::copy_from_slice(chunk),
            };
            self.outstanding.insert(ordinal, OutstandingChunk {
                message: message.clone(),
                end_ordinal,
                resend_count: 0,
            });
            self.sent_offset = end_ordinal;
            result.push(message);
        }
        result
    }

    /// Already sent output starting at `ordinal`, for re-sending after the peer reported that it
    ///  is missing. This is not registered as outstanding since the corresponding chunks are
    ///  (or were) tracked already.
    pub fn sent_data_from(&self, ordinal: u32, max_chunk_len: usize) -> Vec<LrcpMessage> {
        let mut result = Vec::new();
        let mut chunk_ordinal = ordinal;
        for chunk in self.reversed[ordinal as usize..self.sent_offset as usize].chunks(max_chunk_len) {
            result.push(LrcpMessage::Data {
                session: self.session.clone(),
                ordinal: chunk_ordinal,
                payload: Bytes::copy_from_slice(chunk),
            });
            chunk_ordinal += chunk.len() as u32;
        }
        result
    }

    /// Cumulative ack: everything before `ordinal` was received by the peer. Returns the number
    ///  of outstanding chunks this cleared.
    pub fn acknowledge(&mut self, ordinal: u32) -> usize {
        self.largest_acked = self.largest_acked.max(ordinal);

        let num_before = self.outstanding.len();
        self.outstanding.retain(|_, chunk| chunk.end_ordinal > ordinal);
        num_before - self.outstanding.len()
    }

    /// Increments the resend counter of every outstanding chunk, returning them for re-sending.
    ///  Chunks that were re-sent `max_resends` times already are dropped instead.
    pub fn collect_retransmissions(&mut self, max_resends: u32) -> RetransmissionPass {
        let mut pass = RetransmissionPass::default();

        self.outstanding.retain(|&ordinal, chunk| {
            if chunk.resend_count >= max_resends {
                pass.abandoned.push(ordinal);
                false
            }
            else {
                chunk.resend_count += 1;
                pass.resends.push(chunk.message.clone());
                true
            }
        });
        pass
    }
}


/// One reliable stream, bound to the peer address it was created for. Sessions are shared
///  between the protocol engine and the retransmission sweeper, so the mutable part is behind a
///  lock - one lock per session, so work on one session does not block any other.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    state: Mutex<StreamState>,
}

impl Session {
    pub fn new(id: SessionId, peer_addr: SocketAddr) -> Session {
        Session {
            state: Mutex::new(StreamState::new(id.clone())),
            id,
            peer_addr,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().await
    }
}
