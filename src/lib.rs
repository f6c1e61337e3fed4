//! LRCP ("line reversal control protocol") is a reliable, ordered byte stream on top of UDP. A
//!  client connects with a session id, sends its data in `data` messages tagged with the stream
//!  position, and gets each complete line back reversed.
//!
//! Messages are single datagrams of the form `/<command>/<field>/.../`. Inside a data payload,
//!  `/` and `\` are escaped with a backslash; positions and lengths always refer to the
//!  unescaped stream.
//!
//! Reliability is the same for both directions:
//! * The receiver acknowledges the length of the contiguous prefix it has, cumulatively. Data
//!   beyond that prefix is dropped and answered with the current length so the sender can resync.
//! * The server keeps every chunk it sent until it is acknowledged, and the retransmission
//!   sweeper re-sends everything outstanding at a fixed interval. After too many re-sends a chunk
//!   is abandoned.
//! * An ack for less than was sent triggers an immediate re-send of the missing part, an ack for
//!   more than was sent is a protocol violation and closes the session.

pub mod codec;
pub mod config;
pub mod engine;
pub mod line_reversal;
pub mod registry;
pub mod send_socket;
pub mod server;
pub mod session;
pub mod sweeper;
