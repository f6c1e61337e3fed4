use std::fmt::{Debug, Display, Formatter};
use anyhow::{anyhow, bail};
use bytes::{BufMut, Bytes, BytesMut};


/// The peer-chosen token identifying a session. It is opaque, i.e. compared byte by byte and
///  never interpreted.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionId(Bytes);
impl SessionId {
    pub fn new(raw: impl Into<Bytes>) -> SessionId {
        SessionId(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
impl From<&'static str> for SessionId {
    fn from(value: &'static str) -> Self {
        SessionId(Bytes::from_static(value.as_bytes()))
    }
}
impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}
impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}


/// A single LRCP message. The wire representation is text based, with `/` as field separator
///  and at both ends of the message:
///
/// ```ascii
/// /connect/SESSION/
/// /ack/SESSION/ORDINAL/
/// /data/SESSION/ORDINAL/PAYLOAD/
/// /close/SESSION/
/// ```
///
/// ORDINAL is a decimal u32 byte offset into the stream. Inside PAYLOAD, `\` and `/` are escaped
///  by a preceding `\`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LrcpMessage {
    Connect { session: SessionId },
    Ack { session: SessionId, ordinal: u32 },
    Data { session: SessionId, ordinal: u32, payload: Bytes },
    Close { session: SessionId },
}

impl LrcpMessage {
    pub fn session(&self) -> &SessionId {
        match self {
            LrcpMessage::Connect { session } => session,
            LrcpMessage::Ack { session, .. } => session,
            LrcpMessage::Data { session, .. } => session,
            LrcpMessage::Close { session } => session,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            LrcpMessage::Connect { .. } => "connect",
            LrcpMessage::Ack { .. } => "ack",
            LrcpMessage::Data { .. } => "data",
            LrcpMessage::Close { .. } => "close",
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(b'/');
        buf.put_slice(self.command().as_bytes());
        buf.put_u8(b'/');
        buf.put_slice(self.session().as_bytes());
        buf.put_u8(b'/');

        match self {
            LrcpMessage::Connect { .. } | LrcpMessage::Close { .. } => {}
            LrcpMessage::Ack { ordinal, .. } => {
                buf.put_slice(ordinal.to_string().as_bytes());
                buf.put_u8(b'/');
            }
            LrcpMessage::Data { ordinal, payload, .. } => {
                buf.put_slice(ordinal.to_string().as_bytes());
                buf.put_u8(b'/');
                escape_into(payload, buf);
                buf.put_u8(b'/');
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    /// Parses a single datagram. Any deviation from the wire format is an error - callers are
    ///  expected to drop such datagrams without replying.
    pub fn try_parse(buf: &[u8]) -> anyhow::Result<LrcpMessage> {
        let buf = trim_nul_padding(buf);

        if buf.len() < 3 {
            bail!("message is too short: {} bytes", buf.len());
        }
        if buf[0] != b'/' || buf[buf.len() - 1] != b'/' {
            bail!("message is not enclosed in '/'");
        }

        let interior = &buf[1..buf.len() - 1];
        let parts = interior.splitn(4, |&b| b == b'/').collect::<Vec<_>>();

        let msg = match (parts[0], parts.len()) {
            (b"connect", 2) => LrcpMessage::Connect {
                session: SessionId::new(Bytes::copy_from_slice(parts[1])),
            },
            (b"close", 2) => LrcpMessage::Close {
                session: SessionId::new(Bytes::copy_from_slice(parts[1])),
            },
            (b"ack", 3) => LrcpMessage::Ack {
                session: SessionId::new(Bytes::copy_from_slice(parts[1])),
                ordinal: parse_ordinal(parts[2])?,
            },
            (b"data", 4) => LrcpMessage::Data {
                session: SessionId::new(Bytes::copy_from_slice(parts[1])),
                ordinal: parse_ordinal(parts[2])?,
                payload: unescape(parts[3])?,
            },
            (command, num_parts) => {
                bail!("unrecognized message: command {:?} with {} fields", String::from_utf8_lossy(command), num_parts);
            }
        };
        Ok(msg)
    }
}

fn trim_nul_padding(buf: &[u8]) -> &[u8] {
    let start = buf.iter()
        .position(|&b| b != 0)
        .unwrap_or(buf.len());
    let end = buf.iter()
        .rposition(|&b| b != 0)
        .map(|idx| idx + 1)
        .unwrap_or(start);
    &buf[start..end]
}

fn parse_ordinal(raw: &[u8]) -> anyhow::Result<u32> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        bail!("ordinal is not a non-negative decimal number: {:?}", String::from_utf8_lossy(raw));
    }

    // all ASCII digits, so this is valid UTF-8
    let s = std::str::from_utf8(raw)?;
    s.parse::<u32>()
        .map_err(|e| anyhow!("ordinal {} is out of range: {}", s, e))
}

fn escape_into(payload: &[u8], buf: &mut BytesMut) {
    for &b in payload {
        if b == b'\\' || b == b'/' {
            buf.put_u8(b'\\');
        }
        buf.put_u8(b);
    }
}

/// NB: A backslash followed by anything other than `\` or `/` is kept verbatim together with the
///  byte following it, so that byte can not be a separator either
fn unescape(raw: &[u8]) -> anyhow::Result<Bytes> {
    let mut result = BytesMut::with_capacity(raw.len());

    let mut iter = raw.iter();
    while let Some(&b) = iter.next() {
        match b {
            b'\\' => match iter.next() {
                Some(&escaped) if escaped == b'\\' || escaped == b'/' => result.put_u8(escaped),
                Some(&other) => {
                    result.put_u8(b'\\');
                    result.put_u8(other);
                }
                None => result.put_u8(b'\\'),
            },
            b'/' => bail!("unescaped '/' in data payload"),
            _ => result.put_u8(b),
        }
    }
    Ok(result.freeze())
}
