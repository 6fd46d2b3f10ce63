//! Datagram codec for the two message kinds that cross the UDP boundary.
//!
//! ## Wire format
//!
//! All multi-byte integers are little-endian. One message per datagram.
//!
//! | Message | Layout |
//! |---------|--------|
//! | Inputs  | `[tag:4 = 0][sender:4][count:2]` then per input `[frame:8][len:2][payload:len]` |
//! | Acks    | `[tag:4 = 1][sender:4][count:2]` then per ack `[cumulative:8][sel_count:2][sel:8 × sel_count]` |
//!
//! Frame numbers travel as `i64`; a negative input frame or a cumulative
//! ack below `-1` is structurally impossible for a well-behaved peer and
//! decodes to [`WireError::NegativeFrame`], which callers treat as a
//! protocol violation rather than line noise.

use thiserror::Error;

use crate::types::{FrameAck, FrameInput, FrameNumber, HostId};

/// Largest datagram the session will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

const TAG_INPUTS: u32 = 0;
const TAG_ACKS: u32 = 1;

/// Payload capability required of application command types.
///
/// Commands are opaque to the protocol; they only need to move through a
/// byte buffer intact. `Clone` is required because one locally collected
/// command fans out to the local receive queue and every peer flow.
pub trait Command: Clone + Send + 'static {
    /// Appends this command's encoding to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Reconstructs a command from its encoding.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MalformedPayload`] (or any other variant) if
    /// `bytes` is not a valid encoding.
    fn decode(bytes: &[u8]) -> Result<Self, WireError>;
}

/// Raw byte payloads pass through unchanged.
impl Command for Vec<u8> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(bytes.to_vec())
    }
}

/// Errors during datagram encode/decode.
#[derive(Debug, Error)]
pub enum WireError {
    /// Input buffer ended before the message did.
    #[error("datagram truncated")]
    Truncated,
    /// Unknown message tag.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),
    /// Trailing bytes after a complete message.
    #[error("trailing bytes after message")]
    TrailingBytes,
    /// A frame number that cannot legally appear on the wire.
    #[error("illegal frame number {0} on the wire")]
    NegativeFrame(i64),
    /// A command payload larger than a length field can carry.
    #[error("command payload of {0} bytes exceeds the wire limit")]
    PayloadTooLarge(usize),
    /// More entries than a count field can carry.
    #[error("batch of {0} entries exceeds the wire limit")]
    BatchTooLarge(usize),
    /// The application payload failed to decode.
    #[error("malformed command payload")]
    MalformedPayload,
}

impl WireError {
    /// Whether this error indicates a peer violating the protocol, as
    /// opposed to a damaged or foreign datagram that is safe to ignore.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::NegativeFrame(_))
    }
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram<C> {
    /// A batch of frame inputs from one sender's stream.
    Inputs {
        /// Originating host of the stream.
        sender: HostId,
        /// The inputs, in the order they were encoded.
        inputs: Vec<FrameInput<C>>,
    },
    /// A batch of ack snapshots produced by one receiver.
    Acks {
        /// The host acknowledging our stream.
        sender: HostId,
        /// The snapshots, oldest first.
        acks: Vec<FrameAck>,
    },
}

struct Writer<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn take_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.take_bytes(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn take_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn take_i64(&mut self) -> Result<i64, WireError> {
        let bytes = self.take_bytes(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.cursor + len > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let slice = &self.buf[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }

    fn finish(self) -> Result<(), WireError> {
        if self.cursor == self.buf.len() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes)
        }
    }
}

/// Encodes a batch of frame inputs into `buf` (cleared first).
///
/// # Errors
///
/// Fails if the batch or any payload exceeds its wire length field, or if
/// an input carries a negative frame number.
pub fn encode_inputs<C: Command>(
    sender: HostId,
    inputs: &[FrameInput<C>],
    buf: &mut Vec<u8>,
) -> Result<(), WireError> {
    let count =
        u16::try_from(inputs.len()).map_err(|_| WireError::BatchTooLarge(inputs.len()))?;

    let mut w = Writer::new(buf);
    w.put_u32(TAG_INPUTS);
    w.put_u32(sender.0);
    w.put_u16(count);

    let mut payload = Vec::new();
    for input in inputs {
        if input.number.0 < 0 {
            return Err(WireError::NegativeFrame(input.number.0));
        }
        payload.clear();
        input.command.encode(&mut payload);
        let len =
            u16::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
        w.put_i64(input.number.0);
        w.put_u16(len);
        w.put_bytes(&payload);
    }
    Ok(())
}

/// Encodes a batch of ack snapshots into `buf` (cleared first).
///
/// # Errors
///
/// Fails if the batch or any selective set exceeds its wire count field.
pub fn encode_acks(
    sender: HostId,
    acks: &[FrameAck],
    buf: &mut Vec<u8>,
) -> Result<(), WireError> {
    let count = u16::try_from(acks.len()).map_err(|_| WireError::BatchTooLarge(acks.len()))?;

    let mut w = Writer::new(buf);
    w.put_u32(TAG_ACKS);
    w.put_u32(sender.0);
    w.put_u16(count);

    for ack in acks {
        let sel_count = u16::try_from(ack.selective.len())
            .map_err(|_| WireError::BatchTooLarge(ack.selective.len()))?;
        w.put_i64(ack.cumulative.0);
        w.put_u16(sel_count);
        for frame in &ack.selective {
            w.put_i64(frame.0);
        }
    }
    Ok(())
}

/// Decodes one datagram.
///
/// # Errors
///
/// Returns a [`WireError`] describing the first structural problem found.
/// The whole buffer must be consumed; trailing bytes are rejected.
pub fn decode_datagram<C: Command>(bytes: &[u8]) -> Result<Datagram<C>, WireError> {
    let mut r = Reader::new(bytes);
    let tag = r.take_u32()?;
    let sender = HostId(r.take_u32()?);
    let count = r.take_u16()? as usize;

    match tag {
        TAG_INPUTS => {
            let mut inputs = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                let frame = r.take_i64()?;
                if frame < 0 {
                    return Err(WireError::NegativeFrame(frame));
                }
                let len = r.take_u16()? as usize;
                let payload = r.take_bytes(len)?;
                let command = C::decode(payload)?;
                inputs.push(FrameInput::new(FrameNumber(frame), command));
            }
            r.finish()?;
            Ok(Datagram::Inputs { sender, inputs })
        }
        TAG_ACKS => {
            let mut acks = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                let cumulative = r.take_i64()?;
                if cumulative < -1 {
                    return Err(WireError::NegativeFrame(cumulative));
                }
                let sel_count = r.take_u16()? as usize;
                let mut selective = Vec::with_capacity(sel_count.min(256));
                for _ in 0..sel_count {
                    let frame = r.take_i64()?;
                    if frame < 0 {
                        return Err(WireError::NegativeFrame(frame));
                    }
                    selective.push(FrameNumber(frame));
                }
                acks.push(FrameAck::new(FrameNumber(cumulative), selective));
            }
            r.finish()?;
            Ok(Datagram::Acks { sender, acks })
        }
        other => Err(WireError::UnknownTag(other)),
    }
}
