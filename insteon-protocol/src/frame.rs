//! Byte framer for the PLM serial stream.
//!
//! The PLM stream carries no length prefix. Frame boundaries come from the
//! schema table: the command byte after the sync byte determines how many
//! bytes belong to the frame. The only variable-length kind (0x62) is
//! resolved by its flags byte at offset 5.
//!
//! ```text
//! ... garbage ... | 0x15 | 0x02 cmd b2 b3 ... bN | 0x02 cmd ...
//!                   busy  <----- one frame ------>
//! ```

use crate::schema::{schema_for, FrameLength, BUSY, EXTENDED_FLAG, SEND_FLAGS_OFFSET, SYNC};
use bytes::{Buf, Bytes, BytesMut};

/// One step of framer progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerOutput {
    /// A complete frame, sync byte included.
    Frame(Bytes),
    /// The PLM signalled it is busy; the transmitter should hold off.
    Busy,
    /// Bytes dropped while searching for a sync byte.
    Discarded(Bytes),
    /// A sync byte was followed by an unknown command byte. The sync byte and
    /// everything up to the next candidate start were dropped.
    UnknownCommand { code: u8, discarded: Bytes },
}

/// Splits the inbound byte stream into frames.
pub struct Framer {
    buffer: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes waiting to be framed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Makes at most one step of progress.
    ///
    /// Returns `None` when nothing more can be done until more bytes arrive,
    /// so calling again without new input is a no-op.
    pub fn decode(&mut self) -> Option<FramerOutput> {
        let first = *self.buffer.first()?;

        if first == BUSY {
            self.buffer.advance(1);
            return Some(FramerOutput::Busy);
        }

        if first != SYNC {
            let skip = self.next_start(0).unwrap_or(self.buffer.len());
            let discarded = self.buffer.split_to(skip).freeze();
            return Some(FramerOutput::Discarded(discarded));
        }

        let code = *self.buffer.get(1)?;
        let Some(schema) = schema_for(code) else {
            let skip = self.next_start(1).unwrap_or(self.buffer.len());
            let discarded = self.buffer.split_to(skip).freeze();
            return Some(FramerOutput::UnknownCommand { code, discarded });
        };

        let needed = match schema.recv_len {
            FrameLength::Fixed(len) => len,
            FrameLength::Variable { .. } => {
                let flags = *self.buffer.get(SEND_FLAGS_OFFSET)?;
                schema.recv_len.for_extended(flags & EXTENDED_FLAG != 0)
            }
        };

        if self.buffer.len() < needed {
            return None;
        }

        Some(FramerOutput::Frame(self.buffer.split_to(needed).freeze()))
    }

    /// Position of the next sync or busy byte at or after `from`.
    fn next_start(&self, from: usize) -> Option<usize> {
        self.buffer[from..]
            .iter()
            .position(|b| *b == SYNC || *b == BUSY)
            .map(|pos| pos + from)
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
