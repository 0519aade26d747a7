//! Byte channel to the PLM.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io;

/// Duplex byte channel. Reads never block.
pub trait Transport {
    /// Copies available bytes into `buf`, returning 0 when none are waiting.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// In-process transport backed by buffers.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<u8>,
    written: Vec<Bytes>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the engine to read.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Frames written so far, oldest first.
    pub fn take_written(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.written)
    }

    pub fn written(&self) -> &[Bytes] {
        &self.written
    }
}

impl Transport for MemoryTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.written.push(Bytes::copy_from_slice(frame));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(&[1, 2, 3]);
        let mut buf = [0u8; 2];
        assert_eq!(transport.read_available(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.read_available(&mut buf).unwrap(), 1);
        assert_eq!(transport.read_available(&mut buf).unwrap(), 0);

        transport.write_frame(&[0x02, 0x60]).unwrap();
        assert_eq!(transport.written().len(), 1);
        assert_eq!(transport.take_written()[0].as_ref(), &[0x02, 0x60]);
        assert!(transport.written().is_empty());
    }
}
