//! Serial and TCP links to a PLM.

use crate::config::GatewayConfig;
use crate::error::ServerError;
use insteon_core::Transport;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const SERIAL_TIMEOUT: Duration = Duration::from_millis(50);

/// PLM attached to a local serial port, 8N1 without flow control.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self, ServerError> {
        let mut port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(SERIAL_TIMEOUT)
            .open()?;
        // Drop whatever the modem sent before we were listening.
        port.clear(serialport::ClearBuffer::Input)?;
        tracing::info!("Opened {} at {} baud", path, baud);
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.port.bytes_to_read()? == 0 {
            return Ok(0);
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }
}

/// PLM exposed by a hub on a raw TCP port.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(addr: &str) -> Result<Self, ServerError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, ServerError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            tracing::info!("Connected to hub {}", peer);
        }
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "hub closed the connection")),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        // Frames are a few bytes; spin through the rare partial write.
        let mut rest = frame;
        while !rest.is_empty() {
            match self.stream.write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Opens the link a gateway is configured with.
pub fn open(gateway: &GatewayConfig) -> Result<Box<dyn Transport + Send>, ServerError> {
    match (&gateway.port, &gateway.hub) {
        (Some(port), _) => Ok(Box::new(SerialTransport::open(port, gateway.baud)?)),
        (None, Some(hub)) => Ok(Box::new(TcpTransport::connect(hub)?)),
        (None, None) => Err(ServerError::InvalidRequest(format!(
            "gateway '{}' has no port or hub",
            gateway.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(&addr.to_string()).unwrap();
        let (mut hub, _) = listener.accept().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(transport.read_available(&mut buf).unwrap(), 0);

        transport.write_frame(&[0x02, 0x60]).unwrap();
        let mut received = [0u8; 2];
        hub.read_exact(&mut received).unwrap();
        assert_eq!(received, [0x02, 0x60]);

        hub.write_all(&[0x02, 0x60, 0x06]).unwrap();
        let mut got = Vec::new();
        for _ in 0..200 {
            let n = transport.read_available(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
            if got.len() == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got, vec![0x02, 0x60, 0x06]);

        drop(hub);
        let mut closed = false;
        for _ in 0..200 {
            match transport.read_available(&mut buf) {
                Err(e) => {
                    assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
                    closed = true;
                    break;
                }
                Ok(_) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        assert!(closed);
    }

    #[test]
    fn test_open_without_link() {
        let gateway = GatewayConfig::default();
        assert!(matches!(open(&gateway), Err(ServerError::InvalidRequest(_))));
    }
}
