//! Byte transports the protocol loop can run over.
//!
//! Anything that is `Read + Write + Send` works. Reads are expected to time
//! out periodically (returning [`io::ErrorKind::TimedOut`] or
//! [`io::ErrorKind::WouldBlock`]) so the loop can notice shutdown; `Ok(0)`
//! means the channel is closed.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};

/// A duplex byte channel to the VMC.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Open the serial device named in `config` (8N1, no flow control).
pub fn open_serial(config: &DriverConfig) -> DriverResult<Box<dyn Transport>> {
    let port = serialport::new(&config.port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout())
        .open()
        .map_err(|e| DriverError::TransportUnavailable(format!("{}: {}", config.port, e)))?;
    Ok(Box::new(port))
}

/// In-process transport backed by channels.
///
/// Used to run the driver against a simulated VMC.
pub struct MemoryTransport {
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
    pending: VecDeque<u8>,
    read_timeout: Duration,
}

/// The VMC side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryPeer {
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair.
    pub fn pair(read_timeout: Duration) -> (MemoryTransport, MemoryPeer) {
        let (host_tx, peer_rx) = crossbeam_channel::unbounded();
        let (peer_tx, host_rx) = crossbeam_channel::unbounded();
        (
            MemoryTransport {
                rx: host_rx,
                tx: host_tx,
                pending: VecDeque::new(),
                read_timeout,
            },
            MemoryPeer {
                rx: peer_rx,
                tx: peer_tx,
            },
        )
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.read_timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MemoryPeer {
    /// Send bytes to the host.
    pub fn send(&self, data: &[u8]) -> Result<(), crossbeam_channel::SendError<Vec<u8>>> {
        self.tx.send(data.to_vec())
    }

    /// Wait for the next write from the host.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take a write from the host if one is queued.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_roundtrip() {
        let (mut host, peer) = MemoryTransport::pair(Duration::from_millis(10));

        peer.send(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(host.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(host.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);

        host.write_all(&[9, 9]).unwrap();
        assert_eq!(peer.recv_timeout(Duration::from_millis(100)), Some(vec![9, 9]));
    }

    #[test]
    fn test_memory_read_timeout_and_close() {
        let (mut host, peer) = MemoryTransport::pair(Duration::from_millis(5));
        let mut buf = [0u8; 4];
        let err = host.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        drop(peer);
        assert_eq!(host.read(&mut buf).unwrap(), 0);
        assert_eq!(host.write(&[1]).unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_open_missing_serial_port() {
        let config = DriverConfig {
            port: "/dev/does-not-exist-vmc".to_string(),
            ..DriverConfig::default()
        };
        assert!(matches!(open_serial(&config), Err(DriverError::TransportUnavailable(_))));
    }
}
