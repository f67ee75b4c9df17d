//! Mock serial port implementation for testing.
//!
//! Provides a `MockSerialPort` that simulates serial port behavior without
//! requiring actual hardware. Data is delivered in the chunks it was queued
//! in, so tests control exactly how bytes arrive across reads.

use super::error::PortError;
use super::traits::{EventMask, SerialPortAdapter};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Inner state of the mock port, protected by a mutex for interior mutability.
#[derive(Debug)]
struct MockPortState {
    /// Chunks returned by successive read operations.
    read_queue: VecDeque<Vec<u8>>,
    /// Log of all bytes written to the port, one entry per accepted write.
    write_log: Vec<Vec<u8>>,
    /// Upper bound on bytes accepted per write, for partial-write tests.
    write_limit: Option<usize>,
    fail_next_read: bool,
    fail_next_write: bool,
    /// Next wait reports an error condition.
    fail_next_wait: bool,
    open: bool,
    close_count: usize,
    /// Whether buffers have been cleared.
    buffers_cleared: bool,
}

impl Default for MockPortState {
    fn default() -> Self {
        Self {
            read_queue: VecDeque::new(),
            write_log: Vec::new(),
            write_limit: None,
            fail_next_read: false,
            fail_next_write: false,
            fail_next_wait: false,
            open: true,
            close_count: 0,
            buffers_cleared: false,
        }
    }
}

/// Mock serial port implementation for testing.
///
/// Clones share state, so a test can keep a handle for inspection after the
/// port itself has been moved into a session or controller.
///
/// # Example
/// ```
/// use serial_bridge::port::{MockSerialPort, SerialPortAdapter};
///
/// let mut port = MockSerialPort::new("MOCK0");
///
/// // Enqueue data to be read
/// port.enqueue_read(b"Hello, World!");
///
/// // Perform a read
/// let mut buffer = [0u8; 13];
/// let n = port.read_bytes(&mut buffer).unwrap();
/// assert_eq!(n, 13);
/// assert_eq!(&buffer[..n], b"Hello, World!");
///
/// // Write some data
/// port.write_bytes(b"Response").unwrap();
///
/// // Verify what was written
/// assert_eq!(port.written(), b"Response");
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    /// The port name/identifier.
    name: String,
    /// The internal state, wrapped in Arc<Mutex<>> for interior mutability.
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    /// Create a new, open mock serial port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockPortState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue one chunk to be returned by a single future read.
    pub fn enqueue_read(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.lock().read_queue.push_back(data.to_vec());
        }
    }

    /// Enqueue every byte as its own chunk.
    pub fn enqueue_bytewise(&mut self, data: &[u8]) {
        let mut state = self.lock();
        state.read_queue.extend(data.iter().map(|b| vec![*b]));
    }

    /// Get a copy of all data written to the port, one entry per write.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.lock().write_log.clone()
    }

    /// All written data concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.lock().write_log.concat()
    }

    /// Clear the write log.
    pub fn clear_write_log(&mut self) {
        self.lock().write_log.clear();
    }

    /// Accept at most `limit` bytes per write.
    pub fn set_write_limit(&mut self, limit: Option<usize>) {
        self.lock().write_limit = limit;
    }

    /// Make the next read fail with an I/O error.
    pub fn fail_next_read(&mut self) {
        self.lock().fail_next_read = true;
    }

    /// Make the next write fail with an I/O error.
    pub fn fail_next_write(&mut self) {
        self.lock().fail_next_write = true;
    }

    /// Make the next wait report an error condition.
    pub fn fail_next_wait(&mut self) {
        self.lock().fail_next_wait = true;
    }

    /// Get whether buffers have been cleared since the last reset.
    pub fn was_cleared(&self) -> bool {
        self.lock().buffers_cleared
    }

    /// Reset the "buffers cleared" flag.
    pub fn reset_cleared_flag(&mut self) {
        self.lock().buffers_cleared = false;
    }

    /// Number of times `close` actually released the port.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.lock().read_queue.iter().map(Vec::len).sum()
    }

    fn io_error(message: &str) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, message.to_string())
    }
}

impl SerialPortAdapter for MockSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.lock();
        if !state.open {
            return Err(PortError::NotOpen(self.name.clone()));
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(PortError::WriteFailed {
                device: self.name.clone(),
                source: Self::io_error("injected write failure"),
            });
        }

        let accepted = state.write_limit.map_or(data.len(), |l| l.min(data.len()));
        if accepted > 0 {
            state.write_log.push(data[..accepted].to_vec());
        }
        Ok(accepted)
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut state = self.lock();
        if !state.open {
            return Err(PortError::NotOpen(self.name.clone()));
        }
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(PortError::ReadFailed {
                device: self.name.clone(),
                source: Self::io_error("injected read failure"),
            });
        }

        let Some(mut chunk) = state.read_queue.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buffer.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.read_queue.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn wait_for_events(&mut self, interest: EventMask) -> Result<EventMask, PortError> {
        let mut state = self.lock();
        if !state.open {
            return Err(PortError::NotOpen(self.name.clone()));
        }
        let mut mask = EventMask::empty();
        if interest.contains(EventMask::READABLE) && !state.read_queue.is_empty() {
            mask.insert(EventMask::READABLE);
        }
        if interest.contains(EventMask::WRITABLE) {
            mask.insert(EventMask::WRITABLE);
        }
        if state.fail_next_wait {
            state.fail_next_wait = false;
            if interest.contains(EventMask::ERROR) {
                mask.insert(EventMask::ERROR);
            }
        }
        Ok(mask)
    }

    fn clear_buffers(&mut self, _drain_output: bool) -> Result<(), PortError> {
        let mut state = self.lock();
        state.read_queue.clear();
        state.buffers_cleared = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
    }

    fn bytes_to_read(&self) -> Option<usize> {
        Some(self.available_bytes())
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_and_read() {
        let mut port = MockSerialPort::new("MOCK0");
        port.enqueue_read(b"Hello");

        let mut buffer = [0u8; 10];
        let n = port.read_bytes(&mut buffer).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buffer[..n], b"Hello");
    }

    #[test]
    fn test_reads_follow_chunk_boundaries() {
        let mut port = MockSerialPort::new("MOCK0");
        port.enqueue_read(b"ab");
        port.enqueue_read(b"cd");

        let mut buffer = [0u8; 10];
        assert_eq!(port.read_bytes(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], b"ab");
        assert_eq!(port.read_bytes(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], b"cd");
    }

    #[test]
    fn test_write_logging() {
        let mut port = MockSerialPort::new("MOCK0");
        port.write_bytes(b"Test1").unwrap();
        port.write_bytes(b"Test2").unwrap();

        let log = port.get_write_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], b"Test1");
        assert_eq!(log[1], b"Test2");
        assert_eq!(port.written(), b"Test1Test2");
    }

    #[test]
    fn test_partial_writes() {
        let mut port = MockSerialPort::new("MOCK0");
        port.set_write_limit(Some(2));
        assert_eq!(port.write_bytes(b"hello").unwrap(), 2);
        port.set_write_limit(Some(0));
        assert_eq!(port.write_bytes(b"llo").unwrap(), 0);
        assert_eq!(port.written(), b"he");
    }

    #[test]
    fn test_failure_injection() {
        let mut port = MockSerialPort::new("MOCK0");
        port.fail_next_read();
        let mut buffer = [0u8; 4];
        assert!(matches!(
            port.read_bytes(&mut buffer),
            Err(PortError::ReadFailed { .. })
        ));
        assert_eq!(port.read_bytes(&mut buffer).unwrap(), 0);

        port.fail_next_write();
        assert!(matches!(
            port.write_bytes(b"x"),
            Err(PortError::WriteFailed { .. })
        ));

        port.fail_next_wait();
        let mask = port
            .wait_for_events(EventMask::READABLE | EventMask::ERROR)
            .unwrap();
        assert!(mask.contains(EventMask::ERROR));
    }

    #[test]
    fn test_clear_buffers() {
        let mut port = MockSerialPort::new("MOCK0");
        port.enqueue_read(b"Should be cleared");

        port.clear_buffers(false).unwrap();
        assert!(port.was_cleared());
        assert_eq!(port.available_bytes(), 0);
    }

    #[test]
    fn test_empty_read_returns_zero() {
        let mut port = MockSerialPort::new("MOCK0");
        let mut buffer = [0u8; 10];
        assert_eq!(port.read_bytes(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_partial_read() {
        let mut port = MockSerialPort::new("MOCK0");
        port.enqueue_read(b"Hello, World!");

        let mut buffer = [0u8; 5];
        let n = port.read_bytes(&mut buffer).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buffer[..n], b"Hello");

        // Remaining bytes should still be in queue
        assert_eq!(port.available_bytes(), 8);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut port = MockSerialPort::new("MOCK0");
        let observer = port.clone();
        port.close();
        port.close();
        assert!(!observer.is_open());
        assert_eq!(observer.close_count(), 1);
        assert!(matches!(port.write_bytes(b"x"), Err(PortError::NotOpen(_))));
    }

    #[test]
    fn test_wait_reports_readable_only_with_data() {
        let mut port = MockSerialPort::new("MOCK0");
        assert!(port
            .wait_for_events(EventMask::READABLE)
            .unwrap()
            .is_empty());
        port.enqueue_read(b"x");
        assert!(port
            .wait_for_events(EventMask::READABLE)
            .unwrap()
            .contains(EventMask::READABLE));
    }

    #[test]
    fn test_bytes_to_read() {
        let mut port = MockSerialPort::new("MOCK0");
        port.enqueue_read(b"Test data");

        assert_eq!(port.bytes_to_read(), Some(9));
    }
}
