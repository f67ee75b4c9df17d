//! Streaming disconnect-sequence detection.
//!
//! Received bytes go into a fixed-capacity ring one at a time. After each
//! byte the most recent `trigger.len()` bytes are compared backward from the
//! write cursor, so a trigger split across any number of reads is still
//! found on the byte that completes it.

use thiserror::Error;
use tracing::debug;

/// Capacity of the receive ring. Triggers must be strictly shorter.
pub const RING_CAPACITY: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatcherError {
    #[error("Disconnect command is too long ({len} bytes, at most {} allowed)", .capacity - 1)]
    TriggerTooLong { len: usize, capacity: usize },
}

/// Trigger sequence plus the ring of recently received bytes.
#[derive(Clone)]
pub struct DisconnectMatcher {
    trigger: Vec<u8>,
    ring: Box<[u8; RING_CAPACITY]>,
    cursor: usize,
    /// Number of valid bytes in the ring, saturating at capacity.
    filled: usize,
}

impl DisconnectMatcher {
    /// Build a matcher for a raw trigger. An empty trigger never matches.
    pub fn new(trigger: impl Into<Vec<u8>>) -> Result<Self, MatcherError> {
        let trigger = trigger.into();
        if trigger.len() >= RING_CAPACITY {
            return Err(MatcherError::TriggerTooLong {
                len: trigger.len(),
                capacity: RING_CAPACITY,
            });
        }
        Ok(Self {
            trigger,
            ring: Box::new([0; RING_CAPACITY]),
            cursor: 0,
            filled: 0,
        })
    }

    /// Build a matcher from a command-line string with backslash escapes.
    pub fn from_escaped(text: &str) -> Result<Self, MatcherError> {
        Self::new(decode_escapes(text))
    }

    /// A matcher with no trigger.
    pub fn disabled() -> Self {
        Self {
            trigger: Vec::new(),
            ring: Box::new([0; RING_CAPACITY]),
            cursor: 0,
            filled: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.trigger.is_empty()
    }

    pub fn trigger(&self) -> &[u8] {
        &self.trigger
    }

    /// Append one received byte; true when it completes the trigger.
    pub fn feed(&mut self, byte: u8) -> bool {
        self.ring[self.cursor] = byte;
        self.cursor = (self.cursor + 1) % RING_CAPACITY;
        self.filled = (self.filled + 1).min(RING_CAPACITY);

        let len = self.trigger.len();
        if len == 0 || self.filled < len {
            return false;
        }
        self.trigger
            .iter()
            .rev()
            .enumerate()
            .all(|(back, expected)| {
                let index = (self.cursor + RING_CAPACITY - 1 - back) % RING_CAPACITY;
                self.ring[index] == *expected
            })
    }
}

impl std::fmt::Debug for DisconnectMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisconnectMatcher")
            .field("trigger", &String::from_utf8_lossy(&self.trigger))
            .field("cursor", &self.cursor)
            .field("filled", &self.filled)
            .finish()
    }
}

/// Decode `\r \n \t \f \a \b \v \e \0 \\` and `\xHH` into bytes.
///
/// Unknown escapes are kept literally, backslash included. A trailing lone
/// backslash is kept as is.
pub fn decode_escapes(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' || i + 1 >= bytes.len() {
            out.push(b);
            i += 1;
            continue;
        }
        let code = bytes[i + 1];
        i += 2;
        let decoded = match code {
            b'r' => b'\r',
            b'n' => b'\n',
            b't' => b'\t',
            b'f' => 0x0c,
            b'a' => 0x07,
            b'b' => 0x08,
            b'v' => 0x0b,
            b'e' => 0x1b,
            b'0' => 0x00,
            b'\\' => b'\\',
            b'x' => match bytes.get(i..i + 2).and_then(parse_hex_pair) {
                Some(value) => {
                    i += 2;
                    value
                }
                None => {
                    debug!("incomplete \\x escape kept literally");
                    out.extend_from_slice(b"\\x");
                    continue;
                }
            },
            other => {
                debug!(escape = %char::from(other), "unrecognised escape kept literally");
                out.push(b'\\');
                out.push(other);
                continue;
            }
        };
        out.push(decoded);
    }
    out
}

fn parse_hex_pair(pair: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(matcher: &mut DisconnectMatcher, data: &[u8]) -> Vec<usize> {
        data.iter()
            .enumerate()
            .filter_map(|(i, b)| matcher.feed(*b).then_some(i))
            .collect()
    }

    #[test]
    fn test_match_on_completing_byte() {
        let mut m = DisconnectMatcher::new(b"Bye\r".to_vec()).unwrap();
        assert_eq!(feed_all(&mut m, b"hello Bye\r more"), vec![9]);
    }

    #[test]
    fn test_empty_trigger_never_matches() {
        let mut m = DisconnectMatcher::disabled();
        assert!(!m.is_enabled());
        assert!(feed_all(&mut m, &[0u8; 600]).is_empty());
    }

    #[test]
    fn test_zeroed_slots_do_not_match() {
        let mut m = DisconnectMatcher::new(vec![0u8, 0u8]).unwrap();
        assert!(!m.feed(0));
        assert!(m.feed(0));
    }

    #[test]
    fn test_match_across_wraparound() {
        let mut m = DisconnectMatcher::new(b"END".to_vec()).unwrap();
        let filler = vec![b'.'; RING_CAPACITY - 1];
        assert!(feed_all(&mut m, &filler).is_empty());
        assert_eq!(feed_all(&mut m, b"END"), vec![2]);
    }

    #[test]
    fn test_trigger_length_limit() {
        assert!(DisconnectMatcher::new(vec![b'a'; RING_CAPACITY - 1]).is_ok());
        assert_eq!(
            DisconnectMatcher::new(vec![b'a'; RING_CAPACITY]).unwrap_err(),
            MatcherError::TriggerTooLong {
                len: RING_CAPACITY,
                capacity: RING_CAPACITY
            }
        );
    }

    #[test]
    fn test_longest_trigger_matches() {
        let trigger: Vec<u8> = (0..RING_CAPACITY - 1).map(|i| (i % 251) as u8).collect();
        let mut m = DisconnectMatcher::new(trigger.clone()).unwrap();
        let mut stream = b"noise".to_vec();
        stream.extend_from_slice(&trigger);
        assert_eq!(feed_all(&mut m, &stream), vec![stream.len() - 1]);
    }

    #[test]
    fn test_decode_escapes() {
        assert_eq!(decode_escapes(r"Bye\r"), b"Bye\r");
        assert_eq!(
            decode_escapes(r"\n\t\f\a\b\v\e\0\\"),
            vec![b'\n', b'\t', 0x0c, 0x07, 0x08, 0x0b, 0x1b, 0x00, b'\\']
        );
        assert_eq!(decode_escapes(r"\x41\x7e"), b"A~");
        assert_eq!(decode_escapes(r"\q"), b"\\q");
        assert_eq!(decode_escapes(r"\xZ1"), b"\\xZ1");
        assert_eq!(decode_escapes("end\\"), b"end\\");
        assert_eq!(decode_escapes("plain"), b"plain");
    }

    #[test]
    fn test_from_escaped() {
        let mut m = DisconnectMatcher::from_escaped(r"OK\r\n").unwrap();
        assert_eq!(m.trigger(), b"OK\r\n");
        assert_eq!(feed_all(&mut m, b"xOK\r\n"), vec![4]);
    }
}
