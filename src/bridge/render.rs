//! Local output rendering: colors, control-character pictures, timestamps.
//!
//! Rendered bytes are collected in an internal buffer which the bridge loop
//! hands to the console in one write per drain.

use crate::session::ByteClass;
use chrono::{DateTime, Utc};

/// Terminal colors used on the local output and the diagnostic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Reset,
    Ok,
    Error,
    Rx,
    Tx,
    Timestamp,
    Debug,
}

impl Color {
    pub fn escape(self) -> &'static str {
        match self {
            Color::Reset => "\x1b[0m",
            Color::Ok => "\x1b[0;32m",
            Color::Error => "\x1b[0;31m",
            Color::Rx => "\x1b[0;34m",
            Color::Tx => "\x1b[1;36m",
            Color::Timestamp => "\x1b[0;35m",
            Color::Debug => "\x1b[0;37m",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub colors: bool,
    pub control_chars: bool,
    pub timestamps: bool,
}

/// Unicode control picture for bytes below 0x20 (U+2400 + byte).
pub fn control_picture(byte: u8) -> Option<char> {
    if byte < 0x20 {
        char::from_u32(0x2400 + u32::from(byte))
    } else {
        None
    }
}

/// `<unix seconds with two decimals> `
pub fn timestamp_text(now: DateTime<Utc>) -> String {
    format!("{:.2} ", now.timestamp_micros() as f64 / 1e6)
}

pub struct Renderer {
    options: RenderOptions,
    current: Option<Color>,
    clock: fn() -> DateTime<Utc>,
    pending: Vec<u8>,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            current: None,
            clock: Utc::now,
            pending: Vec::with_capacity(512),
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    fn set_color(&mut self, color: Color) {
        if self.options.colors && self.current != Some(color) {
            self.pending.extend_from_slice(color.escape().as_bytes());
            self.current = Some(color);
        }
    }

    fn push_visible(&mut self, byte: u8) {
        if self.options.control_chars {
            if let Some(picture) = control_picture(byte) {
                let mut utf8 = [0u8; 4];
                self.pending
                    .extend_from_slice(picture.encode_utf8(&mut utf8).as_bytes());
            }
            if byte == b'\r' {
                return;
            }
        }
        self.pending.push(byte);
    }

    /// Render one byte received from the serial device.
    pub fn received(&mut self, byte: u8, class: ByteClass) {
        if self.options.timestamps && class == (ByteClass::Data { line_start: true }) {
            self.set_color(Color::Timestamp);
            let stamp = timestamp_text((self.clock)());
            self.pending.extend_from_slice(stamp.as_bytes());
        }
        self.set_color(Color::Rx);
        self.push_visible(byte);
    }

    /// Render one locally typed byte echoed back to the output.
    pub fn echoed(&mut self, byte: u8) {
        self.set_color(Color::Tx);
        self.push_visible(byte);
    }

    /// Plain newline, used to end the terminal line on a line-limit stop.
    pub fn newline(&mut self) {
        self.pending.push(b'\n');
    }

    /// Return to default colors if any color was emitted.
    pub fn finish(&mut self) {
        if self.current.is_some_and(|c| c != Color::Reset) {
            self.set_color(Color::Reset);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take the rendered bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixed_clock() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap_or_default()
    }

    fn render(options: RenderOptions, data: &[u8]) -> String {
        let mut detector = crate::session::LineDetector::new();
        let mut r = Renderer::new(options).with_clock(fixed_clock);
        for b in data {
            r.received(*b, detector.classify(*b));
        }
        String::from_utf8(r.take()).unwrap()
    }

    #[test]
    fn test_plain_passthrough() {
        assert_eq!(render(RenderOptions::default(), b"A\r\nB"), "A\r\nB");
    }

    #[test]
    fn test_control_pictures_drop_raw_cr() {
        let options = RenderOptions {
            control_chars: true,
            ..Default::default()
        };
        assert_eq!(render(options, b"A\r\n\x1bB"), "A\u{240d}\u{240a}\n\u{241b}\x1bB");
    }

    #[test]
    fn test_timestamp_at_line_start() {
        let options = RenderOptions {
            timestamps: true,
            ..Default::default()
        };
        assert_eq!(
            render(options, b"ab\r\ncd"),
            "1700000000.25 ab\r\n1700000000.25 cd"
        );
    }

    #[test]
    fn test_color_emitted_only_on_change() {
        let options = RenderOptions {
            colors: true,
            ..Default::default()
        };
        let mut r = Renderer::new(options);
        r.received(b'a', ByteClass::Data { line_start: true });
        r.received(b'b', ByteClass::Data { line_start: false });
        r.echoed(b'c');
        r.finish();
        assert_eq!(
            String::from_utf8(r.take()).unwrap(),
            "\x1b[0;34mab\x1b[1;36mc\x1b[0m"
        );
    }

    #[test]
    fn test_finish_without_colors_is_empty() {
        let mut r = Renderer::new(RenderOptions::default());
        r.finish();
        assert!(!r.has_pending());
    }

    #[test]
    fn test_control_picture_range() {
        assert_eq!(control_picture(0), Some('\u{2400}'));
        assert_eq!(control_picture(0x1f), Some('\u{241f}'));
        assert_eq!(control_picture(b' '), None);
    }
}
