//! Bounded text buffer for the crash dump, plus frame formatting.

use std::ffi::c_void;
use std::fmt::{self, Write};

/// Text sink that keeps at most `capacity` bytes and drops the rest.
///
/// Writes never fail. Once the capacity is reached the buffer is marked
/// truncated; the cut always falls on a UTF-8 character boundary.
#[derive(Debug)]
pub struct DumpBuffer {
    text: String,
    capacity: usize,
    truncated: bool,
}

impl DumpBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity.min(64 * 1024)),
            capacity,
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether any write was cut short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_full(&self) -> bool {
        self.text.len() >= self.capacity
    }
}

impl Write for DumpBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.capacity.saturating_sub(self.text.len());
        if s.len() <= room {
            self.text.push_str(s);
            return Ok(());
        }
        let mut cut = room;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&s[..cut]);
        self.truncated = true;
        Ok(())
    }
}

/// Symbolise raw return addresses and write one line per frame.
///
/// Inlined frames print once per symbol at the same address.
pub fn write_frames<W: Write>(out: &mut W, frames: &[usize]) -> fmt::Result {
    for (index, &ip) in frames.iter().enumerate() {
        let mut lines = Vec::new();
        backtrace::resolve(ip as *mut c_void, |symbol| {
            let name = symbol
                .name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            let location = match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(line)) => Some(format!("{}:{line}", file.display())),
                _ => None,
            };
            lines.push((name, location));
        });

        if lines.is_empty() {
            writeln!(out, "  #{index:<3} {ip:#018x} <unresolved>")?;
            continue;
        }
        for (name, location) in lines {
            writeln!(out, "  #{index:<3} {ip:#018x} {name}")?;
            if let Some(location) = location {
                writeln!(out, "         at {location}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_without_truncation() {
        let mut buf = DumpBuffer::new(16);
        write!(buf, "0123456789").unwrap();
        assert_eq!(buf.as_str(), "0123456789");
        assert!(!buf.is_truncated());
        assert!(!buf.is_full());
    }

    #[test]
    fn test_exact_capacity_is_not_truncation() {
        let mut buf = DumpBuffer::new(4);
        write!(buf, "abcd").unwrap();
        assert!(buf.is_full());
        assert!(!buf.is_truncated());
    }

    #[test]
    fn test_overflow_truncates_silently() {
        let mut buf = DumpBuffer::new(8);
        write!(buf, "hello ").unwrap();
        write!(buf, "world").unwrap();
        write!(buf, "more").unwrap();
        assert_eq!(buf.as_str(), "hello wo");
        assert!(buf.is_truncated());
        assert_eq!(buf.len(), buf.capacity());
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let mut buf = DumpBuffer::new(5);
        // 'é' is two bytes; the cut at byte 5 would split it.
        write!(buf, "abcdé").unwrap();
        assert_eq!(buf.as_str(), "abcd");
        assert!(buf.is_truncated());
    }

    #[test]
    fn test_write_frames_numbers_every_frame() {
        let mut frames = Vec::new();
        backtrace::trace(|frame| {
            frames.push(frame.ip() as usize);
            frames.len() < 8
        });
        assert!(!frames.is_empty());

        let mut out = String::new();
        write_frames(&mut out, &frames).unwrap();
        assert!(out.contains("#0"));
        assert!(out.lines().count() >= frames.len());
    }

    #[test]
    fn test_write_frames_marks_unresolvable() {
        let mut out = String::new();
        write_frames(&mut out, &[0x10]).unwrap();
        assert!(out.contains("#0"));
        assert!(out.contains("0x0000000000000010"));
    }
}
