//! Text wire protocol: newline-delimited `timestamp symbol price volume`
//! records with whitespace separators.
//!
//! The parser tolerates runs of spaces or tabs, leading whitespace, and a
//! trailing CR. A bad line is an error for that line only; the stream
//! continues.

use thiserror::Error;

/// Symbols on the text wire carry at most 7 bytes; storage is 8 bytes with
/// a terminating zero.
pub const TEXT_SYMBOL_MAX: usize = 7;

const LINE_BUFFER_CAPACITY: usize = 64 * 1024;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextParseError {
    #[error("empty line")]
    EmptyLine,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("symbol exceeds {TEXT_SYMBOL_MAX} bytes: got {0}")]
    SymbolTooLong(usize),

    #[error("invalid {field}")]
    InvalidField { field: &'static str },

    #[error("trailing data after volume field")]
    TrailingData,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextTick {
    pub timestamp: u64,
    pub symbol: [u8; 8],
    pub price: f64,
    pub volume: i64,
}

impl TextTick {
    pub fn symbol_str(&self) -> &str {
        let end = self.symbol.iter().position(|&b| b == 0).unwrap_or(8);
        std::str::from_utf8(&self.symbol[..end]).unwrap_or("")
    }
}

/// Parse one record. `line` must not include the trailing newline; a
/// trailing `\r` is tolerated.
pub fn parse_tick_line(line: &str) -> Result<TextTick, TextParseError> {
    let mut fields = line.split_whitespace();

    let ts_field = fields.next().ok_or(TextParseError::EmptyLine)?;
    let timestamp = ts_field
        .parse::<u64>()
        .map_err(|_| TextParseError::InvalidField { field: "timestamp" })?;

    let sym_field = fields.next().ok_or(TextParseError::MissingField("symbol"))?;
    if sym_field.len() > TEXT_SYMBOL_MAX {
        return Err(TextParseError::SymbolTooLong(sym_field.len()));
    }
    let mut symbol = [0u8; 8];
    symbol[..sym_field.len()].copy_from_slice(sym_field.as_bytes());

    let price_field = fields.next().ok_or(TextParseError::MissingField("price"))?;
    let price = price_field
        .parse::<f64>()
        .map_err(|_| TextParseError::InvalidField { field: "price" })?;

    let volume_field = fields.next().ok_or(TextParseError::MissingField("volume"))?;
    let volume = volume_field
        .parse::<i64>()
        .map_err(|_| TextParseError::InvalidField { field: "volume" })?;

    if fields.next().is_some() {
        return Err(TextParseError::TrailingData);
    }

    Ok(TextTick {
        timestamp,
        symbol,
        price,
        volume,
    })
}

/// Serialise a record, newline-terminated.
pub fn format_tick_line(timestamp: u64, symbol: &str, price: f64, volume: i64) -> String {
    format!("{} {} {} {}\n", timestamp, symbol, price, volume)
}

/// Accumulates raw bytes from the transport and yields complete lines.
///
/// Bounded: a sender that never terminates a line cannot grow the buffer
/// past `LINE_BUFFER_CAPACITY`; `append` reports the overflow and the
/// caller decides whether to reset.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    start: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer {
            buf: Vec::with_capacity(4096),
            start: 0,
        }
    }

    /// Append transport bytes. Returns false (without appending) if the
    /// pending unterminated data plus `bytes` would exceed the capacity.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        if self.buf.len() + bytes.len() > LINE_BUFFER_CAPACITY {
            return false;
        }
        self.buf.extend_from_slice(bytes);
        true
    }

    /// Next complete line, without its terminator. Strips one trailing CR.
    pub fn next_line(&mut self) -> Option<&[u8]> {
        let rest = &self.buf[self.start..];
        let nl = rest.iter().position(|&b| b == b'\n')?;

        let line_start = self.start;
        let mut line_end = self.start + nl;
        if line_end > line_start && self.buf[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        self.start += nl + 1;
        Some(&self.buf[line_start..line_end])
    }

    /// Bytes buffered but not yet consumed as complete lines.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.start = 0;
    }
}
