//! Binary wire protocol: length-prefixed, typed, sequence-numbered frames.
//!
//! Header layout (13 bytes, big-endian on the wire):
//!   - length:   u32  — payload size in bytes, excluding the header
//!   - type:     u8   — message kind
//!   - sequence: u64  — monotonically increasing per producer
//!
//! All multi-byte integers are network byte order. Floats travel as the
//! big-endian byte swap of their 32-bit storage.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

pub const HEADER_SIZE: usize = 13;

/// Hard ceiling on the declared payload length. Anything above this is a
/// framing error, not a large message.
pub const MAX_PAYLOAD_SIZE: usize = 1024;

pub const SYMBOL_LEN: usize = 4;

pub const TICK_PAYLOAD_SIZE: usize = 20;
pub const HEARTBEAT_PAYLOAD_SIZE: usize = 8;
pub const SNAPSHOT_REQUEST_PAYLOAD_SIZE: usize = 4;
pub const SNAPSHOT_RESPONSE_MIN_SIZE: usize = 6;
pub const BOOK_LEVEL_SIZE: usize = 12;
pub const ORDER_BOOK_UPDATE_PAYLOAD_SIZE: usize = 17;
pub const RETRANSMIT_REQUEST_PAYLOAD_SIZE: usize = 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Tick = 0x01,
    OrderBookUpdate = 0x02,
    SnapshotRequest = 0x10,
    SnapshotResponse = 0x11,
    RetransmitRequest = 0x20,
    RetransmitResponse = 0x21,
    Heartbeat = 0xFF,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(MessageType::Tick),
            0x02 => Some(MessageType::OrderBookUpdate),
            0x10 => Some(MessageType::SnapshotRequest),
            0x11 => Some(MessageType::SnapshotResponse),
            0x20 => Some(MessageType::RetransmitRequest),
            0x21 => Some(MessageType::RetransmitResponse),
            0xFF => Some(MessageType::Heartbeat),
            _ => None,
        }
    }

    /// Required payload size for fixed-size message kinds. `None` for the
    /// variable-size snapshot response.
    fn fixed_payload_size(self) -> Option<usize> {
        match self {
            MessageType::Tick | MessageType::RetransmitResponse => Some(TICK_PAYLOAD_SIZE),
            MessageType::Heartbeat => Some(HEARTBEAT_PAYLOAD_SIZE),
            MessageType::SnapshotRequest => Some(SNAPSHOT_REQUEST_PAYLOAD_SIZE),
            MessageType::OrderBookUpdate => Some(ORDER_BOOK_UPDATE_PAYLOAD_SIZE),
            MessageType::RetransmitRequest => Some(RETRANSMIT_REQUEST_PAYLOAD_SIZE),
            MessageType::SnapshotResponse => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: u32,
    pub msg_type: MessageType,
    pub sequence: u64,
}

impl MessageHeader {
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),

    #[error("declared payload length {0} exceeds maximum {MAX_PAYLOAD_SIZE}")]
    LengthOutOfRange(u32),

    #[error("payload size {actual} does not match required size {expected}")]
    PayloadSizeMismatch { expected: usize, actual: usize },

    #[error("snapshot declares {levels} levels but carries {available} bytes of level data")]
    LevelCountMismatch { levels: usize, available: usize },

    #[error("invalid book side: {0}")]
    InvalidSide(u8),
}

pub type WireResult<T> = Result<T, WireError>;

/// Tick payload: `timestamp:u64, symbol:[4]u8, price:f32, volume:i32` (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickPayload {
    pub timestamp: u64,
    pub symbol: [u8; SYMBOL_LEN],
    pub price: f32,
    pub volume: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRequestPayload {
    pub symbol: [u8; SYMBOL_LEN],
}

/// One price level: `price:f32, quantity:u64` (12 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f32,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotResponsePayload {
    pub symbol: [u8; SYMBOL_LEN],
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBookUpdatePayload {
    pub symbol: [u8; SYMBOL_LEN],
    pub side: u8,
    pub price: f32,
    pub quantity: i64,
}

/// Inclusive sequence range to replay over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequestPayload {
    pub start_sequence: u64,
    pub end_sequence: u64,
}

/// Append a 13-byte header to `buf`.
pub fn encode_header(buf: &mut Vec<u8>, msg_type: MessageType, sequence: u64, payload_len: u32) {
    let mut hdr = [0u8; HEADER_SIZE];
    BigEndian::write_u32(&mut hdr[0..4], payload_len);
    hdr[4] = msg_type as u8;
    BigEndian::write_u64(&mut hdr[5..13], sequence);
    buf.extend_from_slice(&hdr);
}

/// Decode and validate a header. Fails with `Truncated` on fewer than 13
/// bytes. Unknown types, out-of-range lengths, and fixed-size payload
/// mismatches are all rejected here so a receiver never buffers a payload
/// for a frame it cannot process.
pub fn decode_header(bytes: &[u8]) -> WireResult<MessageHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            need: HEADER_SIZE,
            have: bytes.len(),
        });
    }

    let length = BigEndian::read_u32(&bytes[0..4]);
    let msg_type = MessageType::from_u8(bytes[4]).ok_or(WireError::UnknownType(bytes[4]))?;
    let sequence = BigEndian::read_u64(&bytes[5..13]);

    if length as usize > MAX_PAYLOAD_SIZE {
        return Err(WireError::LengthOutOfRange(length));
    }

    if let Some(expected) = msg_type.fixed_payload_size() {
        if length as usize != expected {
            return Err(WireError::PayloadSizeMismatch {
                expected,
                actual: length as usize,
            });
        }
    } else if (length as usize) < SNAPSHOT_RESPONSE_MIN_SIZE {
        return Err(WireError::PayloadSizeMismatch {
            expected: SNAPSHOT_RESPONSE_MIN_SIZE,
            actual: length as usize,
        });
    }

    Ok(MessageHeader {
        length,
        msg_type,
        sequence,
    })
}

pub fn encode_tick(
    sequence: u64,
    timestamp: u64,
    symbol: &[u8; SYMBOL_LEN],
    price: f32,
    volume: i32,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_SIZE + TICK_PAYLOAD_SIZE);
    encode_header(&mut msg, MessageType::Tick, sequence, TICK_PAYLOAD_SIZE as u32);

    let mut payload = [0u8; TICK_PAYLOAD_SIZE];
    BigEndian::write_u64(&mut payload[0..8], timestamp);
    payload[8..12].copy_from_slice(symbol);
    BigEndian::write_u32(&mut payload[12..16], price.to_bits());
    BigEndian::write_i32(&mut payload[16..20], volume);
    msg.extend_from_slice(&payload);
    msg
}

/// Decode a tick payload. Requires exactly 20 bytes.
pub fn decode_tick_payload(bytes: &[u8]) -> WireResult<TickPayload> {
    if bytes.len() != TICK_PAYLOAD_SIZE {
        return Err(WireError::PayloadSizeMismatch {
            expected: TICK_PAYLOAD_SIZE,
            actual: bytes.len(),
        });
    }

    let mut symbol = [0u8; SYMBOL_LEN];
    symbol.copy_from_slice(&bytes[8..12]);

    Ok(TickPayload {
        timestamp: BigEndian::read_u64(&bytes[0..8]),
        symbol,
        price: f32::from_bits(BigEndian::read_u32(&bytes[12..16])),
        volume: BigEndian::read_i32(&bytes[16..20]),
    })
}

pub fn encode_heartbeat(sequence: u64, timestamp: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_SIZE + HEARTBEAT_PAYLOAD_SIZE);
    encode_header(
        &mut msg,
        MessageType::Heartbeat,
        sequence,
        HEARTBEAT_PAYLOAD_SIZE as u32,
    );
    let mut payload = [0u8; HEARTBEAT_PAYLOAD_SIZE];
    BigEndian::write_u64(&mut payload, timestamp);
    msg.extend_from_slice(&payload);
    msg
}

pub fn decode_heartbeat_payload(bytes: &[u8]) -> WireResult<HeartbeatPayload> {
    if bytes.len() != HEARTBEAT_PAYLOAD_SIZE {
        return Err(WireError::PayloadSizeMismatch {
            expected: HEARTBEAT_PAYLOAD_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(HeartbeatPayload {
        timestamp: BigEndian::read_u64(bytes),
    })
}

pub fn encode_snapshot_request(sequence: u64, symbol: &[u8; SYMBOL_LEN]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_SIZE + SNAPSHOT_REQUEST_PAYLOAD_SIZE);
    encode_header(
        &mut msg,
        MessageType::SnapshotRequest,
        sequence,
        SNAPSHOT_REQUEST_PAYLOAD_SIZE as u32,
    );
    msg.extend_from_slice(symbol);
    msg
}

pub fn decode_snapshot_request_payload(bytes: &[u8]) -> WireResult<SnapshotRequestPayload> {
    if bytes.len() != SNAPSHOT_REQUEST_PAYLOAD_SIZE {
        return Err(WireError::PayloadSizeMismatch {
            expected: SNAPSHOT_REQUEST_PAYLOAD_SIZE,
            actual: bytes.len(),
        });
    }
    let mut symbol = [0u8; SYMBOL_LEN];
    symbol.copy_from_slice(bytes);
    Ok(SnapshotRequestPayload { symbol })
}

/// Snapshot response payload:
/// `symbol:[4]u8, n_bids:u8, n_asks:u8, {price:f32, qty:u64} × (n_bids + n_asks)`.
/// Bid levels precede ask levels; a side holds at most 255 levels.
pub fn encode_snapshot_response(
    sequence: u64,
    symbol: &[u8; SYMBOL_LEN],
    bids: &[BookLevel],
    asks: &[BookLevel],
) -> Vec<u8> {
    debug_assert!(bids.len() <= u8::MAX as usize && asks.len() <= u8::MAX as usize);

    let payload_len = SNAPSHOT_RESPONSE_MIN_SIZE + (bids.len() + asks.len()) * BOOK_LEVEL_SIZE;
    let mut msg = Vec::with_capacity(HEADER_SIZE + payload_len);
    encode_header(
        &mut msg,
        MessageType::SnapshotResponse,
        sequence,
        payload_len as u32,
    );

    msg.extend_from_slice(symbol);
    msg.push(bids.len() as u8);
    msg.push(asks.len() as u8);

    let mut level = [0u8; BOOK_LEVEL_SIZE];
    for l in bids.iter().chain(asks.iter()) {
        BigEndian::write_u32(&mut level[0..4], l.price.to_bits());
        BigEndian::write_u64(&mut level[4..12], l.quantity);
        msg.extend_from_slice(&level);
    }
    msg
}

pub fn decode_snapshot_response_payload(bytes: &[u8]) -> WireResult<SnapshotResponsePayload> {
    if bytes.len() < SNAPSHOT_RESPONSE_MIN_SIZE {
        return Err(WireError::Truncated {
            need: SNAPSHOT_RESPONSE_MIN_SIZE,
            have: bytes.len(),
        });
    }

    let mut symbol = [0u8; SYMBOL_LEN];
    symbol.copy_from_slice(&bytes[0..4]);
    let n_bids = bytes[4] as usize;
    let n_asks = bytes[5] as usize;

    let level_bytes = bytes.len() - SNAPSHOT_RESPONSE_MIN_SIZE;
    if (n_bids + n_asks) * BOOK_LEVEL_SIZE != level_bytes {
        return Err(WireError::LevelCountMismatch {
            levels: n_bids + n_asks,
            available: level_bytes,
        });
    }

    let read_level = |i: usize| {
        let off = SNAPSHOT_RESPONSE_MIN_SIZE + i * BOOK_LEVEL_SIZE;
        BookLevel {
            price: f32::from_bits(BigEndian::read_u32(&bytes[off..off + 4])),
            quantity: BigEndian::read_u64(&bytes[off + 4..off + 12]),
        }
    };

    let bids = (0..n_bids).map(read_level).collect();
    let asks = (n_bids..n_bids + n_asks).map(read_level).collect();

    Ok(SnapshotResponsePayload { symbol, bids, asks })
}

pub fn encode_order_book_update(
    sequence: u64,
    symbol: &[u8; SYMBOL_LEN],
    side: u8,
    price: f32,
    quantity: i64,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_SIZE + ORDER_BOOK_UPDATE_PAYLOAD_SIZE);
    encode_header(
        &mut msg,
        MessageType::OrderBookUpdate,
        sequence,
        ORDER_BOOK_UPDATE_PAYLOAD_SIZE as u32,
    );

    msg.extend_from_slice(symbol);
    msg.push(side);
    let mut tail = [0u8; 12];
    BigEndian::write_u32(&mut tail[0..4], price.to_bits());
    BigEndian::write_i64(&mut tail[4..12], quantity);
    msg.extend_from_slice(&tail);
    msg
}

pub fn decode_order_book_update_payload(bytes: &[u8]) -> WireResult<OrderBookUpdatePayload> {
    if bytes.len() != ORDER_BOOK_UPDATE_PAYLOAD_SIZE {
        return Err(WireError::PayloadSizeMismatch {
            expected: ORDER_BOOK_UPDATE_PAYLOAD_SIZE,
            actual: bytes.len(),
        });
    }

    let mut symbol = [0u8; SYMBOL_LEN];
    symbol.copy_from_slice(&bytes[0..4]);

    Ok(OrderBookUpdatePayload {
        symbol,
        side: bytes[4],
        price: f32::from_bits(BigEndian::read_u32(&bytes[5..9])),
        quantity: BigEndian::read_i64(&bytes[9..17]),
    })
}

pub fn encode_retransmit_request(sequence: u64, start_seq: u64, end_seq: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_SIZE + RETRANSMIT_REQUEST_PAYLOAD_SIZE);
    encode_header(
        &mut msg,
        MessageType::RetransmitRequest,
        sequence,
        RETRANSMIT_REQUEST_PAYLOAD_SIZE as u32,
    );
    let mut payload = [0u8; RETRANSMIT_REQUEST_PAYLOAD_SIZE];
    BigEndian::write_u64(&mut payload[0..8], start_seq);
    BigEndian::write_u64(&mut payload[8..16], end_seq);
    msg.extend_from_slice(&payload);
    msg
}

pub fn decode_retransmit_request_payload(bytes: &[u8]) -> WireResult<RetransmitRequestPayload> {
    if bytes.len() != RETRANSMIT_REQUEST_PAYLOAD_SIZE {
        return Err(WireError::PayloadSizeMismatch {
            expected: RETRANSMIT_REQUEST_PAYLOAD_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(RetransmitRequestPayload {
        start_sequence: BigEndian::read_u64(&bytes[0..8]),
        end_sequence: BigEndian::read_u64(&bytes[8..16]),
    })
}

/// Right-pad an ASCII symbol into the fixed wire representation. Longer
/// symbols are truncated to four bytes.
pub fn pad_symbol(s: &str) -> [u8; SYMBOL_LEN] {
    let mut out = [0u8; SYMBOL_LEN];
    let bytes = s.as_bytes();
    let n = bytes.len().min(SYMBOL_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(0x01), Some(MessageType::Tick));
        assert_eq!(MessageType::from_u8(0xFF), Some(MessageType::Heartbeat));
        assert_eq!(MessageType::from_u8(0x21), Some(MessageType::RetransmitResponse));
        assert_eq!(MessageType::from_u8(0x03), None);
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        encode_header(&mut buf, MessageType::Tick, 42, TICK_PAYLOAD_SIZE as u32);
        assert_eq!(buf.len(), HEADER_SIZE);

        let header = decode_header(&buf).unwrap();
        assert_eq!(header.msg_type, MessageType::Tick);
        assert_eq!(header.sequence, 42);
        assert_eq!(header.length, TICK_PAYLOAD_SIZE as u32);
    }

    #[test]
    fn test_header_big_endian_layout() {
        let mut buf = Vec::new();
        encode_header(&mut buf, MessageType::Heartbeat, 1, 8);
        assert_eq!(&buf[0..4], &[0, 0, 0, 8]);
        assert_eq!(buf[4], 0xFF);
        assert_eq!(&buf[5..13], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_tick_roundtrip() {
        let msg = encode_tick(7, 1_234_567_890, b"AAPL", 150.25, -500);
        let header = decode_header(&msg).unwrap();
        let tick = decode_tick_payload(&msg[HEADER_SIZE..]).unwrap();

        assert_eq!(header.sequence, 7);
        assert_eq!(tick.timestamp, 1_234_567_890);
        assert_eq!(&tick.symbol, b"AAPL");
        assert_eq!(tick.price, 150.25);
        assert_eq!(tick.volume, -500);
    }

    #[test]
    fn test_zero_length_tick_is_framing_error() {
        let mut buf = Vec::new();
        encode_header(&mut buf, MessageType::Tick, 1, 0);
        assert!(matches!(
            decode_header(&buf),
            Err(WireError::PayloadSizeMismatch { expected: TICK_PAYLOAD_SIZE, actual: 0 })
        ));
    }

    #[test]
    fn test_snapshot_response_roundtrip() {
        let bids = vec![
            BookLevel { price: 100.50, quantity: 1000 },
            BookLevel { price: 100.25, quantity: 2000 },
        ];
        let asks = vec![BookLevel { price: 100.75, quantity: 800 }];

        let msg = encode_snapshot_response(300, b"TSLA", &bids, &asks);
        let header = decode_header(&msg).unwrap();
        assert_eq!(header.msg_type, MessageType::SnapshotResponse);

        let snap = decode_snapshot_response_payload(&msg[HEADER_SIZE..]).unwrap();
        assert_eq!(&snap.symbol, b"TSLA");
        assert_eq!(snap.bids, bids);
        assert_eq!(snap.asks, asks);
    }

    #[test]
    fn test_snapshot_level_count_mismatch() {
        let msg =
            encode_snapshot_response(1, b"AAPL", &[BookLevel { price: 1.0, quantity: 1 }], &[]);
        let mut payload = msg[HEADER_SIZE..].to_vec();
        payload[4] = 3; // claims 3 bids, carries 1 level
        assert!(matches!(
            decode_snapshot_response_payload(&payload),
            Err(WireError::LevelCountMismatch { .. })
        ));
    }

    #[test]
    fn test_retransmit_request_roundtrip() {
        let msg = encode_retransmit_request(0, 10, 25);
        let req = decode_retransmit_request_payload(&msg[HEADER_SIZE..]).unwrap();
        assert_eq!(req.start_sequence, 10);
        assert_eq!(req.end_sequence, 25);
    }

    #[test]
    fn test_pad_symbol() {
        assert_eq!(pad_symbol("IBM"), *b"IBM\0");
        assert_eq!(pad_symbol("GOOGL"), *b"GOOG");
    }
}
