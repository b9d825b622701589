//! Wire-level constants

/// Length of the MQTT-gateway audio header in bytes
pub const GATEWAY_HEADER_LEN: usize = 16;

/// Byte range of the big-endian capture timestamp (milliseconds)
pub const GATEWAY_TIMESTAMP_RANGE: std::ops::Range<usize> = 8..12;

/// Byte range of the big-endian audio payload length
pub const GATEWAY_LENGTH_RANGE: std::ops::Range<usize> = 12..16;

/// Default WebSocket path devices connect to
pub const DEFAULT_WS_PATH: &str = "/xiaozhi/v1/";
