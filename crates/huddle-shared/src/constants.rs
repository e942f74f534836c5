/// Application name
pub const APP_NAME: &str = "Huddle";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Path of the real-time WebSocket endpoint
pub const WS_PATH: &str = "/ws";

/// Seconds between server pings on an idle WebSocket
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Seconds the server waits for a pong before closing the socket
pub const WS_PONG_TIMEOUT_SECS: u64 = 10;

/// WebSocket close code sent when the session token is rejected
pub const WS_CLOSE_UNAUTHORIZED: u16 = 4001;

/// WebSocket close code sent when a newer connection replaces this one
pub const WS_CLOSE_REPLACED: u16 = 4002;

/// Prefix identifying an inline image payload that must go through the blob
/// service before it is stored.
pub const INLINE_DATA_PREFIX: &str = "data:";
