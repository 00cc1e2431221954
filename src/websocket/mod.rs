// WebSocket handlers
pub mod realtime;
