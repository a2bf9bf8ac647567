//! V8 inspector transport: process spawner, WebSocket tasks and the
//! message format.

pub mod protocol;
pub mod socket;
pub mod spawner;
