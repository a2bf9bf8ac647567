//! Session daemon: hosts one debug session behind a loopback socket so
//! that separate short-lived invocations can drive it.

pub mod client;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod spawner;
