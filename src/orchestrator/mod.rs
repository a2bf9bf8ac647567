//! Session orchestration: the stateful debug session and the one-shot probe.

pub mod debug_session;
pub mod probe;
