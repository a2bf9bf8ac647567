//! Domain model module declarations.

pub mod breakpoint;
pub mod record;
pub mod session;
pub mod stack;
