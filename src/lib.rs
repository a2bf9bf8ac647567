#![forbid(unsafe_code)]

//! Runtime debugging backend.
//!
//! Launches a Node.js or Python program under its native debugger, drives
//! it through breakpoints, stepping and inspection, and can keep the
//! session alive in a background daemon so that separate short-lived
//! commands act on the same debuggee.

pub mod adapter;
pub mod config;
pub mod daemon;
pub mod driver;
pub mod errors;
pub mod inspector;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod process;
pub mod report;
pub mod runtime;

pub use config::DebugConfig;
pub use errors::{AppError, Result};
