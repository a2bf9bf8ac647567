//! Debug adapter protocol transport.
//!
//! Framed JSON over a child process's stdin/stdout: a codec, a reader task
//! that correlates responses by sequence number, a writer task, the process
//! spawner and the initialisation handshake.

pub mod codec;
pub mod handshake;
pub mod reader;
pub mod spawner;
pub mod writer;
