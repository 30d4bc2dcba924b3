//! Flotilla wire protocol.
//!
//! This crate contains:
//! - The frame types exchanged between the coordinator and a worker process
//! - The newline-delimited JSON codec that carries them over any byte stream
//!
//! The same codec runs over a spawned process' stdin/stdout and over
//! in-memory duplex pipes, so tests and production share one code path.

pub mod codec;
pub mod frame;

pub use codec::{read_frame, write_frame};
pub use frame::{CoordinatorFrame, WorkerFrame};
