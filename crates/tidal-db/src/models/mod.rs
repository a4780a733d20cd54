//! Database models for persistent storage.

mod command;

pub use command::*;
