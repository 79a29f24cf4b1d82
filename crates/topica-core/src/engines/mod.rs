//! Compute engine backends.

pub mod command;

pub use command::CommandEngine;
