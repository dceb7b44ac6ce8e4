//! Core data types

pub mod event;

pub use event::{Event, StreamTag};
