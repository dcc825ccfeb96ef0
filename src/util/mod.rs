//! Internal utilities shared by the scheduler structures.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
