//! Loop registry.
//!
//! The registry is the single source of truth for which loops exist. It is
//! pure data: the scheduler reads a [`LoopRegistry::snapshot`] once per
//! window and never mutates it.
//!
//! - [`LoopRegistry`] - Owned registry with change notifications
//! - [`SharedRegistry`] - Lock-protected handle for multi-threaded hosts

mod manager;
mod model;

pub use manager::SharedRegistry;
pub use model::LoopRegistry;
