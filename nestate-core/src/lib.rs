//! # nestate-core
//!
//! Hierarchical state machine engine.
//!
//! This crate provides:
//! - An arena-based state registry with parent/child hierarchy
//!   ([`StateTree`], [`StateTreeBuilder`])
//! - Machines that dispatch events leaf to root over that registry
//!   ([`Machine`], [`DispatchOutcome`])
//! - Transitions sequenced around the lowest common ancestor, with
//!   re-entrant requests deferred instead of recursed
//! - Previous-state history behind the `history` feature
//! - A single-slot state-bound timer behind the `timer` feature, driven by
//!   a pluggable [`TimerBackend`]

pub mod error;
pub mod event;
pub mod machine;
#[cfg(feature = "timer")]
pub mod timer;
pub mod tree;

pub use error::CoreError;
pub use event::Event;
pub use machine::{DispatchOutcome, Machine, StateHandler, TransitionHook};
#[cfg(feature = "timer")]
pub use timer::{TimerBackend, TimerFire, TimerHandle, TimerMode};
pub use tree::{StateId, StateTree, StateTreeBuilder};

/// Default maximum hierarchy depth enforced at registry construction.
pub const DEFAULT_MAX_DEPTH: usize = 8;
