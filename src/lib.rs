//! # nestate
//!
//! Hierarchical state machine engine.
//!
//! States form a tree; a machine sits in one leaf-or-inner state at a time
//! and dispatches events up the active chain until some handler consumes
//! them. Transitions run exit actions child to parent up to the lowest
//! common ancestor, then entry actions parent to child down to the target,
//! and requests made from inside those actions are deferred rather than
//! recursed. A machine can additionally bind one timer to its current
//! state; the binding is released before the state is exited, and late
//! expiries are rejected by generation, so a fired-but-undelivered timer
//! is never observable after leaving the state that armed it.
//!
//! The engine itself lives in [`nestate_core`] and is re-exported here.
//! With the `timer` feature (on by default), the backends from
//! [`nestate_timer`] are re-exported too: [`TokioTimers`] runs timers as
//! tokio tasks feeding an mpsc channel, and [`MockTimers`] is a
//! deterministic manual clock for tests.
//!
//! ## Features
//!
//! - `history` (default): record the previous state on every transition
//!   and allow [`Machine::transition_to_history`].
//! - `timer` (default): the single-slot state-bound timer and its
//!   backends.

pub use nestate_core::{
    CoreError, DispatchOutcome, Event, Machine, StateHandler, StateId, StateTree,
    StateTreeBuilder, TransitionHook, DEFAULT_MAX_DEPTH,
};

#[cfg(feature = "timer")]
pub use nestate_core::{TimerBackend, TimerFire, TimerHandle, TimerMode};

#[cfg(feature = "timer")]
pub use nestate_timer::{MockTimers, TokioTimers};
