//! # nestate-timer
//!
//! Timer backends for the nestate engine.
//!
//! [`TokioTimers`] runs each armed timer as a tokio task and pushes expiry
//! tokens into an mpsc channel; the owner of the machine receives from that
//! channel and forwards each token to `Machine::deliver_timer`.
//!
//! [`MockTimers`] is a deterministic manual-clock backend for tests: time
//! only advances when the test says so, and due fires queue up to be
//! drained and delivered explicitly.

pub mod backend;
pub mod mock;

pub use backend::TokioTimers;
pub use mock::MockTimers;
