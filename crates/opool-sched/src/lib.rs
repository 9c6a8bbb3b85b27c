//! Cooperative job scheduler for the object pool.
//!
//! The pool never runs work from inside a mutation callback. Instead it asks
//! a [`Scheduler`] to run a named method on a named target "soon"; repeated
//! requests for the same `(target, method)` pair coalesce into one job until
//! that job has finished running. The owner drives the scheduler explicitly
//! by taking due jobs and dispatching them, which keeps batching
//! deterministic and free of global state.

pub mod scheduler;

pub use scheduler::{JobKey, Scheduler};
