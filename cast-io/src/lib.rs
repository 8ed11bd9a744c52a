//! Cast I/O and Platform Abstraction
//!
//! This crate provides the execution environment pieces injected into the
//! sender: clocks, deadline timers, and worker contexts with cancellable
//! deliveries.

pub mod clock;
pub mod time;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use time::{Timer, MIN_SCHEDULING_DELAY};
pub use worker::{CancellationToken, Lifeline, Processor, Worker, WorkerError, WorkerMode};
