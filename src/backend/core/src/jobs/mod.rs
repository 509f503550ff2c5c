//! Run drivers.
//!
//! Both drivers wrap the same [`EventPipeline`] cycle and differ only in
//! what triggers it:
//!
//! ```text
//!   PollingDriver ── CycleScheduler tick ──┐
//!                                          ├──▶ EventPipeline::run_cycle
//!   PushDriver ◀── InboundMessage ─────────┘      (fetch ▶ dispatch ▶ advance)
//!        ▲
//!        └── RedisStreamSubscriber (XREADGROUP, XACK after the cycle)
//! ```
//!
//! Shutdown is cooperative through a `watch` channel. Neither driver
//! cancels a batch in progress.

pub mod pipeline;
pub mod poller;
pub mod push;
pub mod scheduler;
pub mod subscription;

pub use pipeline::{CycleOutcome, EventPipeline};
pub use poller::PollingDriver;
pub use push::{PushDriver, PushStats};
pub use scheduler::{Clock, CycleScheduler, ManualClock, ScheduleState, SchedulerHandle, SystemClock};
pub use subscription::{Acker, InboundMessage, RedisAcker, RedisStreamSubscriber};
