//! tc-transcode: the transcoding pipeline.
//!
//! [`TranscodingService`] is the entry point: it records jobs and renditions
//! as pending and hands a [`Ticket`] per job to the [`WorkerPool`]. The pool
//! runs a fixed number of workers over one bounded FIFO queue, each driving
//! a job through the [`tc_av::Encoder`] and writing the outcome to both
//! records in one transaction.

pub mod pool;
pub mod queue;
pub mod service;
mod worker;

pub use pool::{PoolOptions, WorkerPool};
pub use queue::Ticket;
pub use service::{record_pending, Recovery, TranscodingService};
