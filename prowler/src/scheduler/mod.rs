//! Session scheduling.
//!
//! One worker task per running session, owned by the [`SessionSupervisor`].
//!
//! # Architecture
//!
//! - [`SessionWorker`]: polls on a [`PollSchedule`], signs and sends search calls
//! - [`SessionHandle`]: mailbox, priority lane and snapshot receiver of a worker
//! - [`SessionRegistry`]: running workers and parked sessions
//! - [`SessionSupervisor`]: lifecycle commands, status, health monitor, shutdown

mod handle;
mod messages;
mod registry;
mod schedule;
mod status;
mod supervisor;
mod worker;

pub use handle::{SendError, SessionHandle};
pub use messages::SessionMessage;
pub use registry::{RunningSession, SessionRegistry};
pub use schedule::PollSchedule;
pub use status::{HealthReport, ShutdownReport, SupervisorStatus};
pub use supervisor::{SessionSupervisor, SupervisorConfig};
pub use worker::{SessionWorker, WorkerDeps};
