//! Mutation interception layer for jsonkeep.
//!
//! [`ObservedContainer`] decorates a [`Container`](jsonkeep_tree::Container)
//! with the same [`MutableTree`](jsonkeep_tree::MutableTree) surface. Every
//! operation is forwarded to the container first, then reported to an
//! optional update hook, then (for mutating operations) handed to a
//! [`SaveRequest`], normally a [`Scheduler`]. Children read through a
//! decorator come back decorated, so nested writes are observed too.
//!
//! The [`Scheduler`] turns bursts of save requests into a bounded number of
//! writes: it debounces, caps how often a pending save can be pushed back,
//! and never lets two writes to the same target overlap.

pub mod observer;
pub mod operation;
pub mod scheduler;

pub use observer::{Observed, ObservedContainer, Observer};
pub use operation::{update_hook, HookError, Operation, Outcome, Update, UpdateHook};
pub use scheduler::{Persist, SaveRequest, ScheduleConfig, Scheduler};
