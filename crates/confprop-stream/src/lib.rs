//! Change stream side of the propagation engine.
//!
//! This crate provides:
//! - `BatchWindow`: the reusable filter + time/size window primitive
//! - `ChangeStreamDispatcher`: drives the window from the store's change log
//!   and notifies downstream once per closed batch
//! - `TopicReporter`: fire-and-forget error reporting channel
//! - `ScheduleResolvingNotifier`: maps period changes to affected schedules

pub mod dispatcher;
pub mod reporting;
pub mod resolver;
pub mod window;

pub use dispatcher::*;
pub use reporting::*;
pub use resolver::*;
pub use window::*;
