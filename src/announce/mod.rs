//! Announcement sessions: render the three language scripts, resolve audio
//! through the cache chain and synthesis, then play N repeats in
//! english → khmer → chinese order.

pub mod orchestrator;
pub mod session;

pub use orchestrator::{
    AnnounceError, AnnounceOutcome, Orchestrator, Pacing, SkipReason, TriggerKind, FAILURE_MESSAGE,
};
pub use session::{Phase, Progress};
