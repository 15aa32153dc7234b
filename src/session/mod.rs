// src/session/mod.rs

//! Timed exam-attempt session: clock, persistence, scoring and the
//! controller tying them together.

pub mod backup;
pub mod controller;
pub mod registry;
pub mod scoring;
pub mod sync;
pub mod timer;

pub use controller::{AbandonOutcome, FinishOutcome, Navigation, SessionController, Step};
pub use registry::{LiveSession, SessionRegistry};
pub use sync::{PendingSave, ProgressSynchronizer, SyncOutcome, SyncTrigger};
