//! Core data model for the batch generation engine.

mod batch;
mod fanout;
mod filter;
mod session;
mod work_item;

pub use batch::{
    BatchEnvelope, BatchOutcome, BatchRequest, SkipReason, SkipReasonTally, StopReason,
};
pub use fanout::FanoutSet;
pub use filter::{BatchFilter, GenerationMode, Scope, MAX_BATCH_SIZE, MAX_KEYWORDS};
pub use session::{RunCounters, Session, SessionConflict, SESSION_SCHEMA_VERSION};
pub use work_item::WorkItem;
