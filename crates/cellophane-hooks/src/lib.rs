//! Hook declarations, stage tags, condition gating, and the name+stage DAG
//! resolver that orders them — §4.3 of the engine's design.

pub mod errors;
pub mod gating;
pub mod ordering;
pub mod types;

pub use errors::HookFailure;
pub use gating::gated_subset;
pub use ordering::{resolve, OrderingError};
pub use types::{
    Condition, Dep, Hook, HookWhen, Per, StageTag, POST_STAGE_ORDER, PRE_STAGE_ORDER,
};
