//! SQLStep pipeline - replays a statement as relational-algebra steps

mod builder;
mod error;
pub mod join;
pub mod reconcile;
pub mod resolve;
pub mod translate;

pub use builder::PipelineBuilder;
pub use error::PipelineError;
pub use join::{simulate_join, JoinOutcome};
pub use reconcile::{reconcile_by_identity, reconcile_by_value, Reconciliation};
pub use translate::translate_error;

use sqlstep_duck::Engine;
use sqlstep_ir::ExecutionResult;

/// Replay `sql` against `engine`.
pub fn execute(engine: &dyn Engine, sql: &str) -> ExecutionResult {
    PipelineBuilder::new(engine).run(sql)
}
