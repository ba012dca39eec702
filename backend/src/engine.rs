//! Engine adapter seam
//!
//! The legacy engine runs as a separate process speaking its own line
//! protocol. Workers only see it through [`EngineAdapter`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DispatchError, DispatchResult};
use crate::models::MoveResult;
use crate::personalities::TuningParams;

/// Everything the engine needs to search one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub moves: Vec<String>,
    pub params: TuningParams,
    /// Think time for this move
    pub clock_budget: Duration,
    pub random_is_off: bool,
    pub stop_id: Option<i64>,
}

impl EngineSettings {
    /// Budget in the engine's own unit, centiseconds
    pub fn clock_centis(&self) -> u64 {
        u64::try_from(self.clock_budget.as_millis() / 10).unwrap_or(u64::MAX)
    }
}

/// Produces a move for a position the book does not cover
///
/// An adapter reports a position it refuses (for instance an illegal move
/// list) by returning a result with `err` set; transport-level failures are
/// returned as `Err`.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn resolve(&self, settings: &EngineSettings) -> DispatchResult<MoveResult>;
}

/// Adapter for deployments with no engine attached
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEngine;

#[async_trait]
impl EngineAdapter for UnavailableEngine {
    async fn resolve(&self, _settings: &EngineSettings) -> DispatchResult<MoveResult> {
        Err(DispatchError::engine("no engine is attached to this worker"))
    }
}
