//! Wire models for move requests and results
//!
//! Both types travel as JSON over the broker and are forwarded verbatim by
//! the HTTP layer, so field names follow the JSON contract rather than Rust
//! naming. Legacy producers still send `cmpName` and `shouldSkipBook`; those
//! are accepted as aliases on input.

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Longest game id or personality name accepted; both end up as subject tokens
pub const MAX_ID_LEN: usize = 15;

/// Longest single move string accepted (`Nb8xc6+!` fits)
pub const MAX_MOVE_LEN: usize = 8;

/// Request for the next move of an automated personality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Moves played so far, from the initial position
    pub moves: Vec<String>,
    #[serde(alias = "cmpName")]
    pub personality: String,
    pub game_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<i64>,
    /// Engine clock override in centiseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_time: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub random_is_off: bool,
    #[serde(default, alias = "shouldSkipBook", skip_serializing_if = "is_false")]
    pub skip_book: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl MoveRequest {
    pub fn new(
        game_id: impl Into<String>,
        personality: impl Into<String>,
        moves: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        MoveRequest {
            moves: moves.into_iter().map(Into::into).collect(),
            personality: personality.into(),
            game_id: game_id.into(),
            stop_id: None,
            clock_time: None,
            random_is_off: false,
            skip_book: false,
        }
    }

    pub fn skipping_book(mut self) -> Self {
        self.skip_book = true;
        self
    }

    pub fn with_clock_time(mut self, centiseconds: u64) -> Self {
        self.clock_time = Some(centiseconds);
        self
    }

    /// Check identifiers and moves before the request is published
    pub fn validate(&self) -> DispatchResult<()> {
        check_token("gameId", &self.game_id)?;
        check_token("personality", &self.personality)?;

        for (index, mv) in self.moves.iter().enumerate() {
            if mv.is_empty() || mv.len() > MAX_MOVE_LEN || !mv.is_ascii() {
                return Err(DispatchError::InvalidRequest {
                    reason: format!("move {index} ({mv:?}) is not a move string"),
                });
            }
        }

        Ok(())
    }
}

fn check_token(field: &str, value: &str) -> DispatchResult<()> {
    let ok = !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric());

    if ok {
        Ok(())
    } else {
        Err(DispatchError::InvalidRequest {
            reason: format!("{field} must be 1-{MAX_ID_LEN} ASCII letters or digits, got {value:?}"),
        })
    }
}

/// Stage that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Book,
    #[default]
    Engine,
}

/// Resolved move, or the reason there is none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub search_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algebra_move: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate_move: Option<String>,
    #[serde(default)]
    pub will_accept_draw: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

impl MoveResult {
    /// Book move in coordinate notation
    pub fn book(coordinate_move: impl Into<String>, game_id: impl Into<String>) -> Self {
        MoveResult {
            coordinate_move: Some(coordinate_move.into()),
            kind: ResultKind::Book,
            game_id: Some(game_id.into()),
            ..MoveResult::default()
        }
    }

    /// Error result; carries no move
    pub fn failure(kind: ResultKind, game_id: Option<String>, err: impl Into<String>) -> Self {
        MoveResult {
            err: Some(err.into()),
            kind,
            game_id,
            ..MoveResult::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none() && (self.algebra_move.is_some() || self.coordinate_move.is_some())
    }

    /// The move as the producer reported it, algebraic preferred
    pub fn move_text(&self) -> Option<&str> {
        self.algebra_move
            .as_deref()
            .or(self.coordinate_move.as_deref())
    }
}
