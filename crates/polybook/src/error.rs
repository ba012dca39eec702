//! Error types for opening book lookups
//!
//! Covers move-list replay, book file decoding and candidate selection.
//! `NoBookMove` is an expected outcome rather than a failure: callers fall
//! back to the engine when they see it.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving a book move
#[derive(Error, Debug)]
pub enum BookError {
    /// A played move matched no notation or was illegal in its position
    #[error("Invalid move {notation:?} at index {index}")]
    InvalidMove { index: usize, notation: String },

    /// A FEN string could not be parsed or describes an impossible position
    #[error("Invalid FEN {fen:?}: {reason}")]
    InvalidFen { fen: String, reason: String },

    /// Book file length is not a whole number of records
    #[error("Corrupt book {path}: {len} bytes is not a multiple of 16")]
    Format { path: PathBuf, len: u64 },

    /// Book file could not be opened or read
    #[error("Failed to read book {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Book name would resolve outside the book directory
    #[error("Invalid book name {name:?}")]
    InvalidBookName { name: String },

    /// Packed move code does not describe a move between two squares
    #[error("Cannot decode packed move {code:#06x}")]
    Decode { code: u16 },

    /// No record with a positive weight exists for the position
    #[error("No book move")]
    NoBookMove,
}

impl BookError {
    /// True for the expected "position is out of book" outcome
    pub fn is_no_book_move(&self) -> bool {
        matches!(self, BookError::NoBookMove)
    }
}

/// Result type alias for book operations
pub type BookResult<T> = Result<T, BookError>;
