//! Polyglot opening book lookup
//!
//! Turns a played move list into a book move:
//!
//! 1. [`position`] replays the moves and computes the Polyglot fingerprint
//! 2. [`codec`] streams the book file and collects matching records
//! 3. [`selector`] picks one record in proportion to its weight
//! 4. [`moves`] decodes the packed move into coordinate notation
//!
//! [`book_move`] runs the whole chain; [`all_book_moves`] stops before the
//! selection step and returns every candidate.

pub mod codec;
pub mod error;
pub mod hash;
pub mod moves;
pub mod position;
pub mod selector;

use std::path::Path;

use rand::Rng;

pub use codec::BookRecord;
pub use error::{BookError, BookResult};
pub use hash::{fingerprint, fingerprint_fen, Fingerprint};
pub use position::{encode_moves, EncodedPosition};
pub use selector::WeightedSelector;

/// Candidate move found in a book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMove {
    /// Coordinate notation, e.g. `e2e4`
    pub uci: String,
    pub weight: u16,
    pub learn: u32,
}

/// Every book move for an already encoded position, zero weights included
pub fn all_book_moves(
    encoded: &EncodedPosition,
    book_dir: &Path,
    book: &str,
) -> BookResult<Vec<BookMove>> {
    codec::lookup(book_dir, book, encoded.fingerprint)?
        .iter()
        .map(|record| to_book_move(record, encoded))
        .collect()
}

/// Replay `moves` and pick a weighted book move from `book`
///
/// Fails with [`BookError::NoBookMove`] when the position is not in the
/// book or only has zero-weight entries.
pub fn book_move<S: AsRef<str>, R: Rng>(
    moves: &[S],
    book_dir: &Path,
    book: &str,
    selector: &mut WeightedSelector<R>,
) -> BookResult<BookMove> {
    let encoded = encode_moves(moves)?;
    let records = codec::lookup(book_dir, book, encoded.fingerprint)?;
    let chosen = selector.select(&records)?;

    tracing::debug!(
        book,
        fingerprint = %encoded.fingerprint,
        candidates = records.len(),
        weight = chosen.weight,
        "book hit"
    );

    to_book_move(chosen, &encoded)
}

fn to_book_move(record: &BookRecord, encoded: &EncodedPosition) -> BookResult<BookMove> {
    Ok(BookMove {
        uci: moves::decode_move_in(record.mv, &encoded.position)?,
        weight: record.weight,
        learn: record.learn,
    })
}
