//! Polyglot position fingerprints
//!
//! Book records are keyed by the 64-bit Polyglot Zobrist hash: the XOR of
//! fixed random keys for every piece on its square, the remaining castling
//! rights, the en-passant file and the side to move. The en-passant key is
//! only mixed in when a capture onto that square is actually legal, which is
//! what `EnPassantMode::Legal` selects. shakmaty's `Zobrist64` keys are the
//! Polyglot keys, so the values here match any Polyglot book bit for bit.

use std::fmt;

use shakmaty::fen::Fen;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, EnPassantMode};

use crate::error::{BookError, BookResult};

/// 64-bit Polyglot hash identifying a position in a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Fingerprint(value)
    }
}

/// Fingerprint of a position
pub fn fingerprint(pos: &Chess) -> Fingerprint {
    let hash: Zobrist64 = pos.zobrist_hash(EnPassantMode::Legal);
    Fingerprint(hash.0)
}

/// Parse a FEN and fingerprint the resulting position
pub fn fingerprint_fen(fen: &str) -> BookResult<Fingerprint> {
    let parsed: Fen = fen.trim().parse().map_err(|e| BookError::InvalidFen {
        fen: fen.to_string(),
        reason: format!("{e}"),
    })?;

    let pos: Chess = parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| BookError::InvalidFen {
            fen: fen.to_string(),
            reason: format!("{e}"),
        })?;

    Ok(fingerprint(&pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference keys published with the Polyglot book format description
    const START_KEY: u64 = 0x463b96181691fc9c;

    #[test]
    fn test_start_position_matches_polyglot_reference() {
        let key = fingerprint(&Chess::default());
        assert_eq!(key.as_u64(), START_KEY, "Start position key must match Polyglot");
    }

    #[test]
    fn test_fingerprint_fen_matches_reference_values() {
        let cases = [
            (
                "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
                START_KEY,
            ),
            (
                "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
                0x823c9b50fd114196,
            ),
            (
                "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 2",
                0x0756b94461c50fb0,
            ),
            (
                "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
                0x22a48b5a8e47ff78,
            ),
            (
                "rnbq1bnr/ppp1pkpp/8/3pPp2/8/8/PPPPKPPP/RNBQ1BNR w - - 0 4",
                0x00fdd303c946bdd9,
            ),
        ];

        for (fen, expected) in cases {
            let key = fingerprint_fen(fen).expect("reference FEN should parse");
            assert_eq!(key.as_u64(), expected, "Key mismatch for {fen}");
        }
    }

    #[test]
    fn test_fingerprint_fen_rejects_garbage() {
        let err = fingerprint_fen("not a fen").unwrap_err();
        assert!(matches!(err, BookError::InvalidFen { .. }));
    }

    #[test]
    fn test_display_is_zero_padded_hex() {
        assert_eq!(Fingerprint(0xab).to_string(), "00000000000000ab");
    }
}
