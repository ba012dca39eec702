//! Move-list replay and position encoding
//!
//! Games arrive as a flat list of move strings from the initial position, and
//! the producers of those lists are not consistent about notation: the web
//! client sends coordinate moves, imported games carry SAN, and the legacy
//! engine emits long algebraic with its own castling spelling. Each move is
//! therefore tried against a ladder of notations, in order:
//!
//! 1. **SAN** (`e4`, `Nf3`, `O-O`, `exd8=Q+`)
//! 2. **Coordinate / UCI** (`e2e4`, `e7e8q`)
//! 3. **Long algebraic** (`Ng1-f3`, `e7xd8=Q`)
//! 4. **Lenient algebraic** (SAN after stripping `!`/`?` glyphs and turning
//!    `0-0` into `O-O`)
//!
//! The first rung that yields a legal move in the current position wins.

use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{Chess, EnPassantMode, Move, Position};

use crate::error::{BookError, BookResult};
use crate::hash::{fingerprint, Fingerprint};

/// Notation a move string was recognised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notation {
    San,
    Uci,
    LongAlgebraic,
    Lenient,
}

/// Position reached after replaying a move list
#[derive(Debug, Clone)]
pub struct EncodedPosition {
    /// FEN of the final position
    pub fen: String,
    /// Polyglot key of the final position
    pub fingerprint: Fingerprint,
    /// Number of plies applied
    pub plies: usize,
    pub position: Chess,
}

/// Replay `moves` from the initial position and encode the result
pub fn encode_moves<S: AsRef<str>>(moves: &[S]) -> BookResult<EncodedPosition> {
    let position = replay(moves)?;

    Ok(EncodedPosition {
        fen: Fen::from_position(position.clone(), EnPassantMode::Legal).to_string(),
        fingerprint: fingerprint(&position),
        plies: moves.len(),
        position,
    })
}

/// Replay `moves` from the initial position
pub fn replay<S: AsRef<str>>(moves: &[S]) -> BookResult<Chess> {
    let mut pos = Chess::default();

    for (index, text) in moves.iter().enumerate() {
        let text = text.as_ref();
        let invalid = || BookError::InvalidMove {
            index,
            notation: text.to_string(),
        };

        let (mv, notation) = parse_move(&pos, text).ok_or_else(invalid)?;
        tracing::trace!(index, text, ?notation, "applied move");

        pos = pos.play(&mv).map_err(|_| invalid())?;
    }

    Ok(pos)
}

/// Interpret `text` as a legal move in `pos`, trying each notation in turn
pub fn parse_move(pos: &Chess, text: &str) -> Option<(Move, Notation)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(mv) = from_san(pos, text) {
        return Some((mv, Notation::San));
    }
    if let Some(mv) = from_uci(pos, text) {
        return Some((mv, Notation::Uci));
    }
    if let Some(mv) = long_algebraic_to_uci(text).and_then(|uci| from_uci(pos, &uci)) {
        return Some((mv, Notation::LongAlgebraic));
    }
    if let Some(mv) = from_san(pos, &lenient_algebraic(text)) {
        return Some((mv, Notation::Lenient));
    }

    None
}

fn from_san(pos: &Chess, text: &str) -> Option<Move> {
    let san: SanPlus = text.parse().ok()?;
    san.san.to_move(pos).ok()
}

fn from_uci(pos: &Chess, text: &str) -> Option<Move> {
    let uci: UciMove = text.parse().ok()?;
    uci.to_move(pos).ok()
}

/// `Ng1-f3` -> `g1f3`, `e7xd8=Q+` -> `e7d8q`
fn long_algebraic_to_uci(text: &str) -> Option<String> {
    let body = text.trim_end_matches(['+', '#']);
    let body = body
        .strip_prefix(|c: char| matches!(c, 'K' | 'Q' | 'R' | 'B' | 'N' | 'P'))
        .unwrap_or(body);

    let squares: String = body
        .chars()
        .filter(|c| !matches!(c, '-' | 'x' | ':' | '='))
        .collect();

    match squares.len() {
        4 | 5 => Some(squares.to_ascii_lowercase()),
        _ => None,
    }
}

fn lenient_algebraic(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !matches!(c, '!' | '?')).collect();
    let stripped = stripped.trim_end_matches("e.p.").trim();

    match stripped {
        "0-0-0" | "0-0-0+" => "O-O-O".to_string(),
        "0-0" | "0-0+" => "O-O".to_string(),
        other => other.to_string(),
    }
}
