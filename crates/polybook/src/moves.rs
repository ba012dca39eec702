//! Packed book move decoding
//!
//! ```text
//! bits  0-2   destination file
//! bits  3-5   destination rank
//! bits  6-8   origin file
//! bits  9-11  origin rank
//! bits 12-14  promotion (0 none, 1 knight, 2 bishop, 3 rook, 4 queen)
//! ```
//!
//! Polyglot writes castling as the king capturing its own rook (`e1h1`).
//! Those four patterns are rewritten to the king's two-square move.

use std::fmt;

use shakmaty::{Chess, File, Position, Rank, Role, Square};

use crate::error::{BookError, BookResult};

/// Decoded book move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

const CASTLING: [(Square, Square, Square); 4] = [
    (Square::E1, Square::H1, Square::G1),
    (Square::E1, Square::A1, Square::C1),
    (Square::E8, Square::H8, Square::G8),
    (Square::E8, Square::A8, Square::C8),
];

impl PackedMove {
    /// Split a packed code into squares and promotion piece
    pub fn unpack(code: u16) -> BookResult<PackedMove> {
        let to = square(code & 0x3f);
        let from = square((code >> 6) & 0x3f);

        let promotion = match (code >> 12) & 0x7 {
            0 => None,
            1 => Some(Role::Knight),
            2 => Some(Role::Bishop),
            3 => Some(Role::Rook),
            4 => Some(Role::Queen),
            _ => return Err(BookError::Decode { code }),
        };

        if from == to {
            return Err(BookError::Decode { code });
        }

        Ok(PackedMove {
            from,
            to,
            promotion,
        })
    }

    /// Rewrite king-takes-rook castling to the two-square king move
    pub fn normalize_castling(self) -> PackedMove {
        if self.promotion.is_some() {
            return self;
        }
        CASTLING
            .iter()
            .find(|(king, rook, _)| *king == self.from && *rook == self.to)
            .map(|&(_, _, dest)| PackedMove { to: dest, ..self })
            .unwrap_or(self)
    }

    /// Like `normalize_castling`, but only when a king stands on the origin
    pub fn normalize_castling_in(self, pos: &Chess) -> PackedMove {
        if pos.board().role_at(self.from) == Some(Role::King) {
            self.normalize_castling()
        } else {
            self
        }
    }
}

impl fmt::Display for PackedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(role) = self.promotion {
            write!(f, "{}", role.char())?;
        }
        Ok(())
    }
}

fn square(bits: u16) -> Square {
    let file = File::new(u32::from(bits & 0x7));
    let rank = Rank::new(u32::from((bits >> 3) & 0x7));
    Square::from_coords(file, rank)
}

/// Coordinate string for a packed code, castling normalised by pattern
pub fn decode_move(code: u16) -> BookResult<String> {
    Ok(PackedMove::unpack(code)?.normalize_castling().to_string())
}

/// Coordinate string for a packed code, castling normalised only for kings in `pos`
pub fn decode_move_in(code: u16, pos: &Chess) -> BookResult<String> {
    Ok(PackedMove::unpack(code)?.normalize_castling_in(pos).to_string())
}
