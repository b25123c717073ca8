//! Turn words: the five piece positions one player holds on the track.

use std::fmt;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of pieces each player owns.
pub const PIECES_PER_PLAYER: usize = 5;

/// Square value of a piece that has been borne off the board.
pub const TERMINAL_SQUARE: u8 = 31;

/// Lowest square a piece can occupy.
pub const FIRST_SQUARE: u8 = 1;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// One of the two seats in a match. `First` always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Side 0: the player who opened the match.
    First,
    /// Side 1: the player who joined the match.
    Second,
}

impl Side {
    /// Both sides in seat order.
    pub const BOTH: [Side; 2] = [Side::First, Side::Second];

    /// Seat index (0 or 1), used to address per-side arrays.
    pub const fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    /// The other seat.
    pub const fn opponent(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }

    /// Inverse of [`Side::index`]. Returns `None` for anything but 0 or 1.
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::First),
            1 => Some(Self::Second),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "side {}", self.index())
    }
}

// ---------------------------------------------------------------------------
// TurnWord
// ---------------------------------------------------------------------------

/// The positions of one player's pieces, in the player's own piece order.
///
/// Values are not range-checked on construction: a word decoded off the wire
/// may hold anything two decimal digits can express, and it is the
/// validator's job to reject out-of-range squares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnWord([u8; PIECES_PER_PLAYER]);

/// Both players' words, indexed by [`Side::index`].
pub type TurnWords = [TurnWord; 2];

impl TurnWord {
    /// Wraps raw piece positions.
    pub const fn new(pieces: [u8; PIECES_PER_PLAYER]) -> Self {
        Self(pieces)
    }

    /// Starting position for `side`. The two sides interleave on the first
    /// ten squares, side 1 on the odd squares and side 0 on the even ones.
    pub const fn initial(side: Side) -> Self {
        match side {
            Side::First => Self([2, 4, 6, 8, 10]),
            Side::Second => Self([1, 3, 5, 7, 9]),
        }
    }

    /// Starting words for a fresh match.
    pub const fn initial_pair() -> TurnWords {
        [Self::initial(Side::First), Self::initial(Side::Second)]
    }

    /// Piece positions.
    pub const fn pieces(&self) -> &[u8; PIECES_PER_PLAYER] {
        &self.0
    }

    /// Whether every piece has been borne off.
    pub fn is_borne_off(&self) -> bool {
        self.0.iter().all(|&square| square == TERMINAL_SQUARE)
    }

    /// Whether `square` is occupied by one of these pieces.
    pub fn occupies(&self, square: u8) -> bool {
        self.0.contains(&square)
    }
}

impl fmt::Display for TurnWord {
    /// Two decimal digits per piece, the same form used on the wire.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for square in self.0 {
            write!(f, "{square:02}")?;
        }
        Ok(())
    }
}
