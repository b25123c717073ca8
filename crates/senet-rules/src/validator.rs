//! Move legality and the win condition.
//!
//! The server does not simulate throws of the casting sticks; clients move
//! their own pieces and report the resulting board. [`validate`] checks that
//! the reported board is a position Senet can actually reach, and
//! [`check_win`] decides whether it ends the match.

use crate::turn_word::{FIRST_SQUARE, Side, TERMINAL_SQUARE, TurnWord, TurnWords};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Optional rule checks applied on top of the range check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Reject two pieces of the same player on one non-terminal square.
    pub forbid_stacking: bool,
    /// Reject a non-terminal square held by both players.
    pub forbid_overlap: bool,
    /// Reject a moving piece that returns to the board after being borne off.
    pub forbid_reentry: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            forbid_stacking: true,
            forbid_overlap: true,
            forbid_reentry: true,
        }
    }
}

impl ValidationPolicy {
    /// Only the range check and the double bear-off check.
    pub fn permissive() -> Self {
        Self {
            forbid_stacking: false,
            forbid_overlap: false,
            forbid_reentry: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Why a proposed board was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IllegalReason {
    /// A piece sits outside `1..=31`.
    #[error("piece {piece} of {side} is on square {square}, outside 1..=31")]
    OutOfRange {
        /// Owner of the piece.
        side: Side,
        /// Index of the piece within its word.
        piece: usize,
        /// Reported square.
        square: u8,
    },

    /// Two pieces of one player share a square.
    #[error("{side} has two pieces on square {square}")]
    Stacked {
        /// Owner of the pieces.
        side: Side,
        /// Shared square.
        square: u8,
    },

    /// Both players claim the same square.
    #[error("square {square} is held by both players")]
    Overlap {
        /// Contested square.
        square: u8,
    },

    /// A piece that had left the board is back on it.
    #[error("piece {piece} of {side} re-entered the board on square {square}")]
    Reentered {
        /// Owner of the piece.
        side: Side,
        /// Index of the piece within its word.
        piece: usize,
        /// Square it re-entered on.
        square: u8,
    },

    /// Every piece of both players is off the board.
    #[error("both players have borne off every piece")]
    BothBorneOff,
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The board may be applied.
    Legal,
    /// The board must be discarded.
    Illegal(IllegalReason),
}

impl Verdict {
    /// Whether the verdict is [`Verdict::Legal`].
    pub fn is_legal(&self) -> bool {
        matches!(self, Self::Legal)
    }
}

/// Check a proposed board reported by `moving_side` against the current one.
///
/// Only the mover's pieces are checked for re-entry; the opponent's pieces may
/// legitimately move backwards when the mover swaps places with them.
pub fn validate(
    current: &TurnWords,
    proposed: &TurnWords,
    moving_side: Side,
    policy: &ValidationPolicy,
) -> Verdict {
    match check(current, proposed, moving_side, policy) {
        Ok(()) => Verdict::Legal,
        Err(reason) => Verdict::Illegal(reason),
    }
}

fn check(
    current: &TurnWords,
    proposed: &TurnWords,
    moving_side: Side,
    policy: &ValidationPolicy,
) -> Result<(), IllegalReason> {
    for side in Side::BOTH {
        check_range(side, &proposed[side.index()])?;
    }

    if proposed.iter().all(TurnWord::is_borne_off) {
        return Err(IllegalReason::BothBorneOff);
    }

    if policy.forbid_stacking {
        for side in Side::BOTH {
            check_stacking(side, &proposed[side.index()])?;
        }
    }

    if policy.forbid_overlap {
        let [first, second] = proposed;
        if let Some(&square) = first
            .pieces()
            .iter()
            .find(|&&square| square != TERMINAL_SQUARE && second.occupies(square))
        {
            return Err(IllegalReason::Overlap { square });
        }
    }

    if policy.forbid_reentry {
        let before = current[moving_side.index()].pieces();
        let after = proposed[moving_side.index()].pieces();
        for (piece, (&was, &now)) in before.iter().zip(after).enumerate() {
            if was == TERMINAL_SQUARE && now != TERMINAL_SQUARE {
                return Err(IllegalReason::Reentered {
                    side: moving_side,
                    piece,
                    square: now,
                });
            }
        }
    }

    Ok(())
}

fn check_range(side: Side, word: &TurnWord) -> Result<(), IllegalReason> {
    match word
        .pieces()
        .iter()
        .enumerate()
        .find(|(_, square)| !(FIRST_SQUARE..=TERMINAL_SQUARE).contains(*square))
    {
        Some((piece, &square)) => Err(IllegalReason::OutOfRange {
            side,
            piece,
            square,
        }),
        None => Ok(()),
    }
}

fn check_stacking(side: Side, word: &TurnWord) -> Result<(), IllegalReason> {
    let pieces = word.pieces();
    for (i, &square) in pieces.iter().enumerate() {
        if square != TERMINAL_SQUARE && pieces[i + 1..].contains(&square) {
            return Err(IllegalReason::Stacked { side, square });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Win condition
// ---------------------------------------------------------------------------

/// Outcome of [`check_win`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinCheck {
    /// The match goes on.
    NoWinner,
    /// Side 0 has borne off every piece.
    SideAWins,
    /// Side 1 has borne off every piece.
    SideBWins,
}

impl WinCheck {
    /// The winning side, if any.
    pub fn winner(self) -> Option<Side> {
        match self {
            Self::NoWinner => None,
            Self::SideAWins => Some(Side::First),
            Self::SideBWins => Some(Side::Second),
        }
    }
}

/// A side wins once all of its pieces sit on the terminal square while the
/// opponent still has a piece on the board.
pub fn check_win(a: &TurnWord, b: &TurnWord) -> WinCheck {
    match (a.is_borne_off(), b.is_borne_off()) {
        (true, false) => WinCheck::SideAWins,
        (false, true) => WinCheck::SideBWins,
        _ => WinCheck::NoWinner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(first: [u8; 5], second: [u8; 5]) -> TurnWords {
        [TurnWord::new(first), TurnWord::new(second)]
    }

    #[test]
    fn test_initial_board_is_legal() {
        let initial = TurnWord::initial_pair();
        let verdict = validate(&initial, &initial, Side::First, &ValidationPolicy::default());
        assert_eq!(verdict, Verdict::Legal);
    }

    #[test]
    fn test_simple_advance_is_legal() {
        let current = TurnWord::initial_pair();
        let proposed = words([2, 4, 6, 8, 13], [1, 3, 5, 7, 9]);
        assert!(validate(&current, &proposed, Side::First, &ValidationPolicy::default()).is_legal());
    }

    #[test]
    fn test_square_zero_rejected() {
        let current = TurnWord::initial_pair();
        let proposed = words([0, 4, 6, 8, 10], [1, 3, 5, 7, 9]);
        assert_eq!(
            validate(&current, &proposed, Side::First, &ValidationPolicy::permissive()),
            Verdict::Illegal(IllegalReason::OutOfRange {
                side: Side::First,
                piece: 0,
                square: 0,
            })
        );
    }

    #[test]
    fn test_square_past_terminal_rejected_for_either_side() {
        let current = TurnWord::initial_pair();
        let proposed = words([2, 4, 6, 8, 10], [1, 3, 5, 7, 32]);
        assert!(matches!(
            validate(&current, &proposed, Side::First, &ValidationPolicy::permissive()),
            Verdict::Illegal(IllegalReason::OutOfRange {
                side: Side::Second,
                piece: 4,
                square: 32,
            })
        ));
    }

    #[test]
    fn test_stacking_rejected_only_when_enabled() {
        let current = TurnWord::initial_pair();
        let proposed = words([2, 4, 6, 10, 10], [1, 3, 5, 7, 9]);
        assert_eq!(
            validate(&current, &proposed, Side::First, &ValidationPolicy::default()),
            Verdict::Illegal(IllegalReason::Stacked {
                side: Side::First,
                square: 10,
            })
        );
        assert!(
            validate(&current, &proposed, Side::First, &ValidationPolicy::permissive()).is_legal()
        );
    }

    #[test]
    fn test_terminal_square_may_hold_many_pieces() {
        let current = words([2, 4, 31, 31, 30], [1, 3, 5, 7, 9]);
        let proposed = words([2, 4, 31, 31, 31], [1, 3, 5, 7, 9]);
        assert!(validate(&current, &proposed, Side::First, &ValidationPolicy::default()).is_legal());
    }

    #[test]
    fn test_overlap_rejected() {
        let current = TurnWord::initial_pair();
        let proposed = words([2, 4, 6, 8, 9], [1, 3, 5, 7, 9]);
        assert_eq!(
            validate(&current, &proposed, Side::First, &ValidationPolicy::default()),
            Verdict::Illegal(IllegalReason::Overlap { square: 9 })
        );
    }

    #[test]
    fn test_swap_with_opponent_is_legal() {
        // Side 0 lands on 9 and side 1's piece is sent back to 10.
        let current = TurnWord::initial_pair();
        let proposed = words([2, 4, 6, 8, 9], [1, 3, 5, 7, 10]);
        assert!(validate(&current, &proposed, Side::First, &ValidationPolicy::default()).is_legal());
    }

    #[test]
    fn test_reentry_of_moving_side_rejected() {
        let current = words([31, 4, 6, 8, 10], [1, 3, 5, 7, 9]);
        let proposed = words([20, 4, 6, 8, 10], [1, 3, 5, 7, 9]);
        assert_eq!(
            validate(&current, &proposed, Side::First, &ValidationPolicy::default()),
            Verdict::Illegal(IllegalReason::Reentered {
                side: Side::First,
                piece: 0,
                square: 20,
            })
        );
        // The same board reported by the other side is not a re-entry of its pieces.
        assert!(
            validate(&current, &proposed, Side::Second, &ValidationPolicy::default()).is_legal()
        );
    }

    #[test]
    fn test_both_borne_off_rejected() {
        let current = words([31, 31, 31, 31, 30], [31, 31, 31, 31, 29]);
        let proposed = words([31; 5], [31; 5]);
        assert_eq!(
            validate(&current, &proposed, Side::First, &ValidationPolicy::permissive()),
            Verdict::Illegal(IllegalReason::BothBorneOff)
        );
    }

    #[test]
    fn test_check_win() {
        let off = TurnWord::new([31; 5]);
        let on = TurnWord::new([31, 31, 31, 31, 30]);
        assert_eq!(check_win(&off, &on), WinCheck::SideAWins);
        assert_eq!(check_win(&on, &off), WinCheck::SideBWins);
        assert_eq!(check_win(&on, &on), WinCheck::NoWinner);
        assert_eq!(check_win(&off, &off), WinCheck::NoWinner);
        assert_eq!(WinCheck::SideBWins.winner(), Some(Side::Second));
        assert_eq!(WinCheck::NoWinner.winner(), None);
    }

    #[test]
    fn test_reason_messages_are_descriptive() {
        let reason = IllegalReason::OutOfRange {
            side: Side::Second,
            piece: 2,
            square: 40,
        };
        assert_eq!(
            reason.to_string(),
            "piece 2 of side 1 is on square 40, outside 1..=31"
        );
    }
}
