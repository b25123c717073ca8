//! Senet board rules: turn words, move legality, and the win condition.
//!
//! Everything in this crate is pure and synchronous. The match engine calls
//! into it while holding a match lock, so nothing here may block or allocate
//! beyond small fixed-size values.

pub mod turn_word;
pub mod validator;

pub use turn_word::{PIECES_PER_PLAYER, Side, TERMINAL_SQUARE, TurnWord, TurnWords};
pub use validator::{IllegalReason, ValidationPolicy, Verdict, WinCheck, check_win, validate};
