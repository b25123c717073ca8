//! Match engine: the fixed pool of game slots, per-match turn handoff, and
//! the disconnect watchdog that turns silence into a forfeit.
//!
//! Each [`Match`] guards its state with its own mutex, so unrelated matches
//! never contend. The [`Registry`] adds one more lock, held only while a
//! connection is being seated or unseated.

pub mod game;
pub mod registry;
pub mod turn;
pub mod watchdog;

pub use game::{Lifecycle, Match, MatchId, PlayerBinding, TurnPhase};
pub use registry::{BindKind, Binding, MatchSnapshot, Registry, RegistryError};
pub use turn::{StartWait, TurnError, TurnOutcome, TurnWait};
pub use watchdog::Watchdog;
