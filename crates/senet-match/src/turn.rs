//! Turn handoff between the two sessions of a match.
//!
//! Waiting is done on the match's [`TurnPhase`] watch channel with a bounded
//! timeout, so a session never blocks longer than its poll interval and can
//! interleave keepalive handling between waits. Every state change happens
//! under the match lock; the watch channel only announces it.

use std::time::Duration;

use senet_net::ConnectionId;
use senet_rules::{IllegalReason, Side, TurnWords, ValidationPolicy, Verdict, check_win, validate};

use crate::game::{Lifecycle, Match, MatchState, TurnPhase};

/// Result of [`Match::wait_for_turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnWait {
    /// The caller holds the turn.
    MyTurn,
    /// The timeout elapsed first; poll again.
    NotYet,
    /// The match is over.
    MatchEnded {
        /// The side credited with the win.
        winner: Side,
    },
}

/// Result of [`Match::wait_for_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartWait {
    /// An opponent has joined.
    Started,
    /// The timeout elapsed first; poll again.
    NotYet,
    /// The match ended before it started.
    MatchEnded {
        /// The side credited with the win.
        winner: Side,
    },
}

/// Outcome of a submitted end-of-turn board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Applied; the turn passed to the opponent.
    Continue,
    /// Discarded; the turn passed to the opponent anyway.
    Rejected(IllegalReason),
    /// Applied, and it ends the match.
    Won {
        /// The side credited with the win.
        winner: Side,
    },
}

/// Turn operations that were refused. None of them change match state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    /// The match has already been decided.
    #[error("match already ended, {winner} won")]
    MatchEnded {
        /// The recorded winner.
        winner: Side,
    },

    /// The match has no opponent yet, or is free.
    #[error("match is not running")]
    NotRunning,

    /// The caller does not hold the turn.
    #[error("{side} does not hold the turn")]
    NotYourTurn {
        /// The caller.
        side: Side,
    },

    /// The caller's connection no longer serves that side.
    #[error("connection does not own {side}")]
    NotOwner {
        /// The side the caller claimed.
        side: Side,
    },
}

impl Match {
    /// Wait up to `timeout` for `side` to hold the turn.
    pub async fn wait_for_turn(&self, side: Side, timeout: Duration) -> TurnWait {
        let phase = self
            .wait_for_phase(timeout, |phase| {
                matches!(phase, TurnPhase::Ended { .. })
                    || *phase == TurnPhase::WaitSide(side)
            })
            .await;

        match phase {
            Some(TurnPhase::WaitSide(_)) => TurnWait::MyTurn,
            Some(TurnPhase::Ended { winner }) => TurnWait::MatchEnded { winner },
            _ => TurnWait::NotYet,
        }
    }

    /// Wait up to `timeout` for an opponent to join.
    pub async fn wait_for_start(&self, timeout: Duration) -> StartWait {
        let phase = self
            .wait_for_phase(timeout, |phase| *phase != TurnPhase::Pairing)
            .await;

        match phase {
            Some(TurnPhase::WaitSide(_)) => StartWait::Started,
            Some(TurnPhase::Ended { winner }) => StartWait::MatchEnded { winner },
            _ => StartWait::NotYet,
        }
    }

    /// Wait up to `timeout` for the match to end. Returns the winner if it did.
    pub async fn wait_for_end(&self, timeout: Duration) -> Option<Side> {
        let phase = self
            .wait_for_phase(timeout, |phase| matches!(phase, TurnPhase::Ended { .. }))
            .await;

        match phase {
            Some(TurnPhase::Ended { winner }) => Some(winner),
            _ => None,
        }
    }

    async fn wait_for_phase(
        &self,
        timeout: Duration,
        ready: impl FnMut(&TurnPhase) -> bool,
    ) -> Option<TurnPhase> {
        let mut rx = self.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(ready)).await {
            Ok(Ok(phase)) => Some(*phase),
            // The sender lives as long as the match, so only the timeout is expected here.
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Pass the turn from `side` to its opponent. Only the current holder may
    /// do this, and only while the match is in play; anything else is logged
    /// and refused without touching the state.
    pub async fn advance_turn(&self, side: Side) -> Result<Side, TurnError> {
        let mut state = self.lock().await;
        self.check_turn_holder(&state, side)?;
        Ok(self.pass_turn_locked(&mut state))
    }

    /// Validate and apply the board reported by `side` at the end of its turn.
    ///
    /// A legal board replaces the current one and is checked for a win; an
    /// illegal board is discarded. Either way the turn then passes, unless the
    /// move won the match.
    pub async fn submit_turn(
        &self,
        side: Side,
        connection: ConnectionId,
        proposed: TurnWords,
        policy: &ValidationPolicy,
    ) -> Result<TurnOutcome, TurnError> {
        let mut state = self.lock().await;
        if !state.is_owner(side, connection) {
            return Err(TurnError::NotOwner { side });
        }
        self.check_turn_holder(&state, side)?;

        match validate(&state.words, &proposed, side, policy) {
            Verdict::Legal => {
                state.words = proposed;
                let [first, second] = &state.words;
                if let Some(winner) = check_win(first, second).winner() {
                    tracing::info!("{}: {winner} bore off every piece", self.id());
                    self.end_locked(&mut state, winner);
                    return Ok(TurnOutcome::Won { winner });
                }
                self.pass_turn_locked(&mut state);
                Ok(TurnOutcome::Continue)
            }
            Verdict::Illegal(reason) => {
                tracing::debug!("{}: rejected turn from {side}: {reason}", self.id());
                self.pass_turn_locked(&mut state);
                Ok(TurnOutcome::Rejected(reason))
            }
        }
    }

    /// End the match in favour of `winner`, regardless of the board.
    ///
    /// Idempotent: on a match that has already ended this changes nothing and
    /// returns the winner recorded the first time.
    pub async fn force_forfeit(&self, winner: Side) -> Side {
        let mut state = self.lock().await;
        self.forfeit_locked(&mut state, winner)
    }

    /// Forfeit on behalf of the player on `loser`, if `connection` still
    /// serves that side. Returns the recorded winner, or `None` when the
    /// caller has been replaced by a reconnecting peer.
    pub async fn concede(&self, loser: Side, connection: ConnectionId) -> Option<Side> {
        let mut state = self.lock().await;
        if !state.is_owner(loser, connection) {
            return None;
        }
        Some(self.forfeit_locked(&mut state, loser.opponent()))
    }

    pub(crate) fn forfeit_locked(&self, state: &mut MatchState, winner: Side) -> Side {
        match state.lifecycle {
            Lifecycle::Ended { winner: recorded } => recorded,
            Lifecycle::Free => {
                tracing::warn!("{}: forfeit requested on a free match, ignored", self.id());
                winner
            }
            _ => {
                tracing::info!("{}: forfeited to {winner}", self.id());
                self.end_locked(state, winner);
                winner
            }
        }
    }

    fn check_turn_holder(&self, state: &MatchState, side: Side) -> Result<(), TurnError> {
        let refused = match state.lifecycle {
            Lifecycle::Ended { winner } => TurnError::MatchEnded { winner },
            Lifecycle::Free | Lifecycle::AwaitingSecondPlayer => TurnError::NotRunning,
            Lifecycle::Running | Lifecycle::WaitingForReconnect { .. } if state.turn != side => {
                TurnError::NotYourTurn { side }
            }
            Lifecycle::Running | Lifecycle::WaitingForReconnect { .. } => return Ok(()),
        };
        tracing::warn!("{}: turn operation from {side} refused: {refused}", self.id());
        Err(refused)
    }

    /// Whether the match has been decided.
    pub async fn is_ended(&self) -> bool {
        matches!(self.lifecycle().await, Lifecycle::Ended { .. })
    }

    /// The recorded winner, if the match has been decided.
    pub async fn winner(&self) -> Option<Side> {
        match self.lifecycle().await {
            Lifecycle::Ended { winner } => Some(winner),
            _ => None,
        }
    }

    /// The side holding the turn.
    pub async fn turn(&self) -> Side {
        self.lock().await.turn
    }

    /// The current board.
    pub async fn words(&self) -> TurnWords {
        self.lock().await.words
    }
}
