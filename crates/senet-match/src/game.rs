//! A single match slot and its lock-protected state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use senet_net::{ConnectionId, Nickname};
use senet_rules::{Side, TurnWord, TurnWords};
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::watchdog::Watchdog;

// ---------------------------------------------------------------------------
// Identifiers and plain data
// ---------------------------------------------------------------------------

/// Index of a match within the registry's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchId(pub usize);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "match#{}", self.0)
    }
}

/// Where a match is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No players; available for a new match.
    Free,
    /// Side 0 is seated and waiting for an opponent.
    AwaitingSecondPlayer,
    /// Both sides seated, turns in progress.
    Running,
    /// Both sides seated, but `side` has gone silent and its watchdog is armed.
    WaitingForReconnect {
        /// The side being waited on.
        side: Side,
    },
    /// Decided. Becomes `Free` once both players have left.
    Ended {
        /// The side credited with the win.
        winner: Side,
    },
}

impl Lifecycle {
    /// Whether turns are being played (`Running` or `WaitingForReconnect`).
    pub fn is_in_play(&self) -> bool {
        matches!(self, Self::Running | Self::WaitingForReconnect { .. })
    }
}

/// A seated player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerBinding {
    /// Validated nickname.
    pub nickname: Nickname,
    /// Remote address of the connection that claimed the seat. A returning
    /// peer is recognised by nickname and IP; the port will differ.
    pub peer: SocketAddr,
    /// Connection currently serving this seat.
    pub connection: ConnectionId,
}

/// Turn-granularity view of a match, published on a watch channel so that
/// waiting sessions wake up the moment it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// The match is not running yet (free or half-filled).
    Pairing,
    /// `Side` holds the turn.
    WaitSide(Side),
    /// The match is over.
    Ended {
        /// The side credited with the win.
        winner: Side,
    },
}

// ---------------------------------------------------------------------------
// MatchState
// ---------------------------------------------------------------------------

/// Mutable match data, only reachable through [`Match::lock`].
pub struct MatchState {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) players: [Option<PlayerBinding>; 2],
    /// Nicknames of the players who started the match. Kept after a player
    /// leaves so the other side can still be told who won.
    pub(crate) roster: [Option<Nickname>; 2],
    pub(crate) words: TurnWords,
    pub(crate) turn: Side,
    pub(crate) watchdog: Watchdog,
}

impl MatchState {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Free,
            players: [None, None],
            roster: [None, None],
            words: TurnWord::initial_pair(),
            turn: Side::First,
            watchdog: Watchdog::new(),
        }
    }

    /// Current lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Binding for `side`, if seated.
    pub fn player(&self, side: Side) -> Option<&PlayerBinding> {
        self.players[side.index()].as_ref()
    }

    /// Number of seated sides.
    pub fn bound_count(&self) -> usize {
        self.players.iter().flatten().count()
    }

    /// Whether `connection` currently serves `side`.
    pub fn is_owner(&self, side: Side, connection: ConnectionId) -> bool {
        self.player(side)
            .is_some_and(|binding| binding.connection == connection)
    }

    /// Whether `nickname` holds either seat.
    pub fn has_nickname(&self, nickname: &Nickname) -> bool {
        self.players
            .iter()
            .flatten()
            .any(|binding| &binding.nickname == nickname)
    }
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

/// One slot of the match pool.
///
/// All state lives behind a single async mutex. The [`TurnPhase`] watch
/// channel mirrors the turn-relevant part of that state and is only written
/// while the mutex is held, so a waiter that sees a phase change can rely on
/// the state having already moved.
pub struct Match {
    id: MatchId,
    state: Mutex<MatchState>,
    phase: watch::Sender<TurnPhase>,
}

impl Match {
    /// A free match slot.
    pub fn new(id: MatchId) -> Self {
        let (phase, _) = watch::channel(TurnPhase::Pairing);
        Self {
            id,
            state: Mutex::new(MatchState::new()),
            phase,
        }
    }

    /// Slot index.
    pub fn id(&self) -> MatchId {
        self.id
    }

    /// Acquire the match lock.
    pub async fn lock(&self) -> MutexGuard<'_, MatchState> {
        self.state.lock().await
    }

    /// Subscribe to turn-phase changes.
    pub fn subscribe(&self) -> watch::Receiver<TurnPhase> {
        self.phase.subscribe()
    }

    /// Last published turn phase.
    pub fn phase(&self) -> TurnPhase {
        *self.phase.borrow()
    }

    /// Current lifecycle.
    pub async fn lifecycle(&self) -> Lifecycle {
        self.lock().await.lifecycle
    }

    /// Whether `connection` currently serves `side`.
    pub async fn owns(&self, side: Side, connection: ConnectionId) -> bool {
        self.lock().await.is_owner(side, connection)
    }

    /// Nicknames of both players, once the match has been paired.
    pub async fn roster(&self) -> Option<[Nickname; 2]> {
        let state = self.lock().await;
        match &state.roster {
            [Some(first), Some(second)] => Some([first.clone(), second.clone()]),
            _ => None,
        }
    }

    // -- Seating (driven by the registry) ----------------------------------

    /// Seat side 0 on a free match.
    pub(crate) fn open_locked(&self, state: &mut MatchState, binding: PlayerBinding) {
        state.roster = [Some(binding.nickname.clone()), None];
        state.players = [Some(binding), None];
        state.lifecycle = Lifecycle::AwaitingSecondPlayer;
        state.words = TurnWord::initial_pair();
        state.turn = Side::First;
        self.phase.send_replace(TurnPhase::Pairing);
    }

    /// Seat side 1 on a half-filled match and start play. Side 0's waiting
    /// session is released by the phase change.
    pub(crate) fn join_locked(&self, state: &mut MatchState, binding: PlayerBinding) {
        state.roster[Side::Second.index()] = Some(binding.nickname.clone());
        state.players[Side::Second.index()] = Some(binding);
        state.lifecycle = Lifecycle::Running;
        state.words = TurnWord::initial_pair();
        state.turn = Side::First;
        self.phase.send_replace(TurnPhase::WaitSide(Side::First));
    }

    /// Hand `side` to a new connection after a reconnect.
    pub(crate) fn resume_locked(&self, state: &mut MatchState, side: Side, binding: PlayerBinding) {
        state.players[side.index()] = Some(binding);
        self.cancel_watchdog_locked(state, side);
    }

    /// Return the slot to `Free`, aborting any armed timers.
    pub(crate) fn reset_locked(&self, state: &mut MatchState) {
        state.watchdog.cancel_all();
        state.lifecycle = Lifecycle::Free;
        state.players = [None, None];
        state.roster = [None, None];
        state.words = TurnWord::initial_pair();
        state.turn = Side::First;
        self.phase.send_replace(TurnPhase::Pairing);
    }

    /// Mark the match as decided in favour of `winner`.
    pub(crate) fn end_locked(&self, state: &mut MatchState, winner: Side) {
        state.watchdog.cancel_all();
        state.lifecycle = Lifecycle::Ended { winner };
        self.phase.send_replace(TurnPhase::Ended { winner });
    }

    /// Flip the turn to the other side and publish it.
    pub(crate) fn pass_turn_locked(&self, state: &mut MatchState) -> Side {
        state.turn = state.turn.opponent();
        self.phase.send_replace(TurnPhase::WaitSide(state.turn));
        state.turn
    }

    // -- Watchdog ------------------------------------------------------------

    /// Arm the reconnect watchdog for `side` on behalf of `connection`.
    ///
    /// Does nothing and returns `false` unless `connection` still serves
    /// `side` and the match is in play. While armed, the lifecycle reports
    /// `WaitingForReconnect`; if nobody cancels it within `grace`, the match
    /// is forfeited to the other side.
    pub async fn arm_watchdog(
        self: &Arc<Self>,
        side: Side,
        connection: ConnectionId,
        grace: Duration,
    ) -> bool {
        let mut state = self.lock().await;
        if !state.is_owner(side, connection) || !state.lifecycle.is_in_play() {
            return false;
        }

        let weak = Arc::downgrade(self);
        let generation = state.watchdog.arm(side, grace, move |generation| async move {
            if let Some(game) = weak.upgrade() {
                game.expire_watchdog(side, generation).await;
            }
        });
        state.lifecycle = Lifecycle::WaitingForReconnect { side };
        tracing::info!(
            "{}: waiting up to {grace:?} for {side} (watchdog generation {generation})",
            self.id
        );
        true
    }

    /// Cancel the watchdog for `side` if `connection` still serves it.
    /// Returns whether a timer was actually cancelled.
    pub async fn cancel_watchdog(&self, side: Side, connection: ConnectionId) -> bool {
        let mut state = self.lock().await;
        if !state.is_owner(side, connection) {
            return false;
        }
        self.cancel_watchdog_locked(&mut state, side)
    }

    pub(crate) fn cancel_watchdog_locked(&self, state: &mut MatchState, side: Side) -> bool {
        let cancelled = state.watchdog.cancel(side);
        if cancelled {
            tracing::debug!("{}: watchdog for {side} cancelled", self.id);
        }
        self.settle_lifecycle_locked(state);
        cancelled
    }

    /// Recompute `Running`/`WaitingForReconnect` from the armed timers.
    fn settle_lifecycle_locked(&self, state: &mut MatchState) {
        if !state.lifecycle.is_in_play() {
            return;
        }
        let awaited = Side::BOTH
            .into_iter()
            .find(|&side| state.watchdog.is_armed(side));
        state.lifecycle = match awaited {
            Some(side) => Lifecycle::WaitingForReconnect { side },
            None => Lifecycle::Running,
        };
    }

    async fn expire_watchdog(&self, side: Side, generation: u64) {
        let mut state = self.lock().await;
        if !state.watchdog.take_if_current(side, generation) {
            tracing::debug!("{}: stale watchdog generation {generation} for {side} ignored", self.id);
            return;
        }
        if !state.lifecycle.is_in_play() {
            return;
        }

        let winner = side.opponent();
        tracing::warn!("{}: {side} did not respond in time, forfeiting to {winner}", self.id);
        self.end_locked(&mut state, winner);
    }
}

impl fmt::Debug for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Match")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
