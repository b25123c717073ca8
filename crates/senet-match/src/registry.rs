//! The fixed pool of match slots and atomic seat assignment.

use std::net::SocketAddr;
use std::sync::Arc;

use senet_net::{ConnectionId, Nickname};
use senet_rules::Side;
use tokio::sync::Mutex;

use crate::game::{Lifecycle, Match, MatchId, PlayerBinding};

/// How a connection came to hold its seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    /// Opened a free match on side 0; must wait for an opponent.
    Created,
    /// Joined a waiting match on side 1; play starts immediately.
    Joined,
    /// Took back a seat whose previous connection went silent.
    Resumed,
}

/// A successful seat assignment.
#[derive(Debug, Clone)]
pub struct Binding {
    /// The match the seat belongs to.
    pub game: Arc<Match>,
    /// The seat.
    pub side: Side,
    /// How it was obtained.
    pub kind: BindKind,
}

/// Reasons a seat could not be assigned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Every match already has two players.
    #[error("no free match slot")]
    NoSlotFree,

    /// Another player holds this nickname.
    #[error("nickname {0} is already in use")]
    NicknameTaken(Nickname),
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSnapshot {
    /// Slot index.
    pub id: MatchId,
    /// Lifecycle at the time of the snapshot.
    pub lifecycle: Lifecycle,
    /// Number of seated sides.
    pub bound: usize,
}

/// Fixed-size table of match slots, allocated once and recycled forever.
pub struct Registry {
    matches: Vec<Arc<Match>>,
    /// Serialises seating and unseating so two connections never race onto
    /// one seat. Never held while waiting on a peer.
    scan: Mutex<()>,
}

impl Registry {
    /// Pre-allocate `max_matches` free slots.
    pub fn new(max_matches: usize) -> Self {
        Self {
            matches: (0..max_matches)
                .map(|i| Arc::new(Match::new(MatchId(i))))
                .collect(),
            scan: Mutex::new(()),
        }
    }

    /// Slot by id.
    pub fn get(&self, id: MatchId) -> Option<&Arc<Match>> {
        self.matches.get(id.0)
    }

    /// Seat `nickname`, connecting from `peer` over `connection`.
    ///
    /// In order of preference: resume a seat this player left hanging (same
    /// nickname and IP, watchdog still armed), join a match waiting for a
    /// second player, open a free match. Never blocks on other players.
    pub async fn acquire_and_bind(
        &self,
        nickname: Nickname,
        peer: SocketAddr,
        connection: ConnectionId,
    ) -> Result<Binding, RegistryError> {
        let _scan = self.scan.lock().await;
        let binding = PlayerBinding {
            nickname,
            peer,
            connection,
        };

        for game in &self.matches {
            let mut state = game.lock().await;
            if !state.lifecycle().is_in_play() {
                continue;
            }
            let returning = Side::BOTH.into_iter().find(|&side| {
                state.watchdog.is_armed(side)
                    && state.player(side).is_some_and(|seated| {
                        seated.nickname == binding.nickname && seated.peer.ip() == peer.ip()
                    })
            });
            if let Some(side) = returning {
                game.resume_locked(&mut state, side, binding);
                tracing::info!("{}: {side} resumed by {connection:?} from {peer}", game.id());
                return Ok(Binding {
                    game: Arc::clone(game),
                    side,
                    kind: BindKind::Resumed,
                });
            }
        }

        for game in &self.matches {
            if game.lock().await.has_nickname(&binding.nickname) {
                return Err(RegistryError::NicknameTaken(binding.nickname));
            }
        }

        for game in &self.matches {
            let mut state = game.lock().await;
            if state.lifecycle() == Lifecycle::AwaitingSecondPlayer {
                tracing::info!("{}: {} joined as {}", game.id(), binding.nickname, Side::Second);
                game.join_locked(&mut state, binding);
                return Ok(Binding {
                    game: Arc::clone(game),
                    side: Side::Second,
                    kind: BindKind::Joined,
                });
            }
        }

        for game in &self.matches {
            let mut state = game.lock().await;
            if state.lifecycle() == Lifecycle::Free {
                tracing::info!("{}: {} opened the match as {}", game.id(), binding.nickname, Side::First);
                game.open_locked(&mut state, binding);
                return Ok(Binding {
                    game: Arc::clone(game),
                    side: Side::First,
                    kind: BindKind::Created,
                });
            }
        }

        tracing::warn!("No free match slot for {}", binding.nickname);
        Err(RegistryError::NoSlotFree)
    }

    /// Unseat `side` of match `id`, if `connection` still serves it.
    ///
    /// Leaving a match that has not been decided hands the win to the
    /// opponent. Once both seats are empty the slot is reset to `Free`.
    /// Returns whether anything was released.
    pub async fn release(&self, id: MatchId, side: Side, connection: ConnectionId) -> bool {
        let Some(game) = self.get(id) else {
            return false;
        };
        let _scan = self.scan.lock().await;
        let mut state = game.lock().await;
        if !state.is_owner(side, connection) {
            return false;
        }

        if state.lifecycle().is_in_play() {
            game.forfeit_locked(&mut state, side.opponent());
        }
        state.players[side.index()] = None;
        state.watchdog.cancel(side);
        tracing::info!("{}: {side} released by {connection:?}", game.id());

        if state.bound_count() == 0 {
            game.reset_locked(&mut state);
            tracing::debug!("{}: slot is free again", game.id());
        }
        true
    }

    /// Force match `id` back to `Free`, dropping both bindings.
    pub async fn reset(&self, id: MatchId) {
        if let Some(game) = self.get(id) {
            let _scan = self.scan.lock().await;
            let mut state = game.lock().await;
            game.reset_locked(&mut state);
        }
    }

    /// The player seated on `side` of match `id`.
    pub async fn lookup_bound_player(&self, id: MatchId, side: Side) -> Option<PlayerBinding> {
        let game = self.get(id)?;
        game.lock().await.player(side).cloned()
    }

    /// Lifecycle and seat count of every slot.
    pub async fn snapshot(&self) -> Vec<MatchSnapshot> {
        let mut snapshots = Vec::with_capacity(self.matches.len());
        for game in &self.matches {
            let state = game.lock().await;
            snapshots.push(MatchSnapshot {
                id: game.id(),
                lifecycle: state.lifecycle(),
                bound: state.bound_count(),
            });
        }
        snapshots
    }
}
