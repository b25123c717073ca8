//! Per-connection session: nickname negotiation, seating, and the turn loop.
//!
//! Socket reads happen on a separate reader task that forwards decoded
//! [`Inbound`] events over a bounded channel. The session itself only ever
//! waits on that channel, on the match's turn synchronizer, or on a bounded
//! write, so every suspension point is cancel-safe and has a timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use senet_config::Config;
use senet_match::{
    BindKind, Binding, Lifecycle, Match, Registry, RegistryError, StartWait, TurnError, TurnOutcome,
    TurnWait,
};
use senet_net::{
    CodecError, ConnectionId, ErrorCode, Message, Nickname, read_message_from, read_start,
    write_message,
};
use senet_rules::{Side, TurnWords, ValidationPolicy};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Capacity of the reader-to-session channel.
const INBOUND_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Timing and rule knobs shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Upper bound on a single synchronizer wait.
    pub poll_interval: Duration,
    /// How long a fresh connection may stay silent before sending a nickname.
    pub nickname_timeout: Duration,
    /// Rejected nicknames and malformed messages allowed before giving up.
    pub max_nick_attempts: u32,
    /// Silence after which the server pings the client.
    pub alive_interval: Duration,
    /// How long an unanswered ping is tolerated.
    pub alive_timeout: Duration,
    /// Time the turn holder has to report its move.
    pub turn_timeout: Duration,
    /// Grace period granted to a silent player before forfeiting.
    pub reconnect_timeout: Duration,
    /// Maximum gap between two bytes of one message.
    pub byte_timeout: Duration,
    /// Maximum time for one outgoing message.
    pub write_timeout: Duration,
    /// Which board checks are enforced.
    pub policy: ValidationPolicy,
}

impl SessionSettings {
    /// Derive session settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let timing = &config.timing;
        let rules = &config.rules;
        Self {
            poll_interval: timing.poll_interval(),
            nickname_timeout: timing.nickname_timeout(),
            max_nick_attempts: config.matches.max_nick_attempts,
            alive_interval: timing.alive_interval(),
            alive_timeout: timing.alive_timeout(),
            turn_timeout: timing.turn_timeout(),
            reconnect_timeout: timing.reconnect_timeout(),
            byte_timeout: timing.byte_timeout(),
            write_timeout: timing.write_timeout(),
            policy: ValidationPolicy {
                forbid_stacking: rules.forbid_stacking,
                forbid_overlap: rules.forbid_overlap,
                forbid_reentry: rules.forbid_reentry,
            },
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

/// What the reader task saw on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Inbound {
    /// A complete, well-formed message.
    Message(Message),
    /// Bytes that do not form a message; carries the code to report.
    Invalid(ErrorCode),
    /// A message started but its next byte never arrived.
    Stalled,
    /// The peer closed the connection or the socket failed.
    Closed,
}

/// Aborts the reader task when the session goes away.
struct ReaderGuard(JoinHandle<()>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_reader(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    byte_timeout: Duration,
    tx: mpsc::Sender<Inbound>,
) -> ReaderGuard {
    ReaderGuard(tokio::spawn(async move {
        loop {
            // Waiting for the start of a message is unbounded; the session
            // decides how long silence is acceptable.
            let event = match read_start(&mut reader, None).await {
                Ok(first) => match read_message_from(&mut reader, first, byte_timeout).await {
                    Ok(message) => Inbound::Message(message),
                    Err(CodecError::Decode(code)) => Inbound::Invalid(code),
                    Err(CodecError::Timeout) => Inbound::Stalled,
                    Err(e) => {
                        tracing::debug!("{id}: read failed: {e}");
                        Inbound::Closed
                    }
                },
                Err(e) => {
                    tracing::debug!("{id}: read failed: {e}");
                    Inbound::Closed
                }
            };

            let closed = event == Inbound::Closed;
            if tx.send(event).await.is_err() || closed {
                return;
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Quiet,
    PingDue,
    Expired,
}

/// Tracks when the peer was last heard from and whether a ping is pending.
#[derive(Debug)]
struct Heartbeat {
    last_heard: Instant,
    ping_sent: Option<Instant>,
}

impl Heartbeat {
    fn new() -> Self {
        Self {
            last_heard: Instant::now(),
            ping_sent: None,
        }
    }

    fn heard(&mut self) {
        self.last_heard = Instant::now();
        self.ping_sent = None;
    }

    fn pinged(&mut self) {
        self.ping_sent = Some(Instant::now());
    }

    fn check(&self, settings: &SessionSettings) -> Liveness {
        match self.ping_sent {
            Some(sent) if sent.elapsed() >= settings.alive_timeout => Liveness::Expired,
            Some(_) => Liveness::Quiet,
            None if self.last_heard.elapsed() >= settings.alive_interval => Liveness::PingDue,
            None => Liveness::Quiet,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The match was decided and the result delivered.
    Finished {
        /// The side credited with the win.
        winner: Side,
    },
    /// The client sent `EXIT`.
    Quit,
    /// The connection closed or a write failed.
    Disconnected,
    /// The seat was taken over by a reconnecting connection.
    Evicted,
    /// The client stopped answering before it was seated in a running match.
    Unresponsive,
    /// The client was turned away (server full or too many bad attempts).
    Refused,
}

/// Why the watchdog for this session's side is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmCause {
    /// An unanswered liveness ping while waiting for the opponent's move.
    Silence,
    /// No end-of-turn report within the turn timeout.
    TurnTimeout,
}

/// Outcome of one phase of the turn loop.
enum Step {
    Proceed,
    Stop(SessionEnd),
}

/// Everything a seated session needs once the match has started.
struct Table {
    game: Arc<Match>,
    side: Side,
    roster: [Nickname; 2],
}

impl Table {
    fn nickname(&self, side: Side) -> &Nickname {
        &self.roster[side.index()]
    }
}

/// One client connection, from accept to close.
pub struct Session {
    id: ConnectionId,
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Inbound>,
    _reader: ReaderGuard,
    registry: Arc<Registry>,
    settings: Arc<SessionSettings>,
    seat: Option<Binding>,
    armed: Option<ArmCause>,
    waiting_noticed: bool,
}

impl Session {
    /// Take over `stream` and start its reader task.
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
        registry: Arc<Registry>,
        settings: Arc<SessionSettings>,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = spawn_reader(id, reader, settings.byte_timeout, tx);
        Self {
            id,
            peer,
            writer,
            inbound,
            _reader: reader,
            registry,
            settings,
            seat: None,
            armed: None,
            waiting_noticed: false,
        }
    }

    /// Drive the session to completion and clean up after it.
    pub async fn run(mut self) -> SessionEnd {
        let end = match self.drive().await {
            Ok(end) => end,
            Err(e) => {
                tracing::debug!("{}: write to {} failed: {e}", self.id, self.peer);
                SessionEnd::Disconnected
            }
        };
        self.cleanup(end).await;
        tracing::info!("{}: session ended: {end:?}", self.id);
        end
    }

    async fn drive(&mut self) -> Result<SessionEnd, CodecError> {
        let binding = match self.negotiate().await? {
            Ok(binding) => binding,
            Err(end) => return Ok(end),
        };
        let game = Arc::clone(&binding.game);
        let (side, kind) = (binding.side, binding.kind);
        self.seat = Some(binding);
        self.send(&Message::Ok).await?;

        if kind == BindKind::Created
            && let Step::Stop(end) = self.await_opponent(&game).await?
        {
            return Ok(end);
        }

        let Some(roster) = game.roster().await else {
            tracing::warn!("{}: {} has no roster after pairing", self.id, game.id());
            return Ok(SessionEnd::Disconnected);
        };
        let [first, second] = roster.clone();
        self.send(&Message::StartGame { first, second }).await?;

        let table = Table { game, side, roster };
        self.play(&table).await
    }

    /// Release everything the session holds.
    async fn cleanup(&mut self, end: SessionEnd) {
        let Some(seat) = self.seat.take() else {
            return;
        };
        if end == SessionEnd::Evicted {
            return;
        }
        seat.game.cancel_watchdog(seat.side, self.id).await;
        self.registry
            .release(seat.game.id(), seat.side, self.id)
            .await;
    }

    // -- Negotiation ---------------------------------------------------------

    async fn negotiate(&mut self) -> Result<Result<Binding, SessionEnd>, CodecError> {
        let mut failures = 0;
        loop {
            if failures >= self.settings.max_nick_attempts {
                tracing::info!("{}: too many failed attempts from {}", self.id, self.peer);
                self.send_error(ErrorCode::TooManyAttempts).await?;
                return Ok(Err(SessionEnd::Refused));
            }

            let Some(inbound) = self.recv_within(self.settings.nickname_timeout).await else {
                tracing::info!("{}: no nickname from {}", self.id, self.peer);
                self.send_error(ErrorCode::Timeout).await?;
                return Ok(Err(SessionEnd::Unresponsive));
            };

            match inbound {
                Inbound::Message(Message::Nickname(nickname)) => {
                    match self
                        .registry
                        .acquire_and_bind(nickname, self.peer, self.id)
                        .await
                    {
                        Ok(binding) => return Ok(Ok(binding)),
                        Err(RegistryError::NicknameTaken(nickname)) => {
                            tracing::debug!("{}: nickname {nickname} refused", self.id);
                            self.send_error(ErrorCode::NicknameTaken).await?;
                            failures += 1;
                        }
                        Err(RegistryError::NoSlotFree) => {
                            self.send_error(ErrorCode::ServerFull).await?;
                            return Ok(Err(SessionEnd::Refused));
                        }
                    }
                }
                Inbound::Message(Message::Alive) => self.send(&Message::Ok).await?,
                Inbound::Message(Message::Exit) => return Ok(Err(SessionEnd::Quit)),
                Inbound::Message(other) => {
                    tracing::debug!("{}: unexpected {other} before nickname", self.id);
                    self.send_error(ErrorCode::UnexpectedMessage).await?;
                    failures += 1;
                }
                Inbound::Invalid(code) => {
                    self.send_error(code).await?;
                    failures += 1;
                }
                Inbound::Stalled => {
                    self.send_error(ErrorCode::Timeout).await?;
                    failures += 1;
                }
                Inbound::Closed => return Ok(Err(SessionEnd::Disconnected)),
            }
        }
    }

    // -- Pairing -------------------------------------------------------------

    async fn await_opponent(&mut self, game: &Arc<Match>) -> Result<Step, CodecError> {
        let mut heartbeat = Heartbeat::new();
        loop {
            let event = tokio::select! {
                started = game.wait_for_start(self.settings.poll_interval) => Ok(started),
                inbound = self.inbound.recv() => Err(inbound.unwrap_or(Inbound::Closed)),
            };

            match event {
                Ok(StartWait::Started) => return Ok(Step::Proceed),
                Ok(StartWait::MatchEnded { winner }) => {
                    // The opponent joined and left before this side woke up.
                    if let Some(roster) = game.roster().await {
                        let nickname = roster[winner.index()].clone();
                        self.send(&Message::EndGame { winner: nickname }).await?;
                    }
                    return Ok(Step::Stop(SessionEnd::Finished { winner }));
                }
                Ok(StartWait::NotYet) => {}
                Err(inbound) => {
                    heartbeat.heard();
                    match inbound {
                        Inbound::Message(Message::Alive) => self.send(&Message::Ok).await?,
                        Inbound::Message(Message::Ok | Message::Error(_)) => {}
                        Inbound::Message(Message::Exit) => return Ok(Step::Stop(SessionEnd::Quit)),
                        Inbound::Message(_) => self.send_error(ErrorCode::UnexpectedMessage).await?,
                        Inbound::Invalid(code) => self.send_error(code).await?,
                        Inbound::Stalled => {}
                        Inbound::Closed => return Ok(Step::Stop(SessionEnd::Disconnected)),
                    }
                }
            }

            match heartbeat.check(&self.settings) {
                Liveness::Quiet => {}
                Liveness::PingDue => {
                    self.send(&Message::Alive).await?;
                    heartbeat.pinged();
                }
                Liveness::Expired => {
                    tracing::info!("{}: {} stopped answering while waiting", self.id, game.id());
                    self.send_error(ErrorCode::BadMessage).await?;
                    return Ok(Step::Stop(SessionEnd::Unresponsive));
                }
            }
        }
    }

    // -- Playing -------------------------------------------------------------

    async fn play(&mut self, table: &Table) -> Result<SessionEnd, CodecError> {
        loop {
            if let Step::Stop(end) = self.wait_own_turn(table).await? {
                return Ok(end);
            }
            if let Step::Stop(end) = self.take_turn(table).await? {
                return Ok(end);
            }
        }
    }

    async fn wait_own_turn(&mut self, table: &Table) -> Result<Step, CodecError> {
        let game = &table.game;
        let mut heartbeat = Heartbeat::new();
        loop {
            if !game.owns(table.side, self.id).await {
                return Ok(Step::Stop(SessionEnd::Evicted));
            }
            self.notify_waiting(table).await?;

            let event = tokio::select! {
                turn = game.wait_for_turn(table.side, self.settings.poll_interval) => Ok(turn),
                inbound = self.inbound.recv() => Err(inbound.unwrap_or(Inbound::Closed)),
            };

            match event {
                Ok(TurnWait::MyTurn) => return Ok(Step::Proceed),
                Ok(TurnWait::MatchEnded { winner }) => return self.finish(table, winner).await,
                Ok(TurnWait::NotYet) => {}
                Err(inbound) => {
                    heartbeat.heard();
                    if self.armed == Some(ArmCause::Silence) {
                        self.disarm(table).await;
                    }
                    match inbound {
                        Inbound::Message(Message::Alive) => self.send(&Message::Ok).await?,
                        Inbound::Message(Message::Ok | Message::Error(_)) => {}
                        Inbound::Message(Message::Exit) => return Ok(self.concede(table).await),
                        Inbound::Message(_) => self.send_error(ErrorCode::NotYourTurn).await?,
                        Inbound::Invalid(code) => self.send_error(code).await?,
                        Inbound::Stalled => {}
                        Inbound::Closed => return Ok(Step::Stop(SessionEnd::Disconnected)),
                    }
                }
            }

            match heartbeat.check(&self.settings) {
                Liveness::Quiet => {}
                Liveness::PingDue => {
                    self.send(&Message::Alive).await?;
                    heartbeat.pinged();
                }
                Liveness::Expired if self.armed.is_none() => {
                    self.arm(table, ArmCause::Silence).await;
                }
                Liveness::Expired => {}
            }
        }
    }

    async fn take_turn(&mut self, table: &Table) -> Result<Step, CodecError> {
        let game = &table.game;
        let words = game.words().await;
        self.send(&Message::StartTurn(words)).await?;
        let deadline = Instant::now() + self.settings.turn_timeout;

        loop {
            if !game.owns(table.side, self.id).await {
                return Ok(Step::Stop(SessionEnd::Evicted));
            }
            self.notify_waiting(table).await?;

            let event = tokio::select! {
                ended = game.wait_for_end(self.settings.poll_interval) => Ok(ended),
                inbound = self.inbound.recv() => Err(inbound.unwrap_or(Inbound::Closed)),
            };

            match event {
                Ok(Some(winner)) => return self.finish(table, winner).await,
                Ok(None) => {}
                Err(Inbound::Message(Message::EndTurn(proposed))) => {
                    if self.armed.is_some() {
                        self.disarm(table).await;
                    }
                    return self.submit(table, proposed).await;
                }
                Err(inbound) => {
                    if self.armed == Some(ArmCause::Silence) {
                        self.disarm(table).await;
                    }
                    match inbound {
                        Inbound::Message(Message::Alive) => self.send(&Message::Ok).await?,
                        Inbound::Message(Message::Ok | Message::Error(_)) => {}
                        Inbound::Message(Message::Exit) => return Ok(self.concede(table).await),
                        Inbound::Message(_) => self.send_error(ErrorCode::UnexpectedMessage).await?,
                        Inbound::Invalid(code) => self.send_error(code).await?,
                        Inbound::Stalled => {}
                        Inbound::Closed => return Ok(Step::Stop(SessionEnd::Disconnected)),
                    }
                }
            }

            if self.armed.is_none() && Instant::now() >= deadline {
                tracing::info!("{}: {} missed the turn deadline", self.id, table.side);
                self.arm(table, ArmCause::TurnTimeout).await;
            }
        }
    }

    async fn submit(&mut self, table: &Table, proposed: TurnWords) -> Result<Step, CodecError> {
        let outcome = table
            .game
            .submit_turn(table.side, self.id, proposed, &self.settings.policy)
            .await;
        match outcome {
            Ok(TurnOutcome::Continue) => {
                self.send(&Message::Ok).await?;
                Ok(Step::Proceed)
            }
            Ok(TurnOutcome::Rejected(reason)) => {
                tracing::info!("{}: illegal turn from {}: {reason}", self.id, table.side);
                self.send_error(ErrorCode::IllegalTurn).await?;
                Ok(Step::Proceed)
            }
            Ok(TurnOutcome::Won { winner }) => {
                self.send(&Message::Ok).await?;
                self.finish(table, winner).await
            }
            Err(TurnError::NotOwner { .. }) => Ok(Step::Stop(SessionEnd::Evicted)),
            Err(TurnError::MatchEnded { winner }) => self.finish(table, winner).await,
            Err(e @ (TurnError::NotRunning | TurnError::NotYourTurn { .. })) => {
                tracing::warn!("{}: turn report dropped: {e}", self.id);
                self.send_error(ErrorCode::NotYourTurn).await?;
                Ok(Step::Proceed)
            }
        }
    }

    /// Deliver the result of a decided match.
    async fn finish(&mut self, table: &Table, winner: Side) -> Result<Step, CodecError> {
        let nickname = table.nickname(winner).clone();
        self.send(&Message::EndGame { winner: nickname }).await?;
        Ok(Step::Stop(SessionEnd::Finished { winner }))
    }

    async fn concede(&mut self, table: &Table) -> Step {
        if let Some(winner) = table.game.concede(table.side, self.id).await {
            tracing::info!("{}: {} quit, {winner} wins", self.id, table.nickname(table.side));
        }
        Step::Stop(SessionEnd::Quit)
    }

    /// Tell the client once per episode that its opponent went silent.
    async fn notify_waiting(&mut self, table: &Table) -> Result<(), CodecError> {
        let opponent = table.side.opponent();
        let waiting = matches!(
            table.game.lifecycle().await,
            Lifecycle::WaitingForReconnect { side } if side == opponent
        );
        if !waiting {
            self.waiting_noticed = false;
            return Ok(());
        }
        if !self.waiting_noticed {
            self.waiting_noticed = true;
            let nickname = table.nickname(opponent).clone();
            self.send(&Message::Waiting(nickname)).await?;
        }
        Ok(())
    }

    async fn arm(&mut self, table: &Table, cause: ArmCause) {
        if table
            .game
            .arm_watchdog(table.side, self.id, self.settings.reconnect_timeout)
            .await
        {
            self.armed = Some(cause);
        }
    }

    async fn disarm(&mut self, table: &Table) {
        table.game.cancel_watchdog(table.side, self.id).await;
        self.armed = None;
    }

    // -- I/O -----------------------------------------------------------------

    async fn recv_within(&mut self, limit: Duration) -> Option<Inbound> {
        match tokio::time::timeout(limit, self.inbound.recv()).await {
            Ok(inbound) => Some(inbound.unwrap_or(Inbound::Closed)),
            Err(_) => None,
        }
    }

    async fn send(&mut self, message: &Message) -> Result<(), CodecError> {
        tracing::trace!("{} <- {message}", self.id);
        write_message(&mut self.writer, message, self.settings.write_timeout).await
    }

    async fn send_error(&mut self, code: ErrorCode) -> Result<(), CodecError> {
        self.send(&Message::Error(code)).await
    }
}
