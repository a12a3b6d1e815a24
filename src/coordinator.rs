//! The turn state machine. Every mutation of the game runs here, under one lock.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::{sleep, timeout},
};

use crate::{
    config::Config,
    engine::{MoveSource, OpponentMove, OpponentRequest, protocol::Evaluation},
    error::{Backend, InputError, TurnError, TurnResult},
    rate_limit::RateLimiter,
    reply::{self, Command, Reply},
    state::{Colour, Difficulty, GameState},
    store::{StateStore, StoreLock},
    validator::{GameEnd, MoveValidator, Verdict},
};

/// Pause between attempts on a store lock held by another process.
const LOCK_RETRY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingHumanMove,
    Paused,
    GameOver,
}

pub fn phase(state: &GameState) -> TurnPhase {
    if !state.active {
        TurnPhase::GameOver
    } else if state.paused {
        TurnPhase::Paused
    } else {
        TurnPhase::AwaitingHumanMove
    }
}

/// What the notifier should tell the human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    GameStarted {
        game_token: String,
        human_colour: Colour,
        difficulty: Difficulty,
        opponent_move: Option<String>,
        comment: Option<String>,
        position: String,
    },
    TurnPlayed {
        human_move: Option<String>,
        opponent_move: Option<String>,
        comment: Option<String>,
        evaluation: Option<Evaluation>,
        position: String,
        history: String,
        game_end: Option<GameEnd>,
    },
    MoveRejected {
        token: String,
        reason: String,
    },
    InvalidInput {
        reason: String,
    },
    Ignored {
        text: String,
        reason: String,
    },
    Paused,
    Resumed,
    Resigned {
        result: String,
    },
}

/// All inbound messages of one conversation, oldest first.
#[derive(Debug, Clone)]
pub struct InboundThread {
    pub conversation_ref: String,
    pub messages: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PollReport {
    pub notices: Vec<Notice>,
    /// The error that stopped processing, if any. Messages after it wait for the next poll.
    pub failure: Option<TurnError>,
}

struct Applied {
    state: GameState,
    notices: Vec<Notice>,
    /// The thread no longer belongs to the game (a new one was started).
    detached: bool,
    failure: Option<TurnError>,
}

impl Applied {
    fn changed(state: GameState, notices: Vec<Notice>) -> Applied {
        Applied {
            state,
            notices,
            detached: false,
            failure: None,
        }
    }

    fn unchanged(state: &GameState, notice: Notice) -> Applied {
        Applied::changed(state.clone(), vec![notice])
    }

    fn ignored(state: &GameState, text: impl Into<String>, reason: impl Into<String>) -> Applied {
        Applied::unchanged(
            state,
            Notice::Ignored {
                text: text.into(),
                reason: reason.into(),
            },
        )
    }
}

struct Guarded {
    store: Box<dyn StateStore>,
    limiter: RateLimiter,
}

impl Guarded {
    fn load(&mut self, max_position_len: usize) -> TurnResult<GameState> {
        let record = self.store.load()?;
        self.limiter.restore(&record);
        Ok(GameState::from_record(&record, max_position_len))
    }

    fn save(&mut self, state: &GameState) -> TurnResult<()> {
        let mut record = state.to_record();
        self.limiter.persist(&mut record);
        self.store.save(&record)?;
        Ok(())
    }
}

/// The in-process guard plus the store lock shared with other processes.
struct Held<'a> {
    guarded: MutexGuard<'a, Guarded>,
    _store_lock: StoreLock,
}

impl Deref for Held<'_> {
    type Target = Guarded;

    fn deref(&self) -> &Guarded {
        &self.guarded
    }
}

impl DerefMut for Held<'_> {
    fn deref_mut(&mut self) -> &mut Guarded {
        &mut self.guarded
    }
}

pub struct TurnCoordinator {
    config: Arc<Config>,
    validator: Box<dyn MoveValidator>,
    opponent: Box<dyn MoveSource>,
    guarded: Mutex<Guarded>,
}

impl TurnCoordinator {
    pub fn new(
        config: Arc<Config>,
        validator: Box<dyn MoveValidator>,
        opponent: Box<dyn MoveSource>,
        store: Box<dyn StateStore>,
    ) -> TurnCoordinator {
        let limiter = RateLimiter::new(config.min_backend_interval);
        TurnCoordinator {
            config,
            validator,
            opponent,
            guarded: Mutex::new(Guarded { store, limiter }),
        }
    }

    async fn acquire(&self) -> TurnResult<Held<'_>> {
        let guarded = self.guarded.lock().await;
        loop {
            if let Some(store_lock) = guarded.store.try_lock()? {
                return Ok(Held {
                    guarded,
                    _store_lock: store_lock,
                });
            }
            sleep(LOCK_RETRY).await;
        }
    }

    /// Waits up to `lock_timeout` for both this process's guard and the store lock.
    async fn lock(&self) -> TurnResult<Held<'_>> {
        timeout(self.config.lock_timeout, self.acquire())
            .await
            .map_err(|_| {
                warn!("game lock still held after {:?}", self.config.lock_timeout);
                TurnError::Concurrency {
                    waited: self.config.lock_timeout,
                }
            })?
    }

    pub async fn snapshot(&self) -> TurnResult<GameState> {
        let mut guarded = self.lock().await?;
        guarded.load(self.config.max_position_len)
    }

    /// Starts a new game, overwriting whatever was there. Missing settings come from
    /// the previous game, or from the config when there was none.
    pub async fn new_game(
        &self,
        difficulty: Option<Difficulty>,
        colour: Option<Colour>,
    ) -> TurnResult<Vec<Notice>> {
        let mut guarded = self.lock().await?;
        let state = guarded.load(self.config.max_position_len)?;
        let applied = self
            .start_game(&mut guarded, &state, difficulty, colour)
            .await?;
        guarded.save(&applied.state)?;
        match applied.failure {
            Some(e) => Err(e),
            None => Ok(applied.notices),
        }
    }

    /// Records the thread the notifier opened for the current game.
    pub async fn attach(&self, conversation_ref: &str) -> TurnResult<()> {
        let mut guarded = self.lock().await?;
        let mut state = guarded.load(self.config.max_position_len)?;
        if state.conversation_ref != conversation_ref {
            info!("[{}] attached to thread {conversation_ref}", state.game_token);
            state.conversation_ref = conversation_ref.to_string();
            state.last_consumed_count = 0;
            guarded.save(&state)?;
        }
        Ok(())
    }

    /// Processes every message of `thread` past the watermark, in order.
    pub async fn poll(&self, thread: &InboundThread) -> TurnResult<PollReport> {
        let mut guarded = self.lock().await?;
        let mut state = guarded.load(self.config.max_position_len)?;
        let mut report = PollReport::default();

        if state.game_token.is_empty() || state.conversation_ref != thread.conversation_ref {
            debug!(
                "thread '{}' does not carry the current game, skipping",
                thread.conversation_ref
            );
            return Ok(report);
        }
        if thread.messages.len() < state.last_consumed_count {
            warn!(
                "[{}] thread shrank to {} messages, watermark is {}",
                state.game_token,
                thread.messages.len(),
                state.last_consumed_count
            );
        }

        let start = state.last_consumed_count;
        for (index, body) in thread.messages.iter().enumerate().skip(start) {
            let reply = reply::interpret(body, self.config.max_move_len);

            // refuse before the watermark moves, so the message is retried next poll
            if let Err(e) = self.check_rate_limits(&guarded, &state, &reply) {
                warn!("[{}] {e}", state.game_token);
                report.failure = Some(e);
                break;
            }

            state.last_consumed_count = index + 1;
            guarded.save(&state)?;

            match self.apply(&mut guarded, &state, reply).await {
                Ok(applied) => {
                    state = applied.state;
                    guarded.save(&state)?;
                    report.notices.extend(applied.notices);
                    if let Some(e) = applied.failure {
                        report.failure = Some(e);
                        break;
                    }
                    if applied.detached {
                        break;
                    }
                }
                Err(e) => {
                    error!("[{}] turn failed: {e}", state.game_token);
                    // the failed call still counts against the backend's interval
                    if let Err(save) = guarded.save(&state) {
                        error!("[{}] could not record the failed call: {save}", state.game_token);
                    }
                    report.failure = Some(e);
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Backends a reply will need, in call order.
    fn backends_for(&self, state: &GameState, reply: &Result<Reply, InputError>) -> Vec<Backend> {
        match reply {
            Ok(Reply::Move(_)) if phase(state) == TurnPhase::AwaitingHumanMove => {
                let mut backends = Vec::with_capacity(2);
                if state.is_human_to_move() {
                    backends.extend(self.validator.backend());
                }
                backends.push(self.opponent.backend());
                backends
            }
            Ok(Reply::Command(Command::New { colour, .. })) => {
                let colour = colour.unwrap_or(if state.game_token.is_empty() {
                    self.config.default_colour
                } else {
                    state.human_colour
                });
                if colour == Colour::Black {
                    vec![self.opponent.backend()]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    fn check_rate_limits(
        &self,
        guarded: &Guarded,
        state: &GameState,
        reply: &Result<Reply, InputError>,
    ) -> TurnResult<()> {
        let now = Utc::now();
        for backend in self.backends_for(state, reply) {
            guarded.limiter.check(backend, now)?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        guarded: &mut Guarded,
        state: &GameState,
        reply: Result<Reply, InputError>,
    ) -> TurnResult<Applied> {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                debug!("[{}] unreadable message: {e}", state.game_token);
                return Ok(Applied::unchanged(
                    state,
                    Notice::InvalidInput {
                        reason: e.to_string(),
                    },
                ));
            }
        };

        match (reply, phase(state)) {
            (Reply::Command(Command::New { difficulty, colour }), _) => {
                self.start_game(guarded, state, difficulty, colour).await
            }
            (Reply::Command(Command::Resign), TurnPhase::GameOver) => Ok(Applied::ignored(
                state,
                "RESIGN",
                "there is no game in progress",
            )),
            (Reply::Command(Command::Resign), _) => Ok(resign(state)),
            (Reply::Command(Command::Pause), TurnPhase::AwaitingHumanMove) => {
                Ok(set_paused(state, true))
            }
            (Reply::Command(Command::Pause), current) => {
                Ok(Applied::ignored(state, "PAUSE", idle_reason(current)))
            }
            (Reply::Command(Command::Continue), TurnPhase::Paused) => Ok(set_paused(state, false)),
            (Reply::Command(Command::Continue), current) => {
                Ok(Applied::ignored(state, "CONTINUE", idle_reason(current)))
            }
            (Reply::Move(token), TurnPhase::AwaitingHumanMove) => {
                self.play_turn(guarded, state, &token).await
            }
            (Reply::Move(token), current) => {
                debug!("[{}] ignoring move {token} while {current:?}", state.game_token);
                Ok(Applied::ignored(state, token, idle_reason(current)))
            }
        }
    }

    /// The returned `Applied` is always detached: the new game gets its own thread.
    async fn start_game(
        &self,
        guarded: &mut Guarded,
        previous: &GameState,
        difficulty: Option<Difficulty>,
        colour: Option<Colour>,
    ) -> TurnResult<Applied> {
        let (default_difficulty, default_colour) = if previous.game_token.is_empty() {
            (self.config.default_difficulty, self.config.default_colour)
        } else {
            (previous.difficulty, previous.human_colour)
        };
        let mut state = GameState::new_game(
            difficulty.unwrap_or(default_difficulty),
            colour.unwrap_or(default_colour),
        );
        info!(
            "[{}] new game: human plays {}, difficulty {}",
            state.game_token, state.human_colour, state.difficulty
        );

        let mut opening = None;
        let mut comment = None;
        let mut failure = None;
        if !state.is_human_to_move() {
            match self.call_opponent(guarded, &state).await {
                Ok(reply) => {
                    opening = reply.display.clone();
                    comment = reply.comment.clone();
                    apply_opponent(&mut state, &reply, self.config.max_history);
                }
                Err(e) => {
                    warn!(
                        "[{}] opening move failed, it will be requested again on the next reply: {e}",
                        state.game_token
                    );
                    failure = Some(e);
                }
            }
        }

        let notice = Notice::GameStarted {
            game_token: state.game_token.clone(),
            human_colour: state.human_colour,
            difficulty: state.difficulty,
            opponent_move: opening,
            comment,
            position: state.position.to_string(),
        };
        Ok(Applied {
            state,
            notices: vec![notice],
            detached: true,
            failure,
        })
    }

    async fn play_turn(
        &self,
        guarded: &mut Guarded,
        state: &GameState,
        token: &str,
    ) -> TurnResult<Applied> {
        let mut next = state.clone();

        if !next.is_human_to_move() {
            // the opponent still owes a move, typically a failed opening move
            let reply = self.call_opponent(guarded, &next).await?;
            apply_opponent(&mut next, &reply, self.config.max_history);
            let notices = vec![
                Notice::Ignored {
                    text: token.to_string(),
                    reason: "it was not your turn yet, here is my move".into(),
                },
                turn_notice(None, Some(&reply), reply.game_end.clone(), &next),
            ];
            return Ok(Applied::changed(next, notices));
        }

        let verdict = match self.call_validator(guarded, &next, token).await {
            Err(TurnError::Input(e)) => {
                return Ok(Applied::unchanged(
                    state,
                    Notice::InvalidInput {
                        reason: e.to_string(),
                    },
                ));
            }
            other => other?,
        };
        let accepted = match verdict {
            Verdict::Rejected { reason } => {
                info!("[{}] rejected {token}: {reason}", next.game_token);
                return Ok(Applied::unchanged(
                    state,
                    Notice::MoveRejected {
                        token: token.to_string(),
                        reason,
                    },
                ));
            }
            Verdict::Accepted(accepted) => accepted,
        };

        info!("[{}] human played {}", next.game_token, accepted.display);
        let human_move = Some(accepted.display.clone());
        next.record_ply(&accepted.display, accepted.position, self.config.max_history);

        if let Some(end) = accepted.game_end {
            info!("[{}] game over after human move: {}", next.game_token, end.result);
            next.active = false;
            let notice = turn_notice(human_move, None, Some(end), &next);
            return Ok(Applied::changed(next, vec![notice]));
        }

        // nothing is kept from this turn unless the opponent answers
        let reply = self.call_opponent(guarded, &next).await?;
        apply_opponent(&mut next, &reply, self.config.max_history);
        let notice = turn_notice(human_move, Some(&reply), reply.game_end.clone(), &next);
        Ok(Applied::changed(next, vec![notice]))
    }

    async fn call_validator(
        &self,
        guarded: &mut Guarded,
        state: &GameState,
        token: &str,
    ) -> TurnResult<Verdict> {
        if let Some(backend) = self.validator.backend() {
            guarded.limiter.acquire(backend, Utc::now())?;
        }
        self.validator
            .validate(&state.position, &state.move_history, token)
            .await
    }

    async fn call_opponent(
        &self,
        guarded: &mut Guarded,
        state: &GameState,
    ) -> TurnResult<OpponentMove> {
        let backend = self.opponent.backend();
        guarded.limiter.acquire(backend, Utc::now())?;

        let request = OpponentRequest {
            position: &state.position,
            history: &state.move_history,
            difficulty: state.difficulty,
            colour: state.opponent_colour(),
        };
        self.opponent.produce_move(&request).await.map_err(|e| {
            error!("[{}] {backend} failed: {e}", state.game_token);
            TurnError::backend(backend, e)
        })
    }
}

fn idle_reason(current: TurnPhase) -> &'static str {
    match current {
        TurnPhase::AwaitingHumanMove => "the game is not paused",
        TurnPhase::Paused => "the game is paused, reply CONTINUE to resume",
        TurnPhase::GameOver => "the game is over, reply NEW to start another",
    }
}

fn resign(state: &GameState) -> Applied {
    let mut next = state.clone();
    next.active = false;
    next.paused = false;
    let result = match next.human_colour {
        Colour::White => "0-1",
        Colour::Black => "1-0",
    };
    info!("[{}] human resigned ({result})", next.game_token);
    Applied::changed(
        next,
        vec![Notice::Resigned {
            result: result.to_string(),
        }],
    )
}

fn set_paused(state: &GameState, paused: bool) -> Applied {
    let mut next = state.clone();
    next.paused = paused;
    let notice = if paused {
        Notice::Paused
    } else {
        Notice::Resumed
    };
    info!("[{}] {notice:?}", next.game_token);
    Applied::changed(next, vec![notice])
}

fn apply_opponent(state: &mut GameState, reply: &OpponentMove, max_history: usize) {
    if let Some(display) = &reply.display {
        state.record_ply(display, reply.position.clone(), max_history);
    }
    if let Some(end) = &reply.game_end {
        info!("[{}] game over: {} ({})", state.game_token, end.result, end.reason);
        state.active = false;
    }
}

fn turn_notice(
    human_move: Option<String>,
    reply: Option<&OpponentMove>,
    game_end: Option<GameEnd>,
    after: &GameState,
) -> Notice {
    Notice::TurnPlayed {
        human_move,
        opponent_move: reply.and_then(|r| r.display.clone()),
        comment: reply.and_then(|r| r.comment.clone()),
        evaluation: reply.and_then(|r| r.evaluation),
        position: after.position.to_string(),
        history: after.history_line(),
        game_end,
    }
}
