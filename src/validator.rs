mod generative;
mod rules;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    config::{Config, ValidatorKind},
    error::{Backend, InputError, TurnResult},
    llm::TextGenerator,
    position::Position,
};

pub use generative::GenerativeValidator;
pub use rules::{RulesValidator, game_end, load_position, play_uci};

/// How a game finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameEnd {
    /// `1-0`, `0-1` or `1/2-1/2`, or whatever the oracle reported.
    pub result: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMove {
    /// The move as it goes into the history.
    pub display: String,
    pub position: Position,
    pub game_end: Option<GameEnd>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(AcceptedMove),
    Rejected { reason: String },
}

pub fn init_validator(config: &Arc<Config>, generator: Arc<dyn TextGenerator>) -> Box<dyn MoveValidator> {
    match config.validator {
        ValidatorKind::Rules => Box::new(RulesValidator::new(config.clone())),
        ValidatorKind::Generative => Box::new(GenerativeValidator::new(config.clone(), generator)),
    }
}

#[async_trait]
pub trait MoveValidator: Send + Sync {
    /// The external backend this validator calls, if any.
    fn backend(&self) -> Option<Backend>;

    async fn validate(
        &self,
        position: &Position,
        history: &[String],
        token: &str,
    ) -> TurnResult<Verdict>;
}

/// Cheap check done before any backend sees the token.
fn check_token(token: &str, max_len: usize) -> Result<(), InputError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(InputError::EmptyMessage);
    }
    if token.chars().count() > max_len {
        return Err(InputError::MoveTooLong {
            token: token.chars().take(max_len + 5).collect(),
            max: max_len,
        });
    }
    Ok(())
}
