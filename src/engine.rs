mod oracle;
pub mod protocol;
mod stockfish;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::{Config, OpponentKind},
    error::{Backend, BackendError},
    llm::TextGenerator,
    position::Position,
    state::{Colour, Difficulty},
    validator::GameEnd,
};
use protocol::Evaluation;

pub use oracle::MoveOracle;
pub use protocol::SearchParams;
pub use stockfish::StockfishEngine;

pub fn init_move_source(config: &Arc<Config>, generator: Arc<dyn TextGenerator>) -> Box<dyn MoveSource> {
    match config.opponent {
        OpponentKind::Engine => Box::new(StockfishEngine::new(config.clone())),
        OpponentKind::Oracle => Box::new(MoveOracle::new(config.clone(), generator)),
    }
}

pub struct OpponentRequest<'a> {
    pub position: &'a Position,
    pub history: &'a [String],
    pub difficulty: Difficulty,
    /// The colour the opponent plays.
    pub colour: Colour,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpponentMove {
    /// `None` when there was nothing left to play.
    pub display: Option<String>,
    pub position: Position,
    pub comment: Option<String>,
    pub evaluation: Option<Evaluation>,
    pub game_end: Option<GameEnd>,
}

#[async_trait]
pub trait MoveSource: Send + Sync {
    fn backend(&self) -> Backend;

    async fn produce_move(&self, request: &OpponentRequest<'_>) -> Result<OpponentMove, BackendError>;
}
