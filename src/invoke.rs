//! One-shot opponent invocation: a position and a difficulty tier in, an engine move out.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    engine::{SearchParams, StockfishEngine, protocol::Evaluation},
    position::{self, Position},
    state::Difficulty,
};

#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    pub position: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    BadInput,
    BackendFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvokeResponse {
    Ok {
        #[serde(rename = "move")]
        best_move: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        evaluation: Option<Evaluation>,
    },
    Error {
        message: String,
        classification: Classification,
    },
}

impl InvokeResponse {
    pub fn bad_input(message: impl Into<String>) -> InvokeResponse {
        InvokeResponse::Error {
            message: message.into(),
            classification: Classification::BadInput,
        }
    }

    fn backend_failure(message: impl Into<String>) -> InvokeResponse {
        InvokeResponse::Error {
            message: message.into(),
            classification: Classification::BackendFailure,
        }
    }
}

const FEN_FIELDS: usize = 6;

fn allowed_char(c: char) -> bool {
    c.is_ascii_digit() || "pnbrqkPNBRQKabcdefghw/- ".contains(c)
}

/// Everything is checked here so a bad request never reaches the engine process.
fn check_request(request: &InvokeRequest, config: &Config) -> Result<Position, String> {
    let text = request.position.trim();
    if text.chars().count() > config.max_position_len {
        return Err(format!(
            "position is longer than {} characters",
            config.max_position_len
        ));
    }
    if let Some(c) = text.chars().find(|c| !allowed_char(*c)) {
        return Err(format!("position contains an invalid character '{c}'"));
    }
    let fields = text.split_whitespace().count();
    if fields != FEN_FIELDS {
        return Err(format!(
            "position must have {FEN_FIELDS} fields, found {fields}"
        ));
    }
    request
        .difficulty
        .parse::<Difficulty>()
        .map_err(|e| e.to_string())?;

    position::parse(text, config.max_position_len).map_err(|e| e.to_string())
}

pub async fn invoke(engine: &StockfishEngine, config: &Config, request: &InvokeRequest) -> InvokeResponse {
    let position = match check_request(request, config) {
        Ok(position) => position,
        Err(message) => {
            warn!("refusing invocation: {message}");
            return InvokeResponse::bad_input(message);
        }
    };

    let params = SearchParams::for_tier(&request.difficulty);
    match engine.best_move(&position, params).await {
        Ok(best) => match best.best_move {
            Some(best_move) => {
                info!("invocation answered {best_move} for {position}");
                InvokeResponse::Ok {
                    best_move,
                    evaluation: best.evaluation,
                }
            }
            None => InvokeResponse::backend_failure("engine found no move in this position"),
        },
        Err(e) => {
            warn!("invocation failed: {e}");
            InvokeResponse::backend_failure(e.to_string())
        }
    }
}
