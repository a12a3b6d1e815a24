use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;

use super::{AcceptedMove, MoveValidator, Verdict, check_token};
use crate::{
    config::Config,
    error::{Backend, BackendError, TurnError, TurnResult},
    llm::{TextGenerator, strip_code_fence},
    position::{self, Position},
    util::truncate_chars,
};

const SYSTEM_PROMPT: &str = "You are a strict chess arbiter. You are given a position in FEN, \
the moves played so far and a proposed move for the side to move. Decide whether the move is \
legal. Reply with exactly one JSON object and nothing else. If the move is legal reply \
{\"valid\": true, \"fen\": \"<FEN after the move>\", \"move\": \"<move in standard algebraic notation>\"}. \
If it is illegal reply {\"valid\": false, \"reason\": \"<short explanation>\"}.";

const GENERIC_FAILURE: &str = "could not process move";

/// Asks the text backend whether a move is legal. Its position is re-checked before it is trusted.
pub struct GenerativeValidator {
    config: Arc<Config>,
    generator: Arc<dyn TextGenerator>,
}

impl GenerativeValidator {
    pub fn new(config: Arc<Config>, generator: Arc<dyn TextGenerator>) -> GenerativeValidator {
        GenerativeValidator { config, generator }
    }

    fn interpret(&self, reply: &str) -> Result<Verdict, BackendError> {
        let body = strip_code_fence(reply);
        let parse_error = |reason: &str| BackendError::Parse {
            reason: reason.to_string(),
            received: truncate_chars(reply, 200),
        };

        let value: Value =
            serde_json::from_str(body).map_err(|e| parse_error(&format!("not JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| parse_error("expected a JSON object"))?;
        let valid = object
            .get("valid")
            .and_then(Value::as_bool)
            .ok_or_else(|| parse_error("missing boolean 'valid'"))?;

        if !valid {
            let reason = object
                .get("reason")
                .and_then(Value::as_str)
                .map(|r| truncate_chars(r.trim(), self.config.max_comment_len))
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "that move is not legal here".to_string());
            return Ok(Verdict::Rejected { reason });
        }

        let fen = object.get("fen").and_then(Value::as_str).unwrap_or_default();
        let next = match position::parse(fen, self.config.max_position_len) {
            Ok(next) => next,
            Err(e) => {
                warn!("validator backend returned an unusable position: {e}");
                return Ok(Verdict::Rejected {
                    reason: GENERIC_FAILURE.to_string(),
                });
            }
        };
        let display = object
            .get("move")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty() && m.chars().count() <= self.config.max_move_len)
            .map(str::to_string);
        let Some(display) = display else {
            return Ok(Verdict::Rejected {
                reason: GENERIC_FAILURE.to_string(),
            });
        };

        Ok(Verdict::Accepted(AcceptedMove {
            display,
            position: next,
            game_end: None,
        }))
    }
}

#[async_trait]
impl MoveValidator for GenerativeValidator {
    fn backend(&self) -> Option<Backend> {
        Some(Backend::Validator)
    }

    async fn validate(
        &self,
        position: &Position,
        history: &[String],
        token: &str,
    ) -> TurnResult<Verdict> {
        check_token(token, self.config.max_move_len)?;
        let token = token.trim();

        let history = if history.is_empty() {
            "(none)".to_string()
        } else {
            history.join(" ")
        };
        let prompt = format!(
            "Position (FEN): {position}\nMoves so far: {history}\nProposed move: {token}"
        );

        let reply = self
            .generator
            .generate(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| TurnError::backend(Backend::Validator, e))?;
        debug!("validator backend verdict for '{token}': {reply}");

        self.interpret(&reply)
            .map_err(|e| TurnError::backend(Backend::Validator, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{llm::testing::ScriptedGenerator, position::START_POSITION};

    fn setup(replies: Vec<Result<&str, &str>>) -> (GenerativeValidator, Arc<ScriptedGenerator>) {
        let generator = Arc::new(ScriptedGenerator::new(replies));
        let validator = GenerativeValidator::new(Arc::new(Config::default()), generator.clone());
        (validator, generator)
    }

    fn start() -> Position {
        position::parse(START_POSITION, 100).unwrap()
    }

    #[tokio::test]
    async fn accepts_conforming_verdict() {
        let (validator, generator) = setup(vec![Ok(
            "```json\n{\"valid\": true, \"fen\": \"rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1\", \"move\": \"e4\"}\n```",
        )]);
        let verdict = validator.validate(&start(), &[], "e4").await.unwrap();
        let Verdict::Accepted(accepted) = verdict else {
            panic!("rejected");
        };
        assert_eq!(accepted.display, "e4");
        assert_eq!(accepted.position.side_to_move(), crate::state::Colour::Black);

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].1.contains(START_POSITION));
        assert!(prompts[0].1.contains("Proposed move: e4"));
    }

    #[tokio::test]
    async fn passes_on_backend_reason() {
        let (validator, _) = setup(vec![Ok(
            "{\"valid\": false, \"reason\": \"the bishop on f1 is blocked\"}",
        )]);
        let verdict = validator.validate(&start(), &[], "Bc4").await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Rejected {
                reason: "the bishop on f1 is blocked".into()
            }
        );
    }

    #[tokio::test]
    async fn invalid_position_is_a_generic_rejection() {
        let (validator, _) = setup(vec![Ok(
            "{\"valid\": true, \"fen\": \"rnbqkbnr/pppppppp/8/8/4P3 b KQkq - 0 1\", \"move\": \"e4\"}",
        )]);
        let verdict = validator.validate(&start(), &[], "e4").await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Rejected {
                reason: GENERIC_FAILURE.into()
            }
        );
    }

    #[tokio::test]
    async fn non_json_is_a_backend_failure() {
        let (validator, _) = setup(vec![Ok("Yes, e4 is a fine move!")]);
        let err = validator.validate(&start(), &[], "e4").await.unwrap_err();
        assert!(matches!(
            err,
            TurnError::Backend {
                backend: Backend::Validator,
                source: BackendError::Parse { .. }
            }
        ));
    }

    #[tokio::test]
    async fn overlong_move_never_reaches_backend() {
        let (validator, generator) = setup(vec![]);
        let err = validator
            .validate(&start(), &[], "Nf3Nf3Nf3Nf3")
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Input(_)));
        assert_eq!(generator.calls(), 0);
    }
}
