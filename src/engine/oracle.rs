use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value};

use super::{MoveSource, OpponentMove, OpponentRequest};
use crate::{
    config::Config,
    error::{Backend, BackendError},
    llm::{TextGenerator, strip_code_fence},
    position,
    state::{Colour, Difficulty},
    util::truncate_chars,
    validator::GameEnd,
};

fn play_style(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => {
            "Play like a casual club beginner: prefer simple developing moves, \
             occasionally miss tactics, never look deeper than two moves."
        }
        Difficulty::Medium => {
            "Play like a solid club player: develop sensibly, punish obvious blunders \
             and look for basic tactics."
        }
        Difficulty::Hard => {
            "Play as strongly as you can, like a titled player: calculate concrete \
             lines and choose the objectively best move."
        }
    }
}

fn system_prompt(difficulty: Difficulty, colour: Colour) -> String {
    format!(
        "You are playing a correspondence chess game as {colour}. {style}\n\
         You are given the current position in FEN and the moves so far. Choose one legal \
         move for {colour}. Reply with exactly one JSON object and nothing else, with the fields:\n\
         \"move\": your move in standard algebraic notation,\n\
         \"fen\": the full FEN of the position after your move,\n\
         \"comment\": one or two sentences to your opponent about the game,\n\
         \"gameOver\": true if your move ends the game, otherwise false,\n\
         \"result\": \"1-0\", \"0-1\" or \"1/2-1/2\" when the game is over, otherwise \"\".",
        style = play_style(difficulty),
    )
}

/// A text-generation backend acting as the opponent.
pub struct MoveOracle {
    config: Arc<Config>,
    generator: Arc<dyn TextGenerator>,
}

impl MoveOracle {
    pub fn new(config: Arc<Config>, generator: Arc<dyn TextGenerator>) -> MoveOracle {
        MoveOracle { config, generator }
    }

    /// Accepts exactly one JSON object (optionally fenced); anything else fails the whole reply.
    fn parse_reply(&self, reply: &str, colour: Colour) -> Result<OpponentMove, BackendError> {
        let parse_error = |reason: &str| BackendError::Parse {
            reason: reason.to_string(),
            received: truncate_chars(reply, 200),
        };

        let value: Value = serde_json::from_str(strip_code_fence(reply))
            .map_err(|e| parse_error(&format!("not JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| parse_error("expected a JSON object"))?;

        let display = match object.get("move") {
            Some(Value::String(m)) if !m.trim().is_empty() => m.trim().to_string(),
            _ => return Err(parse_error("missing or non-string 'move'")),
        };
        if display.chars().count() > self.config.max_move_len {
            return Err(parse_error("'move' is too long"));
        }

        let fen = match object.get("fen") {
            Some(Value::String(f)) => f,
            _ => return Err(parse_error("missing or non-string 'fen'")),
        };
        let next = position::parse(fen, self.config.max_position_len)
            .map_err(|_| BackendError::InvalidPosition(truncate_chars(fen, 120)))?;
        if next.side_to_move() == colour {
            return Err(parse_error("position after the move still has the oracle to move"));
        }

        let comment = optional_string(object, "comment")
            .map_err(|r| parse_error(&r))?
            .map(|c| truncate_chars(c.trim(), self.config.max_comment_len))
            .filter(|c| !c.is_empty());

        let game_over = match object.get("gameOver") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(parse_error("'gameOver' is not a boolean")),
        };
        let result = optional_string(object, "result")
            .map_err(|r| parse_error(&r))?
            .map(|r| truncate_chars(r.trim(), self.config.max_result_len))
            .filter(|r| !r.is_empty());

        let game_end = game_over.then(|| GameEnd {
            result: result.unwrap_or_else(|| "*".to_string()),
            reason: "declared by the opponent".to_string(),
        });

        Ok(OpponentMove {
            display: Some(display),
            position: next,
            comment,
            evaluation: None,
            game_end,
        })
    }
}

fn optional_string<'a>(object: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, String> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(format!("'{key}' is not a string")),
    }
}

#[async_trait]
impl MoveSource for MoveOracle {
    fn backend(&self) -> Backend {
        Backend::Oracle
    }

    async fn produce_move(&self, request: &OpponentRequest<'_>) -> Result<OpponentMove, BackendError> {
        let system = system_prompt(request.difficulty, request.colour);
        let history = if request.history.is_empty() {
            "(none, this is the first move)".to_string()
        } else {
            request.history.join(" ")
        };
        let prompt = format!(
            "Current position (FEN): {}\nMoves so far: {history}\nYour move as {}.",
            request.position, request.colour
        );

        let reply = self.generator.generate(&system, &prompt).await?;
        debug!("oracle replied: {reply}");

        let parsed = self.parse_reply(&reply, request.colour)?;
        info!(
            "oracle chose {} (game over: {})",
            parsed.display.as_deref().unwrap_or("-"),
            parsed.game_end.is_some()
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm::testing::ScriptedGenerator,
        position::{Position, START_POSITION},
    };

    const AFTER_E4_E5: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2";

    fn oracle(replies: Vec<Result<&str, &str>>) -> (MoveOracle, Arc<ScriptedGenerator>) {
        let generator = Arc::new(ScriptedGenerator::new(replies));
        (
            MoveOracle::new(Arc::new(Config::default()), generator.clone()),
            generator,
        )
    }

    fn after_e4() -> Position {
        position::parse(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
            100,
        )
        .unwrap()
    }

    async fn ask(oracle: &MoveOracle) -> Result<OpponentMove, BackendError> {
        let position = after_e4();
        let history = vec!["1.e4".to_string()];
        oracle
            .produce_move(&OpponentRequest {
                position: &position,
                history: &history,
                difficulty: Difficulty::Hard,
                colour: Colour::Black,
            })
            .await
    }

    #[tokio::test]
    async fn accepts_fenced_reply() {
        let reply = format!(
            "```json\n{{\"move\": \"e5\", \"fen\": \"{AFTER_E4_E5}\", \"comment\": \"Classical.\", \"gameOver\": false, \"result\": \"\"}}\n```"
        );
        let (oracle, generator) = oracle(vec![Ok(&reply)]);
        let reply = ask(&oracle).await.unwrap();
        assert_eq!(reply.display.as_deref(), Some("e5"));
        assert_eq!(reply.position.as_str(), AFTER_E4_E5);
        assert_eq!(reply.comment.as_deref(), Some("Classical."));
        assert_eq!(reply.game_end, None);

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("as black"));
        assert!(prompts[0].0.contains("titled player"));
        assert!(prompts[0].1.contains("1.e4"));
    }

    #[tokio::test]
    async fn not_json_fails() {
        let (oracle, _) = oracle(vec![Ok("not json")]);
        assert!(matches!(ask(&oracle).await, Err(BackendError::Parse { .. })));
    }

    #[tokio::test]
    async fn prose_around_json_fails() {
        let reply = format!("Here you go: {{\"move\": \"e5\", \"fen\": \"{AFTER_E4_E5}\"}}");
        let (oracle, _) = oracle(vec![Ok(&reply)]);
        assert!(matches!(ask(&oracle).await, Err(BackendError::Parse { .. })));
    }

    #[tokio::test]
    async fn missing_or_non_string_move_fails() {
        let no_move = format!("{{\"fen\": \"{AFTER_E4_E5}\"}}");
        let numeric = format!("{{\"move\": 5, \"fen\": \"{AFTER_E4_E5}\"}}");
        let (oracle, _) = oracle(vec![Ok(&no_move), Ok(&numeric)]);
        assert!(matches!(ask(&oracle).await, Err(BackendError::Parse { .. })));
        assert!(matches!(ask(&oracle).await, Err(BackendError::Parse { .. })));
    }

    #[tokio::test]
    async fn invalid_position_fails() {
        let (oracle, _) = oracle(vec![
            Ok("{\"move\": \"e5\", \"fen\": \"rnbqkbnr/pppp1ppp/8/4p3/4P3 w KQkq - 0 2\"}"),
            Ok(&format!("{{\"move\": \"e5\", \"fen\": \"{START_POSITION}\"}}").replace(" w ", " b ")),
        ]);
        assert!(matches!(ask(&oracle).await, Err(BackendError::InvalidPosition(_))));
        // still black to move after black's reply
        assert!(matches!(ask(&oracle).await, Err(BackendError::Parse { .. })));
    }

    #[tokio::test]
    async fn caps_comment_and_trusts_game_over() {
        let long = "x".repeat(2000);
        let reply = format!(
            "{{\"move\": \"Qxf7#\", \"fen\": \"{AFTER_E4_E5}\", \"comment\": \"{long}\", \"gameOver\": true, \"result\": \"0-1\"}}"
        );
        let (oracle, _) = oracle(vec![Ok(&reply)]);
        let reply = ask(&oracle).await.unwrap();
        assert_eq!(reply.comment.map(|c| c.len()), Some(500));
        assert_eq!(
            reply.game_end,
            Some(GameEnd {
                result: "0-1".into(),
                reason: "declared by the opponent".into()
            })
        );
    }

    #[tokio::test]
    async fn transport_errors_surface() {
        let (oracle, _) = oracle(vec![Err("connection reset")]);
        assert!(matches!(ask(&oracle).await, Err(BackendError::Transport(_))));
    }
}
