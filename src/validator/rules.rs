use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use log::debug;
use shakmaty::{
    Bitboard, CastlingMode, Chess, Color, EnPassantMode, Move, Position as _, Role,
    attacks::attacks,
    fen::Fen,
    san::{San, SanError},
    uci::UciMove,
};

use super::{AcceptedMove, GameEnd, MoveValidator, Verdict, check_token};
use crate::{
    config::Config,
    error::{Backend, TurnResult},
    position::{self, Position},
    util::{is_coordinate_move, parse_uci_move},
};

/// Legality from shakmaty; the resulting position is computed, never asked for.
pub struct RulesValidator {
    config: Arc<Config>,
}

impl RulesValidator {
    pub fn new(config: Arc<Config>) -> RulesValidator {
        RulesValidator { config }
    }
}

#[async_trait]
impl MoveValidator for RulesValidator {
    fn backend(&self) -> Option<Backend> {
        None
    }

    async fn validate(
        &self,
        position: &Position,
        _history: &[String],
        token: &str,
    ) -> TurnResult<Verdict> {
        check_token(token, self.config.max_move_len)?;
        let token = token.trim();

        let game = match load_position(position) {
            Ok(game) => game,
            Err(reason) => {
                return Ok(Verdict::Rejected {
                    reason: format!("the current position cannot be played from: {reason}"),
                });
            }
        };
        if let Some(end) = game_end(&game) {
            return Ok(Verdict::Rejected {
                reason: format!("the game is already over ({})", end.reason),
            });
        }

        match resolve(&game, token) {
            Ok(m) => Ok(apply(game, m, self.config.max_position_len)),
            Err(reason) => {
                debug!("rejected '{token}' in {position}: {reason}");
                Ok(Verdict::Rejected { reason })
            }
        }
    }
}

pub fn load_position(position: &Position) -> Result<Chess, String> {
    let fen = Fen::from_str(position.as_str()).map_err(|e| e.to_string())?;
    fen.into_position(CastlingMode::Standard)
        .map_err(|e| e.to_string())
}

/// Plays an engine's square-pair move. `Err` carries why it does not fit the position.
pub fn play_uci(position: &Position, uci: &str, max_position_len: usize) -> Result<AcceptedMove, String> {
    let game = load_position(position)?;
    let uci_move = parse_uci_move(uci).map_err(|e| e.to_string())?;
    let m = uci_move.to_move(&game).map_err(|e| e.to_string())?;
    match apply(game, m, max_position_len) {
        Verdict::Accepted(accepted) => Ok(accepted),
        Verdict::Rejected { reason } => Err(reason),
    }
}

pub fn game_end(game: &Chess) -> Option<GameEnd> {
    if game.is_checkmate() {
        let result = match game.turn() {
            Color::White => "0-1",
            Color::Black => "1-0",
        };
        Some(GameEnd {
            result: result.to_string(),
            reason: "checkmate".to_string(),
        })
    } else if game.is_stalemate() {
        Some(GameEnd {
            result: "1/2-1/2".to_string(),
            reason: "stalemate".to_string(),
        })
    } else if game.is_insufficient_material() {
        Some(GameEnd {
            result: "1/2-1/2".to_string(),
            reason: "insufficient material".to_string(),
        })
    } else {
        None
    }
}

fn apply(mut game: Chess, m: Move, max_position_len: usize) -> Verdict {
    let san = San::from_move(&game, m);
    game.play_unchecked(m);

    let suffix = if game.is_checkmate() {
        "#"
    } else if game.is_check() {
        "+"
    } else {
        ""
    };
    let fen = Fen::from_position(&game, EnPassantMode::Legal).to_string();

    match position::parse(&fen, max_position_len) {
        Ok(next) => Verdict::Accepted(AcceptedMove {
            display: format!("{san}{suffix}"),
            position: next,
            game_end: game_end(&game),
        }),
        Err(e) => Verdict::Rejected {
            reason: format!("could not process move: {e}"),
        },
    }
}

fn resolve(game: &Chess, token: &str) -> Result<Move, String> {
    if is_coordinate_move(token) {
        let uci = UciMove::from_str(&token.to_lowercase())
            .map_err(|_| format!("'{token}' is not a move I can read"))?;
        return uci
            .to_move(game)
            .map_err(|_| explain_illegal_uci(game, &uci, token));
    }

    let cleaned = token
        .trim_end_matches(['+', '#', '!', '?'])
        .replace('0', "O");
    let san = San::from_str(&cleaned).map_err(|_| format!("'{token}' is not a move I can read"))?;
    san.to_move(game).map_err(|e| match e {
        SanError::AmbiguousSan => format!(
            "{token} is ambiguous: more than one piece can make that move, add its file or rank"
        ),
        _ => explain_illegal_san(game, &san, token),
    })
}

fn role_name(role: Role) -> String {
    format!("{role:?}").to_lowercase()
}

fn explain_illegal_san(game: &Chess, san: &San, token: &str) -> String {
    let us = game.turn();
    let board = game.board();

    let (role, to) = match san {
        San::Normal { role, to, .. } => (*role, *to),
        San::Castle(side) => {
            return format!(
                "{token} is illegal: castling {} is not available in this position",
                format!("{side:?}").to_lowercase()
            );
        }
        _ => return format!("{token} is not a legal move here"),
    };

    let ours = board.by_piece(role.of(us));
    if ours.is_empty() {
        return format!("{token} is illegal: you have no {} left", role_name(role));
    }
    if board.color_at(to) == Some(us) {
        return format!("{token} is illegal: {to} is occupied by one of your own pieces");
    }
    if role != Role::Pawn {
        let mut reachable_on_empty = false;
        let mut reachable = false;
        for from in ours {
            let piece = role.of(us);
            reachable_on_empty |= attacks(from, piece, Bitboard::EMPTY).contains(to);
            reachable |= attacks(from, piece, board.occupied()).contains(to);
        }
        if reachable_on_empty && !reachable {
            return format!("{token} is illegal: the path to {to} is blocked");
        }
        if reachable && !game.is_check() {
            return format!("{token} is illegal: it would leave your king in check");
        }
    }
    if game.is_check() {
        return format!("{token} is illegal: your king is in check and this does not resolve it");
    }
    format!(
        "{token} is illegal: no {} of yours can move to {to}",
        role_name(role)
    )
}

fn explain_illegal_uci(game: &Chess, uci: &UciMove, token: &str) -> String {
    let us = game.turn();
    if let UciMove::Normal { from, to, .. } = uci {
        match game.board().piece_at(*from) {
            None => return format!("{token} is illegal: there is no piece on {from}"),
            Some(piece) if piece.color != us => {
                return format!(
                    "{token} is illegal: the piece on {from} is not yours, it is {}'s turn",
                    if us == Color::White { "white" } else { "black" }
                );
            }
            Some(piece) => {
                if game.board().color_at(*to) == Some(us) {
                    return format!(
                        "{token} is illegal: {to} is occupied by one of your own pieces"
                    );
                }
                if game.is_check() {
                    return format!(
                        "{token} is illegal: your king is in check and this does not resolve it"
                    );
                }
                return format!(
                    "{token} is illegal: your {} on {from} cannot move to {to}",
                    role_name(piece.role)
                );
            }
        }
    }
    format!("{token} is not a legal move here")
}
