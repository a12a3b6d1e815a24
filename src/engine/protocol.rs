//! The engine's line protocol as a state machine fed one output line at a time.
//!
//! Nothing in here touches a process or a clock; the driver in `stockfish.rs`
//! owns the I/O and the deadline.

use std::fmt;

use serde::Serialize;

use crate::{error::BackendError, state::Difficulty, util::is_coordinate_move};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    Ready,
    Searching,
    Done,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Handshake => "handshake",
            Phase::Ready => "ready",
            Phase::Searching => "searching",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    Cp,
    Mate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub kind: ScoreKind,
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub skill: u8,
    pub depth: u32,
}

impl SearchParams {
    pub fn for_difficulty(difficulty: Difficulty) -> SearchParams {
        match difficulty {
            Difficulty::Easy => SearchParams { skill: 3, depth: 5 },
            Difficulty::Medium => SearchParams { skill: 10, depth: 10 },
            Difficulty::Hard => SearchParams { skill: 20, depth: 15 },
        }
    }

    /// Lookup by name; anything unrecognized gets the medium tier.
    pub fn for_tier(name: &str) -> SearchParams {
        SearchParams::for_difficulty(name.parse().unwrap_or(Difficulty::Medium))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMove {
    /// `None` when the engine answered `bestmove (none)`.
    pub best_move: Option<String>,
    pub ponder: Option<String>,
    pub evaluation: Option<Evaluation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Send(Vec<String>),
    Wait,
    Finished(BestMove),
}

pub struct UciSession {
    phase: Phase,
    position: String,
    params: SearchParams,
    output: Vec<String>,
}

impl UciSession {
    pub fn new(position: &str, params: SearchParams) -> UciSession {
        UciSession {
            phase: Phase::Handshake,
            position: position.to_string(),
            params,
            output: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn start(&self) -> Vec<String> {
        vec!["uci".to_string()]
    }

    pub fn abort(&mut self) {
        self.phase = Phase::Aborted;
    }

    pub fn feed(&mut self, line: &str) -> Result<Step, BackendError> {
        let line = line.trim();
        match self.phase {
            Phase::Handshake => {
                if line == "uciok" {
                    self.phase = Phase::Ready;
                    return Ok(Step::Send(vec![
                        format!("setoption name Skill Level value {}", self.params.skill),
                        "setoption name Threads value 1".to_string(),
                        "ucinewgame".to_string(),
                        "isready".to_string(),
                    ]));
                }
                Ok(Step::Wait)
            }
            Phase::Ready => {
                if line == "readyok" {
                    self.phase = Phase::Searching;
                    return Ok(Step::Send(vec![
                        format!("position fen {}", self.position),
                        format!("go depth {}", self.params.depth),
                    ]));
                }
                Ok(Step::Wait)
            }
            Phase::Searching => {
                if line.starts_with("bestmove") {
                    let best = self.parse_best_move(line)?;
                    self.phase = Phase::Done;
                    return Ok(Step::Finished(best));
                }
                self.output.push(line.to_string());
                Ok(Step::Wait)
            }
            Phase::Done | Phase::Aborted => Err(BackendError::Protocol {
                phase: self.phase.to_string(),
                line: line.to_string(),
            }),
        }
    }

    fn parse_best_move(&mut self, line: &str) -> Result<BestMove, BackendError> {
        let mut tokens = line.split_whitespace();
        let malformed = |session: &mut UciSession| {
            let err = BackendError::Protocol {
                phase: session.phase.to_string(),
                line: line.to_string(),
            };
            session.abort();
            err
        };

        if tokens.next() != Some("bestmove") {
            return Err(malformed(self));
        }
        let best_move = match tokens.next() {
            Some("(none)") | Some("0000") => None,
            Some(m) if is_coordinate_move(m) => Some(m.to_string()),
            _ => return Err(malformed(self)),
        };
        let ponder = match (tokens.next(), tokens.next()) {
            (None, _) => None,
            (Some("ponder"), Some(p)) if is_coordinate_move(p) => Some(p.to_string()),
            _ => return Err(malformed(self)),
        };

        // the last score line before bestmove is the one that counts
        let evaluation = self.output.iter().rev().find_map(|l| parse_score(l));

        Ok(BestMove {
            best_move,
            ponder,
            evaluation,
        })
    }
}

/// Pulls `score cp N` / `score mate N` out of an `info` line.
pub fn parse_score(line: &str) -> Option<Evaluation> {
    let mut tokens = line.split_whitespace().skip_while(|t| *t != "score");
    tokens.next()?;
    let kind = match tokens.next()? {
        "cp" => ScoreKind::Cp,
        "mate" => ScoreKind::Mate,
        _ => return None,
    };
    let value = tokens.next()?.parse().ok()?;
    Some(Evaluation { kind, value })
}
