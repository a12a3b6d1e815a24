use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::InputError,
    position::{self, Position},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colour {
    White,
    Black,
}

impl Colour {
    pub fn opposite(self) -> Colour {
        match self {
            Colour::White => Colour::Black,
            Colour::Black => Colour::White,
        }
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Colour::White => write!(f, "white"),
            Colour::Black => write!(f, "black"),
        }
    }
}

impl FromStr for Colour {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "white" | "w" => Ok(Colour::White),
            "black" | "b" => Ok(Colour::Black),
            _ => Err(InputError::UnknownColour(s.to_string())),
        }
    }
}

/// Strength tier. The wire names `tier1`..`tier3` are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" | "tier1" => Ok(Difficulty::Easy),
            "medium" | "tier2" => Ok(Difficulty::Medium),
            "hard" | "tier3" => Ok(Difficulty::Hard),
            _ => Err(InputError::UnknownDifficulty(s.to_string())),
        }
    }
}

/// The single active match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub position: Position,
    pub move_history: Vec<String>,
    pub active: bool,
    pub ply_number: u32,
    pub difficulty: Difficulty,
    pub human_colour: Colour,
    pub conversation_ref: String,
    pub last_consumed_count: usize,
    pub paused: bool,
    pub game_token: String,
}

impl Default for GameState {
    fn default() -> Self {
        GameState {
            position: Position::start(),
            move_history: Vec::new(),
            active: false,
            ply_number: 1,
            difficulty: Difficulty::Medium,
            human_colour: Colour::White,
            conversation_ref: String::new(),
            last_consumed_count: 0,
            paused: false,
            game_token: String::new(),
        }
    }
}

impl GameState {
    /// A fresh game; everything from the previous one is dropped.
    pub fn new_game(difficulty: Difficulty, human_colour: Colour) -> GameState {
        GameState {
            active: true,
            difficulty,
            human_colour,
            game_token: uuid::Uuid::new_v4().to_string(),
            ..GameState::default()
        }
    }

    pub fn opponent_colour(&self) -> Colour {
        self.human_colour.opposite()
    }

    pub fn is_human_to_move(&self) -> bool {
        self.position.side_to_move() == self.human_colour
    }

    /// Appends one ply played from the current position and moves to `next`.
    ///
    /// White plies are written `N.move`, black plies `N...move`; the move number
    /// advances after black's ply, so it counts pairs no matter who started.
    pub fn record_ply(&mut self, display: &str, next: Position, max_history: usize) {
        let entry = match self.position.side_to_move() {
            Colour::White => format!("{}.{}", self.ply_number, display),
            Colour::Black => format!("{}...{}", self.ply_number, display),
        };
        if self.position.side_to_move() == Colour::Black {
            self.ply_number += 1;
        }
        self.move_history.push(entry);
        if self.move_history.len() > max_history {
            let excess = self.move_history.len() - max_history;
            self.move_history.drain(..excess);
        }
        self.position = next;
    }

    pub fn history_line(&self) -> String {
        self.move_history.join(" ")
    }

    /// Flat name/value layout used by the stores.
    pub fn to_record(&self) -> BTreeMap<String, String> {
        let mut record = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            record.insert(k.to_string(), v);
        };
        put("position", self.position.to_string());
        put("moveHistory", self.move_history.join(" "));
        put("active", self.active.to_string());
        put("plyNumber", self.ply_number.to_string());
        put("difficulty", self.difficulty.to_string());
        put("humanColour", self.human_colour.to_string());
        put("conversationRef", self.conversation_ref.clone());
        put("lastConsumedCount", self.last_consumed_count.to_string());
        put("paused", self.paused.to_string());
        put("gameToken", self.game_token.clone());
        record
    }

    /// Reads the flat layout back. Absent, empty or unreadable fields fall back to
    /// their defaults; the position falls back to the standard start.
    pub fn from_record(record: &BTreeMap<String, String>, max_position_len: usize) -> GameState {
        let defaults = GameState::default();
        let field = |k: &str| record.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());

        GameState {
            position: field("position")
                .and_then(|v| position::parse(v, max_position_len).ok())
                .unwrap_or(defaults.position),
            move_history: field("moveHistory")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            active: field("active")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.active),
            ply_number: field("plyNumber")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(defaults.ply_number),
            difficulty: field("difficulty")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.difficulty),
            human_colour: field("humanColour")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.human_colour),
            conversation_ref: field("conversationRef")
                .map(str::to_string)
                .unwrap_or_default(),
            last_consumed_count: field("lastConsumedCount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.last_consumed_count),
            paused: field("paused")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.paused),
            game_token: field("gameToken").map(str::to_string).unwrap_or_default(),
        }
    }
}
