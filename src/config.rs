use std::{env, str::FromStr, time::Duration};

use crate::state::{Colour, Difficulty};

/// Which backend answers with the opponent's moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpponentKind {
    Engine,
    Oracle,
}

/// How human moves are checked before the opponent is asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorKind {
    Rules,
    Generative,
}

/// Process-wide settings. Built once in `main` and handed to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub opponent: OpponentKind,
    pub validator: ValidatorKind,

    pub engine_path: String,
    pub engine_args: Vec<String>,
    pub engine_timeout: Duration,

    pub oracle_url: String,
    pub oracle_model: String,
    pub oracle_api_key: String,
    pub http_timeout: Duration,

    pub lock_timeout: Duration,
    pub min_backend_interval: Duration,

    pub default_difficulty: Difficulty,
    pub default_colour: Colour,

    pub max_position_len: usize,
    pub max_move_len: usize,
    pub max_history: usize,
    pub max_comment_len: usize,
    pub max_result_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            opponent: OpponentKind::Engine,
            validator: ValidatorKind::Rules,
            engine_path: "stockfish".to_string(),
            engine_args: Vec::new(),
            engine_timeout: Duration::from_secs(60),
            oracle_url: "https://api.openai.com/v1/chat/completions".to_string(),
            oracle_model: "gpt-4o-mini".to_string(),
            oracle_api_key: String::new(),
            http_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(15),
            min_backend_interval: Duration::from_secs(2),
            default_difficulty: Difficulty::Medium,
            default_colour: Colour::White,
            max_position_len: 100,
            max_move_len: 10,
            max_history: 600,
            max_comment_len: 500,
            max_result_len: 32,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let mut config = Config::from_lookup(|key| env::var(key).ok())?;

        // same fallback as the bot token: a file named after the variable in the cwd
        if config.oracle_api_key.is_empty() {
            let path = env::current_dir()?.join("MAIL_CHESS_ORACLE_API_KEY");
            if let Ok(key) = std::fs::read_to_string(path) {
                config.oracle_api_key = key.trim().to_string();
            }
        }
        Ok(config)
    }

    /// Builds a config from an arbitrary key lookup. Absent or blank values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match get(key) {
                Some(v) => Ok(Duration::from_secs(v.parse().map_err(|_| {
                    anyhow::anyhow!("{key} must be a whole number of seconds, got '{v}'")
                })?)),
                None => Ok(default),
            }
        };

        let mut config = Config::default();

        if let Some(v) = get("MAIL_CHESS_OPPONENT") {
            config.opponent = match v.to_lowercase().as_str() {
                "engine" => OpponentKind::Engine,
                "oracle" => OpponentKind::Oracle,
                other => anyhow::bail!("MAIL_CHESS_OPPONENT must be 'engine' or 'oracle', got '{other}'"),
            };
        }
        if let Some(v) = get("MAIL_CHESS_VALIDATOR") {
            config.validator = match v.to_lowercase().as_str() {
                "rules" => ValidatorKind::Rules,
                "generative" => ValidatorKind::Generative,
                other => anyhow::bail!(
                    "MAIL_CHESS_VALIDATOR must be 'rules' or 'generative', got '{other}'"
                ),
            };
        }
        if let Some(v) = get("MAIL_CHESS_ENGINE_PATH") {
            config.engine_path = v;
        }
        if let Some(v) = get("MAIL_CHESS_ENGINE_ARGS") {
            config.engine_args = v.split_whitespace().map(str::to_string).collect();
        }
        config.engine_timeout = secs("MAIL_CHESS_ENGINE_TIMEOUT_SECS", config.engine_timeout)?;

        if let Some(v) = get("MAIL_CHESS_ORACLE_URL") {
            config.oracle_url = v;
        }
        if let Some(v) = get("MAIL_CHESS_ORACLE_MODEL") {
            config.oracle_model = v;
        }
        if let Some(v) = get("MAIL_CHESS_ORACLE_API_KEY") {
            config.oracle_api_key = v;
        }
        config.http_timeout = secs("MAIL_CHESS_HTTP_TIMEOUT_SECS", config.http_timeout)?;
        config.lock_timeout = secs("MAIL_CHESS_LOCK_TIMEOUT_SECS", config.lock_timeout)?;
        config.min_backend_interval = secs(
            "MAIL_CHESS_MIN_BACKEND_INTERVAL_SECS",
            config.min_backend_interval,
        )?;

        if let Some(v) = get("MAIL_CHESS_DIFFICULTY") {
            config.default_difficulty = Difficulty::from_str(&v)?;
        }
        if let Some(v) = get("MAIL_CHESS_HUMAN_COLOUR") {
            config.default_colour = Colour::from_str(&v)?;
        }

        Ok(config)
    }
}
