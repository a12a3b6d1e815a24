use std::{io::ErrorKind, process::Stdio, sync::Arc};

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    process::Command,
    time::timeout,
};

use super::{
    MoveSource, OpponentMove, OpponentRequest,
    protocol::{BestMove, Phase, SearchParams, Step, UciSession},
};
use crate::{
    config::Config,
    error::{Backend, BackendError},
    position::Position,
    validator::{game_end, load_position, play_uci},
};

/// A UCI engine started fresh for every search.
pub struct StockfishEngine {
    config: Arc<Config>,
}

impl StockfishEngine {
    pub fn new(config: Arc<Config>) -> StockfishEngine {
        StockfishEngine { config }
    }

    /// Runs one full handshake and search against a new engine process.
    pub async fn best_move(
        &self,
        position: &Position,
        params: SearchParams,
    ) -> Result<BestMove, BackendError> {
        let mut child = Command::new(&self.config.engine_path)
            .args(&self.config.engine_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                path: self.config.engine_path.clone(),
                source,
            })?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BackendError::UnexpectedExit {
                phase: "startup".into(),
            });
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut session = UciSession::new(position.as_str(), params);

        debug!(
            "engine search: skill {} depth {} on {position}",
            params.skill, params.depth
        );
        let outcome = timeout(
            self.config.engine_timeout,
            drive(&mut session, &mut stdin, &mut lines),
        )
        .await;

        let result = match outcome {
            Ok(Ok(best)) => {
                if let Some(ponder) = &best.ponder {
                    trace!("engine expects {ponder} in reply");
                }
                // polite shutdown; the process is killed below either way
                if let Err(e) = send(&mut stdin, &["quit".to_string()], session.phase()).await {
                    trace!("engine did not take quit: {e}");
                }
                Ok(best)
            }
            Ok(Err(e)) => {
                session.abort();
                Err(e)
            }
            Err(_) => {
                let phase = session.phase();
                session.abort();
                warn!(
                    "engine gave no answer within {:?} (stuck in {phase}), killing it",
                    self.config.engine_timeout
                );
                Err(BackendError::Timeout {
                    phase: phase.to_string(),
                    after: self.config.engine_timeout,
                })
            }
        };

        if let Err(e) = child.kill().await {
            trace!("engine already gone: {e}");
        }
        result
    }
}

async fn drive<W, R>(
    session: &mut UciSession,
    stdin: &mut W,
    lines: &mut Lines<R>,
) -> Result<BestMove, BackendError>
where
    W: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    send(stdin, &session.start(), session.phase()).await?;
    loop {
        let line = lines.next_line().await.map_err(|source| BackendError::Io {
            phase: "reading engine output",
            source,
        })?;
        let Some(line) = line else {
            return Err(BackendError::UnexpectedExit {
                phase: session.phase().to_string(),
            });
        };
        trace!("engine >> {line}");

        match session.feed(&line)? {
            Step::Send(commands) => send(stdin, &commands, session.phase()).await?,
            Step::Wait => {}
            Step::Finished(best) => return Ok(best),
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(
    stdin: &mut W,
    commands: &[String],
    phase: Phase,
) -> Result<(), BackendError> {
    for command in commands {
        trace!("engine << {command}");
        let written = async {
            stdin.write_all(command.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(source) = written {
            return Err(match source.kind() {
                ErrorKind::BrokenPipe => BackendError::UnexpectedExit {
                    phase: phase.to_string(),
                },
                _ => BackendError::Io {
                    phase: "writing engine input",
                    source,
                },
            });
        }
    }
    Ok(())
}

#[async_trait]
impl MoveSource for StockfishEngine {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    async fn produce_move(&self, request: &OpponentRequest<'_>) -> Result<OpponentMove, BackendError> {
        let params = SearchParams::for_difficulty(request.difficulty);
        let best = self.best_move(request.position, params).await?;

        match best.best_move {
            Some(uci) => {
                let accepted = play_uci(request.position, &uci, self.config.max_position_len)
                    .map_err(|reason| {
                        warn!("engine move {uci} does not fit {}: {reason}", request.position);
                        BackendError::IllegalMove(uci.clone())
                    })?;
                info!(
                    "engine chose {} ({uci}), eval {:?}",
                    accepted.display, best.evaluation
                );
                Ok(OpponentMove {
                    display: Some(accepted.display),
                    position: accepted.position,
                    comment: None,
                    evaluation: best.evaluation,
                    game_end: accepted.game_end,
                })
            }
            None => {
                // only acceptable when the position really is over
                let end = load_position(request.position)
                    .ok()
                    .and_then(|game| game_end(&game));
                match end {
                    Some(end) => Ok(OpponentMove {
                        display: None,
                        position: request.position.clone(),
                        comment: None,
                        evaluation: best.evaluation,
                        game_end: Some(end),
                    }),
                    None => Err(BackendError::Protocol {
                        phase: "searching".into(),
                        line: "bestmove (none)".into(),
                    }),
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::{
        engine::protocol::{Evaluation, ScoreKind},
        position,
        state::{Colour, Difficulty},
    };

    const FAKE_ENGINE: &str = r#"while read -r l; do
  case "$l" in
    uci) echo "id name fake"; echo uciok ;;
    isready) echo readyok ;;
    go*) echo "info depth 1 score cp 40 pv e7e5"; echo "info depth 2 score cp 25 pv e7e5"; echo "bestmove e7e5 ponder g1f3" ;;
    quit) exit 0 ;;
  esac
done"#;

    fn engine(path: &str, args: &[&str], timeout_ms: u64) -> StockfishEngine {
        let config = Config {
            engine_path: path.to_string(),
            engine_args: args.iter().map(|a| a.to_string()).collect(),
            engine_timeout: Duration::from_millis(timeout_ms),
            ..Config::default()
        };
        StockfishEngine::new(Arc::new(config))
    }

    fn after_e4() -> Position {
        position::parse(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
            100,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn full_round_trip_with_scripted_engine() {
        let engine = engine("sh", &["-c", FAKE_ENGINE], 5_000);
        let history = vec!["1.e4".to_string()];
        let position = after_e4();
        let request = OpponentRequest {
            position: &position,
            history: &history,
            difficulty: Difficulty::Medium,
            colour: Colour::Black,
        };
        let reply = engine.produce_move(&request).await.unwrap();
        assert_eq!(reply.display.as_deref(), Some("e5"));
        assert_eq!(
            reply.position.as_str(),
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2"
        );
        assert_eq!(
            reply.evaluation,
            Some(Evaluation {
                kind: ScoreKind::Cp,
                value: 25
            })
        );
    }

    #[tokio::test]
    async fn silent_engine_times_out() {
        // cat echoes our commands back and never says uciok
        let engine = engine("cat", &[], 300);
        let started = Instant::now();
        let err = engine
            .best_move(&after_e4(), SearchParams::for_tier("easy"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, BackendError::Timeout { phase, .. } if phase == "handshake"),
            "{err}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn exiting_engine_is_reported() {
        let engine = engine("true", &[], 5_000);
        let err = engine
            .best_move(&after_e4(), SearchParams::for_tier("easy"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnexpectedExit { .. }), "{err}");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let engine = engine("/nonexistent/mail-chess-engine", &[], 1_000);
        let err = engine
            .best_move(&after_e4(), SearchParams::for_tier("easy"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }

    #[tokio::test]
    async fn illegal_engine_move_is_rejected() {
        let script = FAKE_ENGINE.replace("bestmove e7e5", "bestmove e2e4");
        let engine = engine("sh", &["-c", &script], 5_000);
        let history = Vec::new();
        let position = after_e4();
        let request = OpponentRequest {
            position: &position,
            history: &history,
            difficulty: Difficulty::Easy,
            colour: Colour::Black,
        };
        let err = engine.produce_move(&request).await.unwrap_err();
        assert!(matches!(err, BackendError::IllegalMove(m) if m == "e2e4"));
    }
}
