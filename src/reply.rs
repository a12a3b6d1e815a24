//! Turns an inbound message body into a command or a move token.

use crate::{
    error::InputError,
    state::{Colour, Difficulty},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New {
        difficulty: Option<Difficulty>,
        colour: Option<Colour>,
    },
    Resign,
    Pause,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Command(Command),
    Move(String),
}

/// Lines that start the quoted or forwarded part of a reply. Everything from there down is dropped.
fn starts_quoted_block(line: &str) -> bool {
    let lower = line.to_lowercase();
    (lower.starts_with("on ") && lower.ends_with("wrote:"))
        || lower.starts_with("-----original message-----")
        || lower.starts_with("---------- forwarded message")
        || lower.starts_with("begin forwarded message")
        || (lower.starts_with("from:") && lower.contains('@'))
        || lower == "--"
}

/// The first line of new text in a reply, ignoring quotes and anything below them.
pub fn top_line(body: &str) -> Option<&str> {
    for line in body.lines() {
        let line = line.trim();
        if starts_quoted_block(line) {
            return None;
        }
        if line.is_empty() || line.starts_with('>') {
            continue;
        }
        return Some(line);
    }
    None
}

pub fn interpret(body: &str, max_move_len: usize) -> Result<Reply, InputError> {
    let line = top_line(body).ok_or(InputError::EmptyMessage)?;
    let mut words = line.split_whitespace();
    let first = words.next().ok_or(InputError::EmptyMessage)?;

    match first.to_uppercase().trim_end_matches(['.', '!', ',']) {
        "NEW" => {
            let mut difficulty = None;
            let mut colour = None;
            for word in words {
                if let Ok(d) = word.parse::<Difficulty>() {
                    difficulty = Some(d);
                } else if let Ok(c) = word.parse::<Colour>() {
                    colour = Some(c);
                }
            }
            return Ok(Reply::Command(Command::New { difficulty, colour }));
        }
        "RESIGN" => return Ok(Reply::Command(Command::Resign)),
        "PAUSE" => return Ok(Reply::Command(Command::Pause)),
        "CONTINUE" | "RESUME" => return Ok(Reply::Command(Command::Continue)),
        _ => {}
    }

    let token = first.trim_end_matches([',', ';', '.']);
    if token.chars().count() > max_move_len {
        return Err(InputError::MoveTooLong {
            token: token.chars().take(max_move_len + 5).collect(),
            max: max_move_len,
        });
    }
    if is_move_token(token) || is_notation_like(token) {
        Ok(Reply::Move(token.to_string()))
    } else {
        Err(InputError::InvalidCommand(token.to_string()))
    }
}

/// Algebraic move grammar: `[piece][file][rank][x]square[=promotion][+|#]`, plus castling.
pub fn is_move_token(token: &str) -> bool {
    let body = token.trim_end_matches(['+', '#']);
    if matches!(body, "O-O" | "O-O-O" | "0-0" | "0-0-0") {
        return true;
    }

    if !body.is_ascii() {
        return false;
    }
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    if chars.first().is_some_and(|c| "KQRBN".contains(*c)) {
        i += 1;
    }

    // destination is the last file+rank pair before an optional promotion
    let (core, promotion) = match chars.iter().position(|c| *c == '=') {
        Some(eq) => (&chars[..eq], &chars[eq + 1..]),
        None => (&chars[..], &chars[chars.len()..]),
    };
    if !promotion.is_empty() && !(promotion.len() == 1 && "QRBN".contains(promotion[0])) {
        return false;
    }
    if core.len() < i + 2 {
        return false;
    }
    let (dest_file, dest_rank) = (core[core.len() - 2], core[core.len() - 1]);
    if !is_file(dest_file) || !is_rank(dest_rank) {
        return false;
    }

    // optional disambiguation and capture marker
    let middle = &core[i..core.len() - 2];
    let mut j = 0;
    if middle.get(j).is_some_and(|c| is_file(*c)) {
        j += 1;
    }
    if middle.get(j).is_some_and(|c| is_rank(*c)) {
        j += 1;
    }
    if middle.get(j) == Some(&'x') {
        j += 1;
    }
    j == middle.len()
}

/// Fallback for tokens outside the grammar (e.g. `e2e4`, `e7e8q`).
fn is_notation_like(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '=' | '+' | '#'))
        && token.chars().any(|c| c.is_ascii_digit())
}

fn is_file(c: char) -> bool {
    ('a'..='h').contains(&c)
}

fn is_rank(c: char) -> bool {
    ('1'..='8').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp(body: &str) -> Result<Reply, InputError> {
        interpret(body, 10)
    }

    #[test]
    fn takes_top_line_above_quote() {
        let body = "Nf3\n\nOn Tue, 3 Mar 2026 at 10:02, Chess Bot <bot@example.com> wrote:\n> Your move.\n> e5\n";
        assert_eq!(interp(body).unwrap(), Reply::Move("Nf3".into()));
    }

    #[test]
    fn skips_leading_quote_markers() {
        let body = "> previous move: e4\n>\n  d5  thanks\n";
        assert_eq!(interp(body).unwrap(), Reply::Move("d5".into()));
    }

    #[test]
    fn ignores_forwarded_content() {
        let body = "\n---------- Forwarded message ---------\nFrom: someone@example.com\ne4\n";
        assert_eq!(interp(body), Err(InputError::EmptyMessage));
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(interp("resign").unwrap(), Reply::Command(Command::Resign));
        assert_eq!(interp("Pause please").unwrap(), Reply::Command(Command::Pause));
        assert_eq!(interp("CONTINUE").unwrap(), Reply::Command(Command::Continue));
        assert_eq!(
            interp("new").unwrap(),
            Reply::Command(Command::New {
                difficulty: None,
                colour: None
            })
        );
    }

    #[test]
    fn new_accepts_settings() {
        assert_eq!(
            interp("NEW hard black").unwrap(),
            Reply::Command(Command::New {
                difficulty: Some(Difficulty::Hard),
                colour: Some(Colour::Black)
            })
        );
    }

    #[test]
    fn recognizes_move_grammar() {
        for token in [
            "e4", "exd5", "Nf3", "Nbd7", "R1e2", "Qh4xe1", "e8=Q", "exd8=N+", "Bb5#", "O-O",
            "O-O-O+", "0-0",
        ] {
            assert!(is_move_token(token), "rejected {token}");
        }
        for token in ["hello", "e9", "Nz3", "e8=K", "xx", "Kf", "Ne4e5x"] {
            assert!(!is_move_token(token), "accepted {token}");
        }
    }

    #[test]
    fn accepts_coordinate_notation_verbatim() {
        assert_eq!(interp("e2e4").unwrap(), Reply::Move("e2e4".into()));
        assert_eq!(interp("e7e8q").unwrap(), Reply::Move("e7e8q".into()));
    }

    #[test]
    fn rejects_prose_and_long_tokens() {
        assert_eq!(
            interp("hello there"),
            Err(InputError::InvalidCommand("hello".into()))
        );
        assert!(matches!(
            interp("e2e4e2e4e2e4"),
            Err(InputError::MoveTooLong { max: 10, .. })
        ));
        assert_eq!(interp("   \n\n"), Err(InputError::EmptyMessage));
    }
}
