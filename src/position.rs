//! Board-position strings (FEN).
//!
//! This is only a structural check: it never decides whether a position is reachable
//! or legal, that is left to shakmaty or to the opponent backend.

use std::fmt;

use shakmaty::{Rank, Square};

use crate::{error::InputError, state::Colour};

pub const START_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// A position string that passed [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    text: String,
    side_to_move: Colour,
    castling: String,
    en_passant: Option<String>,
    halfmoves: u32,
    fullmoves: u32,
}

impl Position {
    pub fn start() -> Position {
        Position {
            text: START_POSITION.to_string(),
            side_to_move: Colour::White,
            castling: "KQkq".to_string(),
            en_passant: None,
            halfmoves: 0,
            fullmoves: 1,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn side_to_move(&self) -> Colour {
        self.side_to_move
    }

    pub fn castling(&self) -> &str {
        &self.castling
    }

    pub fn en_passant(&self) -> Option<&str> {
        self.en_passant.as_deref()
    }

    pub fn halfmoves(&self) -> u32 {
        self.halfmoves
    }

    pub fn fullmoves(&self) -> u32 {
        self.fullmoves
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parses a position string, rejecting it as a whole on the first violation.
pub fn parse(text: &str, max_len: usize) -> Result<Position, InputError> {
    let invalid = |reason: String| InputError::InvalidPosition {
        text: text.chars().take(max_len.max(16)).collect(),
        reason,
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(invalid("empty".into()));
    }
    if text.len() > max_len {
        return Err(invalid(format!("longer than {max_len} characters")));
    }

    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(invalid(format!("expected 6 fields, found {}", fields.len())));
    }

    check_placement(fields[0]).map_err(invalid)?;

    let side_to_move = match fields[1] {
        "w" => Colour::White,
        "b" => Colour::Black,
        other => return Err(invalid(format!("side to move must be 'w' or 'b', got '{other}'"))),
    };

    check_castling(fields[2]).map_err(invalid)?;

    let en_passant = match fields[3] {
        "-" => None,
        square => {
            check_en_passant(square, side_to_move).map_err(invalid)?;
            Some(square.to_string())
        }
    };

    let halfmoves: u32 = fields[4]
        .parse()
        .map_err(|_| invalid(format!("bad halfmove clock '{}'", fields[4])))?;
    let fullmoves: u32 = fields[5]
        .parse()
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| invalid(format!("bad fullmove number '{}'", fields[5])))?;

    Ok(Position {
        text: fields.join(" "),
        side_to_move,
        castling: fields[2].to_string(),
        en_passant,
        halfmoves,
        fullmoves,
    })
}

fn check_placement(placement: &str) -> Result<(), String> {
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(format!("expected 8 ranks, found {}", ranks.len()));
    }
    for (i, rank) in ranks.iter().enumerate() {
        let mut files = 0u32;
        let mut last_was_gap = false;
        for c in rank.chars() {
            match c {
                '1'..='8' => {
                    if last_was_gap {
                        return Err(format!("rank {} has adjacent gap counts", 8 - i));
                    }
                    files += c.to_digit(10).unwrap_or(0);
                    last_was_gap = true;
                }
                'p' | 'n' | 'b' | 'r' | 'q' | 'k' | 'P' | 'N' | 'B' | 'R' | 'Q' | 'K' => {
                    files += 1;
                    last_was_gap = false;
                }
                other => return Err(format!("unexpected character '{other}' in placement")),
            }
        }
        if files != 8 {
            return Err(format!("rank {} covers {files} files instead of 8", 8 - i));
        }
    }
    Ok(())
}

fn check_castling(castling: &str) -> Result<(), String> {
    if castling == "-" {
        return Ok(());
    }
    if castling.len() > 4 {
        return Err(format!("castling rights '{castling}' too long"));
    }
    let mut seen = Vec::with_capacity(4);
    for c in castling.chars() {
        if !matches!(c, 'K' | 'Q' | 'k' | 'q') {
            return Err(format!("unexpected castling right '{c}'"));
        }
        if seen.contains(&c) {
            return Err(format!("duplicate castling right '{c}'"));
        }
        seen.push(c);
    }
    Ok(())
}

fn check_en_passant(square: &str, side_to_move: Colour) -> Result<(), String> {
    let parsed = Square::from_ascii(square.as_bytes())
        .map_err(|_| format!("bad en passant square '{square}'"))?;
    // the target sits behind the pawn that just moved
    let expected = match side_to_move {
        Colour::White => Rank::Sixth,
        Colour::Black => Rank::Third,
    };
    if parsed.rank() != expected {
        return Err(format!(
            "en passant square '{square}' is not on rank {}",
            expected.char()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 100;

    #[test]
    fn accepts_start_position() {
        let pos = parse(START_POSITION, MAX).unwrap();
        assert_eq!(pos.side_to_move(), Colour::White);
        assert_eq!(pos.castling(), "KQkq");
        assert_eq!(pos.en_passant(), None);
        assert_eq!(pos.fullmoves(), 1);
        assert_eq!(pos.as_str(), START_POSITION);
    }

    #[test]
    fn accepts_en_passant_target_for_side_to_move() {
        let pos = parse(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
            MAX,
        )
        .unwrap();
        assert_eq!(pos.en_passant(), Some("e3"));
        assert_eq!(pos.side_to_move(), Colour::Black);

        assert!(
            parse(
                "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e3 0 1",
                MAX
            )
            .is_err()
        );
    }

    #[test]
    fn en_passant_target_must_be_a_board_square_behind_the_pawn() {
        let board = "rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR";
        assert!(parse(&format!("{board} w KQkq e6 0 2"), MAX).is_ok());
        for target in ["e9", "i6", "e", "e66", "e3"] {
            let err = parse(&format!("{board} w KQkq {target} 0 2"), MAX).unwrap_err();
            assert!(err.to_string().contains("en passant"), "{target}: {err}");
        }
    }

    #[test]
    fn normalizes_whitespace() {
        let pos = parse("  8/8/8/8/8/8/8/K6k   w  -  - 0 1 ", MAX).unwrap();
        assert_eq!(pos.as_str(), "8/8/8/8/8/8/8/K6k w - - 0 1");
    }

    #[test]
    fn rejects_structural_violations() {
        let bad = [
            "",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP w KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBN w KQkq - 0 1",
            "rnbqkbnr/pppppppp/9/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "rnbqkbnr/pppppppp/44/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "rnbqkbnr/ppppxppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KKkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkqK - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq e4 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq i6 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 0",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - x 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -",
        ];
        for text in bad {
            assert!(parse(text, MAX).is_err(), "accepted '{text}'");
        }
    }

    #[test]
    fn rejects_overlong_input() {
        let long = format!("{START_POSITION}{}", " ".repeat(10));
        assert!(parse(&long, START_POSITION.len()).is_ok(), "trailing space is trimmed");
        assert!(parse(START_POSITION, 20).is_err());
    }
}
