use std::str::FromStr;

use anyhow::Result;
use shakmaty::uci::UciMove;

pub fn parse_uci_move(move_str: &str) -> Result<UciMove> {
    let uci_move = UciMove::from_str(move_str.trim())?;

    Ok(uci_move)
}

/// `e2e4`, `e7e8q`: the square-pair form engines speak.
pub fn is_coordinate_move(token: &str) -> bool {
    let b = token.as_bytes();
    let square = |f: u8, r: u8| (b'a'..=b'h').contains(&f.to_ascii_lowercase()) && (b'1'..=b'8').contains(&r);
    match b.len() {
        4 => square(b[0], b[1]) && square(b[2], b[3]),
        5 => square(b[0], b[1]) && square(b[2], b[3]) && b"qrbnQRBN".contains(&b[4]),
        _ => false,
    }
}

/// Cuts `text` to at most `max` characters without splitting one.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_moves() {
        assert!(is_coordinate_move("e2e4"));
        assert!(is_coordinate_move("e7e8q"));
        assert!(is_coordinate_move("E2E4"));
        assert!(!is_coordinate_move("Nf3"));
        assert!(!is_coordinate_move("e2e9"));
        assert!(!is_coordinate_move("e7e8k"));
        assert!(!is_coordinate_move("(none)"));
    }

    #[test]
    fn parses_engine_moves() {
        assert_eq!(parse_uci_move(" e2e4 ").unwrap().to_string(), "e2e4");
        assert!(parse_uci_move("xyz").is_err());
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("échec et mat", 5), "échec");
        assert_eq!(truncate_chars("ok", 5), "ok");
    }
}
