//! Caller-side fallback policy
//!
//! The broker only reports success or failure. A game that asks a user
//! snippet for its next move uses `resolve_move` to apply the rule: a failed
//! run, or a run whose output holds no valid move, means "play the built-in
//! heuristic move instead".

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::broker::ExecutionResult;

/// Side length of the gomoku board
pub const BOARD_SIZE: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub row: usize,
    pub col: usize,
}

/// Where a resolved move came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveSource {
    Sandbox,
    Heuristic,
}

struct MovePatterns {
    parenthesized: Regex,
    bare_pair: Regex,
    number: Regex,
}

static PATTERNS: OnceLock<Option<MovePatterns>> = OnceLock::new();

fn patterns() -> Option<&'static MovePatterns> {
    PATTERNS
        .get_or_init(|| {
            Some(MovePatterns {
                parenthesized: Regex::new(r"\((\d+)\s*,\s*(\d+)\)").ok()?,
                bare_pair: Regex::new(r"(\d+)\s*,\s*(\d+)").ok()?,
                number: Regex::new(r"\d+").ok()?,
            })
        })
        .as_ref()
}

fn on_board(row: &str, col: &str, board_size: usize) -> Option<Move> {
    // Digit runs too long for usize are simply off the board
    let row: usize = row.parse().ok()?;
    let col: usize = col.parse().ok()?;
    (row < board_size && col < board_size).then_some(Move { row, col })
}

fn first_pair(pattern: &Regex, text: &str, board_size: usize) -> Option<Move> {
    let caps = pattern.captures(text)?;
    on_board(caps.get(1)?.as_str(), caps.get(2)?.as_str(), board_size)
}

/// Try `(row, col)`, then `row, col`, then the first two integers. Each
/// strategy looks at its first match only; an off-board match falls through
/// to the next strategy.
fn parse_move_text(text: &str, board_size: usize) -> Option<Move> {
    let patterns = patterns()?;
    first_pair(&patterns.parenthesized, text, board_size)
        .or_else(|| first_pair(&patterns.bare_pair, text, board_size))
        .or_else(|| {
            let mut numbers = patterns.number.find_iter(text);
            let row = numbers.next()?;
            let col = numbers.next()?;
            on_board(row.as_str(), col.as_str(), board_size)
        })
}

/// Extract a move from snippet output, preferring the last non-empty line
pub fn parse_move(output: &str, board_size: usize) -> Option<Move> {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| parse_move_text(line, board_size))
        .or_else(|| parse_move_text(output, board_size))
}

/// Apply the fallback rule to a sandbox result
pub fn resolve_move<F>(result: &ExecutionResult, fallback: F) -> (Move, MoveSource)
where
    F: FnOnce() -> Move,
{
    if !result.success {
        debug!("Sandbox run failed; using heuristic move");
        return (fallback(), MoveSource::Heuristic);
    }

    match parse_move(&result.output, BOARD_SIZE) {
        Some(mv) => (mv, MoveSource::Sandbox),
        None => {
            debug!("No valid move in sandbox output; using heuristic move");
            (fallback(), MoveSource::Heuristic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(row: usize, col: usize) -> Move {
        Move { row, col }
    }

    fn ok(output: &str) -> ExecutionResult {
        ExecutionResult {
            success: true,
            output: output.to_string(),
        }
    }

    #[test]
    fn test_move_patterns_compile() {
        assert!(patterns().is_some());
    }

    #[test]
    fn test_parse_parenthesized() {
        assert_eq!(parse_move("(7, 7)\n", BOARD_SIZE), Some(mv(7, 7)));
        assert_eq!(parse_move("next_move = (3,10)", BOARD_SIZE), Some(mv(3, 10)));
    }

    #[test]
    fn test_parse_bare_pair() {
        assert_eq!(parse_move("3 , 4", BOARD_SIZE), Some(mv(3, 4)));
        assert_eq!(parse_move("[14, 0]", BOARD_SIZE), Some(mv(14, 0)));
    }

    #[test]
    fn test_parse_first_two_numbers() {
        assert_eq!(parse_move("row 5 col 6", BOARD_SIZE), Some(mv(5, 6)));
    }

    #[test]
    fn test_parse_prefers_last_line() {
        let output = "scanning 1 2 3\nbest score 99\n(8, 9)\n\n";
        assert_eq!(parse_move(output, BOARD_SIZE), Some(mv(8, 9)));
    }

    #[test]
    fn test_parse_falls_back_to_whole_output() {
        let output = "(2, 3)\ndone\n";
        assert_eq!(parse_move(output, BOARD_SIZE), Some(mv(2, 3)));
    }

    #[test]
    fn test_parse_rejects_off_board() {
        assert_eq!(parse_move("(15, 2)", BOARD_SIZE), None);
        assert_eq!(parse_move("99999999999999999999999, 1", BOARD_SIZE), None);
        assert_eq!(parse_move("no move here", BOARD_SIZE), None);
        assert_eq!(parse_move("", BOARD_SIZE), None);
    }

    #[test]
    fn test_parse_off_board_parens_fall_through() {
        // Both pair strategies find (16, 3); the first two integers are on the board
        assert_eq!(parse_move("5 6 (16, 3)", BOARD_SIZE), Some(mv(5, 6)));
        assert_eq!(parse_move("(7, 7, 1)", BOARD_SIZE), Some(mv(7, 7)));
    }

    #[test]
    fn test_resolve_uses_sandbox_move() {
        let (m, source) = resolve_move(&ok("(7, 8)\n"), || mv(0, 0));
        assert_eq!(m, mv(7, 8));
        assert_eq!(source, MoveSource::Sandbox);
    }

    #[test]
    fn test_resolve_falls_back_on_failure() {
        let failed = ExecutionResult {
            success: false,
            output: "Execution timed out (exceeded 2 seconds)".to_string(),
        };
        let (m, source) = resolve_move(&failed, || mv(7, 7));
        assert_eq!(m, mv(7, 7));
        assert_eq!(source, MoveSource::Heuristic);
    }

    #[test]
    fn test_resolve_falls_back_without_move() {
        let (m, source) = resolve_move(&ok("thinking...\n"), || mv(1, 1));
        assert_eq!(m, mv(1, 1));
        assert_eq!(source, MoveSource::Heuristic);
    }
}
