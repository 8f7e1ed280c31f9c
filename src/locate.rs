//! Error Locator: maps a stack trace back to a line of the JS pane.

use crate::compose::{self, ShimOptions};
use crate::ErrorLocation;

const ANONYMOUS_FRAME: &str = "<anonymous>:";

/// Parses stack traces and undoes the composer's line shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLocator {
    prologue_lines: u32,
}

impl ErrorLocator {
    /// A locator for positions reported `prologue_lines` below the user's code
    pub fn new(prologue_lines: u32) -> Self {
        Self { prologue_lines }
    }

    /// A locator for positions relative to the composed script block
    pub fn for_shim(options: &ShimOptions) -> Self {
        Self::new(compose::script_prologue_lines(options))
    }

    pub fn prologue_lines(&self) -> u32 {
        self.prologue_lines
    }

    /// Find the first frame in `stack` that points into the user's script.
    ///
    /// Frames inside the shim prologue are skipped. Returns `None` when no
    /// frame lands in the user's lines.
    pub fn locate(&self, stack: &str) -> Option<ErrorLocation> {
        stack_positions(stack).find_map(|(line, column)| {
            let line = line.checked_sub(1)?.checked_sub(self.prologue_lines)?;
            Some(ErrorLocation {
                line,
                column: column.saturating_sub(1),
            })
        })
    }
}

/// Split a leading run of ASCII digits off `s`.
fn leading_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    s[..end].parse().ok().map(|n| (n, &s[end..]))
}

// "12:5" followed by anything
fn parse_line_col(s: &str) -> Option<(u32, u32)> {
    let (line, rest) = leading_number(s)?;
    let rest = rest.strip_prefix(':')?;
    let (col, _) = leading_number(rest)?;
    Some((line, col))
}

// "... at line 3, col 7"
fn parse_line_comma_col(s: &str) -> Option<(u32, u32)> {
    let at = s.find("line ")?;
    let (line, rest) = leading_number(&s[at + "line ".len()..])?;
    let rest = rest.trim_start_matches(',').trim_start();
    let rest = rest.strip_prefix("col ").or_else(|| rest.strip_prefix("column "))?;
    let (col, _) = leading_number(rest)?;
    Some((line, col))
}

// Position of one stack line, if it has one.
fn frame_position(l: &str) -> Option<(u32, u32)> {
    let l = l.trim();
    if let Some(at) = l.find(ANONYMOUS_FRAME) {
        if let Some(pos) = parse_line_col(&l[at + ANONYMOUS_FRAME.len()..]) {
            return Some(pos);
        }
    }
    parse_line_comma_col(l)
}

/// One-based (line, column) of every positioned frame in `stack`, top first.
///
/// Recognizes anonymous-script frames (`at <anonymous>:12:5`) and Boa
/// diagnostics (`at line 12, col 5`). Frames naming a document URL are
/// document-relative and are not reported.
pub fn stack_positions(stack: &str) -> impl Iterator<Item = (u32, u32)> + '_ {
    stack.lines().filter_map(frame_position)
}

/// Position of the topmost frame of `stack` that carries one.
pub fn parse_stack_position(stack: &str) -> Option<(u32, u32)> {
    stack_positions(stack).next()
}
