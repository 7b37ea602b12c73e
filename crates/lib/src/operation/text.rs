//! Reversible plain-text operations.
//!
//! Positions are counted in `char`s. Deletes carry the text they remove so
//! they can be inverted without looking at the value, and so applying one to
//! a value that does not contain that text is rejected instead of silently
//! removing the wrong characters.

use serde::{Deserialize, Serialize};

use super::{Operation, OperationError, Side};
use crate::record::Selection;

/// A single insertion or deletion in a `String`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextOp {
    Insert { pos: usize, text: String },
    Delete { pos: usize, text: String },
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Characters of `s` in the char range `[from, to)`.
fn char_slice(s: &str, from: usize, to: usize) -> String {
    s.chars().skip(from).take(to.saturating_sub(from)).collect()
}

impl TextOp {
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        TextOp::Insert {
            pos,
            text: text.into(),
        }
    }

    pub fn delete(pos: usize, text: impl Into<String>) -> Self {
        TextOp::Delete {
            pos,
            text: text.into(),
        }
    }

    /// Delete the char range `[from, to)` of `value`.
    pub fn delete_range(value: &str, from: usize, to: usize) -> Self {
        TextOp::Delete {
            pos: from,
            text: char_slice(value, from, to),
        }
    }

    pub fn pos(&self) -> usize {
        match self {
            TextOp::Insert { pos, .. } | TextOp::Delete { pos, .. } => *pos,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TextOp::Insert { text, .. } | TextOp::Delete { text, .. } => text,
        }
    }

    fn with_pos(&self, pos: usize) -> Self {
        match self {
            TextOp::Insert { text, .. } => TextOp::insert(pos, text.clone()),
            TextOp::Delete { text, .. } => TextOp::delete(pos, text.clone()),
        }
    }
}

impl Operation for TextOp {
    type Value = String;

    fn apply(&self, value: &String) -> Result<String, OperationError> {
        let len = char_len(value);
        match self {
            TextOp::Insert { pos, text } => {
                if *pos > len {
                    return Err(OperationError::invalid(format!(
                        "insert at {pos} past end of text of length {len}"
                    )));
                }
                let mut out = char_slice(value, 0, *pos);
                out.push_str(text);
                out.push_str(&char_slice(value, *pos, len));
                Ok(out)
            }
            TextOp::Delete { pos, text } => {
                let end = pos + char_len(text);
                if end > len {
                    return Err(OperationError::invalid(format!(
                        "delete of {pos}..{end} past end of text of length {len}"
                    )));
                }
                let removed = char_slice(value, *pos, end);
                if removed != *text {
                    return Err(OperationError::invalid(format!(
                        "delete at {pos} expected {text:?}, found {removed:?}"
                    )));
                }
                let mut out = char_slice(value, 0, *pos);
                out.push_str(&char_slice(value, end, len));
                Ok(out)
            }
        }
    }

    fn invert(&self, _before: &String) -> Self {
        match self {
            TextOp::Insert { pos, text } => TextOp::delete(*pos, text.clone()),
            TextOp::Delete { pos, text } => TextOp::insert(*pos, text.clone()),
        }
    }

    fn transform(&self, against: &Self, side: Side) -> Vec<Self> {
        match (self, against) {
            (TextOp::Insert { pos, text }, TextOp::Insert { pos: at, text: other }) => {
                if pos < at || (pos == at && side == Side::Left) {
                    vec![self.clone()]
                } else {
                    vec![TextOp::insert(pos + char_len(other), text.clone())]
                }
            }
            (TextOp::Insert { pos, text }, TextOp::Delete { pos: at, text: other }) => {
                let end = at + char_len(other);
                if pos <= at {
                    vec![self.clone()]
                } else if *pos >= end {
                    vec![TextOp::insert(pos - char_len(other), text.clone())]
                } else {
                    // Inserted inside the deleted range: land where the range was.
                    vec![TextOp::insert(*at, text.clone())]
                }
            }
            (TextOp::Delete { pos, text }, TextOp::Insert { pos: at, text: other }) => {
                let len = char_len(text);
                if at <= pos {
                    vec![self.with_pos(pos + char_len(other))]
                } else if *at >= pos + len {
                    vec![self.clone()]
                } else {
                    // The insert splits the range; keep the inserted text alive.
                    let split = at - pos;
                    vec![
                        TextOp::delete(*pos, char_slice(text, 0, split)),
                        TextOp::delete(*pos + char_len(other), char_slice(text, split, len)),
                    ]
                }
            }
            (TextOp::Delete { pos, text }, TextOp::Delete { pos: at, text: other }) => {
                let len = char_len(text);
                let other_len = char_len(other);
                let other_end = at + other_len;

                let before = char_slice(text, 0, at.saturating_sub(*pos).min(len));
                let after = char_slice(text, other_end.saturating_sub(*pos).min(len), len);
                let remaining = before + &after;
                if remaining.is_empty() {
                    return Vec::new();
                }

                let new_pos = if pos <= at {
                    *pos
                } else if *pos >= other_end {
                    pos - other_len
                } else {
                    *at
                };
                vec![TextOp::delete(new_pos, remaining)]
            }
        }
    }

    fn compose(&self, next: &Self) -> Option<Self> {
        match (self, next) {
            (TextOp::Insert { pos, text }, TextOp::Insert { pos: at, text: more })
                if *at >= *pos && *at <= pos + char_len(text) =>
            {
                let offset = at - pos;
                let len = char_len(text);
                let mut merged = char_slice(text, 0, offset);
                merged.push_str(more);
                merged.push_str(&char_slice(text, offset, len));
                Some(TextOp::insert(*pos, merged))
            }
            (TextOp::Delete { pos, text }, TextOp::Delete { pos: at, text: more }) => {
                if at == pos {
                    // Forward delete.
                    Some(TextOp::delete(*pos, format!("{text}{more}")))
                } else if at + char_len(more) == *pos {
                    // Backspace.
                    Some(TextOp::delete(*at, format!("{more}{text}")))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn transform_selection(&self, selection: &Selection) -> Selection {
        match self {
            TextOp::Insert { pos, text } => {
                let len = char_len(text);
                selection.map(|idx| if idx > *pos { idx + len } else { idx })
            }
            TextOp::Delete { pos, text } => {
                let end = pos + char_len(text);
                selection.map(|idx| {
                    if idx <= *pos {
                        idx
                    } else if idx >= end {
                        idx - (end - pos)
                    } else {
                        *pos
                    }
                })
            }
        }
    }
}
