//! The operation capability the engine is parametric over.
//!
//! The engine never inspects an operation. It only needs to apply one to a
//! value, invert it, rebase it over a concurrent operation, and optionally
//! fold two sequential operations into one. Everything content-specific lives
//! in the [`Operation`] implementation; [`text::TextOp`] is the one shipped
//! with the crate.

use std::fmt::Debug;

use crate::record::Selection;

pub mod errors;
pub mod text;

pub use errors::OperationError;

/// Which side of a concurrent pair is ordered first when both touch the same
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn flip(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// An atomic, invertible, transformable edit.
pub trait Operation: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// The materialized content this operation edits.
    type Value: Clone + Debug + PartialEq + Default + Send + Sync + 'static;

    /// Apply to `value`, producing a new value. `value` is never modified.
    fn apply(&self, value: &Self::Value) -> Result<Self::Value, OperationError>;

    /// The operation that undoes `self` once `self` has been applied to `before`.
    fn invert(&self, before: &Self::Value) -> Self;

    /// Rebase `self` so it applies after the concurrent `against`.
    ///
    /// Must satisfy `apply(apply(v, against), self') == apply(apply(v, self), against')`
    /// where `self' = self.transform(against, side)` and
    /// `against' = against.transform(self, side.flip())`. An empty result means
    /// `against` already did everything `self` wanted to do.
    fn transform(&self, against: &Self, side: Side) -> Vec<Self>;

    /// Fold `next`, applied right after `self`, into a single operation.
    fn compose(&self, _next: &Self) -> Option<Self> {
        None
    }

    /// Move a selection so it keeps pointing at the same content after `self`.
    fn transform_selection(&self, selection: &Selection) -> Selection {
        *selection
    }
}

/// Apply `ops` in order. On failure the input value is left as it was.
pub fn apply_all<O: Operation>(ops: &[O], value: &O::Value) -> Result<O::Value, OperationError> {
    let mut current = value.clone();
    for op in ops {
        current = op.apply(&current)?;
    }
    Ok(current)
}

/// Apply `ops` in order and return the new value together with the group
/// that reverts them (inverses in reverse order).
pub fn apply_with_inverse<O: Operation>(
    ops: &[O],
    value: &O::Value,
) -> Result<(O::Value, Vec<O>), OperationError> {
    let mut current = value.clone();
    let mut inverse = Vec::with_capacity(ops.len());
    for op in ops {
        let next = op.apply(&current)?;
        inverse.push(op.invert(&current));
        current = next;
    }
    inverse.reverse();
    Ok((current, inverse))
}

/// Fold adjacent composable operations into a canonical, shorter sequence.
pub fn compose_all<O: Operation>(ops: Vec<O>) -> Vec<O> {
    let mut result: Vec<O> = Vec::with_capacity(ops.len());
    for op in ops {
        match result.last().and_then(|last| last.compose(&op)) {
            Some(composed) => {
                if let Some(last) = result.last_mut() {
                    *last = composed;
                }
            }
            None => result.push(op),
        }
    }
    result
}

/// Rebase two concurrent sequences over each other.
///
/// Returns `(ops', against')`: `ops'` applies after `against`, and
/// `against'` applies after `ops`. `side` is the side of `ops`.
pub fn transform_all<O: Operation>(ops: &[O], against: &[O], side: Side) -> (Vec<O>, Vec<O>) {
    match (ops, against) {
        ([], _) => (Vec::new(), against.to_vec()),
        (_, []) => (ops.to_vec(), Vec::new()),
        ([op], [other]) => (op.transform(other, side), other.transform(op, side.flip())),
        ([first, rest @ ..], _) if !rest.is_empty() => {
            let (first_t, against_1) = transform_all(std::slice::from_ref(first), against, side);
            let (rest_t, against_2) = transform_all(rest, &against_1, side);
            let mut out = first_t;
            out.extend(rest_t);
            (out, against_2)
        }
        (_, [first, rest @ ..]) => {
            let (ops_1, first_t) = transform_all(ops, std::slice::from_ref(first), side);
            let (ops_2, rest_t) = transform_all(&ops_1, rest, side);
            let mut out = first_t;
            out.extend(rest_t);
            (ops_2, out)
        }
    }
}
