//! Per-client undo and redo stacks.
//!
//! Each entry is a group of operations that reverts one `apply` (or one
//! undo/redo). The top entry of each stack applies to the current value, and
//! every lower entry applies to the value left by the entries above it. When
//! another client's operations change the value, every entry is rebased over
//! them so undo never reverts someone else's edit.

use std::collections::HashMap;

use crate::{
    operation::{Operation, Side, transform_all},
    record::ClientId,
};

#[derive(Debug, Clone)]
pub struct UndoStack<O> {
    undo: Vec<Vec<O>>,
    redo: Vec<Vec<O>>,
    max_depth: Option<usize>,
}

impl<O: Operation> UndoStack<O> {
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            max_depth,
        }
    }

    /// Record the inverse of a fresh edit. Clears the redo stack.
    pub fn record(&mut self, inverse: Vec<O>) {
        if inverse.is_empty() {
            return;
        }
        self.redo.clear();
        self.push_undo(inverse);
    }

    /// Push onto the undo stack without touching the redo stack.
    pub fn push_undo(&mut self, group: Vec<O>) {
        if group.is_empty() {
            return;
        }
        self.undo.push(group);
        if let Some(max) = self.max_depth
            && self.undo.len() > max
        {
            let excess = self.undo.len() - max;
            self.undo.drain(..excess);
        }
    }

    pub fn push_redo(&mut self, group: Vec<O>) {
        if !group.is_empty() {
            self.redo.push(group);
        }
    }

    pub fn pop_undo(&mut self) -> Option<Vec<O>> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<Vec<O>> {
        self.redo.pop()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    /// Rebase both stacks over `ops`, which were just applied to the value.
    pub fn transform(&mut self, ops: &[O]) {
        if ops.is_empty() {
            return;
        }
        transform_entries(&mut self.undo, ops);
        transform_entries(&mut self.redo, ops);
    }
}

/// Walk from the newest entry down, carrying `ops` along as each entry is
/// rebased over it. Entries that end up empty are dropped.
fn transform_entries<O: Operation>(entries: &mut Vec<Vec<O>>, ops: &[O]) {
    let mut against = ops.to_vec();
    let mut rebased = Vec::with_capacity(entries.len());
    for entry in entries.drain(..).rev() {
        let (entry, rest) = transform_all(&entry, &against, Side::Right);
        against = rest;
        if !entry.is_empty() {
            rebased.push(entry);
        }
    }
    rebased.reverse();
    *entries = rebased;
}

/// Undo stacks of every client editing one record.
#[derive(Debug, Clone)]
pub struct UndoHistory<O> {
    stacks: HashMap<ClientId, UndoStack<O>>,
    max_depth: Option<usize>,
}

impl<O: Operation> UndoHistory<O> {
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            stacks: HashMap::new(),
            max_depth,
        }
    }

    fn stack_mut(&mut self, client: &ClientId) -> &mut UndoStack<O> {
        let max_depth = self.max_depth;
        self.stacks
            .entry(client.clone())
            .or_insert_with(|| UndoStack::new(max_depth))
    }

    pub fn stack(&self, client: &ClientId) -> Option<&UndoStack<O>> {
        self.stacks.get(client)
    }

    /// `client` applied a fresh edit whose inverse is `inverse`.
    pub fn record(&mut self, client: &ClientId, inverse: Vec<O>) {
        self.stack_mut(client).record(inverse);
    }

    pub fn take_undo(&mut self, client: &ClientId) -> Option<Vec<O>> {
        self.stacks.get_mut(client)?.pop_undo()
    }

    pub fn take_redo(&mut self, client: &ClientId) -> Option<Vec<O>> {
        self.stacks.get_mut(client)?.pop_redo()
    }

    pub fn push_undo(&mut self, client: &ClientId, group: Vec<O>) {
        self.stack_mut(client).push_undo(group);
    }

    pub fn push_redo(&mut self, client: &ClientId, group: Vec<O>) {
        self.stack_mut(client).push_redo(group);
    }

    /// `ops` were applied to the value on behalf of `origin`. Every other
    /// client's stacks are rebased over them.
    pub fn observe(&mut self, origin: &ClientId, ops: &[O]) {
        for (client, stack) in &mut self.stacks {
            if client != origin {
                stack.transform(ops);
            }
        }
    }

    /// The value was replaced wholesale; no entry applies anymore.
    pub fn clear(&mut self) {
        self.stacks.clear();
    }

    pub fn remove(&mut self, client: &ClientId) {
        self.stacks.remove(client);
    }
}
