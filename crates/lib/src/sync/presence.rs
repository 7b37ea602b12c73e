//! Cursor registry: the last known selection of every client on a record.
//!
//! Updates are ordered per client by a sequence number; an update older than
//! what is already known is ignored, so presence converges regardless of
//! delivery order. A departed client leaves a tombstone holding its last
//! sequence number so a delayed update cannot resurrect it.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use super::protocol::PresenceUpdate;
use crate::{
    operation::Operation,
    record::{ClientId, Selection},
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CursorEntry {
    selection: Option<Selection>,
    seq: u64,
    departed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CursorRegistry {
    entries: HashMap<ClientId, CursorEntry>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an update. Returns whether anything visible changed.
    pub fn absorb(&mut self, update: &PresenceUpdate) -> bool {
        if update.seq == 0 {
            return false;
        }
        if let Some(entry) = self.entries.get(&update.client)
            && update.seq <= entry.seq
        {
            trace!(client = %update.client, seq = update.seq, "Ignoring outdated presence");
            return false;
        }
        let previous = self.entries.insert(
            update.client.clone(),
            CursorEntry {
                selection: update.selection,
                seq: update.seq,
                departed: false,
            },
        );
        previous.is_none_or(|entry| entry.departed || entry.selection != update.selection)
    }

    /// The client's session ended. Returns whether it was visible.
    pub fn depart(&mut self, client: &ClientId) -> bool {
        match self.entries.get_mut(client) {
            Some(entry) if !entry.departed => {
                entry.departed = true;
                entry.selection = None;
                true
            }
            _ => false,
        }
    }

    /// Replace live presence with the one carried by a snapshot. Clients that
    /// were live become tombstones so older updates still in transit stay
    /// ignored. Tombstones from before the previous load are pruned.
    pub fn load(&mut self, presence: &[PresenceUpdate]) {
        self.entries.retain(|_, entry| !entry.departed);
        for entry in self.entries.values_mut() {
            entry.departed = true;
            entry.selection = None;
        }
        for update in presence {
            match self.entries.get_mut(&update.client) {
                Some(entry) if update.seq < entry.seq => {}
                _ => {
                    self.entries.insert(
                        update.client.clone(),
                        CursorEntry {
                            selection: update.selection,
                            seq: update.seq,
                            departed: false,
                        },
                    );
                }
            }
        }
    }

    pub fn selection_of(&self, client: &ClientId) -> Option<Selection> {
        self.entries
            .get(client)
            .filter(|entry| !entry.departed)
            .and_then(|entry| entry.selection)
    }

    /// Last sequence number seen for `client`, departed or not.
    pub fn last_seq(&self, client: &ClientId) -> u64 {
        self.entries.get(client).map_or(0, |entry| entry.seq)
    }

    /// Sequence number for the next update published by `client`: above
    /// everything seen for it and at least `floor`.
    pub fn next_seq(&self, client: &ClientId, floor: u64) -> u64 {
        (self.last_seq(client) + 1).max(floor)
    }

    /// Every present client with a selection.
    pub fn cursors(&self) -> BTreeMap<ClientId, Selection> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.departed)
            .filter_map(|(client, entry)| entry.selection.map(|s| (client.clone(), s)))
            .collect()
    }

    /// Shift every selection over operations just applied to the value.
    pub fn transform<O: Operation>(&mut self, ops: &[O]) {
        for entry in self.entries.values_mut() {
            if let Some(selection) = &mut entry.selection {
                for op in ops {
                    *selection = op.transform_selection(selection);
                }
            }
        }
    }
}
