//! Record identity and state types.
//!
//! A [`Record`] is the unit of subscription: the materialized value, the
//! authoritative version it was confirmed at, and the selections of every
//! client currently present on it. Records are handed to subscribers as
//! immutable [`SharedRecord`] snapshots and replaced, never mutated, on change.

use std::{borrow::Borrow, collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Opaque identifier of a synchronized document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new RecordId from any string-like input.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one editing session.
///
/// A client owns its own undo history and its own selection. It is passed
/// explicitly to every engine command rather than held as ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Create a new ClientId from a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the underlying string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Authoritative sequence number of a record.
///
/// Version 0 is the empty record that exists before any change was accepted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordVersion(u64);

impl RecordVersion {
    /// The version of a record that has never been changed.
    pub const ZERO: RecordVersion = RecordVersion(0);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// The version the authoritative service assigns to the next accepted change.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for RecordVersion {
    fn from(version: u64) -> Self {
        Self(version)
    }
}

/// A range within the record's value, owned by one client.
///
/// `anchor` is where the selection started and `focus` where it currently
/// ends; they are equal for a caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: usize,
    pub focus: usize,
}

impl Selection {
    pub fn new(anchor: usize, focus: usize) -> Self {
        Self { anchor, focus }
    }

    /// A collapsed selection at `pos`.
    pub fn caret(pos: usize) -> Self {
        Self {
            anchor: pos,
            focus: pos,
        }
    }

    pub fn start(&self) -> usize {
        self.anchor.min(self.focus)
    }

    pub fn end(&self) -> usize {
        self.anchor.max(self.focus)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// Map both ends through `f`, keeping the direction of the selection.
    pub fn map(self, mut f: impl FnMut(usize) -> usize) -> Self {
        Self {
            anchor: f(self.anchor),
            focus: f(self.focus),
        }
    }
}

/// State of the session's link to the authoritative service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// First connection attempt in progress.
    #[default]
    Connecting,
    /// Live stream established and the initial snapshot folded in.
    Connected,
    /// The link dropped; local edits are being buffered.
    Reconnecting { attempt: u32 },
    /// Reconnection attempts were exhausted. Local edits are still buffered.
    Disconnected,
    /// The service refused access. No retry is attempted.
    Unauthorized,
}

impl ConnectionStatus {
    /// True while the engine is serving possibly stale state.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, ConnectionStatus::Connected)
    }
}

/// The externally observable state of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<V> {
    /// Materialized value, including this process's unconfirmed edits.
    pub value: V,
    /// Last version confirmed by the authoritative service.
    pub version: RecordVersion,
    /// Selections of every present client that has one, including local clients.
    pub cursors: BTreeMap<ClientId, Selection>,
    pub status: ConnectionStatus,
}

/// Snapshot type delivered to subscribers.
pub type SharedRecord<V> = Arc<Record<V>>;

impl<V: Default> Default for Record<V> {
    fn default() -> Self {
        Self {
            value: V::default(),
            version: RecordVersion::ZERO,
            cursors: BTreeMap::new(),
            status: ConnectionStatus::default(),
        }
    }
}

impl<V> Record<V> {
    /// The selection of `client`, if it has one.
    pub fn selection_of(&self, client: &ClientId) -> Option<Selection> {
        self.cursors.get(client).copied()
    }

    /// Every other client's selection.
    pub fn others_excluding(&self, client: &ClientId) -> BTreeMap<ClientId, Selection> {
        self.cursors
            .iter()
            .filter(|(id, _)| *id != client)
            .map(|(id, selection)| (id.clone(), *selection))
            .collect()
    }

    /// Project this record for the UI of one client.
    pub fn view(&self, client: &ClientId) -> RecordView<'_, V> {
        RecordView {
            value: &self.value,
            selection: self.selection_of(client),
            cursors: self.others_excluding(client),
            version: self.version,
            status: &self.status,
        }
    }
}

/// What a presentation adapter renders for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordView<'a, V> {
    pub value: &'a V,
    pub selection: Option<Selection>,
    pub cursors: BTreeMap<ClientId, Selection>,
    pub version: RecordVersion,
    pub status: &'a ConnectionStatus,
}
