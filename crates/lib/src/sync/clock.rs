//! Version clock for a single record.
//!
//! Tracks the last version confirmed by the authoritative service and
//! classifies every incoming version against it. A version that skips ahead
//! is reported as a [`SyncError::SequenceGap`] so the session resynchronizes
//! instead of silently folding a delta on top of missing history.

use super::error::SyncError;
use crate::record::RecordVersion;

/// How an incoming authoritative version relates to the confirmed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Exactly one past the confirmed version; fold it in.
    Next,
    /// Already confirmed; a duplicate delivery.
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionClock {
    confirmed: RecordVersion,
}

impl VersionClock {
    pub fn new(confirmed: RecordVersion) -> Self {
        Self { confirmed }
    }

    pub fn confirmed(&self) -> RecordVersion {
        self.confirmed
    }

    /// Classify `incoming` without changing the clock.
    pub fn check(&self, incoming: RecordVersion) -> Result<Advance, SyncError> {
        let expected = self.confirmed.next();
        if incoming == expected {
            Ok(Advance::Next)
        } else if incoming <= self.confirmed {
            Ok(Advance::Stale)
        } else {
            Err(SyncError::SequenceGap {
                expected,
                received: incoming,
            })
        }
    }

    /// Confirm the next version.
    pub fn advance(&mut self, incoming: RecordVersion) -> Result<(), SyncError> {
        match self.check(incoming)? {
            Advance::Next => {
                self.confirmed = incoming;
                Ok(())
            }
            Advance::Stale => Err(SyncError::VersionRegression {
                confirmed: self.confirmed,
                received: incoming,
            }),
        }
    }

    /// Adopt the version of a full snapshot. Never moves backwards.
    pub fn jump_to(&mut self, version: RecordVersion) -> Result<(), SyncError> {
        if version < self.confirmed {
            return Err(SyncError::VersionRegression {
                confirmed: self.confirmed,
                received: version,
            });
        }
        self.confirmed = version;
        Ok(())
    }
}
