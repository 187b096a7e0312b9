use super::engine::{StorageEngine, Txn};
use super::records::EntityKind;
use crate::error::DbResult;

/// Result of a versioned apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mutation was written; the row now holds `version`.
    Applied { version: u64 },
    /// The incoming version was not newer than the stored one; nothing was
    /// written. This is a successful no-op, not an error.
    Skipped { version: u64 },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }

    pub fn version(&self) -> u64 {
        match self {
            ApplyOutcome::Applied { version } | ApplyOutcome::Skipped { version } => *version,
        }
    }
}

impl Txn<'_> {
    /// The one conflict-resolution rule, shared by local and replicated
    /// writes.
    ///
    /// Reads the entity's current version; with `incoming` set, a value ≤
    /// the stored version short-circuits to `Skipped`. Otherwise `mutator`
    /// runs with the version the row must take (`incoming`, or stored + 1
    /// for local writes) and stages its puts into this transaction.
    pub fn apply<F>(
        &mut self,
        kind: EntityKind,
        id: &str,
        incoming: Option<u64>,
        mutator: F,
    ) -> DbResult<ApplyOutcome>
    where
        F: FnOnce(&mut Self, u64) -> DbResult<()>,
    {
        let current = self.engine().current_version(kind, id)?;
        let next = match incoming {
            Some(version) if version <= current => {
                return Ok(ApplyOutcome::Skipped { version: current })
            }
            Some(version) => version,
            None => current + 1,
        };
        mutator(self, next)?;
        Ok(ApplyOutcome::Applied { version: next })
    }
}

impl StorageEngine {
    /// Single-entity convenience wrapper around `Txn::apply`.
    pub fn apply<F>(
        &self,
        kind: EntityKind,
        id: &str,
        incoming: Option<u64>,
        mutator: F,
    ) -> DbResult<ApplyOutcome>
    where
        F: FnOnce(&mut Txn, u64) -> DbResult<()>,
    {
        self.transaction(|txn| txn.apply(kind, id, incoming, mutator))
    }
}
