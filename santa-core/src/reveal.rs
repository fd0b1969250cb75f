use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Participant, Roster};

/// Who has looked at their assignment. Flags only ever go from false to
/// true; a missing entry reads as false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevealRecord(BTreeMap<Participant, bool>);

impl RevealRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_revealed(&self, participant: &str) -> bool {
        self.0.get(participant).copied().unwrap_or(false)
    }

    pub fn mark(&mut self, participant: impl Into<Participant>) {
        self.0.insert(participant.into(), true);
    }

    /// Counts only roster members; stray keys from an older roster are ignored.
    pub fn revealed_count(&self, roster: &Roster) -> usize {
        roster.iter().filter(|p| self.is_revealed(p)).count()
    }

    pub fn is_complete(&self, roster: &Roster) -> bool {
        roster.iter().all(|p| self.is_revealed(p))
    }

    /// Union of two records; used to lay pending local reveals over the
    /// authoritative one.
    pub fn merged_with<'a>(&self, extra: impl IntoIterator<Item = &'a Participant>) -> Self {
        let mut merged = self.clone();
        for participant in extra {
            merged.mark(participant.clone());
        }
        merged
    }
}

impl FromIterator<Participant> for RevealRecord {
    fn from_iter<T: IntoIterator<Item = Participant>>(iter: T) -> Self {
        Self(iter.into_iter().map(|p| (p, true)).collect())
    }
}

/// Device-local reveal state kept in the on-device cache.
///
/// `pending` holds reveals issued from this device that the shared store has
/// not confirmed yet. `revealed_here` remembers whose reveal this device
/// initiated; only those messages may be shown here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticLayer {
    #[serde(default)]
    pending: BTreeSet<Participant>,
    #[serde(default)]
    revealed_here: BTreeSet<Participant>,
}

impl OptimisticLayer {
    pub fn begin(&mut self, participant: &str) {
        self.pending.insert(participant.to_string());
        self.revealed_here.insert(participant.to_string());
    }

    pub fn confirm(&mut self, participant: &str) {
        self.pending.remove(participant);
    }

    pub fn rollback(&mut self, participant: &str) {
        self.pending.remove(participant);
        self.revealed_here.remove(participant);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.revealed_here.clear();
    }

    pub fn is_pending(&self, participant: &str) -> bool {
        self.pending.contains(participant)
    }

    pub fn revealed_here(&self, participant: &str) -> bool {
        self.revealed_here.contains(participant)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.revealed_here.is_empty()
    }

    /// Folds an authoritative record into the local layer and returns the
    /// record to render: authoritative flags plus still-pending reveals.
    ///
    /// Pending reveals the store already shows are settled. Local reveals the
    /// store no longer shows, and that are not in flight, are forgotten: the
    /// epoch was reset somewhere else. Applying the same record twice is a
    /// no-op.
    pub fn reconcile(&mut self, authoritative: &RevealRecord) -> RevealRecord {
        self.pending.retain(|p| !authoritative.is_revealed(p));
        let pending = &self.pending;
        self.revealed_here
            .retain(|p| pending.contains(p) || authoritative.is_revealed(p));
        authoritative.merged_with(&self.pending)
    }

    /// Record to render without folding anything in.
    pub fn effective(&self, authoritative: &RevealRecord) -> RevealRecord {
        authoritative.merged_with(&self.pending)
    }
}
