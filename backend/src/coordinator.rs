//! One client's view of one Secret Santa game.
//!
//! A [`Session`] ties a roster to a shared store and an on-device cache under
//! a namespace. The store holds the authoritative mapping and reveal record;
//! the cache holds this device's [`OptimisticLayer`].

use futures::stream::BoxStream;
use futures::StreamExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use santa_core::{
    generate, render, Assignments, GameError, GameView, OptimisticLayer, RevealMessage,
    RevealRecord, Roster,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::cache::LocalCache;
use crate::store::{SharedStore, StoreError, StorePath};

pub const DEFAULT_NAMESPACE: &str = "secretSanta";
const ASSIGNMENTS_KEY: &str = "assignments";
const REVEALED_KEY: &str = "revealedState";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Game(#[from] GameError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no assignments loaded for this game")]
    NotLoaded,
    #[error("the game was reset or replaced; reload before revealing")]
    GameChanged,
    #[error("stored reveal record is malformed: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("could not encode assignments: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CoordinatorError {
    /// Failed writes the user may retry by clicking again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::Store(err) if err.is_retryable())
    }
}

/// Store locations of one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePaths {
    pub root: StorePath,
    pub assignments: StorePath,
    pub revealed: StorePath,
    pub cache_key: String,
}

impl GamePaths {
    pub fn new(namespace: &str) -> Result<Self, StoreError> {
        let root = StorePath::parse(namespace)?;
        if root.is_root() {
            return Err(StoreError::InvalidPath(namespace.to_string()));
        }
        Ok(Self {
            assignments: root.child(ASSIGNMENTS_KEY)?,
            revealed: root.child(REVEALED_KEY)?,
            cache_key: format!("{}.optimistic", root.segments().join(".")),
            root,
        })
    }
}

/// Authoritative state as delivered by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevealUpdate {
    pub record: RevealRecord,
    pub is_complete: bool,
    /// `None` until the epoch's mapping is written, and again after a reset.
    #[serde(skip)]
    pub assignments: Option<Assignments>,
}

enum StoredAssignments {
    Missing,
    Valid(Assignments),
    Invalid,
}

pub struct Session<S, C> {
    roster: Roster,
    store: S,
    cache: C,
    paths: GamePaths,
    rng: ChaCha8Rng,
    assignments: Option<Assignments>,
    authoritative: RevealRecord,
    layer: OptimisticLayer,
}

impl<S: SharedStore, C: LocalCache> Session<S, C> {
    /// Opens a session and restores this device's optimistic layer from the
    /// cache.
    pub fn open(roster: Roster, store: S, cache: C, namespace: &str) -> Result<Self, CoordinatorError> {
        let paths = GamePaths::new(namespace)?;
        let layer = cache
            .get(&paths.cache_key)
            .and_then(|raw| match serde_json::from_str::<OptimisticLayer>(&raw) {
                Ok(layer) => Some(layer),
                Err(err) => {
                    tracing::warn!(key = %paths.cache_key, %err, "discarding unreadable local reveal state");
                    None
                }
            })
            .unwrap_or_default();

        Ok(Self {
            roster,
            store,
            cache,
            paths,
            rng: ChaCha8Rng::from_entropy(),
            assignments: None,
            authoritative: RevealRecord::new(),
            layer,
        })
    }

    /// Makes generation reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn paths(&self) -> &GamePaths {
        &self.paths
    }

    pub fn assignments(&self) -> Option<&Assignments> {
        self.assignments.as_ref()
    }

    pub fn layer(&self) -> &OptimisticLayer {
        &self.layer
    }

    /// Loads the epoch's mapping, generating and storing one if there is
    /// none. Two clients racing here both write; whichever write the store
    /// ends up holding is adopted by everyone on their next read.
    pub async fn ensure_assignment(&mut self) -> Result<Assignments, CoordinatorError> {
        let replace_invalid = match self.load_assignments().await? {
            StoredAssignments::Valid(existing) => {
                self.assignments = Some(existing.clone());
                return Ok(existing);
            }
            StoredAssignments::Missing => false,
            StoredAssignments::Invalid => true,
        };

        let fresh = generate(&self.roster, &mut self.rng);
        let value = serde_json::to_value(&fresh).map_err(CoordinatorError::Encode)?;
        // Flags left without a mapping (a stale reveal racing a reset, or an
        // unusable old mapping) belong to no game, so they go in the same write.
        let mut writes = Map::new();
        writes.insert(ASSIGNMENTS_KEY.to_string(), value);
        writes.insert(REVEALED_KEY.to_string(), Value::Null);
        self.store.update(&self.paths.root, writes).await?;
        if replace_invalid {
            tracing::warn!(namespace = %self.paths.root, "replaced unusable assignments");
        }
        tracing::info!(namespace = %self.paths.root, "generated assignments for a new game");

        let canonical = match self.load_assignments().await? {
            StoredAssignments::Valid(stored) => stored,
            _ => fresh,
        };
        self.assignments = Some(canonical.clone());
        Ok(canonical)
    }

    async fn load_assignments(&self) -> Result<StoredAssignments, CoordinatorError> {
        let Some(value) = self.store.get(&self.paths.assignments).await? else {
            return Ok(StoredAssignments::Missing);
        };
        Ok(match decode_assignments(value, &self.roster) {
            Some(assignments) => StoredAssignments::Valid(assignments),
            None => StoredAssignments::Invalid,
        })
    }

    /// Reveals `participant`'s recipient.
    ///
    /// The local marker is written first so this device can render at once;
    /// the store write sets only this participant's flag. If the write fails
    /// the marker is rolled back and the error is returned.
    ///
    /// A session still holding the mapping of an ended epoch gets
    /// [`CoordinatorError::GameChanged`] and adopts whatever the store holds
    /// now; nothing is written.
    pub async fn reveal(&mut self, participant: &str) -> Result<RevealMessage, CoordinatorError> {
        let giver = self.roster.require(participant)?.clone();
        let held = self.assignments.clone().ok_or(CoordinatorError::NotLoaded)?;
        let recipient = held
            .recipient_for(&giver)
            .cloned()
            .ok_or_else(|| GameError::MissingGiver {
                giver: giver.clone(),
            })?;
        let flag = self.paths.revealed.child(&giver)?;

        let current = match self.load_assignments().await? {
            StoredAssignments::Valid(stored) => Some(stored),
            StoredAssignments::Missing | StoredAssignments::Invalid => None,
        };
        if current.as_ref() != Some(&held) {
            tracing::info!(participant = %giver, "reveal refused, game changed underneath");
            self.assignments = current;
            return Err(CoordinatorError::GameChanged);
        }

        self.layer.begin(&giver);
        self.save_layer();

        if let Err(err) = self.store.set(&flag, Some(Value::Bool(true))).await {
            tracing::warn!(participant = %giver, %err, "reveal not saved, rolling back");
            self.layer.rollback(&giver);
            self.save_layer();
            return Err(err.into());
        }

        self.layer.confirm(&giver);
        self.authoritative.mark(giver.clone());
        self.save_layer();
        tracing::info!(participant = %giver, "revealed");

        Ok(RevealMessage { giver, recipient })
    }

    /// Authoritative updates: the current state first, then one per change.
    pub async fn observe(
        &self,
    ) -> Result<BoxStream<'static, Result<RevealUpdate, CoordinatorError>>, CoordinatorError> {
        let roster = self.roster.clone();
        let updates = self.store.subscribe(&self.paths.root).await?;
        Ok(updates
            .map(move |value| decode_update(value, &roster))
            .boxed())
    }

    /// One-off read of the authoritative state.
    pub async fn snapshot(&self) -> Result<RevealUpdate, CoordinatorError> {
        let value = self.store.get(&self.paths.root).await?;
        decode_update(value, &self.roster)
    }

    /// Folds an authoritative update into the session and returns the view to
    /// render. Feeding the same update twice gives the same view.
    pub fn apply(&mut self, update: RevealUpdate) -> GameView {
        let before = self.layer.clone();
        let effective = self.layer.reconcile(&update.record);
        if self.layer != before {
            self.save_layer();
        }
        self.authoritative = update.record;
        self.assignments = update.assignments;
        render(
            &self.roster,
            &effective,
            &self.layer,
            self.assignments.as_ref(),
        )
    }

    /// Current view without waiting for the store.
    pub fn view(&self) -> GameView {
        let effective = self.layer.effective(&self.authoritative);
        render(
            &self.roster,
            &effective,
            &self.layer,
            self.assignments.as_ref(),
        )
    }

    /// Ends the epoch for everyone: mapping and reveal record are deleted in
    /// one merge, then this device's local state is cleared.
    pub async fn reset(&mut self) -> Result<(), CoordinatorError> {
        let mut tombstones = Map::new();
        tombstones.insert(ASSIGNMENTS_KEY.to_string(), Value::Null);
        tombstones.insert(REVEALED_KEY.to_string(), Value::Null);
        if let Err(err) = self.store.update(&self.paths.root, tombstones).await {
            tracing::warn!(namespace = %self.paths.root, %err, "reset failed");
            return Err(err.into());
        }

        self.layer.clear();
        self.save_layer();
        self.assignments = None;
        self.authoritative = RevealRecord::new();
        tracing::info!(namespace = %self.paths.root, "game reset");
        Ok(())
    }

    fn save_layer(&self) {
        if self.layer.is_empty() {
            self.cache.remove(&self.paths.cache_key);
            return;
        }
        match serde_json::to_string(&self.layer) {
            Ok(json) => self.cache.set(&self.paths.cache_key, &json),
            Err(err) => tracing::warn!(%err, "failed to encode local reveal state"),
        }
    }
}

fn decode_assignments(value: Value, roster: &Roster) -> Option<Assignments> {
    let assignments: Assignments = match serde_json::from_value(value) {
        Ok(assignments) => assignments,
        Err(err) => {
            tracing::warn!(%err, "stored assignments are unreadable");
            return None;
        }
    };
    match assignments.validate(roster) {
        Ok(()) => Some(assignments),
        Err(err) => {
            tracing::warn!(%err, "stored assignments do not fit the roster");
            None
        }
    }
}

fn decode_update(value: Option<Value>, roster: &Roster) -> Result<RevealUpdate, CoordinatorError> {
    let mut game = match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let record = match game.remove(REVEALED_KEY) {
        Some(raw) => serde_json::from_value(raw).map_err(CoordinatorError::Malformed)?,
        None => RevealRecord::new(),
    };
    let assignments = game
        .remove(ASSIGNMENTS_KEY)
        .and_then(|raw| decode_assignments(raw, roster));

    Ok(RevealUpdate {
        is_complete: record.is_complete(roster),
        record,
        assignments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::{MemoryStore, Subscription};
    use async_trait::async_trait;
    use santa_core::ControlState;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn trio() -> Roster {
        Roster::new(["Andy", "Liz", "George"]).unwrap()
    }

    fn session(roster: Roster, store: &MemoryStore) -> Session<MemoryStore, MemoryCache> {
        Session::open(roster, store.clone(), MemoryCache::default(), DEFAULT_NAMESPACE).unwrap()
    }

    /// Memory store whose writes can be switched off.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: MemoryStore,
        offline: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }

        fn go_online(&self) {
            self.offline.store(false, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.offline.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SharedStore for FlakyStore {
        async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
            self.inner.get(path).await
        }

        async fn set(&self, path: &StorePath, value: Option<Value>) -> Result<(), StoreError> {
            self.check()?;
            self.inner.set(path, value).await
        }

        async fn update(
            &self,
            path: &StorePath,
            children: Map<String, Value>,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.inner.update(path, children).await
        }

        async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError> {
            self.inner.subscribe(path).await
        }
    }

    #[test]
    fn namespace_must_not_be_empty() {
        assert!(GamePaths::new("").is_err());
        assert!(GamePaths::new("bad.name").is_err());
        let paths = GamePaths::new("office/2026").unwrap();
        assert_eq!(paths.revealed.to_string(), "/office/2026/revealedState");
        assert_eq!(paths.cache_key, "office.2026.optimistic");
    }

    #[tokio::test]
    async fn ensure_generates_once_and_is_shared() {
        let store = MemoryStore::new();
        let mut first = session(trio(), &store);
        let mut second = session(trio(), &store);

        let created = first.ensure_assignment().await.unwrap();
        created.validate(&trio()).unwrap();
        assert_eq!(second.ensure_assignment().await.unwrap(), created);
        assert_eq!(
            store.get(&first.paths().assignments).await.unwrap(),
            Some(serde_json::to_value(&created).unwrap())
        );
    }

    #[tokio::test]
    async fn mapping_for_another_roster_is_replaced() {
        let store = MemoryStore::new();
        let paths = GamePaths::new(DEFAULT_NAMESPACE).unwrap();
        store
            .set(&paths.assignments, Some(json!({ "Ollie": "Louis", "Louis": "Ollie" })))
            .await
            .unwrap();
        store
            .update(&paths.revealed, json!({ "Ollie": true }).as_object().cloned().unwrap())
            .await
            .unwrap();

        let mut session = session(trio(), &store);
        let assignments = session.ensure_assignment().await.unwrap();
        assignments.validate(&trio()).unwrap();
        assert_eq!(store.get(&paths.revealed).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reveal_requires_loaded_mapping_and_known_name() {
        let store = MemoryStore::new();
        let mut session = session(trio(), &store);
        assert!(matches!(
            session.reveal("Andy").await,
            Err(CoordinatorError::NotLoaded)
        ));

        session.ensure_assignment().await.unwrap();
        assert!(matches!(
            session.reveal("Ollie").await,
            Err(CoordinatorError::Game(GameError::UnknownParticipant(_)))
        ));
    }

    #[tokio::test]
    async fn reveal_then_observe_marks_only_that_participant() {
        let store = MemoryStore::new();
        let mut session = session(trio(), &store);
        let assignments = session.ensure_assignment().await.unwrap();

        let mut updates = session.observe().await.unwrap();
        let before = updates.next().await.unwrap().unwrap();
        assert_eq!(before.record, RevealRecord::new());
        assert!(!before.is_complete);

        let message = session.reveal("Liz").await.unwrap();
        assert_eq!(Some(&message.recipient), assignments.recipient_for("Liz"));

        let after = updates.next().await.unwrap().unwrap();
        assert!(after.record.is_revealed("Liz"));
        assert!(!after.record.is_revealed("Andy"));
        assert!(!after.record.is_revealed("George"));

        let view = session.apply(after);
        assert_eq!(view.control("Liz"), Some(ControlState::Revealed));
        assert_eq!(view.control("Andy"), Some(ControlState::Hidden));
        assert_eq!(view.messages, vec![message]);
    }

    #[tokio::test]
    async fn concurrent_reveals_do_not_overwrite_each_other() {
        let store = MemoryStore::new();
        let mut andy_phone = session(trio(), &store);
        let mut liz_phone = session(trio(), &store);
        andy_phone.ensure_assignment().await.unwrap();
        liz_phone.ensure_assignment().await.unwrap();

        let (a, b) = tokio::join!(andy_phone.reveal("Andy"), liz_phone.reveal("Liz"));
        a.unwrap();
        b.unwrap();

        let state = andy_phone.snapshot().await.unwrap();
        assert!(state.record.is_revealed("Andy"));
        assert!(state.record.is_revealed("Liz"));
        assert!(!state.is_complete);

        // Each phone shows its own reveal and the other one locked.
        let view = andy_phone.apply(state);
        assert_eq!(view.control("Andy"), Some(ControlState::Revealed));
        assert_eq!(view.control("Liz"), Some(ControlState::Locked));
    }

    #[tokio::test]
    async fn every_device_observes_concurrent_reveals() {
        let store = MemoryStore::new();
        let mut andy_phone = session(trio(), &store);
        let mut liz_phone = session(trio(), &store);
        andy_phone.ensure_assignment().await.unwrap();
        liz_phone.ensure_assignment().await.unwrap();
        let mut andy_updates = andy_phone.observe().await.unwrap();
        let mut liz_updates = liz_phone.observe().await.unwrap();

        let (a, b) = tokio::join!(andy_phone.reveal("Andy"), liz_phone.reveal("Liz"));
        let andy_message = a.unwrap();
        let liz_message = b.unwrap();

        async fn until_both_revealed(
            updates: &mut BoxStream<'static, Result<RevealUpdate, CoordinatorError>>,
        ) -> RevealUpdate {
            let wait = async {
                loop {
                    let update = updates.next().await.unwrap().unwrap();
                    if update.record.is_revealed("Andy") && update.record.is_revealed("Liz") {
                        return update;
                    }
                }
            };
            tokio::time::timeout(Duration::from_secs(1), wait).await.unwrap()
        }

        let seen_by_andy = until_both_revealed(&mut andy_updates).await;
        let seen_by_liz = until_both_revealed(&mut liz_updates).await;
        assert!(!seen_by_andy.record.is_revealed("George"));
        assert_eq!(seen_by_andy.record, seen_by_liz.record);

        // The phone's own write coming back twice renders the same thing.
        let first = andy_phone.apply(seen_by_andy.clone());
        assert_eq!(andy_phone.apply(seen_by_andy), first);
        assert_eq!(first.control("Andy"), Some(ControlState::Revealed));
        assert_eq!(first.control("Liz"), Some(ControlState::Locked));
        assert_eq!(first.messages, vec![andy_message]);

        let view = liz_phone.apply(seen_by_liz);
        assert_eq!(view.control("Andy"), Some(ControlState::Locked));
        assert_eq!(view.messages, vec![liz_message]);
    }

    #[tokio::test]
    async fn reveal_writes_one_flat_flag() {
        let store = MemoryStore::new();
        let roster = Roster::new(["Mary-Kate", "Liz", "George"]).unwrap();
        let mut session = session(roster, &store);
        session.ensure_assignment().await.unwrap();
        session.reveal("Mary-Kate").await.unwrap();

        assert_eq!(
            store.get(&session.paths().revealed).await.unwrap(),
            Some(json!({ "Mary-Kate": true }))
        );
        assert!(session.snapshot().await.unwrap().record.is_revealed("Mary-Kate"));
    }

    #[tokio::test]
    async fn stale_reveal_after_reset_does_not_leak_into_next_game() {
        let store = MemoryStore::new();
        let mut phone = session(trio(), &store);
        let mut admin = session(trio(), &store);
        phone.ensure_assignment().await.unwrap();

        // The phone has not heard about the reset yet.
        admin.reset().await.unwrap();
        assert!(matches!(
            phone.reveal("Andy").await,
            Err(CoordinatorError::GameChanged)
        ));
        assert!(phone.assignments().is_none());
        assert!(phone.layer().is_empty());

        admin.ensure_assignment().await.unwrap();
        assert_eq!(admin.snapshot().await.unwrap().record, RevealRecord::new());

        phone.ensure_assignment().await.unwrap();
        phone.reveal("Andy").await.unwrap();
        assert!(admin.snapshot().await.unwrap().record.is_revealed("Andy"));
    }

    #[tokio::test]
    async fn reveal_with_previous_games_mapping_is_refused() {
        let store = MemoryStore::new();
        let mut phone = session(trio(), &store);
        let old = phone.ensure_assignment().await.unwrap();

        // For three players the only other derangement is the inverse cycle.
        let next: Assignments = old.iter().map(|(g, r)| (r.clone(), g.clone())).collect();
        store
            .set(&phone.paths().assignments, Some(serde_json::to_value(&next).unwrap()))
            .await
            .unwrap();

        assert!(matches!(
            phone.reveal("Liz").await,
            Err(CoordinatorError::GameChanged)
        ));
        assert_eq!(store.get(&phone.paths().revealed).await.unwrap(), None);
        assert_eq!(phone.assignments(), Some(&next));

        let message = phone.reveal("Liz").await.unwrap();
        assert_eq!(Some(&message.recipient), next.recipient_for("Liz"));
    }

    #[tokio::test]
    async fn ensure_drops_flags_left_without_a_mapping() {
        let store = MemoryStore::new();
        let paths = GamePaths::new(DEFAULT_NAMESPACE).unwrap();
        store
            .update(&paths.revealed, json!({ "Andy": true }).as_object().cloned().unwrap())
            .await
            .unwrap();

        let mut session = session(trio(), &store);
        session.ensure_assignment().await.unwrap();
        let state = session.snapshot().await.unwrap();
        assert_eq!(state.record, RevealRecord::new());
        assert!(state.assignments.is_some());
    }

    #[tokio::test]
    async fn complete_only_when_everyone_revealed() {
        let store = MemoryStore::new();
        let roster = Roster::new(["Andy", "Liz"]).unwrap();
        let mut session = session(roster, &store);
        session.ensure_assignment().await.unwrap();

        session.reveal("Andy").await.unwrap();
        assert!(!session.snapshot().await.unwrap().is_complete);

        session.reveal("Liz").await.unwrap();
        let state = session.snapshot().await.unwrap();
        assert!(state.is_complete);
        assert!(session.apply(state).is_complete);
    }

    #[tokio::test]
    async fn failed_reveal_rolls_back_local_marker() {
        let store = FlakyStore::default();
        let cache = MemoryCache::default();
        let mut session =
            Session::open(trio(), store.clone(), cache.clone(), DEFAULT_NAMESPACE).unwrap();
        session.ensure_assignment().await.unwrap();

        store.go_offline();
        let err = session.reveal("George").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(session.layer().is_empty());
        assert_eq!(cache.get(&session.paths().cache_key), None);
        assert_eq!(session.view().control("George"), Some(ControlState::Hidden));
        assert!(!session.snapshot().await.unwrap().record.is_revealed("George"));

        // Clicking again once the store is back works.
        store.go_online();
        session.reveal("George").await.unwrap();
        assert!(session.snapshot().await.unwrap().record.is_revealed("George"));
    }

    #[tokio::test]
    async fn failed_reset_keeps_everything() {
        let store = FlakyStore::default();
        let mut session =
            Session::open(trio(), store.clone(), MemoryCache::default(), DEFAULT_NAMESPACE)
                .unwrap();
        session.ensure_assignment().await.unwrap();
        session.reveal("Andy").await.unwrap();

        store.go_offline();
        assert!(session.reset().await.unwrap_err().is_retryable());
        assert!(session.assignments().is_some());
        assert!(session.layer().revealed_here("Andy"));
        assert!(session.snapshot().await.unwrap().record.is_revealed("Andy"));
    }

    #[tokio::test]
    async fn reset_then_ensure_starts_a_clean_epoch() {
        let store = MemoryStore::new();
        let cache = MemoryCache::default();
        let mut session =
            Session::open(trio(), store.clone(), cache.clone(), DEFAULT_NAMESPACE).unwrap();
        session.ensure_assignment().await.unwrap();
        session.reveal("Andy").await.unwrap();
        assert!(cache.get(&session.paths().cache_key).is_some());

        session.reset().await.unwrap();
        assert!(session.assignments().is_none());
        assert_eq!(cache.get(&session.paths().cache_key), None);
        assert_eq!(store.get(&session.paths().assignments).await.unwrap(), None);

        let fresh = session.ensure_assignment().await.unwrap();
        fresh.validate(&trio()).unwrap();
        let state = session.snapshot().await.unwrap();
        assert_eq!(state.record, RevealRecord::new());
        assert_eq!(state.assignments, Some(fresh));
    }

    #[tokio::test]
    async fn reset_elsewhere_clears_this_device() {
        let store = MemoryStore::new();
        let mut phone = session(trio(), &store);
        let mut admin = session(trio(), &store);
        phone.ensure_assignment().await.unwrap();
        phone.reveal("George").await.unwrap();

        admin.reset().await.unwrap();

        let update = phone.snapshot().await.unwrap();
        assert!(update.assignments.is_none());
        let view = phone.apply(update.clone());
        assert_eq!(view.control("George"), Some(ControlState::Hidden));
        assert!(view.messages.is_empty());
        assert!(phone.layer().is_empty());
        assert!(phone.assignments().is_none());

        // Same notification again changes nothing.
        assert_eq!(phone.apply(update), view);
    }

    #[tokio::test]
    async fn optimistic_layer_survives_reopen() {
        let store = MemoryStore::new();
        let cache = MemoryCache::default();
        let mut phone =
            Session::open(trio(), store.clone(), cache.clone(), DEFAULT_NAMESPACE).unwrap();
        phone.ensure_assignment().await.unwrap();
        let message = phone.reveal("Liz").await.unwrap();

        let mut reopened = Session::open(trio(), store.clone(), cache, DEFAULT_NAMESPACE).unwrap();
        assert!(reopened.layer().revealed_here("Liz"));
        let state = reopened.snapshot().await.unwrap();
        let view = reopened.apply(state);
        assert_eq!(view.messages, vec![message]);
    }

    #[tokio::test]
    async fn namespaces_are_independent_games() {
        let store = MemoryStore::new();
        let mut home = session(trio(), &store);
        let mut office =
            Session::open(trio(), store.clone(), MemoryCache::default(), "office").unwrap();
        home.ensure_assignment().await.unwrap();
        office.ensure_assignment().await.unwrap();

        home.reveal("Andy").await.unwrap();
        office.reset().await.unwrap();

        assert!(home.snapshot().await.unwrap().record.is_revealed("Andy"));
        assert!(home.snapshot().await.unwrap().assignments.is_some());
        assert!(office.snapshot().await.unwrap().assignments.is_none());
    }

    #[tokio::test]
    async fn seeded_sessions_agree() {
        let mut a =
            Session::open(trio(), MemoryStore::new(), MemoryCache::default(), DEFAULT_NAMESPACE)
                .unwrap()
                .with_seed(42);
        let mut b =
            Session::open(trio(), MemoryStore::new(), MemoryCache::default(), DEFAULT_NAMESPACE)
                .unwrap()
                .with_seed(42);
        assert_eq!(
            a.ensure_assignment().await.unwrap(),
            b.ensure_assignment().await.unwrap()
        );
    }

    #[tokio::test]
    async fn three_way_example_is_a_derangement() {
        let store = MemoryStore::new();
        let mut session = session(trio(), &store);
        let assignments = session.ensure_assignment().await.unwrap();
        let mut recipients: Vec<_> = assignments.iter().map(|(_, r)| r.clone()).collect();
        recipients.sort();
        assert_eq!(recipients, ["Andy", "George", "Liz"]);
        assert!(assignments.iter().all(|(g, r)| g != r));
    }
}
