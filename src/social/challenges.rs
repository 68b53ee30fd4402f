//! Challenge progress engine.
//!
//! Each (user, challenge type) pair moves through three states: not started
//! (no record, progress 0), in progress, and completed. Completion is terminal:
//! the record is deleted, the matching badge is activated and bonus points are
//! awarded in a single conditional document update, applied only while the
//! stored badge list is unchanged since it was read, so the bonus is paid at
//! most once.
//!
//! Increments are applied locally first and then persisted. A failed persist
//! rolls the local value back. A failed completion leaves the record at its
//! goal; [`ChallengeEngine::repair`] finishes it on the next profile load.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::{json, Value};

use super::badges::badge_for;
use super::profile::ProfileError;
use super::types::{ChallengeCatalog, ChallengeProgress, ChallengeType, ProfileDocument, UserProfile};
use crate::config::RewardSettings;
use crate::listings::USERS_COLLECTION;
use crate::storage::ChallengeCache;
use crate::store::{Document, DocumentStore, FieldUpdate, Precondition, StoreError};

/// Compare-and-swap rounds for a completion before giving up.
const MAX_COMPLETION_ATTEMPTS: usize = 5;

/// Result of one increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// Progress moved forward without reaching the goal.
    Advanced(ChallengeProgress),
    /// The goal was reached and the completion was stored.
    Completed {
        challenge_type: ChallengeType,
        badge_id: String,
        points_awarded: i64,
    },
    /// The goal was reached but the completion could not be stored yet.
    CompletionDeferred(ChallengeProgress),
    /// The badge is already earned; nothing changed.
    AlreadyCompleted(ChallengeType),
    /// The record is at its goal and waiting for repair; nothing changed.
    AwaitingCompletion(ChallengeProgress),
    /// No challenge of this type is defined; nothing changed.
    Skipped(ChallengeType),
}

impl IncrementOutcome {
    /// Whether this call changed any state.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            IncrementOutcome::Advanced(_)
                | IncrementOutcome::Completed { .. }
                | IncrementOutcome::CompletionDeferred(_)
        )
    }
}

/// Per-type results of one trigger. Each increment succeeds or fails on its own.
#[derive(Debug, Default)]
pub struct TriggerReport {
    pub outcomes: Vec<(ChallengeType, Result<IncrementOutcome, ChallengeError>)>,
}

impl TriggerReport {
    pub fn outcome(&self, challenge_type: ChallengeType) -> Option<&Result<IncrementOutcome, ChallengeError>> {
        self.outcomes
            .iter()
            .find(|(ty, _)| *ty == challenge_type)
            .map(|(_, outcome)| outcome)
    }

    /// Badge ids earned by this trigger.
    pub fn completed_badges(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                Ok(IncrementOutcome::Completed { badge_id, .. }) => Some(badge_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count()
    }
}

#[derive(Debug, Default)]
struct UserChallengeState {
    progress: BTreeMap<ChallengeType, ChallengeProgress>,
    completed: BTreeSet<ChallengeType>,
    /// Increments between local apply and remote confirmation.
    in_flight: usize,
}

/// Challenge progress engine.
pub struct ChallengeEngine<S: DocumentStore> {
    store: Arc<S>,
    catalog: ChallengeCatalog,
    rewards: RewardSettings,
    cache: Option<Arc<ChallengeCache>>,
    sync_interval: Duration,
    users: Mutex<HashMap<String, UserChallengeState>>,
}

impl<S: DocumentStore> ChallengeEngine<S> {
    pub fn new(store: Arc<S>, catalog: ChallengeCatalog, rewards: RewardSettings) -> Self {
        Self {
            store,
            catalog,
            rewards,
            cache: None,
            sync_interval: Duration::zero(),
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Mirror local progress into a SQLite cache. Cached copies older than
    /// `sync_interval` are not served.
    pub fn with_cache(mut self, cache: Arc<ChallengeCache>, sync_interval: Duration) -> Self {
        self.cache = Some(cache);
        self.sync_interval = sync_interval;
        self
    }

    pub fn catalog(&self) -> &ChallengeCatalog {
        &self.catalog
    }

    /// Advance one challenge by one qualifying action.
    pub async fn increment(
        &self,
        user_id: &str,
        challenge_type: ChallengeType,
    ) -> Result<IncrementOutcome, ChallengeError> {
        let definition = self
            .catalog
            .get(challenge_type)
            .ok_or(ChallengeError::NotFound(challenge_type))?;
        let goal = definition.goal;

        self.ensure_loaded(user_id).await?;

        // Guard and optimistic local apply.
        let (previous, next) = {
            let mut users = self.lock_users();
            let state = users.entry(user_id.to_string()).or_default();
            if state.completed.contains(&challenge_type) {
                tracing::debug!("{} already completed {}", user_id, challenge_type);
                return Ok(IncrementOutcome::AlreadyCompleted(challenge_type));
            }
            let previous = state.progress.get(&challenge_type).copied();
            let current = previous.unwrap_or_else(|| ChallengeProgress::new(challenge_type, goal));
            if current.is_complete() {
                return Ok(IncrementOutcome::AwaitingCompletion(current));
            }
            let next = ChallengeProgress {
                progress: current.progress + 1,
                ..current
            };
            state.progress.insert(challenge_type, next);
            state.in_flight += 1;
            (previous, next)
        };

        let persisted = self
            .store
            .update(
                USERS_COLLECTION,
                user_id,
                vec![
                    (
                        challenge_type.record_path(),
                        FieldUpdate::Set(json!({ "progress": next.progress, "goal": next.goal })),
                    ),
                    ("updated_at".to_string(), FieldUpdate::set(Utc::now().timestamp_millis())),
                ],
            )
            .await;

        if let Err(e) = persisted {
            tracing::warn!("Failed to persist {} progress for {}: {}", challenge_type, user_id, e);
            self.finish(user_id, |state| {
                if state.progress.get(&challenge_type) == Some(&next) {
                    match previous {
                        Some(previous) => state.progress.insert(challenge_type, previous),
                        None => state.progress.remove(&challenge_type),
                    };
                }
            });
            return Err(e.into());
        }
        tracing::info!(
            "{} progress for {}: {}/{}",
            challenge_type,
            user_id,
            next.progress,
            next.goal
        );

        if !next.is_complete() {
            self.finish(user_id, |_| {});
            return Ok(IncrementOutcome::Advanced(next));
        }

        match self.complete(user_id, challenge_type).await {
            Ok(points_awarded) => {
                self.finish(user_id, |state| {
                    state.progress.remove(&challenge_type);
                    state.completed.insert(challenge_type);
                });
                Ok(IncrementOutcome::Completed {
                    challenge_type,
                    badge_id: challenge_type.badge_id().to_string(),
                    points_awarded,
                })
            }
            Err(e) => {
                tracing::warn!(
                    "Completion of {} for {} deferred: {}",
                    challenge_type,
                    user_id,
                    e
                );
                self.finish(user_id, |_| {});
                Ok(IncrementOutcome::CompletionDeferred(next))
            }
        }
    }

    /// Finish every challenge record that reached its goal without its badge
    /// being stored. Returns the types that were completed.
    pub async fn repair(&self, user_id: &str) -> Result<Vec<ChallengeType>, ChallengeError> {
        let document = self.fetch_profile(user_id).await?;
        let pending: Vec<ChallengeType> = document
            .active_challenges()
            .into_iter()
            .filter(ChallengeProgress::is_complete)
            .map(|c| c.challenge_type)
            .collect();

        let mut repaired = Vec::new();
        for challenge_type in pending {
            match self.complete(user_id, challenge_type).await {
                Ok(points) => {
                    tracing::info!(
                        "Repaired completion of {} for {} (+{} points)",
                        challenge_type,
                        user_id,
                        points
                    );
                    self.with_state(user_id, |state| {
                        state.progress.remove(&challenge_type);
                        state.completed.insert(challenge_type);
                    });
                    repaired.push(challenge_type);
                }
                Err(e) => {
                    tracing::warn!("Repair of {} for {} failed: {}", challenge_type, user_id, e);
                    return Err(ChallengeError::BadgeActivationInconsistency(challenge_type));
                }
            }
        }
        Ok(repaired)
    }

    /// Triggers for a successful upload: sharing and zero-waste always, the
    /// eco-container challenge when an eco tag is present.
    pub async fn on_listing_uploaded(&self, user_id: &str, tags: &[String]) -> TriggerReport {
        let mut types = vec![ChallengeType::Sharing, ChallengeType::ZeroWaste];
        if tags.iter().any(|tag| self.rewards.is_eco_tag(tag)) {
            types.push(ChallengeType::EcoContainer);
        }
        self.trigger(user_id, &types).await
    }

    /// Trigger for a fridge-cleaning action.
    pub async fn on_fridge_cleaning(&self, user_id: &str) -> TriggerReport {
        self.trigger(user_id, &[ChallengeType::FridgeCleaning]).await
    }

    async fn trigger(&self, user_id: &str, types: &[ChallengeType]) -> TriggerReport {
        let mut report = TriggerReport::default();
        for &challenge_type in types {
            let outcome = match self.increment(user_id, challenge_type).await {
                Err(ChallengeError::NotFound(missing)) => {
                    tracing::warn!("No {} challenge defined, skipping", missing);
                    Ok(IncrementOutcome::Skipped(missing))
                }
                other => other,
            };
            report.outcomes.push((challenge_type, outcome));
        }
        report
    }

    /// Adopt a pushed profile as the local state, unless an increment for
    /// this user is still waiting on the store.
    pub fn observe_profile(&self, profile: &UserProfile) {
        let Some(user_id) = profile.id.as_deref() else {
            return;
        };
        let adopted = {
            let mut users = self.lock_users();
            let state = users.entry(user_id.to_string()).or_default();
            if state.in_flight > 0 {
                tracing::debug!("Ignoring profile push for {} during {} pending writes", user_id, state.in_flight);
                false
            } else {
                state.progress = profile
                    .active_challenges
                    .iter()
                    .map(|c| (c.challenge_type, *c))
                    .collect();
                state.completed = ChallengeType::ALL
                    .into_iter()
                    .filter(|ty| profile.badge_active(ty.badge_id()))
                    .collect();
                true
            }
        };
        if adopted {
            self.write_cache(user_id);
        }
    }

    /// Local progress for display, in catalog order.
    pub fn progress(&self, user_id: &str) -> Vec<ChallengeProgress> {
        let users = self.lock_users();
        let mut progress: Vec<ChallengeProgress> = users
            .get(user_id)
            .map(|state| state.progress.values().copied().collect())
            .unwrap_or_default();
        progress.sort_by_key(|c| self.catalog.position(c.challenge_type));
        progress
    }

    /// Progress from the local cache. `None` without a cache, or when the
    /// cached copy is older than the sync interval.
    pub fn cached_progress(&self, user_id: &str) -> Option<Vec<ChallengeProgress>> {
        let cache = self.cache.as_ref()?;
        let cached = cache.needs_sync(user_id, self.sync_interval).and_then(|stale| {
            if stale {
                Ok(None)
            } else {
                cache.load(user_id).map(Some)
            }
        });
        match cached {
            Ok(Some(mut progress)) => {
                progress.sort_by_key(|c| self.catalog.position(c.challenge_type));
                Some(progress)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read challenge cache: {}", e);
                None
            }
        }
    }

    /// Progress for display before the first profile push: the loaded state
    /// when there is one, else a fresh cached copy, else the stored profile.
    pub async fn load_progress(&self, user_id: &str) -> Result<Vec<ChallengeProgress>, ChallengeError> {
        if self.lock_users().contains_key(user_id) {
            return Ok(self.progress(user_id));
        }
        if let Some(progress) = self.cached_progress(user_id) {
            tracing::debug!("Serving cached challenge progress for {}", user_id);
            return Ok(progress);
        }
        self.ensure_loaded(user_id).await?;
        self.write_cache(user_id);
        Ok(self.progress(user_id))
    }

    /// Number of challenges with a record in progress.
    pub fn active_challenge_count(&self, user_id: &str) -> usize {
        self.lock_users()
            .get(user_id)
            .map_or(0, |state| state.progress.len())
    }

    /// Challenge badges earned in the calendar month (UTC) of `now`.
    pub fn completed_in_month(&self, profile: &UserProfile, now: DateTime<Utc>) -> usize {
        profile
            .badges
            .iter()
            .filter(|badge| badge.active && ChallengeType::ALL.iter().any(|ty| ty.badge_id() == badge.id))
            .filter_map(|badge| badge.earned_at)
            .filter(|earned| earned.year() == now.year() && earned.month() == now.month())
            .count()
    }

    /// Drop local state and cached progress for a user.
    pub fn forget(&self, user_id: &str) {
        self.lock_users().remove(user_id);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear(user_id) {
                tracing::warn!("Failed to clear challenge cache for {}: {}", user_id, e);
            }
        }
    }

    /// Completion transition. Returns the points awarded, 0 when the badge
    /// was already active and only the leftover record was removed.
    ///
    /// The badge list is written with a compare-and-swap on its stored value,
    /// so a concurrent completion for the same user is re-read instead of
    /// overwritten.
    async fn complete(&self, user_id: &str, challenge_type: ChallengeType) -> Result<i64, ChallengeError> {
        let badge_id = challenge_type.badge_id();
        for attempt in 1..=MAX_COMPLETION_ATTEMPTS {
            let (raw, document) = self.fetch_document(user_id).await?;
            let now = Utc::now();
            let mut updates = vec![
                (challenge_type.record_path(), FieldUpdate::Delete),
                ("updated_at".to_string(), FieldUpdate::set(now.timestamp_millis())),
            ];

            if document.badge_active(badge_id) {
                self.store.update(USERS_COLLECTION, user_id, updates).await?;
                return Ok(0);
            }

            let mut badges = document.badges;
            match badges.iter_mut().find(|b| b.id == badge_id) {
                Some(badge) => badge.activate(now),
                None => {
                    let mut badge = badge_for(challenge_type);
                    badge.activate(now);
                    badges.push(badge);
                }
            }
            let badges: Value = serde_json::to_value(&badges).map_err(StoreError::from)?;
            updates.push(("badges".to_string(), FieldUpdate::Set(badges)));
            updates.push(("points".to_string(), FieldUpdate::Increment(self.rewards.completion_points)));

            let expected = match raw.get("badges") {
                Some(current) => Precondition::equals("badges", current.clone()),
                None => Precondition::missing("badges"),
            };
            if self
                .store
                .update_if(USERS_COLLECTION, user_id, vec![expected], updates)
                .await?
            {
                tracing::info!(
                    "{} completed {}: badge {} earned, +{} points",
                    user_id,
                    challenge_type,
                    badge_id,
                    self.rewards.completion_points
                );
                return Ok(self.rewards.completion_points);
            }
            tracing::debug!(
                "Badges for {} changed during completion of {} (attempt {})",
                user_id,
                challenge_type,
                attempt
            );
        }
        Err(StoreError::Conflict(format!("badges of {} kept changing", user_id)).into())
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<ProfileDocument, ChallengeError> {
        self.fetch_document(user_id).await.map(|(_, document)| document)
    }

    /// Fetch the user document both raw and decoded.
    async fn fetch_document(&self, user_id: &str) -> Result<(Document, ProfileDocument), ChallengeError> {
        let raw = self
            .store
            .get(USERS_COLLECTION, user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: USERS_COLLECTION.to_string(),
                id: user_id.to_string(),
            })?;
        let document = raw
            .decode()
            .map_err(|e| ChallengeError::Profile(ProfileError::Malformed(e.to_string())))?;
        Ok((raw, document))
    }

    /// Seed local state from the stored profile the first time a user is seen.
    async fn ensure_loaded(&self, user_id: &str) -> Result<(), ChallengeError> {
        if self.lock_users().contains_key(user_id) {
            return Ok(());
        }
        let document = self.fetch_profile(user_id).await?;
        let mut users = self.lock_users();
        users.entry(user_id.to_string()).or_insert_with(|| UserChallengeState {
            progress: document
                .active_challenges()
                .into_iter()
                .map(|c| (c.challenge_type, c))
                .collect(),
            completed: ChallengeType::ALL
                .into_iter()
                .filter(|ty| document.badge_active(ty.badge_id()))
                .collect(),
            in_flight: 0,
        });
        Ok(())
    }

    /// Release one in-flight slot after applying `f`, then refresh the cache.
    fn finish(&self, user_id: &str, f: impl FnOnce(&mut UserChallengeState)) {
        self.with_state(user_id, |state| {
            f(state);
            state.in_flight = state.in_flight.saturating_sub(1);
        });
    }

    /// Apply `f` to a user's loaded state. Users not loaded yet are left
    /// alone so the next increment seeds them from the store.
    fn with_state(&self, user_id: &str, f: impl FnOnce(&mut UserChallengeState)) {
        {
            let mut users = self.lock_users();
            match users.get_mut(user_id) {
                Some(state) => f(state),
                None => return,
            }
        }
        self.write_cache(user_id);
    }

    fn write_cache(&self, user_id: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        let progress = self.progress(user_id);
        if let Err(e) = cache.save(user_id, &progress) {
            tracing::warn!("Failed to update challenge cache: {}", e);
        }
    }

    fn lock_users(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserChallengeState>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Challenge errors.
#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("Challenge not found: {0}")]
    NotFound(ChallengeType),

    #[error("Badge activation pending for {0}")]
    BadgeActivationInconsistency(ChallengeType),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::social::badges::default_badges;
    use crate::social::types::ChallengeRecord;
    use crate::store::{Document, MemoryStore, StoreCall};

    fn engine(store: &Arc<MemoryStore>) -> ChallengeEngine<MemoryStore> {
        ChallengeEngine::new(Arc::clone(store), ChallengeCatalog::default(), RewardSettings::default())
    }

    async fn user_with(store: &MemoryStore, id: &str, challenges: &[(ChallengeType, u32, u32)]) {
        let records: BTreeMap<String, ChallengeRecord> = challenges
            .iter()
            .map(|(ty, progress, goal)| {
                (ty.as_str().to_string(), ChallengeRecord { progress: *progress, goal: *goal })
            })
            .collect();
        let document = ProfileDocument {
            display_name: "小明".to_string(),
            email: None,
            photo_url: None,
            points: 100,
            share_count: 0,
            receive_count: 0,
            is_premium: false,
            badges: default_badges(Utc::now()),
            favorites: Vec::new(),
            uploads: Vec::new(),
            challenges: records,
            created_at: None,
            updated_at: None,
        };
        store
            .set(USERS_COLLECTION, Document::from_serializable(id, &document).unwrap())
            .await
            .unwrap();
    }

    async fn stored(store: &MemoryStore, id: &str) -> ProfileDocument {
        store.get(USERS_COLLECTION, id).await.unwrap().unwrap().decode().unwrap()
    }

    #[tokio::test]
    async fn test_first_increment_creates_record() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[]).await;
        let engine = engine(&store);

        let outcome = engine.increment("u1", ChallengeType::Sharing).await.unwrap();
        assert_eq!(
            outcome,
            IncrementOutcome::Advanced(ChallengeProgress {
                challenge_type: ChallengeType::Sharing,
                progress: 1,
                goal: 10
            })
        );
        let document = stored(&store, "u1").await;
        assert_eq!(document.challenges["sharing"], ChallengeRecord { progress: 1, goal: 10 });
    }

    #[tokio::test]
    async fn test_reaching_goal_completes_once() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[(ChallengeType::ZeroWaste, 4, 5)]).await;
        let engine = engine(&store);

        let outcome = engine.increment("u1", ChallengeType::ZeroWaste).await.unwrap();
        assert!(matches!(outcome, IncrementOutcome::Completed { points_awarded: 50, .. }));

        let document = stored(&store, "u1").await;
        assert_eq!(document.points, 150);
        assert!(document.badge_active("zero_waste_challenge"));
        assert!(!document.challenges.contains_key("zero_waste"));
        let earned_at = document
            .badges
            .iter()
            .find(|b| b.id == "zero_waste_challenge")
            .and_then(|b| b.earned_at);
        assert!(earned_at.is_some());

        let again = engine.increment("u1", ChallengeType::ZeroWaste).await.unwrap();
        assert_eq!(again, IncrementOutcome::AlreadyCompleted(ChallengeType::ZeroWaste));
        assert_eq!(stored(&store, "u1").await, document);
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[(ChallengeType::Sharing, 3, 10)]).await;
        let engine = engine(&store);
        store.fail_when(|call| {
            call.touches("challenges.sharing")
                .then(|| StoreError::Unavailable("offline".into()))
        });

        let result = engine.increment("u1", ChallengeType::Sharing).await;
        assert!(matches!(result, Err(ChallengeError::Store(StoreError::Unavailable(_)))));
        assert_eq!(engine.progress("u1")[0].progress, 3);
    }

    #[tokio::test]
    async fn test_failed_completion_is_deferred_then_repaired() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[(ChallengeType::FridgeCleaning, 2, 3)]).await;
        let engine = engine(&store);
        store.fail_when(|call| call.touches("badges").then(|| StoreError::Query("aborted".into())));

        let outcome = engine.increment("u1", ChallengeType::FridgeCleaning).await.unwrap();
        assert!(matches!(outcome, IncrementOutcome::CompletionDeferred(p) if p.progress == 3));
        let document = stored(&store, "u1").await;
        assert_eq!(document.challenges["fridge_cleaning"].progress, 3);
        assert!(!document.badge_active("fridge_challenge"));

        // At goal but not yet converted: further triggers change nothing.
        let waiting = engine.increment("u1", ChallengeType::FridgeCleaning).await.unwrap();
        assert!(matches!(waiting, IncrementOutcome::AwaitingCompletion(_)));

        store.clear_failures();
        let repaired = engine.repair("u1").await.unwrap();
        assert_eq!(repaired, vec![ChallengeType::FridgeCleaning]);
        let document = stored(&store, "u1").await;
        assert!(document.badge_active("fridge_challenge"));
        assert_eq!(document.points, 150);
        assert!(document.challenges.is_empty());

        // Repair is idempotent.
        assert!(engine.repair("u1").await.unwrap().is_empty());
        assert_eq!(stored(&store, "u1").await.points, 150);
    }

    #[tokio::test]
    async fn test_repair_without_bonus_when_badge_already_active() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[(ChallengeType::Sharing, 10, 10)]).await;
        let mut document = stored(&store, "u1").await;
        for badge in &mut document.badges {
            if badge.id == "sharing_challenge" {
                badge.activate(Utc::now());
            }
        }
        store
            .set(USERS_COLLECTION, Document::from_serializable("u1", &document).unwrap())
            .await
            .unwrap();
        let engine = engine(&store);

        engine.repair("u1").await.unwrap();
        let document = stored(&store, "u1").await;
        assert_eq!(document.points, 100);
        assert!(document.challenges.is_empty());
    }

    #[tokio::test]
    async fn test_upload_trigger_is_independent_per_type() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[]).await;
        let engine = engine(&store);
        store.fail_when(|call| {
            call.touches("challenges.sharing")
                .then(|| StoreError::Unavailable("flaky".into()))
        });

        let report = engine.on_listing_uploaded("u1", &["環保".to_string()]).await;
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.failures(), 1);
        assert!(matches!(
            report.outcome(ChallengeType::ZeroWaste),
            Some(Ok(IncrementOutcome::Advanced(_)))
        ));
        assert!(matches!(
            report.outcome(ChallengeType::EcoContainer),
            Some(Ok(IncrementOutcome::Advanced(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_challenge_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[]).await;
        let catalog = ChallengeCatalog::new(vec![crate::social::ChallengeDefinition::new(
            ChallengeType::Sharing,
            "分享達人挑戰",
            "分享10項食材",
            10,
            "4ECDC4",
        )]);
        let engine = ChallengeEngine::new(Arc::clone(&store), catalog, RewardSettings::default());

        let report = engine.on_fridge_cleaning("u1").await;
        assert!(matches!(
            report.outcome(ChallengeType::FridgeCleaning),
            Some(Ok(IncrementOutcome::Skipped(ChallengeType::FridgeCleaning)))
        ));
        assert!(!store.calls().iter().any(|c| matches!(c, StoreCall::Update { .. })));
    }

    #[tokio::test]
    async fn test_observe_profile_ignored_while_in_flight() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[(ChallengeType::Sharing, 2, 10)]).await;
        let engine = engine(&store);
        engine.increment("u1", ChallengeType::Sharing).await.unwrap();

        {
            let mut users = engine.lock_users();
            users.get_mut("u1").unwrap().in_flight = 1;
        }
        let mut stale = UserProfile::guest();
        stale.id = Some("u1".to_string());
        stale.active_challenges = vec![ChallengeProgress {
            challenge_type: ChallengeType::Sharing,
            progress: 2,
            goal: 10,
        }];
        engine.observe_profile(&stale);
        assert_eq!(engine.progress("u1")[0].progress, 3);

        engine.lock_users().get_mut("u1").unwrap().in_flight = 0;
        engine.observe_profile(&stale);
        assert_eq!(engine.progress("u1")[0].progress, 2);
    }

    #[tokio::test]
    async fn test_cache_mirrors_progress() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[]).await;
        let cache = Arc::new(ChallengeCache::open_in_memory().unwrap());
        let engine = engine(&store).with_cache(Arc::clone(&cache), Duration::hours(6));

        engine.on_fridge_cleaning("u1").await;
        assert_eq!(
            engine.cached_progress("u1"),
            Some(vec![ChallengeProgress {
                challenge_type: ChallengeType::FridgeCleaning,
                progress: 1,
                goal: 3
            }])
        );

        engine.forget("u1");
        assert_eq!(engine.cached_progress("u1"), None);
        assert!(cache.last_synced("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_store_fetch() {
        let store = Arc::new(MemoryStore::new());
        user_with(&store, "u1", &[(ChallengeType::Sharing, 4, 10)]).await;
        let cache = Arc::new(ChallengeCache::open_in_memory().unwrap());
        cache
            .save("u1", &[ChallengeProgress { challenge_type: ChallengeType::Sharing, progress: 3, goal: 10 }])
            .unwrap();

        let fresh = engine(&store).with_cache(Arc::clone(&cache), Duration::hours(6));
        store.clear_calls();
        let progress = fresh.load_progress("u1").await.unwrap();
        assert_eq!(progress[0].progress, 3);
        assert!(store.calls().is_empty());

        // A zero interval makes every cached copy stale.
        let stale = engine(&store).with_cache(Arc::clone(&cache), Duration::zero());
        assert_eq!(stale.cached_progress("u1"), None);
        let progress = stale.load_progress("u1").await.unwrap();
        assert_eq!(progress[0].progress, 4);
        assert!(store.calls().iter().any(|c| matches!(c, StoreCall::Get { .. })));
        assert_eq!(cache.load("u1").unwrap()[0].progress, 4);
    }

    #[tokio::test]
    async fn test_challenge_summaries() {
        let store = Arc::new(MemoryStore::new());
        user_with(
            &store,
            "u1",
            &[(ChallengeType::Sharing, 2, 10), (ChallengeType::ZeroWaste, 1, 5)],
        )
        .await;
        let engine = engine(&store);
        assert_eq!(engine.active_challenge_count("u1"), 0);
        engine.load_progress("u1").await.unwrap();
        assert_eq!(engine.active_challenge_count("u1"), 2);

        let now = Utc::now();
        let mut profile = UserProfile::guest();
        profile.badges = default_badges(now - Duration::days(400));
        for badge in &mut profile.badges {
            match badge.id.as_str() {
                "sharing_challenge" => badge.activate(now),
                "eco_challenge" => badge.activate(now - Duration::days(400)),
                _ => {}
            }
        }
        // The newcomer badge is active but is not a challenge badge.
        assert!(profile.badge_active("newcomer"));
        assert_eq!(engine.completed_in_month(&profile, now), 1);
    }
}
