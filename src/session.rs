//! Per-session wiring.
//!
//! A [`Session`] owns one listing repository, one profile manager and one
//! challenge engine over a shared document store, and runs the user-facing
//! flows that touch more than one of them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::listings::{CreatedListing, ListingDraft, ListingError, ListingRepository, UploaderRef};
use crate::social::{
    ChallengeCatalog, ChallengeEngine, ChallengeError, ChallengeProgress, ChallengeType, Identity,
    ProfileError, ProfileManager, ProvisionOutcome, TriggerReport,
};
use crate::storage::ChallengeCache;
use crate::store::DocumentStore;

/// Result of signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignIn {
    pub provisioned: ProvisionOutcome,
    /// Challenges whose pending completion was finished during sign-in.
    pub repaired: Vec<ChallengeType>,
}

/// Result of an upload.
#[derive(Debug)]
pub struct UploadReceipt {
    pub created: CreatedListing,
    pub challenges: TriggerReport,
}

/// One signed-in (or guest) client session.
pub struct Session<S: DocumentStore> {
    config: AppConfig,
    listings: ListingRepository<S>,
    profiles: ProfileManager<S>,
    challenges: Arc<ChallengeEngine<S>>,
    mirror: Mutex<Option<JoinHandle<()>>>,
}

impl<S: DocumentStore> Session<S> {
    /// Create a session, opening the challenge cache when it is enabled.
    /// A cache that cannot be opened is skipped.
    pub fn open(store: Arc<S>, config: AppConfig) -> Self {
        let cache = if config.cache.enabled {
            match ChallengeCache::open(&config.cache_path()) {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    tracing::warn!("Challenge cache unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self::new(store, config, cache)
    }

    pub fn new(store: Arc<S>, config: AppConfig, cache: Option<Arc<ChallengeCache>>) -> Self {
        let catalog = ChallengeCatalog::default();
        let mut engine = ChallengeEngine::new(Arc::clone(&store), catalog.clone(), config.rewards.clone());
        if let Some(cache) = cache {
            engine = engine.with_cache(cache, config.cache.sync_interval());
        }
        Self {
            listings: ListingRepository::new(
                Arc::clone(&store),
                config.discovery.clone(),
                config.rewards.clone(),
            ),
            profiles: ProfileManager::new(store, catalog),
            challenges: Arc::new(engine),
            mirror: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn listings(&self) -> &ListingRepository<S> {
        &self.listings
    }

    pub fn profiles(&self) -> &ProfileManager<S> {
        &self.profiles
    }

    pub fn challenges(&self) -> &ChallengeEngine<S> {
        &self.challenges
    }

    pub fn user_id(&self) -> Option<String> {
        self.profiles.current_user_id()
    }

    /// Provision or refresh the profile, follow it, and finish any challenge
    /// completion left pending by an earlier session.
    pub async fn sign_in(&self, identity: &Identity) -> Result<SignIn, SessionError> {
        if self.user_id().is_some() {
            self.sign_out();
        }

        let provisioned = self.profiles.create_or_update(identity).await?;
        self.profiles.load(&identity.uid)?;
        self.start_mirror();

        let repaired = match self.challenges.repair(&identity.uid).await {
            Ok(repaired) => repaired,
            Err(e) => {
                tracing::warn!("Challenge repair for {} postponed: {}", identity.uid, e);
                Vec::new()
            }
        };
        tracing::info!("Signed in {} ({:?})", identity.uid, provisioned);
        Ok(SignIn { provisioned, repaired })
    }

    /// Challenge progress for display. Before the first profile push this is
    /// served from the local cache while it is fresh.
    pub async fn challenge_progress(&self) -> Result<Vec<ChallengeProgress>, SessionError> {
        let user_id = self.user_id().ok_or(ProfileError::NotSignedIn)?;
        Ok(self.challenges.load_progress(&user_id).await?)
    }

    /// Tear down every feed, drop cached progress and fall back to the guest
    /// profile.
    pub fn sign_out(&self) {
        let user_id = self.user_id();
        self.stop_mirror();
        self.listings.unsubscribe();
        self.profiles.sign_out();
        if let Some(user_id) = user_id {
            self.challenges.forget(&user_id);
        }
    }

    /// Store a listing and advance the upload challenges.
    pub async fn upload(&self, draft: ListingDraft) -> Result<UploadReceipt, SessionError> {
        let user_id = self.user_id().ok_or(ProfileError::NotSignedIn)?;
        let mut profile = self.profiles.current();
        if profile.id.as_deref() != Some(user_id.as_str()) {
            profile = self.profiles.fetch().await?;
        }
        let uploader = UploaderRef::new(profile.display_name, profile.share_count);

        let created = self.listings.create(draft, &user_id, uploader).await?;
        let challenges = self
            .challenges
            .on_listing_uploaded(&user_id, &created.listing.tags)
            .await;
        if challenges.failures() > 0 {
            tracing::warn!(
                "{} challenge updates failed after upload of {}",
                challenges.failures(),
                created.listing.id
            );
        }
        Ok(UploadReceipt { created, challenges })
    }

    /// Record one fridge-cleaning action.
    pub async fn clean_fridge(&self) -> Result<TriggerReport, SessionError> {
        let user_id = self.user_id().ok_or(ProfileError::NotSignedIn)?;
        Ok(self.challenges.on_fridge_cleaning(&user_id).await)
    }

    /// Flip a listing's favorite state. Returns whether it is now a favorite.
    pub async fn toggle_favorite(&self, listing_id: &str) -> Result<bool, SessionError> {
        if self.profiles.current().is_favorite(listing_id) {
            self.profiles.remove_favorite(listing_id).await?;
            Ok(false)
        } else {
            self.profiles.add_favorite(listing_id).await?;
            Ok(true)
        }
    }

    /// Feed every profile push into the challenge engine.
    fn start_mirror(&self) {
        self.stop_mirror();
        let mut profiles = self.profiles.subscribe();
        let engine = Arc::clone(&self.challenges);
        let task = tokio::spawn(async move {
            while profiles.changed().await.is_ok() {
                let profile = profiles.borrow_and_update().clone();
                engine.observe_profile(&profile);
            }
        });
        *self.mirror.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    fn stop_mirror(&self) {
        if let Some(task) = self.mirror.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

impl<S: DocumentStore> Drop for Session<S> {
    fn drop(&mut self) {
        self.stop_mirror();
    }
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),
}
