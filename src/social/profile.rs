//! User profile aggregate.
//!
//! Publishes the signed-in user's profile through a watch channel. Every
//! remote push replaces the whole published value; signing out publishes the
//! guest profile.

use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use super::badges::{default_badges, migrate_badges, needs_migration};
use super::types::{ChallengeCatalog, ChallengeRecord, ProfileDocument, UserProfile};
use crate::listings::USERS_COLLECTION;
use crate::store::{Document, DocumentCallback, DocumentStore, FieldUpdate, StoreError, Subscription};

/// Identity supplied by the sign-in provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            email: None,
            photo_url: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// What `create_or_update` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Updated { badges_migrated: bool },
}

/// Profile manager for the signed-in user.
pub struct ProfileManager<S: DocumentStore> {
    store: Arc<S>,
    catalog: ChallengeCatalog,
    state: Arc<watch::Sender<UserProfile>>,
    feed: Mutex<Option<Subscription>>,
    user_id: Arc<Mutex<Option<String>>>,
}

impl<S: DocumentStore> ProfileManager<S> {
    /// Create a manager publishing the guest profile.
    pub fn new(store: Arc<S>, catalog: ChallengeCatalog) -> Self {
        let (state, _) = watch::channel(UserProfile::guest());
        Self {
            store,
            catalog,
            state: Arc::new(state),
            feed: Mutex::new(None),
            user_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Receiver of every published profile.
    pub fn subscribe(&self) -> watch::Receiver<UserProfile> {
        self.state.subscribe()
    }

    /// Currently published profile.
    pub fn current(&self) -> UserProfile {
        self.state.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Read the signed-in user's profile straight from the store, without
    /// waiting for the feed.
    pub async fn fetch(&self) -> Result<UserProfile, ProfileError> {
        let user_id = self.current_user_id().ok_or(ProfileError::NotSignedIn)?;
        let document = self
            .store
            .get(USERS_COLLECTION, &user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: USERS_COLLECTION.to_string(),
                id: user_id.clone(),
            })?;
        let decoded: ProfileDocument = document
            .decode()
            .map_err(|e| ProfileError::Malformed(e.to_string()))?;
        Ok(UserProfile::from_document(&user_id, decoded, &self.catalog))
    }

    /// Insert the profile for a new identity, or refresh the identity fields
    /// of an existing one. Points, badges, challenges and history of an
    /// existing profile are never touched, except that a badge list from an
    /// older catalog is rebuilt with its earned badges preserved.
    pub async fn create_or_update(&self, identity: &Identity) -> Result<ProvisionOutcome, ProfileError> {
        let now = Utc::now();
        let existing = self.store.get(USERS_COLLECTION, &identity.uid).await?;

        let Some(existing) = existing else {
            let document = ProfileDocument {
                display_name: identity.display_name.clone(),
                email: identity.email.clone(),
                photo_url: identity.photo_url.clone(),
                points: 0,
                share_count: 0,
                receive_count: 0,
                is_premium: false,
                badges: default_badges(now),
                favorites: Vec::new(),
                uploads: Vec::new(),
                challenges: self
                    .catalog
                    .definitions()
                    .iter()
                    .map(|d| {
                        (
                            d.challenge_type.as_str().to_string(),
                            ChallengeRecord { progress: 0, goal: d.goal },
                        )
                    })
                    .collect(),
                created_at: Some(now),
                updated_at: Some(now),
            };
            self.store
                .set(USERS_COLLECTION, Document::from_serializable(&identity.uid, &document)?)
                .await?;
            tracing::info!("Provisioned profile for {}", identity.uid);
            return Ok(ProvisionOutcome::Created);
        };

        let current: ProfileDocument = existing
            .decode()
            .map_err(|e| ProfileError::Malformed(e.to_string()))?;

        let mut updates = vec![
            ("display_name".to_string(), FieldUpdate::set(identity.display_name.clone())),
            ("email".to_string(), FieldUpdate::set(json!(identity.email))),
            ("photo_url".to_string(), FieldUpdate::set(json!(identity.photo_url))),
            ("updated_at".to_string(), FieldUpdate::set(now.timestamp_millis())),
        ];
        let badges_migrated = needs_migration(&current.badges);
        if badges_migrated {
            let badges = migrate_badges(&current.badges, now);
            tracing::info!(
                "Migrating {} badges to the current catalog for {}",
                current.badges.len(),
                identity.uid
            );
            let badges = serde_json::to_value(&badges).map_err(StoreError::from)?;
            updates.push(("badges".to_string(), FieldUpdate::Set(badges)));
        }

        self.store.update(USERS_COLLECTION, &identity.uid, updates).await?;
        tracing::debug!("Refreshed identity fields for {}", identity.uid);
        Ok(ProvisionOutcome::Updated { badges_migrated })
    }

    /// Follow a user's profile document. Replaces any previous feed.
    pub fn load(&self, user_id: &str) -> Result<(), ProfileError> {
        self.close_feed();
        *self.user_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(user_id.to_string());

        let state = Arc::clone(&self.state);
        let catalog = self.catalog.clone();
        let owner = Arc::clone(&self.user_id);
        let id = user_id.to_string();
        let on_change: DocumentCallback = Arc::new(move |result| {
            // Ignore pushes that arrive after the session changed identity.
            if owner.lock().unwrap_or_else(PoisonError::into_inner).as_deref() != Some(id.as_str()) {
                return;
            }
            match result {
                Ok(Some(document)) => match document.decode::<ProfileDocument>() {
                    Ok(decoded) => {
                        state.send_replace(UserProfile::from_document(&id, decoded, &catalog));
                    }
                    Err(e) => tracing::warn!("Skipping malformed profile push for {}: {}", id, e),
                },
                Ok(None) => {
                    tracing::debug!("No profile document for {}, publishing guest", id);
                    state.send_replace(UserProfile::guest());
                }
                Err(e) => tracing::warn!("Profile feed error for {}: {}", id, e),
            }
        });

        let subscription = self.store.subscribe_document(USERS_COLLECTION, user_id, on_change)?;
        tracing::info!("Following profile of {}", user_id);
        *self.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);
        Ok(())
    }

    /// Stop following the profile and publish the guest profile.
    pub fn sign_out(&self) {
        self.close_feed();
        let previous = self.user_id.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.state.send_replace(UserProfile::guest());
        if let Some(previous) = previous {
            tracing::info!("Signed out {}, profile reset to guest", previous);
        }
    }

    pub fn is_following(&self) -> bool {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    pub async fn add_favorite(&self, listing_id: &str) -> Result<(), ProfileError> {
        self.update_signed_in(vec![(
            "favorites".to_string(),
            FieldUpdate::ArrayUnion(vec![json!(listing_id)]),
        )])
        .await
    }

    pub async fn remove_favorite(&self, listing_id: &str) -> Result<(), ProfileError> {
        self.update_signed_in(vec![(
            "favorites".to_string(),
            FieldUpdate::ArrayRemove(vec![json!(listing_id)]),
        )])
        .await
    }

    /// Count one received item.
    pub async fn record_receive(&self) -> Result<(), ProfileError> {
        self.update_signed_in(vec![("receive_count".to_string(), FieldUpdate::Increment(1))])
            .await
    }

    async fn update_signed_in(&self, mut updates: Vec<(String, FieldUpdate)>) -> Result<(), ProfileError> {
        let user_id = self.current_user_id().ok_or(ProfileError::NotSignedIn)?;
        updates.push(("updated_at".to_string(), FieldUpdate::set(Utc::now().timestamp_millis())));
        self.store.update(USERS_COLLECTION, &user_id, updates).await?;
        Ok(())
    }

    fn close_feed(&self) {
        if let Some(mut feed) = self.feed.lock().unwrap_or_else(PoisonError::into_inner).take() {
            feed.close();
            tracing::debug!("Closed profile feed");
        }
    }
}

impl<S: DocumentStore> Drop for ProfileManager<S> {
    fn drop(&mut self) {
        self.close_feed();
    }
}

/// Profile errors.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("No user is signed in")]
    NotSignedIn,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Malformed profile document: {0}")]
    Malformed(String),
}
