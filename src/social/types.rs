//! Core types for challenges, badges and user profiles.
//!
//! The profile is stored as one document per user. [`ProfileDocument`] is its
//! stored shape; [`UserProfile`] is the published, display-ready aggregate.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::serde::ts_milliseconds_option;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Challenge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    /// Share listings
    Sharing,
    /// Share using reusable containers
    EcoContainer,
    /// Clean out the fridge
    FridgeCleaning,
    /// Share during zero-waste week
    ZeroWaste,
}

impl ChallengeType {
    pub const ALL: [ChallengeType; 4] = [
        ChallengeType::ZeroWaste,
        ChallengeType::Sharing,
        ChallengeType::FridgeCleaning,
        ChallengeType::EcoContainer,
    ];

    /// Key of the challenge record inside the profile document.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Sharing => "sharing",
            ChallengeType::EcoContainer => "eco_container",
            ChallengeType::FridgeCleaning => "fridge_cleaning",
            ChallengeType::ZeroWaste => "zero_waste",
        }
    }

    /// Badge activated when this challenge completes.
    pub fn badge_id(&self) -> &'static str {
        match self {
            ChallengeType::Sharing => "sharing_challenge",
            ChallengeType::EcoContainer => "eco_challenge",
            ChallengeType::FridgeCleaning => "fridge_challenge",
            ChallengeType::ZeroWaste => "zero_waste_challenge",
        }
    }

    /// Dotted path of this challenge's record in the profile document.
    pub fn record_path(&self) -> String {
        format!("challenges.{}", self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sharing" => Ok(ChallengeType::Sharing),
            "eco_container" => Ok(ChallengeType::EcoContainer),
            "fridge_cleaning" => Ok(ChallengeType::FridgeCleaning),
            "zero_waste" => Ok(ChallengeType::ZeroWaste),
            other => Err(format!("unknown challenge type '{}'", other)),
        }
    }
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static description of a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDefinition {
    pub challenge_type: ChallengeType,
    pub title: String,
    pub subtitle: String,
    /// Number of qualifying actions needed to complete.
    pub goal: u32,
    /// Hex colour used for the progress card.
    pub color_tag: String,
}

impl ChallengeDefinition {
    pub fn new(challenge_type: ChallengeType, title: &str, subtitle: &str, goal: u32, color_tag: &str) -> Self {
        Self {
            challenge_type,
            title: title.to_string(),
            subtitle: subtitle.to_string(),
            goal,
            color_tag: color_tag.to_string(),
        }
    }
}

/// Lookup table from challenge type to its definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeCatalog {
    definitions: Vec<ChallengeDefinition>,
}

impl Default for ChallengeCatalog {
    fn default() -> Self {
        Self::new(vec![
            ChallengeDefinition::new(
                ChallengeType::ZeroWaste,
                "Zero Waste Week",
                "Share 5 items this week",
                5,
                "FF6B6B",
            ),
            ChallengeDefinition::new(ChallengeType::Sharing, "分享達人挑戰", "分享10項食材", 10, "4ECDC4"),
            ChallengeDefinition::new(ChallengeType::FridgeCleaning, "冰箱清潔週", "整理3次家中冰箱", 3, "34C759"),
            ChallengeDefinition::new(ChallengeType::EcoContainer, "環保小尖兵", "使用環保容器分享5次", 5, "AF52DE"),
        ])
    }
}

impl ChallengeCatalog {
    /// Build a catalog. Later definitions of the same type are ignored.
    pub fn new(definitions: Vec<ChallengeDefinition>) -> Self {
        let mut unique: Vec<ChallengeDefinition> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if definition.goal > 0 && !unique.iter().any(|d| d.challenge_type == definition.challenge_type) {
                unique.push(definition);
            }
        }
        Self { definitions: unique }
    }

    pub fn get(&self, challenge_type: ChallengeType) -> Option<&ChallengeDefinition> {
        self.definitions.iter().find(|d| d.challenge_type == challenge_type)
    }

    /// Definitions in display order.
    pub fn definitions(&self) -> &[ChallengeDefinition] {
        &self.definitions
    }

    /// Display position of a challenge type.
    pub fn position(&self, challenge_type: ChallengeType) -> usize {
        self.definitions
            .iter()
            .position(|d| d.challenge_type == challenge_type)
            .unwrap_or(usize::MAX)
    }
}

/// A user's progress on one challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeProgress {
    pub challenge_type: ChallengeType,
    pub progress: u32,
    pub goal: u32,
}

impl ChallengeProgress {
    pub fn new(challenge_type: ChallengeType, goal: u32) -> Self {
        Self {
            challenge_type,
            progress: 0,
            goal,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= self.goal
    }
}

/// Stored challenge record, keyed by challenge type in the profile document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub progress: u32,
    pub goal: u32,
}

/// An achievement marker. Activation is one-way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub icon: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, with = "ts_milliseconds_option")]
    pub earned_at: Option<DateTime<Utc>>,
}

impl Badge {
    pub fn new(id: &str, name: &str, icon: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
            active: false,
            earned_at: None,
        }
    }

    /// Mark as earned. Already-active badges keep their original date.
    pub fn activate(&mut self, at: DateTime<Utc>) {
        if !self.active {
            self.active = true;
            self.earned_at = Some(at);
        }
    }
}

/// Stored shape of a user profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub share_count: u32,
    #[serde(default)]
    pub receive_count: u32,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub badges: Vec<Badge>,
    #[serde(default)]
    pub favorites: Vec<String>,
    #[serde(default)]
    pub uploads: Vec<String>,
    /// Active challenge records keyed by challenge type.
    #[serde(default)]
    pub challenges: BTreeMap<String, ChallengeRecord>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileDocument {
    /// Active challenge records with a known type.
    pub fn active_challenges(&self) -> Vec<ChallengeProgress> {
        self.challenges
            .iter()
            .filter_map(|(key, record)| {
                let challenge_type = key.parse::<ChallengeType>().ok()?;
                Some(ChallengeProgress {
                    challenge_type,
                    progress: record.progress,
                    goal: record.goal,
                })
            })
            .collect()
    }

    pub fn badge_active(&self, badge_id: &str) -> bool {
        self.badges.iter().any(|b| b.id == badge_id && b.active)
    }
}

/// Name shown for signed-out users.
pub const GUEST_NAME: &str = "訪客";

/// Published profile of the signed-in user, or the guest default.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    /// `None` for the guest profile.
    pub id: Option<String>,
    pub display_name: String,
    pub initials: String,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub member_since: Option<DateTime<Utc>>,
    pub points: u64,
    pub share_count: u32,
    pub receive_count: u32,
    pub is_premium: bool,
    pub badges: Vec<Badge>,
    pub favorites: Vec<String>,
    pub uploads: Vec<String>,
    pub active_challenges: Vec<ChallengeProgress>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self::guest()
    }
}

impl UserProfile {
    /// Signed-out default: zero stats and empty collections.
    pub fn guest() -> Self {
        Self {
            id: None,
            display_name: GUEST_NAME.to_string(),
            initials: "V".to_string(),
            email: None,
            photo_url: None,
            member_since: None,
            points: 0,
            share_count: 0,
            receive_count: 0,
            is_premium: false,
            badges: Vec::new(),
            favorites: Vec::new(),
            uploads: Vec::new(),
            active_challenges: Vec::new(),
        }
    }

    /// Build the published profile from a stored document.
    pub fn from_document(id: &str, document: ProfileDocument, catalog: &ChallengeCatalog) -> Self {
        let mut active_challenges = document.active_challenges();
        active_challenges.sort_by_key(|c| catalog.position(c.challenge_type));
        Self {
            id: Some(id.to_string()),
            initials: initials(&document.display_name),
            display_name: document.display_name,
            email: document.email,
            photo_url: document.photo_url,
            member_since: document.created_at,
            points: document.points,
            share_count: document.share_count,
            receive_count: document.receive_count,
            is_premium: document.is_premium,
            badges: document.badges,
            favorites: document.favorites,
            uploads: document.uploads,
            active_challenges,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_favorite(&self, listing_id: &str) -> bool {
        self.favorites.iter().any(|f| f == listing_id)
    }

    pub fn challenge(&self, challenge_type: ChallengeType) -> Option<&ChallengeProgress> {
        self.active_challenges
            .iter()
            .find(|c| c.challenge_type == challenge_type)
    }

    pub fn badge_active(&self, badge_id: &str) -> bool {
        self.badges.iter().any(|b| b.id == badge_id && b.active)
    }
}

/// First character of the name, uppercased.
pub fn initials(display_name: &str) -> String {
    display_name
        .trim()
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "V".to_string())
}
