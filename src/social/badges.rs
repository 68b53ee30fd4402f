//! Badge catalog and migration of legacy badge lists.

use chrono::{DateTime, Utc};

use super::types::{Badge, ChallengeType};

/// Badge every new account starts with.
pub const NEWCOMER_BADGE_ID: &str = "newcomer";

/// Icon used by a retired badge design.
const LEGACY_ICON: &str = "recycle";

/// Badge list provisioned for a new account. Only the newcomer badge is active.
pub fn default_badges(now: DateTime<Utc>) -> Vec<Badge> {
    let mut newcomer = Badge::new(NEWCOMER_BADGE_ID, "新手上路", "star.fill");
    newcomer.activate(now);
    vec![
        newcomer,
        Badge::new("sharing_challenge", "分享達人挑戰", "gift.fill"),
        Badge::new("eco_challenge", "環保小尖兵", "leaf.fill"),
        Badge::new("fridge_challenge", "冰箱清潔週", "archivebox.fill"),
        Badge::new("zero_waste_challenge", "Zero Waste Week", "arrow.3.trianglepath"),
    ]
}

/// Catalog entry for the badge a challenge awards, inactive.
pub fn badge_for(challenge_type: ChallengeType) -> Badge {
    let id = challenge_type.badge_id();
    default_badges(Utc::now())
        .into_iter()
        .find(|b| b.id == id)
        .map(|mut badge| {
            badge.active = false;
            badge.earned_at = None;
            badge
        })
        .unwrap_or_else(|| Badge::new(id, id, "star.fill"))
}

/// Catalog id a retired badge name maps to.
pub fn legacy_badge_id(name: &str) -> Option<&'static str> {
    match name {
        "新手上路" => Some(NEWCOMER_BADGE_ID),
        "分享達人" | "分享達人挑戰" => Some("sharing_challenge"),
        "綠色小尖兵" | "環保小尖兵" => Some("eco_challenge"),
        "冰箱清潔週" => Some("fridge_challenge"),
        "Zero Waste Week" => Some("zero_waste_challenge"),
        _ => None,
    }
}

/// Whether a stored badge list predates the current catalog.
pub fn needs_migration(badges: &[Badge]) -> bool {
    badges.len() != default_badges(Utc::now()).len() || badges.iter().any(|b| b.icon == LEGACY_ICON)
}

/// Rebuild a badge list from the catalog, carrying over every active badge
/// matched by id or by its legacy name.
pub fn migrate_badges(old: &[Badge], now: DateTime<Utc>) -> Vec<Badge> {
    let mut migrated = default_badges(now);
    for previous in old.iter().filter(|b| b.active) {
        let target = if migrated.iter().any(|b| b.id == previous.id) {
            Some(previous.id.as_str())
        } else {
            legacy_badge_id(&previous.name)
        };
        let Some(target) = target else {
            tracing::debug!("Dropping unknown badge '{}' during migration", previous.name);
            continue;
        };
        if let Some(badge) = migrated.iter_mut().find(|b| b.id == target) {
            badge.active = true;
            badge.earned_at = previous.earned_at.or(badge.earned_at).or(Some(now));
        }
    }
    migrated
}
