//! Integration tests for challenge progress driven by user actions.

use chrono::{Duration, Utc};
use foodloop::config::RewardSettings;
use foodloop::social::{ChallengeCatalog, ChallengeEngine, ChallengeType, IncrementOutcome};
use foodloop::store::StoreError;
use foodloop::ListingDraft;

use crate::support::{identity, new_session, profile, set_challenge, settle, YieldingStore};

fn draft(name: &str) -> ListingDraft {
    ListingDraft::new(name, "蔬菜", Utc::now() + Duration::days(2))
}

#[tokio::test]
async fn test_zero_waste_completes_once() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    session.sign_out();
    set_challenge(&store, "u1", "zero_waste", 4, 5).await;
    session.sign_in(&identity()).await.unwrap();
    settle().await;

    let receipt = session.upload(draft("青江菜")).await.unwrap();
    assert!(matches!(
        receipt.challenges.outcome(ChallengeType::ZeroWaste),
        Some(Ok(IncrementOutcome::Completed { points_awarded: 50, .. }))
    ));
    assert_eq!(receipt.challenges.completed_badges(), vec!["zero_waste_challenge"]);

    let after_first = profile(&store, "u1").await;
    // Upload points plus the completion bonus.
    assert_eq!(after_first.points, 60);
    assert!(after_first.badge_active("zero_waste_challenge"));
    assert!(!after_first.challenges.contains_key("zero_waste"));
    let earned_at = after_first
        .badges
        .iter()
        .find(|b| b.id == "zero_waste_challenge")
        .and_then(|b| b.earned_at);
    assert!(earned_at.is_some());

    settle().await;
    let receipt = session.upload(draft("地瓜葉")).await.unwrap();
    assert_eq!(
        receipt.challenges.outcome(ChallengeType::ZeroWaste).map(|o| o.as_ref().ok().cloned()),
        Some(Some(IncrementOutcome::AlreadyCompleted(ChallengeType::ZeroWaste)))
    );

    let after_second = profile(&store, "u1").await;
    assert_eq!(after_second.points, 70);
    assert!(!after_second.challenges.contains_key("zero_waste"));
    let badge = |p: &foodloop::social::ProfileDocument| {
        p.badges.iter().find(|b| b.id == "zero_waste_challenge").cloned()
    };
    assert_eq!(badge(&after_second), badge(&after_first));
}

#[tokio::test]
async fn test_points_never_decrease() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();

    let mut last = profile(&store, "u1").await.points;
    for round in 0..12 {
        if round % 2 == 0 {
            session.upload(draft(&format!("item {}", round))).await.unwrap();
        } else {
            session.clean_fridge().await.unwrap();
        }
        let points = profile(&store, "u1").await.points;
        assert!(points >= last);
        last = points;
    }

    let document = profile(&store, "u1").await;
    assert!(document.badge_active("fridge_challenge"));
    // 6 uploads complete zero waste (goal 5); sharing (goal 10) is still open.
    assert!(document.badge_active("zero_waste_challenge"));
    assert_eq!(document.challenges["sharing"].progress, 6);
    assert_eq!(document.points, 6 * 10 + 50 + 50);
}

#[tokio::test]
async fn test_deferred_completion_is_repaired_on_sign_in() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    session.sign_out();
    set_challenge(&store, "u1", "fridge_cleaning", 2, 3).await;
    session.sign_in(&identity()).await.unwrap();

    store.fail_when(|call| call.touches("badges").then(|| StoreError::Unavailable("offline".into())));
    let report = session.clean_fridge().await.unwrap();
    assert!(matches!(
        report.outcome(ChallengeType::FridgeCleaning),
        Some(Ok(IncrementOutcome::CompletionDeferred(p))) if p.progress == 3
    ));
    let pending = profile(&store, "u1").await;
    assert_eq!(pending.challenges["fridge_cleaning"].progress, 3);
    assert!(!pending.badge_active("fridge_challenge"));
    assert_eq!(pending.points, 0);

    store.clear_failures();
    session.sign_out();
    let signed_in = session.sign_in(&identity()).await.unwrap();
    assert_eq!(signed_in.repaired, vec![ChallengeType::FridgeCleaning]);

    let repaired = profile(&store, "u1").await;
    assert!(repaired.badge_active("fridge_challenge"));
    assert!(!repaired.challenges.contains_key("fridge_cleaning"));
    assert_eq!(repaired.points, 50);
}

#[tokio::test]
async fn test_one_failed_challenge_does_not_block_others() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    store.fail_when(|call| {
        call.touches("challenges.zero_waste")
            .then(|| StoreError::Query("aborted".into()))
    });

    let receipt = session.upload(draft("南瓜").with_tags(["環保"])).await.unwrap();
    assert_eq!(receipt.challenges.failures(), 1);

    let document = profile(&store, "u1").await;
    assert_eq!(document.challenges["sharing"].progress, 1);
    assert_eq!(document.challenges["eco_container"].progress, 1);
    assert_eq!(document.challenges["zero_waste"].progress, 0);
    assert_eq!(session.challenges().progress("u1").len(), 4);
}

#[tokio::test]
async fn test_concurrent_completions_keep_both_badges() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    session.sign_out();
    set_challenge(&store, "u1", "sharing", 9, 10).await;
    set_challenge(&store, "u1", "fridge_cleaning", 2, 3).await;
    let before = profile(&store, "u1").await.points;

    let engine = ChallengeEngine::new(
        YieldingStore::new(&store),
        ChallengeCatalog::default(),
        RewardSettings::default(),
    );
    let (sharing, fridge) = tokio::join!(
        engine.increment("u1", ChallengeType::Sharing),
        engine.increment("u1", ChallengeType::FridgeCleaning)
    );
    assert!(matches!(sharing, Ok(IncrementOutcome::Completed { points_awarded: 50, .. })));
    assert!(matches!(fridge, Ok(IncrementOutcome::Completed { points_awarded: 50, .. })));

    let document = profile(&store, "u1").await;
    assert!(document.badge_active("sharing_challenge"));
    assert!(document.badge_active("fridge_challenge"));
    assert!(document.challenges.is_empty());
    assert_eq!(document.points, before + 100);
}

#[tokio::test]
async fn test_concurrent_repairs_award_once() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    session.sign_out();
    set_challenge(&store, "u1", "sharing", 10, 10).await;
    let before = profile(&store, "u1").await.points;

    let engine = || {
        ChallengeEngine::new(
            YieldingStore::new(&store),
            ChallengeCatalog::default(),
            RewardSettings::default(),
        )
    };
    let (first, second) = (engine(), engine());
    let (a, b) = tokio::join!(first.repair("u1"), second.repair("u1"));
    assert_eq!(a.unwrap(), vec![ChallengeType::Sharing]);
    assert_eq!(b.unwrap(), vec![ChallengeType::Sharing]);

    let document = profile(&store, "u1").await;
    assert!(document.badge_active("sharing_challenge"));
    assert!(!document.challenges.contains_key("sharing"));
    assert_eq!(document.points, before + 50);
}
