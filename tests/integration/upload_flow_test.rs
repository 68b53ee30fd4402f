//! Integration tests for the listing upload flow.

use chrono::{Duration, Utc};
use foodloop::listings::{ListingError, LISTINGS_COLLECTION};
use foodloop::store::{StoreCall, StoreError};
use foodloop::{ListingDraft, SessionError, ShareKind};

use crate::support::{identity, new_session, profile};

#[tokio::test]
async fn test_upload_stores_listing_and_credits_uploader() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();

    let draft = ListingDraft::new("吐司", "烘焙", Utc::now() + Duration::days(3))
        .with_share_kind(ShareKind::Discounted, Some("30"));
    let receipt = session.upload(draft).await.unwrap();
    let listing = &receipt.created.listing;

    assert!(receipt.created.stats_recorded);
    assert!(!listing.is_pending());
    assert_eq!(listing.price.as_deref(), Some("$30"));
    assert_eq!(listing.quantity, "1份");
    assert_eq!(listing.tags, vec!["烘焙"]);
    assert_eq!(listing.uploader.display_name, "小明");
    assert!(!listing.recipes.is_empty());
    assert_eq!(store.document_count(LISTINGS_COLLECTION), 1);

    let document = profile(&store, "u1").await;
    assert_eq!(document.share_count, 1);
    assert_eq!(document.points, 10);
    assert_eq!(document.uploads, vec![listing.id.clone()]);

    let visible = session.listings().snapshot();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, listing.id);
}

#[tokio::test]
async fn test_failed_create_grants_nothing() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    store.fail_when(|call| match call {
        StoreCall::Add { .. } => Some(StoreError::Unavailable("network lost".into())),
        _ => None,
    });

    let result = session
        .upload(ListingDraft::new("牛奶", "乳製品", Utc::now() + Duration::days(1)))
        .await;
    match result {
        Err(SessionError::Listing(error)) => assert!(error.is_retryable()),
        other => panic!("expected a listing error, got {:?}", other.map(|r| r.created.listing.id)),
    }

    let document = profile(&store, "u1").await;
    assert_eq!(document.points, 0);
    assert_eq!(document.share_count, 0);
    assert!(document.uploads.is_empty());
    assert!(document.challenges.values().all(|r| r.progress == 0));
    assert_eq!(store.document_count(LISTINGS_COLLECTION), 0);
    assert!(session.listings().snapshot().is_empty());
}

#[tokio::test]
async fn test_stats_failure_keeps_listing() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    store.fail_when(|call| {
        call.touches("share_count")
            .then(|| StoreError::Unavailable("timeout".into()))
    });

    let receipt = session
        .upload(ListingDraft::new("蘋果", "水果", Utc::now() + Duration::days(5)))
        .await
        .unwrap();
    assert!(!receipt.created.stats_recorded);
    assert_eq!(store.document_count(LISTINGS_COLLECTION), 1);
    assert_eq!(profile(&store, "u1").await.challenges["sharing"].progress, 1);
}

#[tokio::test]
async fn test_invalid_draft_is_rejected_before_io() {
    let (store, session) = new_session();
    session.sign_in(&identity()).await.unwrap();
    store.clear_calls();

    let draft = ListingDraft::new("雞蛋", "蛋類", Utc::now()).with_share_kind(ShareKind::Discounted, None);
    let result = session.upload(draft).await;
    assert!(matches!(
        result,
        Err(SessionError::Listing(ListingError::Validation(_)))
    ));
    assert!(!store
        .calls()
        .iter()
        .any(|call| matches!(call, StoreCall::Add { .. } | StoreCall::Update { .. })));
}
