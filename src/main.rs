//! FoodLoop sandbox
//!
//! Runs a scripted session against the in-memory document store and logs
//! what the listing, search and challenge layers do.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Local, Utc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use foodloop::config;
use foodloop::listings::hints::expiry_label;
use foodloop::listings::LISTINGS_COLLECTION;
use foodloop::listings::search::{self, CategoryFilter, SortCriterion};
use foodloop::{Coordinate, Identity, ListingDraft, MemoryStore, Session, ShareKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FoodLoop sandbox v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config().context("loading configuration")?;
    let store = Arc::new(MemoryStore::new());
    let session = Session::open(Arc::clone(&store), config);

    let signed_in = session
        .sign_in(&Identity::new("sandbox-user", "小明").with_email("ming@example.com"))
        .await
        .context("signing in")?;
    tracing::info!("Profile {:?}", signed_in.provisioned);

    let home = Coordinate::new(25.0330, 121.5654);
    let drafts = [
        ListingDraft::new("有機青菜", "蔬菜", Utc::now() + Duration::days(1))
            .with_share_kind(ShareKind::Discounted, Some("2"))
            .with_tags(["蔬菜", "有機"])
            .at(Coordinate::new(25.0340, 121.5660)),
        ListingDraft::new("香蕉", "水果", Utc::now() + Duration::days(3))
            .with_tags(["水果", "環保"])
            .at(Coordinate::new(25.0420, 121.5500)),
        ListingDraft::new("手工麵包", "烘焙", Utc::now()).at(Coordinate::new(25.1000, 121.6000)),
    ];
    for draft in drafts {
        let receipt = session.upload(draft).await.context("uploading listing")?;
        tracing::info!(
            "Uploaded {} ({} challenge updates, badges earned: {:?})",
            receipt.created.listing.id,
            receipt.challenges.outcomes.len(),
            receipt.challenges.completed_badges()
        );
    }

    session.listings().set_viewer_location(Some(home));
    let radius_km = session.config().discovery.default_radius_km;
    let nearby = session
        .listings()
        .list_near(home, radius_km)
        .await
        .context("searching nearby listings")?;

    let today = Local::now().date_naive();
    for listing in search::sort(&nearby, SortCriterion::Distance) {
        tracing::info!(
            "{} [{}] {} {} - {}",
            listing.name,
            listing.share_kind,
            listing.display_distance.as_deref().unwrap_or("-"),
            expiry_label(listing.expiry, today),
            listing.storage_hint
        );
    }

    let free = search::filter(&nearby, "", Some(&CategoryFilter::ShareKind(ShareKind::Free)));
    tracing::info!("{} free listings within {} km", free.len(), radius_km);

    let report = session.clean_fridge().await.context("recording fridge cleaning")?;
    tracing::info!("Fridge cleaning: {:?}", report.outcomes);

    let progress = session.challenge_progress().await.context("loading challenge progress")?;
    for entry in &progress {
        tracing::info!("{}: {}/{}", entry.challenge_type, entry.progress, entry.goal);
    }
    let profile = session.profiles().fetch().await.context("loading profile")?;
    tracing::info!(
        "{} challenges active, {} completed this month, {} points",
        session.challenges().active_challenge_count("sandbox-user"),
        session.challenges().completed_in_month(&profile, Utc::now()),
        profile.points
    );

    session.sign_out();
    tracing::info!("Sandbox finished with {} listings stored", store.document_count(LISTINGS_COLLECTION));
    Ok(())
}
