//! Integration tests for client-side search and ranking.

use chrono::{Duration, Utc};
use foodloop::config::DiscoverySettings;
use foodloop::listings::repository::build_listing;
use foodloop::listings::search::{filter, sort, CategoryFilter, SortCriterion};
use foodloop::listings::UploaderRef;
use foodloop::{Listing, ListingDraft, ShareKind};

fn listing(id: &str, draft: ListingDraft) -> Listing {
    build_listing(
        draft,
        id,
        "uploader",
        UploaderRef::new("小明", 0),
        &DiscoverySettings::default(),
        Utc::now(),
    )
    .unwrap()
}

fn market() -> Vec<Listing> {
    let expiry = Utc::now() + Duration::days(4);
    vec![
        listing(
            "veg",
            ListingDraft::new("高麗菜", "蔬菜", expiry)
                .with_tags(["蔬菜"])
                .with_share_kind(ShareKind::Discounted, Some("2")),
        ),
        listing("fruit", ListingDraft::new("芭樂", "水果", expiry).with_tags(["水果"])),
    ]
}

#[test]
fn test_search_text_matches_tags() {
    let listings = market();
    let found = filter(&listings, "蔬菜", None);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "veg");
}

#[test]
fn test_price_sort_puts_free_first() {
    let sorted = sort(&market(), SortCriterion::Price);
    let ids: Vec<&str> = sorted.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["fruit", "veg"]);
}

#[test]
fn test_sorting_is_stable() {
    let mut listings = market();
    listings.extend(market().into_iter().map(|mut l| {
        l.id = format!("{}-2", l.id);
        l
    }));
    for criterion in [
        SortCriterion::Distance,
        SortCriterion::Category,
        SortCriterion::Price,
        SortCriterion::ExpiryUrgency,
    ] {
        let once = sort(&listings, criterion);
        let twice = sort(&once, criterion);
        assert_eq!(once, twice);
    }
}

#[test]
fn test_share_kind_filter_combines_with_text() {
    let listings = market();
    let free = CategoryFilter::ShareKind(ShareKind::Free);
    assert_eq!(filter(&listings, "", Some(&free)).len(), 1);
    assert!(filter(&listings, "蔬菜", Some(&free)).is_empty());
}
