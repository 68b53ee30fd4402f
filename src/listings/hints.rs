//! Storage hints, recipe suggestions and expiry labels derived from a
//! listing's category and expiry date.

use chrono::{DateTime, Local, NaiveDate, Utc};

use super::types::RecipeSuggestion;

/// Whole days from `today` to the local calendar date of `expiry`.
pub fn days_until(expiry: DateTime<Utc>, today: NaiveDate) -> i64 {
    (expiry.with_timezone(&Local).date_naive() - today).num_days()
}

/// Storage advice shown on the listing.
pub fn storage_hint(category: &str, expiry: DateTime<Utc>, today: NaiveDate) -> String {
    let hint = match days_until(expiry, today) {
        0 => "今日到期，請盡快食用",
        1 => "明日到期，建議冷藏保存",
        2 | 3 => "冷藏保存，3天內食用完畢",
        _ if category == "蔬菜" => "冷藏保存，保持新鮮",
        _ => "依照包裝指示保存",
    };
    hint.to_string()
}

/// Recipe ideas for a category.
pub fn recipe_suggestions(category: &str) -> Vec<RecipeSuggestion> {
    match category {
        "蔬菜" => vec![
            RecipeSuggestion::new("🥗", "蔬菜沙拉", "新鮮蔬菜搭配和風醬"),
            RecipeSuggestion::new("🍲", "蔬菜湯", "營養豐富的蔬菜湯品"),
        ],
        "水果" => vec![
            RecipeSuggestion::new("🥤", "新鮮果汁", "現打果汁最營養"),
            RecipeSuggestion::new("🍮", "水果優格", "搭配優格當早餐"),
        ],
        "烘焙" => vec![
            RecipeSuggestion::new("🥪", "三明治", "加入生菜火腿做成三明治"),
            RecipeSuggestion::new("🍮", "麵包布丁", "隔夜麵包的最佳去處"),
        ],
        _ => vec![RecipeSuggestion::new("🍳", "簡易快炒", "加點蒜頭快炒上桌")],
    }
}

/// Relative label for the expiry date ("今日到期", "明日到期" or "10/24").
pub fn expiry_label(expiry: DateTime<Utc>, today: NaiveDate) -> String {
    match days_until(expiry, today) {
        0 => "今日到期".to_string(),
        1 => "明日到期".to_string(),
        _ => expiry.with_timezone(&Local).format("%m/%d").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn local_noon(date: NaiveDate) -> DateTime<Utc> {
        Local
            .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_storage_hint_by_days_left() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let at = |days: i64| local_noon(today + Duration::days(days));

        assert_eq!(storage_hint("水果", at(0), today), "今日到期，請盡快食用");
        assert_eq!(storage_hint("水果", at(1), today), "明日到期，建議冷藏保存");
        assert_eq!(storage_hint("水果", at(3), today), "冷藏保存，3天內食用完畢");
        assert_eq!(storage_hint("蔬菜", at(6), today), "冷藏保存，保持新鮮");
        assert_eq!(storage_hint("烘焙", at(6), today), "依照包裝指示保存");
    }

    #[test]
    fn test_recipes_fall_back_for_unknown_category() {
        assert_eq!(recipe_suggestions("蔬菜").len(), 2);
        let fallback = recipe_suggestions("便當");
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].title, "簡易快炒");
    }

    #[test]
    fn test_expiry_label() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(expiry_label(local_noon(today), today), "今日到期");
        assert_eq!(expiry_label(local_noon(today + Duration::days(1)), today), "明日到期");
        assert_eq!(expiry_label(local_noon(today + Duration::days(5)), today), "10/24");
    }
}
