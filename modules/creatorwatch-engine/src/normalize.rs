//! Provider payloads to `NormalizedRecord`.
//!
//! Both actors emit loosely-typed JSON with overlapping field names. Every
//! missing field except the identifier gets a fallback value plus a
//! `DefectFlag`; only a missing identifier rejects the item.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use creatorwatch_common::{DefectFlag, EngagementMetrics, NormalizedRecord, SourceKind};

use crate::dates::DateRange;

pub const DEFAULT_CATEGORY: &str = "Latest";

const ID_FIELDS: [&str; 2] = ["id", "videoId"];
const TEXT_FIELDS: [&str; 3] = ["text", "desc", "description"];
const URL_FIELDS: [&str; 3] = ["webVideoUrl", "videoUrl", "url"];
const EPOCH_FIELDS: [&str; 3] = ["createTimeISO", "createTime", "timestamp"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("item has no id or videoId")]
    MissingIdentifier,
}

#[derive(Debug, Default)]
pub struct NormalizeBatch {
    pub records: Vec<NormalizedRecord>,
    pub failures: Vec<NormalizeError>,
}

pub fn normalize_item(raw: &Value, source: SourceKind) -> Result<NormalizedRecord, NormalizeError> {
    normalize_item_at(raw, source, Utc::now())
}

/// Normalize with an explicit substitute time for items lacking a timestamp.
pub fn normalize_item_at(
    raw: &Value,
    source: SourceKind,
    now: DateTime<Utc>,
) -> Result<NormalizedRecord, NormalizeError> {
    let id = identifier(raw).ok_or(NormalizeError::MissingIdentifier)?;
    let mut flags = BTreeSet::new();

    let text = match first_str(raw, &TEXT_FIELDS) {
        Some(text) => text.to_string(),
        None => {
            flags.insert(DefectFlag::MissingText);
            String::new()
        }
    };

    let url = match first_str(raw, &URL_FIELDS) {
        Some(url) => url.to_string(),
        None => match url_from_id(&id) {
            Some(url) => {
                flags.insert(DefectFlag::UrlBuiltFromId);
                url
            }
            None => {
                flags.insert(DefectFlag::MissingVideoUrl);
                String::new()
            }
        },
    };

    let created_at = match created_at(raw) {
        Some(at) => at,
        None => {
            flags.insert(DefectFlag::MissingCreateTime);
            now
        }
    };

    let metrics = EngagementMetrics {
        views: metric(raw, "playCount", "plays"),
        likes: metric(raw, "diggCount", "likes"),
        comments: metric(raw, "commentCount", "comments"),
        shares: metric(raw, "shareCount", "shares"),
    };

    let category = match source {
        SourceKind::Fallback => raw
            .get("category")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string(),
        SourceKind::Primary => DEFAULT_CATEGORY.to_string(),
    };

    if !flags.is_empty() {
        let names: Vec<&str> = flags.iter().map(|f: &DefectFlag| f.as_str()).collect();
        tracing::debug!(id = %id, source = %source, flags = ?names, "Normalized item with defects");
    }

    Ok(NormalizedRecord {
        id,
        text,
        url,
        created_at,
        metrics,
        category,
        source_used: source,
        defect_flags: flags,
        raw: raw.clone(),
    })
}

/// Normalize every item, collecting rejects instead of aborting.
pub fn normalize_items(items: &[Value], source: SourceKind) -> NormalizeBatch {
    let now = Utc::now();
    let mut batch = NormalizeBatch::default();

    for item in items {
        match normalize_item_at(item, source, now) {
            Ok(record) => batch.records.push(record),
            Err(e) => batch.failures.push(e),
        }
    }

    if !batch.failures.is_empty() {
        let sample: Vec<String> = batch.failures.iter().take(5).map(ToString::to_string).collect();
        warn!(
            source = %source,
            failed = batch.failures.len(),
            total = items.len(),
            sample = ?sample,
            "Dropped items that could not be normalized"
        );
    }

    batch
}

/// Records with a real timestamp inside `range`.
pub fn filter_in_range(records: &[NormalizedRecord], range: &DateRange) -> Vec<NormalizedRecord> {
    records
        .iter()
        .filter(|r| !r.has_flag(DefectFlag::MissingCreateTime) && range.contains(r.created_at))
        .cloned()
        .collect()
}

fn identifier(raw: &Value) -> Option<String> {
    ID_FIELDS.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_str<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Placeholder URL; `None` when the id cannot serve as a path segment.
fn url_from_id(id: &str) -> Option<String> {
    let unusable = id.is_empty()
        || id
            .chars()
            .any(|c| c == '/' || c == '?' || c == '#' || c.is_whitespace());
    if unusable {
        None
    } else {
        Some(format!("https://www.tiktok.com/@unknown/video/{id}"))
    }
}

fn created_at(raw: &Value) -> Option<DateTime<Utc>> {
    if let Some(iso) = raw.get("createTimeISO").and_then(Value::as_str) {
        if let Ok(at) = DateTime::parse_from_rfc3339(iso) {
            return Some(at.with_timezone(&Utc));
        }
    }
    EPOCH_FIELDS
        .iter()
        .filter_map(|key| raw.get(*key))
        .find_map(epoch_seconds)
}

fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// First positive count among `key`, `alias` and `stats.key`.
fn metric(raw: &Value, key: &str, alias: &str) -> u64 {
    [raw.get(key), raw.get(alias), raw.get("stats").and_then(|s| s.get(key))]
        .into_iter()
        .flatten()
        .filter_map(count)
        .find(|n| *n > 0)
        .unwrap_or(0)
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 11, 6, 0, 0).unwrap()
    }

    #[test]
    fn complete_item_has_no_defects() {
        let raw = json!({
            "id": "7301",
            "text": "hello",
            "webVideoUrl": "https://www.tiktok.com/@creator/video/7301",
            "createTimeISO": "2024-05-10T09:30:00.000Z",
            "playCount": 1200,
            "diggCount": 80,
            "commentCount": 4,
            "shareCount": 2
        });
        let record = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
        assert!(record.defect_flags.is_empty());
        assert_eq!(record.id, "7301");
        assert_eq!(record.created_at, Utc.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap());
        assert_eq!(record.metrics.views, 1200);
        assert_eq!(record.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn missing_identifier_is_rejected() {
        let raw = json!({"text": "no id", "webVideoUrl": "https://x"});
        assert_eq!(
            normalize_item_at(&raw, SourceKind::Primary, at()),
            Err(NormalizeError::MissingIdentifier)
        );
    }

    #[test]
    fn numeric_video_id_is_accepted() {
        let raw = json!({"videoId": 7301, "text": "t"});
        let record = normalize_item_at(&raw, SourceKind::Fallback, at()).unwrap();
        assert_eq!(record.id, "7301");
    }

    #[test]
    fn missing_url_is_built_from_id_deterministically() {
        let raw = json!({"id": "7301", "text": "t", "createTime": 1715333400});
        let first = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
        let second = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
        assert_eq!(first.url, "https://www.tiktok.com/@unknown/video/7301");
        assert_eq!(first.url, second.url);
        assert!(first.has_flag(DefectFlag::UrlBuiltFromId));
        assert!(!first.has_flag(DefectFlag::MissingVideoUrl));
    }

    #[test]
    fn unusable_id_leaves_url_empty() {
        let raw = json!({"id": "a/b", "text": "t"});
        let record = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
        assert_eq!(record.url, "");
        assert!(record.has_flag(DefectFlag::MissingVideoUrl));
        assert!(!record.has_flag(DefectFlag::UrlBuiltFromId));
    }

    #[test]
    fn text_falls_back_through_aliases() {
        let raw = json!({"id": "1", "text": "", "desc": "from desc"});
        let record = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
        assert_eq!(record.text, "from desc");

        let bare = json!({"id": "2"});
        let record = normalize_item_at(&bare, SourceKind::Primary, at()).unwrap();
        assert_eq!(record.text, "");
        assert!(record.has_flag(DefectFlag::MissingText));
    }

    #[test]
    fn epoch_timestamps_are_accepted_as_numbers_or_strings() {
        let expected = Utc.timestamp_opt(1715333400, 0).unwrap();
        for raw in [
            json!({"id": "1", "createTime": 1715333400}),
            json!({"id": "1", "createTime": "1715333400"}),
            json!({"id": "1", "createTimeISO": 1715333400}),
            json!({"id": "1", "timestamp": 1715333400}),
        ] {
            let record = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
            assert_eq!(record.created_at, expected, "{raw}");
            assert!(!record.has_flag(DefectFlag::MissingCreateTime));
        }
    }

    #[test]
    fn missing_timestamp_substitutes_now_and_flags() {
        let raw = json!({"id": "1", "createTimeISO": "yesterday-ish"});
        let record = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
        assert_eq!(record.created_at, at());
        assert!(record.has_flag(DefectFlag::MissingCreateTime));
    }

    #[test]
    fn metrics_read_aliases_and_nested_stats() {
        let raw = json!({
            "id": "1",
            "plays": 10,
            "stats": {"diggCount": 3, "commentCount": 2, "shareCount": 1}
        });
        let record = normalize_item_at(&raw, SourceKind::Primary, at()).unwrap();
        assert_eq!(
            record.metrics,
            EngagementMetrics {
                views: 10,
                likes: 3,
                comments: 2,
                shares: 1
            }
        );
    }

    #[test]
    fn category_comes_only_from_fallback_items() {
        let raw = json!({"id": "1", "category": "Pinned"});
        assert_eq!(
            normalize_item_at(&raw, SourceKind::Fallback, at()).unwrap().category,
            "Pinned"
        );
        assert_eq!(
            normalize_item_at(&raw, SourceKind::Primary, at()).unwrap().category,
            DEFAULT_CATEGORY
        );
    }

    #[test]
    fn batch_drops_only_unidentified_items() {
        let items = vec![json!({"id": "1"}), json!({"text": "orphan"}), json!({"id": "2"})];
        let batch = normalize_items(&items, SourceKind::Primary);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.failures, vec![NormalizeError::MissingIdentifier]);
    }

    #[test]
    fn range_filter_excludes_flagged_sentinel_times() {
        let range = DateRange {
            start: Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 10, 23, 59, 59).unwrap(),
        };
        let inside = json!({"id": "1", "createTimeISO": "2024-05-10T12:00:00Z"});
        let outside = json!({"id": "2", "createTimeISO": "2024-05-09T12:00:00Z"});
        let undated = json!({"id": "3"});
        let noon = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();

        let records: Vec<NormalizedRecord> = [inside, outside, undated]
            .iter()
            .map(|raw| normalize_item_at(raw, SourceKind::Primary, noon).unwrap())
            .collect();
        let kept = filter_in_range(&records, &range);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "1");
    }
}
