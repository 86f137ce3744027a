use tracing::warn;

use creatorwatch_common::{warning, DefectFlag, NormalizedRecord};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub max_missing_created_at_pct: f64,
    pub max_missing_url_pct: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_missing_created_at_pct: 0.3,
            max_missing_url_pct: 0.3,
        }
    }
}

/// Population-level defect rates for one source's normalized output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityAssessment {
    pub missing_created_at_count: u32,
    pub missing_url_count: u32,
    pub missing_created_at_pct: f64,
    pub missing_url_pct: f64,
    pub has_issue: bool,
    pub thresholds: QualityThresholds,
}

impl QualityAssessment {
    /// `HIGH_MISSING_*` per exceeded threshold, then `DATA_QUALITY_ISSUE`. Empty without an issue.
    pub fn warning_flags(&self) -> Vec<&'static str> {
        if !self.has_issue {
            return Vec::new();
        }
        let mut flags = Vec::new();
        if self.missing_created_at_pct > self.thresholds.max_missing_created_at_pct {
            flags.push(warning::HIGH_MISSING_CREATETIME);
        }
        if self.missing_url_pct > self.thresholds.max_missing_url_pct {
            flags.push(warning::HIGH_MISSING_URL);
        }
        flags.push(warning::DATA_QUALITY_ISSUE);
        flags
    }
}

/// Assess every normalized record, before date filtering.
///
/// No records means the source itself failed; that is reported by the source
/// runner, so it never counts as a quality issue here.
pub fn assess(
    records: &[NormalizedRecord],
    items_in_range: u32,
    thresholds: QualityThresholds,
) -> QualityAssessment {
    if records.is_empty() {
        return QualityAssessment {
            thresholds,
            ..Default::default()
        };
    }

    let missing_created_at_count = records
        .iter()
        .filter(|r| r.has_flag(DefectFlag::MissingCreateTime))
        .count() as u32;
    let missing_url_count = records
        .iter()
        .filter(|r| {
            r.has_flag(DefectFlag::MissingVideoUrl) || r.has_flag(DefectFlag::UrlBuiltFromId)
        })
        .count() as u32;

    let total = records.len() as f64;
    let missing_created_at_pct = f64::from(missing_created_at_count) / total;
    let missing_url_pct = f64::from(missing_url_count) / total;

    let has_issue = missing_created_at_pct > thresholds.max_missing_created_at_pct
        || missing_url_pct > thresholds.max_missing_url_pct;

    if has_issue {
        warn!(
            total = records.len(),
            items_in_range,
            missing_created_at_count,
            missing_url_count,
            missing_created_at_pct = %format!("{:.1}%", missing_created_at_pct * 100.0),
            missing_url_pct = %format!("{:.1}%", missing_url_pct * 100.0),
            "Data quality issue detected"
        );
    }

    QualityAssessment {
        missing_created_at_count,
        missing_url_count,
        missing_created_at_pct,
        missing_url_pct,
        has_issue,
        thresholds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::Utc;
    use creatorwatch_common::{EngagementMetrics, SourceKind};
    use serde_json::Value;

    fn record(flags: &[DefectFlag]) -> NormalizedRecord {
        NormalizedRecord {
            id: "1".into(),
            text: String::new(),
            url: String::new(),
            created_at: Utc::now(),
            metrics: EngagementMetrics::default(),
            category: "Latest".into(),
            source_used: SourceKind::Primary,
            defect_flags: flags.iter().copied().collect::<BTreeSet<_>>(),
            raw: Value::Null,
        }
    }

    #[test]
    fn empty_input_is_never_an_issue() {
        let result = assess(&[], 0, QualityThresholds::default());
        assert!(!result.has_issue);
        assert_eq!(result.missing_url_pct, 0.0);
        assert!(result.warning_flags().is_empty());
    }

    #[test]
    fn threshold_must_be_strictly_exceeded() {
        // 3 of 10 = 0.3, equal to the default threshold.
        let mut records: Vec<_> = (0..3)
            .map(|_| record(&[DefectFlag::MissingCreateTime]))
            .collect();
        records.extend((0..7).map(|_| record(&[])));
        let result = assess(&records, 7, QualityThresholds::default());
        assert!((result.missing_created_at_pct - 0.3).abs() < f64::EPSILON);
        assert!(!result.has_issue);

        records.push(record(&[DefectFlag::MissingCreateTime]));
        assert!(assess(&records, 7, QualityThresholds::default()).has_issue);
    }

    #[test]
    fn built_and_missing_urls_both_count() {
        let records = vec![
            record(&[DefectFlag::UrlBuiltFromId]),
            record(&[DefectFlag::MissingVideoUrl]),
            record(&[]),
        ];
        let result = assess(&records, 3, QualityThresholds::default());
        assert_eq!(result.missing_url_count, 2);
        assert!(result.has_issue);
        assert_eq!(
            result.warning_flags(),
            vec![warning::HIGH_MISSING_URL, warning::DATA_QUALITY_ISSUE]
        );
    }

    #[test]
    fn missing_text_does_not_affect_quality() {
        let records = vec![record(&[DefectFlag::MissingText]); 4];
        assert!(!assess(&records, 4, QualityThresholds::default()).has_issue);
    }
}
