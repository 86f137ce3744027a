use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Closed UTC interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// The calendar day before `now` in `tz`.
pub fn yesterday(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    let today = now.with_timezone(&tz).date_naive();
    today.pred_opt().unwrap_or(today)
}

/// The local calendar day `date` in `tz`, from midnight to one millisecond
/// before the next midnight.
pub fn day_window(date: NaiveDate, tz: Tz) -> DateRange {
    let start = local_midnight(date, tz);
    let next = date
        .succ_opt()
        .map(|d| local_midnight(d, tz))
        .unwrap_or(start + Duration::days(1));
    DateRange {
        start,
        end: next - Duration::milliseconds(1),
    }
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST jump: the day starts at the first instant after the gap.
        None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yesterday_follows_local_calendar() {
        // 22:30 UTC on the 10th is already the 11th in Jerusalem (UTC+3 in summer).
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 22, 30, 0).unwrap();
        assert_eq!(
            yesterday(now, chrono_tz::Asia::Jerusalem),
            NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
        );
        assert_eq!(
            yesterday(now, chrono_tz::UTC),
            NaiveDate::from_ymd_opt(2024, 6, 9).unwrap()
        );
    }

    #[test]
    fn window_covers_local_day_in_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let window = day_window(date, chrono_tz::Asia::Jerusalem);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 14, 22, 0, 0).unwrap());
        assert_eq!(
            window.end,
            Utc.with_ymd_and_hms(2024, 1, 15, 21, 59, 59).unwrap() + Duration::milliseconds(999)
        );
        assert!(window.contains(window.start));
        assert!(window.contains(window.end));
        assert!(!window.contains(window.end + Duration::milliseconds(1)));
    }
}
