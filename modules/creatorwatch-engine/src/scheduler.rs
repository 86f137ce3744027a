use std::future::Future;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::info;

/// Next `hour:00` local time in `tz` strictly after `now`.
///
/// A wall-clock hour skipped by a DST jump fires one hour later; a repeated
/// hour fires on its first occurrence.
pub fn next_fire(now: DateTime<Utc>, tz: Tz, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let mut day = now.with_timezone(&tz).date_naive();
    loop {
        let naive = day.and_time(at);
        let local = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest());
        if let Some(local) = local {
            let fire = local.with_timezone(&Utc);
            if fire > now {
                return fire;
            }
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => return now,
        };
    }
}

/// Run `job` every day at `hour` local time. Never returns.
pub async fn run_daily<F, Fut>(tz: Tz, hour: u32, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = Utc::now();
        let fire = next_fire(now, tz, hour);
        info!(next_run = %fire.with_timezone(&tz), "Scheduler waiting");
        let wait = (fire - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        job().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn fires_later_today_when_hour_not_reached() {
        // 03:00 UTC is 06:00 in Jerusalem (summer, UTC+3)
        let fire = next_fire(utc(2024, 7, 1, 3, 0), chrono_tz::Asia::Jerusalem, 7);
        assert_eq!(fire, utc(2024, 7, 1, 4, 0));
    }

    #[test]
    fn fires_tomorrow_once_hour_has_passed() {
        let fire = next_fire(utc(2024, 7, 1, 4, 0), chrono_tz::Asia::Jerusalem, 7);
        assert_eq!(fire, utc(2024, 7, 2, 4, 0));
    }

    #[test]
    fn skipped_hour_fires_an_hour_later() {
        // New York springs forward at 02:00 on 2024-03-10
        let fire = next_fire(utc(2024, 3, 10, 5, 0), chrono_tz::America::New_York, 2);
        assert_eq!(fire, utc(2024, 3, 10, 7, 0));
    }
}
