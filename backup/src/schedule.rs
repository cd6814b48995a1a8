//! Scheduled export planning: when a tenant's next automatic backup runs.
//!
//! The sweep that drives due schedules lives on the service; this module
//! computes the next occurrence from frequency, day-of-week, day-of-month
//! and time-of-day, always advancing past "now".

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

use crate::model::{BackupSchedule, ScheduleFrequency};

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Next occurrence of a schedule strictly after `now`.
pub fn next_run_after(schedule: &BackupSchedule, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    match schedule.frequency {
        ScheduleFrequency::Daily => {
            let mut candidate = at(today, schedule.time_of_day);
            while candidate <= now {
                candidate += Duration::days(1);
            }
            candidate
        }
        ScheduleFrequency::Weekly => {
            let target = schedule.day_of_week.unwrap_or(Weekday::Mon);
            let ahead = (target.num_days_from_monday() + 7
                - today.weekday().num_days_from_monday())
                % 7;
            let mut candidate = at(today + Duration::days(i64::from(ahead)), schedule.time_of_day);
            while candidate <= now {
                candidate += Duration::days(7);
            }
            candidate
        }
        ScheduleFrequency::Monthly => {
            let requested = schedule.day_of_month.unwrap_or(1).clamp(1, 31);
            let mut year = today.year();
            let mut month = today.month();
            loop {
                let day = requested.min(days_in_month(year, month));
                let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or(today);
                let candidate = at(date, schedule.time_of_day);
                if candidate > now {
                    return candidate;
                }
                if month == 12 {
                    month = 1;
                    year += 1;
                } else {
                    month += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TenantId;

    fn schedule(frequency: ScheduleFrequency, hour: u32) -> BackupSchedule {
        BackupSchedule {
            tenant_id: 1 as TenantId,
            frequency,
            time_of_day: NaiveTime::from_hms_opt(hour, 30, 0).unwrap(),
            day_of_week: None,
            day_of_month: None,
            last_run: None,
            next_run: None,
            active: true,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_later_today_when_time_not_passed() {
        let next = next_run_after(&schedule(ScheduleFrequency::Daily, 22), utc(2026, 8, 8, 10, 0));
        assert_eq!(next, utc(2026, 8, 8, 22, 30));
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_time_passed() {
        let next = next_run_after(&schedule(ScheduleFrequency::Daily, 2), utc(2026, 8, 8, 10, 0));
        assert_eq!(next, utc(2026, 8, 9, 2, 30));
    }

    #[test]
    fn daily_exact_hit_advances_past_now() {
        let now = utc(2026, 8, 8, 2, 30);
        let next = next_run_after(&schedule(ScheduleFrequency::Daily, 2), now);
        assert_eq!(next, utc(2026, 8, 9, 2, 30));
    }

    #[test]
    fn weekly_lands_on_requested_weekday() {
        let mut s = schedule(ScheduleFrequency::Weekly, 3);
        s.day_of_week = Some(Weekday::Mon);
        // 2026-08-08 is a Saturday; next Monday is 2026-08-10.
        let next = next_run_after(&s, utc(2026, 8, 8, 12, 0));
        assert_eq!(next, utc(2026, 8, 10, 3, 30));
    }

    #[test]
    fn weekly_same_day_past_time_rolls_a_week() {
        let mut s = schedule(ScheduleFrequency::Weekly, 3);
        s.day_of_week = Some(Weekday::Sat);
        let next = next_run_after(&s, utc(2026, 8, 8, 12, 0));
        assert_eq!(next, utc(2026, 8, 15, 3, 30));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let mut s = schedule(ScheduleFrequency::Monthly, 1);
        s.day_of_month = Some(31);
        // September has 30 days.
        let next = next_run_after(&s, utc(2026, 9, 1, 0, 0));
        assert_eq!(next, utc(2026, 9, 30, 1, 30));
    }

    #[test]
    fn monthly_rolls_into_next_year() {
        let mut s = schedule(ScheduleFrequency::Monthly, 1);
        s.day_of_month = Some(15);
        let next = next_run_after(&s, utc(2026, 12, 20, 0, 0));
        assert_eq!(next, utc(2027, 1, 15, 1, 30));
    }

    #[test]
    fn monthly_defaults_to_first_of_month() {
        let next = next_run_after(&schedule(ScheduleFrequency::Monthly, 1), utc(2026, 8, 8, 0, 0));
        assert_eq!(next, utc(2026, 9, 1, 1, 30));
    }
}
