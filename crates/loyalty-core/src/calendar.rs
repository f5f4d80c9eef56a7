//! Calendar-day arithmetic in the single business time zone.
//!
//! Every user shares one fixed UTC offset. A "day" here is always a
//! [`NaiveDate`] in that offset, never a 24-hour window.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

/// Maps instants onto calendar days for a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl BusinessCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar day containing `instant`.
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Whether `earlier` is exactly the calendar day before `instant`'s day.
    pub fn is_previous_day(&self, earlier: NaiveDate, instant: DateTime<Utc>) -> bool {
        self.day_of(instant).pred_opt() == Some(earlier)
    }

    /// `MM-DD` of `instant`'s calendar day, the key special days are matched on.
    pub fn month_day(&self, instant: DateTime<Utc>) -> String {
        let day = self.day_of(instant);
        format!("{:02}-{:02}", day.month(), day.day())
    }

    /// Next instant strictly after `now` whose wall time is `at`.
    pub fn next_occurrence(&self, now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
        let local_now = now.with_timezone(&self.offset);
        let mut day = local_now.date_naive();
        loop {
            let candidate = day
                .and_time(at)
                .and_local_timezone(self.offset)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
            if let Some(candidate) = candidate {
                if candidate > now {
                    return candidate;
                }
            }
            day = day + Duration::days(1);
        }
    }
}
