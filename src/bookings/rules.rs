//! Pure booking arithmetic: opening windows, overlaps, pricing and the status
//! machine. Nothing in here touches the database so it can be tested directly.
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::errors::{FieldErrors, ServiceError};

use super::models::{BookingStatus, PaymentStatus};

/// Limits that apply to every booking, loaded from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRules {
    pub min_minutes: i64,
    pub max_minutes: i64,
    /// bookings start and end on a multiple of this
    pub slot_minutes: i64,
    pub max_advance_days: i64,
    /// how long before the start a player can still cancel
    pub cancellation_cutoff_hours: i64,
    pub max_shuttlecocks: i32,
}

impl Default for BookingRules {
    fn default() -> Self {
        BookingRules {
            min_minutes: 60,
            max_minutes: 240,
            slot_minutes: 30,
            max_advance_days: 30,
            cancellation_cutoff_hours: 2,
            max_shuttlecocks: 20,
        }
    }
}

/// A half-open interval of wall clock time within one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    #[serde(with = "crate::timefmt")]
    pub start: NaiveTime,
    #[serde(with = "crate::timefmt")]
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        TimeRange { start, end }
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// back to back ranges don't overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Sort the windows and merge the ones that touch or overlap
pub fn merge_windows(mut windows: Vec<TimeRange>) -> Vec<TimeRange> {
    windows.retain(|window| window.start < window.end);
    windows.sort_by_key(|window| window.start);

    let mut merged: Vec<TimeRange> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => {
                if window.end > last.end {
                    last.end = window.end;
                }
            }
            _ => merged.push(window),
        }
    }

    merged
}

/// A booking has to fit in a single (merged) opening window
pub fn fits_in_windows(windows: &[TimeRange], range: &TimeRange) -> bool {
    merge_windows(windows.to_vec())
        .iter()
        .any(|window| window.contains(range))
}

pub fn conflicts_with(booked: &[TimeRange], range: &TimeRange) -> bool {
    booked.iter().any(|other| other.overlaps(range))
}

/// The parts of the opening windows that aren't taken, skipping anything before `not_before`
pub fn free_slots(
    windows: &[TimeRange],
    booked: &[TimeRange],
    not_before: Option<NaiveTime>,
) -> Vec<TimeRange> {
    let mut booked = booked.to_vec();
    booked.sort_by_key(|range| range.start);

    let mut free = Vec::new();
    for window in merge_windows(windows.to_vec()) {
        let mut cursor = match not_before {
            Some(not_before) if not_before > window.start => not_before,
            _ => window.start,
        };

        for range in booked.iter().filter(|range| range.overlaps(&window)) {
            if range.start > cursor {
                free.push(TimeRange::new(cursor, range.start.min(window.end)));
            }
            if range.end > cursor {
                cursor = range.end;
            }
        }

        if cursor < window.end {
            free.push(TimeRange::new(cursor, window.end));
        }
    }

    free
}

/// price in cents, the hourly rate is charged per started minute
pub fn total_amount(
    hourly_rate: i64,
    shuttlecock_price: i64,
    minutes: i64,
    shuttlecocks: i32,
) -> i64 {
    hourly_rate * minutes / 60 + i64::from(shuttlecocks) * shuttlecock_price
}

/// day of the week as stored in the availability table, 0 is sunday
pub fn day_of_week(date: NaiveDate) -> i16 {
    use chrono::Datelike;

    date.weekday().num_days_from_sunday() as i16
}

impl BookingRules {
    /// Field level checks on a booking request
    pub fn check_request(&self, range: &TimeRange, shuttlecocks: i32) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();

        if range.start >= range.end {
            errors.add("end_time", "the end time must be after the start time");
        } else {
            let minutes = range.minutes();
            if minutes < self.min_minutes {
                errors.add(
                    "end_time",
                    &format!("a booking lasts at least {} minutes", self.min_minutes),
                );
            }
            if minutes > self.max_minutes {
                errors.add(
                    "end_time",
                    &format!("a booking lasts at most {} minutes", self.max_minutes),
                );
            }
        }

        if !self.is_aligned(&range.start) {
            errors.add(
                "start_time",
                &format!("the start time must be a multiple of {} minutes", self.slot_minutes),
            );
        }
        if !self.is_aligned(&range.end) {
            errors.add(
                "end_time",
                &format!("the end time must be a multiple of {} minutes", self.slot_minutes),
            );
        }

        if shuttlecocks < 0 || shuttlecocks > self.max_shuttlecocks {
            errors.add(
                "shuttlecock_count",
                &format!(
                    "the shuttlecock count must be between 0 and {}",
                    self.max_shuttlecocks
                ),
            );
        }

        errors.into_result()
    }

    fn is_aligned(&self, time: &NaiveTime) -> bool {
        time.second() == 0
            && i64::from(time.num_seconds_from_midnight() / 60) % self.slot_minutes == 0
    }

    /// A booking can't start in the past or too far in the future
    pub fn check_booking_window(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        now: NaiveDateTime,
    ) -> Result<(), ServiceError> {
        if date.and_time(start) <= now {
            booking_error!("you can't book a court in the past");
        }

        if date > now.date() + Duration::days(self.max_advance_days) {
            booking_error!(format!(
                "bookings can be made at most {} days in advance",
                self.max_advance_days
            ));
        }

        Ok(())
    }

    /// Players have to cancel before the cutoff, managers can always cancel
    pub fn check_cancellation(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        now: NaiveDateTime,
    ) -> Result<(), ServiceError> {
        let cutoff = date.and_time(start) - Duration::hours(self.cancellation_cutoff_hours);

        if now > cutoff {
            booking_error!(format!(
                "bookings can only be cancelled up to {} hours before they start",
                self.cancellation_cutoff_hours
            ));
        }

        Ok(())
    }
}

pub fn check_status_transition(from: BookingStatus, to: BookingStatus) -> Result<(), ServiceError> {
    use BookingStatus::*;

    match (from, to) {
        (Pending, Confirmed) | (Pending, Cancelled) => Ok(()),
        (Confirmed, Completed) | (Confirmed, Cancelled) => Ok(()),
        (from, to) => Err(ServiceError::BookingError(format!(
            "a {} booking can't become {}",
            from, to
        ))),
    }
}

pub fn check_payment_transition(from: PaymentStatus, to: PaymentStatus) -> Result<(), ServiceError> {
    use PaymentStatus::*;

    match (from, to) {
        (Unpaid, Paid) | (Paid, Refunded) => Ok(()),
        (from, to) => Err(ServiceError::BookingError(format!(
            "the payment status can't change from {} to {}",
            from, to
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms(h, m, 0)
    }

    fn range(start: (u32, u32), end: (u32, u32)) -> TimeRange {
        TimeRange::new(t(start.0, start.1), t(end.0, end.1))
    }

    #[test]
    fn back_to_back_is_no_overlap() {
        let morning = range((8, 0), (10, 0));

        assert!(!morning.overlaps(&range((10, 0), (11, 0))));
        assert!(!morning.overlaps(&range((7, 0), (8, 0))));
        assert!(morning.overlaps(&range((9, 30), (10, 30))));
        assert!(morning.overlaps(&range((7, 0), (12, 0))));
    }

    #[test]
    fn contiguous_windows_merge() {
        let merged = merge_windows(vec![
            range((14, 0), (18, 0)),
            range((8, 0), (12, 0)),
            range((12, 0), (14, 0)),
            range((20, 0), (22, 0)),
            range((21, 0), (21, 30)),
        ]);

        assert_eq!(merged, vec![range((8, 0), (18, 0)), range((20, 0), (22, 0))]);
    }

    #[test]
    fn booking_must_fit_one_window() {
        let windows = vec![range((8, 0), (12, 0)), range((12, 0), (14, 0)), range((16, 0), (20, 0))];

        assert!(fits_in_windows(&windows, &range((11, 0), (13, 0))));
        assert!(fits_in_windows(&windows, &range((16, 0), (20, 0))));
        assert!(!fits_in_windows(&windows, &range((13, 0), (17, 0))));
        assert!(!fits_in_windows(&windows, &range((7, 30), (9, 0))));
        assert!(!fits_in_windows(&[], &range((9, 0), (10, 0))));
    }

    #[test]
    fn free_slots_skip_bookings() {
        let windows = vec![range((8, 0), (12, 0)), range((18, 0), (22, 0))];
        let booked = vec![range((9, 0), (10, 0)), range((10, 0), (11, 0)), range((18, 0), (19, 0))];

        assert_eq!(
            free_slots(&windows, &booked, None),
            vec![
                range((8, 0), (9, 0)),
                range((11, 0), (12, 0)),
                range((19, 0), (22, 0))
            ]
        );
    }

    #[test]
    fn free_slots_skip_the_past() {
        let windows = vec![range((8, 0), (12, 0)), range((18, 0), (22, 0))];

        assert_eq!(
            free_slots(&windows, &[], Some(t(13, 0))),
            vec![range((18, 0), (22, 0))]
        );
        assert_eq!(
            free_slots(&windows, &[range((10, 0), (11, 0))], Some(t(9, 30))),
            vec![
                range((9, 30), (10, 0)),
                range((11, 0), (12, 0)),
                range((18, 0), (22, 0))
            ]
        );
    }

    #[test]
    fn pricing() {
        assert_eq!(total_amount(1200, 300, 90, 3), 1800 + 900);
        assert_eq!(total_amount(1000, 250, 60, 0), 1000);
        assert_eq!(total_amount(0, 0, 120, 5), 0);
    }

    #[test]
    fn weekdays_start_on_sunday() {
        assert_eq!(day_of_week(NaiveDate::from_ymd(2024, 6, 2)), 0);
        assert_eq!(day_of_week(NaiveDate::from_ymd(2024, 6, 3)), 1);
        assert_eq!(day_of_week(NaiveDate::from_ymd(2024, 6, 8)), 6);
    }

    #[test]
    fn request_limits() {
        let rules = BookingRules::default();

        assert!(rules.check_request(&range((8, 0), (9, 30)), 4).is_ok());
        assert!(rules.check_request(&range((8, 0), (8, 30)), 0).is_err());
        assert!(rules.check_request(&range((8, 0), (13, 0)), 0).is_err());
        assert!(rules.check_request(&range((9, 0), (8, 0)), 0).is_err());
        assert!(rules.check_request(&range((8, 15), (9, 15)), 0).is_err());
        assert!(rules.check_request(&range((8, 0), (9, 0)), 21).is_err());
        assert!(rules.check_request(&range((8, 0), (9, 0)), -1).is_err());
    }

    #[test]
    fn booking_window() {
        let rules = BookingRules::default();
        let now = NaiveDate::from_ymd(2024, 6, 3).and_hms(10, 0, 0);

        assert!(rules
            .check_booking_window(NaiveDate::from_ymd(2024, 6, 3), t(11, 0), now)
            .is_ok());
        assert!(rules
            .check_booking_window(NaiveDate::from_ymd(2024, 6, 3), t(9, 0), now)
            .is_err());
        assert!(rules
            .check_booking_window(NaiveDate::from_ymd(2024, 7, 3), t(9, 0), now)
            .is_ok());
        assert_eq!(
            rules
                .check_booking_window(NaiveDate::from_ymd(2024, 7, 4), t(9, 0), now)
                .unwrap_err()
                .code(),
            "booking_error"
        );
    }

    #[test]
    fn cancellation_cutoff() {
        let rules = BookingRules::default();
        let date = NaiveDate::from_ymd(2024, 6, 3);

        assert!(rules
            .check_cancellation(date, t(12, 0), date.and_hms(10, 0, 0))
            .is_ok());
        assert!(rules
            .check_cancellation(date, t(12, 0), date.and_hms(10, 1, 0))
            .is_err());
    }

    #[test]
    fn status_machine() {
        use BookingStatus::*;

        assert!(check_status_transition(Pending, Confirmed).is_ok());
        assert!(check_status_transition(Pending, Cancelled).is_ok());
        assert!(check_status_transition(Confirmed, Completed).is_ok());
        assert!(check_status_transition(Confirmed, Cancelled).is_ok());
        assert!(check_status_transition(Pending, Completed).is_err());
        assert!(check_status_transition(Cancelled, Confirmed).is_err());
        assert!(check_status_transition(Completed, Cancelled).is_err());
    }

    #[test]
    fn payment_machine() {
        use PaymentStatus::*;

        assert!(check_payment_transition(Unpaid, Paid).is_ok());
        assert!(check_payment_transition(Paid, Refunded).is_ok());
        assert!(check_payment_transition(Unpaid, Refunded).is_err());
        assert!(check_payment_transition(Refunded, Paid).is_err());
    }
}
