//! Market Calendar (C10): classifies the current instant against NSE/BSE trading
//! hours and computes adjacent trading days, all in IST (SPEC_FULL.md §4.10).
//!
//! Grounded on `original_source/backend/utils/market_hours.py`'s `MarketHours`
//! classmethods, translated to a fixed `chrono-tz::Asia::Kolkata` zone (IST has no
//! DST transitions, so this is equivalent to the original's `pytz` usage).

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;

/// 9:15 AM IST.
pub fn market_open_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 15, 0).unwrap()
}

/// 3:30 PM IST.
pub fn market_close_time() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).unwrap()
}

/// Current instant classifier over NSE/BSE trading hours (Asia/Kolkata).
///
/// Carries no state: every operation recomputes from `now_utc()` (or an injected
/// clock in tests), matching the original's classmethod style.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketCalendar;

impl MarketCalendar {
    pub fn new() -> Self {
        Self
    }

    fn now_ist(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&Kolkata)
    }

    fn is_weekend(day: Weekday) -> bool {
        matches!(day, Weekday::Sat | Weekday::Sun)
    }

    /// True iff it is a weekday and the current IST time falls within
    /// `[market_open_time, market_close_time]`.
    pub fn is_market_open(&self) -> bool {
        self.is_market_open_at(self.now_ist())
    }

    fn is_market_open_at(&self, now: DateTime<Tz>) -> bool {
        if Self::is_weekend(now.date_naive().weekday()) {
            return false;
        }
        let t = now.time();
        t >= market_open_time() && t <= market_close_time()
    }

    /// True iff today (IST) is a trading weekday (Monday-Friday).
    pub fn is_weekday(&self) -> bool {
        !Self::is_weekend(self.now_ist().date_naive().weekday())
    }

    /// True iff it is a weekend, or the current IST time is past market close.
    pub fn is_market_closed_for_day(&self) -> bool {
        self.is_market_closed_for_day_at(self.now_ist())
    }

    fn is_market_closed_for_day_at(&self, now: DateTime<Tz>) -> bool {
        if Self::is_weekend(now.date_naive().weekday()) {
            return true;
        }
        now.time() > market_close_time()
    }

    /// Today if a weekday, else the coming Monday (§4.10 `TradingDate`).
    pub fn trading_date(&self) -> chrono::NaiveDate {
        self.trading_date_at(self.now_ist())
    }

    fn trading_date_at(&self, now: DateTime<Tz>) -> chrono::NaiveDate {
        let today = now.date_naive();
        next_or_same_weekday(today)
    }

    /// The last trading day strictly before `trading_date()` (§4.10 `PrevTradingDate`).
    pub fn prev_trading_date(&self) -> chrono::NaiveDate {
        let mut prev = self.trading_date() - chrono::Duration::days(1);
        while Self::is_weekend(prev.weekday()) {
            prev -= chrono::Duration::days(1);
        }
        prev
    }

    /// True iff a weekday and the current IST time is at or past market close —
    /// the gate the Price Poller and "momentum should be calculated" checks share
    /// (`ShouldCalculateMomentum` and `ShouldUpdateData` coincide per §4.10).
    pub fn should_calculate_momentum(&self) -> bool {
        self.should_update_data()
    }

    pub fn should_update_data(&self) -> bool {
        let now = self.now_ist();
        if Self::is_weekend(now.date_naive().weekday()) {
            return false;
        }
        !self.is_market_open_at(now)
    }

    /// Next instant (IST) the market opens.
    pub fn next_market_open(&self) -> DateTime<Tz> {
        let now = self.now_ist();
        let today = now.date_naive();

        let next_trading_date = if Self::is_weekend(today.weekday()) {
            next_or_same_weekday(today)
        } else if self.is_market_closed_for_day_at(now) {
            next_or_same_weekday(today + chrono::Duration::days(1))
        } else {
            today
        };

        Kolkata
            .from_local_datetime(&next_trading_date.and_time(market_open_time()))
            .single()
            .expect("IST has no DST ambiguity")
    }

    /// Human-readable status line, mirroring `get_market_status_message`.
    pub fn status_message(&self) -> String {
        let now = self.now_ist();
        if Self::is_weekend(now.date_naive().weekday()) {
            format!(
                "Weekend - Market closed. Next trading day: {}",
                self.trading_date()
            )
        } else if self.is_market_open_at(now) {
            format!(
                "Market is open (9:15 AM - 3:30 PM IST). Current time: {} IST",
                now.format("%H:%M:%S")
            )
        } else {
            format!("Market is closed. Current time: {} IST", now.format("%H:%M:%S"))
        }
    }
}

/// If `day` is a weekend, roll forward to the following Monday; otherwise return it.
fn next_or_same_weekday(day: chrono::NaiveDate) -> chrono::NaiveDate {
    match day.weekday() {
        Weekday::Sat => day + chrono::Duration::days(2),
        Weekday::Sun => day + chrono::Duration::days(1),
        _ => day,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Kolkata
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, 0)
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn market_open_during_hours_on_weekday() {
        // 2024-01-03 is a Wednesday.
        let cal = MarketCalendar::new();
        assert!(cal.is_market_open_at(ist(2024, 1, 3, 10, 0)));
        assert!(!cal.is_market_open_at(ist(2024, 1, 3, 8, 0)));
        assert!(!cal.is_market_open_at(ist(2024, 1, 3, 16, 0)));
    }

    #[test]
    fn weekend_is_never_open() {
        let cal = MarketCalendar::new();
        // 2024-01-06 is a Saturday.
        assert!(!cal.is_market_open_at(ist(2024, 1, 6, 10, 0)));
        assert!(cal.is_market_closed_for_day_at(ist(2024, 1, 6, 10, 0)));
    }

    #[test]
    fn trading_date_rolls_weekend_to_monday() {
        let cal = MarketCalendar::new();
        // Saturday 2024-01-06 -> Monday 2024-01-08.
        assert_eq!(
            cal.trading_date_at(ist(2024, 1, 6, 10, 0)),
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
        );
        // Sunday 2024-01-07 -> Monday 2024-01-08.
        assert_eq!(
            cal.trading_date_at(ist(2024, 1, 7, 10, 0)),
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
        );
    }

    #[test]
    fn prev_trading_date_skips_weekend() {
        let cal = MarketCalendar::new();
        // Monday 2024-01-08's previous trading day is Friday 2024-01-05.
        let now = ist(2024, 1, 8, 16, 0);
        let today = now.date_naive();
        let mut prev = next_or_same_weekday(today) - chrono::Duration::days(1);
        while matches!(prev.weekday(), Weekday::Sat | Weekday::Sun) {
            prev -= chrono::Duration::days(1);
        }
        assert_eq!(prev, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    }
}
