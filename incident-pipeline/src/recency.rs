use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

use crate::config::RecencyPolicy;

/// Applies a [`RecencyPolicy`] to a feed's records in feed order.
///
/// A record is admitted while fewer than `max_items` have been admitted and either
/// there is no lookback window, its date falls inside the window, or its date cannot
/// be parsed at all.
pub struct RecencyFilter<'a> {
    policy: &'a RecencyPolicy,
    now: DateTime<Utc>,
    kept: usize,
}

impl<'a> RecencyFilter<'a> {
    pub fn new(policy: &'a RecencyPolicy, now: DateTime<Utc>) -> Self {
        Self {
            policy,
            now,
            kept: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.kept >= self.policy.max_items
    }

    pub fn admit(&mut self, date: Option<&str>) -> bool {
        if self.is_full() {
            return false;
        }

        if let (Some(lookback), Some(parsed)) = (self.policy.lookback, date.and_then(parse_feed_date)) {
            if parsed < self.now - lookback {
                debug!("Dropping record dated {} outside lookback window", parsed);
                return false;
            }
        }

        self.kept += 1;
        true
    }

    pub fn kept(&self) -> usize {
        self.kept
    }
}

/// Best-effort parse of the date formats seen in advisory feeds.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
