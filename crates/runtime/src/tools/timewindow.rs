//! Relative-time resolution for user utterances.
//!
//! Resolved ranges are merged into `filters.date` as `{$gte, $lte}` clauses
//! and the human-readable label is surfaced through progress events.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::vector::filter;

/// A resolved absolute time range, epoch seconds inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
    pub label: String,
}

fn days_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:last|past)\s+(\d+)\s+days?\b").expect("static regex"))
}

/// UTC midnight of the Monday starting the ISO week containing `now`.
fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = now.weekday().num_days_from_monday() as i64;
    let date = now.date_naive() - Duration::days(days_from_monday);
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight exists"))
}

/// Stateful resolver: "the week before that" shifts the last resolved week.
#[derive(Debug, Default)]
pub struct TimeResolver {
    last_week_start: Option<DateTime<Utc>>,
}

impl TimeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a relative-time phrase in `utterance`, if one is present.
    pub fn resolve(&mut self, utterance: &str, now: DateTime<Utc>) -> Option<TimeWindow> {
        let lower = utterance.to_lowercase();

        if let Some(caps) = days_re().captures(&lower) {
            let n: i64 = caps[1].parse().unwrap_or(1);
            let n = n.clamp(1, 365);
            let end = now.timestamp();
            let start = end - n * 86_400;
            return Some(TimeWindow {
                start,
                end,
                label: format!("the last {n} days"),
            });
        }

        if lower.contains("week before that") {
            let anchor = self.last_week_start?;
            let start = anchor - Duration::days(7);
            self.last_week_start = Some(start);
            return Some(self.week_window(start, "the week before that"));
        }

        if lower.contains("this week") {
            let start = week_start(now);
            self.last_week_start = Some(start);
            return Some(self.week_window(start, "this week"));
        }

        if lower.contains("last week") {
            let start = week_start(now) - Duration::days(7);
            self.last_week_start = Some(start);
            return Some(self.week_window(start, "last week"));
        }

        None
    }

    fn week_window(&self, start: DateTime<Utc>, label: &str) -> TimeWindow {
        let end = start + Duration::days(7) - Duration::seconds(1);
        TimeWindow {
            start: start.timestamp(),
            end: end.timestamp(),
            label: format!("{label} ({})", start.format("%Y-%m-%d")),
        }
    }
}

/// Merge a window into a filter object as a `date: {$gte, $lte}` clause.
pub fn apply_window(filters: Option<Value>, window: &TimeWindow) -> Value {
    let clause = serde_json::json!({ "$gte": window.start, "$lte": window.end });
    filter::with(filters, "date", clause)
}
