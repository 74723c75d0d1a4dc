//! Temporal bucket labels for hierarchical rollups.
//!
//! All bucketing is computed in UTC from the message's authoritative epoch
//! `date`. Week labels follow ISO week rules: weeks start Monday and belong
//! to the year containing their Thursday.

use chrono::{DateTime, Datelike, Utc};

fn utc(epoch: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(epoch, 0).unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
}

/// `YYYY-MM-DD` day bucket.
pub fn day_bucket(epoch: i64) -> String {
    utc(epoch).format("%Y-%m-%d").to_string()
}

/// `YYYY-Www` ISO-week bucket.
pub fn week_bucket(epoch: i64) -> String {
    let week = utc(epoch).iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// `YYYY-MM` month bucket.
pub fn month_bucket(epoch: i64) -> String {
    utc(epoch).format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-10-20 12:00:00 UTC
    const OCT_20_2025: i64 = 1_760_961_600;

    #[test]
    fn day_and_month_buckets() {
        assert_eq!(day_bucket(OCT_20_2025), "2025-10-20");
        assert_eq!(month_bucket(OCT_20_2025), "2025-10");
    }

    #[test]
    fn iso_week_for_mid_october() {
        // 2025-10-20 is a Monday in ISO week 43.
        assert_eq!(week_bucket(OCT_20_2025), "2025-W43");
        // Two days later, same week.
        assert_eq!(week_bucket(OCT_20_2025 + 2 * 86_400), "2025-W43");
    }

    #[test]
    fn iso_week_year_boundary_follows_thursday_rule() {
        // 2024-12-30 (Monday) belongs to 2025-W01: that week's Thursday is
        // 2025-01-02.
        let dec_30_2024 = 1_735_560_000; // 2024-12-30 12:00:00 UTC
        assert_eq!(week_bucket(dec_30_2024), "2025-W01");

        // 2027-01-01 (Friday) belongs to 2026-W53.
        let jan_1_2027 = 1_798_804_800; // 2027-01-01 12:00:00 UTC
        assert_eq!(week_bucket(jan_1_2027), "2026-W53");
    }

    #[test]
    fn week_label_zero_pads() {
        // 2025-01-06 is in week 2.
        let jan_6_2025 = 1_736_164_800;
        assert_eq!(week_bucket(jan_6_2025), "2025-W02");
    }
}
