use chrono::{Duration, NaiveDate};

/// One inclusive date window of a harvest horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Splits the coverage horizon into `count` consecutive windows of
/// `length_days` each, anchored at `today`. Windows are contiguous and
/// non-overlapping, so month and year boundaries never produce a gap.
pub fn windows_from(today: NaiveDate, count: u32, length_days: u32) -> Vec<Window> {
    let length_days = i64::from(length_days.max(1));
    (0..count)
        .map(|i| {
            let start = today + Duration::days(i64::from(i) * length_days);
            let end = start + Duration::days(length_days - 1);
            Window { start, end }
        })
        .collect()
}

/// Expands a listing URL template for one window. `{start}` and `{end}` are
/// replaced with the window bounds rendered in `date_format`.
pub fn fill_template(template: &str, window: &Window, date_format: &str) -> String {
    template
        .replace("{start}", &window.start.format(date_format).to_string())
        .replace("{end}", &window.end.format(date_format).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_are_contiguous_across_year_boundary() {
        let today = NaiveDate::from_ymd_opt(2025, 12, 28).unwrap();
        let windows = windows_from(today, 4, 7);

        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].start, today);
        assert_eq!(windows[0].end, NaiveDate::from_ymd_opt(2026, 1, 3).unwrap());
        assert_eq!(
            windows[3].end,
            NaiveDate::from_ymd_opt(2026, 1, 24).unwrap()
        );

        // No gaps, no overlaps
        for pair in windows.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + Duration::days(1));
        }

        let total: i64 = windows.iter().map(|w| w.span_days()).sum();
        assert_eq!(total, 28);
    }

    #[test]
    fn test_zero_length_window_clamped() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let windows = windows_from(today, 2, 0);
        assert_eq!(windows[0].span_days(), 1);
        assert_eq!(windows[1].start, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
    }

    #[test]
    fn test_fill_template() {
        let window = Window {
            start: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 10, 7).unwrap(),
        };
        let url = fill_template(
            "https://example.com/events?from={start}&to={end}",
            &window,
            "%Y-%m-%d",
        );
        assert_eq!(url, "https://example.com/events?from=2025-10-01&to=2025-10-07");
    }
}
