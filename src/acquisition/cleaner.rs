//! Cleaning and normalisation for scraped values.
//!
//! Quote pages format numbers for people: thousands separators, currency
//! marks, percent signs and `N/A` placeholders. Everything that leaves this
//! module is a typed value or `None`.

use chrono::NaiveDate;

use crate::models::{PriceBar, RawHistoryRow};

/// Parse a scraped numeric cell into a float.
///
/// Handles thousands separators, currency marks (`₹`, `$`), percent signs
/// and the `N/A` / dash placeholders used on suspended tickers.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed == "-"
        || trimmed == "—"
    {
        return None;
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a scraped date cell. Quote pages are inconsistent about format,
/// so a few common layouts are tried in order.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    const FORMATS: [&str; 5] = ["%b %d, %Y", "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d %b %Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Canonical form of a ticker symbol: trimmed, uppercase.
pub fn normalise_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Convert one raw history row into a bar. Rows with unparsable cells or a
/// non-positive close are dropped.
pub fn history_row_to_bar(row: &RawHistoryRow) -> Option<PriceBar> {
    let date = parse_date(row.date.as_deref()?)?;
    let close = parse_number(row.close.as_deref()?)?;
    if close <= 0.0 {
        return None;
    }
    Some(PriceBar { date, close })
}

/// Turn raw table rows into a clean series: unparsable rows dropped, sorted
/// ascending by date, duplicate dates collapsed keeping the later row.
pub fn clean_history_rows(rows: &[RawHistoryRow]) -> Vec<PriceBar> {
    let mut bars: Vec<PriceBar> = rows.iter().filter_map(history_row_to_bar).collect();
    sort_dedup_bars(&mut bars);
    bars
}

/// Sort bars ascending by date and collapse duplicate dates, keeping the
/// close that appeared last in the input.
pub fn sort_dedup_bars(bars: &mut Vec<PriceBar>) {
    bars.sort_by_key(|b| b.date);
    bars.dedup_by(|later, kept| {
        if later.date == kept.date {
            kept.close = later.close;
            true
        } else {
            false
        }
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: &str, close: &str) -> RawHistoryRow {
        RawHistoryRow {
            date: Some(date.to_string()),
            close: Some(close.to_string()),
        }
    }

    #[test]
    fn parses_prices_with_separators_and_currency_marks() {
        assert_eq!(parse_number("3,852.40"), Some(3852.40));
        assert_eq!(parse_number("₹1,523.75"), Some(1523.75));
        assert_eq!(parse_number(" $452.15 "), Some(452.15));
        assert_eq!(parse_number("52.3%"), Some(52.3));
        assert_eq!(parse_number("12,000 Cr"), Some(12000.0));
    }

    #[test]
    fn rejects_placeholders_and_garbage() {
        assert_eq!(parse_number("N/A"), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number("—"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("closed"), None);
    }

    #[test]
    fn parses_the_common_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2025, 8, 22).unwrap();
        assert_eq!(parse_date("Aug 22, 2025"), Some(expected));
        assert_eq!(parse_date("2025-08-22"), Some(expected));
        assert_eq!(parse_date("22/08/2025"), Some(expected));
        assert_eq!(parse_date("22 Aug 2025"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn ambiguous_slash_dates_prefer_day_first() {
        // 03/04/2025 reads as 3 April, not 4 March.
        assert_eq!(
            parse_date("03/04/2025"),
            NaiveDate::from_ymd_opt(2025, 4, 3)
        );
    }

    #[test]
    fn normalises_symbols() {
        assert_eq!(normalise_symbol("  tcs \n"), "TCS");
        assert_eq!(normalise_symbol("Infy"), "INFY");
    }

    #[test]
    fn drops_bad_rows_and_non_positive_closes() {
        assert!(history_row_to_bar(&row("Aug 22, 2025", "N/A")).is_none());
        assert!(history_row_to_bar(&row("someday", "100.0")).is_none());
        assert!(history_row_to_bar(&row("Aug 22, 2025", "0")).is_none());
        assert!(history_row_to_bar(&row("Aug 22, 2025", "-5.0")).is_none());
        assert!(history_row_to_bar(&row("Aug 22, 2025", "101.5")).is_some());
    }

    #[test]
    fn cleans_sorts_and_dedups_history() {
        let rows = vec![
            row("Aug 22, 2025", "102.0"),
            row("Aug 20, 2025", "100.0"),
            row("N/A", "99.0"),
            row("Aug 21, 2025", "101.0"),
            row("Aug 20, 2025", "100.5"), // duplicate date, later row wins
        ];
        let bars = clean_history_rows(&rows);
        let dates: Vec<_> = bars.iter().map(|b| b.date.to_string()).collect();
        assert_eq!(dates, vec!["2025-08-20", "2025-08-21", "2025-08-22"]);
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[2].close, 102.0);
    }
}
