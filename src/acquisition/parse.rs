//! HTML extraction for scraped quote pages.
//!
//! Everything here is synchronous and borrows the page text; `scraper::Html`
//! is not `Send`, so documents must not live across await points. Output is
//! raw strings only. Typing and validation happen in [`super::cleaner`].

use scraper::{ElementRef, Html, Selector};

use crate::acquisition::cleaner;
use crate::error::SourceError;
use crate::models::{RawHistoryRow, RawQuote};

/// History tables vary across page variants. Checked most specific first.
const HISTORY_TABLE_CANDIDATES: [&str; 3] = ["table#t", "table.prices", "table"];

fn sel(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("selector `{css}`: {e}")))
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Pull the company header, quoted price, key/value stat rows and industry
/// link out of a quote page. Missing pieces stay `None`; only a selector
/// that fails to compile is an error.
pub fn parse_quote_page(html: &str) -> Result<RawQuote, SourceError> {
    let name_sel = sel("div.zzDege")?;
    let price_sel = sel("div.YMlKec.fxKbKc")?;
    let price_attr_sel = sel("[data-last-price]")?;
    let stat_row_sel = sel("div.gyFHrc")?;
    let div_sel = sel("div")?;
    let table_row_sel = sel("table tr")?;
    let cell_sel = sel("td")?;
    let industry_sel = sel("a.py3Ok")?;

    let doc = Html::parse_document(html);
    let mut quote = RawQuote::default();

    if let Some(el) = doc.select(&name_sel).next() {
        let name = text_of(&el);
        if !name.is_empty() {
            quote.name = Some(name);
        }
    }

    if let Some(el) = doc.select(&price_sel).next() {
        let price = text_of(&el);
        if !price.is_empty() {
            quote.price = Some(price);
        }
    }
    if quote.price.is_none() {
        if let Some(el) = doc.select(&price_attr_sel).next() {
            quote.price = el.value().attr("data-last-price").map(str::to_string);
        }
    }

    for row in doc.select(&stat_row_sel) {
        let divs: Vec<_> = row.select(&div_sel).collect();
        if divs.len() >= 2 {
            let key = text_of(&divs[0]).to_lowercase();
            let value = text_of(&divs[divs.len() - 1]);
            if !key.is_empty() {
                quote.kv.push((key, value));
            }
        }
    }

    // Older page variants carry the same figures in a plain table.
    for row in doc.select(&table_row_sel) {
        let cells: Vec<_> = row.select(&cell_sel).collect();
        if cells.len() >= 2 {
            let key = text_of(&cells[0]).to_lowercase();
            let value = text_of(&cells[1]);
            if !key.is_empty() {
                quote.kv.push((key, value));
            }
        }
    }

    if let Some(el) = doc.select(&industry_sel).next() {
        let industry = text_of(&el);
        if !industry.is_empty() {
            quote.industry = Some(industry);
        }
    }

    Ok(quote)
}

/// Extract raw `(date, close)` rows from the first candidate table whose
/// rows carry at least one parsable date. Column positions come from the
/// header row when one exists; headerless tables are read as date/close
/// pairs.
pub fn parse_history_table(html: &str) -> Result<Vec<RawHistoryRow>, SourceError> {
    let row_sel = sel("tr")?;
    let header_sel = sel("th")?;
    let cell_sel = sel("td")?;

    let doc = Html::parse_document(html);
    for candidate in HISTORY_TABLE_CANDIDATES {
        let table_sel = sel(candidate)?;
        for table in doc.select(&table_sel) {
            let rows = extract_history_rows(&table, &row_sel, &header_sel, &cell_sel);
            let dated = rows
                .iter()
                .any(|r| r.date.as_deref().and_then(cleaner::parse_date).is_some());
            if dated {
                return Ok(rows);
            }
        }
    }
    Ok(Vec::new())
}

fn extract_history_rows(
    table: &ElementRef<'_>,
    row_sel: &Selector,
    header_sel: &Selector,
    cell_sel: &Selector,
) -> Vec<RawHistoryRow> {
    let mut date_idx = 0usize;
    let mut close_idx = 1usize;
    let headers: Vec<String> = table
        .select(header_sel)
        .map(|th| text_of(&th).to_lowercase())
        .collect();
    for (i, header) in headers.iter().enumerate() {
        if header.contains("date") {
            date_idx = i;
        }
        if header.contains("close") || header.contains("price") {
            close_idx = i;
        }
    }

    let mut rows = Vec::new();
    for row in table.select(row_sel) {
        let cells: Vec<_> = row.select(cell_sel).collect();
        if cells.len() <= date_idx.max(close_idx) {
            continue;
        }
        rows.push(RawHistoryRow {
            date: Some(text_of(&cells[date_idx])),
            close: Some(text_of(&cells[close_idx])),
        });
    }
    rows
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const QUOTE_PAGE: &str = r#"
        <html><body>
          <div class="zzDege">Tata Consultancy Services Ltd</div>
          <div class="YMlKec fxKbKc">₹3,852.40</div>
          <div class="gyFHrc"><div>P/E ratio</div><div class="P6K39c">28.54</div></div>
          <div class="gyFHrc"><div>Book value</div><div class="P6K39c">285.20</div></div>
          <a class="py3Ok" href="/industry">IT Services</a>
        </body></html>
    "#;

    #[test]
    fn quote_page_yields_name_price_stats_and_industry() {
        let quote = parse_quote_page(QUOTE_PAGE).unwrap();
        assert_eq!(quote.name.as_deref(), Some("Tata Consultancy Services Ltd"));
        assert_eq!(quote.price.as_deref(), Some("₹3,852.40"));
        assert_eq!(quote.industry.as_deref(), Some("IT Services"));
        assert_eq!(quote.lookup(&["p/e ratio"]), Some("28.54"));
        assert_eq!(quote.lookup(&["book value"]), Some("285.20"));
        assert_eq!(quote.lookup(&["roce"]), None);
    }

    #[test]
    fn price_falls_back_to_data_attribute() {
        let html = r#"<div data-last-price="1523.75">stale render</div>"#;
        let quote = parse_quote_page(html).unwrap();
        assert_eq!(quote.price.as_deref(), Some("1523.75"));
    }

    #[test]
    fn table_rows_feed_the_kv_soup() {
        let html = r#"
            <table>
              <tr><td>ROCE</td><td>52.3%</td></tr>
              <tr><td>Total debt</td><td>12,000</td></tr>
            </table>
        "#;
        let quote = parse_quote_page(html).unwrap();
        assert_eq!(quote.lookup(&["roce"]), Some("52.3%"));
        assert_eq!(quote.lookup(&["total debt", "debt"]), Some("12,000"));
    }

    #[test]
    fn lookup_prefers_earlier_keys_and_later_rows() {
        let html = r#"
            <table>
              <tr><td>P/E</td><td>10.0</td></tr>
              <tr><td>P/E ratio</td><td>28.54</td></tr>
              <tr><td>P/E ratio</td><td>29.00</td></tr>
            </table>
        "#;
        let quote = parse_quote_page(html).unwrap();
        // "p/e ratio" outranks "p/e"; the later duplicate row wins.
        assert_eq!(quote.lookup(&["p/e ratio", "pe ratio", "p/e"]), Some("29.00"));
    }

    #[test]
    fn history_table_respects_header_positions() {
        let html = r#"
            <table id="t">
              <tr><th>Close</th><th>Date</th></tr>
              <tr><td>101.50</td><td>Aug 21, 2025</td></tr>
              <tr><td>102.25</td><td>Aug 22, 2025</td></tr>
            </table>
        "#;
        let rows = parse_history_table(html).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date.as_deref(), Some("Aug 21, 2025"));
        assert_eq!(rows[0].close.as_deref(), Some("101.50"));
    }

    #[test]
    fn headerless_history_reads_date_close_pairs() {
        let html = r#"
            <table class="prices">
              <tr><td>2025-08-21</td><td>101.50</td></tr>
              <tr><td>2025-08-22</td><td>102.25</td></tr>
            </table>
        "#;
        let rows = parse_history_table(html).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].close.as_deref(), Some("102.25"));
    }

    #[test]
    fn stat_tables_without_dates_are_not_mistaken_for_history() {
        let html = r#"
            <table>
              <tr><td>P/E ratio</td><td>28.54</td></tr>
            </table>
        "#;
        assert!(parse_history_table(html).unwrap().is_empty());
        assert!(parse_history_table("<p>no tables here</p>").unwrap().is_empty());
    }
}
