//! Table markup parsing.
//!
//! The catalog endpoint returns its results as a server-rendered `<table>`.
//! This module turns that markup into row records keyed by header name.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

/// One parsed table row, keyed by column header.
pub type Row = BTreeMap<String, String>;

/// Parse every data row of the first table in `markup`.
///
/// Header cells (`<th>`) name the columns; each `<tr>` containing `<td>`
/// cells becomes a row. Cells beyond the header count are dropped and
/// missing trailing cells are simply absent from the row.
pub fn parse_table(markup: &str) -> Vec<Row> {
    let document = Html::parse_document(markup);

    let (Ok(table_sel), Ok(th_sel), Ok(tr_sel), Ok(td_sel)) = (
        Selector::parse("table"),
        Selector::parse("th"),
        Selector::parse("tr"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    let Some(table) = document.select(&table_sel).next() else {
        return Vec::new();
    };

    let headers: Vec<String> = table.select(&th_sel).map(cell_text).collect();
    if headers.is_empty() {
        return Vec::new();
    }

    table
        .select(&tr_sel)
        .filter_map(|tr| {
            let cells: Vec<String> = tr.select(&td_sel).map(cell_text).collect();
            if cells.is_empty() {
                return None;
            }
            Some(headers.iter().cloned().zip(cells).collect())
        })
        .collect()
}

/// Decoded text of a cell, nested tags flattened and whitespace collapsed.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
