// src/extract.rs

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};

static BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2, h4, table").expect("block selector should parse"));
static ROWS: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector should parse"));
static CELLS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th, td").expect("cell selector should parse"));

/// Ordered key → value pairs from the first two cells of each table row.
/// A repeated key keeps its first value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    entries: Vec<(String, String)>,
}

impl Table {
    /// Insert unless `key` is already present. Returns whether it was inserted.
    pub fn insert(&mut self, key: String, value: String) -> bool {
        if self.entries.iter().any(|(k, _)| *k == key) {
            return false;
        }
        self.entries.push((key, value));
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when at least one value is non-empty.
    pub fn has_values(&self) -> bool {
        self.entries.iter().any(|(_, v)| !v.is_empty())
    }
}

impl FromIterator<(String, String)> for Table {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut table = Table::default();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

/// A heading together with the table rows found under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub table: Table,
}

/// Text content with each text node trimmed and blank nodes dropped.
fn clean_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Reduce a `<table>` to its `(first cell, second cell)` pairs.
/// Rows with fewer than two cells are skipped.
pub fn parse_table(table: ElementRef<'_>, into: &mut Table) {
    for row in table.select(&ROWS) {
        let mut cells = row.select(&CELLS);
        let (Some(first), Some(second)) = (cells.next(), cells.next()) else {
            trace!("skipping row with fewer than two cells");
            continue;
        };
        into.insert(clean_text(first), clean_text(second));
    }
}

/// Walk `h2`, `h4` and `table` elements in document order and group every
/// table under the most recently opened heading.
///
/// Tables that appear before any heading have no owner and are dropped.
/// Sections whose tables turn out empty are kept; see [`non_empty`].
pub fn extract_sections(html: &str) -> Vec<Section> {
    let document = Html::parse_document(html);
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<usize> = None;

    for el in document.select(&BLOCKS) {
        match el.value().name() {
            "h2" | "h4" => {
                let heading = clean_text(el);
                // a repeated heading reopens its section in place
                let idx = match sections.iter().position(|s| s.heading == heading) {
                    Some(idx) => {
                        sections[idx].table = Table::default();
                        idx
                    }
                    None => {
                        sections.push(Section {
                            heading,
                            table: Table::default(),
                        });
                        sections.len() - 1
                    }
                };
                current = Some(idx);
            }
            "table" => match current {
                Some(idx) => parse_table(el, &mut sections[idx].table),
                None => debug!("dropping table that precedes every heading"),
            },
            _ => {}
        }
    }

    debug!(sections = sections.len(), "extracted sections");
    sections
}

/// Keep only sections whose table has at least one non-empty value.
pub fn non_empty(sections: Vec<Section>) -> Vec<Section> {
    sections
        .into_iter()
        .filter(|s| s.table.has_values())
        .collect()
}
