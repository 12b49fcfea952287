//! Comma-delimited text with double-quote escaping.
//!
//! The reader is a two-state automaton (`Normal`, `Quoted`) run once over the
//! whole input, so quoted line feeds never split a row and quoted commas never
//! split a cell. It never fails: an unterminated quote swallows the rest of
//! the input into the current cell and is recorded as a [`ParseIssue`].

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Quoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ParseIssue {
    /// Input ended inside a quoted cell. `row` is the zero-based index of the
    /// raw row (the header row is 0).
    UnterminatedQuote { row: usize },
}

/// One data row keyed by header, in header order. Always holds exactly one
/// value per header, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Value of the first column named `header`.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelimitedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ParseIssue>,
}

pub fn parse(text: &str) -> DelimitedTable {
    let (raw_rows, issues) = split_rows(text);
    let mut raw_rows = raw_rows.into_iter();
    let headers = raw_rows.next().unwrap_or_default();

    let rows = raw_rows
        .map(|cells| {
            let mut cells = cells.into_iter();
            let fields = headers
                .iter()
                .map(|header| (header.clone(), cells.next().unwrap_or_default()))
                .collect();
            Record { fields }
        })
        .collect();

    DelimitedTable {
        headers,
        rows,
        issues,
    }
}

fn split_rows(text: &str) -> (Vec<Vec<String>>, Vec<ParseIssue>) {
    let mut rows = Vec::new();
    let mut cells = Vec::new();
    let mut field = String::new();
    let mut state = State::Normal;
    // Set once the current row has consumed anything, so `""` alone on a
    // line still counts as a row while an empty line does not.
    let mut row_started = false;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match state {
            State::Quoted => {
                if ch == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        state = State::Normal;
                    }
                } else {
                    field.push(ch);
                }
            }
            State::Normal => match ch {
                '"' => {
                    state = State::Quoted;
                    row_started = true;
                }
                ',' => {
                    cells.push(std::mem::take(&mut field));
                    row_started = true;
                }
                '\r' if chars.peek() == Some(&'\n') => {}
                '\n' => {
                    if row_started {
                        cells.push(std::mem::take(&mut field));
                        rows.push(std::mem::take(&mut cells));
                    }
                    row_started = false;
                }
                other => {
                    field.push(other);
                    row_started = true;
                }
            },
        }
    }

    let mut issues = Vec::new();
    if state == State::Quoted {
        issues.push(ParseIssue::UnterminatedQuote { row: rows.len() });
    }
    if row_started {
        cells.push(field);
        rows.push(cells);
    }
    (rows, issues)
}

/// Serializes a table so that [`parse`] reads it back unchanged. Cells are
/// quoted only when they contain a delimiter, a quote, or a line break.
pub fn write<H, R, C>(headers: &[H], rows: R) -> String
where
    H: AsRef<str>,
    R: IntoIterator<Item = C>,
    C: IntoIterator,
    C::Item: AsRef<str>,
{
    let mut out = String::new();
    if headers.is_empty() {
        return out;
    }
    write_line(&mut out, headers.iter().map(|h| h.as_ref()));
    for row in rows {
        let cells: Vec<C::Item> = row.into_iter().collect();
        write_line(&mut out, cells.iter().map(|c| c.as_ref()));
    }
    out
}

fn write_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let mut first = true;
    let mut wrote_any = false;
    for cell in cells {
        if !first {
            out.push(',');
        }
        first = false;
        wrote_any = true;
        if cell.is_empty() || cell.contains([',', '"', '\n', '\r']) {
            // Empty cells are quoted so a single-column empty row survives.
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    if !wrote_any {
        out.push_str("\"\"");
    }
    out.push('\n');
}
