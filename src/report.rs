use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::delimited::{self, DelimitedTable, ParseIssue, Record};
use crate::error::VetError;
use crate::gateway::DatasetGateway;

/// Parsed output of one vetting pass. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VettingReport {
    table: DelimitedTable,
    generated_at: DateTime<Utc>,
}

impl VettingReport {
    pub fn from_text(text: &str) -> Self {
        let table = delimited::parse(text);
        for issue in &table.issues {
            match issue {
                ParseIssue::UnterminatedQuote { row } => {
                    warn!(row, "vetting report ends inside a quoted cell")
                }
            }
        }
        Self {
            table,
            generated_at: Utc::now(),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.table.headers
    }

    pub fn rows(&self) -> &[Record] {
        &self.table.rows
    }

    pub fn issues(&self) -> &[ParseIssue] {
        &self.table.issues
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }

    /// The report as delimited text, readable back by [`delimited::parse`].
    pub fn to_delimited(&self) -> String {
        delimited::write(&self.table.headers, self.table.rows.iter().map(|row| row.values()))
    }

    /// Fixed-width text table. Line breaks inside cells are shown as `⏎`.
    pub fn render_text(&self) -> String {
        let headers = self.headers();
        if headers.is_empty() {
            return "(empty report)\n".to_string();
        }
        let cells: Vec<Vec<String>> = self
            .rows()
            .iter()
            .map(|row| row.values().map(flatten_cell).collect())
            .collect();

        let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        push_line(&mut out, headers.iter().map(|h| flatten_cell(h)), &widths);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        push_line(&mut out, rule.into_iter(), &widths);
        for row in cells {
            push_line(&mut out, row.into_iter(), &widths);
        }
        out
    }
}

fn flatten_cell(cell: &str) -> String {
    cell.replace("\r\n", "⏎").replace('\n', "⏎")
}

fn push_line(out: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| {
            let pad = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(pad))
        })
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

pub struct VettingReportBuilder<'a, G: DatasetGateway + ?Sized> {
    gateway: &'a G,
}

impl<'a, G: DatasetGateway + ?Sized> VettingReportBuilder<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    /// Runs the server-side vetting pass. Malformed text still yields a
    /// report; only gateway failures are errors.
    pub fn build(&self) -> Result<VettingReport, VetError> {
        let text = self.gateway.fetch_vetting_report()?;
        Ok(VettingReport::from_text(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_aligns_columns() {
        let report = VettingReport::from_text("id,disposition\nKIC-1,CANDIDATE\nK2,FP\n");
        assert_eq!(
            report.render_text(),
            "id     disposition\n-----  -----------\nKIC-1  CANDIDATE\nK2     FP\n"
        );
    }

    #[test]
    fn render_flattens_line_breaks() {
        let report = VettingReport::from_text("id,note\nK1,\"a\nb\"\n");
        assert!(report.render_text().contains("a⏎b"));
    }

    #[test]
    fn delimited_export_reads_back() {
        let report = VettingReport::from_text("id,note\nK1,\"x, y\"\nK2,\"say \"\"hi\"\"\"\n");
        let again = VettingReport::from_text(&report.to_delimited());
        assert_eq!(again.headers(), report.headers());
        assert_eq!(again.rows(), report.rows());
    }
}
