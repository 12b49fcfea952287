use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

use crate::chat::{ChatMessage, Role};
use crate::detail::{DetailEntry, Metadata};
use crate::domain::{Identifier, UploadKind};
use crate::report::VettingReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Serialize)]
pub struct UploadOutput {
    pub file: String,
    pub kind: UploadKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<Identifier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct DetailOutput<'a> {
    pub id: &'a Identifier,
    pub image: String,
    pub metadata: &'a Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<String>,
}

impl<'a> DetailOutput<'a> {
    pub fn new(entry: &'a DetailEntry, saved_to: Option<String>) -> Self {
        let image = entry.payload.image_reference();
        Self {
            id: &entry.id,
            // Inline images are reduced to their header.
            image: match image.split_once(',') {
                Some((head, _)) if image.starts_with("data:") => format!("{head},…"),
                _ => image,
            },
            metadata: entry.payload.metadata(),
            saved_to,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub fn print_report(report: &VettingReport, format: ReportFormat) -> io::Result<()> {
    match format {
        ReportFormat::Json => JsonOutput::print(report),
        ReportFormat::Csv => io::stdout().write_all(report.to_delimited().as_bytes()),
        ReportFormat::Text => {
            let mut stdout = io::stdout();
            stdout.write_all(report.render_text().as_bytes())?;
            if !report.issues().is_empty() {
                writeln!(stdout, "({} parse issue(s), see log)", report.issues().len())?;
            }
            Ok(())
        }
    }
}

pub fn format_chat_line(message: &ChatMessage) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant if message.failed => "assistant (error)",
        Role::Assistant => "assistant",
    };
    format!(
        "[{}] {speaker}: {}",
        message.timestamp.format("%H:%M:%S"),
        message.content
    )
}
