use std::collections::HashMap;
use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::TempPath;

use crate::domain::Identifier;
use crate::error::VetError;

pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ImageSource {
    DataUri(String),
    Url(String),
}

impl ImageSource {
    /// Wraps bare base64 as a PNG data URI; values that already carry a
    /// `data:` scheme are kept as sent.
    pub fn from_inline(image: &str) -> Self {
        if image.starts_with("data:") {
            ImageSource::DataUri(image.to_string())
        } else {
            ImageSource::DataUri(format!("data:image/png;base64,{image}"))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageSource::DataUri(value) | ImageSource::Url(value) => value,
        }
    }

    fn decode(&self) -> Result<Option<Vec<u8>>, VetError> {
        let ImageSource::DataUri(uri) = self else {
            return Ok(None);
        };
        let (header, payload) = uri
            .split_once(',')
            .ok_or_else(|| VetError::Parse("data URI without payload".to_string()))?;
        if !header.ends_with(";base64") {
            return Ok(Some(payload.as_bytes().to_vec()));
        }
        STANDARD
            .decode(payload.trim())
            .map(Some)
            .map_err(|err| VetError::Parse(format!("image payload: {err}")))
    }
}

/// Image bytes held in a private temp file. The file is removed when the
/// value is dropped or [`LocalImage::revoke`] is called.
#[derive(Debug)]
pub struct LocalImage {
    path: TempPath,
    content_type: Option<String>,
}

impl LocalImage {
    pub fn from_bytes(bytes: &[u8], content_type: Option<String>) -> Result<Self, VetError> {
        let suffix = match content_type.as_deref() {
            Some(ct) if ct.contains("jpeg") => ".jpg",
            Some(ct) if ct.contains("svg") => ".svg",
            _ => ".png",
        };
        let file = tempfile::Builder::new()
            .prefix("exovet-lightcurve")
            .suffix(suffix)
            .tempfile()
            .map_err(|err| VetError::Filesystem(err.to_string()))?;
        fs::write(file.path(), bytes).map_err(|err| VetError::Filesystem(err.to_string()))?;
        Ok(Self {
            path: file.into_temp_path(),
            content_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn revoke(self) -> Result<(), VetError> {
        self.path
            .close()
            .map_err(|err| VetError::Filesystem(err.to_string()))
    }
}

/// What the detail endpoint returned, after the gateway picked an encoding.
#[derive(Debug)]
pub enum DetailPayload {
    Structured {
        image: ImageSource,
        metadata: Metadata,
    },
    Binary {
        reference: LocalImage,
        metadata: Metadata,
    },
}

impl DetailPayload {
    pub fn metadata(&self) -> &Metadata {
        match self {
            DetailPayload::Structured { metadata, .. } | DetailPayload::Binary { metadata, .. } => {
                metadata
            }
        }
    }

    /// A string a viewer can open: a data URI, a remote URL, or a local path.
    pub fn image_reference(&self) -> String {
        match self {
            DetailPayload::Structured { image, .. } => image.as_str().to_string(),
            DetailPayload::Binary { reference, .. } => reference.path().display().to_string(),
        }
    }

    /// Raw image bytes when they are held locally. Remote URLs yield `None`.
    pub fn image_bytes(&self) -> Result<Option<Vec<u8>>, VetError> {
        match self {
            DetailPayload::Structured { image, .. } => image.decode(),
            DetailPayload::Binary { reference, .. } => fs::read(reference.path())
                .map(Some)
                .map_err(|err| VetError::Filesystem(err.to_string())),
        }
    }
}

#[derive(Debug)]
pub struct DetailEntry {
    pub id: Identifier,
    pub payload: DetailPayload,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailTicket {
    generation: u64,
    seq: u64,
    id: Identifier,
}

impl DetailTicket {
    pub fn id(&self) -> &Identifier {
        &self.id
    }
}

#[derive(Debug)]
pub enum DetailRequest<'a> {
    Cached(&'a DetailEntry),
    Fetch(DetailTicket),
}

#[derive(Debug)]
pub enum Resolution {
    Applied,
    Failed(VetError),
    /// The result belongs to a superseded selection or an older catalog.
    Discarded,
}

/// Lazily filled per-identifier details for one catalog generation, with at
/// most one fetch whose result will be accepted.
#[derive(Debug, Default)]
pub struct DetailCache {
    generation: u64,
    issued: u64,
    entries: HashMap<Identifier, DetailEntry>,
    in_flight: Option<DetailTicket>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry and invalidates outstanding tickets.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.entries.clear();
        self.in_flight = None;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: &Identifier) -> Option<&DetailEntry> {
        self.entries.get(id)
    }

    pub fn in_flight(&self) -> Option<&Identifier> {
        self.in_flight.as_ref().map(|ticket| &ticket.id)
    }

    /// Supersedes any outstanding fetch, including an earlier one for the
    /// same identifier. Cached identifiers are served directly; others get a
    /// ticket for a new fetch.
    pub fn request(&mut self, id: &Identifier) -> DetailRequest<'_> {
        if self.entries.contains_key(id) {
            self.in_flight = None;
            return DetailRequest::Cached(&self.entries[id]);
        }
        self.issued += 1;
        let ticket = DetailTicket {
            generation: self.generation,
            seq: self.issued,
            id: id.clone(),
        };
        self.in_flight = Some(ticket.clone());
        DetailRequest::Fetch(ticket)
    }

    pub fn resolve(
        &mut self,
        ticket: DetailTicket,
        result: Result<DetailPayload, VetError>,
    ) -> Resolution {
        if self.in_flight.as_ref() != Some(&ticket) {
            return Resolution::Discarded;
        }
        self.in_flight = None;
        match result {
            Ok(payload) => {
                self.entries
                    .entry(ticket.id.clone())
                    .or_insert_with(|| DetailEntry {
                        id: ticket.id,
                        payload,
                        fetched_at: Utc::now(),
                    });
                Resolution::Applied
            }
            Err(err) => {
                self.entries.remove(&ticket.id);
                Resolution::Failed(err)
            }
        }
    }
}
