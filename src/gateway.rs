use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ResolvedConfig;
use crate::detail::{DetailPayload, ImageSource, LocalImage, Metadata};
use crate::domain::{DatasetFile, Identifier};
use crate::error::VetError;

pub const METADATA_HEADER: &str = "x-lightcurve-metadata";

#[derive(Debug, Clone, Serialize)]
pub struct UploadAck {
    pub file_name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub file_name: String,
    pub analysis: Value,
}

/// The backend's dataset endpoints. This is the only network boundary of
/// the pipeline.
pub trait DatasetGateway: Send + Sync {
    fn submit_single(&self, file: &DatasetFile) -> Result<UploadAck, VetError>;
    /// Identifiers found in the archive. An empty list is a valid answer.
    fn submit_archive(&self, file: &DatasetFile) -> Result<Vec<Identifier>, VetError>;
    fn analyze_dataset(&self, file: &DatasetFile) -> Result<AnalysisSummary, VetError>;
    fn fetch_detail(&self, id: &Identifier) -> Result<DetailPayload, VetError>;
    /// Raw delimited text for whatever dataset the backend considers active.
    fn fetch_vetting_report(&self) -> Result<String, VetError>;
}

#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(config: &ResolvedConfig) -> Result<Self, VetError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("exovet/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| VetError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| VetError::Network(err.to_string()))?;
        let base_url = Url::parse(&config.api_url)
            .map_err(|err| VetError::ConfigParse(format!("api_url {}: {err}", config.api_url)))?;
        Ok(Self {
            client,
            base_url,
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, VetError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| VetError::ConfigParse(format!("api_url {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, VetError> {
        let response = request.send().map_err(|err| self.map_error(err))?;
        handle_status(response)
    }

    fn map_error(&self, err: reqwest::Error) -> VetError {
        if err.is_timeout() {
            VetError::Timeout {
                after: self.timeout,
            }
        } else {
            VetError::Network(err.to_string())
        }
    }

    fn post_file(&self, path: &str, file: &DatasetFile) -> Result<Response, VetError> {
        let url = self.endpoint(&[path])?;
        let part = Part::reader_with_length(file.open_reader()?, file.size())
            .file_name(file.file_name().to_string());
        let form = Form::new().part("file", part);
        debug!(url = %url, file = file.file_name(), bytes = file.size(), "upload");
        self.send(self.client.post(url).multipart(form))
    }

    fn read_json(&self, response: Response) -> Result<Value, VetError> {
        let text = response.text().map_err(|err| self.map_error(err))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| VetError::Parse(err.to_string()))
    }

    fn fetch_structured(&self, id: &Identifier) -> Result<DetailPayload, VetError> {
        let url = self.endpoint(&["lightcurve", id.as_str()])?;
        debug!(url = %url, "detail (json)");
        let response = self.send(self.client.get(url).header(ACCEPT, "application/json"))?;
        let value = self.read_json(response)?;
        structured_payload(&value)
            .ok_or_else(|| VetError::Parse("detail JSON has neither image nor url".to_string()))
    }

    fn fetch_binary(&self, id: &Identifier) -> Result<DetailPayload, VetError> {
        let url = self.endpoint(&["lightcurve", id.as_str()])?;
        debug!(url = %url, "detail (binary)");
        let response = self.send(self.client.get(url))?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let metadata = metadata_from_header(
            response
                .headers()
                .get(METADATA_HEADER)
                .and_then(|value| value.to_str().ok()),
        );
        let bytes = response.bytes().map_err(|err| self.map_error(err))?;
        let reference = LocalImage::from_bytes(&bytes, content_type)?;
        Ok(DetailPayload::Binary {
            reference,
            metadata,
        })
    }
}

impl DatasetGateway for HttpGateway {
    fn submit_single(&self, file: &DatasetFile) -> Result<UploadAck, VetError> {
        let response = self.post_file("upload_fits", file)?;
        let text = response.text().map_err(|err| self.map_error(err))?;
        let response = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(UploadAck {
            file_name: file.file_name().to_string(),
            response,
        })
    }

    fn submit_archive(&self, file: &DatasetFile) -> Result<Vec<Identifier>, VetError> {
        let response = self.post_file("upload_zip", file)?;
        let value = self.read_json(response)?;
        normalize_ids(value)
    }

    fn analyze_dataset(&self, file: &DatasetFile) -> Result<AnalysisSummary, VetError> {
        let response = self.post_file("analyze", file)?;
        Ok(AnalysisSummary {
            file_name: file.file_name().to_string(),
            analysis: self.read_json(response)?,
        })
    }

    fn fetch_detail(&self, id: &Identifier) -> Result<DetailPayload, VetError> {
        match self.fetch_structured(id) {
            Ok(payload) => Ok(payload),
            Err(err) => {
                debug!(id = %id, error = %err, "structured detail unavailable, fetching binary");
                self.fetch_binary(id)
            }
        }
    }

    fn fetch_vetting_report(&self) -> Result<String, VetError> {
        let url = self.endpoint(&["vet_exoplanets"])?;
        debug!(url = %url, "vetting report");
        let response = self.send(self.client.get(url))?;
        response.text().map_err(|err| self.map_error(err))
    }
}

fn handle_status(response: Response) -> Result<Response, VetError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(VetError::Transport {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
    })
}

/// Human-readable message from a JSON error body, if it carries one.
pub fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["detail", "message", "error"]
        .iter()
        .filter_map(|key| value.get(key))
        .find_map(|field| field.as_str())
        .map(str::to_string)
}

/// Accepts `["A", "B"]` or `{"ids": ["A", "B"]}`. Numeric ids are kept as
/// their decimal text; blank or non-scalar entries are dropped.
pub fn normalize_ids(value: Value) -> Result<Vec<Identifier>, VetError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("ids") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(VetError::Parse(
                    "archive response object has no `ids` list".to_string(),
                ));
            }
        },
        other => {
            return Err(VetError::Parse(format!(
                "unexpected archive response: {other}"
            )));
        }
    };

    let ids = items
        .into_iter()
        .filter_map(|item| {
            let text = match item {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                other => {
                    warn!(entry = %other, "skipping non-scalar identifier");
                    return None;
                }
            };
            text.parse::<Identifier>().ok()
        })
        .collect();
    Ok(ids)
}

pub fn structured_payload(value: &Value) -> Option<DetailPayload> {
    let metadata = value.get("metadata").filter(|meta| !meta.is_null());

    if let (Some(image), Some(metadata)) = (value.get("image").and_then(Value::as_str), metadata) {
        return Some(DetailPayload::Structured {
            image: ImageSource::from_inline(image),
            metadata: as_metadata(metadata.clone()),
        });
    }

    let url = value.get("url").and_then(Value::as_str)?;
    Some(DetailPayload::Structured {
        image: ImageSource::Url(url.to_string()),
        metadata: metadata.cloned().map(as_metadata).unwrap_or_default(),
    })
}

pub fn metadata_from_header(raw: Option<&str>) -> Metadata {
    let Some(raw) = raw else {
        return Metadata::new();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Metadata::new();
            map.insert("info".to_string(), Value::String(raw.to_string()));
            map
        }
    }
}

fn as_metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Metadata::new();
            map.insert("info".to_string(), other);
            map
        }
    }
}
