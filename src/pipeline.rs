//! Stage sequencing for upload → catalog → detail / vetting.
//!
//! Gateway calls run on worker threads and report back over a channel. All
//! state lives on the thread that owns the controller and changes only inside
//! [`PipelineController::wait_event`] / [`PipelineController::drain_events`],
//! so a late result is checked against the state at the moment it is applied.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::archive::inspect_archive;
use crate::catalog::IdentifierCatalog;
use crate::detail::{
    DetailCache, DetailEntry, DetailPayload, DetailRequest, DetailTicket, Resolution,
};
use crate::domain::{DatasetFile, Identifier, UploadJob, UploadKind, UploadStatus};
use crate::error::VetError;
use crate::gateway::{AnalysisSummary, DatasetGateway, UploadAck};
use crate::notify::{Notice, Notifier};
use crate::report::{VettingReport, VettingReportBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Uploading,
    CatalogReady,
    DetailLoading,
    Vetting,
    ReportReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    Ignored(&'static str),
}

#[derive(Debug)]
pub enum Selection<'a> {
    Cached(&'a DetailEntry),
    Fetching,
}

enum UploadResult {
    Single(Result<UploadAck, VetError>),
    Archive(Result<Vec<Identifier>, VetError>),
    Dataset(Result<AnalysisSummary, VetError>),
}

enum PipelineEvent {
    Upload { job: u64, result: UploadResult },
    Detail {
        ticket: DetailTicket,
        result: Result<DetailPayload, VetError>,
    },
    Vet {
        generation: u64,
        result: Result<VettingReport, VetError>,
    },
}

pub struct PipelineController<G: DatasetGateway + 'static, N: Notifier> {
    gateway: Arc<G>,
    notifier: N,
    tx: Sender<PipelineEvent>,
    rx: Receiver<PipelineEvent>,
    upload: Option<UploadJob>,
    upload_seq: u64,
    catalog: IdentifierCatalog,
    details: DetailCache,
    vetting: bool,
    report: Option<VettingReport>,
    last_ack: Option<UploadAck>,
    last_analysis: Option<AnalysisSummary>,
    last_error: Option<VetError>,
}

impl<G: DatasetGateway + 'static, N: Notifier> PipelineController<G, N> {
    pub fn new(gateway: Arc<G>, notifier: N) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            gateway,
            notifier,
            tx,
            rx,
            upload: None,
            upload_seq: 0,
            catalog: IdentifierCatalog::default(),
            details: DetailCache::new(),
            vetting: false,
            report: None,
            last_ack: None,
            last_analysis: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        if self.is_uploading() {
            PipelineState::Uploading
        } else if self.vetting {
            PipelineState::Vetting
        } else if self.details.in_flight().is_some() {
            PipelineState::DetailLoading
        } else if self.catalog.is_empty() {
            PipelineState::Idle
        } else if self.report.is_some() {
            PipelineState::ReportReady
        } else {
            PipelineState::CatalogReady
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.upload.as_ref().is_some_and(UploadJob::is_in_flight)
    }

    pub fn is_vetting(&self) -> bool {
        self.vetting
    }

    pub fn is_busy(&self) -> bool {
        self.is_uploading() || self.vetting || self.details.in_flight().is_some()
    }

    pub fn catalog(&self) -> &IdentifierCatalog {
        &self.catalog
    }

    pub fn upload(&self) -> Option<&UploadJob> {
        self.upload.as_ref()
    }

    pub fn report(&self) -> Option<&VettingReport> {
        self.report.as_ref()
    }

    pub fn last_ack(&self) -> Option<&UploadAck> {
        self.last_ack.as_ref()
    }

    pub fn last_analysis(&self) -> Option<&AnalysisSummary> {
        self.last_analysis.as_ref()
    }

    pub fn last_error(&self) -> Option<&VetError> {
        self.last_error.as_ref()
    }

    pub fn loading_detail(&self) -> Option<&Identifier> {
        self.details.in_flight()
    }

    pub fn detail(&self, id: &Identifier) -> Option<&DetailEntry> {
        self.details.get(id)
    }

    /// Detail of the selected identifier, once it has arrived.
    pub fn current_detail(&self) -> Option<&DetailEntry> {
        self.catalog.selected().and_then(|id| self.details.get(id))
    }

    /// Starts an upload. Archives are opened locally first; a broken one is
    /// returned as an error without touching pipeline state.
    pub fn submit(&mut self, file: DatasetFile) -> Result<Dispatch, VetError> {
        if self.is_uploading() {
            return Ok(Dispatch::Ignored("an upload is already in flight"));
        }
        if file.kind() == UploadKind::Archive {
            let summary = inspect_archive(file.path())?;
            debug!(
                entries = summary.entries,
                light_curves = summary.light_curves,
                "archive inspected"
            );
        }

        self.upload_seq += 1;
        let job = self.upload_seq;
        self.upload = Some(UploadJob::start(&file));
        self.last_error = None;
        debug!(file = file.file_name(), kind = %file.kind(), "state=Uploading");

        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = match file.kind() {
                UploadKind::Single => UploadResult::Single(gateway.submit_single(&file)),
                UploadKind::Archive => UploadResult::Archive(gateway.submit_archive(&file)),
                UploadKind::Dataset => UploadResult::Dataset(gateway.analyze_dataset(&file)),
            };
            let _ = tx.send(PipelineEvent::Upload { job, result });
        });
        Ok(Dispatch::Started)
    }

    /// Selects an identifier of the current catalog. Any outstanding detail
    /// fetch is superseded; its result will be dropped on arrival. Refused
    /// while an upload is replacing the catalog.
    pub fn select(&mut self, id: &Identifier) -> Result<Selection<'_>, VetError> {
        if self.is_uploading() {
            return Err(VetError::UploadInFlight);
        }
        self.catalog.select(id)?;
        match self.details.request(id) {
            DetailRequest::Cached(entry) => Ok(Selection::Cached(entry)),
            DetailRequest::Fetch(ticket) => {
                debug!(id = %id, "state=DetailLoading");
                let gateway = Arc::clone(&self.gateway);
                let tx = self.tx.clone();
                thread::spawn(move || {
                    let result = gateway.fetch_detail(ticket.id());
                    let _ = tx.send(PipelineEvent::Detail { ticket, result });
                });
                Ok(Selection::Fetching)
            }
        }
    }

    /// Asks the backend to vet its active dataset. Independent of detail
    /// fetches.
    pub fn request_vet(&mut self) -> Dispatch {
        if self.is_uploading() {
            return Dispatch::Ignored("an upload is in flight");
        }
        if self.vetting {
            return Dispatch::Ignored("vetting is already running");
        }
        if self.catalog.is_empty() {
            return Dispatch::Ignored("no catalog to vet");
        }

        self.vetting = true;
        self.last_error = None;
        debug!("state=Vetting");
        let generation = self.details.generation();
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = VettingReportBuilder::new(gateway.as_ref()).build();
            let _ = tx.send(PipelineEvent::Vet { generation, result });
        });
        Dispatch::Started
    }

    /// Forgets the catalog, details, report and any upload in flight.
    pub fn reset(&mut self) {
        self.upload = None;
        self.drop_catalog();
        self.last_error = None;
    }

    /// Applies at most one finished operation. Returns whether one arrived.
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.apply(event);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Applies everything that has finished so far without blocking.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Upload { job, result } => self.finish_upload(job, result),
            PipelineEvent::Detail { ticket, result } => {
                let id = ticket.id().clone();
                match self.details.resolve(ticket, result) {
                    Resolution::Applied => debug!(id = %id, "detail ready"),
                    Resolution::Failed(err) => self.fail("Fetch failed", err),
                    Resolution::Discarded => debug!(id = %id, "discarding superseded detail"),
                }
            }
            PipelineEvent::Vet { generation, result } => {
                if generation != self.details.generation() {
                    debug!("discarding vetting result for a replaced catalog");
                    return;
                }
                self.vetting = false;
                match result {
                    Ok(report) => {
                        self.notifier.notify(Notice::info(
                            "Vetting complete",
                            format!("{} rows", report.rows().len()),
                        ));
                        self.report = Some(report);
                    }
                    Err(err) => self.fail("Vetting failed", err),
                }
            }
        }
    }

    fn finish_upload(&mut self, job: u64, result: UploadResult) {
        if job != self.upload_seq || !self.is_uploading() {
            debug!(job, "discarding result of an abandoned upload");
            return;
        }
        let file_name = self
            .upload
            .as_ref()
            .map(|upload| upload.file_name.clone())
            .unwrap_or_default();

        let outcome = match result {
            UploadResult::Archive(Ok(ids)) if ids.is_empty() => {
                self.drop_catalog();
                Err(("No IDs returned", VetError::NoIdentifiers))
            }
            UploadResult::Archive(Ok(ids)) => {
                self.drop_catalog();
                self.catalog = IdentifierCatalog::new(ids);
                Ok(Notice::info(
                    "Upload complete",
                    format!("Received {} IDs.", self.catalog.len()),
                ))
            }
            UploadResult::Archive(Err(err)) => {
                self.drop_catalog();
                Err(("Upload failed", err))
            }
            UploadResult::Single(Ok(ack)) => {
                self.last_ack = Some(ack);
                Ok(Notice::info("Upload complete", format!("{file_name} uploaded")))
            }
            UploadResult::Dataset(Ok(summary)) => {
                self.last_analysis = Some(summary);
                Ok(Notice::info("Analysis complete", "Dataset analyzed successfully"))
            }
            UploadResult::Single(Err(err)) | UploadResult::Dataset(Err(err)) => {
                Err(("Upload failed", err))
            }
        };

        match outcome {
            Ok(notice) => {
                self.set_upload_status(UploadStatus::Succeeded);
                self.notifier.notify(notice);
            }
            Err((title, err)) => {
                self.set_upload_status(UploadStatus::Failed);
                self.fail(title, err);
            }
        }
    }

    /// An archive upload always replaces the catalog, even when it fails,
    /// so nothing from the previous dataset outlives it.
    fn drop_catalog(&mut self) {
        self.catalog.clear();
        self.details.reset();
        self.vetting = false;
        self.report = None;
    }

    fn set_upload_status(&mut self, status: UploadStatus) {
        if let Some(upload) = self.upload.as_mut() {
            upload.status = status;
        }
    }

    fn fail(&mut self, title: &str, err: VetError) {
        debug!(error = %err, "state=Error");
        self.notifier.notify(Notice::failure(title, &err));
        self.last_error = Some(err);
    }
}
