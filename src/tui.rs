use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Row, Table, Wrap};
use tracing::debug;

use crate::domain::DatasetFile;
use crate::error::VetError;
use crate::gateway::DatasetGateway;
use crate::notify::{Notice, NoticeBoard, NoticeLevel};
use crate::pipeline::{Dispatch, PipelineController, PipelineState};

const FRAME: Duration = Duration::from_millis(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Catalog,
    Report,
    Help,
}

/// Full-screen browser over one uploaded archive.
pub struct Browser<G: DatasetGateway + 'static> {
    controller: PipelineController<G, Arc<NoticeBoard>>,
    board: Arc<NoticeBoard>,
    archive: DatasetFile,
    cursor: usize,
    view: View,
    status: Option<Notice>,
    tick: usize,
}

impl<G: DatasetGateway + 'static> Browser<G> {
    pub fn new(gateway: Arc<G>, archive: DatasetFile) -> Self {
        let board = Arc::new(NoticeBoard::new());
        Self {
            controller: PipelineController::new(gateway, Arc::clone(&board)),
            board,
            archive,
            cursor: 0,
            view: View::Catalog,
            status: None,
            tick: 0,
        }
    }

    /// Uploads the archive and runs until the user quits.
    pub fn run(mut self) -> miette::Result<()> {
        self.upload()?;

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let result = self.event_loop();

        disable_raw_mode().into_diagnostic()?;
        io::stdout()
            .execute(LeaveAlternateScreen)
            .into_diagnostic()?;
        result
    }

    fn event_loop(&mut self) -> miette::Result<()> {
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        loop {
            self.refresh();
            terminal.draw(|frame| self.draw(frame)).into_diagnostic()?;

            if event::poll(FRAME).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && self.handle_key(key)
            {
                return Ok(());
            }
            self.tick = self.tick.wrapping_add(1);
        }
    }

    fn refresh(&mut self) {
        self.controller.drain_events();
        if let Some(notice) = self.board.take().pop() {
            self.status = Some(notice);
        }
        let ids = self.controller.catalog().len();
        if ids > 0 && self.cursor >= ids {
            self.cursor = ids - 1;
        }
    }

    /// (Re)submits the archive. A fresh upload replaces the catalog.
    fn upload(&mut self) -> Result<(), VetError> {
        if let Dispatch::Ignored(reason) = self.controller.submit(self.archive.clone())? {
            debug!(reason, "upload request ignored");
        }
        Ok(())
    }

    /// Returns true when the browser should exit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc if self.view == View::Catalog => return true,
            KeyCode::Char('q') | KeyCode::Esc => self.view = View::Catalog,
            KeyCode::Char('?') => self.view = View::Help,
            KeyCode::Char('r') => {
                self.view = if self.view == View::Report {
                    View::Catalog
                } else {
                    View::Report
                }
            }
            KeyCode::Char('u') => {
                if let Err(err) = self.upload() {
                    self.status = Some(Notice::failure("Upload failed", &err));
                }
            }
            KeyCode::Char('v') => {
                if let Dispatch::Ignored(reason) = self.controller.request_vet() {
                    debug!(reason, "vet request ignored");
                }
            }
            KeyCode::Up | KeyCode::Char('k') => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => self.cursor = self.cursor.saturating_add(1),
            KeyCode::Enter => {
                let target = self.controller.catalog().ids().get(self.cursor).cloned();
                if let Some(id) = target
                    && let Err(err) = self.controller.select(&id)
                {
                    self.status = Some(Notice::failure("Selection failed", &err));
                }
            }
            _ => {}
        }
        false
    }

    fn draw(&self, frame: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(6),
                Constraint::Length(2),
            ])
            .split(frame.area());

        frame.render_widget(self.header(), chunks[0]);
        match self.view {
            View::Catalog => self.draw_catalog(frame, chunks[1]),
            View::Report => self.draw_report(frame, chunks[1]),
            View::Help => frame.render_widget(help(), chunks[1]),
        }
        frame.render_widget(self.status_line(), chunks[2]);
    }

    fn header(&self) -> Paragraph<'static> {
        let state = self.controller.state();
        let busy = if self.controller.is_busy() {
            const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];
            SPINNER[self.tick % SPINNER.len()]
        } else {
            " "
        };
        Paragraph::new(Line::from(vec![
            Span::styled(
                "exovet ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{busy} ")),
            Span::styled(state_label(state), Style::default().fg(state_color(state))),
            Span::styled(
                format!("   {} IDs", self.controller.catalog().len()),
                Style::default().fg(Color::Gray),
            ),
        ]))
    }

    fn draw_catalog(&self, frame: &mut ratatui::Frame, area: Rect) {
        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(area);

        let catalog = self.controller.catalog();
        let items: Vec<ListItem> = catalog
            .ids()
            .iter()
            .map(|id| {
                let marker = if catalog.selected() == Some(id) { "● " } else { "  " };
                ListItem::new(format!("{marker}{id}"))
            })
            .collect();
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Identifiers"))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        let mut state =
            ListState::default().with_selected((!catalog.is_empty()).then_some(self.cursor));
        frame.render_stateful_widget(list, panes[0], &mut state);

        frame.render_widget(self.detail_pane(), panes[1]);
    }

    fn detail_pane(&self) -> Paragraph<'static> {
        let block = Block::default().borders(Borders::ALL).title("Detail");
        let Some(selected) = self.controller.catalog().selected() else {
            return Paragraph::new("Select an identifier with Enter.").block(block);
        };
        if self.controller.loading_detail() == Some(selected) {
            return Paragraph::new(format!("Loading {selected}…")).block(block);
        }
        let Some(entry) = self.controller.current_detail() else {
            return Paragraph::new(format!("No detail for {selected}.")).block(block);
        };

        let mut lines = vec![
            Line::from(Span::styled(
                entry.id.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(vec![
                Span::styled("Image: ", Style::default().fg(Color::Gray)),
                Span::raw(shorten(&entry.payload.image_reference(), 72)),
            ]),
            Line::from(""),
        ];
        let metadata = entry.payload.metadata();
        if metadata.is_empty() {
            lines.push(Line::from(Span::styled(
                "(no metadata)",
                Style::default().fg(Color::Gray),
            )));
        }
        for (key, value) in metadata {
            let value = match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            lines.push(Line::from(vec![
                Span::styled(format!("{key}: "), Style::default().fg(Color::Gray)),
                Span::raw(value),
            ]));
        }
        Paragraph::new(lines).block(block).wrap(Wrap { trim: true })
    }

    fn draw_report(&self, frame: &mut ratatui::Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Vetting report");
        let Some(report) = self.controller.report() else {
            let text = if self.controller.is_vetting() {
                "Vetting in progress…"
            } else {
                "No report yet. Press v to run vetting."
            };
            frame.render_widget(Paragraph::new(text).block(block), area);
            return;
        };

        let headers = report.headers();
        let widths: Vec<Constraint> = headers
            .iter()
            .map(|_| Constraint::Ratio(1, headers.len().max(1) as u32))
            .collect();
        let rows = report
            .rows()
            .iter()
            .map(|record| Row::new(record.values().map(|cell| cell.replace('\n', " ⏎ "))));
        let table = Table::new(rows, widths)
            .header(
                Row::new(headers.iter().cloned())
                    .style(Style::default().add_modifier(Modifier::BOLD)),
            )
            .block(block);
        frame.render_widget(table, area);
    }

    fn status_line(&self) -> Paragraph<'static> {
        let mut lines = Vec::new();
        match &self.status {
            Some(notice) => {
                let color = match notice.level {
                    NoticeLevel::Info => Color::Green,
                    NoticeLevel::Error => Color::Red,
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("{}: ", notice.title), Style::default().fg(color)),
                    Span::raw(notice.message.clone()),
                ]));
            }
            None => lines.push(Line::from("")),
        }
        lines.push(Line::from(Span::styled(
            "↑/↓ move  Enter open  u re-upload  v vet  r report  ? help  q quit",
            Style::default().fg(Color::Gray),
        )));
        Paragraph::new(lines)
    }
}

fn help() -> Paragraph<'static> {
    let lines = vec![
        Line::from("Enter   fetch the highlighted identifier's light curve"),
        Line::from("u       upload the archive again (replaces the catalog)"),
        Line::from("v       run vetting over the uploaded dataset"),
        Line::from("r       toggle the vetting report"),
        Line::from("q, Esc  back / quit"),
    ];
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"))
}

fn state_label(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Idle => "idle",
        PipelineState::Uploading => "uploading",
        PipelineState::CatalogReady => "ready",
        PipelineState::DetailLoading => "loading detail",
        PipelineState::Vetting => "vetting",
        PipelineState::ReportReady => "report ready",
    }
}

fn state_color(state: PipelineState) -> Color {
    match state {
        PipelineState::Idle => Color::Gray,
        PipelineState::CatalogReady | PipelineState::ReportReady => Color::Green,
        _ => Color::Yellow,
    }
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use camino::Utf8PathBuf;
    use crossterm::event::KeyModifiers;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::detail::DetailPayload;
    use crate::domain::{Identifier, UploadKind};
    use crate::gateway::{AnalysisSummary, UploadAck};

    const WAIT: Duration = Duration::from_secs(5);

    /// Rejects the first archive upload, accepts every later one.
    #[derive(Default)]
    struct FlakyGateway {
        attempts: AtomicUsize,
    }

    impl DatasetGateway for FlakyGateway {
        fn submit_single(&self, _file: &DatasetFile) -> Result<UploadAck, VetError> {
            Err(VetError::Network("unused".to_string()))
        }

        fn submit_archive(&self, _file: &DatasetFile) -> Result<Vec<Identifier>, VetError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(VetError::Transport {
                    status: 503,
                    message: "storage is full".to_string(),
                });
            }
            Ok(vec!["KIC-1".parse()?, "KIC-2".parse()?])
        }

        fn analyze_dataset(&self, _file: &DatasetFile) -> Result<AnalysisSummary, VetError> {
            Err(VetError::Network("unused".to_string()))
        }

        fn fetch_detail(&self, _id: &Identifier) -> Result<DetailPayload, VetError> {
            Err(VetError::Network("unused".to_string()))
        }

        fn fetch_vetting_report(&self) -> Result<String, VetError> {
            Err(VetError::Network("unused".to_string()))
        }
    }

    fn press(browser: &mut Browser<FlakyGateway>, code: KeyCode) -> bool {
        browser.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn failed_upload_can_be_retried_from_the_browser() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("batch.zip")).unwrap();
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path.as_std_path()).unwrap());
        writer
            .start_file("kplr001.fits", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"SIMPLE  =  T").unwrap();
        writer.finish().unwrap();
        let archive = DatasetFile::open(path, UploadKind::Archive, 1024).unwrap();

        let mut browser = Browser::new(Arc::new(FlakyGateway::default()), archive);
        browser.upload().unwrap();
        assert!(browser.controller.wait_event(WAIT));
        browser.refresh();
        assert_eq!(browser.controller.state(), PipelineState::Idle);
        assert_eq!(browser.status.as_ref().unwrap().title, "Upload failed");

        assert!(!press(&mut browser, KeyCode::Char('u')));
        assert!(browser.controller.is_uploading());
        assert!(browser.controller.wait_event(WAIT));
        browser.refresh();

        assert_eq!(browser.controller.state(), PipelineState::CatalogReady);
        assert_eq!(browser.controller.catalog().len(), 2);
        assert_eq!(browser.status.as_ref().unwrap().title, "Upload complete");
    }

    #[test]
    fn shorten_keeps_short_text() {
        assert_eq!(shorten("KIC-1", 10), "KIC-1");
        assert_eq!(shorten("data:image/png;base64,AAAA", 8), "data:im…");
    }
}
