use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::{Arc, LazyLock};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use regex::Regex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use exovet::archive::inspect_archive;
use exovet::chat::{Assistant, ChatSession, HttpAssistant};
use exovet::config::{ConfigLoader, ResolvedConfig};
use exovet::detail::DetailEntry;
use exovet::domain::{DatasetFile, Identifier, UploadKind};
use exovet::error::{ErrorKind, VetError};
use exovet::gateway::{DatasetGateway, HttpGateway};
use exovet::notify::{LogNotifier, Notice, Notifier};
use exovet::output::{self, DetailOutput, JsonOutput, ReportFormat, UploadOutput};
use exovet::report::VettingReportBuilder;
use exovet::tui::Browser;

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid pattern"));

#[derive(Parser)]
#[command(name = "exovet")]
#[command(about = "Upload light curves, inspect targets and vet exoplanet candidates")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./exovet.json, then the user config directory)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Backend base URL; overrides EXOVET_API_URL and the config file
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Upload a FITS file, a zip of light curves, or a CSV dataset")]
    Upload {
        file: Utf8PathBuf,
        /// Inferred from the extension when omitted
        #[arg(long)]
        kind: Option<UploadKind>,
    },
    #[command(about = "Show the light curve and metadata of one identifier")]
    Detail {
        id: String,
        /// Write the image to this file or directory
        #[arg(long)]
        save: Option<Utf8PathBuf>,
    },
    #[command(about = "Run vetting over the backend's active dataset")]
    Vet {
        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,
    },
    #[command(about = "Upload an archive and browse its identifiers interactively")]
    Browse { archive: Utf8PathBuf },
    #[command(about = "Ask the research assistant one question")]
    Ask { question: String },
    #[command(about = "Chat with the research assistant")]
    Chat,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<VetError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &VetError) -> u8 {
    match error.kind() {
        ErrorKind::Validation => 2,
        ErrorKind::Transport | ErrorKind::Timeout => 3,
        ErrorKind::Parse | ErrorKind::Local => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref(), cli.api_url.as_deref())?;

    match cli.command {
        Commands::Upload { file, kind } => run_upload(&config, &file, kind),
        Commands::Detail { id, save } => run_detail(&config, &id, save.as_deref()),
        Commands::Vet { format } => {
            let gateway = HttpGateway::new(&config)?;
            let report = VettingReportBuilder::new(&gateway).build()?;
            output::print_report(&report, format).into_diagnostic()
        }
        Commands::Browse { archive } => {
            let archive = DatasetFile::open(archive, UploadKind::Archive, config.max_dataset_bytes)?;
            let gateway = Arc::new(HttpGateway::new(&config)?);
            Browser::new(gateway, archive).run()
        }
        Commands::Ask { question } => {
            let question = question.trim();
            if question.is_empty() {
                return Err(VetError::EmptyQuestion.into());
            }
            let answer = HttpAssistant::new(&config.assistant)?.ask(question)?;
            println!("{answer}");
            Ok(())
        }
        Commands::Chat => run_chat(&config),
    }
}

fn run_upload(
    config: &ResolvedConfig,
    path: &Utf8Path,
    kind: Option<UploadKind>,
) -> miette::Result<()> {
    let kind = kind
        .or_else(|| UploadKind::infer(path))
        .unwrap_or(UploadKind::Single);
    let file = DatasetFile::open(path, kind, config.max_dataset_bytes)?;
    let gateway = HttpGateway::new(config)?;

    let output = match kind {
        UploadKind::Archive => {
            let summary = inspect_archive(file.path())?;
            info!(
                entries = summary.entries,
                light_curves = summary.light_curves,
                "uploading archive"
            );
            let ids = gateway.submit_archive(&file)?;
            if ids.is_empty() {
                return Err(VetError::NoIdentifiers.into());
            }
            UploadOutput {
                file: file.file_name().to_string(),
                kind,
                ids: Some(ids),
                response: None,
            }
        }
        UploadKind::Single => {
            let ack = gateway.submit_single(&file)?;
            UploadOutput {
                file: ack.file_name,
                kind,
                ids: None,
                response: Some(ack.response),
            }
        }
        UploadKind::Dataset => {
            let summary = gateway.analyze_dataset(&file)?;
            UploadOutput {
                file: summary.file_name,
                kind,
                ids: None,
                response: Some(summary.analysis),
            }
        }
    };
    JsonOutput::print(&output).into_diagnostic()
}

fn run_detail(config: &ResolvedConfig, id: &str, save: Option<&Utf8Path>) -> miette::Result<()> {
    let id: Identifier = id.parse()?;
    let gateway = HttpGateway::new(config)?;
    let entry = DetailEntry {
        payload: gateway.fetch_detail(&id)?,
        id,
        fetched_at: Utc::now(),
    };

    let saved_to = match save {
        Some(target) => Some(save_image(&entry, target)?),
        None => None,
    };
    JsonOutput::print(&DetailOutput::new(&entry, saved_to)).into_diagnostic()
}

fn save_image(entry: &DetailEntry, target: &Utf8Path) -> miette::Result<String> {
    let Some(bytes) = entry.payload.image_bytes()? else {
        return Err(miette::Report::msg(format!(
            "the image of {} is hosted remotely: {}",
            entry.id,
            entry.payload.image_reference()
        )));
    };
    let path = if target.is_dir() {
        let stem = UNSAFE_FILE_CHARS.replace_all(entry.id.as_str(), "_");
        target.join(format!("{stem}.png"))
    } else {
        target.to_path_buf()
    };
    std::fs::write(path.as_std_path(), &bytes)
        .map_err(|err| VetError::Filesystem(format!("{path}: {err}")))?;
    Ok(path.to_string())
}

fn run_chat(config: &ResolvedConfig) -> miette::Result<()> {
    let assistant = HttpAssistant::new(&config.assistant)?;
    let mut session = ChatSession::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    write!(stdout, "> ").into_diagnostic()?;
    stdout.flush().into_diagnostic()?;
    for line in stdin.lock().lines() {
        let line = line.into_diagnostic()?;
        let question = line.trim();
        if matches!(question, "exit" | "quit") {
            break;
        }
        if !question.is_empty() {
            let pending = session.begin(question)?;
            let answer = assistant.ask(pending.question());
            if let Err(err) = &answer {
                LogNotifier.notify(Notice::failure("Message failed", err));
            }
            let reply = session.complete(pending, answer);
            writeln!(stdout, "{}", output::format_chat_line(reply)).into_diagnostic()?;
        }
        write!(stdout, "> ").into_diagnostic()?;
        stdout.flush().into_diagnostic()?;
    }
    Ok(())
}
