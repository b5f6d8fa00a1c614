use clap::Parser;
use par_backup::backup::backup_config::{BackupConfig, BackupJob};
use par_backup::backup::orchestrator::run_backup;
use par_backup::backup::progress::{ProgressEvent, ProgressSink};
use par_backup::backup::report::{BackupOutcome, BackupReport};
use par_backup::backup::result_error::error::Error;
use par_backup::backup::result_error::result::Result;
use par_backup::backup::result_error::AddMsg;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::mpsc::channel;
use tracing::{debug, error, info, warn};

/// Compress directories in parallel into one tar archive and upload it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
    /// Build the archive but leave it local even if an upload is configured
    #[arg(long)]
    skip_upload: bool,
    /// Write the JSON report to this file
    #[arg(short, long)]
    report: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let code = match run(&args) {
        Ok(report) => match report.outcome() {
            BackupOutcome::Succeeded => 0,
            BackupOutcome::UploadFailed => {
                warn!("Archive created at {:?} but upload failed", report.archive_path());
                2
            }
        },
        Err(e) => {
            error!("{e}");
            1
        }
    };

    exit(code);
}

fn load_config(path: &Path) -> Result<BackupConfig> {
    let config = File::open(path)
        .map_err(Error::from)
        .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
        .add_msg(format!("Parse YAML config failed: {path:?}"))?;
    config
        .check()
        .add_msg(format!("Config validation failed: {path:?}"))?;
    Ok(config)
}

fn run(args: &Args) -> Result<BackupReport> {
    let config = load_config(&args.config)?;
    let job = BackupJob::try_from(&config)?;
    let upload_client = match config.upload() {
        Some(upload) if !args.skip_upload => Some(upload.build_client()?),
        Some(_) => {
            info!("Upload configured but skipped on request");
            None
        }
        None => None,
    };

    let (tx, rx) = channel();
    let listener = std::thread::spawn(move || rx.iter().for_each(log_event));
    let report = run_backup(job, upload_client, ProgressSink::new(tx));
    if listener.join().is_err() {
        warn!("Progress listener panicked");
    }
    let report = report?;

    if let Some(path) = &args.report {
        report
            .to_json()
            .map_err(Error::from)
            .and_then(|json| std::fs::write(path, json).map_err(Error::from))
            .add_msg(format!("Writing report failed: {path:?}"))?;
        info!("Report written to {:?}", path);
    }
    Ok(report)
}

fn log_event(event: ProgressEvent) {
    match event {
        ProgressEvent::SourceAdded { root } => info!("Source added: {:?}", root),
        ProgressEvent::FileCompressed {
            path,
            original_size,
            compressed_size,
        } => debug!("Compressed {:?}: {} -> {} bytes", path, original_size, compressed_size),
        ProgressEvent::FileFailed { path, reason } => warn!("Failed {:?}: {}", path, reason),
        ProgressEvent::StageChanged { from, to } if to.is_terminal() => {
            info!("Backup ended {} (after {})", to, from)
        }
        ProgressEvent::StageChanged { from, to } => debug!("Stage {} -> {}", from, to),
        ProgressEvent::Warning { message } => warn!("{message}"),
        ProgressEvent::UploadFinished {
            remote_id,
            duration,
        } => info!("Uploaded as {} in {:?}", remote_id, duration),
    }
}
