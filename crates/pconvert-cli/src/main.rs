use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::warn;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use pconvert::config::loader::validate_config;
use pconvert::presenter::save_image;
use pconvert::{
    load_config, ClientConfig, ConversionType, ExportKind, FileStore, HardwareInfo,
    HostFingerprint, HttpBackend, ImageEvent, JobOutcome, PconvertError, ProgressEvent, Session,
    UploadOptions, UploadOutcome,
};

type CliSession = Session<HttpBackend, FileStore>;

#[derive(Parser, Debug)]
#[command(author, version, about = "P Convert OCR client")]
struct Args {
    /// YAML client configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show diagnostic output on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register this machine with the backend
    Activate {
        #[arg(long)]
        cpu_id: Option<String>,
        #[arg(long)]
        bios_serial: Option<String>,
        #[arg(long)]
        motherboard_serial: Option<String>,
    },
    /// Submit and remember the OCR API key
    SetKey { key: String },
    /// Forget the saved API key
    ClearKey,
    /// Upload a PDF or image and convert it
    Convert {
        file: PathBuf,
        #[arg(long = "type", value_enum, default_value_t = CliConversionType::Text)]
        conversion_type: CliConversionType,
        #[arg(long)]
        spelling_correction: bool,
        #[arg(long)]
        gemini_key: Option<String>,
    },
    /// Print the last saved result
    Show,
    /// Download the images of the last result into DIR
    Images { dir: PathBuf },
    /// Export the last result (word-equation, word-image or zip)
    Export {
        kind: ExportKind,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Convert the text of the last result into a Word document
    Word {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliConversionType {
    Text,
    LatexMcq,
}

impl From<CliConversionType> for ConversionType {
    fn from(value: CliConversionType) -> Self {
        match value {
            CliConversionType::Text => ConversionType::Text,
            CliConversionType::LatexMcq => ConversionType::LatexMcq,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let config = Arc::new(resolve_config(args.config.as_deref())?);
    let store = FileStore::open(config.resolved_storage_path())?;
    let backend = Arc::new(HttpBackend::new(Arc::clone(&config))?);
    let mut session = Session::new(Arc::clone(&config), backend, store);
    let printer = spawn_event_printer(&session);

    let outcome = run(&mut session, args.command).await;

    drop(session);
    let _ = printer.await;
    outcome
}

fn init_tracing(verbose: bool) -> Result<()> {
    tracing_log::LogTracer::init().context("Failed to bridge log records")?;

    let default_filter = if verbose { "pconvert=debug,info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => {
            let mut config = load_config(path)?;
            config.apply_env_overrides()?;
            validate_config(&config)?;
            config
        }
        None => ClientConfig::from_env()?,
    };
    Ok(config)
}

/// Prints the activity log to stdout and progress to stderr until the
/// session is dropped.
fn spawn_event_printer(session: &CliSession) -> JoinHandle<()> {
    let mut progress = session.progress().subscribe();
    let mut logs = session.logs().subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok(event) = progress.recv() => print_progress(&event),
                Ok(event) = logs.recv() => println!("{}", event.display_line()),
                else => break,
            }
        }
    })
}

fn print_progress(event: &ProgressEvent) {
    match event.parts {
        Some((done, total)) => eprintln!(
            "[{:>3}%] {} ({}/{})",
            event.percent, event.message, done, total
        ),
        None => eprintln!("[{:>3}%] {}", event.percent, event.message),
    }
}

async fn run(session: &mut CliSession, command: Command) -> Result<()> {
    match command {
        Command::Activate {
            cpu_id,
            bios_serial,
            motherboard_serial,
        } => {
            session.restore();
            if cpu_id.is_none() && bios_serial.is_none() && motherboard_serial.is_none() {
                session.activate(&HostFingerprint).await?;
            } else {
                let info = HardwareInfo::new(
                    cpu_id.unwrap_or_default(),
                    bios_serial.unwrap_or_default(),
                    motherboard_serial.unwrap_or_default(),
                );
                session.activate_manual(info).await?;
            }

            let activation = &session.state().activation;
            println!(
                "Hardware ID: {}",
                activation.hardware_id().unwrap_or("<none>")
            );
            println!(
                "Status: {}",
                if activation.activated {
                    "ACTIVATED"
                } else {
                    "NOT ACTIVATED"
                }
            );
        }
        Command::SetKey { key } => {
            let model = session.set_api_key(&key).await?;
            println!("API key saved (model: {})", model);
        }
        Command::ClearKey => {
            session.clear_api_key()?;
        }
        Command::Convert {
            file,
            conversion_type,
            spelling_correction,
            gemini_key,
        } => {
            session.initialize(&HostFingerprint).await?;
            session.set_options(UploadOptions {
                conversion_type: conversion_type.into(),
                spelling_correction,
                gemini_api_key: gemini_key,
            });
            session.select_file(&file)?;

            if !session.controls().conversion_enabled {
                bail!("Conversion is disabled: set an API key and activate this machine first");
            }

            if let UploadOutcome::MultiPart { .. } = session.upload().await? {
                convert_with_cancel(session).await?;
            }

            if let Some(record) = session.result() {
                println!("{}", record.text);
            }
        }
        Command::Show => match session.restore() {
            Some(record) => {
                println!("Result: {} ({} images)", record.result_id, record.image_count);
                println!();
                println!("{}", record.text);
            }
            None => println!("No saved result"),
        },
        Command::Images { dir } => {
            session.restore();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            let mut write_errors = Vec::new();
            let summary = session
                .load_images(|event| match event {
                    ImageEvent::Loaded {
                        image_id, bytes, ..
                    } => {
                        if let Err(e) = save_image(&dir, &image_id, &bytes) {
                            write_errors.push(e.to_string());
                        }
                    }
                    ImageEvent::Failed { image_id, error } => {
                        warn!("Image {} failed: {}", image_id, error);
                    }
                })
                .await?;

            for error in &write_errors {
                eprintln!("{}", error);
            }
            println!(
                "Saved {} of {} images to {}",
                summary.loaded.saturating_sub(write_errors.len()),
                summary.attempted,
                dir.display()
            );
        }
        Command::Export { kind, out } => {
            session.restore();
            let handle = session.export(kind, out.as_deref())?;
            let path = wait_export(session, handle).await?;
            println!("Saved {}", path.display());
        }
        Command::Word { out } => {
            session.restore();
            let handle = session.export_text_to_word(out.as_deref())?;
            let path = wait_export(session, handle).await?;
            println!("Saved {}", path.display());
        }
    }

    Ok(())
}

/// Polls the pending job until it ends or the user presses Ctrl-C.
async fn convert_with_cancel(session: &mut CliSession) -> Result<()> {
    let handle = session.begin_conversion().await?;
    let job_id = handle.job_id().to_string();

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            session.cancel_conversion();
            JobOutcome::Cancelled
        }
    };

    session.finish_conversion(&job_id, outcome)?;
    Ok(())
}

async fn wait_export(
    session: &mut CliSession,
    handle: pconvert::ExportHandle,
) -> std::result::Result<PathBuf, PconvertError> {
    tokio::select! {
        result = handle.wait() => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            session.cancel_export();
            Err(pconvert::ExportError::Cancelled.into())
        }
    }
}
