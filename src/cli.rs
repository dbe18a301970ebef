use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use consolida::config::AppConfig;
use consolida::monitor::{LogMetrics, read_log, recent_outputs};
use consolida::pipeline::Pipeline;
use consolida::service::{UploadOutcome, process_upload};
use consolida::storage::{ArtifactKind, SnapshotStore};
use consolida::watcher::FolderWatcher;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(
    name = "consolida",
    about = "Consolidates dropped spreadsheets into snapshots and diff reports"
)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "CONSOLIDA_CONFIG", default_value = "consolida.json")]
    pub config: PathBuf,

    /// Folder scanned for input files (overrides the configuration)
    #[arg(long, global = true, env = "CONSOLIDA_INPUT_DIR")]
    pub input_dir: Option<PathBuf>,

    /// Folder receiving snapshots and reports (overrides the configuration)
    #[arg(long, global = true, env = "CONSOLIDA_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Audit log file (overrides the configuration)
    #[arg(long, global = true, env = "CONSOLIDA_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Mirror audit log lines to stderr
    #[arg(long, global = true)]
    pub echo: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consolidate every file in the input folder once (the default)
    Run,
    /// Process one uploaded file and print the resulting file
    Process {
        /// Path of the uploaded file
        file: PathBuf,

        /// Name to stage the file under. Defaults to the file's own name.
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Watch the input folder and run whenever a new file settles
    Watch,
    /// Show metrics from the audit log
    Stats {
        /// Number of recent output files to list
        #[arg(short, long, default_value_t = 5)]
        recent: usize,
    },
    /// List snapshots, oldest first
    Snapshots,
}

impl Cli {
    /// File configuration with command line overrides applied.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(&self.config)?;
        if let Some(dir) = &self.input_dir {
            config.input_dir.clone_from(dir);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(file) = &self.log_file {
            config.log_file.clone_from(file);
        }
        config.echo_console |= self.echo;
        Ok(config)
    }
}

pub fn run_command(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => handle_run(config),
        Commands::Process { file, name } => handle_process(&config, &file, name),
        Commands::Watch => handle_watch(config),
        Commands::Stats { recent } => handle_stats(&config, recent),
        Commands::Snapshots => handle_snapshots(&config),
    }
}

fn handle_run(config: AppConfig) -> Result<()> {
    config.ensure_dirs()?;
    println!("Consolidating files in {}", config.input_dir.display());

    let report = Pipeline::new(config)?.run()?;
    println!("{}", report.summary());
    if let Some(diff) = report.diff_path() {
        println!("Diff report: {}", diff.display());
    }
    Ok(())
}

fn handle_process(config: &AppConfig, file: &Path, name: Option<String>) -> Result<()> {
    config.ensure_dirs()?;
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .context("Upload path has no file name")?
            .to_string_lossy()
            .into_owned(),
    };

    match process_upload(config, file, &name)? {
        UploadOutcome::Diff(path) => println!("New rows found: {}", path.display()),
        UploadOutcome::Consolidated(path) => println!("Consolidated: {}", path.display()),
        UploadOutcome::NothingProduced => println!("Processed, no output file was produced"),
    }
    Ok(())
}

fn handle_watch(config: AppConfig) -> Result<()> {
    config.ensure_dirs()?;
    println!("Watching {} (Ctrl+C to stop)", config.input_dir.display());

    let stop = AtomicBool::new(false);
    FolderWatcher::new(Pipeline::new(config)?).watch(&stop)?;
    Ok(())
}

fn handle_stats(config: &AppConfig, recent: usize) -> Result<()> {
    let entries = read_log(&config.log_file)?;
    if entries.is_empty() {
        println!("No log entries in {}", config.log_file.display());
        return Ok(());
    }

    let metrics = LogMetrics::from_entries(&entries);
    println!("Exports:  {}", metrics.exports);
    println!("Errors:   {}", metrics.errors);
    println!("Warnings: {}", metrics.warnings);
    println!(
        "Runs:     {} started, {} finished",
        metrics.runs_started, metrics.runs_finished
    );

    println!("\nActivity by hour:");
    for (hour, count) in &metrics.activity_by_hour {
        println!("  {hour:02}h {count:>6}");
    }

    let files = recent_outputs(&config.output_dir, recent)?;
    if !files.is_empty() {
        println!("\nRecent files:");
        for file in files {
            println!("  {}", file.display());
        }
    }
    Ok(())
}

fn handle_snapshots(config: &AppConfig) -> Result<()> {
    let store = SnapshotStore::open(&config.output_dir)?;
    let snapshots = store.list(ArtifactKind::Snapshot)?;
    if snapshots.is_empty() {
        println!("No snapshots in {}", config.output_dir.display());
    }
    for path in snapshots {
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply() -> Result<()> {
        let cli = Cli::try_parse_from([
            "consolida",
            "--config",
            "absent-config.json",
            "--output-dir",
            "elsewhere",
            "snapshots",
        ])?;
        let config = cli.load_config()?;
        assert_eq!(config.output_dir, PathBuf::from("elsewhere"));
        assert!(matches!(cli.command, Some(Commands::Snapshots)));
        Ok(())
    }
}
