use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use rmse_core::{dump_json, load, save_with, BackupManager, RootLocator, SaveError};

mod config;
mod logging;

use config::{config_path, load_config, save_config, CliConfig};

#[derive(Debug, Parser)]
#[command(name = "rmse", version, about = "Save file editor backend for NW.js game engines")]
struct Cli {
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Shorthand for --log-level debug.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a save file and print its JSON.
    Load {
        file: PathBuf,
        /// Write the decoded JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print root, format and reference table summary instead of the JSON.
        #[arg(long, default_value_t = false)]
        context: bool,
    },
    /// Encode JSON into a save file, backing up the old one.
    Save {
        file: PathBuf,
        /// File holding the JSON text to write.
        #[arg(long)]
        json: PathBuf,
        /// Game root; located from FILE when omitted.
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Manage the backups kept next to a save file.
    #[command(subcommand)]
    Backups(BackupCommand),
    /// Show the effective configuration.
    Config {
        /// Write the default configuration to the config path.
        #[arg(long, default_value_t = false)]
        write_defaults: bool,
    },
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    /// List backups, newest first.
    List {
        file: PathBuf,
        /// Print the listing as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Back up the save file now.
    Create { file: PathBuf },
    /// Drop backups beyond the retention limit.
    Prune { file: PathBuf },
    /// Delete every backup of the save file.
    Clear { file: PathBuf },
    /// Overwrite the save file with a backup.
    Restore(RestoreArgs),
}

#[derive(Debug, Args)]
struct RestoreArgs {
    file: PathBuf,
    /// Position in `backups list`; defaults to 0, the newest.
    #[arg(long, conflicts_with = "backup")]
    index: Option<usize>,
    /// Explicit backup file.
    #[arg(long)]
    backup: Option<PathBuf>,
}

#[derive(Serialize)]
struct ContextSummary<'a> {
    savefile: &'a Path,
    rm_root: &'a Path,
    format: rmse_core::SaveFormat,
    data_dir: Option<&'a Path>,
    tables: Vec<&'static str>,
}

fn main() {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref());

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        logging::parse_level(cli.log_level.as_deref().unwrap_or(&cfg.log_level))
    };
    if let Err(e) = logging::init(level, cfg.log_file.as_deref()) {
        eprintln!("Failed to set up logging: {e}");
    }

    let backups = BackupManager::with_retention(cfg.backup_retention);
    let result = match cli.command {
        Command::Load {
            file,
            output,
            context,
        } => run_load(&file, output.as_deref(), context),
        Command::Save { file, json, root } => run_save(&file, &json, root, &backups),
        Command::Backups(cmd) => run_backups(cmd, &backups),
        Command::Config { write_defaults } => {
            run_config(&cfg, cli.config, write_defaults, &backups)
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run_load(file: &Path, output: Option<&Path>, context: bool) -> Result<(), SaveError> {
    let loaded = load(file)?;

    if context {
        let summary = ContextSummary {
            savefile: &loaded.savefile,
            rm_root: &loaded.rm_root,
            format: loaded.format(),
            data_dir: loaded.context.data_dir.as_deref(),
            tables: loaded
                .context
                .present_keys()
                .into_iter()
                .map(|key| key.name())
                .collect(),
        };
        let text = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
        println!("{text}");
        return Ok(());
    }

    match output {
        Some(path) => {
            let written = dump_json(path, &loaded.json_txt)?;
            println!("{}", written.display());
        }
        None => println!("{}", loaded.json_txt),
    }
    Ok(())
}

fn run_save(
    file: &Path,
    json: &Path,
    root: Option<PathBuf>,
    backups: &BackupManager,
) -> Result<(), SaveError> {
    let root = match root {
        Some(root) => root,
        None => RootLocator::locate(file)
            .ok_or_else(|| SaveError::RootNotFound(file.to_path_buf()))?,
    };
    let json_txt = fs::read_to_string(json).map_err(|source| SaveError::Read {
        path: json.to_path_buf(),
        source,
    })?;

    let existed = file.exists();
    let saved = save_with(file, &json_txt, &root, backups)?;
    println!("saved {}", saved.path.display());
    match saved.backup {
        Some(backup) => println!("backup {}", backup.display()),
        None if existed => println!("warning: no backup was taken of the previous file"),
        None => {}
    }
    Ok(())
}

fn run_backups(cmd: BackupCommand, backups: &BackupManager) -> Result<(), SaveError> {
    match cmd {
        BackupCommand::List { file, json } => {
            let info = backups.backup_info(&file);
            if json {
                let text = serde_json::to_string_pretty(&info).map_err(std::io::Error::from)?;
                println!("{text}");
                return Ok(());
            }
            if info.is_empty() {
                println!("no backups for {}", file.display());
            }
            for (i, entry) in info.iter().enumerate() {
                println!(
                    "{:>3}  {}  {:>10}  {}",
                    i,
                    entry.created.format("%Y-%m-%d %H:%M:%S"),
                    entry.size,
                    entry.filename
                );
            }
        }
        BackupCommand::Create { file } => match backups.create_backup(&file) {
            Some(backup) => println!("{}", backup.display()),
            None => println!("no backup created for {}", file.display()),
        },
        BackupCommand::Prune { file } => {
            let removed = backups.prune(&file);
            println!("removed {removed} old backups");
        }
        BackupCommand::Clear { file } => {
            let removed = backups.clear_backups(&file);
            println!("removed {removed} backups");
        }
        BackupCommand::Restore(args) => {
            let backup = restore_source(&args, backups)?;
            backups.restore(&backup, &args.file)?;
            println!("restored {} from {}", args.file.display(), backup.display());
        }
    }
    Ok(())
}

fn restore_source(args: &RestoreArgs, backups: &BackupManager) -> Result<PathBuf, SaveError> {
    match &args.backup {
        Some(path) => Ok(path.clone()),
        None => backups.backup_at(&args.file, args.index.unwrap_or(0)),
    }
}

fn run_config(
    cfg: &CliConfig,
    explicit: Option<PathBuf>,
    write_defaults: bool,
    backups: &BackupManager,
) -> Result<(), SaveError> {
    let path = explicit.or_else(config_path);
    if write_defaults {
        let Some(path) = path.as_deref() else {
            return Err(SaveError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory on this platform",
            )));
        };
        save_config(path, &CliConfig::default())?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let report = config_report(cfg, path.as_deref(), backups).map_err(std::io::Error::from)?;
    println!("{report}");
    Ok(())
}

// The retention line shows the value in effect after clamping.
fn config_report(
    cfg: &CliConfig,
    path: Option<&Path>,
    backups: &BackupManager,
) -> serde_json::Result<String> {
    let mut out = String::new();
    if let Some(path) = path {
        out.push_str(&format!("# {}\n", path.display()));
    }
    out.push_str(&format!("# backup retention: {}\n", backups.retention()));
    out.push_str(&serde_json::to_string_pretty(cfg)?);
    Ok(out)
}
