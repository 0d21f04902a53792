//! Patches Vivaldi's packaged interface script with user-supplied hooks.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use eyre::{bail, WrapErr};
use itertools::Itertools;

mod bundle;
mod hooks;
mod logging;
mod resources;

/// Applies data-driven patches ("hooks") to Vivaldi's interface bundle. The pristine
/// bundle.js is kept as bundle.js.bak so every run starts from an unmodified copy.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Log everything, including debug output.
    #[arg(short, long)]
    verbose: bool,

    /// The Vivaldi installation path. Environment variables like %LOCALAPPDATA% are
    /// expanded. Defaults to the usual install location for this platform.
    #[arg(short = 'p', long)]
    install_path: Option<String>,

    /// The directory containing hook definition files (*.json).
    #[arg(long, default_value = "hooks")]
    hooks_dir: PathBuf,

    /// Restore bundle.js from its backup and exit without patching anything.
    #[arg(long)]
    restore: bool,
}

/// What to do when a backup from a previous run is found.
enum BackupChoice {
    RestoreAndContinue,
    RestoreAndExit,
    Replace,
}

/// Asks the user what to do about an existing backup. Loops until one of the three
/// options is chosen.
fn prompt_backup_choice() -> eyre::Result<BackupChoice> {
    loop {
        println!("A backup from a previous run exists. Choose an option and enter the corresponding number:");
        println!("  (1) [Recommended] Restore bundle.js from the backup and CONTINUE");
        println!("  (2) Restore bundle.js from the backup and EXIT");
        println!("  (3) Delete the backup and create a new one before CONTINUING");
        print!("Choice: ");
        std::io::stdout().flush()?;

        let mut choice = String::new();

        if std::io::stdin().read_line(&mut choice)? == 0 {
            bail!("input closed before a backup choice was made");
        }

        match choice.trim() {
            "1" => return Ok(BackupChoice::RestoreAndContinue),
            "2" => return Ok(BackupChoice::RestoreAndExit),
            "3" => return Ok(BackupChoice::Replace),
            other => println!("***\nInvalid choice {other:?}, please only input 1, 2, or 3\n***"),
        }
    }
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();

    // Logging comes up before anything else so that every later step can log.
    logging::init(args.verbose);

    log::info!("vivahook {}", env!("CARGO_PKG_VERSION"));

    let install_path = match &args.install_path {
        Some(path) => PathBuf::from(resources::expand_env_vars(path)),
        None => resources::default_install_path()?,
    };

    log::debug!("using install path {:?}", install_path);

    let version_dir = resources::find_version_dir(&install_path)?;

    if args.restore {
        resources::restore_bundle(&version_dir)?;
        log::info!("restored pristine bundle.js");
        return Ok(());
    }

    // Patching always starts from a pristine bundle: either the one on disk (first run)
    // or the backed-up copy from an earlier run.
    if resources::has_backup(&version_dir) {
        match prompt_backup_choice()? {
            BackupChoice::RestoreAndContinue => {
                resources::restore_bundle(&version_dir)?;
                resources::backup_bundle(&version_dir)?;
            }
            BackupChoice::RestoreAndExit => {
                resources::restore_bundle(&version_dir)?;
                log::info!("restored pristine bundle.js");
                return Ok(());
            }
            BackupChoice::Replace => resources::backup_bundle(&version_dir)?,
        }
    } else {
        resources::backup_bundle(&version_dir)?;
    }

    let hooks = hooks::load_all(&args.hooks_dir)
        .wrap_err_with(|| format!("unable to read hooks from {:?}", args.hooks_dir))?;

    if hooks.is_empty() {
        bail!("no hook definitions found in {:?}", args.hooks_dir);
    }

    let text = resources::read_bundle(&version_dir)?;
    let report = hooks::apply_all(&hooks, text);

    if report.applied.is_empty() {
        bail!("no hooks applied; bundle.js has not been modified");
    }

    resources::write_bundle(&version_dir, &report.text)?;

    log::info!(
        "applied {} of {} hook(s): {}",
        report.applied.len(),
        report.applied.len() + report.skipped.len(),
        report.applied.iter().join(", ")
    );

    if !report.skipped.is_empty() {
        log::warn!("skipped: {}", report.skipped.iter().join(", "));
    }

    Ok(())
}
