//! Finds the Vivaldi installation's interface resources and manages the bundle file and
//! its backup.

use std::path::{Path, PathBuf};

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

pub const BUNDLE_NAME: &str = "bundle.js";
pub const BACKUP_NAME: &str = "bundle.js.bak";

/// Environment problems that stop the whole run. Per-hook problems are
/// `hooks::HookError` and never end up here.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{0:?} is not a directory; pass the Vivaldi installation path with --install-path")]
    BadInstallDir(PathBuf),

    #[error("no browser.html found under {0:?}; pass a known-good path with --install-path")]
    NoBrowserHtml(PathBuf),

    #[error("no default install path is known for this platform; pass --install-path")]
    NoDefaultPath,

    #[error("no bundle.js in {0:?}")]
    NoBundle(PathBuf),

    #[error("no backup in {0:?}; bundle.js.bak is missing")]
    NoBackup(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Expands `%NAME%` and `$NAME` environment references in a user-supplied path, leaving
/// unknown variables as written.
pub fn expand_env_vars(path: &str) -> String {
    static ENV_VAR: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"%([A-Za-z0-9_]+)%|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

    ENV_VAR
        .replace_all(path, |caps: &regex::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).unwrap().as_str();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// The default installation path for this operating system.
///
/// Linux installs vary too much between distributions and packaging formats to guess, so
/// there the path has to come from the user.
pub fn default_install_path() -> Result<PathBuf, SetupError> {
    if cfg!(target_os = "windows") {
        Ok(PathBuf::from(expand_env_vars(
            r"%LOCALAPPDATA%\Vivaldi\Application",
        )))
    } else if cfg!(target_os = "macos") {
        Ok(PathBuf::from("/Applications/Vivaldi.app/Contents/Versions"))
    } else {
        Err(SetupError::NoDefaultPath)
    }
}

/// Finds the directory holding the newest interface resources: the greatest path under
/// the install dir that contains a `browser.html`.
///
/// More than one version directory can exist while an update is pending; the greatest
/// path is the newest version.
pub fn find_version_dir(install_path: &Path) -> Result<PathBuf, SetupError> {
    if !install_path.is_dir() {
        return Err(SetupError::BadInstallDir(install_path.to_path_buf()));
    }

    let newest = WalkDir::new(install_path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| name.ends_with("browser.html"))
                    .unwrap_or(false)
        })
        .filter_map(|entry| entry.path().parent().map(Path::to_path_buf))
        .max();

    match newest {
        Some(dir) => {
            info!("using interface resources in {:?}", dir);
            Ok(dir)
        }
        None => Err(SetupError::NoBrowserHtml(install_path.to_path_buf())),
    }
}

pub fn bundle_path(version_dir: &Path) -> PathBuf {
    version_dir.join(BUNDLE_NAME)
}

pub fn backup_path(version_dir: &Path) -> PathBuf {
    version_dir.join(BACKUP_NAME)
}

pub fn has_backup(version_dir: &Path) -> bool {
    backup_path(version_dir).is_file()
}

/// Copies `bundle.js` to `bundle.js.bak` so a pristine copy survives patching. An
/// existing backup is overwritten.
pub fn backup_bundle(version_dir: &Path) -> Result<(), SetupError> {
    let bundle = bundle_path(version_dir);

    if !bundle.is_file() {
        return Err(SetupError::NoBundle(version_dir.to_path_buf()));
    }

    std::fs::copy(&bundle, backup_path(version_dir))?;
    Ok(())
}

/// Puts the pristine `bundle.js` back and removes the backup.
pub fn restore_bundle(version_dir: &Path) -> Result<(), SetupError> {
    let backup = backup_path(version_dir);

    if !backup.is_file() {
        return Err(SetupError::NoBackup(version_dir.to_path_buf()));
    }

    std::fs::copy(&backup, bundle_path(version_dir))?;
    std::fs::remove_file(&backup)?;
    Ok(())
}

pub fn read_bundle(version_dir: &Path) -> Result<String, SetupError> {
    let bundle = bundle_path(version_dir);

    if !bundle.is_file() {
        return Err(SetupError::NoBundle(version_dir.to_path_buf()));
    }

    Ok(std::fs::read_to_string(bundle)?)
}

pub fn write_bundle(version_dir: &Path, text: &str) -> Result<(), SetupError> {
    if let Err(err) = std::fs::write(bundle_path(version_dir), text) {
        warn!("unable to write patched bundle: {}", err);
        return Err(err.into());
    }

    Ok(())
}
