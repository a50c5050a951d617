//! Kernel configuration resolution.
//!
//! Produces the active `.config` before the build runs: optional clean,
//! seed from the operator's custom config or the default profile,
//! reconcile, then stamp the version suffix.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::kernel::KernelBuild;

/// Version directive stamped into the configuration.
pub const LOCALVERSION_KEY: &str = "CONFIG_LOCALVERSION";

/// User choices that shape the configuration.
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Reset build state before configuring.
    pub clean: bool,
    /// Operator-supplied configuration replacing the default profile.
    pub custom_config: Option<PathBuf>,
    /// Appended to the kernel release string.
    pub version_suffix: Option<String>,
}

/// Write the active configuration for `config`.
///
/// Nothing here is retried: a failed copy or reconcile aborts before any
/// build step sees a half-written configuration.
pub fn resolve(kernel: &dyn KernelBuild, config: &BuildConfig, defconfig: &str) -> Result<()> {
    if config.clean {
        println!("  Cleaning kernel build state...");
        kernel.clean().context("Failed to clean kernel build state")?;
    }

    let active = kernel.config_path();
    match &config.custom_config {
        Some(custom) => {
            println!("  Using custom config {}", custom.display());
            if let Some(parent) = active.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(custom, &active).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    custom.display(),
                    active.display()
                )
            })?;
        }
        None => {
            println!("  Seeding config from {}...", defconfig);
            kernel
                .seed_default_config(defconfig)
                .with_context(|| format!("Failed to seed config from {}", defconfig))?;
        }
    }

    println!("  Resolving config dependencies...");
    kernel.reconcile_config().context("Failed to reconcile config")?;

    if let Some(suffix) = &config.version_suffix {
        println!("  Setting {}=\"{}\"", LOCALVERSION_KEY, suffix);
        stamp_version(&active, suffix)?;
        kernel
            .reconcile_config()
            .context("Failed to reconcile config after version change")?;
    }

    Ok(())
}

/// Replace every version directive in the file at `path` with one for `suffix`.
pub fn stamp_version(path: &Path, suffix: &str) -> Result<()> {
    // An unreadable config is a real error, never an empty one.
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read kernel config at {}", path.display()))?;
    fs::write(path, set_localversion(&content, suffix))
        .with_context(|| format!("Failed to write kernel config at {}", path.display()))?;
    Ok(())
}

/// Drop any existing `CONFIG_LOCALVERSION` line (set or "is not set") and
/// append exactly one new directive.
pub fn set_localversion(config: &str, suffix: &str) -> String {
    let set_prefix = format!("{}=", LOCALVERSION_KEY);
    let unset = format!("# {} is not set", LOCALVERSION_KEY);

    let mut out: String = config
        .lines()
        .filter(|l| {
            let l = l.trim_start();
            !l.starts_with(&set_prefix) && l != unset
        })
        .flat_map(|l| [l, "\n"])
        .collect();

    out.push_str(&format!("{}=\"{}\"\n", LOCALVERSION_KEY, escape(suffix)));
    out
}

/// Value of the version directive, if exactly one is present.
pub fn localversion(config: &str) -> Option<String> {
    let prefix = format!("{}=", LOCALVERSION_KEY);
    let mut values = config
        .lines()
        .filter_map(|l| l.trim_start().strip_prefix(&prefix));
    let value = values.next()?;
    if values.next().is_some() {
        return None;
    }
    Some(unescape(value.trim().trim_matches('"')))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unescape(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\\\", "\\")
}
