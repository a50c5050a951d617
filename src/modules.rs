//! Out-of-tree module building.
//!
//! Every immediate subdirectory of the custom-sources root that carries a
//! build descriptor is one module source. Each is built against the
//! already-built kernel tree and its `.ko` files land in
//! `lib/modules/<release>/extra/`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::kernel::KernelBuild;
use crate::staging::{self, StagingTree};

/// Files that mark a directory as a buildable module source.
pub const BUILD_DESCRIPTORS: &[&str] = &["Makefile", "Kbuild"];

/// One discovered module source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub name: String,
    pub path: PathBuf,
}

impl ModuleSource {
    /// `Some` if `dir` contains a recognized build descriptor.
    pub fn probe(dir: &Path) -> Option<Self> {
        if !dir.is_dir() {
            return None;
        }
        let has_descriptor = BUILD_DESCRIPTORS.iter().any(|d| dir.join(d).is_file());
        if !has_descriptor {
            return None;
        }
        Some(Self {
            name: dir.file_name()?.to_string_lossy().into_owned(),
            path: dir.to_path_buf(),
        })
    }

    /// Loadable module artifacts produced under this source tree.
    pub fn built_modules(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to scan module source {}", self.path.display()))?;
            if entry.file_type().is_file()
                && entry.path().extension().map(|e| e == "ko").unwrap_or(false)
            {
                found.push(entry.into_path());
            }
        }
        Ok(found)
    }
}

/// Module sources under `root`, in name order. Directories without a build
/// descriptor are skipped; a missing root yields nothing.
pub fn discover(root: &Path) -> Result<Vec<ModuleSource>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("Failed to read {}", root.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    Ok(dirs
        .iter()
        .filter_map(|dir| {
            let source = ModuleSource::probe(dir);
            if source.is_none() {
                tracing::debug!("skipping {} (no build descriptor)", dir.display());
            }
            source
        })
        .collect())
}

/// Summary of a module build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReport {
    pub release: String,
    pub extra_dir: PathBuf,
    /// (module source name, installed `.ko` paths)
    pub installed: Vec<(String, Vec<PathBuf>)>,
}

impl ModuleReport {
    pub fn module_count(&self) -> usize {
        self.installed.iter().map(|(_, kos)| kos.len()).sum()
    }
}

/// Build every module source under `sources_root` and place its `.ko`
/// files in the staging tree. Stops at the first failure.
pub fn install_custom_modules(
    kernel: &dyn KernelBuild,
    staging: &StagingTree,
    sources_root: &Path,
) -> Result<ModuleReport> {
    let release = kernel
        .kernel_release()
        .context("Failed to query kernel release")?;
    println!("  Kernel release: {}", release);

    staging.require_release_dir(&release)?;
    let extra = staging.extra_dir(&release);
    fs::create_dir_all(&extra).with_context(|| format!("Failed to create {}", extra.display()))?;

    let sources = discover(sources_root)?;
    let mut report = ModuleReport {
        release,
        extra_dir: extra.clone(),
        installed: Vec::new(),
    };

    if sources.is_empty() {
        println!(
            "  No custom module sources found in {}, continuing with kernel modules only",
            sources_root.display()
        );
        return Ok(report);
    }

    for source in &sources {
        println!("  Building module '{}'...", source.name);
        kernel
            .build_external_module(&source.path)
            .with_context(|| format!("Custom module '{}' failed to build", source.name))?;

        let mut installed = Vec::new();
        for ko in source.built_modules()? {
            if let Some(name) = ko.file_name() {
                let dest = extra.join(name);
                if dest.exists() {
                    let owner = report
                        .installed
                        .iter()
                        .chain(std::iter::once(&(source.name.clone(), installed.clone())))
                        .find(|(_, kos)| kos.contains(&dest))
                        .map(|(owner, _)| format!("module '{}'", owner))
                        .unwrap_or_else(|| "an earlier build".to_string());
                    return Err(PipelineError::precondition(format!(
                        "{} from module '{}' would overwrite the one from {} in {}",
                        name.to_string_lossy(),
                        source.name,
                        owner,
                        extra.display()
                    ))
                    .into());
                }
            }
            installed.push(staging::copy_into(&ko, &extra)?);
        }
        if installed.is_empty() {
            println!("  [WARN] '{}' built but produced no .ko files", source.name);
        }
        report.installed.push((source.name.clone(), installed));
    }

    println!(
        "  Installed {} custom modules into {}",
        report.module_count(),
        extra.display()
    );
    Ok(report)
}
