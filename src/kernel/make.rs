//! `make`-driven kernel build.
//!
//! Builds out of tree (`O=`) so the source checkout stays clean and the
//! configuration lives at `<build_dir>/.config`.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{KernelArtifacts, KernelBuild, Toolchain};
use crate::process::Cmd;

/// Overlay files that are not blobs but still ship to `boot/overlays/`.
const OVERLAY_EXTRAS: &[&str] = &["README"];

/// Kernel build driven by the kernel's own Makefile.
pub struct MakeInvoker {
    source: PathBuf,
    build_dir: PathBuf,
    toolchain: Toolchain,
    jobs: usize,
}

impl MakeInvoker {
    pub fn new(source: &Path, build_dir: &Path, toolchain: Toolchain, jobs: usize) -> Self {
        Self {
            source: source.to_path_buf(),
            build_dir: build_dir.to_path_buf(),
            toolchain,
            jobs: jobs.max(1),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// `make` with the arguments every invocation shares.
    fn make(&self) -> Cmd {
        Cmd::new("make").args(self.base_args())
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-C".to_string(),
            self.source.to_string_lossy().into_owned(),
            format!("O={}", self.build_dir.display()),
            format!("ARCH={}", self.toolchain.arch),
            format!("CROSS_COMPILE={}", self.toolchain.triple),
        ]
    }

    fn jobs_arg(&self) -> String {
        format!("-j{}", self.jobs)
    }

    fn boot_dir(&self) -> PathBuf {
        self.build_dir.join("arch").join(&self.toolchain.arch).join("boot")
    }

    fn ensure_build_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.build_dir)
            .with_context(|| format!("Failed to create {}", self.build_dir.display()))
    }
}

impl KernelBuild for MakeInvoker {
    fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn config_path(&self) -> PathBuf {
        self.build_dir.join(".config")
    }

    fn clean(&self) -> Result<()> {
        if !self.build_dir.exists() {
            return Ok(());
        }
        self.make()
            .arg("mrproper")
            .label("make mrproper")
            .run()?;
        Ok(())
    }

    fn seed_default_config(&self, profile: &str) -> Result<()> {
        self.ensure_build_dir()?;
        self.make()
            .arg(profile)
            .label(format!("make {}", profile))
            .run()?;
        Ok(())
    }

    fn reconcile_config(&self) -> Result<()> {
        self.make()
            .arg("olddefconfig")
            .label("make olddefconfig")
            .run()?;
        Ok(())
    }

    fn build_artifacts(&self) -> Result<()> {
        self.ensure_build_dir()?;
        self.make()
            .args([self.jobs_arg().as_str(), "Image", "modules", "dtbs"])
            .label("Kernel build")
            .run_interactive()?;
        Ok(())
    }

    fn artifacts(&self) -> Result<KernelArtifacts> {
        let boot = self.boot_dir();
        let image = boot.join("Image");
        if !image.is_file() {
            bail!(
                "Kernel image not found at {}. Did the build finish?",
                image.display()
            );
        }

        let dts = boot.join("dts");
        let mut dtbs = Vec::new();
        let mut overlays = Vec::new();

        for entry in walkdir::WalkDir::new(&dts).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    tracing::warn!("No device-tree output at {}: {}", dts.display(), e);
                    break;
                }
                Err(e) => return Err(e).context("Failed to scan device-tree outputs"),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let in_overlays = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n == "overlays")
                .unwrap_or(false);
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

            if in_overlays && (ext == "dtbo" || OVERLAY_EXTRAS.contains(&name)) {
                overlays.push(path.to_path_buf());
            } else if !in_overlays && ext == "dtb" {
                dtbs.push(path.to_path_buf());
            }
        }

        Ok(KernelArtifacts {
            image,
            dtbs,
            overlays,
        })
    }

    fn install_modules(&self, prefix: &Path) -> Result<()> {
        self.make()
            .arg(format!("INSTALL_MOD_PATH={}", prefix.display()))
            .arg("modules_install")
            .label("Module install")
            .run_interactive()?;
        Ok(())
    }

    fn kernel_release(&self) -> Result<String> {
        let result = self
            .make()
            .args(["-s", "kernelrelease"])
            .label("make kernelrelease")
            .run()?;
        let release = result.stdout_trimmed();
        if release.is_empty() {
            bail!("make kernelrelease printed nothing");
        }
        Ok(release.to_string())
    }

    fn build_external_module(&self, module_dir: &Path) -> Result<()> {
        let name = module_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| module_dir.display().to_string());
        self.make()
            .arg(self.jobs_arg())
            .arg(format!("M={}", module_dir.display()))
            .arg("modules")
            .label(format!("Module build '{}'", name))
            .run_interactive()?;
        Ok(())
    }
}
