//! Staging tree assembly.
//!
//! The staging tree is the handoff between the build and deploy halves:
//!
//! ```text
//! <root>/boot/kernel8.img
//! <root>/boot/*.dtb
//! <root>/boot/overlays/*.dtbo
//! <root>/lib/modules/<release>/...        (in-tree modules)
//! <root>/lib/modules/<release>/extra/*.ko (custom modules)
//! ```
//!
//! The same layout is mirrored on the target, so names here are part of the
//! operator-visible contract.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::kernel::{KernelArtifacts, KernelBuild};

/// Fixed name of the installed kernel image.
pub const KERNEL_IMAGE_NAME: &str = "kernel8.img";

/// Links `modules_install` leaves pointing back at the build host.
const HOST_LINKS: &[&str] = &["build", "source"];

/// The local staging directory tree.
#[derive(Debug, Clone)]
pub struct StagingTree {
    root: PathBuf,
}

impl StagingTree {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.root.join("boot")
    }

    pub fn overlays_dir(&self) -> PathBuf {
        self.boot_dir().join("overlays")
    }

    pub fn modules_root(&self) -> PathBuf {
        self.root.join("lib/modules")
    }

    pub fn release_dir(&self, release: &str) -> PathBuf {
        self.modules_root().join(release)
    }

    pub fn extra_dir(&self, release: &str) -> PathBuf {
        self.release_dir(release).join("extra")
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Ensure the root and `boot/overlays/` exist. Safe to call repeatedly
    /// and before the kernel release is known.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.overlays_dir())
            .with_context(|| format!("Failed to create staging tree at {}", self.root.display()))
    }

    /// Remove the tree and re-create its skeleton.
    pub fn reset(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to remove {}", self.root.display()))?;
        }
        self.init()
    }

    /// Copy image, device trees and overlays into `boot/`, then let the build
    /// system install in-tree modules with this tree as the prefix.
    pub fn install_kernel_outputs(
        &self,
        artifacts: &KernelArtifacts,
        kernel: &dyn KernelBuild,
    ) -> Result<()> {
        self.init()?;
        let boot = self.boot_dir();

        copy_file(&artifacts.image, &boot.join(KERNEL_IMAGE_NAME))?;
        println!("  Installed boot/{}", KERNEL_IMAGE_NAME);

        for dtb in &artifacts.dtbs {
            copy_into(dtb, &boot)?;
        }
        println!("  Installed {} device trees", artifacts.dtbs.len());

        let overlays = self.overlays_dir();
        for overlay in &artifacts.overlays {
            copy_into(overlay, &overlays)?;
        }
        println!("  Installed {} overlays", artifacts.overlays.len());

        println!("  Installing in-tree modules...");
        kernel
            .install_modules(&self.root)
            .context("Failed to install in-tree modules into staging")?;

        self.drop_host_links()?;
        Ok(())
    }

    /// Release directory for `release`, which must already exist.
    pub fn require_release_dir(&self, release: &str) -> Result<PathBuf> {
        let dir = self.release_dir(release);
        if !dir.is_dir() {
            return Err(PipelineError::precondition(format!(
                "kernel release directory {} is missing; install kernel outputs before custom modules",
                dir.display()
            ))
            .into());
        }
        Ok(dir)
    }

    /// Release strings present under `lib/modules/`.
    pub fn releases(&self) -> Result<Vec<String>> {
        let root = self.modules_root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut releases = Vec::new();
        for entry in fs::read_dir(&root)
            .with_context(|| format!("Failed to read {}", root.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                releases.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        releases.sort();
        Ok(releases)
    }

    fn drop_host_links(&self) -> Result<()> {
        for release in self.releases()? {
            let dir = self.release_dir(&release);
            for name in HOST_LINKS {
                let link = dir.join(name);
                if link.is_symlink() {
                    fs::remove_file(&link)
                        .with_context(|| format!("Failed to remove {}", link.display()))?;
                }
            }
        }
        Ok(())
    }
}

/// Copy `src` into directory `dest_dir`, keeping its file name.
pub fn copy_into(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .with_context(|| format!("{} has no file name", src.display()))?;
    let dest = dest_dir.join(name);
    copy_file(src, &dest)?;
    Ok(dest)
}

fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    tracing::debug!("copy {} -> {}", src.display(), dest.display());
    fs::copy(src, dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    Ok(())
}
