//! Remote installation.
//!
//! ```text
//! Idle -> Packaged -> Transferred -> RemoteStaged -> Installed -> CleanedUp
//!   \________\______________\______________\____________> Aborted
//! ```
//!
//! Nothing is retried and nothing already applied on the target is rolled
//! back. A re-run starts again from `Idle`; the remote scratch directory is
//! wiped before extraction so leftovers from a failed run never mix in.

use anyhow::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RemoteLayout;
use crate::package;
use crate::remote::{RemoteOp, RemoteSession};
use crate::staging::StagingTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Packaged,
    Transferred,
    RemoteStaged,
    Installed,
    CleanedUp,
    Aborted,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployState::Idle => "idle",
            DeployState::Packaged => "packaged",
            DeployState::Transferred => "transferred",
            DeployState::RemoteStaged => "remote-staged",
            DeployState::Installed => "installed",
            DeployState::CleanedUp => "cleaned-up",
            DeployState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    /// Kernel releases whose modules were installed and indexed.
    pub releases: Vec<String>,
    /// Best-effort cleanup steps that failed.
    pub cleanup_warnings: Vec<String>,
}

/// Drives one deployment through its states.
pub struct Deployer<'a> {
    staging: &'a StagingTree,
    archive: PathBuf,
    layout: &'a RemoteLayout,
    session: &'a mut dyn RemoteSession,
    state: DeployState,
}

impl<'a> Deployer<'a> {
    pub fn new(
        staging: &'a StagingTree,
        archive: &Path,
        layout: &'a RemoteLayout,
        session: &'a mut dyn RemoteSession,
    ) -> Self {
        Self {
            staging,
            archive: archive.to_path_buf(),
            layout,
            session,
            state: DeployState::Idle,
        }
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    fn advance(&mut self, next: DeployState) {
        tracing::debug!("deploy: {} -> {}", self.state, next);
        self.state = next;
    }

    fn abort(&mut self, err: anyhow::Error) -> anyhow::Error {
        tracing::debug!("deploy: {} -> {} ({:#})", self.state, DeployState::Aborted, err);
        self.state = DeployState::Aborted;
        err
    }

    /// Run every step. Errors leave the deployer in [`DeployState::Aborted`].
    pub fn run(&mut self) -> Result<DeployReport> {
        println!("  Packaging {}...", self.staging.root().display());
        match package::create_archive(self.staging, &self.archive) {
            Ok(count) => println!("  Packed {} entries into {}", count, self.archive.display()),
            Err(e) => return Err(self.abort(e)),
        }
        self.advance(DeployState::Packaged);

        println!("  Uploading to {}...", self.layout.archive.display());
        if let Err(e) = self.session.upload(&self.archive, &self.layout.archive) {
            // Local archive stays for diagnostics.
            return Err(self.abort(e));
        }
        self.advance(DeployState::Transferred);

        let mut report = DeployReport::default();
        let installed = self.stage_remote().and_then(|()| self.install(&mut report));
        let warnings = self.cleanup();
        report.cleanup_warnings = warnings;

        match installed {
            Ok(()) => {
                self.advance(DeployState::CleanedUp);
                Ok(report)
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    fn op(&mut self, op: RemoteOp) -> Result<()> {
        println!("  [remote] {}", op.describe());
        self.session.run(&op)
    }

    fn stage_remote(&mut self) -> Result<()> {
        let staging = self.layout.staging.clone();
        self.op(RemoteOp::RemoveDir(staging.clone()))?;
        self.op(RemoteOp::Extract {
            archive: self.layout.archive.clone(),
            dest: staging,
        })?;
        self.advance(DeployState::RemoteStaged);
        Ok(())
    }

    fn install(&mut self, report: &mut DeployReport) -> Result<()> {
        let boot = self.layout.boot_dir.clone();
        self.op(RemoteOp::CreateDir(boot.clone()))?;
        self.op(RemoteOp::CopyTree {
            from: self.layout.staging.join("boot"),
            to: boot.clone(),
        })?;
        self.op(RemoteOp::MakeReadable(boot))?;

        let modules_root = self.layout.staging.join("lib/modules");
        let versions = self.session.list_module_versions(&modules_root)?;
        if versions.is_empty() {
            println!("  No module directories in the archive, kernel-only deployment");
        }
        for version in versions {
            let dest = self.layout.modules_dir.join(&version.release);
            self.op(RemoteOp::CreateDir(dest.clone()))?;
            self.op(RemoteOp::CopyTree {
                from: version.path.clone(),
                to: dest,
            })?;
            self.op(RemoteOp::Depmod {
                release: version.release.clone(),
            })?;
            report.releases.push(version.release);
        }

        self.advance(DeployState::Installed);
        Ok(())
    }

    /// Remove scratch state on both ends. Failures are collected, never
    /// raised, so they cannot replace an earlier error.
    fn cleanup(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        let remote = [
            RemoteOp::RemoveFile(self.layout.archive.clone()),
            RemoteOp::RemoveDir(self.layout.staging.clone()),
        ];
        for op in remote {
            if let Err(e) = self.op(op.clone()) {
                tracing::warn!("cleanup '{}' failed: {:#}", op.describe(), e);
                warnings.push(format!("{}: {:#}", op.describe(), e));
            }
        }

        if self.archive.exists() {
            if let Err(e) = fs::remove_file(&self.archive) {
                tracing::warn!("cleanup of {} failed: {}", self.archive.display(), e);
                warnings.push(format!("remove {}: {}", self.archive.display(), e));
            }
        }

        for warning in &warnings {
            println!("  [WARN] cleanup: {}", warning);
        }
        warnings
    }
}
