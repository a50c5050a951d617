//! Remote execution channel.
//!
//! The installer speaks in discrete [`RemoteOp`]s over a [`RemoteSession`]
//! so each step's result can be inspected on its own and tests can swap in
//! a local double.

pub mod ssh;

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::PipelineError;

pub use ssh::SshSession;

/// `user[:password]@host` as given on the command line.
#[derive(Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub user: String,
    pub password: Option<String>,
    pub host: String,
}

impl DeployTarget {
    /// `user@host`, the form ssh and scp expect.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

impl FromStr for DeployTarget {
    type Err = PipelineError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        // The host never contains '@'; the password might.
        let (creds, host) = spec.rsplit_once('@').ok_or_else(|| {
            PipelineError::usage("deploy target must look like user[:password]@host")
        })?;
        let (user, password) = match creds.split_once(':') {
            Some((user, password)) => (user, Some(password.to_string())),
            None => (creds, None),
        };
        if user.is_empty() || host.is_empty() {
            return Err(PipelineError::usage(
                "deploy target needs both a user and a host",
            ));
        }
        Ok(Self {
            user: user.to_string(),
            password: password.filter(|p| !p.is_empty()),
            host: host.to_string(),
        })
    }
}

// Keep passwords out of logs and error messages.
impl fmt::Debug for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployTarget")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .finish()
    }
}

impl fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

/// One privileged operation on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    /// Recursively remove a directory; absent is fine.
    RemoveDir(PathBuf),
    /// Remove a file; absent is fine.
    RemoveFile(PathBuf),
    /// Create a directory and its parents.
    CreateDir(PathBuf),
    /// Unpack a gzip tarball into `dest`.
    Extract { archive: PathBuf, dest: PathBuf },
    /// Recursively copy the contents of `from` into existing directory `to`.
    CopyTree { from: PathBuf, to: PathBuf },
    /// Grant read access everywhere and traverse on directories (`a+rX`).
    MakeReadable(PathBuf),
    /// Rebuild the module dependency index for one kernel release.
    Depmod { release: String },
}

impl RemoteOp {
    /// Short description for progress output.
    pub fn describe(&self) -> String {
        match self {
            RemoteOp::RemoveDir(p) => format!("remove {}", p.display()),
            RemoteOp::RemoveFile(p) => format!("remove {}", p.display()),
            RemoteOp::CreateDir(p) => format!("create {}", p.display()),
            RemoteOp::Extract { archive, dest } => {
                format!("extract {} into {}", archive.display(), dest.display())
            }
            RemoteOp::CopyTree { from, to } => {
                format!("copy {} to {}", from.display(), to.display())
            }
            RemoteOp::MakeReadable(p) => format!("chmod a+rX {}", p.display()),
            RemoteOp::Depmod { release } => format!("depmod {}", release),
        }
    }
}

/// A module-version directory found on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleVersion {
    pub release: String,
    pub path: PathBuf,
}

/// An authenticated session with the deploy target.
pub trait RemoteSession {
    /// Copy a local file to `remote`.
    fn upload(&mut self, local: &Path, remote: &Path) -> Result<()>;

    /// Execute one operation.
    fn run(&mut self, op: &RemoteOp) -> Result<()>;

    /// Immediate subdirectories of `modules_root`, one per kernel release.
    /// A missing root yields an empty list.
    fn list_module_versions(&mut self, modules_root: &Path) -> Result<Vec<ModuleVersion>>;
}

/// Turn `ls`-style names into [`ModuleVersion`]s below `root`.
pub fn parse_module_versions(root: &Path, listing: &str) -> Vec<ModuleVersion> {
    let mut versions: Vec<ModuleVersion> = listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "." && *l != ".." && !l.contains('/'))
        .map(|release| ModuleVersion {
            release: release.to_string(),
            path: root.join(release),
        })
        .collect();
    versions.sort_by(|a, b| a.release.cmp(&b.release));
    versions.dedup();
    versions
}
