//! OpenSSH-backed remote session.
//!
//! All commands share one control connection, so the target authenticates
//! once per deployment. Passwords travel through `SSHPASS` and sudo's stdin,
//! never through argv.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{parse_module_versions, DeployTarget, ModuleVersion, RemoteOp, RemoteSession};
use crate::process::Cmd;

pub struct SshSession {
    target: DeployTarget,
    control_path: PathBuf,
    /// Set once a command may have started the control master.
    connected: bool,
}

impl SshSession {
    pub fn new(target: DeployTarget) -> Self {
        let control_path =
            std::env::temp_dir().join(format!("pikernel-{}-%C", std::process::id()));
        Self {
            target,
            control_path,
            connected: false,
        }
    }

    pub fn target(&self) -> &DeployTarget {
        &self.target
    }

    fn ssh_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "ControlPersist=60".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ]
    }

    /// `program` wrapped in `sshpass -e` when a password was given.
    fn transport(&self, program: &str) -> Cmd {
        let cmd = match &self.target.password {
            Some(password) => Cmd::new("sshpass")
                .env("SSHPASS", password)
                .args(["-e", program]),
            None => Cmd::new(program).arg("-o").arg("BatchMode=yes"),
        };
        cmd.args(self.ssh_options())
    }

    fn ssh(&self, remote_command: &str) -> Cmd {
        self.transport("ssh")
            .arg(self.target.destination())
            .arg("--")
            .arg(remote_command)
    }

    /// Wrap `script` so it runs with root privileges on the target.
    fn privileged(&self, script: &str) -> Result<String> {
        let script = quote(script)?;
        Ok(if self.target.is_root() {
            format!("sh -c {}", script)
        } else if self.target.password.is_some() {
            format!("sudo -S -p '' sh -c {}", script)
        } else {
            format!("sudo -n sh -c {}", script)
        })
    }
}

impl RemoteSession for SshSession {
    fn upload(&mut self, local: &Path, remote: &Path) -> Result<()> {
        self.connected = true;
        self.transport("scp")
            .arg_path(local)
            .arg(format!("{}:{}", self.target.destination(), remote.display()))
            .label(format!("scp to {}", self.target))
            .run()?;
        Ok(())
    }

    fn run(&mut self, op: &RemoteOp) -> Result<()> {
        self.connected = true;
        let command = self.privileged(&render(op)?)?;
        let mut cmd = self.ssh(&command).label(format!("remote '{}'", op.describe()));
        if let (false, Some(password)) = (self.target.is_root(), &self.target.password) {
            cmd = cmd.stdin_data(format!("{}\n", password));
        }
        cmd.run()?;
        Ok(())
    }

    fn list_module_versions(&mut self, modules_root: &Path) -> Result<Vec<ModuleVersion>> {
        self.connected = true;
        let root = quote(&modules_root.to_string_lossy())?;
        let listing = format!(
            "if [ -d {root} ]; then find {root} -mindepth 1 -maxdepth 1 -type d -printf '%f\\n'; fi"
        );
        let result = self
            .ssh(&listing)
            .label(format!("remote listing of {}", modules_root.display()))
            .run()?;
        Ok(parse_module_versions(modules_root, &result.stdout))
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if !self.connected {
            return;
        }
        let closed = self
            .transport("ssh")
            .args(["-O", "exit"])
            .arg(self.target.destination())
            .allow_fail()
            .run();
        if let Err(e) = closed {
            tracing::debug!("closing ssh control connection: {:#}", e);
        }
    }
}

fn quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .with_context(|| format!("Cannot quote '{}' for the remote shell", value))
}

fn quote_path(path: &Path) -> Result<String> {
    quote(&path.to_string_lossy())
}

/// Shell text for one operation, before privilege wrapping.
pub fn render(op: &RemoteOp) -> Result<String> {
    Ok(match op {
        RemoteOp::RemoveDir(p) => format!("rm -rf -- {}", quote_path(p)?),
        RemoteOp::RemoveFile(p) => format!("rm -f -- {}", quote_path(p)?),
        RemoteOp::CreateDir(p) => format!("mkdir -p -- {}", quote_path(p)?),
        RemoteOp::Extract { archive, dest } => {
            let dest = quote_path(dest)?;
            format!(
                "mkdir -p -- {dest} && tar -xzf {} -C {dest}",
                quote_path(archive)?
            )
        }
        RemoteOp::CopyTree { from, to } => format!(
            "cp -r -- {} {}",
            quote_path(&from.join("."))?,
            quote_path(to)?
        ),
        RemoteOp::MakeReadable(p) => format!("chmod -R a+rX -- {}", quote_path(p)?),
        RemoteOp::Depmod { release } => format!("depmod -a {}", quote(release)?),
    })
}
