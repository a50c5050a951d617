//! Preflight checks: verify host tools before any build or deploy step.

use anyhow::Result;

use crate::config::Config;
use crate::error::PipelineError;

/// Outcome of one host check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

/// `Fail` blocks the run; `Warn` is printed and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
}

impl CheckResult {
    fn with(status: CheckStatus, name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: Some(details.to_string()),
        }
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::with(CheckStatus::Pass, name, details)
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::with(CheckStatus::Fail, name, details)
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::with(CheckStatus::Warn, name, details)
    }
}

/// What the upcoming run needs from the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct Needs {
    pub build: bool,
    pub deploy: bool,
    pub password: bool,
}

/// Every check run for one invocation, in order.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn print(&self) {
        println!("=== Host preflight ===\n");

        for check in &self.checks {
            let (icon, status_str) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
            };

            print!("  {} [{}] {}", icon, status_str, check.name);
            match &check.details {
                Some(details) => println!(": {}", details),
                None => println!(),
            }
        }

        println!();
        println!(
            "Summary: {}/{} passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        if self.fail_count() > 0 {
            println!("         {} FAILED", self.fail_count());
        }
        if self.warn_count() > 0 {
            println!("         {} warnings", self.warn_count());
        }
    }

    /// Turn failures into a precondition error.
    pub fn into_result(self) -> Result<()> {
        if self.all_passed() {
            return Ok(());
        }
        let failed: Vec<String> = self
            .checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Fail))
            .map(|c| match &c.details {
                Some(d) => format!("{} ({})", c.name, d),
                None => c.name.clone(),
            })
            .collect();
        Err(PipelineError::precondition(format!("preflight failed: {}", failed.join(", "))).into())
    }
}

fn check_tool(program: &str, why: &str) -> CheckResult {
    match which::which(program) {
        Ok(path) => CheckResult::pass_with(program, &path.display().to_string()),
        Err(_) => CheckResult::fail(program, &format!("not found in PATH ({})", why)),
    }
}

/// Run the checks relevant to `needs`.
pub fn run_checks(config: &Config, needs: Needs) -> PreflightReport {
    let mut checks = Vec::new();

    if needs.build {
        checks.push(if config.has_kernel_source() {
            CheckResult::pass_with("kernel source", &config.kernel_source.display().to_string())
        } else {
            CheckResult::fail(
                "kernel source",
                &format!("no Makefile in {}", config.kernel_source.display()),
            )
        });
        checks.push(check_tool("make", "kernel build"));
        checks.push(check_tool(
            &format!("{}gcc", config.cross_compile),
            "cross compiler",
        ));
        if !config.custom_dir.is_dir() {
            checks.push(CheckResult::warn(
                "custom sources",
                &format!("{} does not exist", config.custom_dir.display()),
            ));
        }
    }

    if needs.deploy {
        checks.push(check_tool("ssh", "remote install"));
        checks.push(check_tool("scp", "archive upload"));
        if needs.password {
            checks.push(check_tool("sshpass", "password authentication"));
        }
    }

    PreflightReport { checks }
}
