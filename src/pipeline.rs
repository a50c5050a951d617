//! End-to-end pipeline: configure, build, stage, build custom modules,
//! deploy. Strictly sequential; each stage finishes before the next starts.
//!
//! No locking is done on the staging tree or the archive. Two concurrent
//! runs against the same paths will race.

use anyhow::{Context, Result};

use crate::context::PipelineContext;
use crate::deploy::{DeployReport, Deployer};
use crate::kconfig;
use crate::kernel::KernelBuild;
use crate::modules::{self, ModuleReport};
use crate::remote::RemoteSession;
use crate::timing::{self, PhaseTime, Timer};

/// What a build pass produced.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub release: Option<String>,
    pub modules: Option<ModuleReport>,
    /// Phases in the order they ran.
    pub phases: Vec<PhaseTime>,
}

/// Configure and build the kernel, then assemble the staging tree.
pub fn build(ctx: &PipelineContext, kernel: &dyn KernelBuild) -> Result<BuildReport> {
    let mut report = BuildReport::default();

    println!("=== Configuring kernel ===");
    let t = Timer::start("Config");
    kconfig::resolve(kernel, &ctx.build_config(), &ctx.config.defconfig)?;
    report.phases.push(t.finish());

    println!("\n=== Building kernel ===");
    let t = Timer::start("Kernel build");
    kernel.build_artifacts()?;
    report.phases.push(t.finish());

    println!("\n=== Staging kernel outputs ===");
    let t = Timer::start("Staging");
    ctx.staging.reset()?;
    let artifacts = kernel.artifacts()?;
    ctx.staging.install_kernel_outputs(&artifacts, kernel)?;
    report.phases.push(t.finish());

    if ctx.options.modules {
        println!("\n=== Building custom modules ===");
        let t = Timer::start("Custom modules");
        let modules = modules::install_custom_modules(kernel, &ctx.staging, &ctx.config.custom_dir)?;
        report.phases.push(t.finish());
        report.release = Some(modules.release.clone());
        report.modules = Some(modules);
    } else {
        report.release = ctx.staging.releases()?.into_iter().next();
    }

    println!(
        "\nStaging tree ready at {} ({} total)",
        ctx.staging.root().display(),
        timing::format_duration(timing::total(&report.phases))
    );
    Ok(report)
}

/// Package the staging tree and install it on the target.
pub fn deploy(ctx: &PipelineContext, session: &mut dyn RemoteSession) -> Result<DeployReport> {
    let target = ctx
        .options
        .deploy
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "target".to_string());
    println!("\n=== Deploying to {} ===", target);
    let t = Timer::start("Deploy");
    let mut deployer = Deployer::new(
        &ctx.staging,
        &ctx.config.archive_path,
        &ctx.config.remote,
        session,
    );
    let report = deployer
        .run()
        .with_context(|| format!("Deployment to {} aborted", target))?;
    t.finish();

    if report.releases.is_empty() {
        println!("Deployed boot files to {}", target);
    } else {
        println!(
            "Deployed boot files and modules for {} to {}",
            report.releases.join(", "),
            target
        );
    }
    Ok(report)
}

/// Run every stage the options ask for.
pub fn run(
    ctx: &PipelineContext,
    kernel: &dyn KernelBuild,
    session: Option<&mut dyn RemoteSession>,
) -> Result<()> {
    if ctx.options.build {
        build(ctx, kernel)?;
    }
    if let Some(session) = session {
        deploy(ctx, session)?;
    }
    Ok(())
}
