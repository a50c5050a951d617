//! pikernel - cross-build, stage and deploy a Raspberry Pi arm64 kernel.
//!
//! Builds the kernel with the configured cross toolchain, assembles
//! `boot/` and `lib/modules/` in a local staging tree, optionally adds
//! out-of-tree modules, and installs everything on a target over SSH.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pikernel::config::Config;
use pikernel::context::{Options, PipelineContext};
use pikernel::error::PipelineError;
use pikernel::kernel::MakeInvoker;
use pikernel::pipeline;
use pikernel::preflight::{self, Needs};
use pikernel::remote::{DeployTarget, RemoteSession, SshSession};

#[derive(Parser)]
#[command(name = "pikernel")]
#[command(about = "Cross-build a Raspberry Pi kernel and deploy it over SSH")]
#[command(disable_version_flag = true)]
#[command(
    after_help = "EXAMPLES:\n  pikernel --clean                         Fresh build into the staging tree\n  pikernel --module --version -lab         Build with custom modules and a release suffix\n  pikernel --deploy pi@raspberrypi.local   Build and install on the target\n  pikernel --no-build --deploy pi@host     Install the existing staging tree"
)]
struct Cli {
    /// Reset kernel build state before configuring
    #[arg(long)]
    clean: bool,

    /// Build out-of-tree modules found under the custom sources directory
    #[arg(long)]
    module: bool,

    /// Kernel release suffix (written as CONFIG_LOCALVERSION)
    #[arg(long, value_name = "STRING", allow_hyphen_values = true)]
    version: Option<String>,

    /// Install on a target: user[:password]@host
    #[arg(long, value_name = "USER[:PASSWORD]@HOST")]
    deploy: Option<String>,

    /// Skip configure/build and deploy the existing staging tree
    #[arg(long, requires = "deploy", conflicts_with_all = ["clean", "module", "version"])]
    no_build: bool,

    /// Check host tools and exit
    #[arg(long)]
    preflight: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pikernel=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(PipelineError::classify(&e).exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = Config::load(&base_dir);

    if cli.show_config {
        config.print();
        return Ok(());
    }

    let deploy = cli
        .deploy
        .as_deref()
        .map(str::parse::<DeployTarget>)
        .transpose()?;

    let options = Options {
        build: !cli.no_build,
        clean: cli.clean,
        modules: cli.module,
        version_suffix: cli.version,
        deploy,
    };

    let needs = Needs {
        build: options.build,
        deploy: options.deploy.is_some(),
        password: options
            .deploy
            .as_ref()
            .map(|t| t.password.is_some())
            .unwrap_or(false),
    };
    let report = preflight::run_checks(&config, needs);
    if cli.preflight {
        report.print();
        return report.into_result();
    }
    if !report.all_passed() {
        report.print();
    }
    report.into_result()?;

    let ctx = PipelineContext::new(config, options);
    let kernel = MakeInvoker::new(
        &ctx.config.kernel_source,
        &ctx.config.kernel_build_dir,
        ctx.toolchain(),
        ctx.config.jobs,
    );
    let mut session = ctx.options.deploy.clone().map(SshSession::new);

    pipeline::run(
        &ctx,
        &kernel,
        session.as_mut().map(|s| s as &mut dyn RemoteSession),
    )
}
