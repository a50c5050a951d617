//! Pipeline context shared across every stage.
//!
//! Resolved configuration, the operator's choices and the staging tree
//! travel together in one value instead of ambient state, so each stage can
//! be driven on its own in tests.

use crate::config::Config;
use crate::kconfig::BuildConfig;
use crate::kernel::Toolchain;
use crate::remote::DeployTarget;
use crate::staging::StagingTree;

/// What the operator asked for on the command line.
#[derive(Debug, Clone)]
pub struct Options {
    /// Configure and build the kernel (false: deploy an existing staging tree).
    pub build: bool,
    /// Reset kernel build state first.
    pub clean: bool,
    /// Build out-of-tree modules from the custom-sources root.
    pub modules: bool,
    /// Kernel release suffix.
    pub version_suffix: Option<String>,
    /// Deploy target, if deploying.
    pub deploy: Option<DeployTarget>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            build: true,
            clean: false,
            modules: false,
            version_suffix: None,
            deploy: None,
        }
    }
}

/// Shared context for one pipeline invocation.
pub struct PipelineContext {
    pub config: Config,
    pub options: Options,
    pub staging: StagingTree,
}

impl PipelineContext {
    pub fn new(config: Config, options: Options) -> Self {
        let staging = StagingTree::new(&config.staging_dir);
        Self {
            config,
            options,
            staging,
        }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::new(&self.config.arch, &self.config.cross_compile)
    }

    /// Configuration choices handed to the resolver.
    pub fn build_config(&self) -> BuildConfig {
        BuildConfig {
            clean: self.options.clean,
            custom_config: self.config.custom_config(),
            version_suffix: self.options.version_suffix.clone(),
        }
    }
}
