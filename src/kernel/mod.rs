//! Cross-build invoker: the seam between pikernel and the kernel's own build
//! system.
//!
//! [`KernelBuild`] is the fixed argument contract the rest of the pipeline
//! relies on. [`make::MakeInvoker`] drives a real kernel tree with `make`;
//! tests substitute a fake that writes artifacts into a temp tree.

pub mod make;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub use make::MakeInvoker;

/// Architecture and toolchain the kernel is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Kernel ARCH (e.g. "arm64")
    pub arch: String,
    /// CROSS_COMPILE prefix (e.g. "aarch64-linux-gnu-")
    pub triple: String,
}

impl Toolchain {
    pub fn new(arch: impl Into<String>, triple: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            triple: triple.into(),
        }
    }

    /// The C compiler the triple resolves to.
    pub fn gcc(&self) -> String {
        format!("{}gcc", self.triple)
    }
}

/// Build outputs the staging assembler copies into `boot/`.
#[derive(Debug, Clone, Default)]
pub struct KernelArtifacts {
    /// Kernel image (installed as `boot/kernel8.img`)
    pub image: PathBuf,
    /// Board device-tree blobs (installed flat into `boot/`)
    pub dtbs: Vec<PathBuf>,
    /// Overlay blobs and the overlay README (installed into `boot/overlays/`)
    pub overlays: Vec<PathBuf>,
}

/// Operations the kernel build system provides.
///
/// Every method blocks until the underlying build step finishes and returns
/// an error if it exited non-zero.
pub trait KernelBuild {
    /// Toolchain every operation is invoked with.
    fn toolchain(&self) -> &Toolchain;

    /// Path of the active configuration file.
    fn config_path(&self) -> PathBuf;

    /// Reset build state to pristine.
    fn clean(&self) -> Result<()>;

    /// Write the named default profile as the active configuration.
    fn seed_default_config(&self, profile: &str) -> Result<()>;

    /// Normalize the active configuration against the source tree's options.
    fn reconcile_config(&self) -> Result<()>;

    /// Build image, modules and device trees.
    fn build_artifacts(&self) -> Result<()>;

    /// Locate the outputs of [`KernelBuild::build_artifacts`].
    fn artifacts(&self) -> Result<KernelArtifacts>;

    /// Install in-tree modules below `prefix` (`<prefix>/lib/modules/<release>`).
    fn install_modules(&self, prefix: &Path) -> Result<()>;

    /// Release string of the configured tree.
    fn kernel_release(&self) -> Result<String>;

    /// Build an out-of-tree module in `module_dir` against the built tree.
    fn build_external_module(&self, module_dir: &Path) -> Result<()>;
}
