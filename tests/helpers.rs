//! Shared test utilities for pikernel tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use pikernel::config::{Config, RemoteLayout};
use pikernel::context::{Options, PipelineContext};
use pikernel::error::PipelineError;
use pikernel::kconfig;
use pikernel::kernel::{KernelArtifacts, KernelBuild, Toolchain};
use pikernel::package;
use pikernel::remote::{ModuleVersion, RemoteOp, RemoteSession};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Base release the fake kernel reports before any suffix.
pub const BASE_RELEASE: &str = "6.6.51-v8";

/// What the fake default profile writes.
pub const DEFAULT_PROFILE: &str = "CONFIG_ARM64=y\nCONFIG_LOCALVERSION=\"\"\nCONFIG_MODULES=y\n";

/// Temporary project layout.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Project root simulation
    pub base_dir: PathBuf,
    /// Stand-in for the target's filesystem root
    pub remote_root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().join("project");
        let remote_root = temp_dir.path().join("remote");
        fs::create_dir_all(&base_dir).expect("Failed to create project dir");
        fs::create_dir_all(&remote_root).expect("Failed to create remote root");
        Self {
            _temp_dir: temp_dir,
            base_dir,
            remote_root,
        }
    }

    pub fn config(&self) -> Config {
        Config::from_vars(&self.base_dir, &HashMap::new())
    }

    pub fn context(&self, options: Options) -> PipelineContext {
        PipelineContext::new(self.config(), options)
    }

    pub fn kernel(&self) -> FakeKernel {
        FakeKernel::new(&self.config().kernel_build_dir)
    }

    pub fn session(&self) -> LocalSession {
        LocalSession::new(&self.remote_root)
    }

    /// Path on the fake target for an absolute remote path.
    pub fn remote(&self, path: impl AsRef<Path>) -> PathBuf {
        map_remote(&self.remote_root, path.as_ref())
    }

    pub fn custom_dir(&self) -> PathBuf {
        self.config().custom_dir
    }

    /// Create a module source with a build descriptor.
    pub fn add_module_source(&self, name: &str) -> PathBuf {
        let dir = self.custom_dir().join(name);
        fs::create_dir_all(&dir).expect("Failed to create module source");
        fs::write(dir.join("Makefile"), format!("obj-m := {}.o\n", name))
            .expect("Failed to write Makefile");
        fs::write(dir.join(format!("{}.c", name)), "// module\n").expect("Failed to write source");
        dir
    }
}

// =============================================================================
// Fake kernel build
// =============================================================================

/// In-memory stand-in for the kernel build system.
pub struct FakeKernel {
    build_dir: PathBuf,
    toolchain: Toolchain,
    /// Module source names whose build exits non-zero.
    pub failing_modules: Vec<String>,
    calls: RefCell<Vec<String>>,
}

impl FakeKernel {
    pub fn new(build_dir: &Path) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
            toolchain: Toolchain::new("arm64", "aarch64-linux-gnu-"),
            failing_modules: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    fn boot_dir(&self) -> PathBuf {
        self.build_dir.join("arch/arm64/boot")
    }
}

impl KernelBuild for FakeKernel {
    fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn config_path(&self) -> PathBuf {
        self.build_dir.join(".config")
    }

    fn clean(&self) -> Result<()> {
        self.record("clean");
        if self.build_dir.exists() {
            fs::remove_dir_all(&self.build_dir)?;
        }
        Ok(())
    }

    fn seed_default_config(&self, profile: &str) -> Result<()> {
        self.record(format!("seed {}", profile));
        fs::create_dir_all(&self.build_dir)?;
        fs::write(self.config_path(), DEFAULT_PROFILE)?;
        Ok(())
    }

    fn reconcile_config(&self) -> Result<()> {
        self.record("reconcile");
        if !self.config_path().is_file() {
            bail!("no .config to reconcile");
        }
        Ok(())
    }

    fn build_artifacts(&self) -> Result<()> {
        self.record("build");
        let boot = self.boot_dir();
        fs::create_dir_all(boot.join("dts/broadcom"))?;
        fs::create_dir_all(boot.join("dts/overlays"))?;
        fs::write(boot.join("Image"), "arm64 kernel image")?;
        fs::write(boot.join("dts/broadcom/bcm2711-rpi-4-b.dtb"), "dtb 4b")?;
        fs::write(boot.join("dts/broadcom/bcm2711-rpi-400.dtb"), "dtb 400")?;
        fs::write(boot.join("dts/overlays/vc4-kms-v3d.dtbo"), "overlay")?;
        fs::write(boot.join("dts/overlays/README"), "overlay readme")?;
        Ok(())
    }

    fn artifacts(&self) -> Result<KernelArtifacts> {
        let boot = self.boot_dir();
        Ok(KernelArtifacts {
            image: boot.join("Image"),
            dtbs: vec![
                boot.join("dts/broadcom/bcm2711-rpi-4-b.dtb"),
                boot.join("dts/broadcom/bcm2711-rpi-400.dtb"),
            ],
            overlays: vec![
                boot.join("dts/overlays/README"),
                boot.join("dts/overlays/vc4-kms-v3d.dtbo"),
            ],
        })
    }

    fn install_modules(&self, prefix: &Path) -> Result<()> {
        self.record(format!("install_modules {}", prefix.display()));
        let release = self.kernel_release()?;
        let dir = prefix.join("lib/modules").join(&release);
        fs::create_dir_all(dir.join("kernel/drivers/net"))?;
        fs::write(dir.join("kernel/drivers/net/brcmfmac.ko"), "in-tree module")?;
        fs::write(dir.join("modules.order"), "kernel/drivers/net/brcmfmac.ko\n")?;
        std::os::unix::fs::symlink(&self.build_dir, dir.join("build"))?;
        Ok(())
    }

    fn kernel_release(&self) -> Result<String> {
        let config = fs::read_to_string(self.config_path())?;
        let suffix = kconfig::localversion(&config).unwrap_or_default();
        Ok(format!("{}{}", BASE_RELEASE, suffix))
    }

    fn build_external_module(&self, module_dir: &Path) -> Result<()> {
        let name = module_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("module {}", name));
        if self.failing_modules.contains(&name) {
            return Err(PipelineError::ExternalTool {
                program: format!("Module build '{}'", name),
                code: 2,
                stderr: "error: implicit declaration".to_string(),
            }
            .into());
        }
        fs::write(module_dir.join(format!("{}.ko", name)), format!("{} module", name))?;
        Ok(())
    }
}

// =============================================================================
// Local remote session
// =============================================================================

/// Executes remote ops against a local directory standing in for `/`.
pub struct LocalSession {
    root: PathBuf,
    pub uploads: Vec<(PathBuf, PathBuf)>,
    pub ops: Vec<RemoteOp>,
    pub depmods: Vec<String>,
    pub fail_on: Option<fn(&RemoteOp) -> bool>,
}

fn map_remote(root: &Path, remote: &Path) -> PathBuf {
    root.join(remote.strip_prefix("/").unwrap_or(remote))
}

impl LocalSession {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            uploads: Vec::new(),
            ops: Vec::new(),
            depmods: Vec::new(),
            fail_on: None,
        }
    }

    fn local(&self, remote: &Path) -> PathBuf {
        map_remote(&self.root, remote)
    }
}

impl RemoteSession for LocalSession {
    fn upload(&mut self, local: &Path, remote: &Path) -> Result<()> {
        let dest = self.local(remote);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &dest)?;
        self.uploads.push((local.to_path_buf(), remote.to_path_buf()));
        Ok(())
    }

    fn run(&mut self, op: &RemoteOp) -> Result<()> {
        self.ops.push(op.clone());
        if self.fail_on.map(|f| f(op)).unwrap_or(false) {
            bail!("simulated remote failure: {}", op.describe());
        }
        match op {
            RemoteOp::RemoveDir(p) => {
                let p = self.local(p);
                if p.exists() {
                    fs::remove_dir_all(p)?;
                }
            }
            RemoteOp::RemoveFile(p) => {
                let p = self.local(p);
                if p.exists() {
                    fs::remove_file(p)?;
                }
            }
            RemoteOp::CreateDir(p) => fs::create_dir_all(self.local(p))?,
            RemoteOp::Extract { archive, dest } => {
                package::extract_archive(&self.local(archive), &self.local(dest))?
            }
            RemoteOp::CopyTree { from, to } => copy_tree(&self.local(from), &self.local(to))?,
            RemoteOp::MakeReadable(p) => {
                for entry in WalkDir::new(self.local(p)) {
                    let entry = entry?;
                    let md = entry.metadata()?;
                    let mut mode = md.permissions().mode() | 0o444;
                    if md.is_dir() || mode & 0o111 != 0 {
                        mode |= 0o111;
                    }
                    fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))?;
                }
            }
            RemoteOp::Depmod { release } => self.depmods.push(release.clone()),
        }
        Ok(())
    }

    fn list_module_versions(&mut self, modules_root: &Path) -> Result<Vec<ModuleVersion>> {
        let local = self.local(modules_root);
        if !local.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&local)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let release = entry.file_name().to_string_lossy().into_owned();
                versions.push(ModuleVersion {
                    path: modules_root.join(&release),
                    release,
                });
            }
        }
        versions.sort_by(|a, b| a.release.cmp(&b.release));
        Ok(versions)
    }
}

/// `cp -r from/. to`
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from)?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_symlink() {
            let _ = fs::remove_file(&dest);
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

// =============================================================================
// Assertions
// =============================================================================

/// Relative path -> contents for every file under `root` (directories as `None`).
pub fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    let mut out = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.expect("Failed to walk tree");
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let content = if entry.file_type().is_file() {
            Some(fs::read(entry.path()).expect("Failed to read file"))
        } else {
            None
        };
        out.insert(rel, content);
    }
    out
}

pub fn remote_layout() -> RemoteLayout {
    RemoteLayout::default()
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a path does not exist.
pub fn assert_absent(path: &Path) {
    assert!(
        !path.exists() && !path.is_symlink(),
        "Expected path to be absent: {}",
        path.display()
    );
}

/// Assert that a directory exists.
pub fn assert_dir_exists(path: &Path) {
    assert!(path.is_dir(), "Expected directory to exist: {}", path.display());
}
