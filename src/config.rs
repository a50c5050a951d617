//! Configuration management for pikernel.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default kernel configuration profile (Raspberry Pi 4, arm64).
pub const DEFAULT_DEFCONFIG: &str = "bcm2711_defconfig";
/// Default toolchain prefix.
pub const DEFAULT_CROSS_COMPILE: &str = "aarch64-linux-gnu-";
/// Default kernel architecture.
pub const DEFAULT_ARCH: &str = "arm64";

/// pikernel configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the kernel source tree (default: linux)
    pub kernel_source: PathBuf,
    /// Out-of-tree build directory passed as `O=` (default: output/kernel-build)
    pub kernel_build_dir: PathBuf,
    /// Custom-sources root: optional `config` file plus module subdirectories
    pub custom_dir: PathBuf,
    /// Staging tree root
    pub staging_dir: PathBuf,
    /// Local deploy archive
    pub archive_path: PathBuf,
    /// Kernel ARCH value
    pub arch: String,
    /// Toolchain triple prefix for CROSS_COMPILE
    pub cross_compile: String,
    /// Named default profile used when no custom config exists
    pub defconfig: String,
    /// Parallel make jobs
    pub jobs: usize,
    /// Remote deploy locations
    pub remote: RemoteLayout,
}

/// Fixed locations on the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    /// Where the archive is uploaded
    pub archive: PathBuf,
    /// Scratch directory the archive is extracted into
    pub staging: PathBuf,
    /// System boot partition
    pub boot_dir: PathBuf,
    /// System module root (`<modules_dir>/<release>`)
    pub modules_dir: PathBuf,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            archive: PathBuf::from("/tmp/kernel-deploy.tar.gz"),
            staging: PathBuf::from("/tmp/kernel-deploy"),
            boot_dir: PathBuf::from("/boot"),
            modules_dir: PathBuf::from("/lib/modules"),
        }
    }
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                env_vars.insert(key, value);
                            }
                            Err(e) => {
                                tracing::warn!("Skipping malformed line in {}: {}", env_path.display(), e)
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("Could not read {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(base_dir, &env_vars)
    }

    /// Build a configuration from an explicit variable map.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let path = |key: &str, default: &str| -> PathBuf {
            let raw = PathBuf::from(vars.get(key).map(String::as_str).unwrap_or(default));
            if raw.is_absolute() {
                raw
            } else {
                base_dir.join(raw)
            }
        };
        let remote_path = |key: &str, default: PathBuf| -> PathBuf {
            vars.get(key).map(PathBuf::from).unwrap_or(default)
        };
        let string = |key: &str, default: &str| -> String {
            vars.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let jobs = vars
            .get("KERNEL_JOBS")
            .and_then(|j| j.parse::<usize>().ok())
            .filter(|j| *j > 0)
            .unwrap_or_else(default_jobs);

        let defaults = RemoteLayout::default();
        let remote = RemoteLayout {
            archive: remote_path("REMOTE_ARCHIVE", defaults.archive),
            staging: remote_path("REMOTE_STAGING", defaults.staging),
            boot_dir: remote_path("REMOTE_BOOT_DIR", defaults.boot_dir),
            modules_dir: remote_path("REMOTE_MODULES_DIR", defaults.modules_dir),
        };

        Self {
            kernel_source: path("KERNEL_SOURCE", "linux"),
            kernel_build_dir: path("KERNEL_BUILD_DIR", "output/kernel-build"),
            custom_dir: path("CUSTOM_DIR", "custom"),
            staging_dir: path("STAGING_DIR", "output/staging"),
            archive_path: path("ARCHIVE_PATH", "output/kernel-deploy.tar.gz"),
            arch: string("KERNEL_ARCH", DEFAULT_ARCH),
            cross_compile: string("CROSS_COMPILE", DEFAULT_CROSS_COMPILE),
            defconfig: string("DEFCONFIG", DEFAULT_DEFCONFIG),
            jobs,
            remote,
        }
    }

    /// Custom kernel configuration override, if the operator supplied one.
    pub fn custom_config(&self) -> Option<PathBuf> {
        let path = self.custom_dir.join("config");
        path.is_file().then_some(path)
    }

    /// Check if the kernel source is available.
    pub fn has_kernel_source(&self) -> bool {
        self.kernel_source.join("Makefile").exists()
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  KERNEL_SOURCE: {}", self.kernel_source.display());
        println!("  KERNEL_BUILD_DIR: {}", self.kernel_build_dir.display());
        println!("  CUSTOM_DIR: {}", self.custom_dir.display());
        println!("  STAGING_DIR: {}", self.staging_dir.display());
        println!("  ARCHIVE_PATH: {}", self.archive_path.display());
        println!("  KERNEL_ARCH: {}", self.arch);
        println!("  CROSS_COMPILE: {}", self.cross_compile);
        println!("  DEFCONFIG: {}", self.defconfig);
        println!("  KERNEL_JOBS: {}", self.jobs);
        println!("  REMOTE_ARCHIVE: {}", self.remote.archive.display());
        println!("  REMOTE_STAGING: {}", self.remote.staging.display());
        println!("  REMOTE_BOOT_DIR: {}", self.remote.boot_dir.display());
        println!("  REMOTE_MODULES_DIR: {}", self.remote.modules_dir.display());
        if self.has_kernel_source() {
            println!("  Kernel source: FOUND");
        } else {
            println!("  Kernel source: NOT FOUND");
        }
        match self.custom_config() {
            Some(path) => println!("  Custom config: {}", path.display()),
            None => println!("  Custom config: none (using {})", self.defconfig),
        }
    }
}

fn default_jobs() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            tracing::warn!("Could not detect CPU count ({}), using 4 jobs", e);
            4
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_resolve_against_base_dir() {
        let base = Path::new("/work");
        let config = Config::from_vars(base, &HashMap::new());

        assert_eq!(config.kernel_source, PathBuf::from("/work/linux"));
        assert_eq!(config.staging_dir, PathBuf::from("/work/output/staging"));
        assert_eq!(
            config.archive_path,
            PathBuf::from("/work/output/kernel-deploy.tar.gz")
        );
        assert_eq!(config.arch, "arm64");
        assert_eq!(config.cross_compile, "aarch64-linux-gnu-");
        assert_eq!(config.defconfig, "bcm2711_defconfig");
        assert!(config.jobs > 0);
        assert_eq!(config.remote, RemoteLayout::default());
    }

    #[test]
    fn test_overrides() {
        let mut vars = HashMap::new();
        vars.insert("KERNEL_SOURCE".to_string(), "/src/rpi-linux".to_string());
        vars.insert("DEFCONFIG".to_string(), "bcm2712_defconfig".to_string());
        vars.insert("KERNEL_JOBS".to_string(), "3".to_string());
        vars.insert("REMOTE_BOOT_DIR".to_string(), "/boot/firmware".to_string());

        let config = Config::from_vars(Path::new("/work"), &vars);

        assert_eq!(config.kernel_source, PathBuf::from("/src/rpi-linux"));
        assert_eq!(config.defconfig, "bcm2712_defconfig");
        assert_eq!(config.jobs, 3);
        assert_eq!(config.remote.boot_dir, PathBuf::from("/boot/firmware"));
    }

    #[test]
    fn test_invalid_jobs_falls_back() {
        let mut vars = HashMap::new();
        vars.insert("KERNEL_JOBS".to_string(), "0".to_string());
        let config = Config::from_vars(Path::new("/work"), &vars);
        assert!(config.jobs > 0);
    }

    #[test]
    fn test_custom_config_detection() {
        let temp = TempDir::new().unwrap();
        let config = Config::from_vars(temp.path(), &HashMap::new());
        assert!(config.custom_config().is_none());

        fs::create_dir_all(temp.path().join("custom")).unwrap();
        fs::write(temp.path().join("custom/config"), "CONFIG_FOO=y\n").unwrap();
        assert_eq!(
            config.custom_config(),
            Some(temp.path().join("custom/config"))
        );
    }

    #[test]
    #[serial_test::serial]
    fn test_load_reads_dotenv() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(".env"),
            "# comment\nPIKERNEL_UNUSED=1\nCUSTOM_DIR=\"my-custom\"\n",
        )
        .unwrap();

        let config = Config::load(temp.path());
        if std::env::var_os("CUSTOM_DIR").is_none() {
            assert_eq!(config.custom_dir, temp.path().join("my-custom"));
        }
    }
}
