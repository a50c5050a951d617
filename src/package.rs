//! Staging tree packaging.
//!
//! The whole tree goes into one gzip-compressed tarball with paths relative
//! to the staging root (`boot/...`, `lib/...`), which the target unpacks with
//! a plain `tar -xzf`.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::staging::StagingTree;

/// Archive `staging` into `archive`. Entries are sorted and carry zeroed
/// ownership and timestamps so identical trees give identical archives.
pub fn create_archive(staging: &StagingTree, archive: &Path) -> Result<u64> {
    let root = staging.root();
    if !staging.exists() {
        return Err(PipelineError::precondition(format!(
            "staging tree {} does not exist; build the kernel first",
            root.display()
        ))
        .into());
    }

    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = File::create(archive)
        .with_context(|| format!("Failed to create {}", archive.display()))?;
    let mut builder = Builder::new(GzEncoder::new(out, Compression::default()));

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry =
            entry.with_context(|| format!("Failed to walk staging tree {}", root.display()))?;
        if entry.path() != root {
            entries.push(entry.into_path());
        }
    }
    entries.sort();

    let mut count = 0u64;
    for path in entries {
        let rel = path
            .strip_prefix(root)
            .with_context(|| format!("{} is outside the staging tree", path.display()))?
            .to_path_buf();
        let md = fs::symlink_metadata(&path)?;
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(mode_of(&md));

        if md.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, &rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &rel, &target)?;
        } else if md.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            let mut f = File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            builder.append_data(&mut header, &rel, &mut f)?;
        } else {
            tracing::warn!("Skipping special file {}", path.display());
            continue;
        }
        count += 1;
    }

    let encoder = builder
        .into_inner()
        .context("Failed to finalize archive")?;
    encoder.finish().context("Failed to flush archive")?;
    Ok(count)
}

/// Unpack an archive made by [`create_archive`] into `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let f = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    fs::create_dir_all(dest)?;
    Archive::new(GzDecoder::new(f))
        .unpack(dest)
        .with_context(|| format!("Failed to unpack {}", archive.display()))
}

#[cfg(unix)]
fn mode_of(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(md: &fs::Metadata) -> u32 {
    if md.is_dir() {
        0o755
    } else {
        0o644
    }
}
