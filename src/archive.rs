// src/archive.rs

//! `.conda` archive codec
//!
//! A `.conda` file is an uncompressed zip with three members:
//! - `metadata.json`: `{"conda_pkg_format_version": 2}`
//! - `pkg-<stem>.tar.zst`: the payload (everything except `info/`)
//! - `info-<stem>.tar.zst`: the `info/` metadata directory
//!
//! Tar members are written in sorted order with a fixed mtime, uid/gid 0 and
//! empty owner names, so the same tree always produces the same bytes.

use crate::error::{Error, Result};
use crate::manifest::METADATA_DIR;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// File extension of produced archives
pub const CONDA_EXTENSION: &str = ".conda";

/// Default fixed mtime (2024-01-01 00:00:00 UTC)
const DEFAULT_MTIME: u64 = 1704067200;

const ZSTD_LEVEL: i32 = 19;

const FORMAT_METADATA: &str = r#"{"conda_pkg_format_version": 2}"#;

/// mtime applied to every tar member
fn archive_mtime() -> u64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_MTIME)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

/// Which half of the package a tar holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Pkg,
    Info,
}

impl Component {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Pkg => "pkg",
            Self::Info => "info",
        }
    }

    fn includes(&self, rel: &Path) -> bool {
        let in_info = rel.starts_with(METADATA_DIR);
        match self {
            Self::Pkg => !in_info,
            Self::Info => in_info,
        }
    }
}

/// Build one zstd-compressed tar of `root`, filtered to `component`
fn build_tar(root: &Path, component: Component, mtime: u64) -> Result<Vec<u8>> {
    let encoder = zstd::stream::write::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::Build(format!("{} escapes the build root", entry.path().display())))?;
        if !component.includes(rel) {
            continue;
        }
        let name: String = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let file_type = entry.file_type();
        let mut header = tar::Header::new_gnu();
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);

        if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            header.set_cksum();
            tar.append_data(&mut header, format!("{name}/"), io::empty())?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            tar.append_link(&mut header, &name, &target)?;
        } else if file_type.is_file() {
            let metadata = entry.metadata()?;
            let file = File::open(entry.path())?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(file_mode(&metadata));
            header.set_size(metadata.len());
            header.set_cksum();
            tar.append_data(&mut header, &name, file)?;
        } else {
            debug!("Not archiving special file {}", entry.path().display());
        }
    }

    let encoder = tar.into_inner()?;
    Ok(encoder.finish()?)
}

/// Package `root` (payload plus `info/`) as `<output_dir>/<stem>.conda`.
///
/// Fails with [`Error::ArchiveExists`] if that file is already present; the
/// archive is assembled in a temp file beside it and moved into place.
pub fn write_conda(root: &Path, output_dir: &Path, stem: &str) -> Result<PathBuf> {
    let target = output_dir.join(format!("{stem}{CONDA_EXTENSION}"));
    if target.exists() {
        return Err(Error::ArchiveExists(target));
    }
    if !root.join(METADATA_DIR).join("index.json").is_file() {
        return Err(Error::Build(format!(
            "{} has no {}/index.json",
            root.display(),
            METADATA_DIR
        )));
    }

    let mtime = archive_mtime();
    let pkg = build_tar(root, Component::Pkg, mtime)?;
    let info_tar = build_tar(root, Component::Info, mtime)?;

    fs::create_dir_all(output_dir)?;
    let temp = NamedTempFile::new_in(output_dir)?;
    {
        let mut zip = ZipWriter::new(temp.as_file());
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);

        zip.start_file("metadata.json", options)?;
        zip.write_all(FORMAT_METADATA.as_bytes())?;

        zip.start_file(format!("{}-{stem}.tar.zst", Component::Pkg.prefix()), options)?;
        zip.write_all(&pkg)?;

        zip.start_file(format!("{}-{stem}.tar.zst", Component::Info.prefix()), options)?;
        zip.write_all(&info_tar)?;

        zip.finish()?;
    }
    temp.as_file().sync_all()?;

    temp.persist_noclobber(&target).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            Error::ArchiveExists(target.clone())
        } else {
            Error::Io(e.error)
        }
    })?;

    info!("Wrote {}", target.display());
    Ok(target)
}

/// Archive stem from a `.conda` path (`foo-1.0-pypi_x_0.conda` -> `foo-1.0-pypi_x_0`)
pub fn stem_of(path: &Path) -> Option<String> {
    path.file_name()?
        .to_str()?
        .strip_suffix(CONDA_EXTENSION)
        .map(str::to_string)
}

/// Decompressed tar of one component of an archive
fn component_tar(path: &Path, component: Component) -> Result<tar::Archive<Cursor<Vec<u8>>>> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(file)?;
    let prefix = format!("{}-", component.prefix());
    let member = zip
        .file_names()
        .find(|name| name.starts_with(&prefix) && name.ends_with(".tar.zst"))
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Index(format!("{} has no {} member", path.display(), component.prefix()))
        })?;
    let mut compressed = Vec::new();
    zip.by_name(&member)?.read_to_end(&mut compressed)?;
    let tar = zstd::stream::decode_all(compressed.as_slice())?;
    Ok(tar::Archive::new(Cursor::new(tar)))
}

/// Read one file from the archive's `info/` tar
pub fn read_info_file(path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let wanted = format!("{METADATA_DIR}/{name}");
    let mut tar = component_tar(path, Component::Info)?;
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == wanted {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}

/// The raw `info/index.json` object of an archive
pub fn read_index_json(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
    let data = read_info_file(path, "index.json")?
        .ok_or_else(|| Error::Index(format!("{} has no info/index.json", path.display())))?;
    match serde_json::from_slice(&data)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(Error::Index(format!(
            "info/index.json in {} is not an object",
            path.display()
        ))),
    }
}

/// Unpack both halves of an archive under `dest`
pub fn extract_conda(path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for component in [Component::Pkg, Component::Info] {
        component_tar(path, component)?.unpack(dest)?;
    }
    Ok(())
}
