// src/builder.rs

//! Wheel to `.conda` conversion
//!
//! [`PackageBuilder::build`] unpacks a wheel into a build directory, writes
//! the `info/` metadata (index, about, link, paths) and packages the tree.
//! Pure wheels become `noarch: python` packages; wheels with platform tags are
//! laid out like a CPython prefix and land in the target subdir.
//!
//! Editable builds point the installed distribution back at a project
//! checkout instead of shipping its code. The importable payload is removed,
//! `direct_url.json` marks the distribution editable and a `.pth` file adds
//! the project to `sys.path`. A PEP 660 editable wheel already carries its own
//! hook, so only `direct_url.json` is added. RECORD rows are dropped or
//! refreshed one at a time; the rest of the file is left as the wheel had it.

use crate::archive::write_conda;
use crate::error::{Error, Result};
use crate::fetch::Artifact;
use crate::install::{Installer, Layout, WheelInstaller};
use crate::manifest::{BuildManifest, METADATA_DIR, RecordFile};
use crate::metadata::{DistMetadata, EntryPoint, ScriptKind, read_entry_points};
use crate::record::{About, LinkJson, NOARCH_SUBDIR, PackageRecord, RecordBuilder};
use crate::tags::TargetEnvironment;
use crate::translate::{Translator, python_constraint};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How the payload relates to the project it came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BuildMode {
    #[default]
    Normal,
    /// Link back to the project checkout at `project`
    Editable { project: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub mode: BuildMode,
    /// Keep the PyPI name for the record instead of its conda alias
    pub skip_name_mapping: bool,
    pub build_number: u64,
}

/// A package written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
    pub path: PathBuf,
    pub record: PackageRecord,
    pub manifest: BuildManifest,
}

/// Converts fetched wheels into conda packages
pub struct PackageBuilder {
    installer: Box<dyn Installer>,
    translator: Translator,
    target: TargetEnvironment,
}

impl PackageBuilder {
    pub fn new(translator: Translator, target: TargetEnvironment) -> Self {
        Self {
            installer: Box::new(WheelInstaller::new()),
            translator,
            target,
        }
    }

    pub fn with_installer(mut self, installer: Box<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    pub fn target(&self) -> &TargetEnvironment {
        &self.target
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Subdir an artifact's package belongs in
    pub fn subdir_for(&self, artifact: &Artifact) -> String {
        if artifact.filename.is_pure() {
            NOARCH_SUBDIR.to_string()
        } else {
            self.target.subdir.clone()
        }
    }

    /// Convert `artifact` in `build_path` and write the archive under
    /// `output_root/<subdir>/`.
    ///
    /// Returns [`Error::ArchiveExists`] when the archive is already there; the
    /// caller decides whether that matters.
    pub fn build(
        &self,
        artifact: &Artifact,
        build_path: &Path,
        output_root: &Path,
        options: &BuildOptions,
    ) -> Result<BuiltPackage> {
        if build_path.exists() && fs::read_dir(build_path)?.next().is_some() {
            return Err(Error::Build(format!(
                "build directory {} is not empty",
                build_path.display()
            )));
        }

        let editable = match &options.mode {
            BuildMode::Editable { project } => Some(EditableSource::new(project)?),
            BuildMode::Normal => None,
        };

        let subdir = self.subdir_for(artifact);
        let noarch = subdir == NOARCH_SUBDIR;
        let layout = if noarch {
            Layout::noarch()
        } else {
            Layout::for_target(&self.target)
        };

        info!("Converting {} {} for {}", artifact.name, artifact.version, subdir);
        let tree = self.installer.unpack(artifact, build_path, &layout)?;
        let meta = DistMetadata::from_dist_info(&tree.dist_info)?;
        let entry_points = read_entry_points(&tree.dist_info)?;

        let editable_url = editable.as_ref().map(|e| e.url.as_str());
        let record = self.package_record(&meta, &entry_points, &subdir, editable_url, options);
        debug!("Record {} depends on {:?}", record.stem(), record.depends);

        let info_dir = build_path.join(METADATA_DIR);
        fs::create_dir_all(&info_dir)?;
        fs::write(info_dir.join("index.json"), record.to_index_json()?)?;
        fs::write(
            info_dir.join("about.json"),
            About::from_metadata(&meta).to_json()?,
        )?;

        let launchers = !noarch && !entry_points.is_empty();
        let mut record_file = if editable.is_some() || launchers {
            Some(RecordFile::read(&tree.dist_info.join("RECORD"))?)
        } else {
            None
        };

        if noarch {
            // conda generates the launchers at link time
            if let Some(link) = LinkJson::for_entry_points(&entry_points) {
                fs::write(info_dir.join("link.json"), link.to_json()?)?;
            }
        } else if launchers && let Some(rows) = record_file.as_mut() {
            self.write_launchers(build_path, &tree.site_packages, &layout, &entry_points, rows)?;
        }

        if let Some(source) = &editable
            && let Some(rows) = record_file.as_mut()
        {
            link_editable(source, &meta, &tree.site_packages, &tree.dist_info, rows)?;
        }

        if let Some(rows) = &record_file {
            rows.save()?;
        }

        // paths.json last, after every file is in place
        let manifest = BuildManifest::scan(build_path)?;
        manifest.write(&info_dir.join("paths.json"))?;

        let path = write_conda(build_path, &output_root.join(&subdir), &record.stem())?;
        Ok(BuiltPackage {
            path,
            record,
            manifest,
        })
    }

    fn package_record(
        &self,
        meta: &DistMetadata,
        entry_points: &[EntryPoint],
        subdir: &str,
        editable_url: Option<&str>,
        options: &BuildOptions,
    ) -> PackageRecord {
        let name = self
            .translator
            .mapping()
            .to_conda_with(&meta.name, options.skip_name_mapping);
        let translation = self.translator.translate(&meta.requires_dist);

        let python = if subdir == NOARCH_SUBDIR {
            python_constraint(meta.requires_python.as_deref())
        } else {
            // Compiled extensions only load in the interpreter they were built for
            format!("python {}.*", self.target.python_short())
        };
        let mut depends = vec![python];
        depends.extend(translation.constraints);

        let mut builder = RecordBuilder::new(name, meta.version.clone())
            .subdir(subdir)
            .depends(depends)
            .extras(translation.extras)
            .entry_points(entry_points)
            .build_number(options.build_number);
        if let Some(license) = meta.license_text() {
            builder = builder.license(license);
        }
        if let Some(url) = editable_url {
            builder = builder.editable(url);
        }
        builder.build()
    }

    /// Launcher scripts for a platform build, which conda will not generate
    fn write_launchers(
        &self,
        build_path: &Path,
        site_packages: &Path,
        layout: &Layout,
        entry_points: &[EntryPoint],
        record: &mut RecordFile,
    ) -> Result<()> {
        if self.target.is_windows() {
            warn!(
                "Not generating {} launcher(s) for {}: Windows launchers are not supported",
                entry_points.len(),
                self.target.subdir
            );
            return Ok(());
        }
        let scripts = build_path.join(&layout.scripts);
        fs::create_dir_all(&scripts)?;
        let up = "../".repeat(Path::new(&layout.site_packages).components().count());

        for entry in entry_points {
            let path = scripts.join(&entry.name);
            fs::write(&path, launcher_script(entry))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            }
            record.refresh(site_packages, &format!("{up}{}/{}", layout.scripts, entry.name))?;
            debug!("Wrote launcher {}", path.display());
        }
        Ok(())
    }
}

fn launcher_script(entry: &EntryPoint) -> String {
    let (module, attr) = entry
        .value
        .split_once(':')
        .map(|(m, a)| (m.trim(), a.trim()))
        .unwrap_or((entry.value.trim(), ""));
    let interpreter = match entry.kind {
        ScriptKind::Console => "python",
        ScriptKind::Gui => "pythonw",
    };
    let (import, call) = match attr.split_once('.') {
        None if attr.is_empty() => (format!("import {module}"), format!("{module}.main")),
        None => (format!("from {module} import {attr}"), attr.to_string()),
        Some((head, _)) => (format!("from {module} import {head}"), attr.to_string()),
    };
    format!(
        "#!/usr/bin/env {interpreter}\n\
         # -*- coding: utf-8 -*-\n\
         import re\n\
         import sys\n\
         {import}\n\
         if __name__ == '__main__':\n\
         \x20   sys.argv[0] = re.sub(r'(-script\\.pyw|\\.exe)?$', '', sys.argv[0])\n\
         \x20   sys.exit({call}())\n"
    )
}

/// Project checkout an editable build points at
#[derive(Debug, Clone)]
struct EditableSource {
    project: PathBuf,
    url: String,
}

impl EditableSource {
    fn new(project: &Path) -> Result<Self> {
        let project = fs::canonicalize(project).map_err(|e| {
            Error::Build(format!("editable project {}: {e}", project.display()))
        })?;
        let url = url::Url::from_file_path(&project)
            .map_err(|_| Error::Build(format!("cannot express {} as a URL", project.display())))?;
        Ok(Self {
            project,
            url: url.to_string(),
        })
    }

    /// Directory the `.pth` file puts on `sys.path`
    fn import_root(&self) -> PathBuf {
        let src = self.project.join("src");
        if src.is_dir() { src } else { self.project.clone() }
    }
}

/// RECORD rows for importable files: inside site-packages, outside dist-info
fn is_payload(path: &str) -> bool {
    let top = path.split('/').next().unwrap_or(path);
    !path.split('/').any(|part| part == "..") && !top.ends_with(".dist-info")
}

/// Top-level import hooks a PEP 660 backend writes instead of the package
fn is_editable_hook(path: &str) -> bool {
    !path.contains('/') && (path.starts_with("__editable__") || path.ends_with(".pth"))
}

/// Replace the payload with a back-pointer to the project checkout
fn link_editable(
    source: &EditableSource,
    meta: &DistMetadata,
    site_packages: &Path,
    dist_info: &Path,
    record: &mut RecordFile,
) -> Result<()> {
    let payload: Vec<&str> = record
        .rows()
        .iter()
        .map(|row| row.path.as_str())
        .filter(|path| is_payload(path))
        .collect();
    let pep660 = !payload.is_empty() && payload.iter().all(|path| is_editable_hook(path));

    if !pep660 {
        let removed = record.remove_where(|row| is_payload(&row.path));
        for row in &removed {
            remove_payload_file(site_packages, &row.path)?;
        }
        debug!("Dropped {} payload file(s) from the editable build", removed.len());
    }

    let direct_url = dist_info.join("direct_url.json");
    let body = json!({"dir_info": {"editable": true}, "url": source.url});
    fs::write(&direct_url, serde_json::to_string(&body)?)?;
    record.refresh(site_packages, &relative_to(site_packages, &direct_url)?)?;

    if !pep660 {
        let pth_name = format!(
            "__editable__.{}-{}.pth",
            meta.name.replace('-', "_"),
            meta.version
        );
        fs::write(
            site_packages.join(&pth_name),
            format!("{}\n", source.import_root().display()),
        )?;
        record.refresh(site_packages, &pth_name)?;
    }

    info!("Linked editable install to {}", source.project.display());
    Ok(())
}

/// Remove one payload file and any directories it leaves empty
fn remove_payload_file(site_packages: &Path, relpath: &str) -> Result<()> {
    let path = site_packages.join(relpath);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == site_packages || fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(())
}

fn relative_to(base: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| Error::Build(format!("{} is outside {}", path.display(), base.display())))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}
