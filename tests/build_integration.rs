// tests/build_integration.rs

//! Wheel-to-archive conversion checked from the outside: what lands in the
//! `.conda` file, and how the repository index sees it.

mod common;

use common::{package_builder, write_tagged_wheel, write_wheel};
use graft::archive::{extract_conda, read_index_json, read_info_file};
use graft::{Artifact, BuildManifest, BuildMode, BuildOptions, Distribution, Error, ProjectBuilder, Repository};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_archive_manifest_matches_extracted_tree() {
    let temp = TempDir::new().unwrap();
    let wheel = write_wheel(
        &temp.path().join("wheels"),
        "demo-package",
        "0.1.0",
        &["requests>=2"],
        &[("demo_package/data/table.csv", "a,b\n1,2\n")],
    );
    let artifact = Artifact::from_wheel(&wheel).unwrap();
    let out = temp.path().join("out");
    let built = package_builder()
        .build(&artifact, &temp.path().join("build"), &out, &BuildOptions::default())
        .unwrap();

    let extracted = temp.path().join("extracted");
    extract_conda(&built.path, &extracted).unwrap();
    assert_eq!(BuildManifest::scan(&extracted).unwrap(), built.manifest);

    let paths_json = read_info_file(&built.path, "paths.json").unwrap().unwrap();
    let from_archive: BuildManifest = serde_json::from_slice(&paths_json).unwrap();
    assert_eq!(from_archive, built.manifest);
    assert!(built.manifest.get("site-packages/demo_package/data/table.csv").is_some());
}

#[test]
fn test_extras_stay_out_of_depends() {
    let temp = TempDir::new().unwrap();
    let wheel = write_wheel(
        &temp.path().join("wheels"),
        "demo-package",
        "0.1.0",
        &[
            "requests>=2",
            "pytest>=7; extra == \"test\"",
            "sphinx; extra == 'docs' and python_version >= \"3\"",
        ],
        &[],
    );
    let artifact = Artifact::from_wheel(&wheel).unwrap();
    let built = package_builder()
        .build(
            &artifact,
            &temp.path().join("build"),
            &temp.path().join("out"),
            &BuildOptions::default(),
        )
        .unwrap();

    let depends = &built.record.depends;
    assert!(depends.iter().any(|d| d.starts_with("requests")));
    assert!(depends.iter().any(|d| d.starts_with("python")));
    assert!(!depends.iter().any(|d| d.starts_with("pytest") || d.starts_with("sphinx")));
    assert!(built.record.extras["test"].iter().any(|d| d.starts_with("pytest")));
    assert!(built.record.extras["docs"].iter().any(|d| d.starts_with("sphinx")));

    let index = read_index_json(&built.path).unwrap();
    assert!(index["extras"]["test"].is_array());
}

#[test]
fn test_rebuild_of_same_wheel_collides() {
    let temp = TempDir::new().unwrap();
    let wheel = write_wheel(&temp.path().join("wheels"), "demo-package", "0.1.0", &[], &[]);
    let artifact = Artifact::from_wheel(&wheel).unwrap();
    let out = temp.path().join("out");
    let builder = package_builder();

    let first = builder
        .build(&artifact, &temp.path().join("build-1"), &out, &BuildOptions::default())
        .unwrap();
    let err = builder
        .build(&artifact, &temp.path().join("build-2"), &out, &BuildOptions::default())
        .unwrap_err();

    match err {
        Error::ArchiveExists(path) => assert_eq!(path, first.path),
        other => panic!("expected ArchiveExists, got {other:?}"),
    }
    let rebuilt = fs::read(temp.path().join("build-2/info/paths.json")).unwrap();
    let published = read_info_file(&first.path, "paths.json").unwrap().unwrap();
    assert_eq!(rebuilt, published);
}

#[test]
fn test_changed_dependencies_publish_alongside() {
    let temp = TempDir::new().unwrap();
    let repo = Repository::new(temp.path().join("repo"));
    let builder = package_builder();

    let old = write_wheel(&temp.path().join("old"), "demo-package", "0.1.0", &["requests"], &[]);
    let new = write_wheel(&temp.path().join("new"), "demo-package", "0.1.0", &["requests", "numpy"], &[]);

    let a = builder
        .build(
            &Artifact::from_wheel(&old).unwrap(),
            &temp.path().join("build-old"),
            repo.root(),
            &BuildOptions::default(),
        )
        .unwrap();
    let b = builder
        .build(
            &Artifact::from_wheel(&new).unwrap(),
            &temp.path().join("build-new"),
            repo.root(),
            &BuildOptions::default(),
        )
        .unwrap();
    assert_ne!(a.path, b.path);
    assert_ne!(a.record.build, b.record.build);

    let counts = repo.rebuild_index().unwrap();
    assert_eq!(counts["noarch"], 2);

    fs::remove_file(&a.path).unwrap();
    let counts = repo.rebuild_index().unwrap();
    assert_eq!(counts["noarch"], 1);
    let repodata = repo.read_repodata("noarch").unwrap();
    let only = b.path.file_name().unwrap().to_str().unwrap();
    assert_eq!(repodata.packages_conda.keys().collect::<Vec<_>>(), vec![only]);

    let channeldata: serde_json::Value =
        serde_json::from_slice(&fs::read(repo.root().join("channeldata.json")).unwrap()).unwrap();
    assert_eq!(channeldata["packages"]["demo-package"]["version"], "0.1.0");
}

#[test]
fn test_editable_archive_points_at_checkout() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("checkout");
    fs::create_dir_all(project.join("src/demo_package")).unwrap();

    let wheel = write_wheel(
        &temp.path().join("wheels"),
        "demo-package",
        "0.1.0",
        &[],
        &[("demo_package/core.py", "def run():\n    pass\n")],
    );
    let options = BuildOptions {
        mode: BuildMode::Editable {
            project: project.clone(),
        },
        ..Default::default()
    };
    let built = package_builder()
        .build(
            &Artifact::from_wheel(&wheel).unwrap(),
            &temp.path().join("build"),
            &temp.path().join("out"),
            &options,
        )
        .unwrap();

    let extracted = temp.path().join("extracted");
    extract_conda(&built.path, &extracted).unwrap();
    let site = extracted.join("site-packages");

    let direct_url: serde_json::Value = serde_json::from_slice(
        &fs::read(site.join("demo_package-0.1.0.dist-info/direct_url.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(direct_url["dir_info"]["editable"], true);
    assert!(direct_url["url"].as_str().unwrap().starts_with("file://"));

    let pth = fs::read_dir(&site)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().is_some_and(|e| e == "pth"))
        .expect("editable build writes a .pth file");
    let contents = fs::read_to_string(&pth).unwrap();
    let source = fs::canonicalize(&project).unwrap().join("src");
    assert_eq!(contents.trim(), source.to_str().unwrap());

    let key = format!("site-packages/{}", pth.file_name().unwrap().to_str().unwrap());
    assert!(built.manifest.get(&key).is_some());

    // Only the pointer ships; the modules come from the checkout
    assert!(!site.join("demo_package").exists());
    assert!(built.manifest.get("site-packages/demo_package/core.py").is_none());
    assert!(built.manifest.get("site-packages/demo_package/__init__.py").is_none());

    // A normal build of the same wheel lands next to it under its own stem
    let normal = package_builder()
        .build(
            &Artifact::from_wheel(&wheel).unwrap(),
            &temp.path().join("build-normal"),
            &temp.path().join("out"),
            &BuildOptions::default(),
        )
        .unwrap();
    assert_ne!(normal.path, built.path);
}

#[test]
fn test_platform_wheel_lands_in_target_subdir() {
    let temp = TempDir::new().unwrap();
    let wheel = write_tagged_wheel(
        &temp.path().join("wheels"),
        "fastcore-ext",
        "2.0.0",
        "cp312-cp312-manylinux_2_17_x86_64",
        &[],
        &[],
    );
    let repo = Repository::new(temp.path().join("repo"));
    let built = package_builder()
        .build(
            &Artifact::from_wheel(&wheel).unwrap(),
            &temp.path().join("build"),
            repo.root(),
            &BuildOptions::default(),
        )
        .unwrap();

    assert!(built.path.starts_with(repo.subdir_path("linux-64")));
    assert_eq!(built.record.subdir, "linux-64");
    assert!(built.record.noarch.is_empty());
    assert!(built.record.depends.contains(&"python 3.12.*".to_string()));

    let counts = repo.rebuild_index().unwrap();
    assert_eq!(counts["linux-64"], 1);
    assert_eq!(counts["noarch"], 0);
}

#[cfg(unix)]
#[test]
fn test_project_checkout_converts_editable() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let project = temp.path().join("checkout");
    fs::create_dir_all(project.join("demo_package")).unwrap();
    fs::write(project.join("pyproject.toml"), "[project]\nname = \"demo-package\"\n").unwrap();
    let wheel = write_wheel(
        &temp.path().join("prebuilt"),
        "demo-package",
        "0.1.0",
        &["requests>=2"],
        &[],
    );

    // Stands in for the interpreter: drops the prebuilt wheel into the output directory
    let python = temp.path().join("python");
    fs::write(
        &python,
        format!("#!/bin/sh\nfor last; do :; done\ncp '{}' \"$last/\"\n", wheel.display()),
    )
    .unwrap();
    fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).unwrap();

    let artifact = ProjectBuilder::new(&python)
        .build(&project, Distribution::Editable, &temp.path().join("dist"))
        .unwrap();
    assert!(artifact.path.starts_with(temp.path().join("dist")));

    let options = BuildOptions {
        mode: BuildMode::Editable {
            project: project.clone(),
        },
        ..Default::default()
    };
    let built = package_builder()
        .build(&artifact, &temp.path().join("build"), &temp.path().join("out"), &options)
        .unwrap();

    assert_eq!(built.record.name, "demo-package");
    assert!(built.record.depends.iter().any(|d| d.starts_with("requests")));
    assert!(built.manifest.get("site-packages/demo_package/__init__.py").is_none());
    assert!(built.manifest.get("site-packages/__editable__.demo_package-0.1.0.pth").is_some());
}
