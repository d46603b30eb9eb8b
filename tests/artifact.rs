// tests/artifact.rs

//! Artifact tests: permissions, symlinks, deltas packaged end to end.

mod common;

use common::{MockBackend, pkg, write_file};
use kiln::PackageArtifact;
use kiln::artifact::{DeltaFilter, extract_from_delta};
use kiln::compression::CompressionType;
use kiln::delta::compute_delta;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn mode(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[test]
fn test_keep_perms_round_trip() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "usr/bin/tool", "#!/bin/sh\n");
    write_file(src.path(), "etc/secret", "token\n");
    fs::set_permissions(src.path().join("usr/bin/tool"), fs::Permissions::from_mode(0o750)).unwrap();
    fs::set_permissions(src.path().join("etc/secret"), fs::Permissions::from_mode(0o600)).unwrap();

    let out = tempfile::tempdir().unwrap();
    let mut artifact =
        PackageArtifact::for_package(out.path(), &pkg("sys", "tool", "2.0"), CompressionType::Zstd);
    artifact.compress(src.path(), 2).unwrap();

    let dst = tempfile::tempdir().unwrap();
    artifact.unpack(dst.path(), true).unwrap();
    assert_eq!(mode(&dst.path().join("usr/bin/tool")), 0o750);
    assert_eq!(mode(&dst.path().join("etc/secret")), 0o600);
}

#[test]
fn test_symlinks_survive_packing() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "usr/lib/libz.so.1.3", "zlib\n");
    std::os::unix::fs::symlink("libz.so.1.3", src.path().join("usr/lib/libz.so")).unwrap();

    let out = tempfile::tempdir().unwrap();
    let mut artifact =
        PackageArtifact::for_package(out.path(), &pkg("lib", "zlib", "1.3"), CompressionType::Gzip);
    artifact.compress(src.path(), 1).unwrap();

    let dst = tempfile::tempdir().unwrap();
    artifact.unpack(dst.path(), false).unwrap();
    let link = dst.path().join("usr/lib/libz.so");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), Path::new("libz.so.1.3"));
}

#[test]
fn test_delta_of_tarball_packaged_into_artifact() {
    let before = tempfile::tempdir().unwrap();
    write_file(before.path(), "etc/os-release", "v1\n");
    write_file(before.path(), "var/cache/stale", "old\n");

    let after = tempfile::tempdir().unwrap();
    write_file(after.path(), "etc/os-release", "version 2\n");
    write_file(after.path(), "usr/bin/app", "app\n");
    write_file(after.path(), "usr/share/man/app.1", "man\n");

    // The newer rootfs arrives as an exported tarball
    let tarball = tempfile::tempdir().unwrap();
    let tar_path = tarball.path().join("after.tar");
    {
        let mut builder = tar::Builder::new(fs::File::create(&tar_path).unwrap());
        builder.append_dir_all(".", after.path()).unwrap();
        builder.finish().unwrap();
    }

    let diff = compute_delta(before.path(), &tar_path).unwrap();
    let added: Vec<&str> = diff.additions.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(added, vec!["/usr/bin/app", "/usr/share/man/app.1"]);
    assert_eq!(diff.changes.len(), 1);
    assert_eq!(diff.changes[0].path, "/etc/os-release");
    assert_eq!(diff.deletions.len(), 1);

    let filter = DeltaFilter::new(&[], &["^/usr/share/man".to_string()]).unwrap();
    let out = tempfile::tempdir().unwrap();
    let mut artifact =
        PackageArtifact::for_package(out.path(), &pkg("app", "app", "1.0"), CompressionType::Gzip);
    extract_from_delta(after.path(), &diff, &filter, &mut artifact, 4).unwrap();

    let mut files = artifact.files.clone();
    files.sort();
    assert_eq!(files, vec!["etc/os-release", "usr/bin/app"]);

    let metadata = artifact.write_yaml(out.path()).unwrap();
    let loaded = PackageArtifact::load_yaml(&metadata).unwrap();
    loaded.verify().unwrap();
    assert_eq!(loaded.files, artifact.files);
}

#[test]
fn test_final_image_holds_artifact_content() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "opt/app/run", "exec\n");
    let out = tempfile::tempdir().unwrap();
    let mut artifact =
        PackageArtifact::for_package(out.path(), &pkg("app", "run", "1.0"), CompressionType::None);
    artifact.compress(src.path(), 1).unwrap();

    let backend = MockBackend::new();
    artifact
        .generate_final_image("kiln/final:run", &backend, true)
        .unwrap();
    let files = backend.local_files("kiln/final:run").unwrap();
    assert_eq!(files.get("opt/app/run").map(String::as_str), Some("exec\n"));

    // An empty artifact still yields a buildable context
    let empty = tempfile::tempdir().unwrap();
    let mut meta =
        PackageArtifact::for_package(out.path(), &pkg("virtual", "meta", "1.0"), CompressionType::Gzip);
    meta.compress(empty.path(), 1).unwrap();
    meta.generate_final_image("kiln/final:meta", &backend, false).unwrap();
    let files = backend.local_files("kiln/final:meta").unwrap();
    assert!(files.contains_key(".virtual"));
}
