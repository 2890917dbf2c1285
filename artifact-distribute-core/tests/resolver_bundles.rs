use std::fs;
use std::path::Path;

use artifact_distribute_core::config::SymbolsType;
use artifact_distribute_core::error::DistributeError;
use artifact_distribute_core::resolver::FileSetResolver;
use tempfile::TempDir;

fn touch(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn dsym_resolver() -> FileSetResolver {
    FileSetResolver::new(SymbolsType::Apple.default_bundle_suffixes())
}

#[test]
fn alternation_yields_one_group_per_bundle() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "a/b/c/x.dsym/foo.txt", b"foo");
    touch(dir.path(), "a/b/c/x.dsym/Contents/bar.txt", b"barbar");
    touch(dir.path(), "a/b/c/y.dsym/baz.txt", b"baz");
    touch(dir.path(), "a/b/c/z.dsym/ignored.txt", b"z");
    for loose in ["a/f.txt", "a/b/f.txt", "a/b/c/f.txt", "a/b/c/d/f.txt"] {
        touch(dir.path(), loose, b"loose");
    }

    let pattern = format!("{}/a/b/c/(x|y).dsym", dir.path().display());
    let groups = dsym_resolver().resolve(&pattern).unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].group_id, "x.dsym");
    let x_files: Vec<&str> = groups[0].files.iter().map(|f| f.relative_path.as_str()).collect();
    assert_eq!(x_files, vec!["Contents/bar.txt", "foo.txt"]);
    assert_eq!(groups[0].total_bytes, 9);
    assert_eq!(groups[1].group_id, "y.dsym");
    assert_eq!(groups[1].files.len(), 1);
    assert!(groups
        .iter()
        .flat_map(|g| g.files.iter())
        .all(|f| !f.absolute_path.ends_with("f.txt")));
}

#[test]
fn parent_directory_expands_to_contained_bundles() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "build/x.dSYM/a.txt", b"a");
    touch(dir.path(), "build/nested/y.dsym/b.txt", b"b");
    touch(dir.path(), "build/loose.txt", b"loose");

    let pattern = format!("{}/build", dir.path().display());
    let groups = dsym_resolver().resolve(&pattern).unwrap();

    let ids: Vec<&str> = groups.iter().map(|g| g.group_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"x.dSYM"));
    assert!(ids.contains(&"y.dsym"));
    assert!(groups
        .iter()
        .all(|g| g.files.iter().all(|f| f.relative_path != "loose.txt")));
}

#[test]
fn missing_path_resolves_to_nothing() {
    let dir = TempDir::new().unwrap();
    let pattern = format!("{}/a/b/c/(x|y).dsym", dir.path().display());

    assert!(dsym_resolver().resolve(&pattern).unwrap().is_empty());
    assert!(matches!(
        dsym_resolver().resolve_required(&pattern),
        Err(DistributeError::ArtifactNotFound { .. })
    ));
}

#[test]
fn single_artifact_must_be_unambiguous() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "one.ipa", b"1");
    touch(dir.path(), "two.ipa", b"2");
    let resolver = FileSetResolver::new(Vec::new());

    let pattern = format!("{}/*.ipa", dir.path().display());
    assert!(matches!(
        resolver.resolve_single(&pattern),
        Err(DistributeError::AmbiguousArtifact { .. })
    ));

    let exact = format!("{}/one.ipa", dir.path().display());
    let group = resolver.resolve_single(&exact).unwrap();
    assert_eq!(group.files.len(), 1);
    assert_eq!(group.files[0].relative_path, "one.ipa");
    assert!(group.files[0].absolute_path.is_absolute());
}

#[test]
fn directory_is_not_a_single_artifact() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "App.app/Info.plist", b"plist");
    let resolver = FileSetResolver::new(Vec::new());

    let pattern = format!("{}/App.app", dir.path().display());
    assert!(matches!(
        resolver.resolve_single(&pattern),
        Err(DistributeError::InvalidPattern { .. })
    ));
}

#[test]
fn existing_names_with_glob_characters_resolve_literally() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "App (1).ipa", b"1");
    touch(dir.path(), "out[v1].ipa", b"2");
    touch(dir.path(), "outv.ipa", b"3");
    let resolver = FileSetResolver::new(Vec::new());

    for name in ["App (1).ipa", "out[v1].ipa"] {
        let pattern = format!("{}/{}", dir.path().display(), name);
        let group = resolver.resolve_single(&pattern).unwrap();
        assert_eq!(group.files.len(), 1);
        assert_eq!(group.files[0].relative_path, name);
    }
}
