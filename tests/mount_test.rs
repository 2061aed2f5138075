//! Tree building and member materialization against a local archive.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use cloudzip::mount::build_zip_tree;

use common::regular_archive;

fn write_archive(dir: &std::path::Path) -> (String, std::path::PathBuf) {
    let archive_path = dir.join("regular.zip");
    std::fs::write(&archive_path, regular_archive()).unwrap();
    let uri = format!("file://{}", archive_path.display());
    let cache_dir = dir.join("cache");
    std::fs::create_dir_all(&cache_dir).unwrap();
    (uri, cache_dir)
}

fn attrs() -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    attrs.insert("listen_addr".to_string(), "127.0.0.1:2049".to_string());
    attrs
}

#[tokio::test]
async fn tree_exposes_members_and_pseudo_files() {
    let dir = tempfile::tempdir().unwrap();
    let (uri, cache_dir) = write_archive(dir.path());

    let tree = build_zip_tree(&cache_dir, &uri, &attrs()).await.unwrap();

    let root: Vec<String> =
        tree.readdir("").unwrap().iter().map(|e| e.name().to_string()).collect();
    assert!(root.contains(&".cz".to_string()));
    assert!(root.contains(&"foo".to_string()));
    assert!(root.contains(&"a.txt".to_string()));

    let cz: Vec<String> =
        tree.readdir(".cz").unwrap().iter().map(|e| e.name().to_string()).collect();
    for expected in ["cachedir", "listen_addr", "server.pid", "source"] {
        assert!(cz.contains(&expected.to_string()), "missing pseudo file {expected}");
    }

    let source = tree.stat(".cz/source").unwrap();
    let handle = source.open().await.unwrap();
    let content = handle.read_range(0, source.size as usize).unwrap();
    assert_eq!(content, uri.as_bytes());

    let pid_node = tree.stat(".cz/server.pid").unwrap();
    let handle = pid_node.open().await.unwrap();
    let pid_text = String::from_utf8(handle.read_range(0, pid_node.size as usize).unwrap()).unwrap();
    assert_eq!(pid_text, std::process::id().to_string());

    // The explicit empty directory from the archive is browsable.
    assert_eq!(tree.readdir("empty").unwrap().len(), 0);
}

#[tokio::test]
async fn member_open_fills_cache_then_hits_it() {
    let dir = tempfile::tempdir().unwrap();
    let (uri, cache_dir) = write_archive(dir.path());
    let tree = build_zip_tree(&cache_dir, &uri, &attrs()).await.unwrap();

    let node = tree.stat("foo/bar.txt").unwrap();
    let handle = node.open().await.unwrap();
    assert_eq!(handle.read_range(0, node.size as usize).unwrap(), b"file in a directory!\n");

    let cached: Vec<_> = std::fs::read_dir(&cache_dir).unwrap().collect();
    assert_eq!(cached.len(), 1);

    // Second open is served from the cache; the archive could vanish now.
    std::fs::remove_file(dir.path().join("regular.zip")).unwrap();
    let handle = node.open().await.unwrap();
    assert_eq!(handle.read_range(0, node.size as usize).unwrap(), b"file in a directory!\n");
}

#[tokio::test]
async fn concurrent_opens_publish_one_cache_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (uri, cache_dir) = write_archive(dir.path());
    let tree = Arc::new(build_zip_tree(&cache_dir, &uri, &attrs()).await.unwrap());

    let node = tree.stat("big.bin").unwrap().clone();
    let expected_size = node.size as usize;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let node = node.clone();
            tokio::spawn(async move {
                let handle = node.open().await.unwrap();
                handle.read_range(0, expected_size).unwrap().len()
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), expected_size);
    }

    let names: Vec<String> = std::fs::read_dir(&cache_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names.len(), 1, "expected exactly one published entry, got {names:?}");
    assert!(!names[0].ends_with("-w"), "staging file leaked: {names:?}");
}

#[tokio::test]
async fn tree_ids_are_stable_across_builds() {
    let dir = tempfile::tempdir().unwrap();
    let (uri, cache_dir) = write_archive(dir.path());

    let first = build_zip_tree(&cache_dir, &uri, &attrs()).await.unwrap();
    let second = build_zip_tree(&cache_dir, &uri, &attrs()).await.unwrap();
    let a = first.stat("foo/bar.txt").unwrap();
    let b = second.stat("foo/bar.txt").unwrap();
    assert_eq!(a.file_id, b.file_id);
}
