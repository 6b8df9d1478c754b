//! Integration tests running the same behavioral checks against both
//! backends.
//!
//! These tests verify that:
//! 1. Content written through handles reads back unchanged
//! 2. Structural operations keep the tree consistent (guards, renames)
//! 3. Quotas and admission control leave state untouched on rejection
//! 4. Snapshots are immutable and restore faithfully
//! 5. Watchers receive the events of their filter, in order

use anyfs_store::meta::{DirBlobStore, LocalKv, MemoryBlobStore};
use anyfs_store::*;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// =============================================================================
// Backends Under Test
// =============================================================================

fn memory_fs() -> MemoryFs {
    MemoryFs::new(MemoryConfig::default()).unwrap()
}

fn meta_fs() -> MetaFs {
    MetaFs::open(
        Arc::new(LocalKv::in_memory()),
        Arc::new(MemoryBlobStore::new()),
        MetaConfig {
            max_file_count: 2000,
            ..MetaConfig::default()
        },
    )
    .unwrap()
}

/// Run `check` against a fresh instance of every backend.
fn on_both_backends(check: impl Fn(&dyn VirtualFs)) {
    check(&memory_fs());
    check(&meta_fs());
}

fn write(fs: &dyn VirtualFs, path: &str, data: &[u8]) {
    let mut file = fs.create(Path::new(path)).unwrap();
    file.write(data).unwrap();
    file.close().unwrap();
}

fn read_all(fs: &dyn VirtualFs, path: &str) -> Vec<u8> {
    let mut file = fs.open(Path::new(path)).unwrap();
    let mut data = Vec::new();
    let mut buf = [0u8; 7];
    loop {
        let n = file.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    data
}

fn names(fs: &dyn VirtualFs, dir: &str) -> Vec<String> {
    fs.read_dir(Path::new(dir))
        .unwrap()
        .map(|entry| entry.unwrap().name)
        .collect()
}

// =============================================================================
// Tests: Content
// =============================================================================

#[test]
fn write_read_round_trip() {
    on_both_backends(|fs| {
        let samples: [&[u8]; 4] = [b"", b"a", b"hello world", &[0, 255, 10, 13, 0]];
        for (i, sample) in samples.iter().enumerate() {
            let path = format!("/round/{i}.bin");
            write(fs, &path, sample);
            assert_eq!(read_all(fs, &path), *sample);
        }
    });
}

#[test]
fn duplicate_handles_share_content() {
    on_both_backends(|fs| {
        let path = Path::new("/shared.txt");
        let mut writer = fs.create(path).unwrap();
        let reader = fs
            .open_file(path, OpenFlags::READ, Permissions::default_file())
            .unwrap();

        writer.write(b"visible").unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"visible");
        assert_ne!(writer.handle(), reader.handle());
    });
}

#[test]
fn double_close_is_rejected() {
    on_both_backends(|fs| {
        let mut file = fs.create(Path::new("/once")).unwrap();
        file.close().unwrap();
        assert!(file.is_closed());
        assert!(matches!(file.close(), Err(FsError::FileClosed { .. })));
        assert!(matches!(file.write(b"x"), Err(FsError::FileClosed { .. })));
    });
}

#[test]
fn closed_filesystem_rejects_everything() {
    on_both_backends(|fs| {
        write(fs, "/f", b"data");
        fs.close().unwrap();
        assert!(fs.is_closed());
        assert!(matches!(fs.stat(Path::new("/f")), Err(FsError::ClosedFilesystem)));
        assert!(matches!(fs.create(Path::new("/g")), Err(FsError::ClosedFilesystem)));
        assert!(matches!(fs.close(), Err(FsError::ClosedFilesystem)));
    });
}

// =============================================================================
// Tests: Structure
// =============================================================================

#[test]
fn non_empty_directory_cannot_be_removed() {
    on_both_backends(|fs| {
        fs.mkdir_all(Path::new("/dir/"), Permissions::default_dir())
            .unwrap();
        write(fs, "/dir/file.txt", b"hello");
        assert_eq!(fs.stat(Path::new("/dir/file.txt")).unwrap().size, 5);

        assert!(matches!(
            fs.remove(Path::new("/dir")),
            Err(FsError::DirectoryNotEmpty { .. })
        ));
        fs.remove(Path::new("/dir/file.txt")).unwrap();
        fs.remove(Path::new("/dir")).unwrap();
        assert!(!names(fs, "/").contains(&"dir".to_string()));
        assert!(matches!(
            fs.stat(Path::new("/dir")),
            Err(FsError::NotFound { .. })
        ));
    });
}

#[test]
fn rename_moves_whole_subtree() {
    on_both_backends(|fs| {
        let files: Vec<String> = (0..12)
            .map(|i| format!("/src/{}/file{i}.txt", if i % 2 == 0 { "even" } else { "odd" }))
            .collect();
        for path in &files {
            write(fs, path, path.as_bytes());
        }

        fs.rename(Path::new("/src"), Path::new("/dst")).unwrap();

        for path in &files {
            let moved = path.replacen("/src", "/dst", 1);
            assert_eq!(read_all(fs, &moved), path.as_bytes());
        }
        assert!(matches!(
            fs.stat(Path::new("/src")),
            Err(FsError::NotFound { .. })
        ));
        assert_eq!(names(fs, "/"), vec!["dst"]);
        assert_eq!(names(fs, "/dst"), vec!["even", "odd"]);
    });
}

#[test]
fn rename_into_itself_is_invalid() {
    on_both_backends(|fs| {
        write(fs, "/a/b.txt", b"");
        assert!(matches!(
            fs.rename(Path::new("/a"), Path::new("/a/inner")),
            Err(FsError::InvalidPath { .. })
        ));
        assert_eq!(names(fs, "/a"), vec!["b.txt"]);
    });
}

#[test]
fn paths_are_normalized_on_every_call() {
    on_both_backends(|fs| {
        write(fs, "docs//./notes/../readme.md", b"x");
        assert!(fs.is_file(Path::new("/docs/readme.md")).unwrap());
        assert_eq!(fs.join(&["/docs", "notes", "..", "readme.md"]), "/docs/readme.md");
    });
}

#[test]
fn symlinks_are_not_supported() {
    on_both_backends(|fs| {
        assert!(matches!(
            fs.symlink(Path::new("/target"), Path::new("/link")),
            Err(FsError::NotSupported { .. })
        ));
    });
}

#[test]
fn extension_helpers_work_on_trait_objects() {
    on_both_backends(|fs| {
        fs.write_file(Path::new("/cfg/app.json"), br#"{"debug":true}"#)
            .unwrap();
        fs.append_file(Path::new("/cfg/log"), b"one\n").unwrap();
        fs.append_file(Path::new("/cfg/log"), b"two\n").unwrap();
        assert_eq!(fs.read_to_string(Path::new("/cfg/log")).unwrap(), "one\ntwo\n");

        let mut visited = Vec::new();
        fs.walk(Path::new("/"), &mut |entry| visited.push(entry.name.clone()))
            .unwrap();
        assert_eq!(visited, vec!["cfg", "app.json", "log"]);
    });
}

// =============================================================================
// Tests: Limits
// =============================================================================

#[test]
fn memory_write_above_quota_changes_nothing() {
    let fs = MemoryFs::new(MemoryConfig::with_max_storage(1000)).unwrap();
    write(&fs, "/small", b"abc");
    let before = fs.used_bytes();

    let mut file = fs
        .open_file(Path::new("/small"), OpenFlags::READ_WRITE, Permissions::default_file())
        .unwrap();
    assert!(matches!(
        file.write(&[7u8; 2000]),
        Err(FsError::QuotaExceeded { .. })
    ));
    file.close().unwrap();

    assert_eq!(fs.used_bytes(), before);
    assert_eq!(read_all(&fs, "/small"), b"abc");
}

#[test]
fn meta_write_above_usable_space_changes_nothing() {
    let fs = meta_fs();
    write(&fs, "/small", b"abc");
    let before = fs.used_space().unwrap();

    let mut file = fs.create(Path::new("/big")).unwrap();
    let too_big = vec![0u8; fs.config().max_usable_space as usize];
    assert!(matches!(
        file.write(&too_big),
        Err(FsError::QuotaExceeded { .. })
    ));
    file.close().unwrap();

    assert_eq!(fs.used_space().unwrap(), before);
    assert_eq!(fs.stat(Path::new("/big")).unwrap().size, 0);
}

#[test]
fn meta_file_count_is_enforced() {
    let fs = MetaFs::open(
        Arc::new(LocalKv::in_memory()),
        Arc::new(MemoryBlobStore::new()),
        MetaConfig {
            max_file_count: 2,
            ..MetaConfig::default()
        },
    )
    .unwrap();
    write(&fs, "/1", b"");
    write(&fs, "/2", b"");
    assert!(matches!(
        fs.create(Path::new("/3")),
        Err(FsError::FileCountExceeded { limit: 2 })
    ));
    fs.remove(Path::new("/1")).unwrap();
    write(&fs, "/3", b"");
    assert_eq!(fs.file_count(), 2);
}

fn create_concurrently(fs: &dyn VirtualFs, count: usize) {
    thread::scope(|scope| {
        for i in 0..count {
            scope.spawn(move || {
                let path = format!("/f{i:04}");
                loop {
                    match fs.create(Path::new(&path)) {
                        Ok(mut file) => {
                            file.close().unwrap();
                            break;
                        }
                        Err(err) if err.is_retryable() => thread::yield_now(),
                        Err(err) => panic!("creating {path}: {err}"),
                    }
                }
            });
        }
    });
}

#[test]
fn concurrent_creations_all_land() {
    const K: usize = 1000;
    on_both_backends(|fs| {
        create_concurrently(fs, K);
        let entries = names(fs, "/");
        assert_eq!(entries.len(), K);
        assert_eq!(entries[0], "f0000");
        assert_eq!(entries[K - 1], format!("f{:04}", K - 1));
    });
}

// =============================================================================
// Tests: Snapshots
// =============================================================================

#[test]
fn snapshot_of_single_file() {
    on_both_backends(|fs| {
        write(fs, "/a.txt", b"a");
        let snapshot = fs.take_snapshot(&SnapshotConfig::all()).unwrap();

        assert_eq!(snapshot.root_dir_entries().len(), 1);
        assert_eq!(snapshot.metadata("/a.txt").unwrap().size, 1);
        assert_eq!(snapshot.content("/a.txt").unwrap().bytes(), b"a");
    });
}

#[test]
fn snapshot_is_immutable_under_later_writes() {
    on_both_backends(|fs| {
        let mut file = fs.create(Path::new("/p")).unwrap();
        file.write(b"a").unwrap();
        let snapshot = fs.take_snapshot(&SnapshotConfig::all()).unwrap();
        file.write(b"b").unwrap();
        file.close().unwrap();

        assert_eq!(snapshot.content("/p").unwrap().bytes(), b"a");
        assert_eq!(read_all(fs, "/p"), b"ab");
    });
}

#[test]
fn snapshot_respects_inclusion_patterns() {
    on_both_backends(|fs| {
        write(fs, "/keep/a", b"1");
        write(fs, "/skip/b", b"2");
        let snapshot = fs
            .take_snapshot(&SnapshotConfig::including(["/keep/..."]))
            .unwrap();
        assert!(snapshot.content("/keep/a").is_ok());
        assert!(matches!(
            snapshot.content("/skip/b"),
            Err(FsError::NotFound { .. })
        ));
    });
}

fn comparable(snapshot: &Snapshot) -> Vec<(String, u32, u64, Vec<String>, [u8; 32])> {
    let mut entries = Vec::new();
    snapshot
        .for_each_entry(|entry| {
            entries.push((
                entry.path.clone(),
                entry.mode(),
                entry.size,
                entry.child_names.clone(),
                entry.checksum,
            ));
            Ok(())
        })
        .unwrap();
    entries
}

#[test]
fn restored_filesystem_snapshots_identically() {
    on_both_backends(|fs| {
        write(fs, "/docs/a.md", b"alpha");
        write(fs, "/docs/deep/b.md", b"beta");
        write(fs, "/c.bin", &[1, 2, 3]);
        fs.mkdir_all(Path::new("/empty"), Permissions::private_dir())
            .unwrap();
        let original = fs.take_snapshot(&SnapshotConfig::all()).unwrap();

        let memory = original.new_adapted_filesystem(0).unwrap();
        let from_memory = memory.take_snapshot(&SnapshotConfig::all()).unwrap();
        assert_eq!(comparable(&from_memory), comparable(&original));

        let meta = MetaFs::from_snapshot(
            &original,
            Arc::new(LocalKv::in_memory()),
            Arc::new(MemoryBlobStore::new()),
            MetaConfig::default(),
        )
        .unwrap();
        let from_meta = meta.take_snapshot(&SnapshotConfig::all()).unwrap();
        assert_eq!(comparable(&from_meta), comparable(&original));
    });
}

// =============================================================================
// Tests: Watching
// =============================================================================

type Seen = Arc<Mutex<Vec<(String, EventOps)>>>;

fn record_events(watcher: &Watcher) -> Seen {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    watcher.on_event(move |event| sink.lock().unwrap().push((event.path.clone(), event.ops)));
    seen
}

fn watch_file_lifecycle(fs: &dyn VirtualFs, registry: &WatchRegistry) {
    fs.mkdir_all(Path::new("/dir"), Permissions::default_dir())
        .unwrap();
    thread::sleep(Duration::from_millis(2));

    let watcher = fs.watch(PathPattern::parse("/dir/...")).unwrap();
    let seen = record_events(&watcher);

    let mut file = fs.create(Path::new("/dir/f")).unwrap();
    file.write(b"payload").unwrap();
    file.close().unwrap();
    fs.remove(Path::new("/dir/f")).unwrap();
    registry.dispatch_once();

    let seen = seen.lock().unwrap();
    let expected = [EventOps::CREATE, EventOps::WRITE, EventOps::REMOVE];
    assert_eq!(seen.len(), 3, "{seen:?}");
    for ((path, ops), want) in seen.iter().zip(expected) {
        assert_eq!(path, "/dir/f");
        assert_eq!(*ops, want);
    }
}

#[test]
fn watcher_sees_create_write_remove_in_order() {
    let registry = WatchRegistry::new(WatchConfig::default()).unwrap();
    let memory = MemoryFs::with_registry(MemoryConfig::default(), registry.clone()).unwrap();
    watch_file_lifecycle(&memory, &registry);

    let meta = MetaFs::open_with_registry(
        Arc::new(LocalKv::in_memory()),
        Arc::new(MemoryBlobStore::new()),
        MetaConfig::default(),
        registry.clone(),
    )
    .unwrap();
    watch_file_lifecycle(&meta, &registry);
}

#[test]
fn watcher_ignores_events_from_before_it_existed() {
    let registry = WatchRegistry::new(WatchConfig::default()).unwrap();
    let fs = MemoryFs::with_registry(MemoryConfig::default(), registry.clone()).unwrap();

    write(&fs, "/early", b"");
    thread::sleep(Duration::from_millis(2));
    let watcher = fs.watch(PathPattern::everything()).unwrap();
    let seen = record_events(&watcher);
    write(&fs, "/late", b"");
    registry.dispatch_once();

    let paths: Vec<String> = seen.lock().unwrap().iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(paths, vec!["/late"]);
}

#[test]
fn background_dispatcher_delivers_events() {
    let registry = WatchRegistry::new(WatchConfig::default()).unwrap();
    let fs = MemoryFs::with_registry(MemoryConfig::default(), registry.clone()).unwrap();
    registry.start().unwrap();

    let watcher = fs.watch("/logs/*.log".into()).unwrap();
    let seen = record_events(&watcher);
    write(&fs, "/logs/app.log", b"line");
    write(&fs, "/logs/app.txt", b"line");

    let mut delivered = false;
    for _ in 0..200 {
        if !seen.lock().unwrap().is_empty() {
            delivered = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    registry.stop();

    assert!(delivered);
    let seen = seen.lock().unwrap();
    assert!(seen.iter().all(|(path, _)| path == "/logs/app.log"));
}

#[test]
fn watch_without_registry_is_not_supported() {
    on_both_backends(|fs| {
        assert!(matches!(
            fs.watch(PathPattern::everything()),
            Err(FsError::NotSupported { .. })
        ));
    });
}

// =============================================================================
// Tests: Persistence
// =============================================================================

#[test]
fn meta_tree_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let kv_file = dir.path().join("index.json");
    let blob_dir = dir.path().join("blobs");

    let open = || {
        MetaFs::open(
            Arc::new(LocalKv::open(&kv_file).unwrap()),
            Arc::new(DirBlobStore::open(&blob_dir).unwrap()),
            MetaConfig::default(),
        )
        .unwrap()
    };

    let fs = open();
    write(&fs, "/projects/alpha/notes.txt", b"persisted");
    fs.mkdir_all(Path::new("/projects/beta"), Permissions::default_dir())
        .unwrap();
    let written = fs.stat(Path::new("/projects/alpha/notes.txt")).unwrap();
    fs.close().unwrap();

    let fs = open();
    assert_eq!(names(&fs, "/projects"), vec!["alpha", "beta"]);
    assert_eq!(read_all(&fs, "/projects/alpha/notes.txt"), b"persisted");
    let reopened = fs.stat(Path::new("/projects/alpha/notes.txt")).unwrap();
    assert_eq!(reopened.modified, written.modified);
    assert_eq!(fs.file_count(), 1);
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn lifecycle_is_logged_at_info() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let memory = memory_fs();
        let meta = meta_fs();
        write(&memory, "/f", b"x");
        memory.close().unwrap();
        meta.close().unwrap();
    });

    let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
    for message in [
        "created memory filesystem",
        "closed memory filesystem",
        "opened meta filesystem",
        "closed meta filesystem",
    ] {
        assert!(
            output.lines().any(|line| line.contains("INFO") && line.contains(message)),
            "missing info line {message:?} in:\n{output}"
        );
    }
    assert!(!output.contains("DEBUG"));
}
