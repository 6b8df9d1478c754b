//! Snapshots and watchers.
//!
//! This example takes a snapshot of a tree, keeps changing the live
//! filesystem, restores the snapshot into a fresh backend, and watches a
//! directory through a background dispatcher.
//!
//! Run with: `cargo run --example snapshot_and_watch`

use anyfs_store::*;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), FsError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== anyfs-store Snapshot & Watch Example ===\n");

    let registry = WatchRegistry::new(WatchConfig::default())?;
    registry.start()?;
    let fs = MemoryFs::with_registry(MemoryConfig::default(), registry.clone())?;

    // --- Watching ---
    println!("1. Watching /reports/...");
    let delivered = Arc::new(AtomicUsize::new(0));
    let watcher = fs.watch(PathPattern::parse("/reports/..."))?;
    let counter = Arc::clone(&delivered);
    watcher.on_event(move |event| {
        counter.fetch_add(1, Ordering::SeqCst);
        println!("   event: {:<24} {:?}", event.path, event.ops);
    });

    // --- Snapshot ---
    println!("\n2. Writing and snapshotting...");
    fs.write_file(Path::new("/reports/q1.csv"), b"month,total\njan,10\n")?;
    fs.write_file(Path::new("/reports/q2.csv"), b"month,total\napr,12\n")?;
    fs.write_file(Path::new("/scratch/tmp.txt"), b"not worth keeping")?;

    let snapshot = fs.take_snapshot(&SnapshotConfig::including(["/reports/..."]))?;
    println!(
        "   captured {} entries, {} bytes",
        snapshot.len(),
        snapshot.size()
    );
    for entry in snapshot.root_dir_entries() {
        println!("   root entry: {} ({:?})", entry.path, entry.file_type);
    }

    // --- Diverge ---
    println!("\n3. Changing the live tree...");
    fs.append_file(Path::new("/reports/q1.csv"), b"feb,11\n")?;
    fs.remove(Path::new("/reports/q2.csv"))?;

    // --- Restore ---
    println!("\n4. Restoring the snapshot...");
    let restored = snapshot.new_adapted_filesystem(0)?;
    let q1 = restored.read_to_string(Path::new("/reports/q1.csv"))?;
    println!("   restored q1.csv:\n{q1}");
    println!(
        "   restored q2.csv exists: {}",
        restored.exists(Path::new("/reports/q2.csv"))?
    );
    let checksum = snapshot.metadata("/reports/q1.csv")?.checksum;
    let hex: String = checksum.iter().take(8).map(|b| format!("{b:02x}")).collect();
    println!("   q1.csv checksum starts with {hex}");

    // --- Drain the dispatcher ---
    for _ in 0..40 {
        if delivered.load(Ordering::SeqCst) >= 4 {
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }
    watcher.close();
    registry.stop();
    fs.close()?;

    println!("\n=== Example complete! ===");
    Ok(())
}
