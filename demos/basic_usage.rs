//! Basic usage of the anyfs-store backends.
//!
//! This example runs the same operations against the in-memory backend and
//! the metadata-indexed backend, showing that code written against the
//! traits works with either.
//!
//! Run with: `cargo run --example basic_usage`

use anyfs_store::meta::{DirBlobStore, LocalKv};
use anyfs_store::*;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Step 1: Backend-independent code
// =============================================================================

fn tour(name: &str, fs: &dyn VirtualFs) -> Result<(), FsError> {
    println!("--- {name} ---");

    // --- Writing files ---
    println!("1. Writing files...");
    fs.write_file(Path::new("/hello.txt"), b"Hello, World!")?;
    fs.write_file(Path::new("/data/bytes.bin"), &[0x00, 0x01, 0x02, 0x03])?;
    println!("   Created /hello.txt and /data/bytes.bin (parents created too)");

    // --- Reading files ---
    println!("\n2. Reading files...");
    let text = fs.read_to_string(Path::new("/hello.txt"))?;
    println!("   /hello.txt contains: {text}");

    // --- Handles ---
    println!("\n3. Working with handles...");
    let mut file = fs.open_file(
        Path::new("/hello.txt"),
        OpenFlags::READ_WRITE,
        Permissions::default_file(),
    )?;
    file.write_at(b"J", 0)?;
    let meta = file.stat()?;
    file.close()?;
    println!(
        "   patched byte 0; type={:?}, size={}",
        meta.file_type, meta.size
    );

    // --- Directory operations ---
    println!("\n4. Directory operations...");
    fs.mkdir_all(Path::new("/archive/2024"), Permissions::default_dir())?;
    fs.rename(Path::new("/data"), Path::new("/archive/2024/data"))?;
    fs.walk(Path::new("/"), &mut |entry| {
        println!("     - {} ({:?}, {} bytes)", entry.path.display(), entry.file_type, entry.size);
    })?;

    // --- Error handling ---
    println!("\n5. Error handling...");
    match fs.remove(Path::new("/archive")) {
        Err(FsError::DirectoryNotEmpty { path }) => {
            println!("   Refused to remove non-empty {}", path.display());
        }
        other => println!("   Unexpected result: {other:?}"),
    }
    match fs.open(Path::new("/nonexistent.txt")) {
        Err(FsError::NotFound { path }) => {
            println!("   Correctly got NotFound for: {}", path.display());
        }
        Err(e) => println!("   Unexpected error: {e}"),
        Ok(_) => println!("   Unexpected success"),
    }

    fs.close()?;
    println!();
    Ok(())
}

// =============================================================================
// Step 2: Run it on both backends
// =============================================================================

fn main() -> Result<(), FsError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== anyfs-store Basic Usage Example ===\n");

    let memory = MemoryFs::new(MemoryConfig::default())?;
    tour("memory backend", &memory)?;

    let dir = tempfile::tempdir().map_err(FsError::from)?;
    let meta = MetaFs::open(
        Arc::new(LocalKv::open(dir.path().join("index.json"))?),
        Arc::new(DirBlobStore::open(dir.path().join("blobs"))?),
        MetaConfig::default(),
    )?;
    tour("metadata-indexed backend", &meta)?;

    println!("=== Example complete! ===");
    Ok(())
}
