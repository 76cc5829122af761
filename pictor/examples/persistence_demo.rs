//! Persistence demonstration for Pictor.
//!
//! This example shows how to:
//! 1. Open a database backed by the record log
//! 2. Insert images
//! 3. Close and reopen (simulating restart)
//! 4. Verify the records and search results survive
//!
//! Run with: cargo run --example persistence_demo

use pictor::image::encode_ppm;
use pictor::prelude::*;
use std::fs;

fn checker(a: [u8; 3], b: [u8; 3]) -> Vec<u8> {
    let pixels: Vec<[u8; 3]> = (0..64)
        .map(|i| if (i % 8 + i / 8) % 2 == 0 { a } else { b })
        .collect();
    encode_ppm(8, 8, &pixels)
}

fn config(root: &str) -> Config {
    Config::new(DriverConfig::new("idf"))
        .with_namespace("demo")
        .with_database(DatabaseConfig::new("log").with_path(root))
}

fn main() -> Result<()> {
    let root = "./demo_records";

    // Clean up any previous run
    let _ = fs::remove_dir_all(root);

    println!("Pictor Persistence Demo\n");

    let query = checker([240, 240, 240], [20, 20, 20]);

    println!("Phase 1: inserting images...");
    let first = {
        let db = Database::open(config(root))?;
        let first = db.insert_with_label(checker([250, 250, 250], [10, 10, 10]), "board")?;
        db.insert_with_label(checker([200, 0, 0], [0, 0, 200]), "flag")?;
        db.insert_with_label(checker([128, 128, 128], [128, 128, 128]), "gray")?;
        println!("   inserted {} images", db.len()?);
        db.close()?;
        first
    };

    println!("\nPhase 2: reopening...");
    let db = Database::open(config(root))?;
    println!("   recovered {} images", db.len()?);
    assert!(db.exists(first)?);

    let results = db.search(3, query)?;
    for hit in &results {
        println!(
            "   #{} {:<6} {:.4}",
            hit.rank,
            hit.source_ref.as_deref().unwrap_or("?"),
            hit.similarity
        );
    }
    assert_eq!(results[0].id, first);

    println!("\ncompact_store: {}", db.invoke("compact_store", pictor::Value::Null)?);
    db.close()?;

    let _ = fs::remove_dir_all(root);
    println!("\nDone!");
    Ok(())
}
