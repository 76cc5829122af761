//! Quick start example for Pictor.
//!
//! Inserts a few synthetic images into an in-memory database and searches
//! for the closest match to a query.
//!
//! Run with: RUST_LOG=debug cargo run --example quickstart

use pictor::image::encode_ppm;
use pictor::prelude::*;
use tracing_subscriber::EnvFilter;

/// A 16x16 image with a vertical gradient between two colors.
fn gradient(top: [u8; 3], bottom: [u8; 3]) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(256);
    for y in 0..16u32 {
        for _ in 0..16 {
            let mix = |a: u8, b: u8| ((a as u32 * (15 - y) + b as u32 * y) / 15) as u8;
            pixels.push([mix(top[0], bottom[0]), mix(top[1], bottom[1]), mix(top[2], bottom[2])]);
        }
    }
    encode_ppm(16, 16, &pixels)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Pictor Quick Start Example\n");

    let db = Database::open(Config::new(DriverConfig::new("color")).with_namespace("quickstart"))?;

    let images = [
        ("sunset", gradient([255, 140, 0], [120, 20, 60])),
        ("ocean", gradient([120, 200, 255], [0, 40, 120])),
        ("forest", gradient([60, 160, 60], [10, 50, 10])),
        ("snow", gradient([250, 250, 250], [200, 210, 230])),
        ("dusk", gradient([200, 100, 40], [40, 10, 60])),
    ];

    println!("Inserting {} images...", images.len());
    for (label, bytes) in &images {
        db.insert_with_label(bytes.clone(), *label)?;
    }
    println!("Database contains {} images\n", db.len()?);

    let query = gradient([250, 130, 10], [110, 30, 60]);
    println!("Searching for images similar to an orange sunset...\n");

    let results = db.search(3, query.clone())?;

    println!("Top 3 Results:");
    println!("{:-<50}", "");
    for hit in &results {
        println!(
            "  #{} {:<10} similarity {:.4}  id {}",
            hit.rank,
            hit.source_ref.as_deref().unwrap_or("?"),
            hit.similarity,
            hit.id
        );
    }
    println!("{:-<50}\n", "");

    let snow = &images[3].1;
    println!(
        "similarity(query, snow) = {:.4}",
        db.similarity(query.clone(), snow.clone())?
    );
    println!("feature string: {}...", &db.feature_string(query)?[..24]);

    println!("\nstats: {}", db.invoke("stats", pictor::Value::Null)?);
    db.close()?;
    println!("\nDone!");
    Ok(())
}
