//! Async API demo using AsyncDatabase.
//!
//! Run with: cargo run --example async_demo --features async

#[cfg(feature = "async")]
use pictor::image::encode_ppm;
#[cfg(feature = "async")]
use pictor::prelude::*;
#[cfg(feature = "async")]
use pictor::AsyncDatabase;

#[cfg(feature = "async")]
#[tokio::main]
async fn main() -> Result<()> {
    println!("Async Pictor Demo\n");

    let db = AsyncDatabase::open(Config::new(DriverConfig::new("color"))).await?;

    println!("Inserting 200 images concurrently...");
    let start = std::time::Instant::now();
    let mut handles = vec![];
    for i in 0..200u32 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let shade = (i % 256) as u8;
            let image = encode_ppm(4, 4, &[[shade, 255 - shade, (i * 7 % 256) as u8]; 16]);
            db.insert(image).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| Error::Storage(format!("task failed: {}", e)))??;
    }
    println!("   [OK] inserted in {:?}\n", start.elapsed());

    let query = encode_ppm(4, 4, &[[100, 155, 0]; 16]);
    let results = db.search(5, query).await?;
    for hit in &results {
        println!("   #{} {} {:.4}", hit.rank, hit.id, hit.similarity);
    }

    db.close().await?;
    println!("\nDone!");
    Ok(())
}

#[cfg(not(feature = "async"))]
fn main() {
    println!("This example requires the 'async' feature.");
    println!("Run with: cargo run --example async_demo --features async");
}
