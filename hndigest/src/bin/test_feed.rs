use hndigest::ingestion::{FeedSource, HackerNewsClient, DEFAULT_HN_API_URL};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let base_url = std::env::var("HN_API_URL").unwrap_or_else(|_| DEFAULT_HN_API_URL.to_string());
    let limit: usize = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(10);

    println!("\n{}", "=".repeat(60));
    println!("Testing feed: {}", base_url);
    println!("{}", "=".repeat(60));

    let client = HackerNewsClient::new(base_url, 10, "hndigest/0.1.0")?.with_concurrency(8);

    match client.top_candidates(limit).await {
        Ok(items) => {
            println!("✓ Success! {} candidates", items.len());
            for (i, item) in items.iter().enumerate() {
                println!("  {:>2}. [{}] {}", i + 1, item.id, item.title);
                println!(
                    "      URL: {}  ▲ {}  💬 {}",
                    item.url.as_deref().unwrap_or("none"),
                    item.popularity,
                    item.discussion_count
                );
            }
        }
        Err(e) => {
            println!("✗ Failed: {}", e);
        }
    }
    Ok(())
}
