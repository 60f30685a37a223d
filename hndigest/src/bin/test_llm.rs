use std::sync::Arc;

use hndigest::llm::remote::RemoteLlmProvider;
use hndigest::llm::summarizer::{LlmSummarizer, Summarizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("Set OPENAI_API_KEY environment variable"))?;

    // Allow custom base URL or use OpenAI default
    let base_url = std::env::var("LLM_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());

    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

    println!("\n{}", "=".repeat(60));
    println!("Testing LLM summarizer");
    println!("Base URL: {}", base_url);
    println!("Model: {}", model);
    println!("{}", "=".repeat(60));

    let provider = RemoteLlmProvider::new(&base_url, &api_key, &model).with_defaults(30, 500, 0.3);
    let summarizer = LlmSummarizer::new(Arc::new(provider), 300);

    let samples = [
        (
            "Rust 1.70 released",
            r#"
Rust is a systems programming language that runs blazingly fast, prevents
segfaults, and guarantees thread safety. It accomplishes these goals through
a unique ownership system that enforces memory safety without requiring a
garbage collector. Many companies are adopting Rust for critical infrastructure.
            "#,
        ),
        // Title only, as when extraction fails
        ("Show HN: A tiny SQLite-backed job queue", "Show HN: A tiny SQLite-backed job queue"),
    ];

    for (i, (title, content)) in samples.iter().enumerate() {
        println!("\n[Test {}] {}", i + 1, title);
        match summarizer.summarize(title, content).await {
            Ok(summary) => {
                println!("✓ Success!");
                println!("  Summary: {}", summary.summary);
                println!("  Tags: {}", summary.tags.join(", "));
            }
            Err(e) => {
                eprintln!("✗ Failed: {}", e);
            }
        }
    }
    Ok(())
}
