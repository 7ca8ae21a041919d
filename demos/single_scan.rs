//! Single-URL scan demo: runs the crawler and rule engine against one page
//! without touching the queue or persistence gateway.
//!
//! Usage: cargo run --example single_scan -- <URL>

use scanworker::browser_pool::{BrowserPool, BrowserPoolConfig};
use scanworker::findings::{self, TranslationTable};
use scanworker::rule_engine::{self, RunnerConfig};
use scanworker::url_guard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let target = args.get(1).map(String::as_str).unwrap_or("https://example.com");

    let parsed = url_guard::validate_with_dns(target).await?;
    tracing::info!("scanning {}", parsed.normalized());

    let pool = BrowserPool::new(BrowserPoolConfig::default());
    let hardened = pool.acquire_page().await?;
    let page = hardened.page();

    page.goto(parsed.as_url().as_str()).await?;
    page.wait_for_navigation().await?;

    let result = rule_engine::run(page, parsed.normalized(), &RunnerConfig::default()).await;
    pool.release_page(hardened).await;
    pool.shutdown().await;

    println!("url: {}", result.url);
    println!("title: {}", result.title);
    println!("score: {:.1}", result.score);
    println!(
        "rules: {} passed, {} failed, {} incomplete",
        result.passed_rules, result.failed_rules, result.incomplete_rules
    );

    if let Some(error) = &result.error {
        println!("engine error: {error}");
        return Ok(());
    }

    let table = TranslationTable::builtin_fallback();
    let page_id = uuid::Uuid::new_v4();
    let normalized = findings::normalize_violations(page_id, &result.findings, &table);

    for finding in &normalized {
        println!(
            "- [{}] {} ({})",
            finding.impact.as_str(),
            finding.title_localized,
            finding.rule_id
        );
    }

    Ok(())
}
