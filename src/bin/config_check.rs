//! # Configuration Checker
//!
//! Command-line tool for validating cashbox-ingest configuration files.
//! Helps identify configuration issues before starting the service.

use anyhow::Context;
use clap::Parser;

use cashbox_ingest::config::IngestConfig;

#[derive(Parser)]
#[command(name = "config-check")]
#[command(about = "Validate cashbox-ingest configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path (TOML). Environment overrides apply on top.
    #[arg(short, long)]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    println!("🔧 Validating cashbox-ingest configuration");
    if let Some(path) = &cli.config {
        println!("Config file: {path}");
    } else {
        println!("Config file: (none; defaults plus environment)");
    }
    println!();

    let config =
        IngestConfig::load(cli.config.as_deref()).context("❌ configuration invalid")?;
    println!("✅ Configuration loaded and validated");

    print_summary(&config);
    println!("\n🎉 All configuration checks passed!");
    Ok(())
}

fn print_summary(config: &IngestConfig) {
    println!("   • bind address: {}", config.service.bind_address);
    println!(
        "   • auth: {}",
        if config.auth.enabled { "enabled" } else { "disabled" }
    );

    if config.broker.enabled {
        println!(
            "   • provider: rabbitmq ({} source folder(s), max {} retries, first backoff {}s)",
            config.broker.sources.len(),
            config.broker.max_retries,
            config.broker.first_backoff().as_secs()
        );
    } else {
        println!("   • provider: in_process");
    }

    println!(
        "   • in-process queues: capacity {}, shutdown deadline {}s",
        config.queue.capacity, config.queue.shutdown_timeout_seconds
    );

    match config.webhook.report_timeout_seconds {
        Some(seconds) => println!(
            "   • webhook: {} (report timeout {seconds}s)",
            config.webhook.url
        ),
        None => println!("   • webhook: {} (no report timeout)", config.webhook.url),
    }

    println!(
        "   • dead-letter requeue endpoint: {}",
        if config.requeue.enabled { "enabled" } else { "disabled" }
    );
}
