use std::sync::Arc;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use llm_seo_eval::cli::{Args, Command};
use llm_seo_eval::client::ApiClient;
use llm_seo_eval::dashboard::{format_duration_ms, DashboardSummary, ScoreBand};
use llm_seo_eval::report::{write_report, ReportOptions};
use llm_seo_eval::server;
use llm_seo_eval::watcher::{ProgressWatcher, WatchMode, WatcherConfig};
use llm_seo_eval::{ProgressUpdate, QueryResults, QueryStatus, Result, Settings};

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("llm_seo_eval=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let settings = args.settings()?;

    if let Command::Serve { .. } = args.command {
        return serve(&settings).await;
    }

    let client = Arc::new(ApiClient::from_settings(&settings.client));
    let poll_interval = settings.client.poll_interval();

    match &args.command {
        Command::Serve { .. } => Ok(()),
        Command::Submit { watch, .. } => {
            let Some(submission) = args.command.submission() else {
                return Ok(());
            };
            let submitted = client.submit_query(&submission).await?;
            println!(
                "{} {} ({})",
                "Submitted".bright_green(),
                submitted.query_id.bold(),
                paint_status(submitted.status)
            );
            if *watch {
                let config = WatcherConfig {
                    mode: WatchMode::WebSocket,
                    poll_interval,
                };
                if follow(Arc::clone(&client), &submitted.query_id, config).await {
                    let results = client.query_results(&submitted.query_id).await?;
                    print_results(&results);
                }
            }
            Ok(())
        }
        Command::Status { id } => {
            let report = client.query_status(id).await?;
            println!("{} {}", report.id.bold(), paint_status(report.status));
            println!("  {}", report.message);
            println!(
                "  providers: {}/{} {}",
                report.completed_providers.len(),
                report.total_providers,
                report.completed_providers.join(", ").dimmed()
            );
            if let Some(eta) = report.estimated_completion {
                println!("  expected by: {}", eta.format("%H:%M:%S UTC"));
            }
            Ok(())
        }
        Command::Results { id, json } => {
            let results = client.query_results(id).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
            Ok(())
        }
        Command::Watch { id, ws } => {
            let mode = if *ws { WatchMode::WebSocket } else { WatchMode::Poll };
            follow(client, id, WatcherConfig { mode, poll_interval }).await;
            Ok(())
        }
        Command::Report {
            id,
            summary,
            output,
        } => {
            let results = client.query_results(id).await?;
            let options = if *summary {
                ReportOptions::summary()
            } else {
                ReportOptions::default()
            };
            let path = write_report(&results, &options, output.as_deref())?;
            println!("{} {}", "Report written to".bright_green(), path.display());
            Ok(())
        }
        Command::Analytics { query_id, days } => {
            let value = match query_id {
                Some(id) => serde_json::to_value(client.query_metrics(id).await?)?,
                None => serde_json::to_value(client.trends(*days).await?)?,
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Health => {
            let health = client.health().await?;
            println!(
                "{} {} ({})",
                health.service.bold(),
                health.status.bright_green(),
                client.base_url()
            );
            if !health.providers.is_empty() {
                println!("  providers: {}", health.providers.join(", "));
            }
            Ok(())
        }
    }
}

async fn serve(settings: &Settings) -> Result<()> {
    eprintln!(
        "{}",
        format!("  Evaluator running at http://{}", settings.bind_addr()).bright_green()
    );
    let providers: Vec<String> = settings
        .configured_providers()
        .iter()
        .map(|p| p.to_string())
        .collect();
    if providers.is_empty() {
        eprintln!(
            "{}",
            "  No provider API keys configured; every query will fail (try --mock).".yellow()
        );
    } else {
        eprintln!("  Providers: {}", providers.join(", ").bright_cyan());
    }
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    server::serve(settings).await
}

/// Print progress until a terminal update. `true` when the query completed.
async fn follow(client: Arc<ApiClient>, query_id: &str, config: WatcherConfig) -> bool {
    let mut watcher = ProgressWatcher::spawn(client, query_id, config);
    let mut last_status = None;
    while let Some(update) = watcher.next_update().await {
        print_progress(&update);
        last_status = Some(update.status);
    }
    last_status == Some(QueryStatus::Complete)
}

fn print_progress(update: &ProgressUpdate) {
    let filled = usize::from(update.progress_percentage) / 5;
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(20 - filled.min(20)));
    println!(
        "  [{}] {:>3}%  {}  {}",
        bar.bright_cyan(),
        update.progress_percentage,
        paint_status(update.status),
        update.message
    );
}

fn paint_status(status: QueryStatus) -> ColoredString {
    match status {
        QueryStatus::Pending => status.as_str().dimmed(),
        QueryStatus::Processing | QueryStatus::Analyzing => status.as_str().bright_yellow(),
        QueryStatus::Complete => status.as_str().bright_green(),
        QueryStatus::Error => status.as_str().bright_red(),
    }
}

fn paint_score(score: f64) -> ColoredString {
    let text = format!("{:.0}%", score * 100.0);
    match ScoreBand::of(score) {
        ScoreBand::High => text.bright_green(),
        ScoreBand::Medium => text.yellow(),
        ScoreBand::Low => text.bright_red(),
    }
}

fn print_results(results: &QueryResults) {
    let q = &results.query;
    println!("\n{} {}", q.id.bold(), paint_status(q.status));
    println!("  {}", q.prompt);
    println!("  category: {}  providers: {}", q.category, q.providers.join(", "));

    if results.evaluation_metrics.is_none() {
        println!("  {}", "No evaluation metrics yet.".dimmed());
    }
    let s = DashboardSummary::from_results(results);
    println!(
        "\n  responses: {} ({} ok)  tokens: {}  avg time: {}",
        s.response_count,
        s.successful_count,
        s.total_tokens,
        format_duration_ms(s.avg_response_time_ms)
    );
    println!(
        "  originality: {}  readability: {}  similarity: {:.2}  tools: {}",
        paint_score(s.avg_originality),
        paint_score(s.avg_readability),
        s.avg_similarity,
        s.unique_tools
    );
    for row in &s.providers {
        println!(
            "  {:<12} {:<34} orig {}  read {}  words {:>5}  {}",
            row.provider.bold(),
            row.model.dimmed(),
            paint_score(row.originality),
            paint_score(row.readability),
            row.word_count,
            format_duration_ms(row.response_time_ms as f64)
        );
    }
    for p in &s.failed_providers {
        println!("  {:<12} {}", p.bold(), "failed".bright_red());
    }
    if let (Some(orig), Some(read)) = (&s.most_original, &s.most_readable) {
        println!("\n  most original: {}  most readable: {}", orig.bright_cyan(), read.bright_cyan());
    }
}
