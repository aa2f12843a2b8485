//! Markdown export of one query's results.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::dashboard::DashboardSummary;
use crate::error::Result;
use crate::types::{EvaluationMetrics, LlmResponse, Query, QueryResults};

const PREVIEW_CHARS: usize = 60;
const DETAILED_RESPONSE_CHARS: usize = 800;
const SUMMARY_RESPONSE_CHARS: usize = 300;
const FOOTER: &str = "Generated by LLM SEO Evaluator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Detailed,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub include_metrics: bool,
    pub include_responses: bool,
    pub include_comparison: bool,
    pub format: ReportFormat,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_metrics: true,
            include_responses: true,
            include_comparison: true,
            format: ReportFormat::Detailed,
        }
    }
}

impl ReportOptions {
    pub fn summary() -> Self {
        Self {
            format: ReportFormat::Summary,
            ..Self::default()
        }
    }

    fn response_limit(&self) -> usize {
        match self.format {
            ReportFormat::Detailed => DETAILED_RESPONSE_CHARS,
            ReportFormat::Summary => SUMMARY_RESPONSE_CHARS,
        }
    }
}

/// First `max` characters of `s`, with `...` appended when cut.
fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Render the report as Markdown. `now` is the generation timestamp.
pub fn render_report(results: &QueryResults, options: &ReportOptions, now: DateTime<Utc>) -> String {
    let summary = DashboardSummary::from_results(results);
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = write_header(&mut out, &results.query, now);
    let _ = write_query_info(&mut out, &results.query);
    let _ = write_executive_summary(&mut out, results, &summary);

    if let Some(metrics) = &results.evaluation_metrics {
        if options.include_metrics {
            let _ = write_metrics_table(&mut out, metrics);
        }
        if options.include_comparison {
            let _ = write_similarity_matrix(&mut out, metrics);
        }
    }
    if options.include_responses {
        let _ = write_responses(&mut out, &results.responses, options.response_limit());
    }

    let _ = writeln!(out, "---\n\n*{FOOTER}*");
    out
}

fn write_header(out: &mut String, query: &Query, now: DateTime<Utc>) -> std::fmt::Result {
    writeln!(out, "# LLM SEO Evaluation Report\n")?;
    writeln!(out, "**Analysis of:** \"{}\"\n", preview(&query.prompt, PREVIEW_CHARS))?;
    writeln!(
        out,
        "Generated: {} | Providers: {}\n",
        now.format("%B %-d, %Y"),
        query.providers.len()
    )
}

fn write_query_info(out: &mut String, query: &Query) -> std::fmt::Result {
    writeln!(out, "## Query Information\n")?;
    writeln!(out, "- **Prompt:** {}", query.prompt)?;
    writeln!(out, "- **Category:** {}", query.category)?;
    writeln!(out, "- **Tags:** {}", query.tags.join(", "))?;
    writeln!(out, "- **Providers:** {}", query.providers.join(", "))?;
    writeln!(out, "- **Submitted:** {}\n", query.created_at.format("%Y-%m-%d %H:%M UTC"))
}

fn write_executive_summary(
    out: &mut String,
    results: &QueryResults,
    summary: &DashboardSummary,
) -> std::fmt::Result {
    writeln!(out, "## Executive Summary\n")?;
    writeln!(
        out,
        "- Evaluated {} responses from different LLM providers",
        results.responses.len()
    )?;
    if results.evaluation_metrics.is_none() {
        return writeln!(out, "- Analysis has not run for this query yet\n");
    }
    writeln!(
        out,
        "- Average originality score: {:.0}%",
        summary.avg_originality * 100.0
    )?;
    writeln!(
        out,
        "- Average readability score: {:.0}%",
        summary.avg_readability * 100.0
    )?;
    if let (Some(min), Some(max)) = (summary.min_similarity, summary.max_similarity) {
        writeln!(out, "- Response similarity ranges from {min:.2} to {max:.2}")?;
    }
    writeln!(out, "- Total unique tools mentioned: {}", summary.unique_tools)?;
    if let Some(p) = &summary.most_original {
        writeln!(out, "- Most original answer: {p}")?;
    }
    if !summary.failed_providers.is_empty() {
        writeln!(out, "- Failed providers: {}", summary.failed_providers.join(", "))?;
    }
    writeln!(out)
}

fn write_metrics_table(out: &mut String, metrics: &EvaluationMetrics) -> std::fmt::Result {
    writeln!(out, "## Performance Metrics\n")?;
    writeln!(out, "| Provider | Originality | Readability | Keywords | Tools |")?;
    writeln!(out, "|---|---|---|---|---|")?;
    for (provider, m) in &metrics.response_metrics {
        writeln!(
            out,
            "| {} | {:.2} | {:.2} | {} | {} |",
            provider.to_uppercase(),
            m.originality_score,
            m.readability_score,
            m.keyword_count,
            m.tool_mentions.len()
        )?;
    }
    writeln!(out)
}

fn write_similarity_matrix(out: &mut String, metrics: &EvaluationMetrics) -> std::fmt::Result {
    writeln!(out, "## Provider Similarity Matrix\n")?;
    writeln!(
        out,
        "Values represent similarity scores between providers (0.0 = completely different, 1.0 = identical)\n"
    )?;
    let header: Vec<String> = metrics.providers.iter().map(|p| p.to_uppercase()).collect();
    writeln!(out, "| | {} |", header.join(" | "))?;
    writeln!(out, "|---|{}", "---|".repeat(header.len()))?;
    for (provider, row) in metrics.providers.iter().zip(&metrics.similarity_matrix) {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.2}")).collect();
        writeln!(out, "| **{}** | {} |", provider.to_uppercase(), cells.join(" | "))?;
    }
    writeln!(out)
}

fn write_responses(out: &mut String, responses: &[LlmResponse], limit: usize) -> std::fmt::Result {
    for r in responses {
        writeln!(out, "## {} Response ({})\n", r.provider.to_uppercase(), r.model)?;
        if let Some(err) = &r.error_message {
            writeln!(out, "> Failed: {err}\n")?;
            continue;
        }
        writeln!(
            out,
            "Tokens: {} | Response Time: {}ms\n",
            r.metadata.tokens_used, r.metadata.response_time_ms
        )?;
        if r.response_text.chars().count() > limit {
            writeln!(
                out,
                "{}\n\n*[Content truncated for report]*\n",
                preview(&r.response_text, limit)
            )?;
        } else {
            writeln!(out, "{}\n", r.response_text)?;
        }
    }
    Ok(())
}

/// `llm-analysis_<first four words>_<yyyy-MM-dd_HHmm>.md`, words lowercased
/// and stripped of everything but ASCII letters and digits.
pub fn report_filename(prompt: &str, now: DateTime<Utc>) -> String {
    let cleaned: String = prompt
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().take(4).collect();
    format!(
        "llm-analysis_{}_{}.md",
        words.join("-"),
        now.format("%Y-%m-%d_%H%M")
    )
}

/// Render and write the report into `dir` (or to `path` when it names a
/// file), returning the path written.
pub fn write_report(
    results: &QueryResults,
    options: &ReportOptions,
    target: Option<&Path>,
) -> Result<PathBuf> {
    let now = Utc::now();
    let name = report_filename(&results.query.prompt, now);
    let path = match target {
        Some(p) if p.is_dir() => p.join(name),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(name),
    };
    std::fs::write(&path, render_report(results, options, now))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::mock_query_results;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 3, 14, 5, 0)
            .single()
            .expect("valid date")
    }

    #[test]
    fn test_report_filename() {
        let name = report_filename(
            "What are the best Python automation scripts for SEO in 2025?",
            fixed_now(),
        );
        assert_eq!(name, "llm-analysis_what-are-the-best_2025-08-03_1405.md");
    }

    #[test]
    fn test_report_filename_strips_punctuation() {
        let name = report_filename("  SEO: tips & tricks!!  ", fixed_now());
        assert_eq!(name, "llm-analysis_seo-tips-tricks_2025-08-03_1405.md");
    }

    #[test]
    fn test_detailed_report_sections() {
        let md = render_report(&mock_query_results(), &ReportOptions::default(), fixed_now());
        assert!(md.starts_with("# LLM SEO Evaluation Report"));
        assert!(md.contains("## Query Information"));
        assert!(md.contains("## Executive Summary"));
        assert!(md.contains("## Performance Metrics"));
        assert!(md.contains("## Provider Similarity Matrix"));
        assert!(md.contains("## OPENAI Response (gpt-4)"));
        assert!(md.contains("Generated: August 3, 2025"));
        assert!(md.contains("[Content truncated for report]"));
        assert!(md.trim_end().ends_with("*Generated by LLM SEO Evaluator*"));
    }

    #[test]
    fn test_prompt_preview_is_cut_at_sixty_chars() {
        let md = render_report(&mock_query_results(), &ReportOptions::default(), fixed_now());
        let prompt = &mock_query_results().query.prompt;
        let expected: String = prompt.chars().take(60).collect();
        assert!(md.contains(&format!("\"{expected}...\"")));
    }

    #[test]
    fn test_summary_format_truncates_harder() {
        let results = mock_query_results();
        let detailed = render_report(&results, &ReportOptions::default(), fixed_now());
        let summary = render_report(&results, &ReportOptions::summary(), fixed_now());
        assert!(summary.len() < detailed.len());
    }

    #[test]
    fn test_sections_can_be_left_out() {
        let options = ReportOptions {
            include_metrics: false,
            include_responses: false,
            include_comparison: false,
            format: ReportFormat::Detailed,
        };
        let md = render_report(&mock_query_results(), &options, fixed_now());
        assert!(!md.contains("## Performance Metrics"));
        assert!(!md.contains("Response (gpt-4)"));
        assert!(md.contains("## Executive Summary"));
    }

    #[test]
    fn test_write_report_into_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_report(&mock_query_results(), &ReportOptions::default(), Some(dir.path()))
            .expect("write");
        assert!(path.starts_with(dir.path()));
        let text = std::fs::read_to_string(path).expect("read");
        assert!(text.contains("## Query Information"));
    }
}
