//! Canned data for offline use: the mock provider backend, the client's
//! mock mode and the scripted progress sequence.

use chrono::{TimeZone, Utc};

use crate::analytics::Trends;
use crate::evaluation::evaluate_responses;
use crate::providers::Provider;
use crate::types::{
    LlmResponse, ProgressUpdate, Query, QueryResults, QueryStatus, ResponseMetadata,
    StatusReport, SubmitResponse,
};

pub const MOCK_QUERY_ID: &str = "abc-123-def-456";
pub const MOCK_PROMPT: &str = "What are the best Python automation scripts for SEO in 2025?";

/// Simulated latency of each client call in mock mode, in milliseconds.
pub const SUBMIT_DELAY_MS: u64 = 500;
pub const RESULTS_DELAY_MS: u64 = 800;
pub const STATUS_DELAY_MS: u64 = 300;
pub const ANALYTICS_DELAY_MS: u64 = 600;

/// Wait before the first scripted progress update.
pub const PROGRESS_START_MS: u64 = 500;
/// Wait after each scripted progress update before the next one.
pub const PROGRESS_DELAYS_MS: [u64; 5] = [1000, 3000, 5000, 2000, 1000];

const OPENAI_TEXT: &str = "Here are the top Python SEO automation scripts for 2025:

## 1. Advanced Web Scraping & Analysis
Use requests and BeautifulSoup to pull the title, meta description, H1 tags and internal links of every page, then load the results into pandas for analysis.

## 2. Google Search Console API Integration
- Automate ranking tracking
- Pull click-through rates and impressions
- Monitor Core Web Vitals programmatically

## 3. Schema Markup Generator
Automatically generate structured data for different content types using Python templates.

## 4. Technical SEO Audit Scripts
- Page speed analysis
- Mobile-friendliness testing
- SSL certificate validation
- Sitemap validation

## 5. Content Gap Analysis Tool
Compare your content against competitors to identify opportunities.

These scripts leverage modern libraries like Scrapy, Selenium, and FastAPI to create powerful SEO workflows.";

const CLAUDE_TEXT: &str = "Python SEO automation has evolved significantly in 2025. Here are the essential scripts every SEO professional should have:

### 1. Advanced Web Scraping Framework
A Selenium based crawler that measures page speed, collects Core Web Vitals and analyses competitor keyword strategies through SERP analysis.

### 2. Content Optimization Pipeline
- Automated keyword density analysis
- Readability score calculation
- Topic clustering and content gaps
- Internal linking recommendations

### 3. Technical SEO Monitoring
- Log file analysis for crawl errors
- Redirect chain detection
- Image optimization checks
- Page load time monitoring

### 4. SERP Tracking & Analysis
Build custom SERP trackers that monitor position changes over time, featured snippet opportunities and local pack rankings.

### 5. Link Building Automation
- Prospect identification scripts
- Backlink monitoring and alerts
- Broken link finding tools

The key is building modular, reusable components that can be combined into powerful SEO workflows. Focus on API integrations with tools like Screaming Frog, Ahrefs, and Google's suite of tools.";

const PERPLEXITY_TEXT: &str = "Based on the latest developments in SEO automation for 2025, here are the most effective Python scripts:

## 1. AI-Enhanced Content Analysis
Combine textstat readability scoring with nltk entity extraction and ask a language model for optimisation suggestions. According to recent industry surveys, teams that automate content review publish faster.

## 2. Real-Time SERP Monitoring
- Track keyword positions across multiple search engines
- Monitor competitor movements
- Alert on ranking changes

## 3. E-A-T Analysis Tools
Scripts that evaluate author expertise signals, content authority indicators, trustworthiness factors and citation quality.

## 4. Core Web Vitals Automation
- Lighthouse CI integration
- Performance budgets monitoring
- PageSpeed Insights API automation

## 5. Local SEO Automation
- Google Business Profile posting automation
- Citation consistency checking
- Review monitoring and response

These tools integrate with modern APIs and leverage machine learning to provide actionable SEO insights. The focus in 2025 is on AI-assisted analysis and real-time monitoring rather than just data collection.";

const GEMINI_TEXT: &str = "For SEO automation in 2025, Python remains the most practical choice.

1. Crawl your site on a schedule with Scrapy and store titles, canonical tags and status codes so that redirects and broken pages surface early.
2. Pull Search Console and Google Analytics data through their APIs into a single dashboard to correlate rankings with traffic.
3. Generate structured data from your product catalogue so that schema markup stays in sync with inventory.
4. Track Core Web Vitals with the PageSpeed Insights API and alert when a template regresses.

Keep each script small and composable, and run them from a cron job or a workflow tool.";

/// Deterministic answer text for `provider`, mentioning `prompt`.
pub fn mock_answer(provider: Provider, prompt: &str) -> String {
    let body = match provider {
        Provider::Openai => OPENAI_TEXT,
        Provider::Anthropic => CLAUDE_TEXT,
        Provider::Perplexity => PERPLEXITY_TEXT,
        Provider::Google => GEMINI_TEXT,
    };
    let prompt = prompt.trim();
    if prompt.is_empty() {
        body.to_string()
    } else {
        format!("Question: {prompt}\n\n{body}")
    }
}

/// Complete results for [`MOCK_QUERY_ID`] with metrics computed from the
/// canned answers.
pub fn mock_query_results() -> QueryResults {
    let created_at = Utc
        .with_ymd_and_hms(2025, 8, 3, 10, 30, 0)
        .single()
        .unwrap_or_else(Utc::now);

    let canned = [
        ("resp-openai-1", "openai", "gpt-4", OPENAI_TEXT, 487, 15_300),
        ("resp-claude-2", "anthropic", "claude-3-sonnet", CLAUDE_TEXT, 392, 22_100),
        (
            "resp-perplexity-3",
            "perplexity",
            "llama-3.1-sonar-large-128k-online",
            PERPLEXITY_TEXT,
            445,
            28_700,
        ),
    ];
    let responses: Vec<LlmResponse> = canned
        .iter()
        .map(|(id, provider, model, text, tokens, ms)| {
            let mut r = LlmResponse::success(
                MOCK_QUERY_ID,
                provider,
                model,
                text.to_string(),
                ResponseMetadata {
                    tokens_used: *tokens,
                    response_time_ms: *ms,
                },
            );
            r.id = id.to_string();
            r.created_at = created_at;
            r
        })
        .collect();

    let query = Query {
        id: MOCK_QUERY_ID.to_string(),
        prompt: MOCK_PROMPT.to_string(),
        category: "automation".to_string(),
        tags: ["python", "seo", "scripts", "automation", "2025"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        providers: responses.iter().map(|r| r.provider.clone()).collect(),
        created_at,
        updated_at: created_at,
        status: QueryStatus::Complete,
        response_count: responses.len(),
        successful_responses: responses.len(),
    };
    let metrics = evaluate_responses(&responses, Some("automation"), usize::MAX);

    QueryResults {
        query,
        responses,
        evaluation_metrics: Some(metrics),
    }
}

/// The five-step progress script: three processing steps, analyzing,
/// complete.
pub fn mock_progress_updates() -> Vec<ProgressUpdate> {
    let all = || vec!["openai".to_string(), "anthropic".to_string(), "perplexity".to_string()];
    vec![
        ProgressUpdate {
            status: QueryStatus::Processing,
            completed_providers: vec![],
            total_providers: 3,
            message: "Starting LLM queries...".into(),
            progress_percentage: 0,
        },
        ProgressUpdate {
            status: QueryStatus::Processing,
            completed_providers: vec!["openai".into()],
            total_providers: 3,
            message: "OpenAI completed (1/3 providers)".into(),
            progress_percentage: 33,
        },
        ProgressUpdate {
            status: QueryStatus::Processing,
            completed_providers: vec!["openai".into(), "anthropic".into()],
            total_providers: 3,
            message: "Claude completed (2/3 providers)".into(),
            progress_percentage: 67,
        },
        ProgressUpdate {
            status: QueryStatus::Analyzing,
            completed_providers: all(),
            total_providers: 3,
            message: "All providers complete. Analyzing responses...".into(),
            progress_percentage: 85,
        },
        ProgressUpdate {
            status: QueryStatus::Complete,
            completed_providers: all(),
            total_providers: 3,
            message: "Analysis complete! Results ready.".into(),
            progress_percentage: 100,
        },
    ]
}

pub fn mock_submit_response() -> SubmitResponse {
    SubmitResponse {
        query_id: MOCK_QUERY_ID.to_string(),
        status: QueryStatus::Processing,
    }
}

pub fn mock_status(query_id: &str) -> StatusReport {
    StatusReport {
        id: query_id.to_string(),
        status: QueryStatus::Complete,
        completed_providers: vec!["openai".into(), "anthropic".into(), "perplexity".into()],
        total_providers: 3,
        message: QueryStatus::Complete.message().to_string(),
        estimated_completion: None,
    }
}

/// Canned trend payload for the analytics call.
pub fn mock_analytics() -> serde_json::Value {
    serde_json::json!({
        "monthly_queries": [
            { "month": "Jan", "queries": 45, "providers": ["openai", "anthropic"] },
            { "month": "Feb", "queries": 52, "providers": ["openai", "anthropic", "perplexity"] },
            { "month": "Mar", "queries": 38, "providers": ["openai", "anthropic"] },
            { "month": "Apr", "queries": 67, "providers": ["openai", "anthropic", "perplexity"] },
            { "month": "May", "queries": 72, "providers": ["openai", "anthropic", "perplexity", "google"] },
            { "month": "Jun", "queries": 84, "providers": ["openai", "anthropic", "perplexity", "google"] }
        ],
        "popular_categories": [
            { "category": "automation", "percentage": 35, "queries": 124 },
            { "category": "technical", "percentage": 28, "queries": 98 },
            { "category": "content", "percentage": 22, "queries": 78 },
            { "category": "analytics", "percentage": 15, "queries": 52 }
        ],
        "similarity_trends": [
            { "date": "2025-07-01", "avg_similarity": 0.72 },
            { "date": "2025-07-08", "avg_similarity": 0.68 },
            { "date": "2025-07-15", "avg_similarity": 0.75 },
            { "date": "2025-07-22", "avg_similarity": 0.71 },
            { "date": "2025-07-29", "avg_similarity": 0.69 },
            { "date": "2025-08-05", "avg_similarity": 0.73 }
        ]
    })
}

/// Trends over the single canned query.
pub fn mock_trends(days: u32) -> Trends {
    let results = mock_query_results();
    let q = &results.query;
    let mut trends = Trends {
        days,
        total_queries: 1,
        total_responses: results.responses.len(),
        ..Default::default()
    };
    trends.queries_by_status.insert(q.status.to_string(), 1);
    for p in &q.providers {
        trends.provider_distribution.insert(p.clone(), 1);
    }
    trends.category_distribution.insert(q.category.clone(), 1);
    trends
        .daily_queries
        .insert(q.created_at.format("%Y-%m-%d").to_string(), 1);
    trends
}
