//! # Stage: Evaluation
//!
//! ## Responsibility
//! Score a set of provider responses to the same prompt: pairwise
//! similarity, per-response originality/readability/factuality, keyword,
//! tool and SEO-term extraction, and pairwise cross comparisons.
//!
//! ## Guarantees
//! - Pure: no I/O, no clock, no randomness
//! - The similarity matrix is square, symmetric, has a diagonal of exactly
//!   1.0 and every cell lies in `[0, 1]`
//! - Scores are clamped to `[0, 1]`; empty input never divides by zero
//! - Failed responses never reach the scorers
//!
//! ## NOT Responsible For
//! - Embedding-based or TF-IDF similarity
//! - Deciding which responses belong to a query (the orchestrator does that)

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::types::{
    CrossComparison, EvaluationMetrics, LlmResponse, OverallMetrics, ResponseMetrics,
};

// ---------------------------------------------------------------------------
// Catalogues
// ---------------------------------------------------------------------------

/// SEO tools whose mention in a response is recorded.
pub const SEO_TOOLS: &[&str] = &[
    "google analytics",
    "search console",
    "semrush",
    "ahrefs",
    "moz",
    "screaming frog",
    "screaming frog seo spider",
    "google tag manager",
    "gtm",
    "google ads",
    "bing ads",
    "facebook ads",
    "linkedin ads",
    "twitter ads",
    "hotjar",
    "crazy egg",
    "optimizely",
    "vwo",
    "unbounce",
    "leadpages",
    "wordpress",
    "shopify",
    "woocommerce",
    "magento",
];

const TECHNICAL_TERMS: &[&str] = &[
    "seo",
    "meta tags",
    "schema markup",
    "structured data",
    "robots.txt",
    "sitemap",
    "canonical",
    "redirects",
    "page speed",
    "core web vitals",
    "mobile friendly",
    "responsive design",
    "https",
    "ssl",
    "domain authority",
];

const CONTENT_TERMS: &[&str] = &[
    "content marketing",
    "keyword research",
    "content strategy",
    "blog posts",
    "landing pages",
    "meta descriptions",
    "title tags",
    "heading tags",
    "alt text",
    "internal linking",
    "content optimization",
    "readability",
    "engagement",
];

const AUTOMATION_TERMS: &[&str] = &[
    "python",
    "script",
    "automation",
    "api",
    "web scraping",
    "data analysis",
    "reporting",
    "dashboard",
    "cron job",
    "scheduled task",
    "workflow",
    "integration",
    "webhook",
    "bot",
    "crawler",
];

const ANALYTICS_TERMS: &[&str] = &[
    "google analytics",
    "search console",
    "semrush",
    "ahrefs",
    "moz",
    "screaming frog",
    "data visualization",
    "kpi",
    "metrics",
    "reporting",
    "tracking",
    "conversion",
    "traffic",
    "rankings",
];

/// Phrases that suggest a claim is backed by a source.
const FACTUAL_INDICATORS: &[&str] = &[
    "according to",
    "research shows",
    "studies indicate",
    "data suggests",
    "statistics show",
    "analysis reveals",
    "evidence suggests",
    "findings indicate",
    "report shows",
    "survey indicates",
    "study found",
    "research indicates",
];

/// SEO vocabulary for `category`; empty for unknown categories.
pub fn seo_terms_for(category: &str) -> &'static [&'static str] {
    match category.trim().to_lowercase().as_str() {
        "technical" => TECHNICAL_TERMS,
        "content" => CONTENT_TERMS,
        "automation" => AUTOMATION_TERMS,
        "analytics" => ANALYTICS_TERMS,
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Tokenisation
// ---------------------------------------------------------------------------

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Lowercase runs of alphanumeric characters.
fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Sentences split on runs of `.`, `!` and `?`. Never less than one so
/// that per-sentence averages stay finite.
///
/// Only non-blank segments count, so `"One. Two."` is two sentences, not
/// the three a bare split on the terminators would report.
fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1)
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Jaccard index of the lowercase whitespace-separated word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let wa = word_set(a);
    let wb = word_set(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Cosine of the term-frequency vectors of `a` and `b`.
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let mut ta: HashMap<String, f64> = HashMap::new();
    for t in terms(a) {
        *ta.entry(t).or_insert(0.0) += 1.0;
    }
    let mut tb: HashMap<String, f64> = HashMap::new();
    for t in terms(b) {
        *tb.entry(t).or_insert(0.0) += 1.0;
    }
    let dot: f64 = ta
        .iter()
        .filter_map(|(t, x)| tb.get(t).map(|y| x * y))
        .sum();
    let na = ta.values().map(|x| x * x).sum::<f64>().sqrt();
    let nb = tb.values().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    clamp_unit(dot / (na * nb))
}

/// Pairwise Jaccard matrix over `texts` and the mean of its off-diagonal
/// cells. Fewer than two texts give an average of 1.0.
pub fn similarity_matrix(texts: &[&str]) -> (Vec<Vec<f64>>, f64) {
    let n = texts.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let s = jaccard_similarity(texts[i], texts[j]);
            matrix[i][j] = s;
            matrix[j][i] = s;
        }
    }
    let average = average_off_diagonal(&matrix);
    (matrix, average)
}

/// Mean of the off-diagonal cells; 1.0 when there are none.
pub fn average_off_diagonal(matrix: &[Vec<f64>]) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for (i, row) in matrix.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            if i != j {
                total += v;
                count += 1;
            }
        }
    }
    if count == 0 {
        1.0
    } else {
        total / count as f64
    }
}

/// Mean of row `i` without its diagonal cell; 0.0 for a single response.
pub fn row_similarity(matrix: &[Vec<f64>], i: usize) -> f64 {
    let Some(row) = matrix.get(i) else {
        return 0.0;
    };
    let others: Vec<f64> = row
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, v)| *v)
        .collect();
    if others.is_empty() {
        0.0
    } else {
        others.iter().sum::<f64>() / others.len() as f64
    }
}

/// Provider pairs whose similarity reaches `threshold`, most similar first.
pub fn similar_pairs(metrics: &EvaluationMetrics, threshold: f64) -> Vec<(String, String, f64)> {
    let mut pairs = Vec::new();
    for (i, row) in metrics.similarity_matrix.iter().enumerate() {
        for (j, v) in row.iter().enumerate().skip(i + 1) {
            if *v >= threshold {
                if let (Some(a), Some(b)) = (metrics.providers.get(i), metrics.providers.get(j)) {
                    pairs.push((a.clone(), b.clone(), *v));
                }
            }
        }
    }
    pairs.sort_by(|x, y| y.2.total_cmp(&x.2));
    pairs
}

// ---------------------------------------------------------------------------
// Per-response scores
// ---------------------------------------------------------------------------

/// Keywords, tools and SEO terms found in one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordAnalysis {
    pub keywords: Vec<String>,
    pub tools: Vec<String>,
    pub seo_terms: Vec<String>,
}

/// Words of at least three ASCII letters that occur twice or more, sorted;
/// tool and SEO-term mentions in catalogue order.
pub fn extract_keywords(text: &str, category: Option<&str>) -> KeywordAnalysis {
    if text.is_empty() {
        return KeywordAnalysis::default();
    }
    let lower = text.to_lowercase();

    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    for word in lower.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.len() >= 3 && word.chars().all(|c| c.is_ascii_alphabetic()) {
            *freq.entry(word).or_insert(0) += 1;
        }
    }
    let keywords = freq
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .map(|(w, _)| w.to_string())
        .collect();

    let tools = SEO_TOOLS
        .iter()
        .filter(|t| lower.contains(*t))
        .map(|t| t.to_string())
        .collect();

    let seo_terms = category
        .map(seo_terms_for)
        .unwrap_or(&[])
        .iter()
        .filter(|t| lower.contains(*t))
        .map(|t| t.to_string())
        .collect();

    KeywordAnalysis {
        keywords,
        tools,
        seo_terms,
    }
}

/// Readability in `[0, 1]`, higher is easier.
///
/// Mean of a sentence-length score (`1 - (avg_len - 15) / 20`, floored at
/// zero) and the share of words that are at most six characters long.
pub fn readability_score(text: &str) -> f64 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let avg_sentence_len = words.len() as f64 / sentence_count(text) as f64;
    let long_words = words.iter().filter(|w| w.chars().count() > 6).count();
    let long_ratio = long_words as f64 / words.len() as f64;

    let sentence_score = (1.0 - (avg_sentence_len - 15.0) / 20.0).max(0.0);
    let complexity_score = (1.0 - long_ratio).max(0.0);
    clamp_unit((sentence_score + complexity_score) / 2.0)
}

/// One minus the mean share of `text`'s vocabulary found in each of
/// `others`. 1.0 when `text` is empty or there is nothing to compare with.
pub fn originality_score(text: &str, others: &[&str]) -> f64 {
    let words = word_set(text);
    if words.is_empty() || others.is_empty() {
        return 1.0;
    }
    let total_overlap: f64 = others
        .iter()
        .map(|other| {
            let ow = word_set(other);
            words.intersection(&ow).count() as f64 / words.len() as f64
        })
        .sum();
    clamp_unit(1.0 - total_overlap / others.len() as f64)
}

/// Factual indicator phrases per hundred words, capped at 1.0.
pub fn factuality_score(text: &str) -> f64 {
    let word_count = text.split_whitespace().count();
    if word_count == 0 {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = FACTUAL_INDICATORS
        .iter()
        .filter(|p| lower.contains(*p))
        .count();
    clamp_unit(hits as f64 / (word_count as f64 / 100.0))
}

/// Words per sentence.
pub fn response_complexity(text: &str) -> f64 {
    let words = text.split_whitespace().count();
    if words == 0 {
        return 0.0;
    }
    words as f64 / sentence_count(text) as f64
}

/// Score one response against the others. `similarity_to_others` is left
/// at zero; it comes from the matrix.
pub fn evaluate_response(text: &str, others: &[&str], category: Option<&str>) -> ResponseMetrics {
    let kw = extract_keywords(text, category);
    ResponseMetrics {
        originality_score: originality_score(text, others),
        similarity_to_others: 0.0,
        readability_score: readability_score(text),
        factuality_score: factuality_score(text),
        keyword_count: kw.keywords.len(),
        keyword_list: kw.keywords,
        tool_mentions: kw.tools,
        seo_terms: kw.seo_terms,
        response_length: text.chars().count(),
        response_complexity: response_complexity(text),
    }
}

fn sorted_intersection(a: &[String], b: &[String]) -> Vec<String> {
    let sa: BTreeSet<&String> = a.iter().collect();
    let sb: BTreeSet<&String> = b.iter().collect();
    sa.intersection(&sb).map(|s| s.to_string()).collect()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Evaluate every successful response of one query.
///
/// When a provider answered more than once (after a retry) its latest
/// successful answer is used. Texts longer than `max_len` characters are
/// cut before scoring.
pub fn evaluate_responses(
    responses: &[LlmResponse],
    category: Option<&str>,
    max_len: usize,
) -> EvaluationMetrics {
    let mut latest: Vec<&LlmResponse> = Vec::new();
    for r in responses.iter().filter(|r| r.is_successful()) {
        match latest.iter_mut().find(|x| x.provider == r.provider) {
            Some(slot) => {
                if r.created_at >= slot.created_at {
                    *slot = r;
                }
            }
            None => latest.push(r),
        }
    }
    if latest.is_empty() {
        return EvaluationMetrics {
            average_similarity: 0.0,
            ..Default::default()
        };
    }

    let providers: Vec<String> = latest.iter().map(|r| r.provider.clone()).collect();
    let texts: Vec<&str> = latest
        .iter()
        .map(|r| truncate_chars(&r.response_text, max_len))
        .collect();
    let (matrix, average_similarity) = similarity_matrix(&texts);

    let mut per_provider: Vec<ResponseMetrics> = Vec::with_capacity(texts.len());
    for (i, text) in texts.iter().enumerate() {
        let others: Vec<&str> = texts
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, t)| *t)
            .collect();
        let mut m = evaluate_response(text, &others, category);
        m.similarity_to_others = row_similarity(&matrix, i);
        per_provider.push(m);
    }

    let mut cross_comparisons = Vec::new();
    for i in 0..texts.len() {
        for j in (i + 1)..texts.len() {
            cross_comparisons.push(CrossComparison {
                providers: (providers[i].clone(), providers[j].clone()),
                cosine_similarity: cosine_similarity(texts[i], texts[j]),
                jaccard_similarity: matrix[i][j],
                common_keywords: sorted_intersection(
                    &per_provider[i].keyword_list,
                    &per_provider[j].keyword_list,
                ),
                tool_overlap: sorted_intersection(
                    &per_provider[i].tool_mentions,
                    &per_provider[j].tool_mentions,
                ),
            });
        }
    }

    let n = per_provider.len() as f64;
    let tools: HashSet<&String> = per_provider.iter().flat_map(|m| &m.tool_mentions).collect();
    let seo: HashSet<&String> = per_provider.iter().flat_map(|m| &m.seo_terms).collect();
    let overall = OverallMetrics {
        avg_originality: per_provider.iter().map(|m| m.originality_score).sum::<f64>() / n,
        avg_readability: per_provider.iter().map(|m| m.readability_score).sum::<f64>() / n,
        avg_factuality: per_provider.iter().map(|m| m.factuality_score).sum::<f64>() / n,
        total_keywords: per_provider.iter().map(|m| m.keyword_count).sum(),
        total_tools: tools.len(),
        total_seo_terms: seo.len(),
    };

    let response_metrics = providers.iter().cloned().zip(per_provider).collect();

    EvaluationMetrics {
        providers,
        similarity_matrix: matrix,
        average_similarity,
        response_metrics,
        cross_comparisons,
        overall,
    }
}
