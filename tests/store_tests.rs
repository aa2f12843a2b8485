//! External tests for the query store: both backends behave alike, and the
//! SQLite file survives a reopen.

use std::collections::BTreeMap;

use chrono::Duration;
use llm_seo_eval::evaluation::evaluate_responses;
use llm_seo_eval::store::{MemoryStore, QueryStore, SqliteStore};
use llm_seo_eval::types::{LlmResponse, Query, QueryStatus, QuerySubmission, ResponseMetadata};
use llm_seo_eval::{EvalError, Provider};
use rstest::rstest;
use tempfile::TempDir;

fn query(prompt: &str, age_secs: i64) -> Query {
    let sub = QuerySubmission {
        prompt: prompt.into(),
        category: "Content".into(),
        tags: vec!["blog".into()],
        providers: vec!["openai".into(), "anthropic".into()],
    };
    let mut q = Query::new(&sub, &[Provider::Openai, Provider::Anthropic]);
    q.created_at -= Duration::seconds(age_secs);
    q.updated_at = q.created_at;
    q
}

fn answer(query_id: &str, provider: &str, text: &str) -> LlmResponse {
    LlmResponse::success(
        query_id,
        provider,
        "model-x",
        text.into(),
        ResponseMetadata {
            tokens_used: 120,
            response_time_ms: 900,
        },
    )
}

/// A store plus whatever keeps it alive.
fn open(kind: &str) -> (Box<dyn QueryStore>, Option<TempDir>) {
    match kind {
        "memory" => (Box::new(MemoryStore::new()), None),
        "sqlite" => {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = SqliteStore::open(&dir.path().join("eval.db")).expect("open");
            (Box::new(store), Some(dir))
        }
        other => panic!("unknown store kind {other}"),
    }
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_create_and_get(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let q = query("how do I fix crawl errors?", 0);
    store.create_query(&q).expect("create");
    let loaded = store.get_query(&q.id).expect("get");
    assert_eq!(loaded.prompt, q.prompt);
    assert_eq!(loaded.category, "content");
    assert_eq!(loaded.tags, vec!["blog"]);
    assert_eq!(loaded.providers, vec!["openai", "anthropic"]);
    assert_eq!(loaded.status, QueryStatus::Pending);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_unknown_ids_are_not_found(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    assert!(matches!(store.get_query("nope"), Err(EvalError::NotFound(_))));
    assert!(matches!(
        store.set_status("nope", QueryStatus::Complete),
        Err(EvalError::NotFound(_))
    ));
    assert!(store.get_evaluation("nope").expect("lookup").is_none());
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_list_is_newest_first_and_paged(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let old = query("old", 300);
    let mid = query("mid", 200);
    let new = query("new", 100);
    for q in [&mid, &old, &new] {
        store.create_query(q).expect("create");
    }

    let all: Vec<String> = store
        .list_queries(0, usize::MAX)
        .expect("list")
        .into_iter()
        .map(|q| q.prompt)
        .collect();
    assert_eq!(all, vec!["new", "mid", "old"]);

    let page = store.list_queries(1, 1).expect("page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].prompt, "mid");
    assert!(store.list_queries(5, 10).expect("past end").is_empty());
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_responses_bump_counters_in_order(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let q = query("p", 0);
    store.create_query(&q).expect("create");
    store.add_response(&answer(&q.id, "openai", "first")).expect("add");
    store
        .add_response(&LlmResponse::failure(&q.id, "anthropic", "claude", "timeout".into()))
        .expect("add");

    let loaded = store.get_query(&q.id).expect("get");
    assert_eq!(loaded.response_count, 2);
    assert_eq!(loaded.successful_responses, 1);

    let responses = store.list_responses(&q.id).expect("responses");
    let providers: Vec<&str> = responses.iter().map(|r| r.provider.as_str()).collect();
    assert_eq!(providers, vec!["openai", "anthropic"]);
    assert_eq!(responses[0].metadata.tokens_used, 120);
    assert_eq!(responses[1].error_message.as_deref(), Some("timeout"));
    assert_eq!(store.count_responses().expect("count"), 2);
    assert_eq!(store.all_responses().expect("all").len(), 2);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_evaluation_is_replaced(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let q = query("p", 0);
    store.create_query(&q).expect("create");

    let first = evaluate_responses(&[answer(&q.id, "openai", "one two")], None, 4000);
    store.put_evaluation(&q.id, &first).expect("put");
    let second = evaluate_responses(
        &[answer(&q.id, "openai", "one two"), answer(&q.id, "anthropic", "two three")],
        None,
        4000,
    );
    store.put_evaluation(&q.id, &second).expect("put again");

    let loaded = store.get_evaluation(&q.id).expect("get").expect("present");
    assert_eq!(loaded.providers, vec!["openai", "anthropic"]);
    assert_eq!(loaded, second);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_status_histogram(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let a = query("a", 0);
    let b = query("b", 0);
    let c = query("c", 0);
    for q in [&a, &b, &c] {
        store.create_query(q).expect("create");
    }
    store.set_status(&a.id, QueryStatus::Complete).expect("status");
    store.set_status(&b.id, QueryStatus::Error).expect("status");

    let expected: BTreeMap<String, usize> = [("complete", 1), ("error", 1), ("pending", 1)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    assert_eq!(store.status_histogram().expect("hist"), expected);
    assert_eq!(store.count_queries().expect("count"), 3);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_update_query_persists_fields(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let mut q = query("draft", 0);
    store.create_query(&q).expect("create");
    q.tags = vec!["final".into()];
    q.prompt = "final prompt".into();
    store.update_query(&q).expect("update");
    let loaded = store.get_query(&q.id).expect("get");
    assert_eq!(loaded.prompt, "final prompt");
    assert_eq!(loaded.tags, vec!["final"]);

    let ghost = query("ghost", 0);
    assert!(matches!(store.update_query(&ghost), Err(EvalError::NotFound(_))));
}

#[test]
fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("eval.db");
    let q = query("persisted", 0);
    {
        let store = SqliteStore::open(&path).expect("open");
        store.create_query(&q).expect("create");
        store.add_response(&answer(&q.id, "openai", "kept")).expect("add");
        store.set_status(&q.id, QueryStatus::Complete).expect("status");
    }
    let store = SqliteStore::open(&path).expect("reopen");
    let loaded = store.get_query(&q.id).expect("get");
    assert_eq!(loaded.status, QueryStatus::Complete);
    assert_eq!(loaded.response_count, 1);
    let responses = store.list_responses(&q.id).expect("responses");
    assert_eq!(responses[0].response_text, "kept");
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_transition_only_from_allowed_states(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let q = query("p", 0);
    store.create_query(&q).expect("create");

    let moved = store
        .transition(&q.id, &[QueryStatus::Pending], QueryStatus::Processing)
        .expect("pending -> processing");
    assert_eq!(moved.status, QueryStatus::Processing);

    // A second claim on the same state loses.
    assert!(matches!(
        store.transition(&q.id, &[QueryStatus::Pending], QueryStatus::Processing),
        Err(EvalError::Conflict(_))
    ));
    assert_eq!(store.get_query(&q.id).expect("get").status, QueryStatus::Processing);

    assert!(matches!(
        store.transition("nope", &[QueryStatus::Pending], QueryStatus::Processing),
        Err(EvalError::NotFound(_))
    ));
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
fn test_clear_evaluation(#[case] kind: &str) {
    let (store, _dir) = open(kind);
    let q = query("p", 0);
    store.create_query(&q).expect("create");
    let metrics = evaluate_responses(&[answer(&q.id, "openai", "one two")], None, 4000);
    store.put_evaluation(&q.id, &metrics).expect("put");

    store.clear_evaluation(&q.id).expect("clear");
    assert!(store.get_evaluation(&q.id).expect("get").is_none());
    store.clear_evaluation(&q.id).expect("clearing twice is fine");
}
