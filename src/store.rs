//! # Stage: Query Store
//!
//! ## Responsibility
//! Persist queries, provider responses and evaluation metrics, and answer
//! the listing and counting questions the API and analytics need.
//!
//! Two interchangeable backends implement [`QueryStore`]:
//! - [`MemoryStore`]: maps behind a `Mutex`, lost on exit
//! - [`SqliteStore`]: a single SQLite file via `rusqlite`, lists and metrics
//!   stored as JSON columns
//!
//! ## Guarantees
//! - Thread-safe: both backends are `Send + Sync` and lock internally
//! - Non-panicking: a poisoned lock surfaces as an `EvalError::Io`
//! - Queries list newest first; responses list in insertion order
//! - `transition` checks and writes a status under one lock, so two
//!   callers can never both move a query out of the same state
//!
//! ## Blocking
//! Every call is synchronous. The server runs request routing on tokio's
//! blocking pool; the orchestrator only issues single-row reads and writes
//! between awaits, one SQLite connection behind a mutex.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::StorageSettings;
use crate::error::{EvalError, Result};
use crate::types::{EvaluationMetrics, LlmResponse, Query, QueryStatus, ResponseMetadata};

/// Storage seam shared by the orchestrator, the server and analytics.
pub trait QueryStore: Send + Sync {
    fn create_query(&self, query: &Query) -> Result<()>;
    /// `EvalError::NotFound` when `id` is unknown.
    fn get_query(&self, id: &str) -> Result<Query>;
    /// Newest first.
    fn list_queries(&self, skip: usize, limit: usize) -> Result<Vec<Query>>;
    fn update_query(&self, query: &Query) -> Result<()>;
    /// Set the status, bump `updated_at` and return the updated query.
    fn set_status(&self, id: &str, status: QueryStatus) -> Result<Query>;
    /// Like `set_status`, but only when the current status is one of
    /// `from`; the check and the write happen under one lock.
    /// `EvalError::Conflict` when the query is in any other state.
    fn transition(&self, id: &str, from: &[QueryStatus], to: QueryStatus) -> Result<Query>;

    /// Store a response and bump the owning query's counters.
    fn add_response(&self, response: &LlmResponse) -> Result<()>;
    fn list_responses(&self, query_id: &str) -> Result<Vec<LlmResponse>>;
    fn all_responses(&self) -> Result<Vec<LlmResponse>>;

    fn put_evaluation(&self, query_id: &str, metrics: &EvaluationMetrics) -> Result<()>;
    fn get_evaluation(&self, query_id: &str) -> Result<Option<EvaluationMetrics>>;
    /// Drop any stored evaluation; a no-op when there is none.
    fn clear_evaluation(&self, query_id: &str) -> Result<()>;

    fn count_queries(&self) -> Result<usize>;
    fn count_responses(&self) -> Result<usize>;
    /// Query count per status name.
    fn status_histogram(&self) -> Result<BTreeMap<String, usize>>;
}

/// Open the store `settings` asks for.
pub fn open_store(settings: &StorageSettings) -> Result<Arc<dyn QueryStore>> {
    match &settings.path {
        Some(path) => Ok(Arc::new(SqliteStore::open(path)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

fn transition_conflict(id: &str, current: QueryStatus, to: QueryStatus) -> EvalError {
    EvalError::conflict(format!("query {id} is {current}, cannot move to {to}"))
}

fn poisoned() -> EvalError {
    EvalError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "store lock poisoned",
    ))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    queries: HashMap<String, Query>,
    responses: Vec<LlmResponse>,
    evaluations: HashMap<String, EvaluationMetrics>,
}

/// In-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner.lock().map_err(|_| poisoned())
    }
}

impl QueryStore for MemoryStore {
    fn create_query(&self, query: &Query) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.queries.contains_key(&query.id) {
            return Err(EvalError::validation(format!("query {} already exists", query.id)));
        }
        inner.queries.insert(query.id.clone(), query.clone());
        Ok(())
    }

    fn get_query(&self, id: &str) -> Result<Query> {
        self.lock()?
            .queries
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::not_found(format!("Query {id}")))
    }

    fn list_queries(&self, skip: usize, limit: usize) -> Result<Vec<Query>> {
        let inner = self.lock()?;
        let mut all: Vec<Query> = inner.queries.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().skip(skip).take(limit).collect())
    }

    fn update_query(&self, query: &Query) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.queries.get_mut(&query.id) {
            Some(slot) => {
                *slot = query.clone();
                Ok(())
            }
            None => Err(EvalError::not_found(format!("Query {}", query.id))),
        }
    }

    fn set_status(&self, id: &str, status: QueryStatus) -> Result<Query> {
        let mut inner = self.lock()?;
        let q = inner
            .queries
            .get_mut(id)
            .ok_or_else(|| EvalError::not_found(format!("Query {id}")))?;
        q.status = status;
        q.updated_at = Utc::now();
        Ok(q.clone())
    }

    fn transition(&self, id: &str, from: &[QueryStatus], to: QueryStatus) -> Result<Query> {
        let mut inner = self.lock()?;
        let q = inner
            .queries
            .get_mut(id)
            .ok_or_else(|| EvalError::not_found(format!("Query {id}")))?;
        if !from.contains(&q.status) {
            return Err(transition_conflict(id, q.status, to));
        }
        q.status = to;
        q.updated_at = Utc::now();
        Ok(q.clone())
    }

    fn add_response(&self, response: &LlmResponse) -> Result<()> {
        let mut inner = self.lock()?;
        let q = inner
            .queries
            .get_mut(&response.query_id)
            .ok_or_else(|| EvalError::not_found(format!("Query {}", response.query_id)))?;
        q.response_count += 1;
        if response.is_successful() {
            q.successful_responses += 1;
        }
        inner.responses.push(response.clone());
        Ok(())
    }

    fn list_responses(&self, query_id: &str) -> Result<Vec<LlmResponse>> {
        Ok(self
            .lock()?
            .responses
            .iter()
            .filter(|r| r.query_id == query_id)
            .cloned()
            .collect())
    }

    fn all_responses(&self) -> Result<Vec<LlmResponse>> {
        Ok(self.lock()?.responses.clone())
    }

    fn put_evaluation(&self, query_id: &str, metrics: &EvaluationMetrics) -> Result<()> {
        self.lock()?
            .evaluations
            .insert(query_id.to_string(), metrics.clone());
        Ok(())
    }

    fn get_evaluation(&self, query_id: &str) -> Result<Option<EvaluationMetrics>> {
        Ok(self.lock()?.evaluations.get(query_id).cloned())
    }

    fn clear_evaluation(&self, query_id: &str) -> Result<()> {
        self.lock()?.evaluations.remove(query_id);
        Ok(())
    }

    fn count_queries(&self) -> Result<usize> {
        Ok(self.lock()?.queries.len())
    }

    fn count_responses(&self) -> Result<usize> {
        Ok(self.lock()?.responses.len())
    }

    fn status_histogram(&self) -> Result<BTreeMap<String, usize>> {
        let mut hist = BTreeMap::new();
        for q in self.lock()?.queries.values() {
            *hist.entry(q.status.to_string()).or_insert(0) += 1;
        }
        Ok(hist)
    }
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queries (
    id                   TEXT PRIMARY KEY,
    prompt               TEXT NOT NULL,
    category             TEXT NOT NULL,
    tags                 TEXT NOT NULL,
    providers            TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    status               TEXT NOT NULL,
    response_count       INTEGER NOT NULL DEFAULT 0,
    successful_responses INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS responses (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    id               TEXT NOT NULL UNIQUE,
    query_id         TEXT NOT NULL REFERENCES queries(id),
    provider         TEXT NOT NULL,
    model            TEXT NOT NULL,
    response_text    TEXT NOT NULL,
    tokens_used      INTEGER NOT NULL,
    response_time_ms INTEGER NOT NULL,
    error_message    TEXT,
    word_count       INTEGER NOT NULL,
    character_count  INTEGER NOT NULL,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_responses_query ON responses(query_id);
CREATE TABLE IF NOT EXISTS evaluations (
    query_id   TEXT PRIMARY KEY REFERENCES queries(id),
    metrics    TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

const QUERY_COLUMNS: &str = "id, prompt, category, tags, providers, created_at, updated_at, \
                             status, response_count, successful_responses";
const RESPONSE_COLUMNS: &str = "id, query_id, provider, model, response_text, tokens_used, \
                                response_time_ms, error_message, word_count, character_count, \
                                created_at";

/// Row as read from SQLite, before JSON and timestamp decoding.
struct QueryRow {
    id: String,
    prompt: String,
    category: String,
    tags: String,
    providers: String,
    created_at: String,
    updated_at: String,
    status: String,
    response_count: i64,
    successful_responses: i64,
}

impl QueryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            prompt: row.get(1)?,
            category: row.get(2)?,
            tags: row.get(3)?,
            providers: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            status: row.get(7)?,
            response_count: row.get(8)?,
            successful_responses: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Query> {
        Ok(Query {
            id: self.id,
            prompt: self.prompt,
            category: self.category,
            tags: serde_json::from_str(&self.tags)?,
            providers: serde_json::from_str(&self.providers)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            status: self.status.parse()?,
            response_count: self.response_count.max(0) as usize,
            successful_responses: self.successful_responses.max(0) as usize,
        })
    }
}

struct ResponseRow {
    id: String,
    query_id: String,
    provider: String,
    model: String,
    response_text: String,
    tokens_used: i64,
    response_time_ms: i64,
    error_message: Option<String>,
    word_count: i64,
    character_count: i64,
    created_at: String,
}

impl ResponseRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            query_id: row.get(1)?,
            provider: row.get(2)?,
            model: row.get(3)?,
            response_text: row.get(4)?,
            tokens_used: row.get(5)?,
            response_time_ms: row.get(6)?,
            error_message: row.get(7)?,
            word_count: row.get(8)?,
            character_count: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn decode(self) -> Result<LlmResponse> {
        Ok(LlmResponse {
            id: self.id,
            query_id: self.query_id,
            provider: self.provider,
            model: self.model,
            response_text: self.response_text,
            metadata: ResponseMetadata {
                tokens_used: self.tokens_used.clamp(0, u32::MAX as i64) as u32,
                response_time_ms: self.response_time_ms.max(0) as u64,
            },
            error_message: self.error_message,
            word_count: self.word_count.max(0) as usize,
            character_count: self.character_count.max(0) as usize,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EvalError::Config(format!("bad timestamp '{s}' in store: {e}")))
}

/// SQLite backend. One connection guarded by a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| poisoned())
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let n: i64 = self.conn()?.query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    fn select_responses(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<LlmResponse>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, ResponseRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ResponseRow::decode).collect()
    }
}

impl QueryStore for SqliteStore {
    fn create_query(&self, query: &Query) -> Result<()> {
        self.conn()?.execute(
            &format!("INSERT INTO queries ({QUERY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                query.id,
                query.prompt,
                query.category,
                serde_json::to_string(&query.tags)?,
                serde_json::to_string(&query.providers)?,
                fmt_time(&query.created_at),
                fmt_time(&query.updated_at),
                query.status.as_str(),
                query.response_count as i64,
                query.successful_responses as i64,
            ],
        )?;
        Ok(())
    }

    fn get_query(&self, id: &str) -> Result<Query> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {QUERY_COLUMNS} FROM queries WHERE id = ?1"),
                params![id],
                QueryRow::from_row,
            )
            .optional()?;
        match row {
            Some(r) => r.decode(),
            None => Err(EvalError::not_found(format!("Query {id}"))),
        }
    }

    fn list_queries(&self, skip: usize, limit: usize) -> Result<Vec<Query>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries ORDER BY created_at DESC, id ASC LIMIT ?1 OFFSET ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let skip = i64::try_from(skip).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit, skip], QueryRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(QueryRow::decode).collect()
    }

    fn update_query(&self, query: &Query) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE queries SET prompt = ?2, category = ?3, tags = ?4, providers = ?5, \
             updated_at = ?6, status = ?7, response_count = ?8, successful_responses = ?9 \
             WHERE id = ?1",
            params![
                query.id,
                query.prompt,
                query.category,
                serde_json::to_string(&query.tags)?,
                serde_json::to_string(&query.providers)?,
                fmt_time(&query.updated_at),
                query.status.as_str(),
                query.response_count as i64,
                query.successful_responses as i64,
            ],
        )?;
        if changed == 0 {
            return Err(EvalError::not_found(format!("Query {}", query.id)));
        }
        Ok(())
    }

    fn set_status(&self, id: &str, status: QueryStatus) -> Result<Query> {
        let changed = self.conn()?.execute(
            "UPDATE queries SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), fmt_time(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(EvalError::not_found(format!("Query {id}")));
        }
        self.get_query(id)
    }

    fn transition(&self, id: &str, from: &[QueryStatus], to: QueryStatus) -> Result<Query> {
        {
            let conn = self.conn()?;
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM queries WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let current: QueryStatus = match current {
                Some(s) => s.parse()?,
                None => return Err(EvalError::not_found(format!("Query {id}"))),
            };
            if !from.contains(&current) {
                return Err(transition_conflict(id, current, to));
            }
            conn.execute(
                "UPDATE queries SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, to.as_str(), fmt_time(&Utc::now())],
            )?;
        }
        self.get_query(id)
    }

    fn add_response(&self, response: &LlmResponse) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE queries SET response_count = response_count + 1, \
             successful_responses = successful_responses + ?2 WHERE id = ?1",
            params![response.query_id, i64::from(response.is_successful())],
        )?;
        if changed == 0 {
            return Err(EvalError::not_found(format!("Query {}", response.query_id)));
        }
        tx.execute(
            &format!(
                "INSERT INTO responses ({RESPONSE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                response.id,
                response.query_id,
                response.provider,
                response.model,
                response.response_text,
                i64::from(response.metadata.tokens_used),
                i64::try_from(response.metadata.response_time_ms).unwrap_or(i64::MAX),
                response.error_message,
                response.word_count as i64,
                response.character_count as i64,
                fmt_time(&response.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_responses(&self, query_id: &str) -> Result<Vec<LlmResponse>> {
        self.select_responses(
            &format!("SELECT {RESPONSE_COLUMNS} FROM responses WHERE query_id = ?1 ORDER BY seq"),
            &[&query_id],
        )
    }

    fn all_responses(&self) -> Result<Vec<LlmResponse>> {
        self.select_responses(
            &format!("SELECT {RESPONSE_COLUMNS} FROM responses ORDER BY seq"),
            &[],
        )
    }

    fn put_evaluation(&self, query_id: &str, metrics: &EvaluationMetrics) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO evaluations (query_id, metrics, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(query_id) DO UPDATE SET metrics = excluded.metrics, \
             created_at = excluded.created_at",
            params![query_id, serde_json::to_string(metrics)?, fmt_time(&Utc::now())],
        )?;
        Ok(())
    }

    fn get_evaluation(&self, query_id: &str) -> Result<Option<EvaluationMetrics>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT metrics FROM evaluations WHERE query_id = ?1",
                params![query_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn clear_evaluation(&self, query_id: &str) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM evaluations WHERE query_id = ?1",
            params![query_id],
        )?;
        Ok(())
    }

    fn count_queries(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM queries")
    }

    fn count_responses(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM responses")
    }

    fn status_histogram(&self) -> Result<BTreeMap<String, usize>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM queries GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(status, n)| (status, n.max(0) as usize))
            .collect())
    }
}
