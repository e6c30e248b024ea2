//! Concurrency-safe arena store: dedicated writer thread plus read pool.
//!
//! One SQLite database holds every persisted arena record. Writes are
//! serialized through [`writer::StoreWriter`]; reads go through a
//! round-robin pool of read-only connections on `spawn_blocking`.

mod records;
mod writer;

pub use records::{
    AdoptionLog, AgentResult, AgentStatus, BenchmarkRecord, HistoricalScore, Phase, PipelineState,
    VoteEdge, VoteType,
};

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::oneshot;

use crate::error::{store_err, store_err_with, ArenaError, Result};
use crate::harness::DecisionContext;
use crate::recovery::ParseQuality;
use writer::{StoreWriter, WriteCommand};

const DEFAULT_READ_POOL_SIZE: usize = 4;

struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: std::sync::atomic::AtomicUsize,
}

impl ReadPool {
    fn new(db_path: &Path, size: usize) -> Result<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| store_err_with("Failed to open read connection", e))?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> parking_lot::MutexGuard<'_, Connection> {
        let idx =
            self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.connections.len();
        self.connections[idx].lock()
    }
}

struct ArenaStoreInner {
    writer_tx: Sender<WriteCommand>,
    read_pool: ReadPool,
    #[allow(dead_code)]
    db_path: PathBuf,
    /// Holds the writer thread handle. Must not drop while the store lives.
    #[allow(dead_code)]
    writer: StoreWriter,
}

#[derive(Clone)]
pub struct ArenaStore {
    inner: Arc<ArenaStoreInner>,
}

impl ArenaStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_read_pool_size(db_path, DEFAULT_READ_POOL_SIZE)
    }

    pub fn with_read_pool_size(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| store_err_with("Failed to create db directory", e))?;
            }
        }

        let writer = StoreWriter::new(db_path.clone())?;
        let writer_tx = writer.sender();
        let read_pool = ReadPool::new(&db_path, pool_size)?;

        Ok(Self {
            inner: Arc::new(ArenaStoreInner {
                writer_tx,
                read_pool,
                db_path,
                writer,
            }),
        })
    }

    async fn submit(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> WriteCommand,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .writer_tx
            .send(build(tx))
            .map_err(|_| store_err("Writer thread disconnected"))?;
        rx.await
            .map_err(|_| store_err("Writer response channel dropped"))?
    }

    async fn read<T, F>(&self, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            query(&guard)
        })
        .await
        .map_err(|e| store_err_with("Read task failed", e))?
    }

    // ---- decision contexts -------------------------------------------------

    pub async fn insert_context(&self, context: DecisionContext) -> Result<()> {
        self.submit(|tx| WriteCommand::InsertContext {
            context: Box::new(context),
            response: tx,
        })
        .await
    }

    pub async fn load_context(&self, context_id: &str) -> Result<DecisionContext> {
        let context_id = context_id.to_string();
        self.read(move |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM decision_contexts WHERE id = ?1",
                    params![&context_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| store_err_with("Failed to load context", e))?;
            match payload {
                Some(json) => Ok(serde_json::from_str(&json)?),
                None => Err(ArenaError::ContextNotFound(context_id)),
            }
        })
        .await
    }

    // ---- agent results -----------------------------------------------------

    pub async fn insert_agent_result(&self, result: AgentResult) -> Result<()> {
        self.submit(|tx| WriteCommand::InsertAgentResult {
            result: Box::new(result),
            response: tx,
        })
        .await
    }

    /// All results for a context in stable order (created_at, then id).
    pub async fn agent_results(&self, context_id: &str) -> Result<Vec<AgentResult>> {
        let context_id = context_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, context_id, backend, model, status, parse_quality,
                            input_text, output_text, decision, latency_ms, cost_estimate, created_at
                       FROM agent_results
                      WHERE context_id = ?1
                      ORDER BY created_at, id",
                )
                .map_err(|e| store_err_with("Failed to prepare result query", e))?;
            let rows = stmt
                .query_map(params![&context_id], row_to_agent_result)
                .map_err(|e| store_err_with("Failed to query agent results", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| store_err_with("Failed to read agent result row", e))
        })
        .await
    }

    // ---- vote edges --------------------------------------------------------

    pub async fn insert_vote_edges(&self, edges: Vec<VoteEdge>) -> Result<()> {
        self.submit(|tx| WriteCommand::InsertVoteEdges {
            edges,
            response: tx,
        })
        .await
    }

    pub async fn vote_edges(&self, context_id: &str) -> Result<Vec<VoteEdge>> {
        let context_id = context_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, context_id, voter_result_id, target_result_id,
                            vote_type, reasoning, created_at
                       FROM vote_edges
                      WHERE context_id = ?1
                      ORDER BY created_at, id",
                )
                .map_err(|e| store_err_with("Failed to prepare vote query", e))?;
            let rows = stmt
                .query_map(params![&context_id], row_to_vote_edge)
                .map_err(|e| store_err_with("Failed to query vote edges", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| store_err_with("Failed to read vote edge row", e))
        })
        .await
    }

    // ---- adoption logs -----------------------------------------------------

    pub async fn insert_adoption_log(&self, log: AdoptionLog) -> Result<()> {
        self.submit(|tx| WriteCommand::InsertAdoptionLog {
            log: Box::new(log),
            response: tx,
        })
        .await
    }

    pub async fn adoption_logs(&self, context_id: &str) -> Result<Vec<AdoptionLog>> {
        let context_id = context_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, context_id, winner_result_id, net_score, approve_count,
                            reject_count, score_map, risk_status, benchmark, created_at
                       FROM adoption_logs
                      WHERE context_id = ?1
                      ORDER BY created_at, id",
                )
                .map_err(|e| store_err_with("Failed to prepare adoption query", e))?;
            let rows = stmt
                .query_map(params![&context_id], row_to_adoption_log)
                .map_err(|e| store_err_with("Failed to query adoption logs", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| store_err_with("Failed to read adoption log row", e))
        })
        .await
    }

    pub async fn latest_adoption(&self, context_id: &str) -> Result<Option<AdoptionLog>> {
        Ok(self.adoption_logs(context_id).await?.pop())
    }

    // ---- historical scores -------------------------------------------------

    pub async fn apply_score_delta(
        &self,
        backend: &str,
        model: &str,
        approvals: i64,
        rejections: i64,
        adoptions: i64,
    ) -> Result<()> {
        let backend = backend.to_string();
        let model = model.to_string();
        self.submit(|tx| WriteCommand::ApplyScoreDelta {
            backend,
            model,
            approvals,
            rejections,
            adoptions,
            response: tx,
        })
        .await
    }

    pub async fn historical_score(
        &self,
        backend: &str,
        model: &str,
    ) -> Result<Option<HistoricalScore>> {
        let backend = backend.to_string();
        let model = model.to_string();
        self.read(move |conn| {
            conn.query_row(
                "SELECT backend, model, approvals, rejections, adoptions, updated_at
                   FROM historical_scores
                  WHERE backend = ?1 AND model = ?2",
                params![&backend, &model],
                row_to_historical_score,
            )
            .optional()
            .map_err(|e| store_err_with("Failed to query historical score", e))
        })
        .await
    }

    /// Every known score, best lifetime net first.
    pub async fn all_historical_scores(&self) -> Result<Vec<HistoricalScore>> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT backend, model, approvals, rejections, adoptions, updated_at
                       FROM historical_scores
                      ORDER BY (approvals - rejections) DESC, adoptions DESC, backend, model",
                )
                .map_err(|e| store_err_with("Failed to prepare score query", e))?;
            let rows = stmt
                .query_map([], row_to_historical_score)
                .map_err(|e| store_err_with("Failed to query scores", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| store_err_with("Failed to read score row", e))
        })
        .await
    }

    // ---- pipeline state ----------------------------------------------------

    pub async fn set_phase_done(&self, context_id: &str, phase: Phase) -> Result<()> {
        let context_id = context_id.to_string();
        self.submit(|tx| WriteCommand::SetPhaseDone {
            context_id,
            phase,
            response: tx,
        })
        .await
    }

    pub async fn pipeline_state(&self, context_id: &str) -> Result<PipelineState> {
        let context_id = context_id.to_string();
        self.read(move |conn| {
            let state = conn
                .query_row(
                    "SELECT phase1_done, phase2_done, phase3_done
                       FROM pipeline_state
                      WHERE context_id = ?1",
                    params![&context_id],
                    |row| {
                        Ok(PipelineState {
                            context_id: context_id.clone(),
                            phase1_done: row.get::<_, i64>(0)? != 0,
                            phase2_done: row.get::<_, i64>(1)? != 0,
                            phase3_done: row.get::<_, i64>(2)? != 0,
                        })
                    },
                )
                .optional()
                .map_err(|e| store_err_with("Failed to query pipeline state", e))?;
            Ok(state.unwrap_or_default())
        })
        .await
    }
}

// ---- row mapping -----------------------------------------------------------

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_agent_result(row: &Row<'_>) -> rusqlite::Result<AgentResult> {
    let status: String = row.get(4)?;
    let quality: String = row.get(5)?;
    let decision: Option<String> = row.get(8)?;
    let created_at: String = row.get(11)?;
    Ok(AgentResult {
        id: row.get(0)?,
        context_id: row.get(1)?,
        backend: row.get(2)?,
        model: row.get(3)?,
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Error),
        parse_quality: ParseQuality::parse(&quality).unwrap_or(ParseQuality::RawOnly),
        input_text: row.get(6)?,
        output_text: row.get(7)?,
        decision: decision.and_then(|json| serde_json::from_str(&json).ok()),
        latency_ms: row.get::<_, i64>(9)? as u64,
        cost_estimate: row.get(10)?,
        created_at: parse_timestamp(created_at),
    })
}

fn row_to_vote_edge(row: &Row<'_>) -> rusqlite::Result<VoteEdge> {
    let vote_type: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    Ok(VoteEdge {
        id: row.get(0)?,
        context_id: row.get(1)?,
        voter_result_id: row.get(2)?,
        target_result_id: row.get(3)?,
        vote_type: VoteType::parse(&vote_type).unwrap_or(VoteType::Approve),
        reasoning: row.get(5)?,
        created_at: parse_timestamp(created_at),
    })
}

fn row_to_adoption_log(row: &Row<'_>) -> rusqlite::Result<AdoptionLog> {
    let score_map: String = row.get(6)?;
    let benchmark: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    Ok(AdoptionLog {
        id: row.get(0)?,
        context_id: row.get(1)?,
        winner_result_id: row.get(2)?,
        net_score: row.get(3)?,
        approve_count: row.get(4)?,
        reject_count: row.get(5)?,
        score_map: serde_json::from_str(&score_map).unwrap_or_default(),
        risk_status: row.get(7)?,
        benchmark: serde_json::from_str(&benchmark).unwrap_or_default(),
        created_at: parse_timestamp(created_at),
    })
}

fn row_to_historical_score(row: &Row<'_>) -> rusqlite::Result<HistoricalScore> {
    let updated_at: String = row.get(5)?;
    Ok(HistoricalScore {
        backend: row.get(0)?,
        model: row.get(1)?,
        approvals: row.get(2)?,
        rejections: row.get(3)?,
        adoptions: row.get(4)?,
        updated_at: parse_timestamp(updated_at),
    })
}
