//! Dedicated writer thread for the SQLite arena store.
//!
//! All writes flow through one thread over an mpsc channel; callers get the
//! outcome back on a oneshot. Insert statements use OR IGNORE on natural
//! keys so a phase re-run after a mid-phase crash cannot duplicate rows.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use rusqlite::{params, Connection};
use tracing::{debug, error, warn};

use super::records::{AdoptionLog, AgentResult, Phase, VoteEdge};
use crate::error::{store_err, store_err_with, Result};
use crate::harness::DecisionContext;

pub(super) enum WriteCommand {
    InsertContext {
        context: Box<DecisionContext>,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    InsertAgentResult {
        result: Box<AgentResult>,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    InsertVoteEdges {
        edges: Vec<VoteEdge>,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    InsertAdoptionLog {
        log: Box<AdoptionLog>,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    ApplyScoreDelta {
        backend: String,
        model: String,
        approvals: i64,
        rejections: i64,
        adoptions: i64,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    SetPhaseDone {
        context_id: String,
        phase: Phase,
        response: tokio::sync::oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

pub(super) struct StoreWriter {
    tx: Sender<WriteCommand>,
    handle: Option<JoinHandle<()>>,
}

impl StoreWriter {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("arena-writer".into())
            .spawn(move || match Self::init_db(&db_path) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    Self::process_commands(&conn, rx);
                }
                Err(e) => {
                    error!(error = %e, "Arena store writer init failed");
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| store_err_with("Failed to spawn writer thread", e))?;

        ready_rx
            .recv()
            .map_err(|_| store_err("Writer thread died during init"))??;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<WriteCommand> {
        self.tx.clone()
    }

    fn init_db(db_path: &PathBuf) -> Result<Connection> {
        let conn =
            Connection::open(db_path).map_err(|e| store_err_with("Failed to open database", e))?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS decision_contexts (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agent_results (
                id TEXT PRIMARY KEY,
                context_id TEXT NOT NULL,
                backend TEXT NOT NULL,
                model TEXT NOT NULL,
                status TEXT NOT NULL,
                parse_quality TEXT NOT NULL,
                input_text TEXT NOT NULL,
                output_text TEXT NOT NULL,
                decision TEXT,
                latency_ms INTEGER NOT NULL,
                cost_estimate REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_result_agent
                ON agent_results(context_id, backend, model);

            CREATE TABLE IF NOT EXISTS vote_edges (
                id TEXT PRIMARY KEY,
                context_id TEXT NOT NULL,
                voter_result_id TEXT NOT NULL,
                target_result_id TEXT NOT NULL,
                vote_type TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_vote_edge
                ON vote_edges(context_id, voter_result_id, target_result_id, vote_type);

            CREATE TABLE IF NOT EXISTS adoption_logs (
                id TEXT PRIMARY KEY,
                context_id TEXT NOT NULL,
                winner_result_id TEXT NOT NULL,
                net_score INTEGER NOT NULL,
                approve_count INTEGER NOT NULL,
                reject_count INTEGER NOT NULL,
                score_map TEXT NOT NULL,
                risk_status TEXT NOT NULL,
                benchmark TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_adoption_context
                ON adoption_logs(context_id, created_at);

            CREATE TABLE IF NOT EXISTS historical_scores (
                backend TEXT NOT NULL,
                model TEXT NOT NULL,
                approvals INTEGER NOT NULL DEFAULT 0,
                rejections INTEGER NOT NULL DEFAULT 0,
                adoptions INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (backend, model)
            );

            CREATE TABLE IF NOT EXISTS pipeline_state (
                context_id TEXT PRIMARY KEY,
                phase1_done INTEGER NOT NULL DEFAULT 0,
                phase2_done INTEGER NOT NULL DEFAULT 0,
                phase3_done INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| store_err_with("Failed to init schema", e))?;
        Ok(())
    }

    fn process_commands(conn: &Connection, rx: Receiver<WriteCommand>) {
        for cmd in rx {
            match cmd {
                WriteCommand::InsertContext { context, response } => {
                    let _ = response.send(Self::insert_context(conn, &context));
                }
                WriteCommand::InsertAgentResult { result, response } => {
                    let _ = response.send(Self::insert_agent_result(conn, &result));
                }
                WriteCommand::InsertVoteEdges { edges, response } => {
                    let _ = response.send(Self::insert_vote_edges(conn, &edges));
                }
                WriteCommand::InsertAdoptionLog { log, response } => {
                    let _ = response.send(Self::insert_adoption_log(conn, &log));
                }
                WriteCommand::ApplyScoreDelta {
                    backend,
                    model,
                    approvals,
                    rejections,
                    adoptions,
                    response,
                } => {
                    let _ = response.send(Self::apply_score_delta(
                        conn, &backend, &model, approvals, rejections, adoptions,
                    ));
                }
                WriteCommand::SetPhaseDone {
                    context_id,
                    phase,
                    response,
                } => {
                    let _ = response.send(Self::set_phase_done(conn, &context_id, phase));
                }
                WriteCommand::Shutdown => {
                    debug!("Arena writer received shutdown signal");
                    break;
                }
            }
        }
    }

    fn insert_context(conn: &Connection, context: &DecisionContext) -> Result<()> {
        let payload = serde_json::to_string(context)
            .map_err(|e| store_err_with("Failed to serialize context", e))?;
        conn.execute(
            "INSERT OR IGNORE INTO decision_contexts (id, created_at, payload)
               VALUES (?1, ?2, ?3)",
            params![&context.id, context.created_at.to_rfc3339(), payload],
        )
        .map_err(|e| store_err_with("Failed to insert context", e))?;
        Ok(())
    }

    fn insert_agent_result(conn: &Connection, result: &AgentResult) -> Result<()> {
        let decision = result
            .decision
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| store_err_with("Failed to serialize decision", e))?;

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO agent_results
                   (id, context_id, backend, model, status, parse_quality,
                    input_text, output_text, decision, latency_ms, cost_estimate, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    &result.id,
                    &result.context_id,
                    &result.backend,
                    &result.model,
                    result.status.as_str(),
                    result.parse_quality.as_str(),
                    &result.input_text,
                    &result.output_text,
                    decision,
                    result.latency_ms as i64,
                    result.cost_estimate,
                    result.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| store_err_with("Failed to insert agent result", e))?;

        if inserted == 0 {
            warn!(
                context_id = %result.context_id,
                agent = %result.identity(),
                "Agent result already recorded, keeping existing row"
            );
        } else {
            debug!(
                result_id = %result.id,
                agent = %result.identity(),
                status = result.status.as_str(),
                "Agent result recorded"
            );
        }
        Ok(())
    }

    fn insert_vote_edges(conn: &Connection, edges: &[VoteEdge]) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| store_err_with("Failed to start transaction", e))?;

        for edge in edges {
            tx.execute(
                "INSERT OR IGNORE INTO vote_edges
                   (id, context_id, voter_result_id, target_result_id,
                    vote_type, reasoning, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    &edge.id,
                    &edge.context_id,
                    &edge.voter_result_id,
                    &edge.target_result_id,
                    edge.vote_type.as_str(),
                    &edge.reasoning,
                    edge.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| store_err_with("Failed to insert vote edge", e))?;
        }

        tx.commit()
            .map_err(|e| store_err_with("Failed to commit vote edges", e))?;
        debug!(count = edges.len(), "Vote edges recorded");
        Ok(())
    }

    fn insert_adoption_log(conn: &Connection, log: &AdoptionLog) -> Result<()> {
        let score_map = serde_json::to_string(&log.score_map)
            .map_err(|e| store_err_with("Failed to serialize score map", e))?;
        let benchmark = serde_json::to_string(&log.benchmark)
            .map_err(|e| store_err_with("Failed to serialize benchmark", e))?;

        conn.execute(
            "INSERT INTO adoption_logs
               (id, context_id, winner_result_id, net_score, approve_count,
                reject_count, score_map, risk_status, benchmark, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &log.id,
                &log.context_id,
                &log.winner_result_id,
                log.net_score,
                log.approve_count,
                log.reject_count,
                score_map,
                &log.risk_status,
                benchmark,
                log.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| store_err_with("Failed to insert adoption log", e))?;

        debug!(
            context_id = %log.context_id,
            winner = %log.winner_result_id,
            net = log.net_score,
            "Adoption recorded"
        );
        Ok(())
    }

    fn apply_score_delta(
        conn: &Connection,
        backend: &str,
        model: &str,
        approvals: i64,
        rejections: i64,
        adoptions: i64,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO historical_scores (backend, model, approvals, rejections, adoptions, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(backend, model) DO UPDATE SET
               approvals = approvals + excluded.approvals,
               rejections = rejections + excluded.rejections,
               adoptions = adoptions + excluded.adoptions,
               updated_at = excluded.updated_at",
            params![
                backend,
                model,
                approvals,
                rejections,
                adoptions,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| store_err_with("Failed to upsert historical score", e))?;
        Ok(())
    }

    fn set_phase_done(conn: &Connection, context_id: &str, phase: Phase) -> Result<()> {
        // flag_column returns a fixed identifier, never user input.
        let sql = format!(
            "INSERT INTO pipeline_state (context_id, {col}, updated_at)
               VALUES (?1, 1, ?2)
             ON CONFLICT(context_id) DO UPDATE SET
               {col} = 1,
               updated_at = excluded.updated_at",
            col = phase.flag_column()
        );
        conn.execute(&sql, params![context_id, chrono::Utc::now().to_rfc3339()])
            .map_err(|e| store_err_with("Failed to set phase flag", e))?;
        debug!(context_id = %context_id, flag = phase.flag_column(), "Phase flag set");
        Ok(())
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(WriteCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("Arena writer thread panicked: {:?}", e);
            }
        }
    }
}
