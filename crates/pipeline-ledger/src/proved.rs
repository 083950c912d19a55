//! ProvedLedger (C5): durable storage plus a capped in-memory view of
//! successful proofs. Grounded on `bin/continuous/src/db.rs`'s `sqlx`-backed
//! upsert of a block outcome row, ported from Postgres to SQLite per §4.5,
//! and wrapped in the same state+mailbox+driver-loop actor shape used
//! throughout this pipeline (§5).

use std::collections::{HashSet, VecDeque};

use ethp_notify::{NotificationSink, Topic};
use ethp_types::{BlockId, ProvedRecord};
use sqlx::{Row, SqlitePool};
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::common::{now, AddOutcome, LEDGER_CAP};

enum Command {
    Add { record: ProvedRecord, reply: oneshot::Sender<AddOutcome> },
    List { reply: oneshot::Sender<Vec<ProvedRecord>> },
    Count { reply: oneshot::Sender<u64> },
    Contains { block: BlockId, reply: oneshot::Sender<bool> },
    Clear { reply: oneshot::Sender<()> },
}

#[derive(Debug, Clone)]
pub struct ProvedLedger {
    tx: mpsc::Sender<Command>,
}

struct State {
    pool: SqlitePool,
    notify: Option<NotificationSink>,
    list: VecDeque<ProvedRecord>,
    set: HashSet<BlockId>,
    count: u64,
}

impl ProvedLedger {
    /// Loads the newest [`LEDGER_CAP`] rows and the full row count (§4.5
    /// "On startup"), then spawns the actor.
    pub async fn spawn(pool: SqlitePool, notify: Option<NotificationSink>) -> Result<Self, sqlx::Error> {
        let list = load_recent(&pool, LEDGER_CAP as i64).await?;
        let set = list.iter().map(|r| r.block).collect();
        let count = count_rows(&pool).await?;

        let (tx, mut rx) = mpsc::channel(256);
        let mut state = State { pool, notify, list, set, count };

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                state.handle(cmd).await;
            }
        });

        Ok(Self { tx })
    }

    pub async fn add(&self, record: ProvedRecord) -> AddOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Add { record, reply }).await.is_err() {
            return AddOutcome::Error("ledger actor gone".to_string());
        }
        rx.await.unwrap_or(AddOutcome::Error("ledger actor dropped reply".to_string()))
    }

    pub async fn list(&self) -> Vec<ProvedRecord> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::List { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn count(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Count { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn contains(&self, block: BlockId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Contains { block, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// For tests only (§4.5).
    pub async fn clear(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Clear { reply }).await.is_err() {
            return;
        }
        let _ = rx.await;
    }
}

impl State {
    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Add { record, reply } => {
                let outcome = self.add(record).await;
                let _ = reply.send(outcome);
            }
            Command::List { reply } => {
                let _ = reply.send(self.list.iter().cloned().collect());
            }
            Command::Count { reply } => {
                let _ = reply.send(self.count);
            }
            Command::Contains { block, reply } => {
                let _ = reply.send(self.set.contains(&block));
            }
            Command::Clear { reply } => {
                if let Err(err) = sqlx::query("DELETE FROM proved_blocks").execute(&self.pool).await {
                    error!("failed to clear proved_blocks: {err}");
                }
                self.list.clear();
                self.set.clear();
                self.count = 0;
                let _ = reply.send(());
            }
        }
    }

    async fn add(&mut self, record: ProvedRecord) -> AddOutcome {
        // I4: duplicate decided by in-memory set OR the unique constraint;
        // either is sufficient to reject (§4.5).
        if self.set.contains(&record.block) {
            return AddOutcome::Duplicate;
        }

        match insert(&self.pool, &record).await {
            Ok(true) => {}
            Ok(false) => return AddOutcome::Duplicate,
            Err(err) => return AddOutcome::Error(err.to_string()),
        }

        // Durable write committed before the in-memory view changes
        // (§9 "Durability ordering").
        let pos = self.list.iter().position(|r| r.proved_at < record.proved_at).unwrap_or(self.list.len());
        self.list.insert(pos, record.clone());
        self.set.insert(record.block);
        self.count += 1;

        if self.list.len() > LEDGER_CAP {
            if let Some(dropped) = self.list.pop_back() {
                self.set.remove(&dropped.block);
            }
        }

        if let Some(notify) = &self.notify {
            notify.publish(Topic::ProvedBlocksUpdated);
        }

        AddOutcome::Ok
    }
}

async fn insert(pool: &SqlitePool, record: &ProvedRecord) -> Result<bool, sqlx::Error> {
    let now_ts = now();
    let result = sqlx::query(
        r#"
        INSERT INTO proved_blocks
            (block_number, proved_at, proving_duration_seconds, input_generation_duration_seconds, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(block_number) DO NOTHING
        "#,
    )
    .bind(record.block as i64)
    .bind(record.proved_at)
    .bind(record.proving_seconds)
    .bind(record.input_gen_seconds)
    .bind(now_ts)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn load_recent(pool: &SqlitePool, limit: i64) -> Result<VecDeque<ProvedRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT block_number, proved_at, proving_duration_seconds, input_generation_duration_seconds \
         FROM proved_blocks ORDER BY proved_at DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ProvedRecord {
            block: row.get::<i64, _>("block_number") as u64,
            proved_at: row.get("proved_at"),
            proving_seconds: row.get::<Option<i64>, _>("proving_duration_seconds").map(|v| v as u32),
            input_gen_seconds: row.get::<Option<i64>, _>("input_generation_duration_seconds").map(|v| v as u32),
        })
        .collect())
}

async fn count_rows(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS c FROM proved_blocks").fetch_one(pool).await?;
    Ok(row.get::<i64, _>("c") as u64)
}
