//! MissedLedger (C6): identical contract to [`crate::ProvedLedger`] with
//! `{failed_at, stage, reason}` fields (§4.6).

use std::collections::{HashSet, VecDeque};

use ethp_notify::{NotificationSink, Topic};
use ethp_types::{BlockId, MissedRecord, MissedStage};
use sqlx::{Row, SqlitePool};
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::common::{now, AddOutcome, LEDGER_CAP};

enum Command {
    Add { record: MissedRecord, reply: oneshot::Sender<AddOutcome> },
    List { reply: oneshot::Sender<Vec<MissedRecord>> },
    Count { reply: oneshot::Sender<u64> },
    Contains { block: BlockId, reply: oneshot::Sender<bool> },
    Clear { reply: oneshot::Sender<()> },
}

#[derive(Debug, Clone)]
pub struct MissedLedger {
    tx: mpsc::Sender<Command>,
}

struct State {
    pool: SqlitePool,
    notify: Option<NotificationSink>,
    list: VecDeque<MissedRecord>,
    set: HashSet<BlockId>,
    count: u64,
}

impl MissedLedger {
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

    pub async fn add(&self, record: MissedRecord) -> AddOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Add { record, reply }).await.is_err() {
            return AddOutcome::Error("ledger actor gone".to_string());
        }
        rx.await.unwrap_or(AddOutcome::Error("ledger actor dropped reply".to_string()))
    }

    pub async fn list(&self) -> Vec<MissedRecord> {
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

    /// For tests only (§4.6).
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
                if let Err(err) = sqlx::query("DELETE FROM missed_blocks").execute(&self.pool).await {
                    error!("failed to clear missed_blocks: {err}");
                }
                self.list.clear();
                self.set.clear();
                self.count = 0;
                let _ = reply.send(());
            }
        }
    }

    async fn add(&mut self, record: MissedRecord) -> AddOutcome {
        if self.set.contains(&record.block) {
            return AddOutcome::Duplicate;
        }

        match insert(&self.pool, &record).await {
            Ok(true) => {}
            Ok(false) => return AddOutcome::Duplicate,
            Err(err) => return AddOutcome::Error(err.to_string()),
        }

        let pos = self.list.iter().position(|r| r.failed_at < record.failed_at).unwrap_or(self.list.len());
        self.list.insert(pos, record.clone());
        self.set.insert(record.block);
        self.count += 1;

        if self.list.len() > LEDGER_CAP {
            if let Some(dropped) = self.list.pop_back() {
                self.set.remove(&dropped.block);
            }
        }

        if let Some(notify) = &self.notify {
            notify.publish(Topic::MissedBlocksUpdated);
        }

        AddOutcome::Ok
    }
}

async fn insert(pool: &SqlitePool, record: &MissedRecord) -> Result<bool, sqlx::Error> {
    let now_ts = now();
    let result = sqlx::query(
        r#"
        INSERT INTO missed_blocks (block_number, failed_at, stage, reason, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(block_number) DO NOTHING
        "#,
    )
    .bind(record.block as i64)
    .bind(record.failed_at)
    .bind(record.stage.as_str())
    .bind(&record.reason)
    .bind(now_ts)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn load_recent(pool: &SqlitePool, limit: i64) -> Result<VecDeque<MissedRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT block_number, failed_at, stage, reason FROM missed_blocks ORDER BY failed_at DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| MissedRecord {
            block: row.get::<i64, _>("block_number") as u64,
            failed_at: row.get("failed_at"),
            stage: row.get::<String, _>("stage").parse::<MissedStage>().unwrap_or(MissedStage::Unknown),
            reason: row.get("reason"),
        })
        .collect())
}

async fn count_rows(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS c FROM missed_blocks").fetch_one(pool).await?;
    Ok(row.get::<i64, _>("c") as u64)
}
