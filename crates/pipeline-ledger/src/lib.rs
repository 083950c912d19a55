#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod common;
mod missed;
mod proved;

pub use common::{open_pool, AddOutcome, LEDGER_CAP};
pub use missed::MissedLedger;
pub use proved::ProvedLedger;

#[cfg(test)]
mod tests {
    use super::*;
    use ethp_types::{MissedRecord, MissedStage, ProvedRecord};

    async fn test_pool() -> sqlx::SqlitePool {
        open_pool("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_then_duplicate_is_rejected() {
        let pool = test_pool().await;
        let ledger = ProvedLedger::spawn(pool, None).await.unwrap();

        let record = ProvedRecord { block: 100, proved_at: 1, proving_seconds: Some(10), input_gen_seconds: Some(2) };
        assert_eq!(ledger.add(record.clone()).await, AddOutcome::Ok);
        assert_eq!(ledger.add(record).await, AddOutcome::Duplicate);
        assert_eq!(ledger.count().await, 1);
    }

    #[tokio::test]
    async fn list_is_capped_and_sorted_descending() {
        let pool = test_pool().await;
        let ledger = ProvedLedger::spawn(pool, None).await.unwrap();

        for i in 1..=105u64 {
            let record = ProvedRecord { block: i, proved_at: i as i64, proving_seconds: None, input_gen_seconds: None };
            assert_eq!(ledger.add(record).await, AddOutcome::Ok);
        }

        let list = ledger.list().await;
        assert_eq!(list.len(), 100);
        assert_eq!(list.first().unwrap().block, 105);
        assert_eq!(list.last().unwrap().block, 6);
        assert_eq!(ledger.count().await, 105);
        assert!(!ledger.contains(5).await);
        assert!(ledger.contains(105).await);
    }

    #[tokio::test]
    async fn proved_and_missed_are_independent_tables() {
        let pool = test_pool().await;
        let proved = ProvedLedger::spawn(pool.clone(), None).await.unwrap();
        let missed = MissedLedger::spawn(pool, None).await.unwrap();

        let proved_record = ProvedRecord { block: 200, proved_at: 1, proving_seconds: None, input_gen_seconds: None };
        let missed_record =
            MissedRecord { block: 300, failed_at: 1, stage: MissedStage::Proving, reason: "boom".to_string() };

        assert_eq!(proved.add(proved_record).await, AddOutcome::Ok);
        assert_eq!(missed.add(missed_record).await, AddOutcome::Ok);

        assert!(proved.contains(200).await);
        assert!(!proved.contains(300).await);
        assert!(missed.contains(300).await);
        assert!(!missed.contains(200).await);
    }

    #[tokio::test]
    async fn durability_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ledger.sqlite3");
        let url = format!("sqlite://{}", db_path.display());

        {
            let pool = open_pool(&url).await.unwrap();
            let ledger = ProvedLedger::spawn(pool, None).await.unwrap();
            for i in 1..=105u64 {
                let record =
                    ProvedRecord { block: i, proved_at: i as i64, proving_seconds: None, input_gen_seconds: None };
                ledger.add(record).await;
            }
        }

        // Fresh "process": a brand new pool and a brand new actor over it.
        let pool = open_pool(&url).await.unwrap();
        let ledger = ProvedLedger::spawn(pool, None).await.unwrap();

        assert_eq!(ledger.count().await, 105);
        assert_eq!(ledger.list().await.len(), 100);
        assert!(!ledger.contains(5).await);
        assert!(ledger.contains(105).await);
    }

    #[tokio::test]
    async fn clear_resets_in_memory_and_store() {
        let pool = test_pool().await;
        let ledger = ProvedLedger::spawn(pool, None).await.unwrap();
        let record = ProvedRecord { block: 1, proved_at: 1, proving_seconds: None, input_gen_seconds: None };
        ledger.add(record).await;
        ledger.clear().await;
        assert_eq!(ledger.count().await, 0);
        assert!(ledger.list().await.is_empty());
    }
}
