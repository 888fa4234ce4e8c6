//! Credit debit and refund for jobs.
//!
//! A job costs one credit, taken before the processing call. Every failure
//! after the debit owes a refund. Refunds are server-side increments against
//! the stored balance, never a write of a value read before the call, so a
//! purchase completed mid-job is not clobbered.

use std::sync::Arc;

use tracing::{error, info};

use clipper_firestore::{CreditRepository, DebitOutcome, FirestoreError, FirestoreResult};
use clipper_models::FileId;

use crate::metrics;
use crate::retry::{retry_async, RetryConfig, RetryResult};

/// Credits charged per job.
pub const JOB_CREDIT_COST: u32 = 1;

pub struct CreditLedger {
    credits: Arc<dyn CreditRepository>,
    refund_retry: RetryConfig,
}

impl CreditLedger {
    pub fn new(credits: Arc<dyn CreditRepository>, refund_retry: RetryConfig) -> Self {
        Self {
            credits,
            refund_retry,
        }
    }

    /// Take the job's credit if the balance allows it.
    pub async fn debit(&self, user_id: &str) -> FirestoreResult<DebitOutcome> {
        self.credits.try_debit(user_id, JOB_CREDIT_COST).await
    }

    /// Give the job's credit back, retrying with a fixed backoff.
    ///
    /// Exhausting the retries leaves the user short one credit; that is logged
    /// as critical and counted, and the last error is returned.
    pub async fn refund(&self, user_id: &str, file_id: &FileId) -> Result<u32, FirestoreError> {
        let result = retry_async(&self.refund_retry, || async {
            self.credits.credit(user_id, JOB_CREDIT_COST).await
        })
        .await;

        match result {
            RetryResult::Success(balance) => {
                info!(user_id = %user_id, file_id = %file_id, balance, "Refunded job credit");
                Ok(balance)
            }
            RetryResult::Failed { error, attempts } => {
                error!(
                    critical = true,
                    user_id = %user_id,
                    file_id = %file_id,
                    attempts,
                    "Credit refund failed, balance needs manual correction: {}",
                    error
                );
                metrics::record_refund_failure();
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_firestore::MemoryCreditRepository;
    use std::time::Duration;

    fn ledger(repo: Arc<MemoryCreditRepository>) -> CreditLedger {
        CreditLedger::new(
            repo,
            RetryConfig::new("refund")
                .with_max_attempts(3)
                .with_delay(Duration::from_millis(500)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_survives_transient_failures() {
        let repo = Arc::new(MemoryCreditRepository::new());
        repo.set_balance("u1", 4);
        repo.fail_credits(2);

        let balance = ledger(repo.clone())
            .refund("u1", &FileId::from("f1"))
            .await
            .unwrap();
        assert_eq!(balance, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_gives_up_after_three_attempts() {
        let repo = Arc::new(MemoryCreditRepository::new());
        repo.set_balance("u1", 4);
        repo.fail_credits(3);

        let result = ledger(repo.clone()).refund("u1", &FileId::from("f1")).await;
        assert!(result.is_err());
        assert_eq!(repo.get_balance("u1"), Some(4));

        // A fourth attempt would have succeeded; it must not have been made
        assert_eq!(repo.credit("u1", 1).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_refund_uses_current_balance() {
        let repo = Arc::new(MemoryCreditRepository::new());
        repo.set_balance("u1", 4);
        let ledger = ledger(repo.clone());

        // Purchase lands while the job is running
        repo.set_balance("u1", 14);
        assert_eq!(ledger.refund("u1", &FileId::from("f1")).await.unwrap(), 15);
    }
}
