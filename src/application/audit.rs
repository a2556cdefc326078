use crate::domain::audit::TransferRecord;
use crate::domain::ports::AuditLogHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Writes audit records after the subscriber's reply has been built.
///
/// Failures are retried with doubling backoff and finally logged; they never
/// reach the caller.
#[derive(Clone)]
pub struct AuditEmitter {
    log: AuditLogHandle,
    max_attempts: u32,
    base_backoff: Duration,
}

impl AuditEmitter {
    pub fn new(log: AuditLogHandle) -> Self {
        Self::with_policy(log, MAX_ATTEMPTS, BASE_BACKOFF)
    }

    pub fn with_policy(log: AuditLogHandle, max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            log,
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Detaches the writes onto the runtime.
    pub fn emit(&self, records: Vec<TransferRecord>) -> Option<JoinHandle<()>> {
        if records.is_empty() {
            return None;
        }
        let emitter = self.clone();
        Some(tokio::spawn(async move {
            for record in records {
                emitter.write(record).await;
            }
        }))
    }

    /// Returns whether the record was eventually stored.
    pub async fn write(&self, record: TransferRecord) -> bool {
        let mut backoff = self.base_backoff;
        for attempt in 1..=self.max_attempts {
            match self.log.record(record.clone()).await {
                Ok(()) => {
                    debug!(reference = %record.reference, status = %record.status, "Audit record written");
                    return true;
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(reference = %record.reference, attempt, error = %e, "Audit write failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    error!(reference = %record.reference, attempt, error = %e, "Audit record dropped");
                }
            }
        }
        false
    }
}
