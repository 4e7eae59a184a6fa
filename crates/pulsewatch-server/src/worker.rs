use pulsewatch_alert::{AlertEngine, AlertError, ProcessSummary};
use pulsewatch_common::types::AlertPayload;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Bounded pool for payload evaluations.
///
/// At most `max_concurrent` payloads are evaluated at once; the rest wait for
/// a permit. The timeout covers waiting and evaluating. A timed-out
/// evaluation is dropped; rules it already persisted stay persisted.
#[derive(Clone)]
pub struct EvaluationPool {
    engine: Arc<AlertEngine>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
}

impl EvaluationPool {
    pub fn new(engine: Arc<AlertEngine>, max_concurrent: usize, timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout,
        }
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    /// Evaluations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub async fn submit(&self, payload: &AlertPayload) -> Result<ProcessSummary, AlertError> {
        let work = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| AlertError::Shutdown)?;
            self.engine.process_alert(payload).await
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    realm = %payload.metadata.realm,
                    resource = %payload.metadata.resource,
                    timeout_secs = self.timeout.as_secs(),
                    "Evaluation abandoned after timeout"
                );
                Err(AlertError::Timeout(self.timeout))
            }
        }
    }

    /// Stops accepting new evaluations; queued submits fail with
    /// [`AlertError::Shutdown`].
    pub fn close(&self) {
        self.permits.close();
    }
}
