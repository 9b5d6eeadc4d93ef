//! Mock workflow starter for testing the ingest trigger.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::trigger::WorkflowStarter;
use crate::workflow::{ExecutionRequest, WorkflowError};

/// Records start calls instead of running executions.
///
/// Can fail the next few calls transiently or reject every call.
#[derive(Debug, Clone, Default)]
pub struct MockWorkflowStarter {
    started: Arc<RwLock<Vec<ExecutionRequest>>>,
    calls: Arc<RwLock<usize>>,
    fail_remaining: Arc<RwLock<u32>>,
    reject: Arc<RwLock<bool>>,
}

impl MockWorkflowStarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that started an execution, in call order.
    pub async fn started(&self) -> Vec<ExecutionRequest> {
        self.started.read().await.clone()
    }

    /// Number of start calls, including failed ones.
    pub async fn calls(&self) -> usize {
        *self.calls.read().await
    }

    /// Fail the next `count` calls with a transient error.
    pub async fn fail_next(&self, count: u32) {
        *self.fail_remaining.write().await = count;
    }

    /// Reject every call with a non-retryable error.
    pub async fn set_reject(&self, reject: bool) {
        *self.reject.write().await = reject;
    }
}

#[async_trait]
impl WorkflowStarter for MockWorkflowStarter {
    async fn start(&self, request: ExecutionRequest) -> Result<String, WorkflowError> {
        *self.calls.write().await += 1;

        if *self.reject.read().await {
            return Err(WorkflowError::InvalidObjectKey(request.key));
        }

        {
            let mut remaining = self.fail_remaining.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(WorkflowError::NotRunning);
            }
        }

        let execution_id = request.execution_id.clone();
        self.started.write().await.push(request);
        Ok(execution_id)
    }
}
