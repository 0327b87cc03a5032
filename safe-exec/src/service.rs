use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    error::Error,
    isolation::{build_backend, BackendKind, IsolationBackend},
    profile::ResourceLimitProfile,
    supervisor::ExecutionSupervisor,
    types::ExecutionOutcome,
    validator::{Rejection, ScriptValidator, ValidationVerdict},
};

/// How much of a malformed output to log
const LOGGED_OUTPUT_CHARS: usize = 200;

/// Validate, admit and run scripts. Cheap to clone; clones share the same
/// profile, backend and admission limit.
#[derive(Clone)]
pub struct ExecutionService {
    validator: Arc<ScriptValidator>,
    supervisor: Arc<ExecutionSupervisor>,
    semaphore: Arc<Semaphore>,
    profile: Arc<ResourceLimitProfile>,
    max_concurrent_executions: usize,
}

impl ExecutionService {
    pub fn new(config: &ServiceConfig) -> Result<Self, Error> {
        config.validate()?;
        let backend = build_backend(config.backend, &config.nsjail_config());
        Self::with_supervisor(
            ExecutionSupervisor::new(backend),
            config.limits.clone(),
            config.max_concurrent_executions,
        )
    }

    pub fn with_backend(
        backend: Arc<dyn IsolationBackend>,
        profile: ResourceLimitProfile,
        max_concurrent_executions: usize,
    ) -> Result<Self, Error> {
        Self::with_supervisor(
            ExecutionSupervisor::new(backend),
            profile,
            max_concurrent_executions,
        )
    }

    pub fn with_supervisor(
        supervisor: ExecutionSupervisor,
        profile: ResourceLimitProfile,
        max_concurrent_executions: usize,
    ) -> Result<Self, Error> {
        Ok(Self {
            validator: Arc::new(ScriptValidator::new()?),
            supervisor: Arc::new(supervisor),
            semaphore: Arc::new(Semaphore::new(max_concurrent_executions)),
            profile: Arc::new(profile),
            max_concurrent_executions,
        })
    }

    pub fn validate(&self, script: &str) -> ValidationVerdict {
        self.validator.validate(script)
    }

    /// Execute the `script` field of a request, which may not be a string
    pub async fn execute_value(&self, script: &Value) -> Result<ExecutionOutcome, Error> {
        match script {
            Value::String(script) => self.execute(script).await,
            _ => Err(Rejection::NotString.into()),
        }
    }

    /// Validate and run one script.
    ///
    /// Rejected scripts and requests beyond the concurrency limit fail with
    /// an error and spawn nothing. Everything that happens after spawning is
    /// reported as an [`ExecutionOutcome`].
    pub async fn execute(&self, script: &str) -> Result<ExecutionOutcome, Error> {
        self.validator.validate(script).into_result()?;

        let _permit = match self.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                warn!(
                    "Rejecting execution: {} already running",
                    self.max_concurrent_executions
                );
                return Err(Error::Busy(self.max_concurrent_executions));
            }
            Err(TryAcquireError::Closed) => {
                return Err(Error::System("Execution permits closed".to_string()))
            }
        };

        let id = Uuid::new_v4();
        let span = info_span!("execution", %id, backend = %self.supervisor.backend().kind());
        let start = Instant::now();

        let outcome = async {
            debug!("Starting execution of {} byte script", script.len());
            self.supervisor.run(script, &self.profile).await
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| {
            if let ExecutionOutcome::ProtocolViolation { raw_output } = &outcome {
                let excerpt: String = raw_output.chars().take(LOGGED_OUTPUT_CHARS).collect();
                warn!("Malformed envelope from sandbox: {:?}", excerpt);
            }
            info!(
                outcome = outcome.kind(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Execution finished"
            );
        });

        Ok(outcome)
    }

    pub fn profile(&self) -> &ResourceLimitProfile {
        &self.profile
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.supervisor.backend().kind()
    }

    pub fn get_available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}
