//! Poll driver.
//!
//! Owns the retry and escalation policy on top of a [`SharedSession`] and runs
//! the cooperative poll loop: queued writes, one read cycle, publish, wait.
//! A cycle that has started always runs to completion; shutdown is only
//! observed between cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::core::data::Value;
use crate::core::error::{InverterError, Result};
use crate::core::logging::log_banner;
use crate::core::sensor::Sensor;
use crate::core::traits::RegisterTransport;
use crate::store::ValueStore;

use super::session::{ReadReport, SharedSession, WriteReport};

/// Retry and escalation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Whole-cycle failures tolerated in a row; one more escalates.
    pub max_consecutive_failures: u32,

    /// Re-read each sensor on its own after a failed cycle.
    pub retry_single: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            retry_single: true,
        }
    }
}

/// Result of one poll cycle that did not escalate.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Every group was read.
    Complete(ReadReport),

    /// The batched read failed.
    Failed {
        /// Error of the batched read.
        error: String,
        /// Sensors that also failed when retried on their own.
        isolated: Vec<String>,
    },
}

impl CycleOutcome {
    /// Whether the cycle read everything.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// A write queued for the poll loop.
#[derive(Debug)]
pub struct WriteRequest {
    pub sensor: Arc<Sensor>,
    pub value: Value,
    /// Receives the write result after the confirmation read.
    pub reply: Option<oneshot::Sender<Result<WriteReport>>>,
}

impl WriteRequest {
    /// Create a request without a reply channel.
    pub fn new(sensor: Arc<Sensor>, value: impl Into<Value>) -> Self {
        Self {
            sensor,
            value: value.into(),
            reply: None,
        }
    }

    /// Create a request and the receiver for its result.
    pub fn with_reply(
        sensor: Arc<Sensor>,
        value: impl Into<Value>,
    ) -> (Self, oneshot::Receiver<Result<WriteReport>>) {
        let (tx, rx) = oneshot::channel();
        let req = Self {
            sensor,
            value: value.into(),
            reply: Some(tx),
        };
        (req, rx)
    }
}

/// Drives periodic reads of the tracked sensors.
pub struct PollDriver<T> {
    session: SharedSession<T>,
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl<T: RegisterTransport> PollDriver<T> {
    /// Create a driver over a shared session.
    pub fn new(session: SharedSession<T>, policy: RetryPolicy) -> Self {
        Self {
            session,
            policy,
            consecutive_failures: 0,
        }
    }

    /// The shared session.
    pub fn session(&self) -> &SharedSession<T> {
        &self.session
    }

    /// Retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Whole-cycle failures since the last complete cycle.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Poll every tracked sensor once.
    pub async fn poll_tracked(&mut self) -> Result<CycleOutcome> {
        let sensors = self.session.lock().await.tracked();
        self.poll(&sensors).await
    }

    /// Run one poll cycle over `sensors`.
    ///
    /// Returns [`InverterError::Escalated`] once more than
    /// `max_consecutive_failures` cycles in a row failed; the caller must stop
    /// polling then.
    pub async fn poll(&mut self, sensors: &[Arc<Sensor>]) -> Result<CycleOutcome> {
        let mut session = self.session.lock().await;

        let error = match session.read_sensors(sensors).await {
            Ok(report) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Read recovered after {} failed cycle(s)",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                session.set_consecutive_errors(0);
                return Ok(CycleOutcome::Complete(report));
            }
            Err(e) => e,
        };

        self.consecutive_failures += 1;
        session.set_consecutive_errors(self.consecutive_failures);
        if self.consecutive_failures > self.policy.max_consecutive_failures {
            let failures = self.consecutive_failures;
            log_banner(&format!("Multiple Modbus read errors: {}", error));
            return Err(InverterError::Escalated {
                failures,
                last_error: error.to_string(),
            });
        }

        warn!(
            "Read failed ({}/{}): {}",
            self.consecutive_failures, self.policy.max_consecutive_failures, error
        );

        let mut isolated = Vec::new();
        if self.policy.retry_single {
            for sensor in sensors {
                if let Err(e) = session.read_sensors(std::slice::from_ref(sensor)).await {
                    warn!("Retry of {} {:?} failed: {}", sensor.id, sensor.address, e);
                    isolated.push(sensor.id.clone());
                }
            }
        }

        Ok(CycleOutcome::Failed {
            error: error.to_string(),
            isolated,
        })
    }

    /// Write a value, then read the sensor back.
    pub async fn write(&mut self, sensor: &Sensor, value: &Value) -> Result<WriteReport> {
        let mut session = self.session.lock().await;
        let report = session.write_sensor(sensor, value).await?;

        let confirm = [Arc::new(sensor.clone())];
        if let Err(e) = session.read_sensors(&confirm).await {
            warn!("Confirmation read of {} failed: {}", sensor.id, e);
        }
        Ok(report)
    }

    /// Poll loop.
    ///
    /// Before each cycle all queued writes are applied. Complete cycles are
    /// published to `store`; failed ones are not. Returns `Ok(())` when
    /// `shutdown` turns `true` or its sender is dropped, and the escalation
    /// error otherwise.
    pub async fn run<S>(
        &mut self,
        store: &S,
        interval: Duration,
        mut writes: mpsc::Receiver<WriteRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: ValueStore + ?Sized,
    {
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.drain_writes(&mut writes).await;

            match self.poll_tracked().await? {
                CycleOutcome::Complete(report) => {
                    debug!(
                        "Cycle complete: {} groups, {} registers",
                        report.groups, report.registers
                    );
                    let values = self.session.lock().await.values();
                    store.publish(&values).await?;
                }
                CycleOutcome::Failed { isolated, .. } if !isolated.is_empty() => {
                    warn!("Sensors failing on their own: {}", isolated.join(", "));
                }
                CycleOutcome::Failed { .. } => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poll loop stopped");
        Ok(())
    }

    async fn drain_writes(&mut self, writes: &mut mpsc::Receiver<WriteRequest>) {
        while let Ok(req) = writes.try_recv() {
            let result = self.write(&req.sensor, &req.value).await;
            if let Err(e) = &result {
                warn!("Write {} = {} failed: {}", req.sensor.id, req.value, e);
            }
            if let Some(reply) = req.reply {
                let _ = reply.send(result);
            }
        }
    }
}
