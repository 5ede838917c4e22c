//! Modbus RTU transaction engine
//!
//! One transaction attempt is: acquire the bus, clear stale input, write the
//! request, wait the settle delay, read the response window, validate. The
//! bus is held for exactly one attempt; retries re-acquire it so other tasks
//! can interleave whole transactions between attempts.

use cooltower_core::config::SerialConfig;
use cooltower_core::{CoolTowerError, FunctionCode, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bus::BusArbiter;
use crate::frame::{self, Request, Response, MAX_READ_COUNT};

/// Retry count and backoff around a single-attempt operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub retries: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    debug!("Attempt {} failed, retrying: {}", attempt + 1, e);
                    attempt += 1;
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Timing of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionTiming {
    /// Pause between writing the request and reading the response
    pub settle: Duration,
    /// Read window for the response
    pub response_timeout: Duration,
}

impl Default for TransactionTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(50),
            response_timeout: Duration::from_millis(500),
        }
    }
}

/// Executes request/response exchanges on the shared bus
pub struct TransactionEngine {
    bus: Arc<BusArbiter>,
    timing: TransactionTiming,
    retry: RetryPolicy,
}

impl TransactionEngine {
    pub fn new(bus: Arc<BusArbiter>, timing: TransactionTiming, retry: RetryPolicy) -> Self {
        Self { bus, timing, retry }
    }

    /// Build an engine with timing and retries taken from the serial config.
    pub fn from_config(bus: Arc<BusArbiter>, config: &SerialConfig) -> Self {
        Self::new(
            bus,
            TransactionTiming {
                settle: Duration::from_millis(config.settle_ms),
                response_timeout: Duration::from_millis(config.response_timeout_ms),
            },
            RetryPolicy {
                retries: config.retries,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            },
        )
    }

    pub fn bus(&self) -> &Arc<BusArbiter> {
        &self.bus
    }

    /// Run one transaction with retries.
    ///
    /// `value` is the register count for reads and the value for writes.
    pub async fn execute(
        &self,
        device_id: u8,
        function: FunctionCode,
        register: u16,
        value: u16,
    ) -> Result<Response> {
        let request = Request {
            device_id,
            function,
            register,
            value,
        };
        if function == FunctionCode::ReadHoldingRegisters
            && (value == 0 || value > MAX_READ_COUNT)
        {
            return Err(CoolTowerError::InvalidInput(format!(
                "Register count must be 1-{}, got {}",
                MAX_READ_COUNT, value
            )));
        }

        self.retry
            .run(|attempt| {
                let request = request;
                async move {
                    let result = self.attempt(&request).await;
                    if let Err(e) = &result {
                        if attempt == self.retry.retries || !e.is_retryable() {
                            warn!(
                                "Device {} {:?} 0x{:04X} failed: {}",
                                device_id, function, register, e
                            );
                        }
                    }
                    result
                }
            })
            .await
    }

    /// Read `count` holding registers starting at `register`.
    pub async fn read_registers(&self, device_id: u8, register: u16, count: u16) -> Result<Vec<u16>> {
        match self
            .execute(device_id, FunctionCode::ReadHoldingRegisters, register, count)
            .await?
        {
            Response::Registers(values) => Ok(values),
            Response::WriteAck { .. } => Err(CoolTowerError::Frame(
                "write acknowledgement in response to a read".to_string(),
            )),
        }
    }

    /// Write one holding register and confirm the echo.
    pub async fn write_register(&self, device_id: u8, register: u16, value: u16) -> Result<()> {
        self.execute(device_id, FunctionCode::WriteSingleRegister, register, value)
            .await
            .map(|_| ())
    }

    /// One attempt under the bus lock.
    async fn attempt(&self, request: &Request) -> Result<Response> {
        let mut bus = self.bus.acquire().await?;

        bus.clear_input_buffer()?;
        bus.send(&request.to_bytes()).await?;
        tokio::time::sleep(self.timing.settle).await;
        let response = bus
            .receive(request.expected_response_len(), self.timing.response_timeout)
            .await?;
        drop(bus);

        frame::parse_response(request, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedBus;
    use cooltower_core::ExceptionCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine(sim: &SimulatedBus, retries: u32) -> TransactionEngine {
        let bus = Arc::new(BusArbiter::new(
            Box::new(sim.clone()),
            Duration::from_millis(500),
        ));
        TransactionEngine::new(
            bus,
            TransactionTiming {
                settle: Duration::from_millis(1),
                response_timeout: Duration::from_millis(20),
            },
            RetryPolicy {
                retries,
                backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_retry_policy_stops_on_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy {
            retries: 3,
            backoff: Duration::ZERO,
        }
        .run(|attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 1 {
                    Err(CoolTowerError::Timeout("t".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_policy_does_not_retry_bus_busy() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::default()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoolTowerError::BusBusy { waited_ms: 1 }) }
            })
            .await;
        assert!(matches!(result, Err(CoolTowerError::BusBusy { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_and_write_round_trip() {
        let sim = SimulatedBus::new();
        sim.add_device(3);
        let engine = engine(&sim, 0);

        engine.write_register(3, 0x2001, 4500).await.unwrap();
        let values = engine.read_registers(3, 0x2001, 1).await.unwrap();
        assert_eq!(values, vec![4500]);
    }

    #[tokio::test]
    async fn test_silent_device_times_out_after_retries() {
        let sim = SimulatedBus::new();
        let engine = engine(&sim, 2);

        let result = engine.read_registers(9, 0x2100, 3).await;
        assert!(matches!(result, Err(CoolTowerError::Timeout(_))));
        // One request per attempt
        assert_eq!(sim.requests_to(9), 3);
    }

    #[tokio::test]
    async fn test_corrupted_response_is_retried() {
        let sim = SimulatedBus::new();
        sim.add_device(1);
        sim.corrupt_next_responses(1, 1);
        let engine = engine(&sim, 1);

        assert!(engine.read_registers(1, 0x2100, 1).await.is_ok());
        assert_eq!(sim.requests_to(1), 2);
    }

    #[tokio::test]
    async fn test_exception_is_not_retried() {
        let sim = SimulatedBus::new();
        sim.add_device(1);
        let engine = engine(&sim, 2);

        match engine.read_registers(1, 0x7777, 1).await {
            Err(CoolTowerError::ProtocolException { code, .. }) => {
                assert_eq!(code, ExceptionCode::IllegalDataAddress)
            }
            other => panic!("Expected ProtocolException, got {:?}", other),
        }
        assert_eq!(sim.requests_to(1), 1);
    }

    #[tokio::test]
    async fn test_invalid_count_never_touches_bus() {
        let sim = SimulatedBus::new();
        sim.add_device(1);
        let engine = engine(&sim, 0);

        assert!(matches!(
            engine.read_registers(1, 0x2100, 0).await,
            Err(CoolTowerError::InvalidInput(_))
        ));
        assert_eq!(sim.requests_to(1), 0);
    }
}
