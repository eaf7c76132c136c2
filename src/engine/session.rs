//! Register access session.
//!
//! A [`Session`] is the explicit connection object for one inverter: it owns
//! the transport, the register state and the diagnostics. Every register
//! operation goes through it, one at a time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::core::data::{Value, ValueBatch};
use crate::core::error::{InverterError, Result};
use crate::core::sensor::Sensor;
use crate::core::traits::{ConnectionState, Diagnostics, RegisterTransport};
use crate::store::RegisterState;

use super::group::{group_sensors, register_map, ALLOW_GAP, DEFAULT_BATCH_SIZE};

/// Largest FC03 read the Modbus protocol allows.
pub const MAX_BATCH_SIZE: u16 = 125;

/// Session shared between tasks. The mutex is the single exclusion boundary
/// for every register operation.
pub type SharedSession<T> = Arc<Mutex<Session<T>>>;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum registers per batched read.
    pub batch_size: u16,

    /// Bounded wait for every transport call.
    pub io_timeout: Duration,

    /// Minimum quiet time between the end of one transport request and the
    /// start of the next, across calls.
    pub inter_request_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            io_timeout: Duration::from_secs(3),
            inter_request_delay: Duration::from_millis(1),
        }
    }
}

impl EngineConfig {
    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: u16) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the I/O timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the inter-request delay.
    pub fn with_inter_request_delay(mut self, delay: Duration) -> Self {
        self.inter_request_delay = delay;
        self
    }
}

/// A read that returned fewer words than requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortReadInfo {
    pub start: u16,
    pub requested: u16,
    pub received: u16,
}

/// Outcome of a successful [`Session::read_sensors`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadReport {
    /// Batched read requests issued.
    pub groups: usize,

    /// Register words merged into the state.
    pub registers: usize,

    /// Groups that came back short.
    pub short_reads: Vec<ShortReadInfo>,
}

impl ReadReport {
    /// Whether every group returned all requested words.
    pub fn is_complete(&self) -> bool {
        self.short_reads.is_empty()
    }
}

/// Outcome of a successful [`Session::write_sensor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Sensor written.
    pub sensor_id: String,

    /// `(address, word)` pairs written, in address order.
    pub registers: Vec<(u16, u16)>,
}

/// Register access session for one inverter.
pub struct Session<T> {
    transport: T,
    config: EngineConfig,
    state: RegisterState,
    diagnostics: Diagnostics,
    last_request: Option<Instant>,
}

impl<T: RegisterTransport> Session<T> {
    /// Create a session. Batch sizes outside `1..=125` are clamped.
    pub fn new(transport: T, mut config: EngineConfig) -> Self {
        config.batch_size = config.batch_size.clamp(1, MAX_BATCH_SIZE);
        let diagnostics = Diagnostics::new(transport.name());
        Self {
            transport,
            config,
            state: RegisterState::new(),
            diagnostics,
            last_request: None,
        }
    }

    /// Wrap the session for sharing between tasks.
    pub fn into_shared(self) -> SharedSession<T> {
        Arc::new(Mutex::new(self))
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register state (read-only).
    pub fn state(&self) -> &RegisterState {
        &self.state
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport (mutable).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.diagnostics.connection_state
    }

    /// Diagnostics snapshot.
    pub fn diagnostics(&self) -> Diagnostics {
        let mut diag = self.diagnostics.clone();
        diag.extra = serde_json::json!({
            "batch_size": self.config.batch_size,
            "tracked_sensors": self.state.tracked_count(),
            "known_registers": self.state.register_count(),
        });
        diag
    }

    // ========== lifecycle ==========

    /// Open the transport.
    pub async fn connect(&mut self) -> Result<()> {
        self.diagnostics.connection_state = ConnectionState::Connecting;
        match self.transport.connect().await {
            Ok(()) => {
                self.diagnostics.connection_state = ConnectionState::Connected;
                info!("Connected via {}", self.transport.name());
                Ok(())
            }
            Err(e) => {
                self.diagnostics.connection_state = ConnectionState::Error;
                self.record_error(&e);
                Err(e)
            }
        }
    }

    /// Close the transport.
    pub async fn disconnect(&mut self) -> Result<()> {
        let result = self.transport.disconnect().await;
        self.diagnostics.connection_state = ConnectionState::Disconnected;
        result
    }

    // ========== tracked sensors ==========

    /// Add sensors to the poll set.
    pub fn track<I>(&mut self, sensors: I) -> usize
    where
        I: IntoIterator<Item = Arc<Sensor>>,
    {
        sensors
            .into_iter()
            .filter(|s| self.state.track(s.clone()))
            .count()
    }

    /// Sensors in the poll set.
    pub fn tracked(&self) -> Vec<Arc<Sensor>> {
        self.state.tracked_sensors()
    }

    /// Last decoded value of a tracked sensor.
    pub fn value(&self, id: &str) -> Option<&Value> {
        self.state.value(id)
    }

    /// Readings for all tracked sensors with a value.
    pub fn values(&self) -> ValueBatch {
        self.state.values()
    }

    /// Decode any sensor from the cached registers.
    pub fn decode(&self, sensor: &Sensor) -> Result<Option<Value>> {
        self.state.decode(sensor)
    }

    // ========== reads ==========

    /// Read every tracked sensor.
    pub async fn read_tracked(&mut self) -> Result<ReadReport> {
        let sensors = self.state.tracked_sensors();
        self.read_sensors(&sensors).await
    }

    /// Read all registers referenced by `sensors` in batched requests.
    ///
    /// Words are merged into the state only once every group was read, so
    /// derived sensors never mix registers from different cycles. The first
    /// failing group aborts the read. Short reads are merged as far as they
    /// go and reported.
    pub async fn read_sensors(&mut self, sensors: &[Arc<Sensor>]) -> Result<ReadReport> {
        for sensor in sensors {
            if !self.state.is_tracked(&sensor.id) {
                warn!("Reading untracked sensor {}", sensor.id);
            }
        }

        let groups: Vec<_> = group_sensors(
            sensors.iter().map(|s| s.as_ref()),
            ALLOW_GAP,
            self.config.batch_size,
        )
        .collect();

        let mut report = ReadReport::default();
        let mut pending: Vec<(u16, u16)> = Vec::new();

        for group in &groups {
            self.pause().await;

            let count = group.len();
            let result = bounded(
                self.config.io_timeout,
                group.start,
                count,
                self.transport.read_holding_registers(group.start, count),
            )
            .await;
            self.last_request = Some(Instant::now());

            let words = match result {
                Ok(words) => words,
                Err(e) => {
                    error!("Read {}..={} failed: {}", group.start, group.end, e);
                    self.record_error(&e);
                    return Err(e);
                }
            };

            debug!(
                "Read {}..={}: {} of {} registers",
                group.start,
                group.end,
                words.len(),
                count
            );
            self.diagnostics.read_count += 1;

            if words.len() < count as usize {
                warn!(
                    "Short read at {}: got {} of {} registers",
                    group.start,
                    words.len(),
                    count
                );
                report.short_reads.push(ShortReadInfo {
                    start: group.start,
                    requested: count,
                    received: words.len() as u16,
                });
            }

            let received = words.len().min(count as usize);
            pending.extend(register_map(group.start, &words[..received]));
            report.groups += 1;
        }

        report.registers = pending.len();
        self.state.update(pending);
        self.state.refresh_values();

        Ok(report)
    }

    /// Read one register from the device and cache it.
    pub async fn read_register(&mut self, address: u16) -> Result<u16> {
        self.pause().await;
        let result = bounded(
            self.config.io_timeout,
            address,
            1,
            self.transport.read_holding_registers(address, 1),
        )
        .await;
        self.last_request = Some(Instant::now());

        let words = match result {
            Ok(words) => words,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };
        self.diagnostics.read_count += 1;

        let word = words.first().copied().ok_or(InverterError::ShortRead {
            start: address,
            requested: 1,
            received: 0,
        })?;
        self.state.update([(address, word)]);
        Ok(word)
    }

    // ========== writes ==========

    /// Encode `value` and write it to the sensor's registers.
    ///
    /// Bitmask sensors re-read their first register and only replace the
    /// masked bits. The state is updated once every register was accepted;
    /// on failure it is left untouched. No retries.
    pub async fn write_sensor(&mut self, sensor: &Sensor, value: &Value) -> Result<WriteReport> {
        let mut words = codec::encode(sensor, value)?;
        if words.is_empty() || words.len() != sensor.address.len() {
            return Err(InverterError::invalid_value(format!(
                "{}: encoded {} words for {} registers",
                sensor.id,
                words.len(),
                sensor.address.len()
            )));
        }

        if let Some(mask) = sensor.bitmask {
            let first = sensor.address[0];
            let current = self.read_register(first).await?;
            let bits = codec::check_bitmask(sensor, mask, words[0]);
            words[0] = codec::patch_bitmask(current, bits, mask);
            debug!(
                "{}: patch register {} {:#06x} -> {:#06x} (mask {:#06x})",
                sensor.id, first, current, words[0], mask
            );
        }

        let registers: Vec<(u16, u16)> = sensor.address.iter().copied().zip(words).collect();

        for &(address, word) in &registers {
            self.pause().await;

            let result = bounded(
                self.config.io_timeout,
                address,
                1,
                self.transport.write_register(address, word),
            )
            .await;
            self.last_request = Some(Instant::now());

            let accepted = match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Write {}={} failed: {}", address, word, e);
                    self.record_error(&e);
                    return Err(e);
                }
            };

            if !accepted {
                let e = InverterError::WriteRejected {
                    address,
                    value: word,
                };
                warn!("{}: {}", sensor.id, e);
                self.record_error(&e);
                return Err(e);
            }
            self.diagnostics.write_count += 1;
        }

        self.state.update(registers.iter().copied());
        self.state.refresh_values();
        info!("Wrote {} = {} ({:?})", sensor.id, value, registers);

        Ok(WriteReport {
            sensor_id: sensor.id.clone(),
            registers,
        })
    }

    /// Record the poll driver's count of failed cycles in a row.
    pub(crate) fn set_consecutive_errors(&mut self, count: u32) {
        self.diagnostics.consecutive_errors = count;
    }

    fn record_error(&mut self, e: &InverterError) {
        self.diagnostics.error_count += 1;
        self.diagnostics.last_error = Some(e.to_string());
    }

    /// Wait out what is left of the inter-request delay since the last
    /// transport request.
    fn pause(&self) -> tokio::time::Sleep {
        let now = Instant::now();
        let ready = self
            .last_request
            .map_or(now, |last| (last + self.config.inter_request_delay).max(now));
        tokio::time::sleep_until(ready)
    }
}

/// Run a transport call with a bounded wait.
async fn bounded<F, R>(limit: Duration, start: u16, count: u16, call: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(InverterError::Timeout { start, count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sensor::units;
    use crate::transport::{SimulatedFault, SimulatedTransport};

    fn config() -> EngineConfig {
        EngineConfig::default().with_inter_request_delay(Duration::ZERO)
    }

    async fn session(sim: &SimulatedTransport) -> Session<SimulatedTransport> {
        let mut session = Session::new(sim.clone(), config());
        session.connect().await.unwrap();
        session
    }

    fn soc() -> Arc<Sensor> {
        Arc::new(Sensor::new(vec![184], "Battery SOC", units::PERCENT, 1.0))
    }

    #[tokio::test]
    async fn test_batch_size_is_clamped() {
        let sim = SimulatedTransport::new();
        assert_eq!(
            Session::new(sim.clone(), config().with_batch_size(0)).config().batch_size,
            1
        );
        assert_eq!(
            Session::new(sim, config().with_batch_size(500)).config().batch_size,
            MAX_BATCH_SIZE
        );
    }

    #[tokio::test]
    async fn test_read_groups_and_decodes() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(3, 0x4142), (4, 0x4344), (5, 0x4500), (183, 5321), (184, 87)]);
        let mut session = session(&sim).await;

        let serial = Arc::new(Sensor::serial(vec![3, 4, 5], "Serial"));
        let volt = Arc::new(Sensor::new(vec![183], "Battery voltage", units::VOLT, 0.01));
        session.track([serial.clone(), volt.clone(), soc()]);

        let report = session.read_tracked().await.unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(report.registers, 5);
        assert!(report.is_complete());
        assert_eq!(sim.reads(), vec![(3, 3), (183, 2)]);

        assert_eq!(session.value("serial"), Some(&Value::String("ABCDE".into())));
        assert_eq!(session.value("battery_voltage"), Some(&Value::Float(53.21)));
        assert_eq!(session.value("battery_soc"), Some(&Value::Integer(87)));
        assert_eq!(session.diagnostics().read_count, 2);
    }

    #[tokio::test]
    async fn test_failed_group_discards_whole_read() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(10, 1), (184, 50)]);
        let mut session = session(&sim).await;
        let first = Arc::new(Sensor::new(vec![10], "First", "", 1.0));
        session.track([first, soc()]);

        // first group succeeds, second times out
        sim.push_fault(SimulatedFault::None);
        sim.push_fault(SimulatedFault::Timeout);
        let err = session.read_tracked().await.unwrap_err();
        assert!(matches!(err, InverterError::Timeout { start: 184, count: 1 }));

        assert_eq!(session.state().register(10), None);
        assert_eq!(session.value("first"), None);
        let diag = session.diagnostics();
        assert_eq!(diag.error_count, 1);
        assert!(diag.last_error.is_some());

        session.read_tracked().await.unwrap();
        assert_eq!(session.value("first"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_short_read_merges_partial_words() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(183, 5321), (184, 87)]);
        let mut session = session(&sim).await;
        let volt = Arc::new(Sensor::new(vec![183], "Battery voltage", units::VOLT, 0.01));
        session.track([volt, soc()]);

        sim.push_fault(SimulatedFault::ShortRead(1));
        let report = session.read_tracked().await.unwrap();
        assert_eq!(
            report.short_reads,
            vec![ShortReadInfo {
                start: 183,
                requested: 2,
                received: 1
            }]
        );
        assert_eq!(report.registers, 1);
        assert_eq!(session.value("battery_voltage"), Some(&Value::Float(53.21)));
        assert_eq!(session.value("battery_soc"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_transport_times_out() {
        let sim = SimulatedTransport::new();
        let mut session = session(&sim).await;
        session.track([soc()]);

        sim.push_fault(SimulatedFault::Hang);
        let err = session.read_tracked().await.unwrap_err();
        assert!(matches!(err, InverterError::Timeout { start: 184, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_spaces_requests_across_calls() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(10, 1), (184, 50), (274, 0b1010)]);
        let delay = Duration::from_millis(100);
        let mut session = Session::new(sim.clone(), config().with_inter_request_delay(delay));
        session.connect().await.unwrap();
        let first = Arc::new(Sensor::new(vec![10], "First", "", 1.0));
        session.track([first.clone(), soc()]);

        // no wait before the first request
        let start = Instant::now();
        session.read_tracked().await.unwrap();
        assert_eq!(start.elapsed(), delay);

        // a separate call still waits
        session.read_sensors(&[first]).await.unwrap();
        assert_eq!(start.elapsed(), delay * 2);

        // bitmask write: read-before-write, then the write
        let charge = Sensor::select(274, "Prog1 charge", &[(1, "Allow Grid")]).with_bitmask(0b11);
        session.write_sensor(&charge, &Value::from(1)).await.unwrap();
        assert_eq!(start.elapsed(), delay * 4);
        assert_eq!(sim.reads(), vec![(10, 1), (184, 1), (10, 1), (274, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_counts_from_last_request() {
        let sim = SimulatedTransport::new();
        let delay = Duration::from_millis(100);
        let mut session = Session::new(sim, config().with_inter_request_delay(delay));
        session.connect().await.unwrap();
        session.track([soc()]);

        let start = Instant::now();
        session.read_tracked().await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        session.read_tracked().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_untracked_read_is_allowed() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(184, 42)]);
        let mut session = session(&sim).await;

        let sensor = soc();
        session.read_sensors(&[sensor.clone()]).await.unwrap();
        assert_eq!(session.value("battery_soc"), None);
        assert_eq!(session.decode(&sensor).unwrap(), Some(Value::Integer(42)));
    }

    #[tokio::test]
    async fn test_bitmask_write_preserves_sibling_bits() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(274, 0b1010)]);
        let mut session = session(&sim).await;

        let charge = Sensor::select(
            274,
            "Prog1 charge",
            &[(0, "No Grid or Gen"), (1, "Allow Grid"), (2, "Allow Gen"), (3, "Allow Grid & Gen")],
        )
        .with_bitmask(0b0011);

        let report = session
            .write_sensor(&charge, &Value::from("Allow Grid"))
            .await
            .unwrap();
        assert_eq!(report.registers, vec![(274, 0b1001)]);
        assert_eq!(sim.register(274), Some(0b1001));
        assert_eq!(session.state().register(274), Some(0b1001));
        assert_eq!(sim.reads(), vec![(274, 1)]);
        assert_eq!(sim.writes(), vec![(274, 0b1001)]);
    }

    #[tokio::test]
    async fn test_bitmask_write_fails_when_read_fails() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(274, 0b1010)]);
        let mut session = session(&sim).await;
        let charge = Sensor::select(274, "Prog1 charge", &[(1, "Allow Grid")]).with_bitmask(0b11);

        sim.push_fault(SimulatedFault::Timeout);
        assert!(session.write_sensor(&charge, &Value::from(1)).await.is_err());
        assert!(sim.writes().is_empty());
        assert_eq!(sim.register(274), Some(0b1010));
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_state_untouched() {
        let sim = SimulatedTransport::new();
        sim.set_registers([(210, 100)]);
        let mut session = session(&sim).await;
        let current = Arc::new(Sensor::number(
            210,
            "Battery Max Charge Current",
            units::AMPS,
            1.0,
            0.0,
            185.0,
        ));
        session.track([current.clone()]);
        session.read_tracked().await.unwrap();

        sim.push_fault(SimulatedFault::RejectWrite);
        let err = session.write_sensor(&current, &Value::from(50)).await.unwrap_err();
        assert!(matches!(err, InverterError::WriteRejected { address: 210, value: 50 }));
        assert_eq!(session.state().register(210), Some(100));
        assert_eq!(session.value("battery_max_charge_current"), Some(&Value::Integer(100)));

        session.write_sensor(&current, &Value::from(50)).await.unwrap();
        assert_eq!(session.state().register(210), Some(50));
        assert_eq!(session.value("battery_max_charge_current"), Some(&Value::Integer(50)));
        assert_eq!(session.diagnostics().write_count, 1);
    }

    #[tokio::test]
    async fn test_write_multi_register_in_address_order() {
        let sim = SimulatedTransport::new();
        let mut session = session(&sim).await;
        let total = Sensor::new(vec![63, 64], "Total Active Energy", units::KWH, 0.1);

        session.write_sensor(&total, &Value::Float(6653.6)).await.unwrap();
        assert_eq!(sim.writes(), vec![(63, 1000), (64, 1)]);
        assert_eq!(session.decode(&total).unwrap(), Some(Value::Float(6653.6)));
    }

    #[tokio::test]
    async fn test_write_read_only_sensor() {
        let sim = SimulatedTransport::new();
        let mut session = session(&sim).await;
        let fault = Sensor::fault(vec![103, 104], "Fault");
        assert!(matches!(
            session.write_sensor(&fault, &Value::from(1)).await,
            Err(InverterError::ReadOnly(_))
        ));
        assert!(sim.writes().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error_state() {
        let sim = SimulatedTransport::new();
        sim.set_offline(true);
        let mut session = Session::new(sim, config());
        assert!(session.connect().await.is_err());
        assert_eq!(session.connection_state(), ConnectionState::Error);
        assert!(session.diagnostics().last_error.is_some());
    }
}
