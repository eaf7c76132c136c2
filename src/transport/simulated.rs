//! Simulated inverter.
//!
//! An in-memory register bank behind the [`RegisterTransport`] boundary. It
//! does not talk to any device; tests script faults into it and inspect the
//! request log afterwards. Clones share the same bank, so a test can keep a
//! handle while the session owns another.
//!
//! # Example
//!
//! ```rust
//! use sunsynk_gw::transport::{SimulatedFault, SimulatedTransport};
//!
//! let sim = SimulatedTransport::new();
//! sim.set_registers([(184, 87)]);
//! sim.push_fault(SimulatedFault::Timeout);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::error::{InverterError, Result};
use crate::core::traits::RegisterTransport;

/// Fault injected into the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFault {
    /// Answer normally.
    None,
    /// Fail with [`InverterError::Timeout`] right away.
    Timeout,
    /// Never answer; the session's I/O timeout has to fire.
    Hang,
    /// Return at most this many words (reads only).
    ShortRead(u16),
    /// Refuse the write (writes only).
    RejectWrite,
}

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<SimulatedFault>,
    persistent: Option<SimulatedFault>,
    reads: Vec<(u16, u16)>,
    writes: Vec<(u16, u16)>,
    offline: bool,
}

#[derive(Debug, Default)]
struct Shared {
    registers: DashMap<u16, u16>,
    script: Mutex<Script>,
}

/// In-memory register bank with scriptable faults.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    shared: Arc<Shared>,
    connected: bool,
}

impl SimulatedTransport {
    /// Create an empty bank. Unset registers read as zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bank with initial register contents.
    pub fn with_registers<I>(registers: I) -> Self
    where
        I: IntoIterator<Item = (u16, u16)>,
    {
        let sim = Self::new();
        sim.set_registers(registers);
        sim
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.shared
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set register contents.
    pub fn set_registers<I>(&self, registers: I)
    where
        I: IntoIterator<Item = (u16, u16)>,
    {
        for (address, value) in registers {
            self.shared.registers.insert(address, value);
        }
    }

    /// Current content of a register, `None` if never set.
    pub fn register(&self, address: u16) -> Option<u16> {
        self.shared.registers.get(&address).map(|v| *v)
    }

    /// Queue a fault for the next request.
    pub fn push_fault(&self, fault: SimulatedFault) {
        self.script().queued.push_back(fault);
    }

    /// Fault applied to every request once the queue is empty.
    pub fn set_persistent_fault(&self, fault: Option<SimulatedFault>) {
        self.script().persistent = fault;
    }

    /// Make `connect` fail.
    pub fn set_offline(&self, offline: bool) {
        self.script().offline = offline;
    }

    /// `(start, count)` of every read request, in order.
    pub fn reads(&self) -> Vec<(u16, u16)> {
        self.script().reads.clone()
    }

    /// `(address, value)` of every accepted write, in order.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.script().writes.clone()
    }

    /// Forget logged requests.
    pub fn clear_log(&self) {
        let mut script = self.script();
        script.reads.clear();
        script.writes.clear();
    }

    fn next_fault(&self) -> SimulatedFault {
        let mut script = self.script();
        script
            .queued
            .pop_front()
            .or(script.persistent)
            .unwrap_or(SimulatedFault::None)
    }
}

#[async_trait]
impl RegisterTransport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.script().offline {
            return Err(InverterError::Transport("simulated inverter offline".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        if !self.connected {
            return Err(InverterError::NotConnected);
        }
        self.script().reads.push((start, count));

        let available = match self.next_fault() {
            SimulatedFault::Timeout => return Err(InverterError::Timeout { start, count }),
            SimulatedFault::Hang => {
                std::future::pending::<()>().await;
                count
            }
            SimulatedFault::ShortRead(n) => n.min(count),
            _ => count,
        };

        Ok((0..available)
            .map_while(|i| start.checked_add(i))
            .map(|address| self.register(address).unwrap_or(0))
            .collect())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<bool> {
        if !self.connected {
            return Err(InverterError::NotConnected);
        }

        match self.next_fault() {
            SimulatedFault::Timeout => Err(InverterError::Timeout { start: address, count: 1 }),
            SimulatedFault::Hang => {
                std::future::pending::<()>().await;
                Ok(false)
            }
            SimulatedFault::RejectWrite => Ok(false),
            _ => {
                self.shared.registers.insert(address, value);
                self.script().writes.push((address, value));
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_connect() {
        let mut sim = SimulatedTransport::new();
        assert!(matches!(
            sim.read_holding_registers(0, 1).await,
            Err(InverterError::NotConnected)
        ));
        sim.connect().await.unwrap();
        assert_eq!(sim.read_holding_registers(0, 2).await.unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_clones_share_bank() {
        let handle = SimulatedTransport::with_registers([(10, 7)]);
        let mut sim = handle.clone();
        sim.connect().await.unwrap();

        assert_eq!(sim.read_holding_registers(10, 1).await.unwrap(), vec![7]);
        assert!(sim.write_register(11, 9).await.unwrap());
        assert_eq!(handle.register(11), Some(9));
        assert_eq!(handle.reads(), vec![(10, 1)]);
        assert_eq!(handle.writes(), vec![(11, 9)]);

        handle.clear_log();
        assert!(handle.reads().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_faults() {
        let mut sim = SimulatedTransport::with_registers([(1, 1), (2, 2), (3, 3)]);
        sim.connect().await.unwrap();

        sim.push_fault(SimulatedFault::ShortRead(2));
        sim.push_fault(SimulatedFault::RejectWrite);
        assert_eq!(sim.read_holding_registers(1, 3).await.unwrap(), vec![1, 2]);
        assert!(!sim.write_register(1, 5).await.unwrap());
        assert_eq!(sim.register(1), Some(1));

        sim.set_persistent_fault(Some(SimulatedFault::Timeout));
        for _ in 0..3 {
            assert!(matches!(
                sim.read_holding_registers(1, 1).await,
                Err(InverterError::Timeout { start: 1, count: 1 })
            ));
        }
        sim.set_persistent_fault(None);
        assert!(sim.read_holding_registers(1, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_connect_fails() {
        let mut sim = SimulatedTransport::new();
        sim.set_offline(true);
        assert!(matches!(sim.connect().await, Err(InverterError::Transport(_))));
    }

    #[tokio::test]
    async fn test_read_stops_at_address_space_end() {
        let mut sim = SimulatedTransport::new();
        sim.connect().await.unwrap();
        assert_eq!(sim.read_holding_registers(u16::MAX, 3).await.unwrap().len(), 1);
    }
}
