//! In-memory RS-485 bus with simulated drives
//!
//! [`SimulatedBus`] answers real Modbus RTU frames the way a GALT G540 does,
//! so the whole stack above the transport runs unchanged in mock mode and in
//! tests. Clones share state, which lets a test keep a handle to inspect the
//! traffic and to take drives offline.

use async_trait::async_trait;
use cooltower_core::protocol::EXCEPTION_FLAG;
use cooltower_core::{encode_frequency, CoolTowerError, ExceptionCode, FunctionCode, Result};
use cooltower_core::{RegisterMap, GALT_G540_V1};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::frame::{append_crc, decode_register, encode_register, verify_crc, REQUEST_LEN};
use crate::serial_driver::RtuTransport;

const STATE_FORWARD: u16 = 0x0001;
const STATE_STOPPED: u16 = 0x0003;

/// A register write observed on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimWrite {
    pub device_id: u8,
    pub register: u16,
    pub value: u16,
}

#[derive(Debug)]
struct SimDevice {
    registers: HashMap<u16, u16>,
    online: bool,
    corrupt_responses: u32,
}

impl SimDevice {
    fn new(map: &RegisterMap) -> Self {
        let registers = [
            (map.control, 0),
            (map.frequency_setpoint, 0),
            (map.state_word1, STATE_STOPPED),
            (map.state_word2, 0),
            (map.fault_code, 0),
            (map.running_frequency, 0),
            (map.output_current, 0),
        ]
        .into_iter()
        .collect();
        Self {
            registers,
            online: true,
            corrupt_responses: 0,
        }
    }

    fn running(&self, map: &RegisterMap) -> bool {
        self.registers.get(&map.state_word1) == Some(&STATE_FORWARD)
    }

    /// Track the setpoint while running; current follows frequency.
    fn settle_outputs(&mut self, map: &RegisterMap) {
        let hz = if self.running(map) {
            self.registers
                .get(&map.frequency_setpoint)
                .copied()
                .unwrap_or(0)
        } else {
            0
        };
        self.registers.insert(map.running_frequency, hz);
        // 0.2 A per Hz, in 0.1 A units
        self.registers.insert(map.output_current, hz / 50);
    }

    fn write(&mut self, map: &RegisterMap, register: u16, value: u16) -> Option<ExceptionCode> {
        if register == map.control {
            match value {
                v if v == map.cmd_forward => {
                    if self.registers.get(&map.fault_code).copied().unwrap_or(0) != 0 {
                        return Some(ExceptionCode::DeviceFailure);
                    }
                    self.registers.insert(map.state_word1, STATE_FORWARD);
                }
                v if v == map.cmd_stop => {
                    self.registers.insert(map.state_word1, STATE_STOPPED);
                }
                v if v == map.cmd_fault_reset => {
                    self.registers.insert(map.fault_code, 0);
                    self.registers.insert(map.state_word1, STATE_STOPPED);
                }
                _ => return Some(ExceptionCode::IllegalDataValue),
            }
        } else if register == map.frequency_setpoint {
            // Above the drive's 400 Hz ceiling
            if value > 40000 {
                return Some(ExceptionCode::IllegalDataValue);
            }
        } else {
            return Some(ExceptionCode::IllegalDataAddress);
        }
        self.registers.insert(register, value);
        self.settle_outputs(map);
        None
    }

    fn read(&self, start: u16, count: u16) -> std::result::Result<Vec<u16>, ExceptionCode> {
        (0..count)
            .map(|offset| {
                start
                    .checked_add(offset)
                    .and_then(|r| self.registers.get(&r).copied())
                    .ok_or(ExceptionCode::IllegalDataAddress)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct SimState {
    devices: HashMap<u8, SimDevice>,
    pending: Option<Vec<u8>>,
    requests: HashMap<u8, u32>,
    writes: Vec<SimWrite>,
    in_flight: u32,
    max_in_flight: u32,
    fail_sends: HashSet<u8>,
}

/// Simulated multi-drop bus
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
    map: RegisterMap,
    latency: Duration,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// An empty bus using the G540 register map.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            map: GALT_G540_V1,
            latency: Duration::ZERO,
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not wedge the other clones
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a stopped drive at `device_id`.
    pub fn add_device(&self, device_id: u8) {
        self.lock()
            .devices
            .insert(device_id, SimDevice::new(&self.map));
    }

    /// Take a drive off the bus, or bring it back.
    pub fn set_online(&self, device_id: u8, online: bool) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.online = online;
        }
    }

    /// Corrupt the CRC of the next `count` responses from `device_id`.
    pub fn corrupt_next_responses(&self, device_id: u8, count: u32) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.corrupt_responses = count;
        }
    }

    /// Make writes of requests to `device_id` fail at the transport level.
    pub fn fail_sends_to(&self, device_id: u8, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.fail_sends.insert(device_id);
        } else {
            state.fail_sends.remove(&device_id);
        }
    }

    /// Set a register directly, bypassing the protocol.
    pub fn set_register(&self, device_id: u8, register: u16, value: u16) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.registers.insert(register, value);
        }
    }

    /// Read a register directly, bypassing the protocol.
    pub fn register(&self, device_id: u8, register: u16) -> Option<u16> {
        self.lock()
            .devices
            .get(&device_id)
            .and_then(|d| d.registers.get(&register).copied())
    }

    /// Whether the simulated drive is running forward.
    pub fn is_running(&self, device_id: u8) -> bool {
        self.lock()
            .devices
            .get(&device_id)
            .map(|d| d.running(&self.map))
            .unwrap_or(false)
    }

    /// Commanded setpoint of a drive, in Hz.
    pub fn setpoint_hz(&self, device_id: u8) -> Option<f64> {
        self.register(device_id, self.map.frequency_setpoint)
            .map(cooltower_core::decode_frequency)
    }

    /// Put a drive into a fault state with the given code.
    pub fn inject_fault(&self, device_id: u8, code: u16) {
        let map = self.map;
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.registers.insert(map.fault_code, code);
            device.registers.insert(map.state_word1, 0x0004);
            device.settle_outputs(&map);
        }
    }

    /// Preset a running frequency, as if the drive were already turning.
    pub fn force_running(&self, device_id: u8, hz: f64) -> Result<()> {
        let raw = encode_frequency(hz)?;
        let map = self.map;
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.registers.insert(map.frequency_setpoint, raw);
            device.registers.insert(map.state_word1, STATE_FORWARD);
            device.settle_outputs(&map);
        }
        Ok(())
    }

    /// Requests addressed to `device_id` so far, answered or not.
    pub fn requests_to(&self, device_id: u8) -> u32 {
        self.lock().requests.get(&device_id).copied().unwrap_or(0)
    }

    /// Every successful register write, in bus order.
    pub fn write_log(&self) -> Vec<SimWrite> {
        self.lock().writes.clone()
    }

    /// Control-word writes only, as `(device_id, command)`.
    pub fn control_log(&self) -> Vec<(u8, u16)> {
        let control = self.map.control;
        self.lock()
            .writes
            .iter()
            .filter(|w| w.register == control)
            .map(|w| (w.device_id, w.value))
            .collect()
    }

    pub fn clear_log(&self) {
        self.lock().writes.clear();
    }

    /// Highest number of exchanges ever in progress at once.
    pub fn max_concurrent_exchanges(&self) -> u32 {
        self.lock().max_in_flight
    }

    fn respond(&self, state: &mut SimState, request: &[u8]) -> Option<Vec<u8>> {
        if request.len() != REQUEST_LEN || !verify_crc(request) {
            return None;
        }
        let device_id = request[0];
        let function = request[1];
        let register = decode_register([request[2], request[3]]);
        let value = decode_register([request[4], request[5]]);

        let device = state.devices.get_mut(&device_id)?;
        if !device.online {
            return None;
        }

        let mut response = vec![device_id];
        let outcome = match FunctionCode::from_code(function) {
            Some(FunctionCode::ReadHoldingRegisters) => match device.read(register, value) {
                Ok(values) => {
                    response.push(function);
                    response.push((values.len() * 2) as u8);
                    for v in values {
                        response.extend_from_slice(&encode_register(v));
                    }
                    None
                }
                Err(code) => Some(code),
            },
            Some(FunctionCode::WriteSingleRegister) => {
                match device.write(&self.map, register, value) {
                    None => {
                        response.extend_from_slice(&request[1..6]);
                        state.writes.push(SimWrite {
                            device_id,
                            register,
                            value,
                        });
                        None
                    }
                    Some(code) => Some(code),
                }
            }
            None => Some(ExceptionCode::IllegalFunction),
        };

        if let Some(code) = outcome {
            response.truncate(1);
            response.push(function | EXCEPTION_FLAG);
            response.push(code.code());
        }
        append_crc(&mut response);

        let device = state.devices.get_mut(&device_id)?;
        if device.corrupt_responses > 0 {
            device.corrupt_responses -= 1;
            let last = response.len() - 1;
            response[last] ^= 0xFF;
        }
        Some(response)
    }
}

#[async_trait]
impl RtuTransport for SimulatedBus {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if let Some(&device_id) = frame.first() {
            *state.requests.entry(device_id).or_insert(0) += 1;
            if state.fail_sends.contains(&device_id) {
                return Err(CoolTowerError::Transport(
                    "simulated write failure".to_string(),
                ));
            }
        }
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        let response = self.respond(&mut state, frame);
        state.pending = response;
        Ok(())
    }

    async fn receive(&mut self, expected: usize, window: Duration) -> Result<Vec<u8>> {
        let pending = self.lock().pending.take();
        match pending {
            Some(response) => {
                tokio::time::sleep(self.latency.min(window)).await;
                let mut state = self.lock();
                state.in_flight = state.in_flight.saturating_sub(1);
                let mut response = response;
                response.truncate(expected.max(crate::frame::EXCEPTION_RESPONSE_LEN));
                Ok(response)
            }
            None => {
                // Silent device: the whole window elapses
                tokio::time::sleep(window).await;
                let mut state = self.lock();
                state.in_flight = state.in_flight.saturating_sub(1);
                Ok(Vec::new())
            }
        }
    }

    fn clear_input_buffer(&mut self) -> Result<()> {
        self.lock().pending = None;
        Ok(())
    }

    fn port_path(&self) -> Option<&str> {
        Some("simulated")
    }
}
