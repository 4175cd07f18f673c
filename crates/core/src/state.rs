//! System-state container (component E).
//!
//! Single owner of all runtime subsystem state. External access is through
//! typed accessors that return copies for reads and set the dirty flag on
//! writes, per the re-architecture notes on file-scope static state: one
//! owned aggregate, no internal pointers into another owner's storage.

use crate::crc;
use crate::error::{CoreError, CoreResult};
use crate::fsm::FsmContext;
use crate::time::Clock;

pub const HOT_LIMIT_C: f32 = 60.0;
pub const COLD_LIMIT_C: f32 = -20.0;

/// Power mode, totally ordered SAFE < IDLE < ACTIVE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Mode {
    Safe = 0,
    Idle = 1,
    Active = 2,
}

impl TryFrom<u8> for Mode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Safe),
            1 => Ok(Mode::Idle),
            2 => Ok(Mode::Active),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerState {
    pub battery_voltage_v: f64,
    pub battery_current_a: f64,
    pub state_of_charge: f64,
    pub solar_power_w: f64,
    pub total_energy_wh: f64,
    pub mode: Mode,
    pub payload_enabled: bool,
    pub mode_entry_time_ms: u64,
}

impl Default for PowerState {
    fn default() -> Self {
        Self {
            battery_voltage_v: 0.0,
            battery_current_a: 0.0,
            state_of_charge: 0.0,
            solar_power_w: 0.0,
            total_energy_wh: 0.0,
            mode: Mode::Safe,
            payload_enabled: false,
            mode_entry_time_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThermalState {
    pub obc_temp_c: f32,
    pub eps_temp_c: f32,
    pub battery_temp_c: f32,
    pub payload_temp_c: f32,
    pub external_temp_c: f32,
    pub heater_enabled: bool,
    pub over_temp_flag: bool,
    pub under_temp_flag: bool,
}

impl ThermalState {
    fn temps(&self) -> [f32; 5] {
        [
            self.obc_temp_c,
            self.eps_temp_c,
            self.battery_temp_c,
            self.payload_temp_c,
            self.external_temp_c,
        ]
    }

    pub fn has_thermal_fault(&self) -> bool {
        self.over_temp_flag || self.under_temp_flag
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdcsState {
    pub mag_ut: [f32; 3],
    pub gyro_dps: [f32; 3],
    pub sun_vector: [f32; 3],
    pub detumbled: bool,
    pub sun_acquired: bool,
    pub last_update_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommState {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packets_failed: u32,
    pub last_ground_contact_ms: u64,
    pub beacon_count: u32,
    pub beacon_interval_s: u16,
    pub comm_active: bool,
    pub rssi_dbm: i8,
}

impl Default for CommState {
    fn default() -> Self {
        Self {
            packets_sent: 0,
            packets_received: 0,
            packets_failed: 0,
            last_ground_contact_ms: 0,
            beacon_count: 0,
            beacon_interval_s: 60,
            comm_active: false,
            rssi_dbm: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MissionState {
    pub boot_count: u32,
    pub uptime_s: u32,
    pub total_uptime_s: u32,
    pub mission_time_ms: u64,
    pub qso_count: u32,
    pub command_count: u32,
    pub anomaly_count: u32,
    pub safe_mode_entry: bool,
}

/// The single owned aggregate. Holds all five subsystem sub-states, the
/// operational state machine's context, and the bookkeeping flags the
/// persistence facade and scheduler read.
pub struct SystemState {
    pub power: PowerState,
    pub thermal: ThermalState,
    pub adcs: AdcsState,
    pub comm: CommState,
    pub mission: MissionState,
    pub sm_context: FsmContext,
    pub initialized: bool,
    pub watchdog_ok: bool,
    persistence_dirty: bool,
    pub last_update_ms: u64,
    pub last_persist_ms: u64,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            power: PowerState::default(),
            thermal: ThermalState::default(),
            adcs: AdcsState::default(),
            comm: CommState::default(),
            mission: MissionState::default(),
            sm_context: FsmContext::new(crate::fsm::OpState::Boot, 0),
            initialized: false,
            watchdog_ok: true,
            persistence_dirty: false,
            last_update_ms: 0,
            last_persist_ms: 0,
        }
    }
}

impl SystemState {
    pub fn init(clock: &dyn Clock) -> Self {
        let mut state = Self::default();
        state.initialized = true;
        state.last_update_ms = clock.now_ms();
        state
    }

    fn touch(&mut self, clock: &dyn Clock) {
        self.persistence_dirty = true;
        self.last_update_ms = clock.now_ms();
    }

    pub fn is_dirty(&self) -> bool {
        self.persistence_dirty
    }

    pub fn clear_dirty(&mut self) {
        self.persistence_dirty = false;
    }

    pub fn set_state_of_charge(&mut self, clock: &dyn Clock, soc: f64) {
        self.power.state_of_charge = soc.clamp(0.0, 1.0);
        self.touch(clock);
    }

    pub fn set_power_mode(&mut self, clock: &dyn Clock, mode: Mode) {
        if self.power.mode != mode {
            self.power.mode = mode;
            self.power.mode_entry_time_ms = clock.now_ms();
        }
        self.touch(clock);
    }

    pub fn set_payload_enabled(&mut self, clock: &dyn Clock, enabled: bool) {
        self.power.payload_enabled = enabled;
        self.touch(clock);
    }

    pub fn set_battery_voltage(&mut self, clock: &dyn Clock, volts: f64) {
        self.power.battery_voltage_v = volts;
        self.touch(clock);
    }

    pub fn set_battery_current(&mut self, clock: &dyn Clock, amps: f64) {
        self.power.battery_current_a = amps;
        self.touch(clock);
    }

    pub fn set_beacon_interval_s(&mut self, clock: &dyn Clock, seconds: u16) -> CoreResult<()> {
        if !(10..=120).contains(&seconds) {
            return Err(CoreError::InvalidArg("beacon_interval_s must be in [10, 120]"));
        }
        self.comm.beacon_interval_s = seconds;
        self.touch(clock);
        Ok(())
    }

    pub fn set_temperature(&mut self, clock: &dyn Clock, sensor: u8, temp_c: f32) -> CoreResult<()> {
        match sensor {
            0 => self.thermal.obc_temp_c = temp_c,
            1 => self.thermal.eps_temp_c = temp_c,
            2 => self.thermal.battery_temp_c = temp_c,
            3 => self.thermal.payload_temp_c = temp_c,
            4 => self.thermal.external_temp_c = temp_c,
            _ => return Err(CoreError::InvalidArg("sensor index must be < 5")),
        }
        let temps = self.thermal.temps();
        self.thermal.over_temp_flag = temps.iter().any(|&t| t > HOT_LIMIT_C);
        self.thermal.under_temp_flag = temps.iter().any(|&t| t < COLD_LIMIT_C);
        self.touch(clock);
        Ok(())
    }

    pub fn set_magnetometer(&mut self, clock: &dyn Clock, x: f32, y: f32, z: f32) {
        self.adcs.mag_ut = [x, y, z];
        self.adcs.last_update_ms = clock.now_ms();
        self.touch(clock);
    }

    pub fn set_gyroscope(&mut self, clock: &dyn Clock, x: f32, y: f32, z: f32) {
        self.adcs.gyro_dps = [x, y, z];
        self.adcs.last_update_ms = clock.now_ms();
        self.touch(clock);
    }

    pub fn set_detumbled(&mut self, clock: &dyn Clock, achieved: bool) {
        self.adcs.detumbled = achieved;
        self.touch(clock);
    }

    pub fn increment_packets_sent(&mut self, clock: &dyn Clock) {
        self.comm.packets_sent += 1;
        self.touch(clock);
    }

    pub fn increment_packets_received(&mut self, clock: &dyn Clock) {
        self.comm.packets_received += 1;
        self.touch(clock);
    }

    pub fn increment_beacon_count(&mut self, clock: &dyn Clock) {
        self.comm.beacon_count += 1;
        self.touch(clock);
    }

    pub fn update_ground_contact(&mut self, clock: &dyn Clock) {
        self.comm.last_ground_contact_ms = clock.now_ms();
        self.touch(clock);
    }

    pub fn increment_boot_count(&mut self, clock: &dyn Clock) {
        self.mission.boot_count += 1;
        self.touch(clock);
    }

    pub fn increment_qso_count(&mut self, clock: &dyn Clock) {
        self.mission.qso_count += 1;
        self.touch(clock);
    }

    pub fn increment_command_count(&mut self, clock: &dyn Clock) {
        self.mission.command_count += 1;
        self.touch(clock);
    }

    pub fn increment_anomaly_count(&mut self, clock: &dyn Clock) {
        self.mission.anomaly_count += 1;
        self.touch(clock);
    }

    pub fn update_uptime(&mut self, clock: &dyn Clock, uptime_s: u32) {
        self.mission.uptime_s = uptime_s;
        self.mission.total_uptime_s = self.mission.total_uptime_s.saturating_add(1);
        self.touch(clock);
    }

    /// Serializes every field but the trailing CRC, in a fixed layout.
    fn body_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(160);
        let p = &self.power;
        buf.extend_from_slice(&p.battery_voltage_v.to_le_bytes());
        buf.extend_from_slice(&p.battery_current_a.to_le_bytes());
        buf.extend_from_slice(&p.state_of_charge.to_le_bytes());
        buf.extend_from_slice(&p.solar_power_w.to_le_bytes());
        buf.extend_from_slice(&p.total_energy_wh.to_le_bytes());
        buf.push(p.mode as u8);
        buf.push(p.payload_enabled as u8);
        buf.extend_from_slice(&p.mode_entry_time_ms.to_le_bytes());

        let t = &self.thermal;
        for v in t.temps() {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(t.heater_enabled as u8);
        buf.push(t.over_temp_flag as u8);
        buf.push(t.under_temp_flag as u8);

        let a = &self.adcs;
        for v in a.mag_ut.iter().chain(a.gyro_dps.iter()).chain(a.sun_vector.iter()) {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(a.detumbled as u8);
        buf.push(a.sun_acquired as u8);
        buf.extend_from_slice(&a.last_update_ms.to_le_bytes());

        let c = &self.comm;
        buf.extend_from_slice(&c.packets_sent.to_le_bytes());
        buf.extend_from_slice(&c.packets_received.to_le_bytes());
        buf.extend_from_slice(&c.packets_failed.to_le_bytes());
        buf.extend_from_slice(&c.last_ground_contact_ms.to_le_bytes());
        buf.extend_from_slice(&c.beacon_count.to_le_bytes());
        buf.extend_from_slice(&c.beacon_interval_s.to_le_bytes());
        buf.push(c.comm_active as u8);
        buf.push(c.rssi_dbm as u8);

        let m = &self.mission;
        buf.extend_from_slice(&m.boot_count.to_le_bytes());
        buf.extend_from_slice(&m.uptime_s.to_le_bytes());
        buf.extend_from_slice(&m.total_uptime_s.to_le_bytes());
        buf.extend_from_slice(&m.mission_time_ms.to_le_bytes());
        buf.extend_from_slice(&m.qso_count.to_le_bytes());
        buf.extend_from_slice(&m.command_count.to_le_bytes());
        buf.extend_from_slice(&m.anomaly_count.to_le_bytes());
        buf.push(m.safe_mode_entry as u8);

        buf.push(self.initialized as u8);
        buf.push(self.watchdog_ok as u8);
        buf.extend_from_slice(&self.last_update_ms.to_le_bytes());
        buf.extend_from_slice(&self.last_persist_ms.to_le_bytes());
        buf
    }

    /// Zeroes the CRC field, recomputes it over the remainder, and stores
    /// it in the returned image.
    pub fn to_persisted_image(&self) -> Vec<u8> {
        let mut image = self.body_bytes();
        let crc = crc::crc32(&image);
        image.extend_from_slice(&crc.to_le_bytes());
        image
    }

    /// Verifies the trailing CRC against the leading bytes; does not
    /// mutate `self`.
    pub fn verify_image_crc(image: &[u8]) -> bool {
        if image.len() < 4 {
            return false;
        }
        let split = image.len() - 4;
        let stored = u32::from_le_bytes(image[split..].try_into().unwrap());
        crc::crc32(&image[..split]) == stored
    }

    /// Reverses [`Self::body_bytes`] field-for-field. `image` must already
    /// have a valid trailing CRC; the transition-machine context is not
    /// part of the image and always restarts at `OpState::Boot`.
    pub fn from_persisted_image(image: &[u8], clock: &dyn Clock) -> CoreResult<Self> {
        if !Self::verify_image_crc(image) {
            return Err(CoreError::CrcMismatch);
        }
        let body = &image[..image.len() - 4];
        let mut o = 0usize;
        macro_rules! take {
            ($n:expr) => {{
                let slice = body.get(o..o + $n).ok_or(CoreError::Truncated)?;
                o += $n;
                slice
            }};
        }

        let mut state = Self::default();
        state.power.battery_voltage_v = f64::from_le_bytes(take!(8).try_into().unwrap());
        state.power.battery_current_a = f64::from_le_bytes(take!(8).try_into().unwrap());
        state.power.state_of_charge = f64::from_le_bytes(take!(8).try_into().unwrap());
        state.power.solar_power_w = f64::from_le_bytes(take!(8).try_into().unwrap());
        state.power.total_energy_wh = f64::from_le_bytes(take!(8).try_into().unwrap());
        state.power.mode = Mode::try_from(take!(1)[0]).map_err(|_| CoreError::ParamInvalid)?;
        state.power.payload_enabled = take!(1)[0] != 0;
        state.power.mode_entry_time_ms = u64::from_le_bytes(take!(8).try_into().unwrap());

        state.thermal.obc_temp_c = f32::from_le_bytes(take!(4).try_into().unwrap());
        state.thermal.eps_temp_c = f32::from_le_bytes(take!(4).try_into().unwrap());
        state.thermal.battery_temp_c = f32::from_le_bytes(take!(4).try_into().unwrap());
        state.thermal.payload_temp_c = f32::from_le_bytes(take!(4).try_into().unwrap());
        state.thermal.external_temp_c = f32::from_le_bytes(take!(4).try_into().unwrap());
        state.thermal.heater_enabled = take!(1)[0] != 0;
        state.thermal.over_temp_flag = take!(1)[0] != 0;
        state.thermal.under_temp_flag = take!(1)[0] != 0;

        for v in state
            .adcs
            .mag_ut
            .iter_mut()
            .chain(state.adcs.gyro_dps.iter_mut())
            .chain(state.adcs.sun_vector.iter_mut())
        {
            *v = f32::from_le_bytes(take!(4).try_into().unwrap());
        }
        state.adcs.detumbled = take!(1)[0] != 0;
        state.adcs.sun_acquired = take!(1)[0] != 0;
        state.adcs.last_update_ms = u64::from_le_bytes(take!(8).try_into().unwrap());

        state.comm.packets_sent = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.comm.packets_received = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.comm.packets_failed = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.comm.last_ground_contact_ms = u64::from_le_bytes(take!(8).try_into().unwrap());
        state.comm.beacon_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.comm.beacon_interval_s = u16::from_le_bytes(take!(2).try_into().unwrap());
        state.comm.comm_active = take!(1)[0] != 0;
        state.comm.rssi_dbm = take!(1)[0] as i8;

        state.mission.boot_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.mission.uptime_s = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.mission.total_uptime_s = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.mission.mission_time_ms = u64::from_le_bytes(take!(8).try_into().unwrap());
        state.mission.qso_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.mission.command_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.mission.anomaly_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        state.mission.safe_mode_entry = take!(1)[0] != 0;

        state.initialized = take!(1)[0] != 0;
        state.watchdog_ok = take!(1)[0] != 0;
        state.last_update_ms = u64::from_le_bytes(take!(8).try_into().unwrap());
        state.last_persist_ms = u64::from_le_bytes(take!(8).try_into().unwrap());

        state.sm_context = FsmContext::new(crate::fsm::OpState::Boot, clock.now_ms());
        state.persistence_dirty = false;
        Ok(state)
    }
}
