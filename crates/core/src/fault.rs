//! Fault log & recovery — FDIR (component C).
//!
//! A bounded circular log of [`FaultRecord`] with capacity 100, plus the
//! three severity-driven recovery procedures that couple this module to
//! the EPS controller.

use crate::crc;
use crate::error::{CoreError, CoreResult};
use crate::time::Clock;

pub const MAX_FAULT_ENTRIES: usize = 100;
pub const FAULT_DESC_LEN: usize = 64;
pub const SOC_SAFE_THRESHOLD: f64 = 0.25;
pub const SOC_IDLE_THRESHOLD: f64 = 0.40;
/// Body length of one [`FaultRecord`], before its own trailing CRC.
const RECORD_BODY_LEN: usize = 8 + 1 + 1 + FAULT_DESC_LEN + 8 + 1;
/// Length of the [`FaultLog`] header before any record bytes: entry count,
/// next-slot cursor, overflow counter, watchdog flag.
const LOG_HEADER_LEN: usize = 4 + 4 + 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultType {
    Power = 1,
    ModeChange = 2,
    Thermal = 3,
    PowerCritical = 4,
    Watchdog = 5,
    Uart = 6,
    VoltageLow = 7,
    VoltageRange = 8,
    CurrentHigh = 9,
    TempHigh = 10,
    TempLow = 11,
    Recovery = 12,
    HealthThermal = 13,
    HealthPower = 14,
    HealthComm = 15,
    Init = 16,
    Adcs = 17,
    Assertion = 18,
    Command = 19,
    Telemetry = 20,
    Deployment = 21,
    SwInternal = 22,
}

impl TryFrom<u8> for FaultType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FaultType::Power),
            2 => Ok(FaultType::ModeChange),
            3 => Ok(FaultType::Thermal),
            4 => Ok(FaultType::PowerCritical),
            5 => Ok(FaultType::Watchdog),
            6 => Ok(FaultType::Uart),
            7 => Ok(FaultType::VoltageLow),
            8 => Ok(FaultType::VoltageRange),
            9 => Ok(FaultType::CurrentHigh),
            10 => Ok(FaultType::TempHigh),
            11 => Ok(FaultType::TempLow),
            12 => Ok(FaultType::Recovery),
            13 => Ok(FaultType::HealthThermal),
            14 => Ok(FaultType::HealthPower),
            15 => Ok(FaultType::HealthComm),
            16 => Ok(FaultType::Init),
            17 => Ok(FaultType::Adcs),
            18 => Ok(FaultType::Assertion),
            19 => Ok(FaultType::Command),
            20 => Ok(FaultType::Telemetry),
            21 => Ok(FaultType::Deployment),
            22 => Ok(FaultType::SwInternal),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FaultSeverity {
    Info = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl TryFrom<u8> for FaultSeverity {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FaultSeverity::Info),
            2 => Ok(FaultSeverity::Warning),
            3 => Ok(FaultSeverity::Error),
            4 => Ok(FaultSeverity::Critical),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub timestamp_ms: u64,
    pub fault_type: FaultType,
    pub severity: FaultSeverity,
    pub description: String,
    pub soc_at_fault: f64,
    pub recovered: bool,
}

impl FaultRecord {
    /// Serializes the body used for the trailing CRC32 (everything but the
    /// CRC field itself).
    fn body_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FAULT_DESC_LEN + 32);
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.push(self.fault_type as u8);
        buf.push(self.severity as u8);
        let mut desc = [0u8; FAULT_DESC_LEN];
        let bytes = self.description.as_bytes();
        let n = bytes.len().min(FAULT_DESC_LEN - 1);
        desc[..n].copy_from_slice(&bytes[..n]);
        buf.extend_from_slice(&desc);
        buf.extend_from_slice(&self.soc_at_fault.to_le_bytes());
        buf.push(self.recovered as u8);
        buf
    }

    pub fn crc32(&self) -> u32 {
        crc::crc32(&self.body_bytes())
    }

    /// Reverses [`Self::body_bytes`] given exactly [`RECORD_BODY_LEN`] bytes.
    fn from_body_bytes(body: &[u8]) -> CoreResult<Self> {
        if body.len() != RECORD_BODY_LEN {
            return Err(CoreError::Truncated);
        }
        let mut o = 0usize;
        macro_rules! take {
            ($n:expr) => {{
                let slice = &body[o..o + $n];
                o += $n;
                slice
            }};
        }
        let timestamp_ms = u64::from_le_bytes(take!(8).try_into().unwrap());
        let fault_type = FaultType::try_from(take!(1)[0]).map_err(|_| CoreError::ParamInvalid)?;
        let severity = FaultSeverity::try_from(take!(1)[0]).map_err(|_| CoreError::ParamInvalid)?;
        let desc_bytes = take!(FAULT_DESC_LEN);
        let nul = desc_bytes.iter().position(|&b| b == 0).unwrap_or(desc_bytes.len());
        let description = String::from_utf8_lossy(&desc_bytes[..nul]).into_owned();
        let soc_at_fault = f64::from_le_bytes(take!(8).try_into().unwrap());
        let recovered = take!(1)[0] != 0;
        Ok(Self { timestamp_ms, fault_type, severity, description, soc_at_fault, recovered })
    }
}

/// Recovery outcome of a fault-driven EPS action, consumed by callers that
/// couple this module to [`crate::eps::EpsController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    DemotedToSafe,
    DemotedToIdle,
    NoActionNeeded,
    PayloadDisabled,
}

pub struct FaultLog {
    entries: Vec<FaultRecord>,
    next_slot: usize,
    dirty: bool,
    log_overflows: u32,
    watchdog_triggered: bool,
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_FAULT_ENTRIES),
            next_slot: 0,
            dirty: false,
            log_overflows: 0,
            watchdog_triggered: false,
        }
    }

    pub fn add(
        &mut self,
        clock: &dyn Clock,
        fault_type: FaultType,
        severity: FaultSeverity,
        description: impl Into<String>,
        soc: f64,
    ) {
        let record = FaultRecord {
            timestamp_ms: clock.now_ms(),
            fault_type,
            severity,
            description: description.into(),
            soc_at_fault: soc,
            recovered: false,
        };
        if self.entries.len() < MAX_FAULT_ENTRIES {
            self.entries.push(record);
        } else {
            self.entries[self.next_slot] = record;
            self.next_slot = (self.next_slot + 1) % MAX_FAULT_ENTRIES;
            self.log_overflows += 1;
        }
        self.dirty = true;
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&FaultRecord> {
        if self.entries.len() < MAX_FAULT_ENTRIES {
            self.entries.get(index)
        } else {
            // Logical order: oldest entry is at `next_slot`.
            let logical = (self.next_slot + index) % MAX_FAULT_ENTRIES;
            self.entries.get(logical)
        }
    }

    pub fn last(&self) -> Option<&FaultRecord> {
        if self.entries.is_empty() {
            return None;
        }
        self.get(self.entries.len() - 1)
    }

    pub fn mark_recovered(&mut self, index: usize) -> bool {
        let len = self.entries.len();
        let found = if len < MAX_FAULT_ENTRIES {
            self.entries.get_mut(index)
        } else {
            let logical = (self.next_slot + index) % MAX_FAULT_ENTRIES;
            self.entries.get_mut(logical)
        };
        if let Some(entry) = found {
            entry.recovered = true;
            self.dirty = true;
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_slot = 0;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn log_overflows(&self) -> u32 {
        self.log_overflows
    }

    /// Drops any entry whose stored CRC does not match its recomputed CRC,
    /// compacting the survivors. Used by the persistence load path.
    pub fn compact_corrupted(&mut self, stored_crcs: &[u32]) {
        let mut kept = Vec::with_capacity(self.entries.len());
        for (entry, &stored) in self.entries.iter().zip(stored_crcs.iter()) {
            if entry.crc32() == stored {
                kept.push(entry.clone());
            }
        }
        self.entries = kept;
        self.next_slot = 0;
    }

    pub fn was_watchdog_triggered(&self) -> bool {
        self.watchdog_triggered
    }

    pub fn clear_watchdog_flag(&mut self) {
        self.watchdog_triggered = false;
    }

    /// If payload is enabled, disables it and demotes to IDLE.
    pub fn recover_thermal(&mut self, clock: &dyn Clock, soc: f64, payload_enabled: bool) -> RecoveryOutcome {
        if payload_enabled {
            self.add(
                clock,
                FaultType::Thermal,
                FaultSeverity::Warning,
                "thermal fault recovery: disabling payload",
                soc,
            );
            RecoveryOutcome::PayloadDisabled
        } else {
            RecoveryOutcome::NoActionNeeded
        }
    }

    pub fn recover_power(&mut self, clock: &dyn Clock, soc: f64) -> RecoveryOutcome {
        if soc < SOC_SAFE_THRESHOLD {
            self.add(clock, FaultType::PowerCritical, FaultSeverity::Critical, "power recovery: SAFE", soc);
            RecoveryOutcome::DemotedToSafe
        } else if soc < SOC_IDLE_THRESHOLD {
            self.add(clock, FaultType::Power, FaultSeverity::Warning, "power recovery: IDLE", soc);
            RecoveryOutcome::DemotedToIdle
        } else {
            RecoveryOutcome::NoActionNeeded
        }
    }

    pub fn handle_watchdog(&mut self, clock: &dyn Clock, soc: f64) {
        self.add(clock, FaultType::Watchdog, FaultSeverity::Error, "watchdog timeout", soc);
        self.watchdog_triggered = true;
    }

    /// Serializes the header plus every entry, each framed with its own
    /// trailing CRC so a single damaged record doesn't cost the whole log.
    fn body_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LOG_HEADER_LEN + self.entries.len() * (RECORD_BODY_LEN + 4));
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.next_slot as u32).to_le_bytes());
        buf.extend_from_slice(&self.log_overflows.to_le_bytes());
        buf.push(self.watchdog_triggered as u8);
        for entry in &self.entries {
            let body = entry.body_bytes();
            buf.extend_from_slice(&body);
            buf.extend_from_slice(&crc::crc32(&body).to_le_bytes());
        }
        buf
    }

    pub fn to_persisted_image(&self) -> Vec<u8> {
        let mut image = self.body_bytes();
        let crc_value = crc::crc32(&image);
        image.extend_from_slice(&crc_value.to_le_bytes());
        image
    }

    pub fn verify_image_crc(image: &[u8]) -> bool {
        if image.len() < 4 {
            return false;
        }
        let split = image.len() - 4;
        let stored = u32::from_le_bytes(image[split..].try_into().unwrap());
        crc::crc32(&image[..split]) == stored
    }

    /// Reverses [`Self::to_persisted_image`], then runs
    /// [`Self::compact_corrupted`] against the per-entry CRCs stored
    /// alongside each record, dropping any entry that was individually
    /// damaged rather than failing the whole region.
    pub fn from_persisted_image(image: &[u8]) -> CoreResult<Self> {
        if !Self::verify_image_crc(image) {
            return Err(CoreError::CrcMismatch);
        }
        let body = &image[..image.len() - 4];
        if body.len() < LOG_HEADER_LEN {
            return Err(CoreError::Truncated);
        }
        let count = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let next_slot = u32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
        let log_overflows = u32::from_le_bytes(body[8..12].try_into().unwrap());
        let watchdog_triggered = body[12] != 0;

        let mut offset = LOG_HEADER_LEN;
        let mut entries = Vec::with_capacity(count);
        let mut stored_crcs = Vec::with_capacity(count);
        for _ in 0..count {
            let body_end = offset + RECORD_BODY_LEN;
            let crc_end = body_end + 4;
            let record_body = body.get(offset..body_end).ok_or(CoreError::Truncated)?;
            let stored_crc_bytes = body.get(body_end..crc_end).ok_or(CoreError::Truncated)?;
            entries.push(FaultRecord::from_body_bytes(record_body)?);
            stored_crcs.push(u32::from_le_bytes(stored_crc_bytes.try_into().unwrap()));
            offset = crc_end;
        }

        let mut log = Self { entries, next_slot, dirty: false, log_overflows, watchdog_triggered };
        log.compact_corrupted(&stored_crcs);
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;

    #[test]
    fn add_110_entries_evicts_oldest_10() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        for i in 0..110 {
            log.add(&clock, FaultType::SwInternal, FaultSeverity::Info, format!("Test fault {i}"), 0.5);
        }
        assert_eq!(log.count(), MAX_FAULT_ENTRIES);
        assert_eq!(log.get(0).unwrap().description, "Test fault 10");
        assert_eq!(log.log_overflows(), 10);
    }

    #[test]
    fn recover_power_thresholds() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        assert_eq!(log.recover_power(&clock, 0.10), RecoveryOutcome::DemotedToSafe);
        assert_eq!(log.recover_power(&clock, 0.30), RecoveryOutcome::DemotedToIdle);
        assert_eq!(log.recover_power(&clock, 0.90), RecoveryOutcome::NoActionNeeded);
    }

    #[test]
    fn recover_thermal_disables_payload_only_when_enabled() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        assert_eq!(log.recover_thermal(&clock, 0.5, true), RecoveryOutcome::PayloadDisabled);
        assert_eq!(log.recover_thermal(&clock, 0.5, false), RecoveryOutcome::NoActionNeeded);
    }

    #[test]
    fn watchdog_flag_sticky_until_cleared() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        log.handle_watchdog(&clock, 0.5);
        assert!(log.was_watchdog_triggered());
        log.clear_watchdog_flag();
        assert!(!log.was_watchdog_triggered());
    }

    #[test]
    fn entry_crc_changes_on_corruption() {
        let clock = FakeClock::new(0);
        let mut log = FaultLog::new();
        log.add(&clock, FaultType::Power, FaultSeverity::Info, "ok", 0.5);
        let entry = log.get(0).unwrap().clone();
        let good_crc = entry.crc32();
        let mut corrupted = entry.clone();
        corrupted.description.push('X');
        assert_ne!(corrupted.crc32(), good_crc);
    }

    #[test]
    fn clear_empties_log() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        log.add(&clock, FaultType::Init, FaultSeverity::Info, "boot", 1.0);
        log.clear();
        assert_eq!(log.count(), 0);
        assert!(log.is_dirty());
    }

    #[test]
    fn persisted_image_round_trips_every_entry() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        log.add(&clock, FaultType::Power, FaultSeverity::Warning, "low bus voltage", 0.3);
        log.add(&clock, FaultType::Watchdog, FaultSeverity::Error, "watchdog timeout", 0.6);
        log.handle_watchdog(&clock, 0.6);

        let image = log.to_persisted_image();
        let restored = FaultLog::from_persisted_image(&image).unwrap();
        assert_eq!(restored.count(), log.count());
        assert_eq!(restored.get(0).unwrap().description, "low bus voltage");
        assert_eq!(restored.log_overflows(), log.log_overflows());
        assert!(restored.was_watchdog_triggered());
    }

    #[test]
    fn from_persisted_image_drops_an_individually_corrupted_entry() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        log.add(&clock, FaultType::Power, FaultSeverity::Warning, "entry zero", 0.3);
        log.add(&clock, FaultType::Adcs, FaultSeverity::Info, "entry one", 0.5);

        let mut image = log.to_persisted_image();
        // Flip a byte inside the first record's own body, then repair the
        // outer region CRC so the whole-image check still passes and
        // per-entry compaction is what catches the damage.
        let header_len = 13;
        let record_body_len = 8 + 1 + 1 + FAULT_DESC_LEN + 8 + 1;
        let corrupt_at = header_len + record_body_len / 2;
        image[corrupt_at] ^= 0xFF;
        let split = image.len() - 4;
        let fixed_crc = crc::crc32(&image[..split]);
        image[split..].copy_from_slice(&fixed_crc.to_le_bytes());

        let restored = FaultLog::from_persisted_image(&image).unwrap();
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.get(0).unwrap().description, "entry one");
    }

    #[test]
    fn from_persisted_image_rejects_corrupted_outer_crc() {
        let mut log = FaultLog::new();
        let clock = FakeClock::new(0);
        log.add(&clock, FaultType::Init, FaultSeverity::Info, "boot", 1.0);
        let mut image = log.to_persisted_image();
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        assert!(FaultLog::from_persisted_image(&image).is_err());
    }
}
