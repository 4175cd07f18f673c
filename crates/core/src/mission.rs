//! Mission data (component H): cumulative counters persisted across resets.

use crate::crc;
use crate::error::{CoreError, CoreResult};
use crate::time::Clock;

pub const FAULT_DESC_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MissionPhase {
    Commissioning = 0,
    Idle = 1,
    Active = 2,
    Eol = 3,
}

impl TryFrom<u8> for MissionPhase {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MissionPhase::Commissioning),
            1 => Ok(MissionPhase::Idle),
            2 => Ok(MissionPhase::Active),
            3 => Ok(MissionPhase::Eol),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionData {
    pub mission_start_ms: u64,
    pub total_uptime_ms: u64,
    pub reset_count: u32,
    pub last_reset_ms: u64,
    pub total_energy_wh: f64,
    pub fault_count: u32,
    pub mission_phase: MissionPhase,
    pub last_fault: String,
}

impl MissionData {
    /// First-ever-boot defaults: `reset_count = 1`.
    pub fn first_boot(clock: &dyn Clock) -> Self {
        let now = clock.now_ms();
        Self {
            mission_start_ms: now,
            total_uptime_ms: 0,
            reset_count: 1,
            last_reset_ms: now,
            total_energy_wh: 0.0,
            fault_count: 0,
            mission_phase: MissionPhase::Commissioning,
            last_fault: String::new(),
        }
    }

    /// Subsequent boot from a CRC-valid persisted record: bumps
    /// `reset_count` and refreshes `last_reset_ms`.
    pub fn on_subsequent_boot(&mut self, clock: &dyn Clock) {
        self.reset_count += 1;
        self.last_reset_ms = clock.now_ms();
    }

    pub fn set_start(&mut self, start_ms: u64) {
        self.mission_start_ms = start_ms;
    }

    pub fn update_uptime(&mut self, uptime_ms: u64) {
        self.total_uptime_ms = uptime_ms;
    }

    pub fn add_energy(&mut self, energy_wh: f64) {
        self.total_energy_wh += energy_wh;
    }

    pub fn set_phase(&mut self, phase: MissionPhase) {
        self.mission_phase = phase;
    }

    pub fn record_fault(&mut self, description: impl Into<String>) {
        self.fault_count += 1;
        let desc: String = description.into();
        self.last_fault = desc.chars().take(FAULT_DESC_LEN - 1).collect();
    }

    fn body_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(&self.mission_start_ms.to_le_bytes());
        buf.extend_from_slice(&self.total_uptime_ms.to_le_bytes());
        buf.extend_from_slice(&self.reset_count.to_le_bytes());
        buf.extend_from_slice(&self.last_reset_ms.to_le_bytes());
        buf.extend_from_slice(&self.total_energy_wh.to_le_bytes());
        buf.extend_from_slice(&self.fault_count.to_le_bytes());
        buf.push(self.mission_phase as u8);
        let mut desc = [0u8; FAULT_DESC_LEN];
        let bytes = self.last_fault.as_bytes();
        let n = bytes.len().min(FAULT_DESC_LEN - 1);
        desc[..n].copy_from_slice(&bytes[..n]);
        buf.extend_from_slice(&desc);
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

    /// Reverses [`Self::body_bytes`]. `image` must already have a valid
    /// trailing CRC.
    pub fn from_persisted_image(image: &[u8]) -> CoreResult<Self> {
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

        let mission_start_ms = u64::from_le_bytes(take!(8).try_into().unwrap());
        let total_uptime_ms = u64::from_le_bytes(take!(8).try_into().unwrap());
        let reset_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        let last_reset_ms = u64::from_le_bytes(take!(8).try_into().unwrap());
        let total_energy_wh = f64::from_le_bytes(take!(8).try_into().unwrap());
        let fault_count = u32::from_le_bytes(take!(4).try_into().unwrap());
        let mission_phase = MissionPhase::try_from(take!(1)[0]).map_err(|_| CoreError::ParamInvalid)?;
        let desc_bytes = take!(FAULT_DESC_LEN);
        let nul = desc_bytes.iter().position(|&b| b == 0).unwrap_or(desc_bytes.len());
        let last_fault = String::from_utf8_lossy(&desc_bytes[..nul]).into_owned();

        Ok(Self {
            mission_start_ms,
            total_uptime_ms,
            reset_count,
            last_reset_ms,
            total_energy_wh,
            fault_count,
            mission_phase,
            last_fault,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;

    #[test]
    fn first_boot_sets_reset_count_one() {
        let clock = FakeClock::new(1000);
        let data = MissionData::first_boot(&clock);
        assert_eq!(data.reset_count, 1);
        assert_eq!(data.mission_phase, MissionPhase::Commissioning);
    }

    #[test]
    fn subsequent_boot_increments_reset_count() {
        let clock = FakeClock::new(0);
        let mut data = MissionData::first_boot(&clock);
        clock.advance(5000);
        data.on_subsequent_boot(&clock);
        assert_eq!(data.reset_count, 2);
        assert_eq!(data.last_reset_ms, 5000);
    }

    #[test]
    fn record_fault_truncates_and_counts() {
        let clock = FakeClock::new(0);
        let mut data = MissionData::first_boot(&clock);
        data.record_fault("a".repeat(100));
        assert_eq!(data.fault_count, 1);
        assert_eq!(data.last_fault.len(), FAULT_DESC_LEN - 1);
    }

    #[test]
    fn persisted_image_detects_single_byte_corruption() {
        let clock = FakeClock::new(0);
        let data = MissionData::first_boot(&clock);
        let mut image = data.to_persisted_image();
        assert!(MissionData::verify_image_crc(&image));
        image[0] ^= 1;
        assert!(!MissionData::verify_image_crc(&image));
    }

    #[test]
    fn from_persisted_image_restores_every_field() {
        let clock = FakeClock::new(1000);
        let mut data = MissionData::first_boot(&clock);
        data.add_energy(12.5);
        data.set_phase(MissionPhase::Active);
        data.record_fault("battery undervoltage");
        let image = data.to_persisted_image();

        let restored = MissionData::from_persisted_image(&image).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn from_persisted_image_rejects_corrupted_crc() {
        let clock = FakeClock::new(0);
        let data = MissionData::first_boot(&clock);
        let mut image = data.to_persisted_image();
        image[0] ^= 0xFF;
        assert!(MissionData::from_persisted_image(&image).is_err());
    }
}
