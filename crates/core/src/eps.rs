//! EPS controller (component G).
//!
//! SOC-threshold-driven power mode selection coupled to the system-state
//! container's [`crate::state::Mode`]. Automatic demotion: requesting a
//! higher mode than the SOC supports lands at the highest mode the SOC
//! does support, not at the requested mode.

use crate::crc;
use crate::error::{CoreError, CoreResult};
use crate::state::Mode;
use crate::time::Clock;

pub const SOC_SAFE_THRESHOLD: f64 = 0.25;
pub const SOC_IDLE_THRESHOLD: f64 = 0.40;
pub const SOC_PAYLOAD_THRESHOLD: f64 = 0.55;
pub const POWER_LIMIT_SAFE_W: f64 = 0.5;
pub const POWER_LIMIT_IDLE_W: f64 = 1.5;
pub const POWER_LIMIT_ACTIVE_W: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsControlState {
    pub payload_enabled: bool,
    pub radio_enabled: bool,
    pub adcs_enabled: bool,
    pub beacon_enabled: bool,
    pub mode: Mode,
    pub power_limit_w: f64,
    pub last_control_ms: u64,
}

impl Default for EpsControlState {
    fn default() -> Self {
        Self {
            payload_enabled: false,
            radio_enabled: false,
            adcs_enabled: false,
            beacon_enabled: true,
            mode: Mode::Safe,
            power_limit_w: POWER_LIMIT_SAFE_W,
            last_control_ms: 0,
        }
    }
}

/// Highest mode supportable at `soc`, used for automatic demotion.
fn highest_supportable_mode(requested: Mode, soc: f64) -> Mode {
    match requested {
        Mode::Active if soc < SOC_PAYLOAD_THRESHOLD => {
            if soc < SOC_SAFE_THRESHOLD {
                Mode::Safe
            } else if soc < SOC_IDLE_THRESHOLD {
                Mode::Idle
            } else {
                // SOC supports IDLE but not payload-gated ACTIVE.
                Mode::Idle
            }
        }
        Mode::Idle if soc < SOC_IDLE_THRESHOLD => Mode::Safe,
        other => other,
    }
}

pub struct EpsController {
    state: EpsControlState,
}

impl Default for EpsController {
    fn default() -> Self {
        Self::new()
    }
}

impl EpsController {
    pub fn new() -> Self {
        Self { state: EpsControlState::default() }
    }

    pub fn from_state(state: EpsControlState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> EpsControlState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn power_limit_w(&self) -> f64 {
        self.state.power_limit_w
    }

    pub fn is_payload_enabled(&self) -> bool {
        self.state.payload_enabled
    }

    /// Refuses to enable when `soc < SOC_PAYLOAD_THRESHOLD`; disable is
    /// always permitted.
    pub fn control_payload(&mut self, clock: &dyn Clock, enable: bool, soc: f64) -> bool {
        if enable && soc < SOC_PAYLOAD_THRESHOLD {
            log::warn!("payload enable refused: soc {soc:.2} below threshold");
            return false;
        }
        if self.state.payload_enabled != enable {
            self.state.payload_enabled = enable;
            log::info!("payload {}", if enable { "enabled" } else { "disabled" });
        }
        self.state.last_control_ms = clock.now_ms();
        true
    }

    pub fn control_radio(&mut self, clock: &dyn Clock, enable: bool) {
        if self.state.radio_enabled != enable {
            self.state.radio_enabled = enable;
            log::info!("radio {}", if enable { "enabled" } else { "disabled" });
        }
        self.state.last_control_ms = clock.now_ms();
    }

    pub fn control_adcs(&mut self, clock: &dyn Clock, enable: bool) {
        if self.state.adcs_enabled != enable {
            self.state.adcs_enabled = enable;
            log::info!("ADCS {}", if enable { "enabled" } else { "disabled" });
        }
        self.state.last_control_ms = clock.now_ms();
    }

    pub fn control_beacon(&mut self, clock: &dyn Clock, enable: bool) {
        if self.state.beacon_enabled != enable {
            self.state.beacon_enabled = enable;
            log::info!("beacon {}", if enable { "enabled" } else { "disabled" });
        }
        self.state.last_control_ms = clock.now_ms();
    }

    /// Applies the full load-switch policy for `mode`, demoting to the
    /// highest mode `soc` actually supports.
    pub fn set_power_mode(&mut self, clock: &dyn Clock, requested: Mode, soc: f64) -> Mode {
        let effective = highest_supportable_mode(requested, soc);

        match effective {
            Mode::Safe => {
                self.control_payload(clock, false, soc);
                self.control_radio(clock, false);
                self.control_adcs(clock, false);
                self.control_beacon(clock, true);
                self.state.power_limit_w = POWER_LIMIT_SAFE_W;
            }
            Mode::Idle => {
                self.control_payload(clock, false, soc);
                self.control_radio(clock, true);
                self.control_adcs(clock, true);
                self.control_beacon(clock, true);
                self.state.power_limit_w = POWER_LIMIT_IDLE_W;
            }
            Mode::Active => {
                self.control_payload(clock, true, soc);
                self.control_radio(clock, true);
                self.control_adcs(clock, true);
                self.control_beacon(clock, true);
                self.state.power_limit_w = POWER_LIMIT_ACTIVE_W;
            }
        }

        self.state.mode = effective;
        self.state.last_control_ms = clock.now_ms();
        effective
    }

    fn body_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(21);
        let s = &self.state;
        buf.push(s.payload_enabled as u8);
        buf.push(s.radio_enabled as u8);
        buf.push(s.adcs_enabled as u8);
        buf.push(s.beacon_enabled as u8);
        buf.push(s.mode as u8);
        buf.extend_from_slice(&s.power_limit_w.to_le_bytes());
        buf.extend_from_slice(&s.last_control_ms.to_le_bytes());
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
        if body.len() < 21 {
            return Err(CoreError::Truncated);
        }
        let state = EpsControlState {
            payload_enabled: body[0] != 0,
            radio_enabled: body[1] != 0,
            adcs_enabled: body[2] != 0,
            beacon_enabled: body[3] != 0,
            mode: Mode::try_from(body[4]).map_err(|_| CoreError::ParamInvalid)?,
            power_limit_w: f64::from_le_bytes(body[5..13].try_into().unwrap()),
            last_control_ms: u64::from_le_bytes(body[13..21].try_into().unwrap()),
        };
        Ok(Self::from_state(state))
    }
}
