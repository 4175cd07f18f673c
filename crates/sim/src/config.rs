//! Simulation entry-point configuration, read from the environment
//! variables named for the external UART/telemetry boundary. None of
//! these affect the autonomy core's behavior — they are logged at
//! startup and held for the (out-of-scope) HAL/sensor-framework wiring.

use std::env;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub uart_device: String,
    pub uart_baudrate: u32,
    pub telemetry_interval_ms: u64,
    pub sensors_yaml: Option<String>,
    pub persist_dir: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            uart_device: "/dev/ttyUSB0".to_string(),
            uart_baudrate: 115_200,
            telemetry_interval_ms: 10_000,
            sensors_yaml: None,
            persist_dir: "./smart-qso-sim-state".to_string(),
        }
    }
}

const VALID_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 115200, 230400];

impl SimConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            uart_device: env::var("UART_DEVICE").unwrap_or(defaults.uart_device),
            uart_baudrate: env::var("UART_BAUDRATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|b| VALID_BAUD_RATES.contains(b))
                .unwrap_or(defaults.uart_baudrate),
            telemetry_interval_ms: env::var("TELEMETRY_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&ms: &u64| ms > 0 && ms <= 3_600_000)
                .unwrap_or(defaults.telemetry_interval_ms),
            sensors_yaml: env::var("SENSORS_YAML").ok(),
            persist_dir: env::var("SMART_QSO_PERSIST_DIR").unwrap_or(defaults.persist_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_valid_ranges() {
        let cfg = SimConfig::default();
        assert!(VALID_BAUD_RATES.contains(&cfg.uart_baudrate));
        assert!(cfg.telemetry_interval_ms > 0 && cfg.telemetry_interval_ms <= 3_600_000);
    }
}
