//! Autonomy backbone for the SMART-QSO CubeSat flight software.
//!
//! Exposes the scheduler, operational state machine, FDIR, EPS controller,
//! persistence facade, assertion framework, CRC32 primitive, mission data,
//! system-state container, and time source as independent modules, plus
//! [`AppCore`] — the single owned aggregate that wires them together in
//! the boot order the flight software depends on.

pub mod assert;
pub mod crc;
pub mod eps;
pub mod error;
pub mod fault;
pub mod fsm;
pub mod mission;
pub mod persist;
pub mod sched;
pub mod state;
pub mod time;

use crate::assert::AssertFramework;
use crate::eps::EpsController;
use crate::error::CoreResult;
use crate::fault::{FaultLog, FaultSeverity, FaultType};
use crate::fsm::{OpState, StateMachine};
use crate::mission::MissionData;
use crate::persist::{load_record, save_record, PersistBackend, Region};
use crate::sched::Scheduler;
use crate::state::{Mode, SystemState};
use crate::time::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How often the system-state container is flushed to persistence when
/// dirty, in milliseconds.
pub const PERSIST_INTERVAL_MS: u64 = 60_000;

/// Two maximum beacon intervals: the AI co-processor link is considered
/// stale if no beacon text has been received within this window. Pinned
/// per the open question on AI-availability staleness.
pub const AI_LINK_STALE_TIMEOUT_MS: u64 = 120_000;

/// The single owned aggregate. Construction follows the fixed init order:
/// time source, CRC (pure, no state), persistence, assertions, fault log,
/// system state, mission data, EPS, state machine, scheduler.
pub struct AppCore {
    pub clock: Box<dyn Clock>,
    pub assertions: AssertFramework,
    pub faults: FaultLog,
    pub state: SystemState,
    pub mission: MissionData,
    pub eps: EpsController,
    pub fsm: StateMachine,
    pub scheduler: Scheduler,
    safe_mode_requested: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
}

impl AppCore {
    /// Wires the assertion framework's safe-mode/reset callbacks to a pair
    /// of flags `drive()` polls. The callbacks can't reach into `AppCore`
    /// directly (they're `'static` and own nothing but what they close
    /// over), so they only set a flag; `AppCore` is the one that acts on it.
    fn install_callbacks(assertions: &AssertFramework) -> (Arc<AtomicBool>, Arc<AtomicBool>) {
        let safe_mode_requested = Arc::new(AtomicBool::new(false));
        let reset_requested = Arc::new(AtomicBool::new(false));

        let safe_flag = safe_mode_requested.clone();
        assertions.register_safe_mode_callback(move || safe_flag.store(true, Ordering::SeqCst));

        let reset_flag = reset_requested.clone();
        assertions.register_reset_callback(move || reset_flag.store(true, Ordering::SeqCst));

        (safe_mode_requested, reset_requested)
    }

    /// Boots from an empty backend: every region load fails, every owner
    /// falls back to its defaults, and the mission data is a first-ever
    /// boot (`reset_count = 1`).
    pub fn cold_boot(clock: Box<dyn Clock>) -> Self {
        let mut state = SystemState::init(clock.as_ref());
        state.increment_boot_count(clock.as_ref());
        let mission = MissionData::first_boot(clock.as_ref());
        let assertions = AssertFramework::init();
        let (safe_mode_requested, reset_requested) = Self::install_callbacks(&assertions);
        Self {
            assertions,
            faults: FaultLog::new(),
            state,
            mission,
            eps: EpsController::new(),
            fsm: StateMachine::new(),
            scheduler: Scheduler::new(),
            clock,
            safe_mode_requested,
            reset_requested,
        }
    }

    /// Boots against a persistence backend: loads each owner's region,
    /// reverting to defaults on a missing, CRC-invalid, or malformed
    /// record. Boot count is incremented on every successful init
    /// regardless of which regions loaded; `mission.reset_count` only
    /// advances once per boot, whether this is a first-ever boot or a
    /// genuine warm boot from a valid record.
    pub fn boot(clock: Box<dyn Clock>, backend: &dyn PersistBackend) -> Self {
        let mut state = match load_record(backend, Region::SystemState) {
            Ok(image) if SystemState::verify_image_crc(&image) => {
                SystemState::from_persisted_image(&image, clock.as_ref())
                    .unwrap_or_else(|_| SystemState::init(clock.as_ref()))
            }
            _ => SystemState::init(clock.as_ref()),
        };
        state.increment_boot_count(clock.as_ref());

        let mission = match load_record(backend, Region::MissionData) {
            Ok(image) if MissionData::verify_image_crc(&image) => {
                match MissionData::from_persisted_image(&image) {
                    Ok(mut data) => {
                        data.on_subsequent_boot(clock.as_ref());
                        data
                    }
                    Err(_) => MissionData::first_boot(clock.as_ref()),
                }
            }
            _ => MissionData::first_boot(clock.as_ref()),
        };

        let faults = match load_record(backend, Region::FaultLog) {
            Ok(image) if FaultLog::verify_image_crc(&image) => {
                FaultLog::from_persisted_image(&image).unwrap_or_default()
            }
            _ => FaultLog::new(),
        };

        let eps = match load_record(backend, Region::EpsConfig) {
            Ok(image) if EpsController::verify_image_crc(&image) => {
                EpsController::from_persisted_image(&image).unwrap_or_default()
            }
            _ => EpsController::new(),
        };

        let assertions = AssertFramework::init();
        assertions.require_state(
            clock.as_ref(),
            file!(),
            line!() as u16,
            mission.reset_count > 0,
            "mission reset_count must be positive after boot",
        );
        let (safe_mode_requested, reset_requested) = Self::install_callbacks(&assertions);

        Self {
            assertions,
            faults,
            state,
            mission,
            eps,
            fsm: StateMachine::new(),
            scheduler: Scheduler::new(),
            clock,
            safe_mode_requested,
            reset_requested,
        }
    }

    /// Persists the system-state, mission-data, and EPS-config records if
    /// the system-state dirty flag is set, and the fault log separately
    /// if it has unsaved entries of its own.
    pub fn save_if_dirty(&mut self, backend: &mut dyn PersistBackend) -> CoreResult<()> {
        if self.state.is_dirty() {
            let image = self.state.to_persisted_image();
            save_record(backend, Region::SystemState, &image)?;
            self.state.clear_dirty();
            self.state.last_persist_ms = self.clock.now_ms();

            let mission_image = self.mission.to_persisted_image();
            save_record(backend, Region::MissionData, &mission_image)?;

            let eps_image = self.eps.to_persisted_image();
            save_record(backend, Region::EpsConfig, &eps_image)?;
        }

        if self.faults.is_dirty() {
            let faults_image = self.faults.to_persisted_image();
            save_record(backend, Region::FaultLog, &faults_image)?;
            self.faults.clear_dirty();
        }

        Ok(())
    }

    /// Drives one unit of periodic work: feeds `event` (if any) to the
    /// state machine, forces SAFE if a critical/fatal assertion fired
    /// since the last call, and ticks the scheduler once.
    pub fn drive(&mut self, event: Option<fsm::Event>) {
        let soc = self.state.power.state_of_charge;

        if let Some(event) = event {
            self.fsm.process_event(
                &mut self.state.sm_context,
                self.clock.as_ref(),
                event,
                &mut self.faults,
                &mut self.eps,
                soc,
            );
        }

        if self.safe_mode_requested.swap(false, Ordering::SeqCst) {
            self.fsm.force_state(&mut self.state.sm_context, self.clock.as_ref(), OpState::Safe);
            self.eps.set_power_mode(self.clock.as_ref(), Mode::Safe, soc);
            self.faults.add(
                self.clock.as_ref(),
                FaultType::Assertion,
                FaultSeverity::Critical,
                "assertion-triggered safe mode",
                soc,
            );
        }

        self.scheduler.tick();
    }

    pub fn operational_state(&self) -> OpState {
        self.state.sm_context.current_state
    }

    /// Consumes the reset request raised by a fatal assertion, if any.
    /// Left to the caller (the sim loop, the flight main loop) to act on,
    /// since `AppCore` itself has no facility to actually restart.
    pub fn take_reset_requested(&self) -> bool {
        self.reset_requested.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;

    #[test]
    fn cold_boot_matches_scenario_one() {
        let clock = FakeClock::new(0);
        let core = AppCore::cold_boot(Box::new(clock));
        assert_eq!(core.mission.reset_count, 1);
        assert_eq!(core.operational_state(), OpState::Boot);
        assert_eq!(core.eps.mode(), crate::state::Mode::Safe);
        assert!(!core.state.power.payload_enabled);
        assert_eq!(core.faults.count(), 0);
    }

    #[test]
    fn boot_counter_increments_each_successful_init() {
        let clock = FakeClock::new(0);
        let mut backend = persist::MemoryBackend::new();
        let core1 = AppCore::boot(Box::new(FakeClock::new(0)), &backend);
        assert_eq!(core1.state.mission.boot_count, 1);
        assert_eq!(core1.mission.reset_count, 1);
        let image = core1.state.to_persisted_image();
        persist::save_record(&mut backend, Region::SystemState, &image).unwrap();
        let mission_image = core1.mission.to_persisted_image();
        persist::save_record(&mut backend, Region::MissionData, &mission_image).unwrap();

        let core2 = AppCore::boot(Box::new(clock), &backend);
        assert_eq!(core2.state.mission.boot_count, 2);
        assert_eq!(core2.mission.reset_count, 2);
    }

    #[test]
    fn corrupted_system_state_file_reverts_to_safe_mode() {
        let clock = FakeClock::new(0);
        let mut backend = persist::MemoryBackend::new();
        let mut image = SystemState::init(&clock).to_persisted_image();
        image[10] ^= 0xFF;
        persist::save_record(&mut backend, Region::SystemState, &image).unwrap();

        let core = AppCore::boot(Box::new(clock), &backend);
        assert_eq!(core.eps.mode(), crate::state::Mode::Safe);
    }

    #[test]
    fn assertion_critical_failure_forces_safe_mode() {
        let clock = FakeClock::new(0);
        let mut core = AppCore::cold_boot(Box::new(clock));
        core.fsm.process_event(
            &mut core.state.sm_context,
            core.clock.as_ref(),
            fsm::Event::BootComplete,
            &mut core.faults,
            &mut core.eps,
            0.8,
        );
        assert_eq!(core.operational_state(), OpState::Detumble);

        core.assertions.require_state(core.clock.as_ref(), file!(), line!() as u16, false, "forced failure");
        core.drive(None);
        assert_eq!(core.operational_state(), OpState::Safe);
        assert_eq!(core.eps.mode(), crate::state::Mode::Safe);
    }

    #[test]
    fn eps_config_and_fault_log_persist_across_boot() {
        let clock = FakeClock::new(0);
        let mut backend = persist::MemoryBackend::new();
        let mut core1 = AppCore::boot(Box::new(FakeClock::new(0)), &backend);
        core1.state.set_state_of_charge(core1.clock.as_ref(), 0.8);
        core1.eps.set_power_mode(core1.clock.as_ref(), crate::state::Mode::Active, 0.8);
        core1.faults.add(
            core1.clock.as_ref(),
            crate::fault::FaultType::Telemetry,
            crate::fault::FaultSeverity::Info,
            "boot self-test",
            0.8,
        );
        core1.save_if_dirty(&mut backend).unwrap();

        let core2 = AppCore::boot(Box::new(clock), &backend);
        assert_eq!(core2.eps.mode(), crate::state::Mode::Active);
        assert_eq!(core2.faults.count(), 1);
        assert_eq!(core2.faults.last().unwrap().description, "boot self-test");
    }
}
