//! Operational state machine (component F).
//!
//! A static transition table of `(from, event) -> to` plus entry/exit
//! actions. Action failures are logged, never roll back the transition —
//! mode-change progress is preferred over transactional exactness, since
//! the alternative is an undefined operating mode. Every successful
//! transition is itself logged as an INFO fault record, and the events
//! whose recovery procedure lives in the fault log or EPS controller
//! (thermal fault, power low/critical, watchdog timeout) call directly
//! into those modules, the way the component coupling is described.

use crate::eps::EpsController;
use crate::fault::{FaultLog, FaultSeverity, FaultType, RecoveryOutcome};
use crate::state::Mode;
use crate::time::Clock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpState {
    Boot,
    Safe,
    Detumble,
    Idle,
    Active,
    Emergency,
}

impl OpState {
    pub fn name(self) -> &'static str {
        match self {
            OpState::Boot => "BOOT",
            OpState::Safe => "SAFE",
            OpState::Detumble => "DETUMBLE",
            OpState::Idle => "IDLE",
            OpState::Active => "ACTIVE",
            OpState::Emergency => "EMERGENCY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    BootComplete,
    DetumbleComplete,
    CommAcquired,
    PowerOk,
    PowerLow,
    PowerCritical,
    ThermalFault,
    CommTimeout,
    WatchdogTimeout,
    GroundCmdSafe,
    GroundCmdIdle,
    GroundCmdActive,
    AiReady,
    AiFault,
    RecoveryOk,
}

impl Event {
    pub fn name(self) -> &'static str {
        match self {
            Event::BootComplete => "BOOT_COMPLETE",
            Event::DetumbleComplete => "DETUMBLE_COMPLETE",
            Event::CommAcquired => "COMM_ACQUIRED",
            Event::PowerOk => "POWER_OK",
            Event::PowerLow => "POWER_LOW",
            Event::PowerCritical => "POWER_CRITICAL",
            Event::ThermalFault => "THERMAL_FAULT",
            Event::CommTimeout => "COMM_TIMEOUT",
            Event::WatchdogTimeout => "WATCHDOG_TIMEOUT",
            Event::GroundCmdSafe => "GROUND_CMD_SAFE",
            Event::GroundCmdIdle => "GROUND_CMD_IDLE",
            Event::GroundCmdActive => "GROUND_CMD_ACTIVE",
            Event::AiReady => "AI_READY",
            Event::AiFault => "AI_FAULT",
            Event::RecoveryOk => "RECOVERY_OK",
        }
    }
}

/// Outcome of [`StateMachine::process_event`], one-to-one with the
/// original's transition result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Ok,
    NoTransition,
    GuardFailed,
    InvalidState,
    InvalidEvent,
    ActionFailed,
}

/// Per-boot transition context: current/previous state, counters, and
/// timestamps. Embedded in [`crate::state::SystemState`].
#[derive(Debug, Clone, Copy)]
pub struct FsmContext {
    pub current_state: OpState,
    pub previous_state: OpState,
    pub transition_count: u32,
    pub last_transition_ms: u64,
    pub state_entry_ms: u64,
    pub is_initialized: bool,
}

impl FsmContext {
    pub fn new(initial: OpState, now_ms: u64) -> Self {
        Self {
            current_state: initial,
            previous_state: initial,
            transition_count: 0,
            last_transition_ms: now_ms,
            state_entry_ms: now_ms,
            is_initialized: true,
        }
    }
}

fn transition_table() -> Vec<(OpState, Event, OpState)> {
    use Event::*;
    use OpState::*;
    vec![
        (Boot, BootComplete, Detumble),
        (Boot, PowerCritical, Safe),
        (Detumble, DetumbleComplete, Idle),
        (Detumble, PowerLow, Safe),
        (Detumble, PowerCritical, Safe),
        (Detumble, WatchdogTimeout, Safe),
        (Detumble, GroundCmdSafe, Safe),
        (Safe, PowerOk, Idle),
        (Safe, RecoveryOk, Idle),
        (Safe, GroundCmdIdle, Idle),
        (Idle, AiReady, Active),
        (Idle, GroundCmdActive, Active),
        (Idle, PowerLow, Safe),
        (Idle, ThermalFault, Safe),
        (Idle, CommTimeout, Safe),
        (Idle, WatchdogTimeout, Safe),
        (Idle, GroundCmdSafe, Safe),
        (Idle, PowerCritical, Emergency),
        (Active, AiFault, Idle),
        (Active, PowerLow, Idle),
        (Active, PowerCritical, Emergency),
        (Active, ThermalFault, Safe),
        (Active, WatchdogTimeout, Safe),
        (Active, GroundCmdIdle, Idle),
        (Active, GroundCmdSafe, Safe),
        (Active, CommTimeout, Idle),
        (Emergency, RecoveryOk, Safe),
        (Emergency, GroundCmdSafe, Safe),
    ]
}

type ActionResult = Result<(), &'static str>;
type Guard = Box<dyn Fn() -> bool + Send + Sync>;
type Action = Box<dyn Fn() -> ActionResult + Send + Sync>;

/// Owned aggregate: the transition table plus optional per-state
/// entry/exit actions and per-transition guards, set once at
/// construction.
pub struct StateMachine {
    transitions: HashMap<(OpState, Event), OpState>,
    guards: HashMap<(OpState, Event), Guard>,
    transition_actions: HashMap<(OpState, Event), Action>,
    entry_actions: HashMap<OpState, Action>,
    exit_actions: HashMap<OpState, Action>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();
        for (from, event, to) in transition_table() {
            transitions.insert((from, event), to);
        }
        Self {
            transitions,
            guards: HashMap::new(),
            transition_actions: HashMap::new(),
            entry_actions: HashMap::new(),
            exit_actions: HashMap::new(),
        }
    }

    pub fn set_guard<F>(&mut self, from: OpState, event: Event, guard: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.guards.insert((from, event), Box::new(guard));
    }

    pub fn set_transition_action<F>(&mut self, from: OpState, event: Event, action: F)
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.transition_actions.insert((from, event), Box::new(action));
    }

    pub fn set_entry_action<F>(&mut self, state: OpState, action: F)
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.entry_actions.insert(state, Box::new(action));
    }

    pub fn set_exit_action<F>(&mut self, state: OpState, action: F)
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.exit_actions.insert(state, Box::new(action));
    }

    pub fn is_transition_valid(&self, ctx: &FsmContext, event: Event) -> bool {
        self.transitions.contains_key(&(ctx.current_state, event))
    }

    pub fn duration_in_state(&self, ctx: &FsmContext, clock: &dyn Clock) -> u64 {
        clock.now_ms().saturating_sub(ctx.state_entry_ms)
    }

    /// Executes exactly one transition per call, per the seven-step
    /// sequence: reject uninitialized/invalid event, look up, guard,
    /// exit action, transition action, bookkeeping update, entry action.
    /// `faults` receives the INFO mode-change record on every successful
    /// transition plus a WARNING record for any action-hook failure;
    /// `eps`/`soc` are handed to [`apply_recovery_coupling`] for the
    /// events that couple into FDIR/EPS recovery.
    #[allow(clippy::too_many_arguments)]
    pub fn process_event(
        &self,
        ctx: &mut FsmContext,
        clock: &dyn Clock,
        event: Event,
        faults: &mut FaultLog,
        eps: &mut EpsController,
        soc: f64,
    ) -> TransitionOutcome {
        if !ctx.is_initialized {
            return TransitionOutcome::InvalidState;
        }

        let Some(&to) = self.transitions.get(&(ctx.current_state, event)) else {
            return TransitionOutcome::NoTransition;
        };

        if let Some(guard) = self.guards.get(&(ctx.current_state, event)) {
            if !guard() {
                return TransitionOutcome::GuardFailed;
            }
        }

        if let Some(exit) = self.exit_actions.get(&ctx.current_state) {
            if exit().is_err() {
                let msg = format!("exit action failed leaving {}", ctx.current_state.name());
                log::warn!("{msg}");
                faults.add(clock, FaultType::SwInternal, FaultSeverity::Warning, msg, soc);
            }
        }

        let mut action_failed = false;
        if let Some(action) = self.transition_actions.get(&(ctx.current_state, event)) {
            if action().is_err() {
                action_failed = true;
                let msg = format!(
                    "transition action failed for {} -> {} on {}",
                    ctx.current_state.name(),
                    to.name(),
                    event.name()
                );
                log::warn!("{msg}");
                faults.add(clock, FaultType::SwInternal, FaultSeverity::Warning, msg, soc);
            }
        }

        let now = clock.now_ms();
        ctx.previous_state = ctx.current_state;
        ctx.current_state = to;
        ctx.transition_count += 1;
        ctx.last_transition_ms = now;
        ctx.state_entry_ms = now;

        log::info!("mode-change: {}", to.name());
        faults.add(clock, FaultType::ModeChange, FaultSeverity::Info, to.name(), soc);

        if let Some(entry) = self.entry_actions.get(&to) {
            if entry().is_err() {
                let msg = format!("entry action failed entering {}", to.name());
                log::warn!("{msg}");
                faults.add(clock, FaultType::SwInternal, FaultSeverity::Warning, msg, soc);
            }
        }

        apply_recovery_coupling(event, faults, eps, clock, soc);

        if action_failed {
            TransitionOutcome::ActionFailed
        } else {
            TransitionOutcome::Ok
        }
    }

    /// Recovery-only: bypasses guards and the transition table, still
    /// runs exit and entry actions.
    pub fn force_state(&self, ctx: &mut FsmContext, clock: &dyn Clock, new_state: OpState) {
        if let Some(exit) = self.exit_actions.get(&ctx.current_state) {
            let _ = exit();
        }
        let now = clock.now_ms();
        ctx.previous_state = ctx.current_state;
        ctx.current_state = new_state;
        ctx.last_transition_ms = now;
        ctx.state_entry_ms = now;
        log::warn!("forced state change to {} (recovery)", new_state.name());
        if let Some(entry) = self.entry_actions.get(&new_state) {
            let _ = entry();
        }
    }
}

/// Couples the events whose recovery procedure is owned by another
/// module directly into that module, mirroring the case labels the
/// original transition handler calls inline rather than through a
/// generic hook: thermal faults disable the payload through the fault
/// log's recovery procedure, power faults demote the EPS controller to
/// whatever mode the fault log determines the charge still supports,
/// and watchdog timeouts are logged without further action.
fn apply_recovery_coupling(event: Event, faults: &mut FaultLog, eps: &mut EpsController, clock: &dyn Clock, soc: f64) {
    match event {
        Event::ThermalFault => {
            if faults.recover_thermal(clock, soc, eps.is_payload_enabled()) == RecoveryOutcome::PayloadDisabled {
                eps.control_payload(clock, false, soc);
            }
        }
        Event::PowerLow | Event::PowerCritical => match faults.recover_power(clock, soc) {
            RecoveryOutcome::DemotedToSafe => {
                eps.set_power_mode(clock, Mode::Safe, soc);
            }
            RecoveryOutcome::DemotedToIdle => {
                eps.set_power_mode(clock, Mode::Idle, soc);
            }
            RecoveryOutcome::NoActionNeeded | RecoveryOutcome::PayloadDisabled => {}
        },
        Event::WatchdogTimeout => {
            faults.handle_watchdog(clock, soc);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;

    #[test]
    fn unknown_transition_leaves_state_unchanged() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Boot, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        let outcome = sm.process_event(&mut ctx, &clock, Event::AiReady, &mut faults, &mut eps, 0.8);
        assert_eq!(outcome, TransitionOutcome::NoTransition);
        assert_eq!(ctx.current_state, OpState::Boot);
        assert_eq!(ctx.transition_count, 0);
    }

    #[test]
    fn scenario_boot_to_idle_via_seven_events() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Boot, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        let sequence = [
            Event::BootComplete,
            Event::DetumbleComplete,
            Event::AiReady,
            Event::PowerLow,
            Event::GroundCmdActive,
            Event::ThermalFault,
            Event::RecoveryOk,
        ];
        for event in sequence {
            sm.process_event(&mut ctx, &clock, event, &mut faults, &mut eps, 0.8);
        }
        assert_eq!(ctx.current_state, OpState::Idle);
        assert_eq!(ctx.transition_count, 7);
        assert_eq!(faults.last().unwrap().description, "IDLE");
    }

    #[test]
    fn previous_state_tracks_prior_current() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Boot, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        sm.process_event(&mut ctx, &clock, Event::BootComplete, &mut faults, &mut eps, 0.8);
        assert_eq!(ctx.previous_state, OpState::Boot);
        assert_eq!(ctx.current_state, OpState::Detumble);
    }

    #[test]
    fn idle_power_critical_goes_to_emergency() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Idle, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        sm.process_event(&mut ctx, &clock, Event::PowerCritical, &mut faults, &mut eps, 0.8);
        assert_eq!(ctx.current_state, OpState::Emergency);
    }

    #[test]
    fn force_state_bypasses_guard() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Idle, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        sm.set_guard(OpState::Idle, Event::GroundCmdActive, || false);
        assert_eq!(
            sm.process_event(&mut ctx, &clock, Event::GroundCmdActive, &mut faults, &mut eps, 0.8),
            TransitionOutcome::GuardFailed
        );
        sm.force_state(&mut ctx, &clock, OpState::Emergency);
        assert_eq!(ctx.current_state, OpState::Emergency);
    }

    #[test]
    fn successful_transition_logs_info_mode_change_fault() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Boot, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        sm.process_event(&mut ctx, &clock, Event::BootComplete, &mut faults, &mut eps, 0.8);
        let record = faults.last().unwrap();
        assert_eq!(record.fault_type, FaultType::ModeChange);
        assert_eq!(record.severity, FaultSeverity::Info);
        assert_eq!(record.description, "DETUMBLE");
    }

    #[test]
    fn thermal_fault_disables_payload_via_fault_log_recovery() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Active, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        eps.set_power_mode(&clock, Mode::Active, 0.8);
        assert!(eps.is_payload_enabled());
        sm.process_event(&mut ctx, &clock, Event::ThermalFault, &mut faults, &mut eps, 0.8);
        assert!(!eps.is_payload_enabled());
        assert_eq!(ctx.current_state, OpState::Safe);
    }

    #[test]
    fn power_critical_demotes_eps_mode_through_recover_power() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Idle, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        eps.set_power_mode(&clock, Mode::Idle, 0.8);
        sm.process_event(&mut ctx, &clock, Event::PowerCritical, &mut faults, &mut eps, 0.10);
        assert_eq!(ctx.current_state, OpState::Emergency);
        assert_eq!(eps.mode(), Mode::Safe);
    }

    #[test]
    fn watchdog_timeout_records_watchdog_handling() {
        let sm = StateMachine::new();
        let clock = FakeClock::new(0);
        let mut ctx = FsmContext::new(OpState::Idle, 0);
        let mut faults = FaultLog::new();
        let mut eps = EpsController::new();
        sm.process_event(&mut ctx, &clock, Event::WatchdogTimeout, &mut faults, &mut eps, 0.8);
        assert_eq!(ctx.current_state, OpState::Safe);
        assert!(faults.was_watchdog_triggered());
        assert!((0..faults.count()).any(|i| faults.get(i).unwrap().fault_type == FaultType::Watchdog));
    }

    #[test]
    fn state_name_and_event_name() {
        assert_eq!(OpState::Emergency.name(), "EMERGENCY");
        assert_eq!(Event::PowerCritical.name(), "POWER_CRITICAL");
    }
}
