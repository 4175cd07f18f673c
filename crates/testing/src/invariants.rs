//! Named invariants that must hold independent of any single scenario.
//! [`run_all`] spot-checks each with a handful of deterministic samples;
//! the accompanying `proptest` suite in this module's test block explores
//! the input space far more broadly.

use crate::ValidationResult;
use smart_qso_core::assert::AssertFramework;
use smart_qso_core::crc;
use smart_qso_core::eps::EpsController;
use smart_qso_core::sched::{Priority, Scheduler};
use smart_qso_core::state::{Mode, SystemState};
use smart_qso_core::time::FakeClock;

pub fn run_all() -> Vec<ValidationResult> {
    vec![
        state_of_charge_always_clamped(),
        crc_detects_every_single_bit_flip(),
        eps_never_exceeds_requested_mode(),
        scheduler_always_prefers_lower_priority_value(),
    ]
}

fn state_of_charge_always_clamped() -> ValidationResult {
    let clock = FakeClock::new(0);
    let samples = [-5.0, -0.001, 0.0, 0.3, 1.0, 1.0001, 10.0];
    let mut worst = None;
    for &soc in &samples {
        let mut state = SystemState::init(&clock);
        state.set_state_of_charge(&clock, soc);
        let stored = state.power.state_of_charge;
        if !(0.0..=1.0).contains(&stored) {
            worst = Some((soc, stored));
            break;
        }
    }
    ValidationResult {
        claim: "state_of_charge is always clamped to [0.0, 1.0]".into(),
        target: "stored value in [0.0, 1.0] for any input".into(),
        measured: match worst {
            None => format!("all {} samples clamped correctly", samples.len()),
            Some((input, stored)) => format!("input={input} produced out-of-range stored={stored}"),
        },
        passed: worst.is_none(),
    }
}

fn crc_detects_every_single_bit_flip() -> ValidationResult {
    let base = b"smart-qso-invariant-check".to_vec();
    let base_crc = crc::crc32(&base);
    let mut missed = 0u32;
    for byte_idx in 0..base.len() {
        for bit in 0..8 {
            let mut flipped = base.clone();
            flipped[byte_idx] ^= 1 << bit;
            if crc::crc32(&flipped) == base_crc {
                missed += 1;
            }
        }
    }
    ValidationResult {
        claim: "CRC32 detects every single-bit flip across the test buffer".into(),
        target: "0 missed flips".into(),
        measured: format!("{missed} of {} flips undetected", base.len() * 8),
        passed: missed == 0,
    }
}

fn eps_never_exceeds_requested_mode() -> ValidationResult {
    let clock = FakeClock::new(0);
    let samples = [0.0, 0.10, 0.25, 0.39, 0.40, 0.54, 0.55, 1.0];
    let mut violation = None;
    for &soc in &samples {
        let mut eps = EpsController::new();
        let effective = eps.set_power_mode(&clock, Mode::Active, soc);
        if effective > Mode::Active {
            violation = Some((soc, effective));
            break;
        }
    }
    ValidationResult {
        claim: "EPS demotion never selects a mode higher than requested".into(),
        target: "effective mode <= requested mode for every SOC sample".into(),
        measured: match violation {
            None => format!("all {} samples stayed at or below ACTIVE", samples.len()),
            Some((soc, mode)) => format!("soc={soc} produced effective mode={mode:?} above request"),
        },
        passed: violation.is_none(),
    }
}

fn scheduler_always_prefers_lower_priority_value() -> ValidationResult {
    let mut sched = Scheduler::new();
    let assertions = AssertFramework::init();
    let clock = FakeClock::new(0);
    let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let priorities = [Priority::Low, Priority::Normal, Priority::High, Priority::Critical, Priority::Idle];
    for (i, &p) in priorities.iter().enumerate() {
        let o = order.clone();
        let label = format!("task-{i}");
        sched
            .register_task(&assertions, &clock, &label, Box::new(move || o.lock().unwrap().push(label.clone())), 10, 1000, p, true)
            .expect("distinct names within capacity");
    }
    sched.tick();
    let ran_first = order.lock().unwrap().first().cloned();
    let passed = ran_first.as_deref() == Some("task-3");
    ValidationResult {
        claim: "the CRITICAL-priority task runs before all others due in the same tick".into(),
        target: "first task to run is the CRITICAL one".into(),
        measured: format!("first task to run: {ran_first:?}"),
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use smart_qso_core::eps::EpsController;

    proptest! {
        #[test]
        fn soc_clamp_holds_for_any_f64(raw in -1000.0f64..1000.0f64) {
            let clock = FakeClock::new(0);
            let mut state = SystemState::init(&clock);
            state.set_state_of_charge(&clock, raw);
            prop_assert!((0.0..=1.0).contains(&state.power.state_of_charge));
        }

        #[test]
        fn crc_changes_on_any_single_byte_mutation(data in proptest::collection::vec(any::<u8>(), 1..64), idx in 0usize..64, delta in 1u8..=255u8) {
            prop_assume!(idx < data.len());
            let original = crc::crc32(&data);
            let mut mutated = data.clone();
            mutated[idx] ^= delta;
            prop_assert_ne!(crc::crc32(&mutated), original);
        }

        #[test]
        fn eps_demotion_never_exceeds_request(soc in 0.0f64..1.0f64) {
            let clock = FakeClock::new(0);
            let mut eps = EpsController::new();
            let effective = eps.set_power_mode(&clock, Mode::Active, soc);
            prop_assert!(effective <= Mode::Active);
            if soc < smart_qso_core::eps::SOC_SAFE_THRESHOLD {
                prop_assert_eq!(effective, Mode::Safe);
            } else if soc < smart_qso_core::eps::SOC_PAYLOAD_THRESHOLD {
                prop_assert_eq!(effective, Mode::Idle);
            } else {
                prop_assert_eq!(effective, Mode::Active);
            }
        }
    }
}
