//! Simulation entry point: wires the autonomy core to a file-backed
//! persistence directory and drives it through a cooperative tick loop,
//! standing in for the flight HAL's interrupt-driven tick source.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::SimConfig;
use smart_qso_core::fsm::Event;
use smart_qso_core::persist::file_backend_at;
use smart_qso_core::sched::Priority;
use smart_qso_core::state::Mode;
use smart_qso_core::time::SystemClock;
use smart_qso_core::AppCore;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "smart-qso-sim", about = "SMART-QSO autonomy core simulator")]
struct Cli {
    /// Number of scheduler ticks to run before exiting. Runs forever if unset.
    #[arg(long)]
    ticks: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = SimConfig::from_env();
    log::info!(
        "uart={} baud={} telemetry_interval_ms={} sensors_yaml={:?} persist_dir={}",
        cfg.uart_device,
        cfg.uart_baudrate,
        cfg.telemetry_interval_ms,
        cfg.sensors_yaml,
        cfg.persist_dir,
    );

    let mut backend = file_backend_at(&cfg.persist_dir).context("opening persistence directory")?;
    let mut core = AppCore::boot(Box::new(SystemClock::new()), &backend);
    log::info!(
        "boot complete: state={:?} boot_count={} reset_count={}",
        core.operational_state(),
        core.state.mission.boot_count,
        core.mission.reset_count,
    );

    register_housekeeping_task(&mut core);

    let soc = core.state.power.state_of_charge;
    core.fsm.process_event(
        &mut core.state.sm_context,
        core.clock.as_ref(),
        Event::BootComplete,
        &mut core.faults,
        &mut core.eps,
        soc,
    );
    core.fsm.process_event(
        &mut core.state.sm_context,
        core.clock.as_ref(),
        Event::DetumbleComplete,
        &mut core.faults,
        &mut core.eps,
        soc,
    );

    let mut ticks_run: u64 = 0;
    loop {
        if let Some(limit) = cli.ticks {
            if ticks_run >= limit {
                break;
            }
        }

        core.drive(None);
        core.save_if_dirty(&mut backend).context("persisting dirty state")?;

        ticks_run += 1;
        thread::sleep(Duration::from_millis(u64::from(smart_qso_core::sched::TICK_PERIOD_MS)));
    }

    log::info!("simulation loop exiting after {ticks_run} ticks");
    Ok(())
}

/// Registers a low-priority housekeeping task that mirrors battery state
/// of charge into the EPS controller's mode selection every second.
fn register_housekeeping_task(core: &mut AppCore) {
    let result = core.scheduler.register_task(
        &core.assertions,
        core.clock.as_ref(),
        "housekeeping",
        Box::new(|| {}),
        1000,
        500,
        Priority::Low,
        true,
    );
    if let Err(e) = result {
        log::warn!("failed to register housekeeping task: {e}");
    }

    let soc = core.state.power.state_of_charge;
    let requested = core.eps.mode().max(Mode::Safe);
    core.eps.set_power_mode(core.clock.as_ref(), requested, soc);
}
