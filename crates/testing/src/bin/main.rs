//! Scenario/invariant runner. Prints one line per claim and exits non-zero
//! if any fail, for wiring into a CI job alongside `cargo test`.

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let report = smart_qso_testing::run_all();

    for result in &report.results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        log::info!("[{status}] {} (target: {}, measured: {})", result.claim, result.target, result.measured);
    }

    log::info!("{}/{} claims passed", report.pass_count(), report.results.len());

    if report.overall_pass() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
