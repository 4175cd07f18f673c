//! Defensive assertion framework (component B), JPL Power-of-Ten Rule 5 style.
//!
//! Every fallible check normalizes its call site to a `(basename, line)` key,
//! dedupes repeat failures into a single record, and dispatches an
//! [`AssertAction`] driven solely by [`AssertSeverity`]. This is the
//! logging-and-classification service description in the design notes: no
//! macro early-returns, callers use ordinary `Result` propagation and call
//! into this module explicitly when they want a check recorded.

use crate::time::Clock;
use std::sync::Mutex;

pub const ASSERT_MAX_MSG_LEN: usize = 64;
pub const ASSERT_MAX_FAILURE_LOG: usize = 16;
pub const ASSERT_MAX_FILENAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertType {
    Precondition,
    Postcondition,
    Invariant,
    ParamNull,
    ParamRange,
    ArrayBounds,
    State,
    Internal,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssertSeverity {
    Warning,
    Error,
    Critical,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertAction {
    Continue,
    ReturnError,
    SafeMode,
    Reset,
}

fn action_for(severity: AssertSeverity) -> AssertAction {
    match severity {
        AssertSeverity::Warning => AssertAction::Continue,
        AssertSeverity::Error => AssertAction::ReturnError,
        AssertSeverity::Critical => AssertAction::SafeMode,
        AssertSeverity::Fatal => AssertAction::Reset,
    }
}

/// A deduplicated assertion-failure record.
#[derive(Debug, Clone)]
pub struct AssertRecord {
    pub filename: String,
    pub line: u16,
    pub kind: AssertType,
    pub severity: AssertSeverity,
    pub timestamp_ms: u64,
    pub occurrence_count: u32,
    pub message: String,
}

/// Sticky statistics block. Survives [`AssertFramework::clear_stats`].
#[derive(Debug, Clone, Default)]
pub struct AssertStats {
    pub total_checks: u32,
    pub total_failures: u32,
    pub warnings: u32,
    pub errors: u32,
    pub criticals: u32,
    pub fatals: u32,
    pub safe_mode_triggers: u32,
    pub reset_triggers: u32,
    pub log_count: u16,
    pub log_overflows: u16,
}

type SafeModeCallback = Box<dyn Fn() + Send + Sync>;
type ResetCallback = Box<dyn Fn() + Send + Sync>;

struct Inner {
    log: Vec<AssertRecord>,
    next_slot: usize,
    stats: AssertStats,
    critical_failure: bool,
    safe_mode_cb: Option<SafeModeCallback>,
    reset_cb: Option<ResetCallback>,
}

impl Inner {
    fn new() -> Self {
        Self {
            log: Vec::with_capacity(ASSERT_MAX_FAILURE_LOG),
            next_slot: 0,
            stats: AssertStats::default(),
            critical_failure: false,
            safe_mode_cb: None,
            reset_cb: None,
        }
    }
}

/// Owned aggregate for the assertion subsystem. Construct one per boot (or
/// per test); there is no process-level global.
pub struct AssertFramework {
    inner: Mutex<Inner>,
}

fn basename(file: &str) -> String {
    let name = file.rsplit(['/', '\\']).next().unwrap_or(file);
    name.chars().take(ASSERT_MAX_FILENAME_LEN).collect()
}

fn truncate_msg(message: &str) -> String {
    message.chars().take(ASSERT_MAX_MSG_LEN).collect()
}

impl AssertFramework {
    /// Safe to call multiple times; always yields a usable instance.
    pub fn init() -> Self {
        Self { inner: Mutex::new(Inner::new()) }
    }

    pub fn register_safe_mode_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().safe_mode_cb = Some(Box::new(callback));
    }

    pub fn register_reset_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().reset_cb = Some(Box::new(callback));
    }

    /// Records a failing check and returns the action the caller must take.
    pub fn handle_failure(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        kind: AssertType,
        severity: AssertSeverity,
        message: &str,
    ) -> AssertAction {
        let mut inner = self.inner.lock().unwrap();
        let now = clock.now_ms();
        let base = basename(file);

        inner.stats.total_checks += 1;
        inner.stats.total_failures += 1;
        match severity {
            AssertSeverity::Warning => inner.stats.warnings += 1,
            AssertSeverity::Error => inner.stats.errors += 1,
            AssertSeverity::Critical => inner.stats.criticals += 1,
            AssertSeverity::Fatal => inner.stats.fatals += 1,
        }
        if matches!(severity, AssertSeverity::Critical | AssertSeverity::Fatal) {
            inner.critical_failure = true;
        }

        if let Some(existing) = inner
            .log
            .iter_mut()
            .find(|r| r.filename == base && r.line == line)
        {
            existing.occurrence_count += 1;
            existing.timestamp_ms = now;
        } else {
            let record = AssertRecord {
                filename: base,
                line,
                kind,
                severity,
                timestamp_ms: now,
                occurrence_count: 1,
                message: truncate_msg(message),
            };
            if inner.log.len() < ASSERT_MAX_FAILURE_LOG {
                inner.log.push(record);
            } else {
                let slot = inner.next_slot % ASSERT_MAX_FAILURE_LOG;
                inner.log[slot] = record;
                inner.next_slot = (inner.next_slot + 1) % ASSERT_MAX_FAILURE_LOG;
                inner.stats.log_overflows += 1;
            }
            inner.stats.log_count = inner.log.len() as u16;
        }

        let action = action_for(severity);
        match action {
            AssertAction::SafeMode => {
                inner.stats.safe_mode_triggers += 1;
                if let Some(cb) = inner.safe_mode_cb.as_ref() {
                    cb();
                }
            }
            AssertAction::Reset => {
                inner.stats.reset_triggers += 1;
                if let Some(cb) = inner.reset_cb.as_ref() {
                    cb();
                }
            }
            _ => {}
        }
        action
    }

    pub fn stats(&self) -> AssertStats {
        self.inner.lock().unwrap().stats.clone()
    }

    pub fn log(&self) -> Vec<AssertRecord> {
        self.inner.lock().unwrap().log.clone()
    }

    /// Clears the log and non-sticky counters. `critical_failure`,
    /// `safe_mode_triggers`, `reset_triggers`, and `log_overflows` persist.
    pub fn clear_stats(&self) {
        let mut inner = self.inner.lock().unwrap();
        let sticky_critical = inner.critical_failure;
        let sticky_safe_mode = inner.stats.safe_mode_triggers;
        let sticky_reset = inner.stats.reset_triggers;
        let sticky_overflows = inner.stats.log_overflows;
        inner.log.clear();
        inner.next_slot = 0;
        inner.stats = AssertStats::default();
        inner.critical_failure = sticky_critical;
        inner.stats.safe_mode_triggers = sticky_safe_mode;
        inner.stats.reset_triggers = sticky_reset;
        inner.stats.log_overflows = sticky_overflows;
    }

    pub fn has_critical_failures(&self) -> bool {
        self.inner.lock().unwrap().critical_failure
    }

    // Check family. Each returns the action so callers at ERROR can
    // propagate with `?`-friendly control flow.

    pub fn require(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        condition: bool,
        message: &str,
    ) -> AssertAction {
        if condition {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(clock, file, line, AssertType::Precondition, AssertSeverity::Error, message)
    }

    pub fn ensure(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        condition: bool,
        message: &str,
    ) -> AssertAction {
        if condition {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(clock, file, line, AssertType::Postcondition, AssertSeverity::Error, message)
    }

    pub fn invariant(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        condition: bool,
        message: &str,
    ) -> AssertAction {
        if condition {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(clock, file, line, AssertType::Invariant, AssertSeverity::Error, message)
    }

    pub fn require_range(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        value: f64,
        min: f64,
        max: f64,
    ) -> AssertAction {
        if value >= min && value <= max {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(
            clock,
            file,
            line,
            AssertType::ParamRange,
            AssertSeverity::Error,
            "value out of range",
        )
    }

    pub fn require_bounds(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        index: usize,
        len: usize,
    ) -> AssertAction {
        if index < len {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(
            clock,
            file,
            line,
            AssertType::ArrayBounds,
            AssertSeverity::Critical,
            "index out of bounds",
        )
    }

    pub fn require_state(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        condition: bool,
        message: &str,
    ) -> AssertAction {
        if condition {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(clock, file, line, AssertType::State, AssertSeverity::Critical, message)
    }

    pub fn unreachable(&self, clock: &dyn Clock, file: &str, line: u16) -> AssertAction {
        self.handle_failure(
            clock,
            file,
            line,
            AssertType::Unreachable,
            AssertSeverity::Critical,
            "unreachable code executed",
        )
    }

    /// Not-null/not-empty convenience. Rust references can't be null, so
    /// the caller supplies the already-evaluated presence condition (an
    /// `Option::is_some()`, a non-empty slice, a non-empty string) — this
    /// wrapper only fixes the check kind recorded against it.
    pub fn require_not_null(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        condition: bool,
        message: &str,
    ) -> AssertAction {
        if condition {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(clock, file, line, AssertType::ParamNull, AssertSeverity::Error, message)
    }

    /// General-purpose check for conditions that don't fit the other typed
    /// families; the caller picks the severity instead of it being fixed.
    pub fn check_general(
        &self,
        clock: &dyn Clock,
        file: &str,
        line: u16,
        condition: bool,
        severity: AssertSeverity,
        message: &str,
    ) -> AssertAction {
        if condition {
            self.inner.lock().unwrap().stats.total_checks += 1;
            return AssertAction::Continue;
        }
        self.handle_failure(clock, file, line, AssertType::Internal, severity, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;

    #[test]
    fn dedupe_same_site_increments_occurrence() {
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        af.handle_failure(&clock, "src/eps.rs", 42, AssertType::Internal, AssertSeverity::Error, "m");
        af.handle_failure(&clock, "src/eps.rs", 42, AssertType::Internal, AssertSeverity::Error, "m");
        let log = af.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].occurrence_count, 2);
    }

    #[test]
    fn severity_maps_to_expected_action() {
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        assert_eq!(
            af.handle_failure(&clock, "a.rs", 1, AssertType::Internal, AssertSeverity::Warning, "m"),
            AssertAction::Continue
        );
        assert_eq!(
            af.handle_failure(&clock, "b.rs", 1, AssertType::Internal, AssertSeverity::Error, "m"),
            AssertAction::ReturnError
        );
        assert_eq!(
            af.handle_failure(&clock, "c.rs", 1, AssertType::Internal, AssertSeverity::Critical, "m"),
            AssertAction::SafeMode
        );
        assert_eq!(
            af.handle_failure(&clock, "d.rs", 1, AssertType::Internal, AssertSeverity::Fatal, "m"),
            AssertAction::Reset
        );
    }

    #[test]
    fn clear_stats_keeps_sticky_counters() {
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        af.handle_failure(&clock, "a.rs", 1, AssertType::Internal, AssertSeverity::Critical, "m");
        assert!(af.has_critical_failures());
        af.clear_stats();
        assert!(af.has_critical_failures());
        assert_eq!(af.stats().safe_mode_triggers, 1);
        assert_eq!(af.log().len(), 0);
        assert_eq!(af.stats().total_failures, 0);
    }

    #[test]
    fn log_overflow_wraps_and_counts() {
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        for i in 0..(ASSERT_MAX_FAILURE_LOG as u16 + 3) {
            af.handle_failure(&clock, "wrap.rs", i, AssertType::Internal, AssertSeverity::Warning, "m");
        }
        assert_eq!(af.log().len(), ASSERT_MAX_FAILURE_LOG);
        assert_eq!(af.stats().log_overflows, 3);
    }

    #[test]
    fn safe_mode_callback_invoked_on_critical() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        let triggered = Arc::new(AtomicBool::new(false));
        let flag = triggered.clone();
        af.register_safe_mode_callback(move || flag.store(true, Ordering::SeqCst));
        af.handle_failure(&clock, "e.rs", 1, AssertType::State, AssertSeverity::Critical, "m");
        assert!(triggered.load(Ordering::SeqCst));
    }

    #[test]
    fn require_not_null_records_param_null_kind() {
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        assert_eq!(af.require_not_null(&clock, "f.rs", 1, false, "missing handle"), AssertAction::ReturnError);
        assert_eq!(af.log()[0].kind, AssertType::ParamNull);
        assert_eq!(af.require_not_null(&clock, "f.rs", 2, true, "present"), AssertAction::Continue);
    }

    #[test]
    fn check_general_honors_caller_supplied_severity() {
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        assert_eq!(
            af.check_general(&clock, "g.rs", 1, false, AssertSeverity::Fatal, "general failure"),
            AssertAction::Reset
        );
        assert_eq!(af.log()[0].kind, AssertType::Internal);
    }
}
