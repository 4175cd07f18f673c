//! Scheduler (component I): a cooperative, single-threaded, time-triggered
//! task table with priority selection and deadline monitoring.
//!
//! Tasks are plain closures; execution time is measured with a real
//! monotonic microsecond source ([`std::time::Instant`]), replacing the
//! always-zero stub the stats block would otherwise carry.

use crate::assert::{AssertAction, AssertFramework};
use crate::error::{CoreError, CoreResult};
use crate::time::Clock;
use std::time::Instant;

pub const MAX_TASKS: usize = 16;
pub const MIN_PERIOD_MS: u32 = 10;
pub const MAX_PERIOD_MS: u32 = 60_000;
pub const TICK_PERIOD_MS: u32 = 1;
pub const DEADLINE_MISS_LIMIT: u32 = 3;
pub const CPU_UTIL_WINDOW: u32 = 1000;
const STATS_AVG_FACTOR: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Inactive,
    Ready,
    Running,
    Suspended,
    Fault,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub run_count: u32,
    pub last_run_time_us: u32,
    pub max_run_time_us: u32,
    pub min_run_time_us: u32,
    pub avg_run_time_us: u32,
    pub deadline_misses: u32,
    pub skip_count: u32,
}

pub type TaskHandle = usize;

pub type TaskFn = Box<dyn FnMut() + Send>;
pub type DeadlineMissCallback = Box<dyn FnMut(TaskHandle, u32) + Send>;

struct Task {
    name: String,
    func: TaskFn,
    period_ms: u32,
    deadline_ms: u32,
    priority: Priority,
    state: TaskState,
    next_run_tick: u32,
    consecutive_misses: u32,
    stats: TaskStats,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedStats {
    pub tick_count: u32,
    pub cpu_utilization: u32,
    pub idle_time_us: u32,
    pub active_tasks: u32,
    pub total_deadline_misses: u32,
}

pub struct Scheduler {
    tasks: Vec<Option<Task>>,
    tick_count: u32,
    active_time_us: u32,
    idle_time_us: u32,
    cpu_utilization: u32,
    running_task: Option<TaskHandle>,
    deadline_cb: Option<DeadlineMissCallback>,
    stopped: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let mut tasks = Vec::with_capacity(MAX_TASKS);
        tasks.resize_with(MAX_TASKS, || None);
        Self {
            tasks,
            tick_count: 0,
            active_time_us: 0,
            idle_time_us: 0,
            cpu_utilization: 0,
            running_task: None,
            deadline_cb: None,
            stopped: false,
        }
    }

    pub fn register_deadline_callback<F>(&mut self, callback: F)
    where
        F: FnMut(TaskHandle, u32) + Send + 'static,
    {
        self.deadline_cb = Some(Box::new(callback));
    }

    /// Validates non-empty/unique name and `period_ms` range through the
    /// assertion framework, then inserts into the first free slot.
    #[allow(clippy::too_many_arguments)]
    pub fn register_task(
        &mut self,
        assertions: &AssertFramework,
        clock: &dyn Clock,
        name: &str,
        func: TaskFn,
        period_ms: u32,
        deadline_ms: u32,
        priority: Priority,
        enabled: bool,
    ) -> CoreResult<TaskHandle> {
        if assertions.require_not_null(clock, file!(), line!() as u16, !name.is_empty(), "task name must not be empty")
            != AssertAction::Continue
        {
            return Err(CoreError::NullArg);
        }
        if assertions.require_range(
            clock,
            file!(),
            line!() as u16,
            f64::from(period_ms),
            f64::from(MIN_PERIOD_MS),
            f64::from(MAX_PERIOD_MS),
        ) != AssertAction::Continue
        {
            return Err(CoreError::InvalidArg("period_ms out of range"));
        }
        if self.tasks.iter().flatten().any(|t| t.name == name) {
            return Err(CoreError::InvalidArg("duplicate task name"));
        }
        let slot = self.tasks.iter().position(Option::is_none).ok_or(CoreError::OutOfMemory)?;
        self.tasks[slot] = Some(Task {
            name: name.to_string(),
            func,
            period_ms,
            deadline_ms,
            priority,
            state: if enabled { TaskState::Ready } else { TaskState::Inactive },
            next_run_tick: self.tick_count,
            consecutive_misses: 0,
            stats: TaskStats::default(),
        });
        Ok(slot)
    }

    pub fn unregister_task(&mut self, handle: TaskHandle) -> CoreResult<()> {
        if self.running_task == Some(handle) {
            return Err(CoreError::Busy);
        }
        let slot = self.tasks.get_mut(handle).ok_or(CoreError::NotFound)?;
        if slot.is_none() {
            return Err(CoreError::NotFound);
        }
        *slot = None;
        Ok(())
    }

    pub fn enable_task(&mut self, handle: TaskHandle) -> CoreResult<()> {
        let task = self.task_mut(handle)?;
        task.state = TaskState::Ready;
        task.next_run_tick = self.tick_count;
        Ok(())
    }

    pub fn disable_task(&mut self, handle: TaskHandle) -> CoreResult<()> {
        self.task_mut(handle)?.state = TaskState::Inactive;
        Ok(())
    }

    pub fn suspend_task(&mut self, handle: TaskHandle) -> CoreResult<()> {
        self.task_mut(handle)?.state = TaskState::Suspended;
        Ok(())
    }

    pub fn resume_task(&mut self, handle: TaskHandle) -> CoreResult<()> {
        let task = self.task_mut(handle)?;
        if task.state == TaskState::Suspended {
            task.state = TaskState::Ready;
        }
        Ok(())
    }

    pub fn task_state(&self, handle: TaskHandle) -> Option<TaskState> {
        self.tasks.get(handle)?.as_ref().map(|t| t.state)
    }

    pub fn task_stats(&self, handle: TaskHandle) -> Option<TaskStats> {
        self.tasks.get(handle)?.as_ref().map(|t| t.stats)
    }

    pub fn reset_task_stats(&mut self, handle: TaskHandle) -> CoreResult<()> {
        self.task_mut(handle)?.stats = TaskStats::default();
        Ok(())
    }

    pub fn set_period(&mut self, handle: TaskHandle, period_ms: u32) -> CoreResult<()> {
        if !(MIN_PERIOD_MS..=MAX_PERIOD_MS).contains(&period_ms) {
            return Err(CoreError::InvalidArg("period_ms out of range"));
        }
        self.task_mut(handle)?.period_ms = period_ms;
        Ok(())
    }

    pub fn stats(&self) -> SchedStats {
        let active_tasks = self
            .tasks
            .iter()
            .flatten()
            .filter(|t| matches!(t.state, TaskState::Ready | TaskState::Running))
            .count() as u32;
        let total_deadline_misses = self.tasks.iter().flatten().map(|t| t.stats.deadline_misses).sum();
        SchedStats {
            tick_count: self.tick_count,
            cpu_utilization: self.cpu_utilization,
            idle_time_us: self.idle_time_us,
            active_tasks,
            total_deadline_misses,
        }
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn task_mut(&mut self, handle: TaskHandle) -> CoreResult<&mut Task> {
        self.tasks.get_mut(handle).and_then(Option::as_mut).ok_or(CoreError::NotFound)
    }

    fn find_ready_task(&self) -> Option<TaskHandle> {
        let mut best: Option<(TaskHandle, Priority)> = None;
        for (i, slot) in self.tasks.iter().enumerate() {
            let Some(task) = slot else { continue };
            if task.state != TaskState::Ready {
                continue;
            }
            if self.tick_count < task.next_run_tick {
                continue;
            }
            match &best {
                None => best = Some((i, task.priority)),
                Some((_, p)) if task.priority < *p => best = Some((i, task.priority)),
                _ => {}
            }
        }
        best.map(|(i, _)| i)
    }

    fn run_task(&mut self, handle: TaskHandle) {
        let task = self.tasks[handle].as_mut().expect("handle validated by caller");
        task.state = TaskState::Running;
        self.running_task = Some(handle);

        let start = Instant::now();
        (task.func)();
        let run_time_us = start.elapsed().as_micros() as u32;

        task.stats.run_count += 1;
        task.stats.last_run_time_us = run_time_us;
        if task.stats.run_count == 1 || run_time_us > task.stats.max_run_time_us {
            task.stats.max_run_time_us = run_time_us;
        }
        if task.stats.run_count == 1 || run_time_us < task.stats.min_run_time_us {
            task.stats.min_run_time_us = run_time_us;
        }
        task.stats.avg_run_time_us = ((u64::from(task.stats.avg_run_time_us)
            * (STATS_AVG_FACTOR - 1)
            + u64::from(run_time_us))
            / STATS_AVG_FACTOR) as u32;

        let deadline_us = task.deadline_ms * 1000;
        let mut overrun = None;
        if deadline_us > 0 && run_time_us > deadline_us {
            task.stats.deadline_misses += 1;
            task.consecutive_misses += 1;
            overrun = Some(run_time_us - deadline_us);
            if task.consecutive_misses >= DEADLINE_MISS_LIMIT {
                task.state = TaskState::Fault;
            }
        } else {
            task.consecutive_misses = 0;
        }

        task.next_run_tick = self.tick_count + task.period_ms / TICK_PERIOD_MS;
        if task.state != TaskState::Fault {
            task.state = TaskState::Ready;
        }
        self.running_task = None;

        if let Some(overrun_us) = overrun {
            if let Some(cb) = self.deadline_cb.as_mut() {
                cb(handle, overrun_us);
            }
        }

        self.update_cpu_util(run_time_us);
    }

    fn update_cpu_util(&mut self, task_time_us: u32) {
        self.active_time_us += task_time_us;
        if self.tick_count % CPU_UTIL_WINDOW == 0 {
            let total = self.active_time_us + self.idle_time_us;
            if total > 0 {
                self.cpu_utilization = (self.active_time_us * 100) / total;
            }
            self.active_time_us = 0;
            self.idle_time_us = 0;
        }
    }

    /// Runs one scheduler tick per the scheduling rule in the design: pick
    /// the lowest-priority-value READY&due task (ties by lowest index),
    /// or run the idle procedure.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        match self.find_ready_task() {
            Some(handle) => self.run_task(handle),
            None => {
                let start = Instant::now();
                let idle_us = start.elapsed().as_micros() as u32;
                self.idle_time_us += idle_us;
                self.update_cpu_util(0);
            }
        }
    }

    /// Forces an immediate invocation regardless of schedule; stats still
    /// update through the normal path.
    pub fn run_now(&mut self, handle: TaskHandle) -> CoreResult<()> {
        if self.tasks.get(handle).and_then(Option::as_ref).is_none() {
            return Err(CoreError::NotFound);
        }
        self.run_task(handle);
        Ok(())
    }

    /// Cooperative spin: advances ticks until `ms` elapses, running other
    /// due tasks in the interim rather than blocking.
    pub fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn registration_rejects_bad_period_and_duplicates() {
        let mut sched = Scheduler::new();
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        assert!(sched
            .register_task(&af, &clock, "t", Box::new(|| {}), 5, 100, Priority::Normal, true)
            .is_err());
        sched.register_task(&af, &clock, "t", Box::new(|| {}), 100, 1000, Priority::Normal, true).unwrap();
        assert!(sched
            .register_task(&af, &clock, "t", Box::new(|| {}), 100, 1000, Priority::Normal, true)
            .is_err());
    }

    #[test]
    fn priority_selection_picks_lowest_value() {
        let mut sched = Scheduler::new();
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        sched
            .register_task(&af, &clock, "low", Box::new(move || o1.lock().unwrap().push("low")), 10, 1000, Priority::Low, true)
            .unwrap();
        sched
            .register_task(
                &af,
                &clock,
                "critical",
                Box::new(move || o2.lock().unwrap().push("critical")),
                10,
                1000,
                Priority::Critical,
                true,
            )
            .unwrap();
        sched.tick();
        assert_eq!(*order.lock().unwrap(), vec!["critical"]);
    }

    #[test]
    fn three_consecutive_misses_cause_fault() {
        let mut sched = Scheduler::new();
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        let misses = Arc::new(AtomicU32::new(0));
        let m = misses.clone();
        sched.register_deadline_callback(move |_, overrun_us| {
            assert!(overrun_us > 0);
            m.fetch_add(1, Ordering::SeqCst);
        });
        // 1ms deadline against a 2ms sleep guarantees every run overruns;
        // period MIN_PERIOD_MS so the task is due again every 10 ticks.
        let handle = sched
            .register_task(
                &af,
                &clock,
                "slow",
                Box::new(|| thread::sleep(Duration::from_millis(2))),
                MIN_PERIOD_MS,
                1,
                Priority::Normal,
                true,
            )
            .unwrap();
        for _ in 0..(MIN_PERIOD_MS * DEADLINE_MISS_LIMIT + 5) {
            sched.tick();
            if sched.task_state(handle) == Some(TaskState::Fault) {
                break;
            }
        }
        assert_eq!(sched.task_state(handle), Some(TaskState::Fault));
        assert!(sched.task_stats(handle).unwrap().deadline_misses >= DEADLINE_MISS_LIMIT);
        assert!(misses.load(Ordering::SeqCst) >= DEADLINE_MISS_LIMIT);
    }

    #[test]
    fn stats_ordering_invariant_holds() {
        let mut sched = Scheduler::new();
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        let handle = sched.register_task(&af, &clock, "t", Box::new(|| {}), 10, 1000, Priority::Normal, true).unwrap();
        for _ in 0..5 {
            sched.tick();
        }
        let stats = sched.task_stats(handle).unwrap();
        assert!(stats.min_run_time_us <= stats.last_run_time_us || stats.run_count <= 1);
        assert!(stats.min_run_time_us <= stats.max_run_time_us);
        assert_eq!(stats.run_count, 1);
    }

    #[test]
    fn unregistering_running_task_is_forbidden() {
        let mut sched = Scheduler::new();
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        let handle = sched
            .register_task(
                &af,
                &clock,
                "self_unreg",
                Box::new(|| {}),
                10,
                1000,
                Priority::Normal,
                true,
            )
            .unwrap();
        sched.running_task = Some(handle);
        assert_eq!(sched.unregister_task(handle), Err(CoreError::Busy));
    }

    #[test]
    fn empty_name_is_recorded_as_param_null_assertion() {
        let mut sched = Scheduler::new();
        let af = AssertFramework::init();
        let clock = FakeClock::new(0);
        assert_eq!(
            sched.register_task(&af, &clock, "", Box::new(|| {}), 100, 1000, Priority::Normal, true),
            Err(CoreError::NullArg)
        );
        assert_eq!(af.log()[0].kind, crate::assert::AssertType::ParamNull);
    }
}
