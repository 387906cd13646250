//! Round-robin demo scheduler.
//!
//! A toy stand-in for the VM scheduler: a fixed set of pseudo-tasks, one
//! step per tick for the running task, a switch to the next task on each
//! timeslice expiry, and the HAL idle wait when the running task has
//! already stepped on the current tick.

use tracing::{debug, trace};
use vmhal_common::config::HalConfig;
use vmhal_common::error::HalResult;
use vmhal_common::time::Tick;
use vmhal_runtime::{Hal, TimesliceExpired, TimesliceMonitor};

/// A pseudo-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoTask {
    /// Position in the run queue.
    pub id: usize,
    /// Steps executed.
    pub steps: u64,
    /// Timeslices used up.
    pub slices: u64,
}

/// Totals reported when the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Clock reading at the end of the run.
    pub ticks: u64,
    /// Timeslice expiries observed.
    pub expiries: u64,
    /// Task switches performed.
    pub switches: u64,
    /// Task steps executed.
    pub steps: u64,
    /// Calls to the HAL idle wait.
    pub idle_waits: u64,
}

/// The demo run queue.
#[derive(Debug)]
pub struct RoundRobin {
    tasks: Vec<DemoTask>,
    current: usize,
    monitor: TimesliceMonitor,
    last_step: Option<Tick>,
    switches: u64,
    idle_waits: u64,
}

impl RoundRobin {
    /// `task_count` pseudo-tasks with slices sized from `config`.
    pub fn new(task_count: usize, config: &HalConfig) -> Self {
        Self {
            tasks: (0..task_count)
                .map(|id| DemoTask {
                    id,
                    steps: 0,
                    slices: 0,
                })
                .collect(),
            current: 0,
            monitor: TimesliceMonitor::from_config(config),
            last_step: None,
            switches: 0,
            idle_waits: 0,
        }
    }

    /// Tasks in queue order.
    pub fn tasks(&self) -> &[DemoTask] {
        &self.tasks
    }

    /// Index of the running task.
    pub fn current(&self) -> usize {
        self.current
    }

    /// One scheduler pass: consume notifications, then step or idle.
    pub fn step(&mut self, hal: &Hal) -> HalResult<()> {
        self.consume(hal)?;

        let now = hal.now();
        if !self.tasks.is_empty() && self.last_step != Some(now) {
            // Run queue state is shared with the tick path
            let _cs = hal.critical_section()?;
            self.tasks[self.current].steps += 1;
            self.last_step = Some(now);
            return Ok(());
        }

        let outcome = hal.idle_wait();
        trace!(?outcome, "Idle wait returned");
        self.idle_waits += 1;
        Ok(())
    }

    /// Step until `stop` returns true or the clock reaches `max_ticks`
    /// (0 runs until stopped).
    pub fn run(
        &mut self,
        hal: &Hal,
        max_ticks: u64,
        stop: impl Fn() -> bool,
    ) -> HalResult<RunSummary> {
        while !stop() {
            if max_ticks > 0 && hal.now().0 >= max_ticks {
                debug!(max_ticks, "Tick limit reached");
                break;
            }
            self.step(hal)?;
        }
        // Notifications for ticks already counted
        self.consume(hal)?;
        hal.flush()?;
        Ok(self.summary(hal))
    }

    /// Totals so far.
    pub fn summary(&self, hal: &Hal) -> RunSummary {
        RunSummary {
            ticks: hal.now().0,
            expiries: self.monitor.expiries(),
            switches: self.switches,
            steps: self.tasks.iter().map(|t| t.steps).sum(),
            idle_waits: self.idle_waits,
        }
    }

    fn consume(&mut self, hal: &Hal) -> HalResult<()> {
        for expiry in self.monitor.poll(hal) {
            self.on_expiry(hal, expiry)?;
        }
        Ok(())
    }

    fn on_expiry(&mut self, hal: &Hal, expiry: TimesliceExpired) -> HalResult<()> {
        let batched = if expiry.batched { " (batched)" } else { "" };
        let line = if self.tasks.is_empty() {
            format!(
                "{}: slice {} expired after {} ticks{batched}, no tasks\n",
                expiry.tick, expiry.sequence, expiry.elapsed
            )
        } else {
            let from = self.current;
            let to = (from + 1) % self.tasks.len();
            self.tasks[from].slices += 1;
            self.current = to;
            self.switches += 1;
            // The incoming task gets a fresh step on this tick
            self.last_step = None;
            format!(
                "{}: slice {} expired after {} ticks{batched}, task {from} -> task {to}\n",
                expiry.tick, expiry.sequence, expiry.elapsed
            )
        };
        hal.write_all(line.as_bytes())
    }
}
