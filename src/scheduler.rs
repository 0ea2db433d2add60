// Copyright 2020 Joyent, Inc.

//! A reference-counted, shareable periodic scheduler.
//!
//! Every pool that wants endpoint health checks needs a timer thread, but a
//! timer thread per pool instance leaks threads in processes that build
//! many pools. A [`SchedulerHandle`] can be cloned into each consumer: the
//! first registration starts the underlying timer thread and the last
//! cancellation tears it down. A single critical section guards both the
//! use count and the timer so start and teardown cannot interleave.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use timer::{Guard, Timer};

struct SchedulerInner {
    timer: Option<Timer>,
    usage_count: usize,
}

/// A cloneable handle on a shared timer thread.
pub struct SchedulerHandle {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        SchedulerHandle {
            inner: Arc::new(Mutex::new(SchedulerInner {
                timer: None,
                usage_count: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<SchedulerInner> {
        self.inner.lock().unwrap()
    }

    /// Register a repeating task. The returned [`ScheduledTask`] cancels
    /// the registration when dropped; dropping the last one stops the
    /// timer thread.
    pub fn schedule_repeating<F>(
        &self,
        period: Duration,
        task: F,
    ) -> ScheduledTask
    where
        F: FnMut() + Send + 'static,
    {
        let mut inner = self.lock();
        inner.usage_count += 1;
        let timer = inner.timer.get_or_insert_with(Timer::new);
        let guard = timer.schedule_repeating(period, task);
        ScheduledTask {
            scheduler: self.clone(),
            guard: Some(guard),
        }
    }

    /// The number of live registrations, mostly useful to tests.
    pub fn usage_count(&self) -> usize {
        self.lock().usage_count
    }

    fn release(&self) {
        let mut inner = self.lock();
        inner.usage_count -= 1;
        if inner.usage_count == 0 {
            // Dropping the Timer stops the scheduler thread.
            inner.timer = None;
        }
    }
}

impl Clone for SchedulerHandle {
    fn clone(&self) -> SchedulerHandle {
        SchedulerHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A live periodic registration. Dropping it cancels the task and releases
/// the scheduler reference.
pub struct ScheduledTask {
    scheduler: SchedulerHandle,
    guard: Option<Guard>,
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        // Cancel the timer entry before the scheduler reference is
        // released, so teardown never races a firing task.
        drop(self.guard.take());
        self.scheduler.release();
    }
}
