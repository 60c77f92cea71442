//! Timer scheduler
//!
//! The engine never owns a real timer. It records deadlines here and the host
//! calls back into [`crate::Engine::run_due`] once the earliest deadline from
//! [`Scheduler::next_deadline`] has passed.
//!
//! Reconciliation uses a single trailing-edge debounce slot: a new request
//! replaces the pending one. Every other task is a plain one-shot delay.

/// Deferred work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task<N> {
    /// Debounced reconciliation pass
    Reconcile,
    /// End of a click-to-reveal window
    Reblur { node: N, token: u64 },
    /// Settle delay before scrolling to a highlighted deep-link target
    ScrollIntoView(N),
    /// Re-read the deep-link target after a navigation
    RecheckTarget,
    /// Revert a transient confirmation label
    RestoreLabel { node: N, text: String },
}

#[derive(Debug, Clone)]
struct Timer<N> {
    due: u64,
    seq: u64,
    task: Task<N>,
}

#[derive(Debug, Clone)]
pub struct Scheduler<N> {
    /// Deadline and sequence number of the pending reconcile
    debounce: Option<(u64, u64)>,
    timers: Vec<Timer<N>>,
    seq: u64,
}

impl<N> Default for Scheduler<N> {
    fn default() -> Self {
        Self {
            debounce: None,
            timers: Vec::new(),
            seq: 0,
        }
    }
}

impl<N> Scheduler<N> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Request a reconciliation pass `window` ms from `now`, cancelling any
    /// pending request.
    pub fn request_reconcile(&mut self, now: u64, window: u64) {
        let seq = self.next_seq();
        self.debounce = Some((now.saturating_add(window), seq));
    }

    pub fn reconcile_pending(&self) -> bool {
        self.debounce.is_some()
    }

    pub fn cancel_reconcile(&mut self) {
        self.debounce = None;
    }

    pub fn schedule(&mut self, now: u64, delay: u64, task: Task<N>) {
        if matches!(task, Task::Reconcile) {
            self.request_reconcile(now, delay);
            return;
        }
        let seq = self.next_seq();
        self.timers.push(Timer {
            due: now.saturating_add(delay),
            seq,
            task,
        });
    }

    /// Earliest deadline of any pending task.
    pub fn next_deadline(&self) -> Option<u64> {
        let timers = self.timers.iter().map(|timer| timer.due).min();
        match (self.debounce.map(|(due, _)| due), timers) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Remove and return every task due at `now`, in deadline order.
    pub fn take_due(&mut self, now: u64) -> Vec<Task<N>> {
        let mut due: Vec<Timer<N>> = Vec::new();
        let mut index = 0;
        while index < self.timers.len() {
            if self.timers[index].due <= now {
                due.push(self.timers.swap_remove(index));
            } else {
                index += 1;
            }
        }
        if let Some((deadline, seq)) = self.debounce {
            if deadline <= now {
                self.debounce = None;
                due.push(Timer {
                    due: deadline,
                    seq,
                    task: Task::Reconcile,
                });
            }
        }
        due.sort_by_key(|timer| (timer.due, timer.seq));
        due.into_iter().map(|timer| timer.task).collect()
    }

    /// Drop pending one-shot tasks that do not satisfy `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Task<N>) -> bool) {
        self.timers.retain(|timer| keep(&timer.task));
    }

    /// Number of pending tasks, the debounce slot included.
    pub fn len(&self) -> usize {
        self.timers.len() + usize::from(self.debounce.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
