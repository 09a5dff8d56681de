//! Timer System
//!
//! Provides timers for delayed execution and sleep functionality.
//!
//! Design:
//! - TimerQueue is a min-heap sorted by deadline
//! - Each timer wakes the future sleeping on it when it expires
//! - Time is virtual: the host advances it (rAF timestamp in the browser,
//!   fast-forward to the next deadline for synchronous hosts)

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Timer is active and waiting
    Pending,
    /// Timer has fired
    Fired,
    /// Timer was cancelled
    Cancelled,
}

/// A timer that fires at a specific deadline
#[derive(Debug)]
pub struct Timer {
    pub id: TimerId,
    /// When this timer should fire (milliseconds on the virtual clock)
    pub deadline: f64,
    pub state: TimerState,
    waker: Option<Waker>,
}

impl Timer {
    fn new(id: TimerId, deadline: f64) -> Self {
        Self {
            id,
            deadline,
            state: TimerState::Pending,
            waker: None,
        }
    }

    /// Check if timer has expired
    pub fn is_expired(&self, now: f64) -> bool {
        self.state == TimerState::Pending && now >= self.deadline
    }
}

/// Entry in the timer heap (for ordering)
#[derive(Debug)]
struct TimerEntry {
    deadline: f64,
    id: TimerId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest deadline first, then oldest)
        other
            .deadline
            .partial_cmp(&self.deadline)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Timer queue - manages all active timers
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    timers: HashMap<TimerId, Timer>,
    next_id: u64,
    now: f64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Schedule a one-shot timer `delay_ms` from now
    pub fn schedule(&mut self, delay_ms: f64) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let deadline = self.now + delay_ms.max(0.0);
        self.heap.push(TimerEntry { deadline, id });
        self.timers.insert(id, Timer::new(id, deadline));
        id
    }

    /// Remember who to wake when `id` fires
    pub fn register(&mut self, id: TimerId, waker: &Waker) {
        if let Some(timer) = self.timers.get_mut(&id) {
            timer.waker = Some(waker.clone());
        }
    }

    /// Returns true if the timer was pending and is now cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.get_mut(&id) {
            Some(timer) if timer.state == TimerState::Pending => {
                timer.state = TimerState::Cancelled;
                timer.waker = None;
                true
            }
            _ => false,
        }
    }

    /// Check if a timer exists and is pending
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers
            .get(&id)
            .is_some_and(|t| t.state == TimerState::Pending)
    }

    /// Advance the clock to `now` and fire expired timers.
    /// Returns the number of timers fired. Time never moves backwards.
    pub fn advance(&mut self, now: f64) -> usize {
        if now > self.now {
            self.now = now;
        }
        let mut fired = 0;

        while let Some(entry) = self.heap.peek() {
            if entry.deadline > self.now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };

            if let Some(timer) = self.timers.get_mut(&entry.id)
                && timer.is_expired(self.now)
            {
                timer.state = TimerState::Fired;
                if let Some(waker) = timer.waker.take() {
                    waker.wake();
                }
                fired += 1;
            }
        }

        // Fired timers stay visible until their sleeper has observed them
        self.timers.retain(|_, t| t.state != TimerState::Cancelled);
        fired
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<f64> {
        self.timers
            .values()
            .filter(|t| t.state == TimerState::Pending)
            .map(|t| t.deadline)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
    }

    /// Get time until next timer fires
    pub fn time_until_next(&self) -> Option<f64> {
        self.next_deadline().map(|d| (d - self.now).max(0.0))
    }

    /// Number of pending timers
    pub fn pending_count(&self) -> usize {
        self.timers
            .values()
            .filter(|t| t.state == TimerState::Pending)
            .count()
    }

    /// Forget a timer whatever its state
    fn release(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    fn take_fired(&mut self, id: TimerId) -> bool {
        match self.timers.get(&id) {
            Some(t) if t.state == TimerState::Fired => {
                self.timers.remove(&id);
                true
            }
            None => true,
            _ => false,
        }
    }
}

/// Shared handle to the virtual clock
#[derive(Debug, Clone, Default)]
pub struct Timers {
    queue: Rc<RefCell<TimerQueue>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.queue.borrow().now()
    }

    pub fn advance(&self, now: f64) -> usize {
        self.queue.borrow_mut().advance(now)
    }

    /// Jump the clock to the next deadline. Returns false when nothing is pending.
    pub fn advance_to_next(&self) -> bool {
        let next = self.queue.borrow().next_deadline();
        match next {
            Some(deadline) => {
                self.advance(deadline);
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.borrow().pending_count()
    }

    pub fn time_until_next(&self) -> Option<f64> {
        self.queue.borrow().time_until_next()
    }

    /// A future completing `ms` milliseconds of virtual time from now
    pub fn sleep(&self, ms: f64) -> Sleep {
        let id = self.queue.borrow_mut().schedule(ms);
        Sleep {
            queue: self.queue.clone(),
            id,
        }
    }
}

/// Future returned by [`Timers::sleep`]; dropping it cancels the timer
pub struct Sleep {
    queue: Rc<RefCell<TimerQueue>>,
    id: TimerId,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut queue = self.queue.borrow_mut();
        if queue.take_fired(self.id) {
            return Poll::Ready(());
        }
        queue.register(self.id, cx.waker());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Ok(mut queue) = self.queue.try_borrow_mut() {
            queue.release(self.id);
        }
    }
}
