//! Signals and cooperative cancellation
//!
//! Jobs are never torn down from outside. A signal flips state on the job's
//! [`JobControl`]; the job notices at its next suspension point, where
//! [`JobControl::checkpoint`] either lets it continue, parks it while paused,
//! or returns [`Cancelled`].
//!
//! ## Signal Numbers
//!
//! `kill` accepts names (`KILL`, `SIGKILL`) or the usual POSIX numbers:
//!
//! | Signal  | Number | Effect on a job |
//! |---------|--------|-----------------|
//! | SIGINT  | 2      | cancel          |
//! | SIGKILL | 9      | cancel          |
//! | SIGTERM | 15     | cancel          |
//! | SIGCONT | 18     | resume          |
//! | SIGSTOP | 19     | pause           |

use pin_project_lite::pin_project;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use thiserror::Error;

/// Signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Interrupt (Ctrl+C)
    SIGINT,
    /// Kill job (cannot be ignored)
    SIGKILL,
    /// Terminate job
    SIGTERM,
    /// Continue stopped job
    SIGCONT,
    /// Stop job
    SIGSTOP,
}

impl Signal {
    /// Parse `KILL`, `SIGKILL`, `kill` or `9`
    pub fn parse(s: &str) -> Option<Signal> {
        if let Ok(n) = s.parse::<u8>() {
            return Signal::from_num(n);
        }
        let upper = s.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "INT" => Some(Signal::SIGINT),
            "KILL" => Some(Signal::SIGKILL),
            "TERM" => Some(Signal::SIGTERM),
            "CONT" => Some(Signal::SIGCONT),
            "STOP" => Some(Signal::SIGSTOP),
            _ => None,
        }
    }

    /// Get signal from number
    pub fn from_num(n: u8) -> Option<Signal> {
        match n {
            2 => Some(Signal::SIGINT),
            9 => Some(Signal::SIGKILL),
            15 => Some(Signal::SIGTERM),
            18 => Some(Signal::SIGCONT),
            19 => Some(Signal::SIGSTOP),
            _ => None,
        }
    }

    /// Get signal number
    pub fn num(&self) -> u8 {
        match self {
            Signal::SIGINT => 2,
            Signal::SIGKILL => 9,
            Signal::SIGTERM => 15,
            Signal::SIGCONT => 18,
            Signal::SIGSTOP => 19,
        }
    }

    /// Get default action for this signal
    pub fn default_action(&self) -> SignalAction {
        match self {
            Signal::SIGINT | Signal::SIGKILL | Signal::SIGTERM => SignalAction::Cancel,
            Signal::SIGSTOP => SignalAction::Pause,
            Signal::SIGCONT => SignalAction::Resume,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::SIGINT => write!(f, "SIGINT"),
            Signal::SIGKILL => write!(f, "SIGKILL"),
            Signal::SIGTERM => write!(f, "SIGTERM"),
            Signal::SIGCONT => write!(f, "SIGCONT"),
            Signal::SIGSTOP => write!(f, "SIGSTOP"),
        }
    }
}

/// Action to take when a signal is received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Cancel,
    Pause,
    Resume,
}

/// Returned from a suspension point of a cancelled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct ControlState {
    cancelled: Cell<bool>,
    paused: Cell<bool>,
    waiters: RefCell<Vec<Waker>>,
}

/// Cancel/pause signal shared between a job and whoever controls it
#[derive(Debug, Clone, Default)]
pub struct JobControl {
    state: Rc<ControlState>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.state.cancelled.replace(true) {
            log::debug!("job cancelled");
        }
        self.wake_all();
    }

    pub fn pause(&self) {
        self.state.paused.set(true);
    }

    pub fn resume(&self) {
        self.state.paused.set(false);
        self.wake_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.get()
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.get() && !self.is_cancelled()
    }

    /// Apply a signal's default action
    pub fn deliver(&self, signal: Signal) -> SignalAction {
        let action = signal.default_action();
        match action {
            SignalAction::Cancel => self.cancel(),
            SignalAction::Pause => self.pause(),
            SignalAction::Resume => self.resume(),
        }
        action
    }

    /// Non-suspending check
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }

    /// Suspension point: fails when cancelled, parks while paused
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            control: self.clone(),
        }
    }

    /// Run `future` so that cancelling this control aborts it
    pub fn guard<F: Future>(&self, future: F) -> Cancellable<F> {
        Cancellable {
            inner: future,
            control: self.clone(),
        }
    }

    fn register(&self, waker: &Waker) {
        let mut waiters = self.state.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    fn wake_all(&self) {
        let waiters: Vec<Waker> = self.state.waiters.borrow_mut().drain(..).collect();
        for waker in waiters {
            waker.wake();
        }
    }
}

/// Future returned by [`JobControl::checkpoint`]
pub struct Checkpoint {
    control: JobControl,
}

impl Future for Checkpoint {
    type Output = Result<(), Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.control.is_cancelled() {
            return Poll::Ready(Err(Cancelled));
        }
        if self.control.is_paused() {
            self.control.register(cx.waker());
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }
}

pin_project! {
    /// A future that resolves to `Err(Cancelled)` as soon as its control is
    /// cancelled, and stops being polled while paused
    pub struct Cancellable<F> {
        #[pin]
        inner: F,
        control: JobControl,
    }
}

impl<F: Future> Future for Cancellable<F> {
    type Output = Result<F::Output, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.control.is_cancelled() {
            return Poll::Ready(Err(Cancelled));
        }
        if this.control.is_paused() {
            this.control.register(cx.waker());
            return Poll::Pending;
        }
        match this.inner.poll(cx) {
            Poll::Ready(out) => Poll::Ready(Ok(out)),
            Poll::Pending => {
                this.control.register(cx.waker());
                Poll::Pending
            }
        }
    }
}

/// Yield once to the scheduler
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Voluntary yield every `interval` steps of a loop
#[derive(Debug)]
pub struct Yielder {
    interval: usize,
    steps: usize,
}

impl Yielder {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            steps: 0,
        }
    }

    pub async fn step(&mut self, control: &JobControl) -> Result<(), Cancelled> {
        self.steps += 1;
        if self.steps % self.interval == 0 {
            yield_now().await;
            control.checkpoint().await?;
        }
        control.check()
    }
}
