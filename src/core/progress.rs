use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{ManagerError, ManagerResult};

/// Observer for long-running operations. Values live in `[0, 1]`.
pub trait Progress: Send + Sync {
    fn set_value(&self, value: f64);
    /// Returns false if an operation is already reporting through this channel.
    fn start(&self) -> bool;
    fn done(&self);
    fn get_value(&self) -> f64;
}

#[derive(Debug, Default)]
struct TrackerState {
    value: f64,
    active: bool,
}

/// In-process progress channel polled by the UI.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

impl Progress for ProgressTracker {
    fn set_value(&self, value: f64) {
        self.state.lock().value = value.clamp(0.0, 1.0);
    }

    fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.active {
            return false;
        }
        state.active = true;
        state.value = 0.0;
        true
    }

    fn done(&self) {
        let mut state = self.state.lock();
        state.value = 1.0;
        state.active = false;
    }

    fn get_value(&self) -> f64 {
        self.state.lock().value
    }
}

/// Maps a sub-task's local `[0, 1]` onto a window of a parent channel.
///
/// A missing parent discards every update.
#[derive(Clone, Copy)]
pub struct ProgressSpan<'a> {
    target: Option<&'a dyn Progress>,
    offset: f64,
    width: f64,
}

impl<'a> ProgressSpan<'a> {
    pub fn new(target: Option<&'a dyn Progress>) -> Self {
        Self {
            target,
            offset: 0.0,
            width: 1.0,
        }
    }

    /// Window `[from, from + width)` of this span, in local units.
    pub fn sub(&self, from: f64, width: f64) -> Self {
        Self {
            target: self.target,
            offset: self.offset + self.width * from,
            width: self.width * width,
        }
    }

    pub fn set(&self, local: f64) {
        if let Some(target) = self.target {
            target.set_value(self.offset + self.width * local.clamp(0.0, 1.0));
        }
    }
}

/// Marks a channel active for the lifetime of one operation.
///
/// Dropping the guard calls `done()`, whichever way the operation ended.
pub struct ProgressRun<'a> {
    target: Option<&'a dyn Progress>,
}

impl<'a> ProgressRun<'a> {
    pub fn start(target: Option<&'a dyn Progress>) -> ManagerResult<Self> {
        if let Some(progress) = target {
            if !progress.start() {
                return Err(ManagerError::AlreadyRunning);
            }
        }
        Ok(Self { target })
    }

    pub fn span(&self) -> ProgressSpan<'a> {
        ProgressSpan::new(self.target)
    }
}

impl Drop for ProgressRun<'_> {
    fn drop(&mut self) {
        if let Some(progress) = self.target {
            progress.done();
        }
    }
}

/// Cooperative cancellation flag checked between I/O units.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> ManagerResult<()> {
        if self.is_cancelled() {
            return Err(ManagerError::Cancelled);
        }
        Ok(())
    }
}
