use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::environment::GameEnvironment;
use crate::core::error::{ManagerError, ManagerResult};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Cached "is the game running" answer, refreshed on a timer.
pub struct GameWatch {
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl GameWatch {
    /// Watch that never reports the game as running.
    pub fn idle() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Poll `env` every `interval` on the current tokio runtime.
    ///
    /// The first answer is taken synchronously so the watch is accurate as
    /// soon as it exists; later checks run on the blocking pool.
    pub fn spawn(env: Arc<dyn GameEnvironment>, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(env.is_game_running()));
        let flag = running.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let game = env.clone();
                let checked = tokio::task::spawn_blocking(move || game.is_game_running()).await;
                let now = match checked {
                    Ok(now) => now,
                    Err(e) => {
                        warn!("Game process check failed: {}", e);
                        continue;
                    }
                };
                if flag.swap(now, Ordering::Relaxed) != now {
                    info!("Game running: {}", now);
                }
            }
        });

        Self {
            running,
            task: Some(task),
        }
    }

    pub fn is_game_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn ensure_not_running(&self) -> ManagerResult<()> {
        if self.is_game_running() {
            return Err(ManagerError::GameRunning);
        }
        Ok(())
    }
}

impl Drop for GameWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
