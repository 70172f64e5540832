//! Pool of warm sandbox executors shared across queries.

use super::executor::{SandboxConfig, SandboxExecutor};
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

struct PoolState {
    idle: VecDeque<SandboxExecutor>,
}

/// Maintains up to `pool_size` warm executors. `acquire`/`release` are the
/// only mutation points; every successful `acquire` must be matched by
/// exactly one `release` on all exit paths.
pub struct ContainerPool {
    config: SandboxConfig,
    state: Mutex<PoolState>,
    permits: Arc<Semaphore>,
}

impl ContainerPool {
    pub fn new(config: SandboxConfig, pool_size: usize) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
            }),
            permits: Arc::new(Semaphore::new(pool_size)),
        }
    }

    /// Acquire an idle live executor, spawning a replacement for any dead
    /// one found, or block until one is released if the pool is at capacity.
    pub async fn acquire(&self) -> Result<SandboxExecutor> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        loop {
            let mut state = self.state.lock().await;
            let next = state.idle.pop_front();
            drop(state);
            match next {
                Some(mut executor) => {
                    if executor.is_alive() {
                        permit.forget();
                        return Ok(executor);
                    }
                    executor.stop().await;
                    // dead executor discarded; loop to check for another idle one
                }
                None => {
                    return match SandboxExecutor::spawn(self.config.clone()) {
                        Ok(executor) => {
                            permit.forget();
                            Ok(executor)
                        }
                        Err(e) => Err(e),
                    };
                }
            }
        }
    }

    /// Release a checked-out executor. A dead executor is discarded; a live
    /// one is reset to a clean namespace and returned to the idle set.
    pub async fn release(&self, mut executor: SandboxExecutor) {
        if executor.is_alive() && executor.reset().await.is_ok() {
            let mut state = self.state.lock().await;
            state.idle.push_back(executor);
        } else {
            executor.stop().await;
        }
        self.permits.add_permits(1);
    }

    /// Stop every idle executor and release all capacity. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        while let Some(mut executor) = state.idle.pop_front() {
            executor.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> SandboxConfig {
        SandboxConfig {
            command: vec!["cat".to_string()],
            execution_timeout: Duration::from_secs(1),
            max_output_chars: 1_000,
        }
    }

    #[tokio::test]
    async fn acquire_spawns_up_to_capacity_without_blocking() {
        let pool = ContainerPool::new(test_config(), 2);
        let e1 = pool.acquire().await.unwrap();
        let e2 = pool.acquire().await.unwrap();
        pool.release(e1).await;
        pool.release(e2).await;
    }

    #[tokio::test]
    async fn release_returns_executor_to_idle_set_for_reuse() {
        let pool = ContainerPool::new(test_config(), 1);
        let e1 = pool.acquire().await.unwrap();
        pool.release(e1).await;
        // second acquire must not block since the first was released
        let e2 = tokio::time::timeout(Duration::from_secs(2), pool.acquire())
            .await
            .expect("acquire should not block after release")
            .unwrap();
        pool.release(e2).await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let pool = ContainerPool::new(test_config(), 1);
        pool.shutdown().await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn a_spawn_failure_does_not_leak_the_permit() {
        let bad_config = SandboxConfig {
            command: vec!["this-command-does-not-exist-anywhere".to_string()],
            execution_timeout: Duration::from_secs(1),
            max_output_chars: 1_000,
        };
        let pool = ContainerPool::new(bad_config, 1);

        assert!(pool.acquire().await.is_err());

        // if the failed acquire above leaked its permit, this second call
        // would block forever on the exhausted semaphore instead of failing
        // quickly on the same bad spawn.
        let second = tokio::time::timeout(Duration::from_secs(2), pool.acquire()).await;
        assert!(second.is_ok(), "acquire should not be starved by a prior spawn failure");
    }
}
