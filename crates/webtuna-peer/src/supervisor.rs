use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PeerError;

/// Delay between a closed or failed Channel and the next attempt.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Lifecycle of the supervised Channel.
///
/// `Closed` is also the state before the first attempt and between
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Open,
    Closed,
}

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed delay before every reconnect. There is no backoff and no
    /// attempt cap.
    pub retry_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_delay: RETRY_DELAY,
        }
    }
}

/// How one supervision cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The Channel could not be established.
    EstablishFailed,
    /// The Channel was established, served, and has closed.
    Closed,
}

/// Keeps the connecting side's Channel alive.
///
/// Each cycle calls `establish`; on success the Channel is handed to
/// `serve`, which returns once the Channel has ended and its session is
/// torn down. Whatever the outcome, the next cycle starts after
/// `retry_delay`.
pub struct ConnectionSupervisor<E, F> {
    establish: E,
    serve: F,
    config: SupervisorConfig,
    state: watch::Sender<SupervisorState>,
}

impl<E, EF, C, F, SF> ConnectionSupervisor<E, F>
where
    E: Fn() -> EF,
    EF: Future<Output = Result<C, PeerError>>,
    F: Fn(C) -> SF,
    SF: Future<Output = ()>,
{
    pub fn new(establish: E, serve: F) -> Self {
        Self::with_config(establish, serve, SupervisorConfig::default())
    }

    pub fn with_config(establish: E, serve: F, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Closed);
        Self {
            establish,
            serve,
            config,
            state,
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Perform one Connecting -> (Open ->) Closed transition. Never sleeps.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.state.send_replace(SupervisorState::Connecting);
        match (self.establish)().await {
            Ok(channel) => {
                self.state.send_replace(SupervisorState::Open);
                info!("connected to remote peer");
                (self.serve)(channel).await;
                self.state.send_replace(SupervisorState::Closed);
                info!("connection closed");
                CycleOutcome::Closed
            }
            Err(err) => {
                self.state.send_replace(SupervisorState::Closed);
                warn!(error = %err, "connection error");
                CycleOutcome::EstablishFailed
            }
        }
    }

    /// Run cycles until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.run_cycle() => {}
            }
            info!(delay = ?self.config.retry_delay, "retrying connection");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
        self.state.send_replace(SupervisorState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::Notify;

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test]
    async fn failed_establish_ends_closed() {
        let supervisor = ConnectionSupervisor::new(
            || async { Err::<(), _>(PeerError::Disconnected("down".to_string())) },
            |_: ()| async {},
        );
        assert_eq!(supervisor.state(), SupervisorState::Closed);
        assert_eq!(supervisor.run_cycle().await, CycleOutcome::EstablishFailed);
        assert_eq!(supervisor.state(), SupervisorState::Closed);
    }

    #[tokio::test]
    async fn cycle_walks_connecting_open_closed() {
        let go = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let supervisor = Arc::new(ConnectionSupervisor::new(
            {
                let go = go.clone();
                move || {
                    let go = go.clone();
                    async move {
                        go.notified().await;
                        Ok::<_, PeerError>(7u32)
                    }
                }
            },
            {
                let release = release.clone();
                move |channel: u32| {
                    let release = release.clone();
                    async move {
                        assert_eq!(channel, 7);
                        release.notified().await;
                    }
                }
            },
        ));
        let mut states = supervisor.subscribe();
        let cycle = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run_cycle().await }
        });

        states
            .wait_for(|state| *state == SupervisorState::Connecting)
            .await
            .unwrap();
        go.notify_one();
        states
            .wait_for(|state| *state == SupervisorState::Open)
            .await
            .unwrap();
        release.notify_one();

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Closed);
        assert_eq!(supervisor.state(), SupervisorState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_fixed_delay() {
        let attempts = counter();
        let token = CancellationToken::new();
        let task = {
            let attempts = attempts.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let supervisor = ConnectionSupervisor::new(
                    move || {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(PeerError::Disconnected("down".to_string())) }
                    },
                    |_: ()| async {},
                );
                supervisor.run(token).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1980)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        // Still 2 s later, no backoff growth.
        tokio::time::sleep(RETRY_DELAY).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn delay_follows_channel_close() {
        let attempts = counter();
        let token = CancellationToken::new();
        let task = {
            let attempts = attempts.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let supervisor = ConnectionSupervisor::new(
                    move || {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        async { Ok::<_, PeerError>(()) }
                    },
                    |_: ()| tokio::time::sleep(Duration::from_secs(60)),
                );
                supervisor.run(token).await;
            })
        };

        // Open for 60 s, then 2 s of delay before the second attempt.
        tokio::time::sleep(Duration::from_millis(61_990)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_open_channel() {
        let token = CancellationToken::new();
        let supervisor = ConnectionSupervisor::with_config(
            || async { Ok::<_, PeerError>(()) },
            |_: ()| std::future::pending::<()>(),
            SupervisorConfig {
                retry_delay: Duration::from_millis(500),
            },
        );
        assert_eq!(supervisor.config().retry_delay, Duration::from_millis(500));

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            stopper.cancel();
        });
        supervisor.run(token).await;
        assert_eq!(supervisor.state(), SupervisorState::Closed);
    }
}
