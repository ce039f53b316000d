//! Sleep-until-then-fire tasks.
//!
//! Every action of a start cycle is its own task that waits for the shared
//! fire instant. The cycle's cancellation token races the wait: an action
//! cancelled before it fires never runs, one that has already fired runs to
//! completion.

use std::fmt;
use std::future::Future;

use syncrec_core::{DeviceKey, TransportTarget};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Whether an action starts or stops recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Start,
    Stop,
}

/// What an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    Device(DeviceKey),
    Transport(TransportTarget),
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(key) => write!(f, "device {key}"),
            Self::Transport(target) => write!(f, "transport {target}"),
        }
    }
}

/// One deferred command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledAction {
    pub target: ActionTarget,
    pub fire_at: Instant,
    pub kind: ActionKind,
}

/// How an action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed(String),
    /// Cancelled before its fire instant; the command was never sent.
    Cancelled,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// A spawned action.
#[derive(Debug)]
pub struct ScheduledTask {
    action: ScheduledAction,
    handle: JoinHandle<ActionOutcome>,
}

impl ScheduledTask {
    pub fn action(&self) -> &ScheduledAction {
        &self.action
    }

    /// Waits for the action to finish.
    pub async fn outcome(self) -> (ScheduledAction, ActionOutcome) {
        let outcome = match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::Failed(format!("action task failed: {e}")),
        };
        (self.action, outcome)
    }
}

/// Spawns `run` to execute at `action.fire_at` unless `token` is cancelled first.
pub fn schedule<F, Fut>(action: ScheduledAction, token: CancellationToken, run: F) -> ScheduledTask
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ActionOutcome> + Send + 'static,
{
    schedule_prepared(action, token, async {}, move |()| run())
}

/// Like [`schedule`], but awaits `prepare` immediately and hands its output
/// to `run` at the fire instant.
///
/// Slow setup (name resolution, socket binding) goes in `prepare` so it
/// overlaps the lead time instead of delaying the command.
pub fn schedule_prepared<P, T, F, Fut>(
    action: ScheduledAction,
    token: CancellationToken,
    prepare: P,
    run: F,
) -> ScheduledTask
where
    P: Future<Output = T> + Send + 'static,
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ActionOutcome> + Send + 'static,
{
    let fire_at = action.fire_at;
    let handle = tokio::spawn(async move {
        let prepared = tokio::select! {
            biased;

            _ = token.cancelled() => return ActionOutcome::Cancelled,
            prepared = async {
                let prepared = prepare.await;
                sleep_until(fire_at).await;
                prepared
            } => prepared,
        };
        run(prepared).await
    });

    ScheduledTask { action, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn action(fire_at: Instant) -> ScheduledAction {
        ScheduledAction {
            target: ActionTarget::Device(DeviceKey::new("host1", 1)),
            fire_at,
            kind: ActionKind::Start,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_instant() {
        let fire_at = Instant::now() + Duration::from_secs(5);
        let task = schedule(action(fire_at), CancellationToken::new(), move || async move {
            assert!(Instant::now() >= fire_at);
            ActionOutcome::Succeeded
        });

        let (_, outcome) = task.outcome().await;
        assert_eq!(outcome, ActionOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire_skips_action() {
        let fire_at = Instant::now() + Duration::from_secs(5);
        let token = CancellationToken::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_task = Arc::clone(&ran);
        let task = schedule(action(fire_at), token.clone(), move || async move {
            ran_in_task.store(true, Ordering::SeqCst);
            ActionOutcome::Succeeded
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let (_, outcome) = task.outcome().await;
        assert_eq!(outcome, ActionOutcome::Cancelled);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_runs_before_fire_instant() {
        let scheduled_at = Instant::now();
        let fire_at = scheduled_at + Duration::from_secs(5);

        let task = schedule_prepared(
            action(fire_at),
            CancellationToken::new(),
            async move {
                // Setup taking most of the lead time does not push the fire back.
                tokio::time::sleep(Duration::from_secs(3)).await;
                Instant::now()
            },
            move |prepared_at| async move {
                assert!(prepared_at >= scheduled_at + Duration::from_secs(3));
                assert!(prepared_at < fire_at);
                let now = Instant::now();
                assert!(now >= fire_at && now < fire_at + Duration::from_millis(10));
                ActionOutcome::Succeeded
            },
        );

        let (_, outcome) = task.outcome().await;
        assert_eq!(outcome, ActionOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_prepare_skips_action() {
        let fire_at = Instant::now() + Duration::from_secs(5);
        let token = CancellationToken::new();
        let task = schedule_prepared(
            action(fire_at),
            token.clone(),
            std::future::pending::<()>(),
            |()| async { ActionOutcome::Succeeded },
        );

        token.cancel();
        let (_, outcome) = task.outcome().await;
        assert_eq!(outcome, ActionOutcome::Cancelled);
    }

    #[test]
    fn test_target_display() {
        let target = ActionTarget::Device(DeviceKey::new("10.0.0.2", 4455));
        assert_eq!(target.to_string(), "device 10.0.0.2:4455");
    }
}
