//! Running device actions
//!
//! Each execution is a spawned task holding the session queue and a refresher
//! blocker for its whole run. States go through a `StateEmitter` that lets
//! exactly one terminal state through. Cancelling aborts the task; the queue
//! slot and the blocker are released when the aborted future is dropped, and
//! `Error(UserCancelled)` is published after that. An APDU already on the link
//! when the action is aborted is still answered by the device; the connection
//! discards that answer so later exchanges stay in step.

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    Stream,
    future::{AbortHandle, Abortable},
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{
    DeviceAction, DeviceActionError, DeviceActionState,
    context::{ActionContext, InternalApi, PendingSink},
};
use crate::session::{DeviceSession, IntentType};

struct EmitterState<O, I> {
    tx: Option<mpsc::UnboundedSender<DeviceActionState<O, I>>>,
    cancelled: bool,
}

/// Gate between a running action and its subscriber
///
/// After `cancel` only the final `Error(UserCancelled)` gets through; after
/// any terminal state nothing does.
struct StateEmitter<O, I> {
    action: &'static str,
    state: Mutex<EmitterState<O, I>>,
}

impl<O: Send, I: Send> StateEmitter<O, I> {
    fn new(action: &'static str, tx: mpsc::UnboundedSender<DeviceActionState<O, I>>) -> Self {
        Self {
            action,
            state: Mutex::new(EmitterState {
                tx: Some(tx),
                cancelled: false,
            }),
        }
    }

    /// Publish the terminal state, replaced by `Error(UserCancelled)` when
    /// cancellation came first
    fn finish(&self, outcome: Result<O, DeviceActionError>) {
        let mut state = self.state.lock();
        let Some(tx) = state.tx.take() else {
            debug!(action = self.action, "Terminal state already published");
            return;
        };
        let terminal = match outcome {
            _ if state.cancelled => DeviceActionState::Error(DeviceActionError::UserCancelled),
            Ok(output) => DeviceActionState::Completed(output),
            Err(e) => DeviceActionState::Error(e),
        };
        // The subscriber may be gone
        let _ = tx.send(terminal);
    }

    /// Stop publishing anything but the cancellation. Returns `false` when the
    /// action already finished.
    fn mark_cancelled(&self) -> bool {
        let mut state = self.state.lock();
        if state.tx.is_none() || state.cancelled {
            return false;
        }
        state.cancelled = true;
        true
    }
}

impl<O: Send, I: Send> PendingSink<I> for StateEmitter<O, I> {
    fn pending(&self, value: I) -> bool {
        let state = self.state.lock();
        match &state.tx {
            Some(tx) if !state.cancelled => {
                let _ = tx.send(DeviceActionState::Pending(value));
                true
            }
            _ => false,
        }
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self) -> bool;
}

impl<O: Send, I: Send> Cancel for StateEmitter<O, I> {
    fn cancel(&self) -> bool {
        self.mark_cancelled()
    }
}

/// Handle cancelling one device action
#[derive(Clone)]
pub struct CancelHandle {
    action: &'static str,
    abort: AbortHandle,
    emitter: Arc<dyn Cancel>,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("action", &self.action)
            .field("aborted", &self.abort.is_aborted())
            .finish()
    }
}

impl CancelHandle {
    /// Cancel the action. Safe to call at any point and more than once; has no
    /// effect once the action finished.
    pub fn cancel(&self) {
        if self.emitter.cancel() {
            info!(action = self.action, "Cancelling device action");
        }
        self.abort.abort();
    }
}

/// States of one device action, ending after the terminal state
#[derive(Debug)]
pub struct DeviceActionStream<O, I> {
    rx: mpsc::UnboundedReceiver<DeviceActionState<O, I>>,
}

impl<O, I> DeviceActionStream<O, I> {
    /// Skip the pending states and return the outcome
    pub async fn outcome(mut self) -> Result<O, DeviceActionError> {
        while let Some(state) = self.rx.recv().await {
            match state {
                DeviceActionState::Pending(_) => {}
                DeviceActionState::Completed(output) => return Ok(output),
                DeviceActionState::Error(e) => return Err(e),
            }
        }
        Err(DeviceActionError::SessionClosed)
    }
}

impl<O, I> Stream for DeviceActionStream<O, I> {
    type Item = DeviceActionState<O, I>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// What [`DeviceActionEngine::execute`] returns
#[derive(Debug)]
pub struct ExecuteDeviceActionReturnType<O, I> {
    /// The action's states
    pub observable: DeviceActionStream<O, I>,
    /// Cancels the action
    pub cancel: CancelHandle,
}

/// Runs device actions on sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceActionEngine;

impl DeviceActionEngine {
    /// Start `action` on `session`.
    ///
    /// The action waits for its turn in the session queue, pauses the
    /// refresher, then runs. Must be called within a tokio runtime.
    pub fn execute<A: DeviceAction>(
        session: &DeviceSession,
        action: A,
    ) -> ExecuteDeviceActionReturnType<A::Output, A::Intermediate> {
        let name = action.name();
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Arc::new(StateEmitter::new(name, tx));
        let (abort, registration) = AbortHandle::new_pair();

        let ctx = ActionContext::new(
            InternalApi::new(session.clone()),
            emitter.clone() as Arc<dyn PendingSink<A::Intermediate>>,
        );
        let run = run_action(session.clone(), action, ctx);
        let span = info_span!("device_action", action = name, session = %session.id());
        let task_emitter = emitter.clone();
        tokio::spawn(
            async move {
                // The action future, with its queue slot and blocker, is dropped
                // before the terminal state goes out
                let outcome = Abortable::new(run, registration).await;
                match outcome {
                    Ok(outcome) => {
                        match &outcome {
                            Ok(output) => info!(?output, "Device action completed"),
                            Err(e) => warn!(error = %e, "Device action failed"),
                        }
                        task_emitter.finish(outcome);
                    }
                    Err(_) => {
                        info!("Device action cancelled");
                        task_emitter.finish(Err(DeviceActionError::UserCancelled));
                    }
                }
            }
            .instrument(span),
        );

        ExecuteDeviceActionReturnType {
            observable: DeviceActionStream { rx },
            cancel: CancelHandle {
                action: name,
                abort,
                emitter,
            },
        }
    }
}

async fn run_action<A: DeviceAction>(
    session: DeviceSession,
    action: A,
    ctx: ActionContext<A::Intermediate>,
) -> Result<A::Output, DeviceActionError> {
    let _intent = session.queue().enqueue(IntentType::DeviceAction).await;
    if session.is_closed() {
        return Err(DeviceActionError::SessionClosed);
    }
    let blocker = session.disable_refresher(action.name())?;
    debug!("Device action started");

    let outcome = action.run(ctx).await;

    if let Err(e) = blocker.release() {
        error!(error = %e, "Failed to resume refresher");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use nexum_apdu_core::DeviceModelId;
    use nexum_device_transport::{
        DeviceId, InMemoryMockServer, MockDeviceInfo, MockTransport, Transport,
    };

    use super::*;
    use crate::{action::UserInteractionRequired, config::KitConfig};

    #[derive(Debug)]
    struct Scripted {
        steps: usize,
        fail: bool,
    }

    #[async_trait]
    impl DeviceAction for Scripted {
        type Output = usize;
        type Intermediate = UserInteractionRequired;

        fn name(&self) -> &'static str {
            "Scripted"
        }

        async fn run(
            self,
            ctx: ActionContext<UserInteractionRequired>,
        ) -> Result<usize, DeviceActionError> {
            for _ in 0..self.steps {
                ctx.pending(UserInteractionRequired::None);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            if self.fail {
                return Err(DeviceActionError::RefusedByUser);
            }
            Ok(self.steps)
        }
    }

    async fn session() -> DeviceSession {
        let server = InMemoryMockServer::new().with_device(MockDeviceInfo {
            id: DeviceId::from("mock"),
            name: "Mock".to_string(),
            model: DeviceModelId::Flex,
        });
        let device = MockTransport::new(Arc::new(server))
            .connect(&DeviceId::from("mock"), Arc::new(|_| {}))
            .await
            .unwrap();
        DeviceSession::new(device, KitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_terminal_state() {
        let session = session().await;
        let execution = session.execute_device_action(Scripted {
            steps: 2,
            fail: false,
        });
        let states: Vec<_> = execution.observable.collect().await;
        assert_eq!(
            states,
            vec![
                DeviceActionState::Pending(UserInteractionRequired::None),
                DeviceActionState::Pending(UserInteractionRequired::None),
                DeviceActionState::Completed(2),
            ]
        );
        assert_eq!(session.refresher_blocker_count(), 0);
        assert!(session.is_refresher_running());

        // Cancelling a finished action changes nothing
        execution.cancel.cancel();
        assert!(session.is_refresher_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_state() {
        let session = session().await;
        let outcome = session
            .execute_device_action(Scripted {
                steps: 1,
                fail: true,
            })
            .observable
            .outcome()
            .await;
        assert_eq!(outcome, Err(DeviceActionError::RefusedByUser));
        assert_eq!(session.refresher_blocker_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_action() {
        let session = session().await;
        let ExecuteDeviceActionReturnType {
            mut observable,
            cancel,
        } = session.execute_device_action(Scripted {
            steps: 100,
            fail: false,
        });

        assert!(matches!(
            observable.next().await,
            Some(DeviceActionState::Pending(_))
        ));
        assert_eq!(session.refresher_blocker_count(), 1);
        assert!(!session.is_refresher_running());

        cancel.cancel();
        cancel.cancel();
        let rest: Vec<_> = observable.collect().await;
        assert_eq!(
            rest.last(),
            Some(&DeviceActionState::Error(DeviceActionError::UserCancelled))
        );
        assert!(rest[..rest.len() - 1]
            .iter()
            .all(|state| matches!(state, DeviceActionState::Pending(_))));
        assert_eq!(session.refresher_blocker_count(), 0);
        assert!(session.is_refresher_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_are_serialized() {
        let session = session().await;
        let first = session.execute_device_action(Scripted {
            steps: 3,
            fail: false,
        });
        let second = session.execute_device_action(Scripted {
            steps: 1,
            fail: false,
        });

        let (first, second) = tokio::join!(first.observable.outcome(), second.observable.outcome());
        assert_eq!(first, Ok(3));
        assert_eq!(second, Ok(1));
        assert_eq!(session.refresher_blocker_count(), 0);
    }
}
