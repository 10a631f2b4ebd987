//! Command execution against registered sessions
//!
//! The executor resolves a session id and hands the command to the session.
//! A missing session is an error of the call; whatever the device answers is
//! returned as a [`CommandResult`]. Nothing is retried here.

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use futures::{Stream, StreamExt, stream::BoxStream};
use nexum_apdu_core::{ApduResponse, Command, CommandResult};
use nexum_device_transport::TransportError;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::KitError,
    session::{DeviceSession, DeviceSessionId, DeviceSessionRegistry, SendApduOptions},
};

/// Why a bulk run stopped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BulkApduError {
    /// The exchange itself failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session went away mid-run
    #[error("Device session {0} is closed")]
    SessionClosed(DeviceSessionId),

    /// The device answered with a non-success status word
    #[error("APDU rejected with status {error_code}")]
    Status {
        /// Raw status word as lowercase hex
        error_code: String,
    },
}

/// Progress of a bulk APDU run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkApduEvent {
    /// The APDU at `index` succeeded
    Progress {
        /// Position in the submitted list
        index: usize,
        /// Number of APDUs submitted
        total: usize,
        /// Device answer
        response: ApduResponse,
    },
    /// Every APDU succeeded
    Completed {
        /// Answers, in submission order
        responses: Vec<ApduResponse>,
    },
    /// The APDU at `index` failed; the rest were not sent
    Failed {
        /// Position of the failing APDU
        index: usize,
        /// Failure
        error: BulkApduError,
    },
}

impl BulkApduEvent {
    /// Whether this is the last event of the run
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Runs commands on sessions of a registry
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    registry: Arc<DeviceSessionRegistry>,
}

impl CommandExecutor {
    /// Create an executor over the given registry
    pub const fn new(registry: Arc<DeviceSessionRegistry>) -> Self {
        Self { registry }
    }

    /// Run a typed command on a session
    #[instrument(level = "debug", skip_all, fields(session = %session_id, command = command.name()))]
    pub async fn execute<C: Command>(
        &self,
        session_id: &DeviceSessionId,
        command: &C,
    ) -> Result<CommandResult<C::Output, C::Error>, KitError> {
        let session = self.registry.get(session_id)?;
        let started = Instant::now();
        let result = session
            .get_command(command)
            .run(session.device_model_id())
            .await;
        match &result {
            Ok(Ok(output)) => debug!(elapsed = ?started.elapsed(), ?output, "Command succeeded"),
            Ok(Err(e)) => info!(
                elapsed = ?started.elapsed(),
                error = %e,
                error_code = e.error_code().as_deref().unwrap_or("-"),
                "Command failed on device"
            ),
            Err(e) => warn!(elapsed = ?started.elapsed(), error = %e, "Command exchange failed"),
        }
        result
    }

    /// Send raw APDUs in order.
    ///
    /// The stream yields one [`BulkApduEvent::Progress`] per APDU, then either
    /// [`BulkApduEvent::Completed`] or a [`BulkApduEvent::Failed`] for the first
    /// failure, after which nothing else is sent.
    pub fn send_apdus(
        &self,
        session_id: &DeviceSessionId,
        apdus: Vec<Bytes>,
    ) -> Result<BoxStream<'static, BulkApduEvent>, KitError> {
        let session = self.registry.get(session_id)?;
        Ok(bulk_stream(session, apdus).boxed())
    }
}

struct BulkRun {
    session: DeviceSession,
    apdus: std::vec::IntoIter<Bytes>,
    total: usize,
    index: usize,
    responses: Vec<ApduResponse>,
    done: bool,
}

fn bulk_stream(session: DeviceSession, apdus: Vec<Bytes>) -> impl Stream<Item = BulkApduEvent> {
    let run = BulkRun {
        session,
        total: apdus.len(),
        apdus: apdus.into_iter(),
        index: 0,
        responses: Vec::new(),
        done: false,
    };
    futures::stream::unfold(run, |mut run| async move {
        if run.done {
            return None;
        }
        let Some(apdu) = run.apdus.next() else {
            run.done = true;
            let responses = std::mem::take(&mut run.responses);
            debug!(session = %run.session.id(), count = responses.len(), "Bulk APDUs completed");
            return Some((BulkApduEvent::Completed { responses }, run));
        };

        let index = run.index;
        run.index += 1;
        let result = run
            .session
            .send_apdu(apdu, SendApduOptions::default())
            .await;
        let event = match result {
            Ok(response) if response.is_success() => {
                run.responses.push(response.clone());
                BulkApduEvent::Progress {
                    index,
                    total: run.total,
                    response,
                }
            }
            Ok(response) => BulkApduEvent::Failed {
                index,
                error: BulkApduError::Status {
                    error_code: response.status_hex(),
                },
            },
            Err(KitError::Transport(e)) => BulkApduEvent::Failed {
                index,
                error: BulkApduError::Transport(e),
            },
            Err(_) => BulkApduEvent::Failed {
                index,
                error: BulkApduError::SessionClosed(run.session.id()),
            },
        };
        if let BulkApduEvent::Failed { error, .. } = &event {
            warn!(session = %run.session.id(), index, error = %error, "Bulk APDUs aborted");
            run.done = true;
        }
        Some((event, run))
    })
}

#[cfg(test)]
mod tests {
    use nexum_apdu_core::{CommandError, DeviceModelId};
    use nexum_device_transport::{
        DeviceId, InMemoryMockServer, MockDeviceInfo, MockTransport, Transport,
    };

    use super::*;
    use crate::{commands::os::GetAppAndVersion, config::KitConfig};

    async fn setup() -> (Arc<InMemoryMockServer>, CommandExecutor, DeviceSessionId) {
        let server = Arc::new(InMemoryMockServer::new().with_device(MockDeviceInfo {
            id: DeviceId::from("mock"),
            name: "Mock".to_string(),
            model: DeviceModelId::NanoX,
        }));
        let device = MockTransport::new(server.clone())
            .connect(&DeviceId::from("mock"), Arc::new(|_| {}))
            .await
            .unwrap();
        let session = DeviceSession::new(device, KitConfig::default().with_refresher_enabled(false));
        let id = session.id();
        let registry = Arc::new(DeviceSessionRegistry::new());
        registry.add(session);
        (server, CommandExecutor::new(registry), id)
    }

    #[tokio::test]
    async fn test_execute_returns_device_errors_as_values() {
        let (server, executor, id) = setup().await;
        server.push_response(&[0xb0, 0x01], &[0x6a, 0x82]);

        let result = executor.execute(&id, &GetAppAndVersion).await.unwrap();
        assert_eq!(
            result.unwrap_err(),
            CommandError::Unknown {
                error_code: "6a82".to_string(),
                message: nexum_apdu_core::StatusWord::from_u16(0x6a82).description(),
            }
        );
    }

    #[tokio::test]
    async fn test_execute_unknown_session() {
        let (_, executor, _) = setup().await;
        let err = executor
            .execute(&DeviceSessionId::new(), &GetAppAndVersion)
            .await
            .unwrap_err();
        assert!(matches!(err, KitError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_bulk_apdus_complete() {
        let (server, executor, id) = setup().await;
        server.push_response(&[0xe0, 0x10], &[0x01, 0x90, 0x00]);

        let apdus = (0..3)
            .map(|i| Bytes::from(vec![0xe0, 0x10, i, 0x00, 0x00]))
            .collect();
        let events: Vec<_> = executor.send_apdus(&id, apdus).unwrap().collect().await;

        assert_eq!(events.len(), 4);
        for (i, event) in events[..3].iter().enumerate() {
            assert!(matches!(event, BulkApduEvent::Progress { index, total: 3, .. } if *index == i));
        }
        assert!(matches!(
            &events[3],
            BulkApduEvent::Completed { responses } if responses.len() == 3
        ));
    }

    #[tokio::test]
    async fn test_bulk_apdus_stop_at_first_failure() {
        let (server, executor, id) = setup().await;
        server.push_response(&[0xe0, 0x10], &[0x90, 0x00]);
        server.push_response(&[0xe0, 0x10, 0x01], &[0x55, 0x01]);

        let apdus = (0..4)
            .map(|i| Bytes::from(vec![0xe0, 0x10, i, 0x00, 0x00]))
            .collect();
        let events: Vec<_> = executor.send_apdus(&id, apdus).unwrap().collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], BulkApduEvent::Progress { index: 0, .. }));
        assert_eq!(
            events[1],
            BulkApduEvent::Failed {
                index: 1,
                error: BulkApduError::Status {
                    error_code: "5501".to_string()
                }
            }
        );
        assert!(events[1].is_terminal());
        assert_eq!(server.sent().len(), 2);
    }
}
