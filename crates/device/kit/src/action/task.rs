//! Reusable steps of device actions

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use nexum_apdu_core::{
    APDU_MAX_PAYLOAD, Apdu, ApduBuilder, ApduBuilderError, ApduResponse, CommandError,
    CommandErrorCodes, CommandResult, NoCommandErrors,
};
use tracing::debug;

use super::{DeviceActionError, context::InternalApi};
use crate::session::SendApduOptions;

/// A step run inside an app by [`CallTaskInApp`](super::os::CallTaskInApp)
///
/// The outer error is an exchange failure; what the device answered is in the
/// [`CommandResult`].
#[async_trait]
pub trait Task: Send + Sync + fmt::Debug + 'static {
    /// Success value
    type Output: fmt::Debug + Send + 'static;

    /// Status word dictionary of the task's commands
    type Error: CommandErrorCodes;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run the task
    async fn run(
        &self,
        api: &InternalApi,
    ) -> Result<CommandResult<Self::Output, Self::Error>, DeviceActionError>;
}

/// Send a payload too large for one APDU as a sequence of APDUs
///
/// The first chunk carries `p1_first`, the following ones `p1_next`. Any
/// non-success answer stops the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCommandInChunksTask {
    cla: u8,
    ins: u8,
    p1_first: u8,
    p1_next: u8,
    p2: u8,
    chunk_size: usize,
    data: Bytes,
}

impl SendCommandInChunksTask {
    /// Chunk `data` for the given instruction
    pub const fn new(cla: u8, ins: u8, data: Bytes) -> Self {
        Self {
            cla,
            ins,
            p1_first: 0x00,
            p1_next: 0x80,
            p2: 0x00,
            chunk_size: APDU_MAX_PAYLOAD,
            data,
        }
    }

    /// Set the P1 of the first and following chunks
    pub const fn with_p1(mut self, first: u8, next: u8) -> Self {
        self.p1_first = first;
        self.p1_next = next;
        self
    }

    /// Set P2
    pub const fn with_p2(mut self, p2: u8) -> Self {
        self.p2 = p2;
        self
    }

    /// Set the chunk size, at most one APDU payload
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// The APDUs this task sends
    pub fn apdus(&self) -> Result<Vec<Apdu>, ApduBuilderError> {
        if self.data.is_empty() {
            return Ok(vec![Apdu::new(self.cla, self.ins, self.p1_first, self.p2)]);
        }
        self.data
            .chunks(self.chunk_size.max(1))
            .enumerate()
            .map(|(i, chunk)| {
                let p1 = if i == 0 { self.p1_first } else { self.p1_next };
                let mut builder = ApduBuilder::new(self.cla, self.ins, p1, self.p2);
                builder.add_bytes(chunk)?;
                Ok(builder.build())
            })
            .collect()
    }
}

#[async_trait]
impl Task for SendCommandInChunksTask {
    type Output = ApduResponse;
    type Error = NoCommandErrors;

    fn name(&self) -> &'static str {
        "SendCommandInChunks"
    }

    async fn run(&self, api: &InternalApi) -> Result<CommandResult<ApduResponse>, DeviceActionError> {
        let apdus = match self.apdus() {
            Ok(apdus) => apdus,
            Err(e) => return Ok(Err(CommandError::InvalidCommand(e))),
        };
        let total = apdus.len();

        let mut last = None;
        for (index, apdu) in apdus.into_iter().enumerate() {
            let response = api
                .send_apdu(apdu.to_bytes(), SendApduOptions::default())
                .await?;
            if !response.is_success() {
                debug!(index, total, status = %response.status(), "Chunk rejected");
                return Ok(Err(CommandError::from_response(&response)));
            }
            last = Some(response);
        }
        Ok(last.ok_or_else(|| CommandError::InvalidResponse("no chunk sent".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nexum_apdu_core::{DeviceModelId, GlobalCommandError};
    use nexum_device_transport::{
        DeviceId, InMemoryMockServer, MockDeviceInfo, MockTransport, Transport,
    };

    use super::*;
    use crate::{config::KitConfig, session::DeviceSession};

    async fn api(server: Arc<InMemoryMockServer>) -> InternalApi {
        let device = MockTransport::new(server)
            .connect(&DeviceId::from("mock"), Arc::new(|_| {}))
            .await
            .unwrap();
        InternalApi::new(DeviceSession::new(
            device,
            KitConfig::default().with_refresher_enabled(false),
        ))
    }

    fn server() -> Arc<InMemoryMockServer> {
        Arc::new(InMemoryMockServer::new().with_device(MockDeviceInfo {
            id: DeviceId::from("mock"),
            name: "Mock".to_string(),
            model: DeviceModelId::NanoX,
        }))
    }

    #[test]
    fn test_chunking() {
        let task = SendCommandInChunksTask::new(0xe0, 0x04, Bytes::from(vec![0x11; 600]));
        let apdus = task.apdus().unwrap();
        assert_eq!(apdus.len(), 3);
        assert_eq!(apdus[0].p1, 0x00);
        assert_eq!(apdus[0].data().len(), 255);
        assert_eq!(apdus[1].p1, 0x80);
        assert_eq!(apdus[2].data().len(), 90);

        let exact = SendCommandInChunksTask::new(0xe0, 0x04, Bytes::from(vec![0x11; 510]))
            .with_p1(0x01, 0x02);
        let apdus = exact.apdus().unwrap();
        assert_eq!(apdus.len(), 2);
        assert_eq!((apdus[0].p1, apdus[1].p1), (0x01, 0x02));

        let empty = SendCommandInChunksTask::new(0xe0, 0x04, Bytes::new());
        assert_eq!(empty.apdus().unwrap().len(), 1);

        let oversized = SendCommandInChunksTask::new(0xe0, 0x04, Bytes::from(vec![0; 300]))
            .with_chunk_size(300);
        assert!(oversized.apdus().is_err());
    }

    #[tokio::test]
    async fn test_run_returns_last_response() {
        let server = server();
        server.push_response(&[0xe0, 0x04, 0x00], &[0x90, 0x00]);
        server.push_response(&[0xe0, 0x04, 0x80], &[0xca, 0xfe, 0x90, 0x00]);
        let api = api(server.clone()).await;

        let task = SendCommandInChunksTask::new(0xe0, 0x04, Bytes::from(vec![0x22; 300]));
        let response = task.run(&api).await.unwrap().unwrap();
        assert_eq!(response.data().as_ref(), &[0xca, 0xfe]);
        assert_eq!(server.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_at_first_rejected_chunk() {
        let server = server();
        server.push_response(&[0xe0, 0x04], &[0x55, 0x01]);
        let api = api(server.clone()).await;

        let task = SendCommandInChunksTask::new(0xe0, 0x04, Bytes::from(vec![0x22; 600]));
        let err = task.run(&api).await.unwrap().unwrap_err();
        assert_eq!(err, CommandError::Global(GlobalCommandError::ActionRefused));
        assert_eq!(server.sent().len(), 1);
    }
}
