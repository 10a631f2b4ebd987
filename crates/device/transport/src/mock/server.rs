//! In-process mock device server

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

use super::{MockDeviceInfo, MockServer};
use crate::{device::DeviceId, error::TransportError};

/// Status returned for APDUs without a scripted response (instruction not supported)
const DEFAULT_RESPONSE: [u8; 2] = [0x6d, 0x00];

#[derive(Debug, Clone)]
struct ScriptedResponse {
    prefix: Bytes,
    response: Bytes,
}

/// Mock server answering APDUs from a script
///
/// One-shot responses are consumed in order before persistent responses are
/// consulted. Both match on an APDU prefix; among persistent responses the most
/// recently pushed match wins.
#[derive(Debug, Default)]
pub struct InMemoryMockServer {
    devices: Vec<MockDeviceInfo>,
    persistent: Mutex<Vec<ScriptedResponse>>,
    once: Mutex<Vec<ScriptedResponse>>,
    sessions: Mutex<HashMap<String, DeviceId>>,
    sent: Mutex<Vec<Bytes>>,
}

impl InMemoryMockServer {
    /// Create an empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a simulated device
    pub fn with_device(mut self, device: MockDeviceInfo) -> Self {
        self.devices.push(device);
        self
    }

    /// Answer every APDU starting with `prefix`
    pub fn with_response(self, prefix: &[u8], response: &[u8]) -> Self {
        self.push_response(prefix, response);
        self
    }

    /// Answer every APDU starting with `prefix`, replacing earlier matches
    pub fn push_response(&self, prefix: &[u8], response: &[u8]) {
        self.persistent.lock().push(ScriptedResponse {
            prefix: Bytes::copy_from_slice(prefix),
            response: Bytes::copy_from_slice(response),
        });
    }

    /// Answer the next APDU starting with `prefix`, once
    pub fn push_response_once(&self, prefix: &[u8], response: &[u8]) {
        self.once.lock().push(ScriptedResponse {
            prefix: Bytes::copy_from_slice(prefix),
            response: Bytes::copy_from_slice(response),
        });
    }

    /// APDUs received so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Open server sessions
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn respond(&self, apdu: &[u8]) -> Bytes {
        {
            let mut once = self.once.lock();
            if let Some(pos) = once.iter().position(|r| apdu.starts_with(&r.prefix)) {
                return once.remove(pos).response;
            }
        }
        self.persistent
            .lock()
            .iter()
            .rev()
            .find(|r| apdu.starts_with(&r.prefix))
            .map(|r| r.response.clone())
            .unwrap_or_else(|| Bytes::from_static(&DEFAULT_RESPONSE))
    }
}

#[async_trait]
impl MockServer for InMemoryMockServer {
    async fn scan(&self) -> Result<Vec<MockDeviceInfo>, TransportError> {
        Ok(self.devices.clone())
    }

    async fn connect(&self, device_id: &DeviceId) -> Result<String, TransportError> {
        if !self.devices.iter().any(|d| &d.id == device_id) {
            return Err(TransportError::UnknownDevice(device_id.to_string()));
        }
        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .insert(session_id.clone(), device_id.clone());
        Ok(session_id)
    }

    async fn send(&self, session_id: &str, apdu: Bytes) -> Result<Bytes, TransportError> {
        if !self.sessions.lock().contains_key(session_id) {
            return Err(TransportError::Disconnected);
        }
        let response = self.respond(&apdu);
        trace!(apdu = %hex::encode(&apdu), response = %hex::encode(&response), "Mock exchange");
        self.sent.lock().push(apdu);
        Ok(response)
    }

    async fn disconnect(&self, session_id: &str) -> Result<(), TransportError> {
        self.sessions.lock().remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses() {
        let server = InMemoryMockServer::new()
            .with_device(MockDeviceInfo {
                id: DeviceId::from("mock"),
                name: "Mock".to_string(),
                model: nexum_apdu_core::DeviceModelId::Flex,
            })
            .with_response(&[0xe0], &[0x6a, 0x80]);
        let session = server.connect(&DeviceId::from("mock")).await.unwrap();
        let send = |apdu: &'static [u8]| server.send(&session, Bytes::from_static(apdu));

        assert_eq!(send(&[0xb0, 0x01]).await.unwrap().as_ref(), &DEFAULT_RESPONSE);
        assert_eq!(send(&[0xe0, 0x01]).await.unwrap().as_ref(), &[0x6a, 0x80]);

        server.push_response(&[0xe0, 0x01], &[0x90, 0x00]);
        server.push_response_once(&[0xe0, 0x01], &[0x55, 0x15]);
        assert_eq!(send(&[0xe0, 0x01]).await.unwrap().as_ref(), &[0x55, 0x15]);
        assert_eq!(send(&[0xe0, 0x01]).await.unwrap().as_ref(), &[0x90, 0x00]);
        assert_eq!(send(&[0xe0, 0x02]).await.unwrap().as_ref(), &[0x6a, 0x80]);
        assert_eq!(server.sent().len(), 5);

        server.disconnect(&session).await.unwrap();
        assert_eq!(server.session_count(), 0);
        assert_eq!(
            send(&[0xb0, 0x01]).await,
            Err(TransportError::Disconnected)
        );
    }
}
