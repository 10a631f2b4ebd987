//! USB HID device connection

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use nexum_apdu_core::ApduResponse;
use nexum_apdu_framing::FrameSender;

use crate::{
    connection::{DeviceConnection, FrameLink},
    device::{DeviceId, DisconnectHandler},
    error::TransportError,
    framed::{FramedConnection, LinkState},
};

/// Size of a HID report
pub const HID_FRAME_SIZE: usize = 64;

/// Default time a re-enumerating device has to come back
pub const DEFAULT_RECONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for a USB HID connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidConnectionOptions {
    /// Report size
    pub frame_size: usize,
    /// Time allowed for the device to re-enumerate
    pub reconnection_timeout: Duration,
}

impl Default for HidConnectionOptions {
    fn default() -> Self {
        Self {
            frame_size: HID_FRAME_SIZE,
            reconnection_timeout: DEFAULT_RECONNECTION_TIMEOUT,
        }
    }
}

impl HidConnectionOptions {
    /// Set the report size
    pub const fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the reconnection timeout
    pub const fn with_reconnection_timeout(mut self, timeout: Duration) -> Self {
        self.reconnection_timeout = timeout;
        self
    }
}

/// Connection to a device over USB HID
///
/// Frames carry a random channel chosen when the connection opens and are
/// zero-padded to the report size. Opening or closing an app makes the device
/// re-enumerate: the owner of the HID handles calls [`lost_connection`](Self::lost_connection)
/// when the handle goes away and [`reconnect`](Self::reconnect) with the new one.
#[derive(Debug, Clone)]
pub struct UsbHidDeviceConnection {
    framed: FramedConnection,
    channel: u16,
}

impl UsbHidDeviceConnection {
    /// Open a connection over a HID link
    pub async fn open(
        device_id: DeviceId,
        link: Arc<dyn FrameLink>,
        options: HidConnectionOptions,
        on_terminated: Option<DisconnectHandler>,
    ) -> Result<Self, TransportError> {
        let channel = rand::random::<u16>();
        let sender = FrameSender::new(options.frame_size, Some(channel), true)?;
        let framed = FramedConnection::open(
            device_id,
            link,
            Some(sender),
            Some(channel),
            options.reconnection_timeout,
            on_terminated,
        )
        .await?;
        Ok(Self { framed, channel })
    }

    /// Channel used by this connection
    pub const fn channel(&self) -> u16 {
        self.channel
    }

    /// Reconnection state
    pub fn state(&self) -> LinkState {
        self.framed.state()
    }

    /// Signal that the HID handle went away
    pub fn lost_connection(&self) {
        self.framed.lost_connection();
    }

    /// Rebind to the handle of the re-enumerated device
    pub async fn reconnect(&self, link: Arc<dyn FrameLink>) -> Result<(), TransportError> {
        self.framed.reconnect(link).await
    }
}

#[async_trait]
impl DeviceConnection for UsbHidDeviceConnection {
    async fn do_send_apdu(
        &self,
        apdu: Bytes,
        triggers_disconnection: bool,
        timeout: Option<Duration>,
    ) -> Result<ApduResponse, TransportError> {
        self.framed
            .send_apdu(apdu, triggers_disconnection, timeout)
            .await
    }

    fn is_busy(&self) -> bool {
        self.framed.is_busy()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.framed.disconnect().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::memory::{MemoryDevice, memory_link};

    const GET_APP_AND_VERSION: [u8; 5] = [0xb0, 0x01, 0x00, 0x00, 0x00];
    const OPEN_APP: [u8; 8] = [0xe0, 0xd8, 0x00, 0x00, 0x03, 0x42, 0x54, 0x43];

    async fn open(
        reconnection_timeout: Duration,
        on_terminated: Option<DisconnectHandler>,
    ) -> (UsbHidDeviceConnection, Arc<crate::memory::MemoryLink>, MemoryDevice) {
        let (link, device) = memory_link();
        let options =
            HidConnectionOptions::default().with_reconnection_timeout(reconnection_timeout);
        let connection =
            UsbHidDeviceConnection::open(DeviceId::from("hid-1"), link.clone(), options, on_terminated)
                .await
                .unwrap();
        (connection, link, device)
    }

    fn answer(mut device: MemoryDevice, response: &'static str) -> tokio::task::JoinHandle<Bytes> {
        tokio::spawn(async move {
            let apdu = device.recv_apdu(true).await.unwrap();
            device.respond(&hex::decode(response).unwrap(), HID_FRAME_SIZE, true);
            apdu
        })
    }

    #[tokio::test]
    async fn test_exchange() {
        let (connection, _link, device) = open(DEFAULT_RECONNECTION_TIMEOUT, None).await;
        let responder = answer(device, "0105424f4c4f5309312e342e302d7263329000");

        let response = connection
            .send_apdu(Bytes::from_static(&GET_APP_AND_VERSION), false, None)
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.data().len(), 17);
        assert_eq!(responder.await.unwrap().as_ref(), &GET_APP_AND_VERSION);
        assert!(!connection.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_timeout() {
        let terminated = Arc::new(AtomicUsize::new(0));
        let counter = terminated.clone();
        let (connection, _link, device) = open(
            Duration::from_millis(500),
            Some(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await;
        let _responder = answer(device, "9000");

        let result = connection
            .send_apdu(Bytes::from_static(&OPEN_APP), true, None)
            .await;
        assert_eq!(result, Err(TransportError::ReconnectionFailed));
        assert_eq!(connection.state(), LinkState::Terminated);
        assert_eq!(terminated.load(Ordering::SeqCst), 1);

        // Terminated connections reject further exchanges
        assert_eq!(
            connection
                .send_apdu(Bytes::from_static(&GET_APP_AND_VERSION), false, None)
                .await,
            Err(TransportError::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_rebinds_listener() {
        let (connection, _link, device) = open(Duration::from_secs(5), None).await;
        let _responder = answer(device, "9000");

        let sending = {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .send_apdu(Bytes::from_static(&OPEN_APP), true, None)
                    .await
            })
        };
        while connection.state() != LinkState::WaitingForReconnection {
            tokio::task::yield_now().await;
        }
        connection.lost_connection();

        let (new_link, new_device) = memory_link();
        connection.reconnect(new_link).await.unwrap();
        assert!(sending.await.unwrap().unwrap().is_success());
        assert_eq!(connection.state(), LinkState::Connected);

        // Inbound frames now come from the new handle
        let responder = answer(new_device, "6e00");
        let response = connection
            .send_apdu(Bytes::from_static(&GET_APP_AND_VERSION), false, None)
            .await
            .unwrap();
        assert!(response.status().is_class_not_supported());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_disconnect_rejects_waiters() {
        let (connection, _link, device) = open(Duration::from_secs(60), None).await;
        let _responder = answer(device, "9000");

        let sending = {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .send_apdu(Bytes::from_static(&OPEN_APP), true, None)
                    .await
            })
        };
        while connection.state() != LinkState::WaitingForReconnection {
            tokio::task::yield_now().await;
        }
        DeviceConnection::disconnect(&connection).await.unwrap();
        assert_eq!(
            sending.await.unwrap(),
            Err(TransportError::ReconnectionFailed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_pending_exchange() {
        let (connection, _link, _device) = open(DEFAULT_RECONNECTION_TIMEOUT, None).await;
        let result = connection
            .send_apdu(
                Bytes::from_static(&GET_APP_AND_VERSION),
                false,
                Some(Duration::from_millis(100)),
            )
            .await;
        assert_eq!(result, Err(TransportError::Timeout));
        assert!(!connection.is_busy());
        assert!(connection.framed.owes_response());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_answer_to_abandoned_exchange_is_discarded() {
        let (connection, _link, mut device) = open(DEFAULT_RECONNECTION_TIMEOUT, None).await;
        let result = connection
            .send_apdu(Bytes::from_static(&OPEN_APP), true, Some(Duration::from_millis(100)))
            .await;
        assert_eq!(result, Err(TransportError::Timeout));

        // The device only answers the abandoned APDU once the next one arrives
        let responder = tokio::spawn(async move {
            let first = device.recv_apdu(true).await.unwrap();
            let second = device.recv_apdu(true).await.unwrap();
            device.respond(&hex::decode("9000").unwrap(), HID_FRAME_SIZE, true);
            device.respond(
                &hex::decode("0105424f4c4f5309312e342e302d7263329000").unwrap(),
                HID_FRAME_SIZE,
                true,
            );
            (first, second)
        });

        let response = connection
            .send_apdu(Bytes::from_static(&GET_APP_AND_VERSION), false, None)
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.data().len(), 17);
        assert!(!connection.framed.owes_response());
        assert_eq!(connection.state(), LinkState::Connected);

        let (first, second) = responder.await.unwrap();
        assert_eq!(first.as_ref(), &OPEN_APP);
        assert_eq!(second.as_ref(), &GET_APP_AND_VERSION);
    }

    #[tokio::test]
    async fn test_reconnection_forgets_owed_answers() {
        let (connection, _link, _device) = open(Duration::from_secs(5), None).await;
        let result = connection
            .send_apdu(
                Bytes::from_static(&GET_APP_AND_VERSION),
                false,
                Some(Duration::from_millis(10)),
            )
            .await;
        assert_eq!(result, Err(TransportError::Timeout));
        assert!(connection.framed.owes_response());

        connection.lost_connection();
        let (new_link, new_device) = memory_link();
        connection.reconnect(new_link).await.unwrap();
        assert!(!connection.framed.owes_response());

        let responder = answer(new_device, "9000");
        let response = connection
            .send_apdu(Bytes::from_static(&GET_APP_AND_VERSION), false, None)
            .await
            .unwrap();
        assert!(response.is_success());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure() {
        let (connection, link, _device) = open(DEFAULT_RECONNECTION_TIMEOUT, None).await;
        link.fail_writes(true);
        let result = connection
            .send_apdu(Bytes::from_static(&GET_APP_AND_VERSION), false, None)
            .await;
        assert!(matches!(result, Err(TransportError::WriteFailed(_))));
        assert!(!connection.is_busy());
    }
}
