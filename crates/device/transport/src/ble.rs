//! Bluetooth Low Energy device connection

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use nexum_apdu_core::ApduResponse;
use nexum_apdu_framing::FrameSender;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    connection::{DeviceConnection, FrameLink},
    device::{DeviceId, DisconnectHandler},
    error::TransportError,
    framed::FramedConnection,
};

/// Request asking the device for its frame size
pub const MTU_REQUEST: [u8; 5] = [0x08, 0x00, 0x00, 0x00, 0x00];

/// Offset of the frame size in the MTU response
const MTU_OFFSET: usize = 5;

/// Connection to a device over BLE
///
/// Frames carry no channel and no padding. The frame size is negotiated with
/// [`MTU_REQUEST`] before the first APDU, and again after a reconnection.
#[derive(Debug)]
pub struct BleDeviceConnection {
    framed: FramedConnection,
    setup: Mutex<()>,
}

impl BleDeviceConnection {
    /// Open a connection over a pair of GATT characteristics
    pub async fn open(
        device_id: DeviceId,
        link: Arc<dyn FrameLink>,
        reconnection_timeout: Duration,
        on_terminated: Option<DisconnectHandler>,
    ) -> Result<Self, TransportError> {
        let framed = FramedConnection::open(
            device_id,
            link,
            None,
            None,
            reconnection_timeout,
            on_terminated,
        )
        .await?;
        Ok(Self {
            framed,
            setup: Mutex::new(()),
        })
    }

    /// Whether the frame size has been negotiated
    pub fn is_ready(&self) -> bool {
        self.framed.has_sender()
    }

    async fn negotiate_mtu(&self) -> Result<(), TransportError> {
        let _setup = self.setup.lock().await;
        if self.framed.has_sender() {
            return Ok(());
        }
        let reply = self
            .framed
            .exchange_raw(Bytes::from_static(&MTU_REQUEST))
            .await?;
        let frame_size = *reply.get(MTU_OFFSET).ok_or_else(|| {
            TransportError::DeviceNotInitialized(format!(
                "MTU response too short: {}",
                hex::encode(&reply)
            ))
        })? as usize;
        let sender = FrameSender::new(frame_size, None, false)?;
        debug!(frame_size, "Negotiated BLE frame size");
        self.framed.set_sender(Some(sender));
        Ok(())
    }

    /// Signal that the peripheral disconnected
    pub fn lost_connection(&self) {
        self.framed.lost_connection();
    }

    /// Rebind to the characteristics of the reconnected peripheral
    pub async fn reconnect(&self, link: Arc<dyn FrameLink>) -> Result<(), TransportError> {
        self.framed.set_sender(None);
        self.framed.reconnect(link).await
    }
}

#[async_trait]
impl DeviceConnection for BleDeviceConnection {
    async fn do_send_apdu(
        &self,
        apdu: Bytes,
        triggers_disconnection: bool,
        timeout: Option<Duration>,
    ) -> Result<ApduResponse, TransportError> {
        let exchange = async {
            if !self.framed.has_sender() {
                self.negotiate_mtu().await?;
            }
            self.framed
                .send_apdu(apdu, triggers_disconnection, None)
                .await
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => exchange.await,
        }
    }

    fn is_busy(&self) -> bool {
        self.framed.is_busy()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.framed.disconnect().await;
        Ok(())
    }
}
