//! Connection traits
//!
//! A [`DeviceConnection`] is what sessions talk to: raw APDU in, response out.
//! A [`FrameLink`] is the minimal contract a physical channel (a HID device
//! handle, a pair of GATT characteristics) has to satisfy for the framed
//! connections in this crate to drive it.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use nexum_apdu_core::ApduResponse;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::TransportError;

/// A connection able to exchange APDUs with one device
#[async_trait]
pub trait DeviceConnection: Send + Sync + fmt::Debug {
    /// Send raw APDU bytes and wait for the reassembled response.
    ///
    /// When `triggers_disconnection` is set and the device answers `90 00`, the
    /// call also waits for the device to come back before returning. `timeout`
    /// bounds the whole call.
    async fn send_apdu(
        &self,
        apdu: Bytes,
        triggers_disconnection: bool,
        timeout: Option<Duration>,
    ) -> Result<ApduResponse, TransportError> {
        trace!(apdu = %hex::encode(&apdu), triggers_disconnection, "Sending APDU");
        let result = self
            .do_send_apdu(apdu, triggers_disconnection, timeout)
            .await;
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response.to_bytes()), "Received APDU response");
            }
            Err(e) => {
                debug!(error = %e, "Transport error during exchange");
            }
        }
        result
    }

    /// Internal implementation of `send_apdu`
    /// This is the method that concrete implementations should override
    async fn do_send_apdu(
        &self,
        apdu: Bytes,
        triggers_disconnection: bool,
        timeout: Option<Duration>,
    ) -> Result<ApduResponse, TransportError>;

    /// Whether an exchange is currently in flight
    fn is_busy(&self) -> bool;

    /// Terminate the connection, failing any pending exchange
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Physical channel carrying frames
#[async_trait]
pub trait FrameLink: Send + Sync + fmt::Debug {
    /// Open the underlying device handle
    async fn open(&self) -> Result<(), TransportError>;

    /// Whether the device handle is open
    fn is_open(&self) -> bool;

    /// Write one frame
    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Take the inbound frame source.
    ///
    /// Returns `None` once the source has already been taken; each link is bound
    /// to exactly one listener.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>>;

    /// Close the underlying device handle
    async fn close(&self) -> Result<(), TransportError>;
}
