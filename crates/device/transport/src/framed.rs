//! Framed connection engine shared by the USB HID and BLE connections
//!
//! The engine owns the outbound [`FrameSender`], a reader task feeding inbound
//! frames to a [`FrameReceiver`], the single pending exchange, and the
//! reconnection state machine used when a command makes the device re-enumerate.
//!
//! An exchange dropped after its frames went out still gets an answer from the
//! device. The connection counts such owed responses and discards them as they
//! arrive, so the next exchange reads its own response.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use nexum_apdu_core::ApduResponse;
use nexum_apdu_framing::{FrameReceiver, FrameSender};
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    connection::FrameLink,
    device::{DeviceId, DisconnectHandler},
    error::TransportError,
};

/// Reconnection state of a framed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The link is usable
    Connected,
    /// The device dropped off and is expected to come back
    WaitingForReconnection,
    /// The connection is closed for good
    Terminated,
}

type PendingResponse = oneshot::Sender<Result<ApduResponse, TransportError>>;

/// State shared with the reader task
#[derive(Debug)]
struct Shared {
    pending: Mutex<Option<PendingResponse>>,
    raw_waiter: Mutex<Option<oneshot::Sender<Bytes>>>,
    receiver: Mutex<FrameReceiver>,
    /// Responses still owed to abandoned exchanges
    owed: Mutex<usize>,
}

impl Shared {
    fn dispatch(&self, frame: Bytes) {
        if let Some(waiter) = self.raw_waiter.lock().take() {
            trace!(frame = %hex::encode(&frame), "Routing raw frame to setup exchange");
            let _ = waiter.send(frame);
            return;
        }

        let result = self.receiver.lock().handle_frame(&frame);
        match result {
            Ok(None) => {}
            Ok(Some(response)) => {
                if self.take_owed() {
                    debug!(%response, "Discarding response to an abandoned exchange");
                    return;
                }
                match self.pending.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => debug!(%response, "Dropping unsolicited response"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Malformed inbound frame");
                if self.take_owed() {
                    return;
                }
                if let Some(tx) = self.pending.lock().take() {
                    let _ = tx.send(Err(e.into()));
                }
            }
        }
    }

    fn take_owed(&self) -> bool {
        let mut owed = self.owed.lock();
        if *owed == 0 {
            return false;
        }
        *owed -= 1;
        true
    }

    fn owes_response(&self) -> bool {
        *self.owed.lock() > 0
    }

    /// Forget owed responses and partial transfers, e.g. on a new device handle
    fn clear(&self) {
        *self.owed.lock() = 0;
        self.receiver.lock().reset();
    }

    fn fail_pending(&self, error: TransportError) {
        if let Some(tx) = self.pending.lock().take() {
            let _ = tx.send(Err(error));
        }
    }
}

/// Clears the pending exchange if the exchange future is dropped early
struct PendingGuard<'a> {
    shared: &'a Shared,
    /// Every frame of the APDU reached the link
    written: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.shared.pending.lock().take().is_none() {
            return;
        }
        if self.written {
            *self.shared.owed.lock() += 1;
            debug!("Exchange abandoned, its response will be discarded");
        } else if !self.shared.owes_response() {
            self.shared.receiver.lock().reset();
        }
    }
}

async fn read_frames(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = inbound.recv().await {
        shared.dispatch(frame);
    }
    debug!("Inbound frame source closed");
}

struct Inner {
    device_id: DeviceId,
    link: RwLock<Arc<dyn FrameLink>>,
    sender: RwLock<Option<FrameSender>>,
    shared: Arc<Shared>,
    state: watch::Sender<LinkState>,
    reader: Mutex<Option<JoinHandle<()>>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    reconnection_timeout: Duration,
    on_terminated: Option<DisconnectHandler>,
}

impl Inner {
    fn bind(&self, link: &Arc<dyn FrameLink>) -> Result<(), TransportError> {
        let inbound = link.take_inbound().ok_or_else(|| {
            TransportError::OpeningConnection("inbound frames already bound".to_string())
        })?;
        let reader = tokio::spawn(read_frames(self.shared.clone(), inbound));
        if let Some(old) = self.reader.lock().replace(reader) {
            old.abort();
        }
        *self.link.write() = link.clone();
        self.shared.clear();
        Ok(())
    }

    async fn terminate(&self) {
        let previous = self.state.send_replace(LinkState::Terminated);
        if previous == LinkState::Terminated {
            return;
        }
        info!(device = %self.device_id, "Terminating device connection");

        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.shared.fail_pending(TransportError::Disconnected);
        self.shared.raw_waiter.lock().take();
        self.shared.clear();

        let link = self.link.read().clone();
        if let Err(e) = link.close().await {
            debug!(error = %e, "Failed to close link");
        }
        if let Some(handler) = &self.on_terminated {
            handler(self.device_id.clone());
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
        if let Some(timer) = self.reconnect_timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Framed connection engine
#[derive(Clone)]
pub struct FramedConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for FramedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedConnection")
            .field("device_id", &self.inner.device_id)
            .field("state", &*self.inner.state.borrow())
            .field("sender", &*self.inner.sender.read())
            .finish_non_exhaustive()
    }
}

impl FramedConnection {
    /// Open `link` and start listening for inbound frames.
    ///
    /// `sender` may be left unset for links that negotiate their frame size
    /// during setup; exchanges fail with `DeviceNotInitialized` until it is set.
    pub async fn open(
        device_id: DeviceId,
        link: Arc<dyn FrameLink>,
        sender: Option<FrameSender>,
        channel: Option<u16>,
        reconnection_timeout: Duration,
        on_terminated: Option<DisconnectHandler>,
    ) -> Result<Self, TransportError> {
        if !link.is_open() {
            link.open().await?;
        }
        let (state, _) = watch::channel(LinkState::Connected);
        let inner = Arc::new(Inner {
            device_id,
            link: RwLock::new(link.clone()),
            sender: RwLock::new(sender),
            shared: Arc::new(Shared {
                pending: Mutex::new(None),
                raw_waiter: Mutex::new(None),
                receiver: Mutex::new(FrameReceiver::new(channel)),
                owed: Mutex::new(0),
            }),
            state,
            reader: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
            reconnection_timeout,
            on_terminated,
        });
        inner.bind(&link)?;
        debug!(device = %inner.device_id, "Framed connection opened");
        Ok(Self { inner })
    }

    /// Device this connection talks to
    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device_id
    }

    /// Current reconnection state
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Subscribe to reconnection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Whether the frame size is known
    pub fn has_sender(&self) -> bool {
        self.inner.sender.read().is_some()
    }

    /// Set the frame sender once the frame size is known
    pub fn set_sender(&self, sender: Option<FrameSender>) {
        *self.inner.sender.write() = sender;
    }

    /// Whether an exchange is in flight
    pub fn is_busy(&self) -> bool {
        self.inner.shared.pending.lock().is_some()
    }

    /// Whether the device still owes a response to an abandoned exchange
    pub fn owes_response(&self) -> bool {
        self.inner.shared.owes_response()
    }

    /// Send an APDU, bounded by `timeout` when given
    pub async fn send_apdu(
        &self,
        apdu: Bytes,
        triggers_disconnection: bool,
        timeout: Option<Duration>,
    ) -> Result<ApduResponse, TransportError> {
        let exchange = self.exchange(apdu, triggers_disconnection);
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => exchange.await,
        }
    }

    async fn exchange(
        &self,
        apdu: Bytes,
        triggers_disconnection: bool,
    ) -> Result<ApduResponse, TransportError> {
        self.ensure_ready().await?;

        let sender = (*self.inner.sender.read()).ok_or_else(|| {
            TransportError::DeviceNotInitialized("frame size not negotiated".to_string())
        })?;
        let frames = sender.frames(&apdu)?;

        let shared = &self.inner.shared;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = shared.pending.lock();
            if pending.is_some() {
                return Err(TransportError::AlreadySending);
            }
            *pending = Some(tx);
        }
        let mut guard = PendingGuard {
            shared,
            written: false,
        };
        if !shared.owes_response() {
            shared.receiver.lock().reset();
        }

        let link = self.inner.link.read().clone();
        for frame in frames {
            link.write_frame(frame.to_bytes()).await?;
        }
        guard.written = true;

        let response = rx.await.map_err(|_| TransportError::Disconnected)??;

        if triggers_disconnection && response.is_success() {
            debug!(device = %self.inner.device_id, "Waiting for device to reconnect");
            self.mark_waiting();
            self.wait_for_reconnection().await?;
        }
        Ok(response)
    }

    async fn ensure_ready(&self) -> Result<(), TransportError> {
        match self.state() {
            LinkState::Terminated => Err(TransportError::Disconnected),
            LinkState::WaitingForReconnection => self.wait_for_reconnection().await,
            LinkState::Connected => {
                let link = self.inner.link.read().clone();
                if !link.is_open() {
                    link.open().await?;
                }
                Ok(())
            }
        }
    }

    /// Resolve once the link is connected again, or fail if it terminates
    pub async fn wait_for_reconnection(&self) -> Result<(), TransportError> {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                LinkState::Connected => return Ok(()),
                LinkState::Terminated => return Err(TransportError::ReconnectionFailed),
                LinkState::WaitingForReconnection => {}
            }
            rx.changed()
                .await
                .map_err(|_| TransportError::ReconnectionFailed)?;
        }
    }

    fn mark_waiting(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == LinkState::Connected {
                *state = LinkState::WaitingForReconnection;
                true
            } else {
                false
            }
        });
        if changed || self.state() == LinkState::WaitingForReconnection {
            self.arm_reconnect_timer();
        }
    }

    fn arm_reconnect_timer(&self) {
        let mut timer = self.inner.reconnect_timer.lock();
        if timer.is_some() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.reconnection_timeout;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect_timer.lock().take();
                if *inner.state.borrow() == LinkState::WaitingForReconnection {
                    warn!(device = %inner.device_id, ?timeout, "Device did not reconnect in time");
                    inner.terminate().await;
                }
            }
        }));
    }

    /// Signal that the physical device went away.
    ///
    /// The connection waits up to the reconnection timeout for [`reconnect`](Self::reconnect)
    /// before terminating.
    pub fn lost_connection(&self) {
        info!(device = %self.inner.device_id, "Device connection lost");
        self.inner.shared.fail_pending(TransportError::Disconnected);
        self.inner.shared.clear();
        self.mark_waiting();
    }

    /// Rebind to the new handle of a device that came back
    pub async fn reconnect(&self, link: Arc<dyn FrameLink>) -> Result<(), TransportError> {
        if self.state() == LinkState::Terminated {
            return Err(TransportError::Disconnected);
        }
        if !link.is_open() {
            link.open().await?;
        }
        self.inner.bind(&link)?;
        if let Some(timer) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }
        self.inner.state.send_replace(LinkState::Connected);
        info!(device = %self.inner.device_id, "Device reconnected");
        Ok(())
    }

    /// Write raw bytes outside the frame codec and wait for the next inbound frame
    pub async fn exchange_raw(&self, raw: Bytes) -> Result<Bytes, TransportError> {
        let (tx, rx) = oneshot::channel();
        *self.inner.shared.raw_waiter.lock() = Some(tx);
        let link = self.inner.link.read().clone();
        if let Err(e) = link.write_frame(raw).await {
            self.inner.shared.raw_waiter.lock().take();
            return Err(e);
        }
        rx.await.map_err(|_| TransportError::Disconnected)
    }

    /// Terminate the connection, rejecting pending exchanges and reconnection waiters
    pub async fn disconnect(&self) {
        self.inner.terminate().await;
    }
}
