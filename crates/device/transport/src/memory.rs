//! In-memory frame link
//!
//! Pairs a [`FrameLink`] with a device-side handle that can read the host's
//! frames and answer with frames of its own. Used to drive HID and BLE
//! connections without hardware.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use nexum_apdu_framing::{FrameReceiver, FrameSender};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{connection::FrameLink, error::TransportError};

/// Host side of an in-memory link
#[derive(Debug)]
pub struct MemoryLink {
    open: AtomicBool,
    fail_writes: AtomicBool,
    to_device: mpsc::UnboundedSender<Bytes>,
    from_device: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

/// Device side of an in-memory link
#[derive(Debug)]
pub struct MemoryDevice {
    to_host: mpsc::UnboundedSender<Bytes>,
    from_host: mpsc::UnboundedReceiver<Bytes>,
    channel: Option<u16>,
}

/// Create a connected link and device pair
pub fn memory_link() -> (Arc<MemoryLink>, MemoryDevice) {
    let (to_device, from_host) = mpsc::unbounded_channel();
    let (to_host, from_device) = mpsc::unbounded_channel();
    let link = MemoryLink {
        open: AtomicBool::new(false),
        fail_writes: AtomicBool::new(false),
        to_device,
        from_device: Mutex::new(Some(from_device)),
    };
    let device = MemoryDevice {
        to_host,
        from_host,
        channel: None,
    };
    (Arc::new(link), device)
}

impl MemoryLink {
    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameLink for MemoryLink {
    async fn open(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::write_failed("link write failure"));
        }
        self.to_device
            .send(frame)
            .map_err(|_| TransportError::write_failed("device side dropped"))
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.from_device.lock().take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryDevice {
    /// Next raw frame written by the host
    pub async fn recv_frame(&mut self) -> Option<Bytes> {
        self.from_host.recv().await
    }

    /// Push a raw frame to the host
    pub fn send_frame(&self, frame: Bytes) -> bool {
        self.to_host.send(frame).is_ok()
    }

    /// Read host frames until a whole APDU has been received.
    ///
    /// With `has_channel`, the channel is learned from the first frame and
    /// reused by [`respond`](Self::respond).
    pub async fn recv_apdu(&mut self, has_channel: bool) -> Option<Bytes> {
        let mut receiver: Option<FrameReceiver> = None;
        loop {
            let frame = self.recv_frame().await?;
            let receiver = receiver.get_or_insert_with(|| {
                let channel = (has_channel && frame.len() >= 2)
                    .then(|| u16::from_be_bytes([frame[0], frame[1]]));
                self.channel = channel;
                FrameReceiver::new(channel)
            });
            if let Ok(Some(apdu)) = receiver.handle_frame(&frame) {
                return Some(apdu.to_bytes());
            }
        }
    }

    /// Frame and send a raw response (data followed by the status word)
    pub fn respond(&self, response: &[u8], frame_size: usize, padding: bool) -> bool {
        let Ok(sender) = FrameSender::new(frame_size, self.channel, padding) else {
            return false;
        };
        let Ok(frames) = sender.frames(response) else {
            return false;
        };
        frames.iter().all(|frame| self.send_frame(frame.to_bytes()))
    }
}
