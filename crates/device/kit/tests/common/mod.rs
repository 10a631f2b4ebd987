//! Common test utilities

#![allow(dead_code)]

use std::sync::Once;

use bytes::Bytes;
use nexum_apdu_framing::{FrameReceiver, FrameSender};
use nexum_device_transport::{
    hid::HID_FRAME_SIZE,
    memory::MemoryDevice,
};
use tracing_subscriber::EnvFilter;

/// `GetAppAndVersion` answer of a device on its dashboard
pub const DASHBOARD: &str = "0105424f4c4f5305312e302e309000";

static TRACING: Once = Once::new();

/// Log to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Device end of a HID link answering from a fixed table
///
/// APDUs are matched on their first two bytes; anything else gets `6d 00`.
pub async fn run_hid_device(mut device: MemoryDevice, answers: Vec<([u8; 2], &'static str)>) {
    loop {
        let mut receiver: Option<FrameReceiver> = None;
        let mut channel = None;
        let apdu = loop {
            let Some(frame) = device.recv_frame().await else {
                return;
            };
            let receiver = receiver.get_or_insert_with(|| {
                channel = Some(u16::from_be_bytes([frame[0], frame[1]]));
                FrameReceiver::new(channel)
            });
            match receiver.handle_frame(&frame) {
                Ok(Some(apdu)) => break apdu.to_bytes(),
                Ok(None) => {}
                Err(_) => return,
            }
        };

        let answer = answers
            .iter()
            .find(|(prefix, _)| apdu.starts_with(prefix))
            .map_or("6d00", |(_, answer)| answer);
        let Ok(sender) = FrameSender::new(HID_FRAME_SIZE, channel, true) else {
            return;
        };
        let Ok(frames) = sender.frames(&hex::decode(answer).unwrap_or_default()) else {
            return;
        };
        for frame in frames {
            if !device.send_frame(frame.to_bytes()) {
                return;
            }
        }
    }
}

/// Raw APDU bytes from hex
pub fn apdu(raw: &str) -> Bytes {
    Bytes::from(hex::decode(raw).unwrap_or_default())
}
