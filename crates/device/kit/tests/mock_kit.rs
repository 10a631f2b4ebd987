//! End-to-end flows through the kit over the mock transport

mod common;

use std::{sync::Arc, time::Duration};

use common::{DASHBOARD, apdu, init_tracing};
use futures::StreamExt;
use nexum_apdu_core::DeviceModelId;
use nexum_device_kit::{
    BulkApduEvent, DeviceActionError, DeviceActionState, DeviceManagementKit, DeviceSessionId,
    DeviceStatus, KitConfig, KitError, SendApduOptions, UserInteractionRequired,
    prelude::{GetAppAndVersion, ListApps, OpenApp},
};
use nexum_device_transport::{
    DeviceId, InMemoryMockServer, MockDeviceInfo, MockTransport, Transport,
};

fn server() -> Arc<InMemoryMockServer> {
    Arc::new(
        InMemoryMockServer::new()
            .with_device(MockDeviceInfo {
                id: DeviceId::from("flex-1"),
                name: "Flex".to_string(),
                model: DeviceModelId::Flex,
            })
            .with_response(&[0xb0, 0x01], &hex::decode(DASHBOARD).unwrap()),
    )
}

async fn connect(
    server: Arc<InMemoryMockServer>,
) -> (DeviceManagementKit, Arc<MockTransport>, DeviceSessionId) {
    init_tracing();
    let transport = Arc::new(MockTransport::new(server));
    let kit = DeviceManagementKit::builder()
        .with_config(
            KitConfig::default()
                .with_refresher_interval(Duration::from_millis(500))
                .with_unlock_timeout(Duration::from_secs(2)),
        )
        .add_transport(transport.clone())
        .build();

    let devices = kit.list_available_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    let id = kit.connect(&devices[0]).await.unwrap();
    (kit, transport, id)
}

#[tokio::test(start_paused = true)]
async fn test_open_app_flow() {
    let server = server();
    server.push_response(&[0xe0, 0xd8], &[0x90, 0x00]);
    let (kit, _, id) = connect(server.clone()).await;

    let states: Vec<_> = kit
        .execute_device_action(&id, OpenApp::new("Ethereum"))
        .unwrap()
        .observable
        .collect()
        .await;
    assert_eq!(
        states,
        vec![
            DeviceActionState::Pending(UserInteractionRequired::None),
            DeviceActionState::Pending(UserInteractionRequired::ConfirmOpenApp),
            DeviceActionState::Pending(UserInteractionRequired::None),
            DeviceActionState::Completed(()),
        ]
    );
    assert!(server.sent().iter().any(|apdu| apdu.starts_with(&[0xe0, 0xd8])));

    kit.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_locked_device_times_out() {
    let server = server();
    server.push_response(&[0xb0, 0x01], &[0x55, 0x15]);
    let (kit, _, id) = connect(server).await;

    let outcome = kit
        .execute_device_action(&id, ListApps::default())
        .unwrap()
        .observable
        .outcome()
        .await;
    assert_eq!(outcome, Err(DeviceActionError::DeviceLocked));
    assert_eq!(
        kit.get_device_session_state(&id).unwrap().device_status,
        DeviceStatus::Locked
    );
}

#[tokio::test(start_paused = true)]
async fn test_bulk_apdus() {
    let server = server();
    server.push_response(&[0xe0, 0x50], &[0x90, 0x00]);
    let (kit, _, id) = connect(server).await;

    let events: Vec<_> = kit
        .send_apdus(&id, vec![apdu("e050000000"), apdu("e050010000")])
        .unwrap()
        .collect()
        .await;
    assert!(matches!(
        events.last(),
        Some(BulkApduEvent::Completed { responses }) if responses.len() == 2
    ));
}

#[tokio::test(start_paused = true)]
async fn test_commands_are_serialized_with_the_refresher() {
    let server = server();
    let (kit, _, id) = connect(server.clone()).await;

    let sends = (0..8).map(|_| kit.send_command(&id, &GetAppAndVersion));
    let results = futures::future::join_all(sends).await;
    assert!(results.into_iter().all(|result| matches!(result, Ok(Ok(_)))));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let polled = server.sent().len();
    assert!(polled > 8, "refresher did not poll: {polled}");
    assert_eq!(
        kit.get_device_session_state(&id).unwrap().device_status,
        DeviceStatus::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_disconnection_removes_session() {
    let server = server();
    let (kit, transport, id) = connect(server).await;
    let mut state = kit.subscribe_device_session_state(&id).unwrap();

    let device = kit.registry().get(&id).unwrap().device().clone();
    transport.disconnect(&device).await.unwrap();

    while state.changed().await.is_ok() {}
    assert_eq!(state.borrow().device_status, DeviceStatus::NotConnected);
    // The session is evicted once its close completes
    while !kit.list_connected_devices().is_empty() {
        tokio::task::yield_now().await;
    }
    assert!(matches!(
        kit.send_apdu(&id, apdu("b001000000"), SendApduOptions::default()).await,
        Err(KitError::SessionNotFound(_))
    ));
}
