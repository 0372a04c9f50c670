use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use meshtag::{
    ConnectionController, FakeTransport, FakeTransportConfig, FrameCodec, InteractionError,
    MotionSettings, ProtocolError, RAW_STATUS_ON, TagDevice, WriteMode,
};

fn fake(config: FakeTransportConfig) -> Arc<FakeTransport> {
    Arc::new(FakeTransport::new(config))
}

async fn wait_connected(controller: &ConnectionController) {
    let mut connectivity = controller.streams().connectivity();
    connectivity
        .wait_for(|connected| *connected)
        .await
        .expect("connectivity stream should stay open");
}

async fn wait_cleaned_up(controller: &ConnectionController) {
    // Cleanup resets connectivity first and battery last, and the battery
    // watch wakes on every publish even when the value was already unset, so
    // the next publish that leaves battery empty marks the end of teardown.
    // Waiting on the value alone would resolve immediately on a fresh
    // controller, before the session task has run at all.
    let mut battery = controller.streams().battery();
    loop {
        battery
            .changed()
            .await
            .expect("battery stream should stay open");
        if battery.borrow_and_update().is_none() {
            break;
        }
    }
}

#[tokio::test]
async fn discovery_connects_and_completes_the_handshake() {
    let transport = fake(FakeTransportConfig::builder().build());
    let device = TagDevice::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100BU1234567",
    );
    let controller = device.controller().clone();

    controller.on_discovered(true);
    wait_connected(&controller).await;

    // The feature-enable literal is written as-is with an acknowledgement.
    let writes = transport.writes();
    assert_eq!(1, writes.len());
    assert_eq!(meshtag::CMD_FEATURE_ENABLE.to_vec(), writes[0].payload);
    assert_eq!(WriteMode::WithResponse, writes[0].mode);

    // Device info populated battery and firmware before connectivity.
    assert_eq!(Some(100), *controller.streams().battery().borrow());
    assert_eq!(Some("1.0.0".to_string()), device.firmware());

    controller.close().await;
}

#[tokio::test]
async fn motion_tags_push_their_configuration_on_connect() {
    let transport = fake(FakeTransportConfig::builder().build());
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100MD1234567",
    );

    controller.on_discovered(true);
    wait_connected(&controller).await;

    let writes = transport.writes();
    assert_eq!(2, writes.len());
    let expected = FrameCodec::encode_command(&MotionSettings::default().config_payload(true));
    assert_eq!(expected, writes[1].payload);

    controller.close().await;
}

#[tokio::test]
async fn repeated_sightings_while_connected_are_no_ops() {
    let transport = fake(FakeTransportConfig::builder().build());
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100BU1234567",
    );

    controller.on_discovered(true);
    wait_connected(&controller).await;

    controller.on_discovered(true);
    controller.on_discovered(true);
    tokio::task::yield_now().await;

    assert_eq!(1, transport.connect_attempts());
    assert!(*controller.streams().connectivity().borrow());

    controller.close().await;
}

#[tokio::test(start_paused = true)]
async fn missing_device_info_times_out_and_allows_a_retry() {
    let transport = fake(
        FakeTransportConfig::builder()
            .withhold_device_info(true)
            .build(),
    );
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100BU1234567",
    );

    controller.on_discovered(true);
    wait_cleaned_up(&controller).await;

    assert_eq!(1, transport.connect_attempts());
    assert!(!*controller.streams().connectivity().borrow());
    assert!(!transport.link_up());

    // The next sighting starts a fresh attempt.
    controller.on_discovered(true);
    wait_cleaned_up(&controller).await;
    assert_eq!(2, transport.connect_attempts());

    controller.close().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_enable_ack_times_out() {
    let transport = fake(
        FakeTransportConfig::builder()
            .stall_enable_ack(true)
            .build(),
    );
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100BU1234567",
    );

    controller.on_discovered(true);
    wait_cleaned_up(&controller).await;

    // The session really ran: it connected, then gave up on the stalled ack.
    assert_eq!(1, transport.connect_attempts());
    assert!(!*controller.streams().connectivity().borrow());
    assert!(!transport.link_up());
    assert!(transport.writes().is_empty());
}

#[tokio::test]
async fn link_loss_resets_connectivity_then_battery() {
    let transport = fake(FakeTransportConfig::builder().build());
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100BU1234567",
    );

    controller.on_discovered(true);
    wait_connected(&controller).await;
    assert_eq!(Some(100), *controller.streams().battery().borrow());

    transport.trigger_disconnect();
    wait_cleaned_up(&controller).await;

    assert!(!*controller.streams().connectivity().borrow());
    assert_eq!(None, *controller.streams().battery().borrow());

    // Sends now fail until a new session is established.
    let result = controller.send_raw(&RAW_STATUS_ON).await;
    assert_matches!(result, Err(InteractionError::NotConnected { .. }));
}

#[tokio::test]
async fn close_tears_the_session_down_and_blocks_new_attempts() {
    let transport = fake(FakeTransportConfig::builder().build());
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100BU1234567",
    );

    controller.on_discovered(true);
    wait_connected(&controller).await;

    controller.close().await;
    assert!(!*controller.streams().connectivity().borrow());
    assert!(!transport.link_up());

    controller.on_discovered(true);
    tokio::task::yield_now().await;
    assert_eq!(1, transport.connect_attempts());

    // Closing again is harmless.
    controller.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sightings_racing_a_close_never_leave_a_session_running() {
    for _ in 0..64 {
        let transport = fake(FakeTransportConfig::builder().build());
        let controller = ConnectionController::new(
            Arc::clone(&transport) as _,
            "AA:BB:CC:DD:EE:FF",
            "MESH-100BU1234567",
        );

        let racer = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller.on_discovered(true);
            })
        };
        controller.close().await;
        racer.await.expect("sighting task should finish");

        // Whichever side won the slot: a handle stored before close() took
        // it was cancelled and awaited, and a sighting that lost saw the
        // closed flag. Either way the link is down and sends are rejected.
        assert!(!transport.link_up());
        assert_matches!(
            controller.send_raw(&RAW_STATUS_ON).await,
            Err(InteractionError::NotConnected { .. })
        );
    }
}

#[tokio::test]
async fn commands_are_framed_and_raw_writes_pass_through() {
    let transport = fake(FakeTransportConfig::builder().build());
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100LE1234567",
    );

    controller.on_discovered(true);
    wait_connected(&controller).await;

    controller
        .send_command(&[0x00, 0x04, 0x00])
        .await
        .expect("framed send should succeed");
    controller
        .send_raw(&RAW_STATUS_ON)
        .await
        .expect("raw send should succeed");

    let writes = transport.writes();
    // Enable command, then the framed command, then the raw literal.
    assert_eq!(3, writes.len());
    assert_eq!(vec![0x00, 0x04, 0x00, 0x04], writes[1].payload);
    assert_eq!(RAW_STATUS_ON.to_vec(), writes[2].payload);

    controller.close().await;
}

#[tokio::test]
async fn typed_setters_validate_before_writing() {
    let transport = fake(FakeTransportConfig::builder().build());
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100GP1234567",
    );

    controller.on_discovered(true);
    wait_connected(&controller).await;
    let writes_before = transport.writes().len();

    let result = controller.set_digital_output(7, true).await;
    assert_matches!(result, Err(ProtocolError::Command(_)));
    assert_eq!(writes_before, transport.writes().len());

    controller
        .set_digital_output(2, true)
        .await
        .expect("valid pin should be accepted");
    let writes = transport.writes();
    assert_eq!(writes_before + 1, writes.len());
    // The new configuration frame reflects the raised pin bit.
    let config = &writes[writes.len() - 1].payload;
    assert_eq!(0x01, config[0]);
    assert_eq!(0x01, config[1]);
    assert_eq!(0b010, config[4]);

    controller.close().await;
}

#[tokio::test(start_paused = true)]
async fn motion_timer_updates_reconfigure_without_reinitialising() {
    let transport = fake(FakeTransportConfig::builder().build());
    let controller = ConnectionController::new(
        Arc::clone(&transport) as _,
        "AA:BB:CC:DD:EE:FF",
        "MESH-100MD1234567",
    );

    controller.on_discovered(true);
    wait_connected(&controller).await;

    controller
        .set_motion_hold_ms(2_000)
        .await
        .expect("in-range hold time should be accepted");

    let writes = transport.writes();
    let mut expected_settings = MotionSettings::default();
    expected_settings
        .set_hold_ms(2_000)
        .expect("hold time is in range");
    let expected = FrameCodec::encode_command(&expected_settings.config_payload(false));
    assert_eq!(expected, writes[writes.len() - 1].payload);

    let result = controller.set_motion_hold_ms(100).await;
    assert_matches!(result, Err(ProtocolError::Command(_)));

    controller.close().await;
}
