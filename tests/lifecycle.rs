//! Connection lifecycle against an in-memory robot.
#![expect(clippy::expect_used, reason = "test assertions")]

use std::{io, time::Duration};

use rstest::rstest;
use sphero_link::{
    Command,
    ConnectionState,
    DriverConfig,
    RobotError,
    RobotEvent,
    TransportError,
    command::CommandKind,
    packet::ResponseCode,
    test_helpers::{
        Harness,
        Observed,
        RESET_SEQUENCE_LEN,
        ReceivedCommand,
        capture_events,
        next_event,
        settle,
    },
};
use tracing::Level;

fn ids(commands: &[ReceivedCommand]) -> Vec<(u8, u8)> {
    commands
        .iter()
        .map(|command| (command.device_id, command.command_id))
        .collect()
}

fn expected(kinds: &[CommandKind]) -> Vec<(u8, u8)> {
    kinds
        .iter()
        .map(|kind| (kind.device_id(), kind.command_id()))
        .collect()
}

fn events(observed: Vec<Observed>) -> Vec<RobotEvent> {
    observed
        .into_iter()
        .filter_map(|item| match item {
            Observed::Event(event) => Some(event),
            _ => None,
        })
        .collect()
}

#[rstest]
#[tokio::test]
async fn connect_replays_reset_sequence() {
    let (robot, _connector, mut devices, mut observed) =
        Harness::robot(DriverConfig::default()).expect("robot");

    assert!(robot.connect().await.expect("connect"));
    assert!(robot.is_connected());
    let mut device = devices.recv().await.expect("device");
    let reset = device.ack_many(RESET_SEQUENCE_LEN).await.expect("reset");

    assert_eq!(
        ids(&reset),
        expected(&[
            CommandKind::AbortMacro,
            CommandKind::RgbLed,
            CommandKind::Roll,
            CommandKind::Calibrate,
            CommandKind::FrontLed,
        ])
    );
    assert_eq!(reset.get(1).map(|c| c.data.clone()), Some(vec![255, 255, 255, 0]));
    assert_eq!(next_event(&mut observed).await, Some(RobotEvent::Connected));
}

#[rstest]
#[tokio::test]
async fn connect_twice_keeps_one_connection() {
    let harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");

    assert!(harness.robot.connect().await.expect("connect"));
    assert_eq!(harness.connector.opened(), 1);
}

#[rstest]
#[tokio::test]
async fn graceful_disconnect_waits_for_shutdown_pair() {
    let mut harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");
    let Harness { robot, device, .. } = &mut harness;

    let (done, shutdown) = tokio::join!(robot.disconnect(), device.ack_many(2));

    assert!(done);
    assert_eq!(
        ids(&shutdown.expect("shutdown pair")),
        expected(&[CommandKind::Roll, CommandKind::FrontLed])
    );
    assert_eq!(harness.robot.state(), ConnectionState::Disconnected);
    assert_eq!(harness.next_event().await, Some(RobotEvent::Disconnected));
    assert!(harness.device.read_command().await.is_err());
}

#[rstest]
#[tokio::test]
async fn earlier_command_counts_as_first_shutdown_echo() {
    let mut harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");
    assert!(harness.robot.roll(90.0, 0.5));
    let Harness { robot, device, .. } = &mut harness;

    let (done, acked) = tokio::join!(robot.disconnect(), device.ack_many(2));

    assert!(done);
    assert_eq!(
        ids(&acked.expect("acks")),
        expected(&[CommandKind::Roll, CommandKind::Roll])
    );
    let observed = harness.drain_observed();
    assert!(matches!(
        observed.first(),
        Some(Observed::Response(_, Command::Roll { .. }))
    ));
    assert_eq!(events(observed), vec![RobotEvent::Disconnected]);
    assert!(harness.robot.shadow().movement().stopped);
}

#[rstest]
#[tokio::test]
async fn disconnect_without_connection_reports_once() {
    let (robot, connector, _devices, mut observed) =
        Harness::robot(DriverConfig::default()).expect("robot");

    assert!(!robot.disconnect().await);

    assert!(matches!(
        observed.try_recv(),
        Ok(Observed::Event(RobotEvent::NoConnection))
    ));
    assert!(observed.try_recv().is_err());
    assert_eq!(connector.opened(), 0);
}

#[rstest]
#[tokio::test]
async fn device_drop_is_an_unexpected_disconnect() {
    let harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");
    let Harness {
        robot,
        device,
        mut observed,
        ..
    } = harness;

    drop(device);

    assert_eq!(
        next_event(&mut observed).await,
        Some(RobotEvent::UnexpectedDisconnect)
    );
    settle().await;
    assert!(observed.try_recv().is_err());
    assert!(!robot.is_connected());
    assert!(!robot.send_command(Command::Ping));
    assert!(
        robot
            .send_command_after(Command::Ping, Duration::from_millis(1))
            .is_none()
    );
}

#[rstest]
#[tokio::test]
async fn device_drop_is_logged_as_closed_transport() {
    let harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");
    let Harness {
        device,
        mut observed,
        ..
    } = harness;
    let logs = capture_events();

    drop(device);
    assert_eq!(
        next_event(&mut observed).await,
        Some(RobotEvent::UnexpectedDisconnect)
    );

    let closed = logs.with_message("connection closed unexpectedly");
    assert_eq!(closed.len(), 1);
    assert_eq!(closed.first().map(|event| event.level()), Some(Level::ERROR));
    assert_eq!(
        closed.first().and_then(|event| event.field("error")),
        Some(TransportError::Closed.to_string().as_str())
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn keep_alive_pings_until_disconnect() {
    let config = DriverConfig {
        ping_interval_ms: 100,
        ..DriverConfig::default()
    };
    let mut harness = Harness::connect(config).await.expect("harness");
    let started = tokio::time::Instant::now();

    let pings = harness.device.ack_many(2).await.expect("pings");

    assert_eq!(
        ids(&pings),
        expected(&[CommandKind::Ping, CommandKind::Ping])
    );
    assert!(started.elapsed() >= Duration::from_millis(100));

    let Harness { robot, device, .. } = &mut harness;
    let (done, shutdown) = tokio::join!(robot.disconnect(), async {
        let pair = [device.read_command().await?, device.read_command().await?];
        // Several ping periods pass while the shutdown pair is unconfirmed.
        tokio::time::advance(Duration::from_millis(350)).await;
        settle().await;
        device.respond(ResponseCode::Ok, &[]).await?;
        device.respond(ResponseCode::Ok, &[]).await?;
        io::Result::Ok(pair)
    });

    assert!(done);
    assert_eq!(
        ids(&shutdown.expect("shutdown pair")),
        expected(&[CommandKind::Roll, CommandKind::FrontLed])
    );
    // Anything written before teardown would be read ahead of end of stream.
    assert!(harness.device.read_command().await.is_err());
}

#[rstest]
#[tokio::test]
async fn reconnects_after_unexpected_disconnect() {
    let harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");
    let Harness {
        robot,
        device,
        mut observed,
        mut devices,
        connector,
        ..
    } = harness;
    drop(device);
    assert_eq!(
        next_event(&mut observed).await,
        Some(RobotEvent::UnexpectedDisconnect)
    );

    assert!(robot.connect().await.expect("reconnect"));
    let mut device = devices.recv().await.expect("second device");
    let reset = device.ack_many(RESET_SEQUENCE_LEN).await.expect("reset");

    assert_eq!(reset.len(), RESET_SEQUENCE_LEN);
    assert_eq!(connector.opened(), 2);
    assert_eq!(next_event(&mut observed).await, Some(RobotEvent::Connected));
}

#[rstest]
#[tokio::test]
async fn refused_connect_reports_false() {
    let (robot, connector, _devices, mut observed) =
        Harness::robot(DriverConfig::default()).expect("robot");
    connector.refuse(true);

    assert!(!robot.connect().await.expect("no error"));

    assert_eq!(robot.state(), ConnectionState::Disconnected);
    assert_eq!(next_event(&mut observed).await, Some(RobotEvent::ConnectFailed));
}

#[rstest]
#[tokio::test]
async fn refused_connect_can_raise() {
    let config = DriverConfig {
        raise_on_connect_failure: true,
        ..DriverConfig::default()
    };
    let (robot, connector, _devices, _observed) = Harness::robot(config).expect("robot");
    connector.refuse(true);

    let err = robot.connect().await.expect_err("raised");

    assert!(matches!(
        err,
        RobotError::ConnectFailed(TransportError::Open { .. })
    ));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unconfirmed_shutdown_closes_after_grace_period() {
    let config = DriverConfig {
        disconnect_grace_ms: 100,
        ..DriverConfig::default()
    };
    let mut harness = Harness::connect(config).await.expect("harness");
    let started = tokio::time::Instant::now();

    assert!(harness.robot.disconnect().await);

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(harness.next_event().await, Some(RobotEvent::Disconnected));
    let first = harness.device.read_command().await.expect("stop roll");
    let second = harness.device.read_command().await.expect("front led off");
    assert!(first.is(CommandKind::Roll));
    assert!(second.is(CommandKind::FrontLed));
    assert_eq!(second.data, vec![0]);
}

#[rstest]
#[tokio::test]
async fn accepted_sleep_starts_graceful_disconnect() {
    let mut harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");

    assert!(harness.robot.sleep(0));
    let sleep = harness.device.ack_next().await.expect("sleep");
    assert!(sleep.is(CommandKind::Sleep));
    let shutdown = harness.device.ack_many(2).await.expect("shutdown pair");

    assert_eq!(
        ids(&shutdown),
        expected(&[CommandKind::Roll, CommandKind::FrontLed])
    );
    assert_eq!(harness.next_event().await, Some(RobotEvent::Disconnected));
    assert!(!harness.robot.is_connected());
}

#[rstest]
#[tokio::test]
async fn commands_after_disconnect_starts_are_dropped() {
    let mut harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");
    let Harness { robot, device, .. } = &mut harness;

    let (done, _) = tokio::join!(robot.disconnect(), async {
        assert!(!robot.set_rgb_led(1, 2, 3));
        device.ack_many(2).await
    });

    assert!(done);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unanswered_commands_time_out_when_enabled() {
    let config = DriverConfig {
        response_timeout_ms: Some(50),
        ..DriverConfig::default()
    };
    let (robot, _connector, mut devices, mut observed) = Harness::robot(config).expect("robot");
    assert!(robot.connect().await.expect("connect"));
    let mut device = devices.recv().await.expect("device");
    for _ in 0..RESET_SEQUENCE_LEN {
        device.read_command().await.expect("reset command");
    }

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;

    let mut timed_out = Vec::new();
    while let Ok(item) = observed.try_recv() {
        if let Observed::Event(RobotEvent::ResponseTimeout(command)) = item {
            timed_out.push(command);
        }
    }
    assert_eq!(timed_out.len(), RESET_SEQUENCE_LEN);
    assert_eq!(timed_out.first(), Some(&Command::AbortMacro));
}

#[rstest]
#[tokio::test]
async fn bluetooth_info_updates_name() {
    let mut harness = Harness::connect(DriverConfig::default())
        .await
        .expect("harness");
    assert_eq!(harness.robot.name(), None);

    assert!(harness.robot.refresh_name());
    let request = harness.device.read_command().await.expect("info request");
    assert!(request.is(CommandKind::GetBluetoothInfo));
    let mut payload = b"Sphero-GBR".to_vec();
    payload.resize(16, 0);
    payload.extend_from_slice(b"000666112233");
    payload.extend_from_slice(&[0, 0]);
    harness
        .device
        .respond(ResponseCode::Ok, &payload)
        .await
        .expect("respond");
    let seen = harness.sync().await.expect("sync");

    assert!(seen.is_empty());
    assert_eq!(harness.robot.name().as_deref(), Some("Sphero-GBR"));
}
