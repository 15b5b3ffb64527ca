//! Streamed and stored macros against an in-memory robot.
#![expect(clippy::expect_used, reason = "test assertions")]

use rstest::rstest;
use sphero_link::{
    Command,
    DriverConfig,
    Macro,
    MacroCommand,
    MacroMode,
    RobotError,
    RobotEvent,
    command::{CommandKind, MAC_END, STREAMING_MACRO_ID, TEMPORARY_MACRO_ID},
    macro_memory::MacroError,
    packet::InformationKind,
    test_helpers::{Harness, Observed, ReceivedCommand},
};

const STEP_LEN: usize = 5;
const MARKER: [u8; 2] = [0x15, 0x01];

fn colour_steps(count: u8) -> Macro {
    (0..count)
        .map(|red| MacroCommand::Rgb {
            red,
            green: 0,
            blue: 0,
            pcd: 10,
        })
        .collect::<Macro>()
}

fn streaming(count: u8) -> Macro {
    let mut mac = colour_steps(count);
    mac.set_mode(MacroMode::Streaming);
    mac
}

async fn harness() -> Harness {
    Harness::connect(DriverConfig::default())
        .await
        .expect("harness")
}

async fn read_upload(harness: &mut Harness) -> ReceivedCommand {
    let upload = harness.device.ack_next().await.expect("upload");
    assert!(upload.is(CommandKind::SaveMacro));
    assert_eq!(upload.data.get(..2), Some([STREAMING_MACRO_ID, 0x01].as_slice()));
    upload
}

async fn marker(harness: &mut Harness) {
    harness
        .device
        .inform(InformationKind::MacroMarker, &[0x01])
        .await
        .expect("marker");
}

#[rstest]
#[tokio::test]
async fn small_macro_streams_in_one_pass() {
    let mut harness = harness().await;
    harness.robot.send_command_after_macro(Command::RgbLed {
        red: 0,
        green: 0,
        blue: 255,
    });

    assert!(harness.robot.play_macro(streaming(60)).expect("play"));

    // 19 steps plus marker fill a 100-byte chunk; 60 steps need four.
    let mut uploads = Vec::new();
    for _ in 0..4 {
        uploads.push(read_upload(&mut harness).await);
    }
    let body_lens: Vec<_> = uploads.iter().map(|u| u.data.len() - 2).collect();
    assert_eq!(body_lens, vec![97, 97, 97, 3 * STEP_LEN + MARKER.len() + 1]);
    let last = uploads.last().expect("last upload");
    assert_eq!(last.data.last(), Some(&MAC_END));
    assert!(uploads.iter().take(3).all(|u| u.data.ends_with(&MARKER)));

    for _ in 0..4 {
        marker(&mut harness).await;
    }

    let follow_up = harness.device.read_command().await.expect("follow-up");
    assert!(follow_up.is(CommandKind::RgbLed));
    assert_eq!(follow_up.data, vec![0, 0, 255, 0]);
    assert_eq!(harness.next_event().await, Some(RobotEvent::MacroDone));
}

#[rstest]
#[tokio::test]
async fn large_macro_waits_for_markers() {
    let mut harness = harness().await;
    let steps: u8 = 250;

    assert!(harness.robot.play_macro(streaming(steps)).expect("play"));

    // 900 bytes hold nine 97-byte chunks before free space drops under 50.
    let mut uploads = Vec::new();
    for _ in 0..9 {
        uploads.push(read_upload(&mut harness).await);
    }
    let expected_chunks = usize::from(steps).div_ceil(19);
    let mut acknowledged = 0;
    while acknowledged < uploads.len() {
        marker(&mut harness).await;
        acknowledged += 1;
        if uploads.len() < expected_chunks {
            uploads.push(read_upload(&mut harness).await);
        }
    }

    assert_eq!(uploads.len(), expected_chunks);
    let streamed: usize = uploads.iter().map(|u| u.data.len() - 2).sum();
    assert_eq!(
        streamed,
        usize::from(steps) * STEP_LEN + expected_chunks * MARKER.len() + 1
    );
    loop {
        match harness.observed.recv().await.expect("observation") {
            Observed::Event(RobotEvent::MacroDone) => break,
            Observed::Information(info) => panic!("marker reached listeners: {info:?}"),
            _ => {}
        }
    }
}

#[rstest]
#[tokio::test]
async fn stop_macro_aborts_and_releases_markers() {
    let mut harness = harness().await;

    assert!(harness.robot.play_macro(streaming(10)).expect("play"));
    read_upload(&mut harness).await;
    harness.robot.stop_macro();

    let abort = harness.device.ack_next().await.expect("abort");
    assert!(abort.is(CommandKind::AbortMacro));
    marker(&mut harness).await;
    let seen = harness.sync().await.expect("sync");

    assert!(matches!(
        seen.as_slice(),
        [Observed::Information(info)] if info.is_macro_marker()
    ));
}

#[rstest]
#[tokio::test]
async fn resubmitting_replaces_running_macro() {
    let mut harness = harness().await;

    assert!(harness.robot.play_macro(streaming(10)).expect("first"));
    read_upload(&mut harness).await;
    assert!(harness.robot.play_macro(streaming(2)).expect("second"));

    let abort = harness.device.ack_next().await.expect("abort");
    assert!(abort.is(CommandKind::AbortMacro));
    let upload = read_upload(&mut harness).await;
    assert_eq!(upload.data.len() - 2, 2 * STEP_LEN + MARKER.len() + 1);

    marker(&mut harness).await;
    assert_eq!(harness.next_event().await, Some(RobotEvent::MacroDone));
}

#[rstest]
#[tokio::test]
async fn normal_macro_is_stored_and_run() {
    let mut harness = harness().await;

    assert!(harness.robot.play_macro(colour_steps(3)).expect("play"));

    let save = harness.device.ack_next().await.expect("save");
    let run = harness.device.ack_next().await.expect("run");
    assert!(save.is(CommandKind::SaveTemporaryMacro));
    assert_eq!(save.data.first(), Some(&0x01));
    assert_eq!(save.data.len(), 1 + 3 * STEP_LEN + 1);
    assert_eq!(save.data.last(), Some(&MAC_END));
    assert!(run.is(CommandKind::RunMacro));
    assert_eq!(run.data, vec![TEMPORARY_MACRO_ID]);
}

#[rstest]
#[tokio::test]
async fn oversized_normal_macro_is_rejected() {
    let harness = harness().await;

    let err = harness
        .robot
        .play_macro(colour_steps(60))
        .expect_err("too long");

    assert!(matches!(
        err,
        RobotError::Macro(MacroError::MacroTooLong { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn streaming_can_be_disabled() {
    let config = DriverConfig {
        macro_streaming: false,
        ..DriverConfig::default()
    };
    let harness = Harness::connect(config).await.expect("harness");

    assert!(!harness.robot.play_macro(streaming(3)).expect("dropped"));
}

#[rstest]
#[tokio::test]
async fn oversized_streamed_step_is_rejected() {
    let harness = harness().await;
    let mac = Macro::new(MacroMode::Streaming).with_command(MacroCommand::Raw(vec![0x01; 99]));

    let err = harness.robot.play_macro(mac).expect_err("too large");

    assert!(matches!(
        err,
        RobotError::Macro(MacroError::CommandTooLarge { len: 99, .. })
    ));
}
