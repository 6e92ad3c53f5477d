//! Client message handling as seen by a connected transport

mod common;

use std::time::Duration;

use camrelay::server::{handle_message, ClientMessage};
use camrelay::RelayEvent;
use common::*;

const DEFAULT_SIZE: (u32, u32) = (160, 120);

#[tokio::test]
async fn socket_flow_start_frame_stop() {
    let (controller, backend) = controller();

    let event = handle_message(&controller, DEFAULT_SIZE, ClientMessage::Ping).await;
    assert_eq!(event, RelayEvent::status("Server is reachable"));

    let event = handle_message(
        &controller,
        DEFAULT_SIZE,
        ClientMessage::Frame(png_data_uri(160, 120, [1, 2, 3])),
    )
    .await;
    assert_eq!(event, RelayEvent::error("virtual camera not running"));

    let event = handle_message(
        &controller,
        DEFAULT_SIZE,
        ClientMessage::StartCamera {
            width: None,
            height: None,
        },
    )
    .await;
    assert_eq!(event.name(), "camera_started");
    assert_eq!(
        backend.recording.opened.lock().unwrap()[0],
        (160, 120, 30)
    );

    let event = handle_message(
        &controller,
        DEFAULT_SIZE,
        ClientMessage::Frame(png_data_uri(160, 120, [1, 2, 3])),
    )
    .await;
    assert!(matches!(event, RelayEvent::FrameReceived { sequence: 1 }));

    let event = handle_message(
        &controller,
        DEFAULT_SIZE,
        ClientMessage::Frame("data:image/png;base64,bm90IGFuIGltYWdl".into()),
    )
    .await;
    assert_eq!(event.name(), "error");

    let recording = backend.recording.clone();
    let written = tokio::task::spawn_blocking(move || {
        wait_until(Duration::from_secs(2), || recording.frames().len() == 1)
    })
    .await
    .unwrap();
    assert!(written);

    let event = handle_message(&controller, DEFAULT_SIZE, ClientMessage::StopCamera).await;
    assert_eq!(event, RelayEvent::CameraStopped { frames_written: 1 });

    let event = handle_message(&controller, DEFAULT_SIZE, ClientMessage::StopCamera).await;
    assert_eq!(event, RelayEvent::CameraStopped { frames_written: 0 });
}
