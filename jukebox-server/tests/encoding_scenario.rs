//! NFC tag encoding driven by hardware events on the bus

mod helpers;

use axum::http::StatusCode;
use helpers::{TestServer, ALBUM_ID};
use jukebox_common::events::{EncodingState, JukeboxEvent};
use serde_json::json;

const UID: &str = "04:AA:BB:CC";

#[tokio::test]
async fn test_encode_album_onto_tag() {
    let server = TestServer::start();
    let mut client = server.state.broadcaster.subscribe();

    let (status, body) = server
        .post("/api/nfc-encoding/start", Some(json!({"album_id": ALBUM_ID})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert_eq!(server.state.encoding.status().state, Some(EncodingState::Waiting));

    server.state.bus.publish(JukeboxEvent::TagDetected {
        uid: UID.to_string(),
    });
    assert_eq!(server.state.encoding.status().state, Some(EncodingState::Encoding));

    server.state.bus.publish(JukeboxEvent::TagWritten {
        uid: UID.to_string(),
    });

    let (status, body) = server.get("/api/nfc-encoding/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["encoding_mode"], false);
    assert_eq!(body["success"], true);
    assert_eq!(body["last_uid"], UID);
    assert_eq!(body["session_id"], session_id.as_str());

    // Terminal state was pushed to live clients
    let frame = client.receiver.try_recv().unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.text()).unwrap();
    assert_eq!(value["type"], "notification");
    assert_eq!(value["payload"]["type"], "EncodingFinished");
    assert_eq!(value["payload"]["state"], "success");
    assert_eq!(value["payload"]["uid"], UID);

    // Slot is free again
    let (status, _) = server
        .post("/api/nfc-encoding/start", Some(json!({"album_id": ALBUM_ID})))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_events_without_session_are_ignored() {
    let server = TestServer::start();

    server.state.bus.publish(JukeboxEvent::TagWritten {
        uid: UID.to_string(),
    });

    let status = server.state.encoding.status();
    assert!(!status.encoding_mode);
    assert!(!status.success);
    assert!(status.last_uid.is_none());
}

#[tokio::test]
async fn test_only_one_session_at_a_time() {
    let server = TestServer::start();
    let encoding = &server.state.encoding;

    let first = encoding.start(ALBUM_ID).unwrap();
    for _ in 0..3 {
        assert!(encoding.start(ALBUM_ID).is_err());
    }
    assert_eq!(encoding.active_session().unwrap().session_id, first);

    server.state.bus.publish(JukeboxEvent::TagWriteFailed {
        reason: "tag removed".to_string(),
    });
    assert!(encoding.active_session().is_none());
    assert_ne!(encoding.start(ALBUM_ID).unwrap(), first);
}
