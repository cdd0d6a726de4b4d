//! ---
//! album_section: "02-messaging-envelope"
//! album_subsection: "integration-tests"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Wire compatibility checks for the message envelope."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use r_album_msg::{decode_text, encode_text, Envelope, Frame, RequestId, Response};
use serde_json::json;

#[test]
fn decodes_frames_produced_by_browser_clients() -> anyhow::Result<()> {
    let text = r#"{"type":"request","requestId":"8c1e","action":"PicisaClient:readAlbumIndex","payload":{"args":{"album":{"key":"a","name":"A"}}}}"#;
    let envelope = decode_text(text)?;
    let Envelope::Request(request) = envelope else {
        panic!("expected request");
    };
    assert_eq!(request.request_id, Some(RequestId::from("8c1e")));
    assert_eq!(
        request.service_method(),
        Some(("PicisaClient", "readAlbumIndex"))
    );
    assert_eq!(request.payload["args"]["album"]["name"], json!("A"));
    Ok(())
}

#[test]
fn responses_ignore_stray_action_field() -> anyhow::Result<()> {
    let text = r#"{"type":"response","requestId":"1","action":"ignored","payload":{"ok":true}}"#;
    let envelope = decode_text(text)?;
    assert_eq!(
        envelope,
        Envelope::Response(Response::success(RequestId::from("1"), json!({"ok": true})))
    );
    Ok(())
}

#[test]
fn encoded_responses_omit_unset_error() -> anyhow::Result<()> {
    let envelope = Envelope::from(Response::success(RequestId::from("7"), json!("hi")));
    let text = encode_text(&envelope)?;
    assert!(!text.contains("error"));
    assert_eq!(Frame::Text(text).into_envelope()?, envelope);
    Ok(())
}
