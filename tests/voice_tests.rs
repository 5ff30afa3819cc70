mod common;

use axum::http::StatusCode;

/// Owner + server + default voice channel in one call.
async fn setup(app: axum::Router) -> (i64, String, i64, i64) {
    let (owner_id, token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &token, "Voice Server").await;
    let server_id = server["id"].as_i64().unwrap();
    let voice_id = common::default_channel_id(app, &token, server_id, "VOICE").await;
    (owner_id, token, server_id, voice_id)
}

// ============================================================================
// REST voice presence
// ============================================================================

#[tokio::test]
async fn join_and_leave_voice_via_rest() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, token, server_id, voice_id) = setup(app.clone()).await;

    let (status, body) = common::post_authed(
        app.clone(),
        &format!("/api/servers/{server_id}/channels/{voice_id}/voice/join"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully joined voice channel");

    let (status, body) = common::post_authed(
        app,
        &format!("/api/servers/{server_id}/channels/{voice_id}/voice/leave"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully left voice channel");
}

#[tokio::test]
async fn voice_join_rejects_text_channels() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, token, server_id, _) = setup(app.clone()).await;
    let text_id = common::default_channel_id(app.clone(), &token, server_id, "TEXT").await;

    let (status, body) = common::post_authed(
        app,
        &format!("/api/servers/{server_id}/channels/{text_id}/voice/join"),
        &token,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not a voice channel"));
}

#[tokio::test]
async fn voice_join_requires_membership() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, _token, server_id, voice_id) = setup(app.clone()).await;

    let (_, outsider_token) = common::register_and_login(app.clone()).await;
    let (status, _) = common::post_authed(
        app,
        &format!("/api/servers/{server_id}/channels/{voice_id}/voice/join"),
        &outsider_token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn voice_join_unknown_channel_is_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, token, server_id, _) = setup(app.clone()).await;

    let (status, _) = common::post_authed(
        app,
        &format!("/api/servers/{server_id}/channels/9999999/voice/join"),
        &token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Presence fan-out (observed at the broker, as a message-WS subscriber would)
// ============================================================================

#[tokio::test]
async fn voice_join_and_leave_broadcast_presence_events() {
    let pool = common::test_pool().await;
    let state = common::test_state(pool);
    let app = common::app_from_state(state.clone());
    let (owner_id, token, server_id, voice_id) = setup(app.clone()).await;

    // Subscribers of the voice channel's event stream see presence changes.
    let mut subscription = state.broker.subscribe(voice_id);

    common::post_authed(
        app.clone(),
        &format!("/api/servers/{server_id}/channels/{voice_id}/voice/join"),
        &token,
    )
    .await;

    let event: serde_json::Value =
        serde_json::from_str(&subscription.rx.recv().await.unwrap()).unwrap();
    assert_eq!(event["event"], "VOICE_USER_JOINED");
    // Realtime ids are decimal strings.
    assert_eq!(event["data"]["user_id"], owner_id.to_string());
    assert_eq!(event["data"]["channel_id"], voice_id.to_string());

    common::post_authed(
        app,
        &format!("/api/servers/{server_id}/channels/{voice_id}/voice/leave"),
        &token,
    )
    .await;

    let event: serde_json::Value =
        serde_json::from_str(&subscription.rx.recv().await.unwrap()).unwrap();
    assert_eq!(event["event"], "VOICE_USER_LEFT");
    assert_eq!(event["data"]["user_id"], owner_id.to_string());
}
