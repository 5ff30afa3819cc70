mod common;

use axum::http::StatusCode;
use serde_json::json;

// ============================================================================
// POST /api/servers — create
// ============================================================================

#[tokio::test]
async fn create_server_returns_entity_and_auto_joins_owner() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (user_id, token) = common::register_and_login(app.clone()).await;

    let server = common::create_server(app.clone(), &token, "My Awesome Server").await;
    assert_eq!(server["name"], "My Awesome Server");
    assert_eq!(server["owner_id"].as_i64(), Some(user_id));
    assert!(server["id"].is_i64());

    // Owner membership is immediate: the server shows up in their list.
    let (status, body) = common::get_authed(app, "/api/servers", &token).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert!(listed.iter().any(|s| s["id"] == server["id"]));
}

#[tokio::test]
async fn create_server_validates_name_length() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, token) = common::register_and_login(app.clone()).await;

    let (status, _) =
        common::post_json_authed(app.clone(), "/api/servers", &token, json!({ "name": "X" }))
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = common::post_json_authed(
        app,
        "/api/servers",
        &token,
        json!({ "name": "Y".repeat(101) }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_servers_in_creation_order() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, token) = common::register_and_login(app.clone()).await;

    let first = common::create_server(app.clone(), &token, "Server One").await;
    let second = common::create_server(app.clone(), &token, "Server Two").await;

    let (status, body) = common::get_authed(app, "/api/servers", &token).await;
    assert_eq!(status, StatusCode::OK);

    let servers = body.as_array().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0]["id"], first["id"]);
    assert_eq!(servers[1]["id"], second["id"]);
}

// ============================================================================
// GET/PATCH/DELETE /api/servers/:id
// ============================================================================

#[tokio::test]
async fn get_server_requires_membership() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Members Only").await;
    let server_id = server["id"].as_i64().unwrap();

    let (status, body) =
        common::get_authed(app.clone(), &format!("/api/servers/{server_id}"), &owner_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Members Only");

    // Non-members see a 404, not a 403: the server is invisible to them.
    let (_, outsider_token) = common::register_and_login(app.clone()).await;
    let (status, _) =
        common::get_authed(app, &format!("/api/servers/{server_id}"), &outsider_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_server_is_owner_only() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Original Name").await;
    let server_id = server["id"].as_i64().unwrap();

    let (status, body) = common::patch_json_authed(
        app.clone(),
        &format!("/api/servers/{server_id}"),
        &owner_token,
        json!({ "name": "Updated Name" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Updated Name");

    let (_, member_token) = common::join_as_new_user(app.clone(), server_id).await;
    let (status, _) = common::patch_json_authed(
        app,
        &format!("/api/servers/{server_id}"),
        &member_token,
        json!({ "name": "Hijacked" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn delete_server_cascades() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &token, "Temporary Server").await;
    let server_id = server["id"].as_i64().unwrap();

    let (status, _) =
        common::delete_authed(app.clone(), &format!("/api/servers/{server_id}"), &token).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Everything under it is gone.
    let (status, _) =
        common::get_authed(app.clone(), &format!("/api/servers/{server_id}/channels"), &token)
            .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = common::get_authed(app, "/api/servers", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn delete_server_is_owner_only() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Keep Out").await;
    let server_id = server["id"].as_i64().unwrap();

    let (_, member_token) = common::join_as_new_user(app.clone(), server_id).await;
    let (status, _) =
        common::delete_authed(app, &format!("/api/servers/{server_id}"), &member_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// join / leave / rejoin
// ============================================================================

#[tokio::test]
async fn join_server_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Community Hub").await;
    let server_id = server["id"].as_i64().unwrap();

    let (_, joiner_token) = common::register_and_login(app.clone()).await;
    let (status, body) =
        common::post_authed(app, &format!("/api/servers/{server_id}/join"), &joiner_token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully joined the server");
}

#[tokio::test]
async fn join_twice_conflicts() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Exclusive Club").await;
    let server_id = server["id"].as_i64().unwrap();

    // The owner is already an active member via auto-join.
    let (status, body) =
        common::post_authed(app, &format!("/api/servers/{server_id}/join"), &owner_token).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("already a member"));
}

#[tokio::test]
async fn leave_then_rejoin_reuses_the_membership_row() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Rejoin Test").await;
    let server_id = server["id"].as_i64().unwrap();

    let (_, member_token) = common::join_as_new_user(app.clone(), server_id).await;

    let (status, _) = common::delete_authed(
        app.clone(),
        &format!("/api/servers/{server_id}/leave"),
        &member_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // While inactive, the server is invisible again.
    let (status, _) =
        common::get_authed(app.clone(), &format!("/api/servers/{server_id}"), &member_token)
            .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = common::post_authed(
        app.clone(),
        &format!("/api/servers/{server_id}/join"),
        &member_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully rejoined the server");

    // Rejoining made the same row active again: joining once more conflicts.
    let (status, _) = common::post_authed(
        app,
        &format!("/api/servers/{server_id}/join"),
        &member_token,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn owner_cannot_leave() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Owner Jail").await;
    let server_id = server["id"].as_i64().unwrap();

    let (status, body) =
        common::delete_authed(app, &format!("/api/servers/{server_id}/leave"), &owner_token)
            .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("owner cannot leave without transferring ownership"));
}

#[tokio::test]
async fn join_deleted_server_fails() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Short Lived").await;
    let server_id = server["id"].as_i64().unwrap();

    common::delete_authed(app.clone(), &format!("/api/servers/{server_id}"), &owner_token).await;

    let (_, joiner_token) = common::register_and_login(app.clone()).await;
    let (status, body) =
        common::post_authed(app, &format!("/api/servers/{server_id}/join"), &joiner_token).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().to_lowercase().contains("server not found"));
}

// ============================================================================
// POST /api/servers/:id/transfer
// ============================================================================

#[tokio::test]
async fn transfer_ownership_then_old_owner_may_leave() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (_, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "Handover").await;
    let server_id = server["id"].as_i64().unwrap();

    let (member_id, _) = common::join_as_new_user(app.clone(), server_id).await;

    let (status, body) = common::post_json_authed(
        app.clone(),
        &format!("/api/servers/{server_id}/transfer"),
        &owner_token,
        json!({ "user_id": member_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner_id"].as_i64(), Some(member_id));

    // The previous owner is an ordinary member now and may leave.
    let (status, _) =
        common::delete_authed(app, &format!("/api/servers/{server_id}/leave"), &owner_token)
            .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn transfer_is_owner_only_and_needs_an_active_member() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (owner_id, owner_token) = common::register_and_login(app.clone()).await;
    let server = common::create_server(app.clone(), &owner_token, "No Handover").await;
    let server_id = server["id"].as_i64().unwrap();

    let (member_id, member_token) = common::join_as_new_user(app.clone(), server_id).await;

    // A member cannot grab ownership.
    let (status, _) = common::post_json_authed(
        app.clone(),
        &format!("/api/servers/{server_id}/transfer"),
        &member_token,
        json!({ "user_id": member_id }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The target must be an active member.
    let (outsider_id, _) = common::register_and_login(app.clone()).await;
    let (status, _) = common::post_json_authed(
        app.clone(),
        &format!("/api/servers/{server_id}/transfer"),
        &owner_token,
        json!({ "user_id": outsider_id }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Self-transfer is rejected.
    let (status, _) = common::post_json_authed(
        app,
        &format!("/api/servers/{server_id}/transfer"),
        &owner_token,
        json!({ "user_id": owner_id }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
