mod common;

use axum::http::StatusCode;
use serde_json::json;

// ============================================================================
// GET /api/users/@me
// ============================================================================

#[tokio::test]
async fn get_current_user_includes_private_fields() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let username = common::unique_username();
    let email = format!("{username}@hermes.local");
    common::register_user(app.clone(), &username, &email, "password123").await;
    let token = common::login(app.clone(), &username, "password123").await;

    let (status, body) = common::get_authed(app, "/api/users/@me", &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], username.as_str());
    assert_eq!(body["email"], email.as_str());
    assert_eq!(body["display_name"], "Test User");
}

// ============================================================================
// PATCH /api/users/@me
// ============================================================================

#[tokio::test]
async fn update_all_fields_and_login_with_new_email() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (_, token) = common::register_and_login(app.clone()).await;

    let new_username = common::unique_username();
    let new_email = format!("updated_{new_username}@hermes.local");

    let (status, body) = common::patch_json_authed(
        app.clone(),
        "/api/users/@me",
        &token,
        json!({
            "username": new_username,
            "email": new_email,
            "display_name": "Updated Name",
            "status": "Busy",
            "avatar_url": "https://example.com/avatar.png",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], new_username.as_str());
    assert_eq!(body["display_name"], "Updated Name");
    assert_eq!(body["status"], "Busy");

    // The email change is real: a login with it succeeds.
    common::login(app.clone(), &new_email, "password123").await;

    // A single-field update leaves the rest untouched.
    let (status, body) =
        common::patch_json_authed(app, "/api/users/@me", &token, json!({ "status": "Offline" }))
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Offline");
    assert_eq!(body["username"], new_username.as_str());
}

#[tokio::test]
async fn update_normalizes_identity_fields() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (_, token) = common::register_and_login(app.clone()).await;

    let base = common::unique_username();
    let (status, body) = common::patch_json_authed(
        app.clone(),
        "/api/users/@me",
        &token,
        json!({ "username": format!("  {}  ", base.to_uppercase()) }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], base.as_str());
}

#[tokio::test]
async fn update_validation_names_the_offending_field() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (_, token) = common::register_and_login(app.clone()).await;

    let (status, body) =
        common::patch_json_authed(app.clone(), "/api/users/@me", &token, json!({ "username": "ab" }))
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().to_lowercase().contains("username"));

    let (status, body) = common::patch_json_authed(
        app,
        "/api/users/@me",
        &token,
        json!({ "email": "not-a-valid-email" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().to_lowercase().contains("email"));
}

#[tokio::test]
async fn update_to_taken_username_conflicts() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let taken = common::unique_username();
    common::register_user(
        app.clone(),
        &taken,
        &format!("{taken}@hermes.local"),
        "password123",
    )
    .await;

    let (_, token) = common::register_and_login(app.clone()).await;

    let (status, body) =
        common::patch_json_authed(app, "/api/users/@me", &token, json!({ "username": taken }))
            .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("Username is already taken"));
}

// ============================================================================
// GET /api/users/:id
// ============================================================================

#[tokio::test]
async fn public_profile_hides_email() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (target_id, _) = common::register_and_login(app.clone()).await;
    let (_, searcher_token) = common::register_and_login(app.clone()).await;

    let (status, body) =
        common::get_authed(app, &format!("/api/users/{target_id}"), &searcher_token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"].as_i64(), Some(target_id));
    assert!(body.get("email").is_none(), "email must not leak: {body}");
}

#[tokio::test]
async fn unknown_user_id_is_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (_, token) = common::register_and_login(app.clone()).await;

    let (status, _) = common::get_authed(app, "/api/users/999999999", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_numeric_user_id_is_bad_request() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let (_, token) = common::register_and_login(app.clone()).await;

    let (status, body) =
        common::get_authed(app, "/api/users/invalid_id_format", &token).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid user ID format"));
}

// ============================================================================
// DELETE /api/users/@me
// ============================================================================

#[tokio::test]
async fn delete_account_revokes_sessions_and_credentials() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let username = common::unique_username();
    let email = format!("{username}@hermes.local");
    common::register_user(app.clone(), &username, &email, "password123").await;
    let token = common::login(app.clone(), &username, "password123").await;

    let (status, _) = common::delete_authed(app.clone(), "/api/users/@me", &token).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The session died with the account.
    let (status, _) = common::get_authed(app.clone(), "/api/users/@me", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // And the credentials are gone.
    let (status, _) = common::post_json(
        app,
        "/api/auth/login",
        json!({ "identity": username, "password": "password123" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ghosted_username_is_free_for_reuse() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);

    let username = common::unique_username();
    let email = format!("{username}@hermes.local");
    common::register_user(app.clone(), &username, &email, "password123").await;
    let token = common::login(app.clone(), &username, "password123").await;
    common::delete_authed(app.clone(), "/api/users/@me", &token).await;

    // The partial unique index only covers live accounts.
    let body = common::register_user(app, &username, &email, "password123").await;
    assert_eq!(body["message"], "User registered successfully");
}
