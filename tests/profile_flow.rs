mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use common::{acquire_db_lock, json_body, TestApp, REJECT_PROFILE_UPDATES_SQL};
use jobtracker::storage::StorageError;
use serde_json::json;

const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
];

async fn uploaded_url(app: &TestApp, token: &str) -> Result<String> {
    let response = app.upload_photo("me.png", "image/png", PNG_BYTES, token).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(json_body(response).await?["photo_url"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}

fn profile_payload(email: &str) -> serde_json::Value {
    json!({
        "display_name": "Ada Lovelace",
        "email": email,
        "phone_number": "+44 20 7946 0958",
        "bio": "Analytical engines",
        "location": "London",
        "website": "https://ada.dev",
    })
}

#[tokio::test]
async fn profile_save_preserves_created_at_and_updates_identity() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let user = app.signup("ada@example.com", "s3cret!").await?;

    let before = json_body(app.get("/api/profile", Some(&user.token)).await?).await?;
    assert_eq!(before["display_name"], "Test User");

    let response = app
        .put_json(
            "/api/profile",
            &profile_payload("lovelace@example.com"),
            Some(&user.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let saved = json_body(response).await?;
    assert_eq!(saved["email"], "lovelace@example.com");
    assert_eq!(saved["location"], "London");
    assert_eq!(saved["created_at"], before["created_at"]);

    let me = json_body(app.get("/api/auth/me", Some(&user.token)).await?).await?;
    assert_eq!(me["email"], "lovelace@example.com");
    assert_eq!(me["display_name"], "Ada Lovelace");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn email_change_requires_recent_login_and_a_free_address() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let ada = app.signup("ada@example.com", "s3cret!").await?;
    app.signup("bob@example.com", "s3cret!").await?;

    let stale = app.token_authenticated_at(&ada, Utc::now() - Duration::minutes(30))?;
    let response = app
        .put_json("/api/profile", &profile_payload("new@example.com"), Some(&stale))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await?["code"], "auth/requires-recent-login");

    // Other fields can still be saved with an old sign-in.
    let unchanged_email = app
        .put_json("/api/profile", &profile_payload("ada@example.com"), Some(&stale))
        .await?;
    assert_eq!(unchanged_email.status(), StatusCode::OK);

    let taken = app
        .put_json(
            "/api/profile",
            &profile_payload("bob@example.com"),
            Some(&ada.token),
        )
        .await?;
    assert_eq!(taken.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(taken).await?["code"], "auth/email-already-in-use");

    let invalid = app
        .put_json(
            "/api/profile",
            &json!({ "display_name": "Ada", "email": "ada@example.com", "website": "ada.dev" }),
            Some(&ada.token),
        )
        .await?;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(invalid).await?["code"], "validation/website");

    let long_phone = app
        .put_json(
            "/api/profile",
            &json!({
                "display_name": "Ada",
                "email": "ada@example.com",
                "phone_number": "+1 (555) 123-4567 123-4567 123-4567 99",
            }),
            Some(&ada.token),
        )
        .await?;
    assert_eq!(long_phone.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(long_phone).await?["code"], "validation/phone_number");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn photo_upload_replaces_the_previous_image() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let user = app.signup("ada@example.com", "s3cret!").await?;

    let first = app
        .upload_photo("me.png", "image/png", PNG_BYTES, &user.token)
        .await?;
    assert_eq!(first.status(), StatusCode::OK);
    let first_url = json_body(first).await?["photo_url"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert!(first_url.starts_with(&format!("/api/users/{}/photo/profile_", user.user_id)));
    assert!(first_url.ends_with(".png"));

    let redirect = app.get(&first_url, None).await?;
    assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = redirect
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(location.starts_with("https://fake-storage/profile-images/"));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = app
        .upload_photo("me.png", "image/png", PNG_BYTES, &user.token)
        .await?;
    assert_eq!(second.status(), StatusCode::OK);
    let second_url = json_body(second).await?["photo_url"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert_ne!(first_url, second_url);
    assert_eq!(app.storage().object_count().await, 1);
    assert_eq!(
        app.get(&first_url, None).await?.status(),
        StatusCode::NOT_FOUND
    );

    let profile = json_body(app.get("/api/profile", Some(&user.token)).await?).await?;
    assert_eq!(profile["photo_url"], second_url);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn photo_upload_rejects_bad_files_and_reports_storage_errors() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let user = app.signup("ada@example.com", "s3cret!").await?;

    let gif = app
        .upload_photo("me.gif", "image/gif", b"GIF89a", &user.token)
        .await?;
    assert_eq!(gif.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(gif).await?["code"], "validation/file");

    let disguised = app
        .upload_photo("me.png", "image/png", b"not really a png", &user.token)
        .await?;
    assert_eq!(disguised.status(), StatusCode::BAD_REQUEST);

    app.storage()
        .fail_next_put(StorageError::Unauthorized("denied".into()))
        .await;
    let denied = app
        .upload_photo("me.png", "image/png", PNG_BYTES, &user.token)
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(denied).await?["code"], "storage/unauthorized");

    assert_eq!(app.storage().object_count().await, 0);
    let profile = json_body(app.get("/api/profile", Some(&user.token)).await?).await?;
    assert_eq!(profile["photo_url"], serde_json::Value::Null);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_photo_update_keeps_the_current_image() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let user = app.signup("ada@example.com", "s3cret!").await?;
    let current = uploaded_url(&app, &user.token).await?;

    app.execute_sql(REJECT_PROFILE_UPDATES_SQL).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let failed = app
        .upload_photo("me.png", "image/png", PNG_BYTES, &user.token)
        .await?;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(
        app.get(&current, None).await?.status(),
        StatusCode::TEMPORARY_REDIRECT
    );
    assert_eq!(app.storage().object_count().await, 1);
    let profile = json_body(app.get("/api/profile", Some(&user.token)).await?).await?;
    assert_eq!(profile["photo_url"], current);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn previous_photo_cleanup_never_fails_the_upload() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let user = app.signup("ada@example.com", "s3cret!").await?;
    uploaded_url(&app, &user.token).await?;

    app.storage()
        .fail_next_delete(StorageError::Other(anyhow::anyhow!("bucket unavailable")))
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = uploaded_url(&app, &user.token).await?;
    assert_eq!(
        app.get(&second, None).await?.status(),
        StatusCode::TEMPORARY_REDIRECT
    );
    // The old object is left behind when cleanup fails.
    assert_eq!(app.storage().object_count().await, 2);

    for key in app.storage().keys().await {
        app.storage().forget(&key).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let third = uploaded_url(&app, &user.token).await?;
    assert_ne!(third, second);
    assert_eq!(app.storage().object_count().await, 1);
    let profile = json_body(app.get("/api/profile", Some(&user.token)).await?).await?;
    assert_eq!(profile["photo_url"], third);

    app.cleanup().await?;
    Ok(())
}
