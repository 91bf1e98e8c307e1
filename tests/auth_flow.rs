mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

#[tokio::test]
async fn signup_login_and_me() -> Result<()> {
    let app = common::spawn_app().await?;

    let resp = app
        .json(
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "username": "ada", "email": "ada@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.body["username"], "ada");
    assert_eq!(resp.body["email"], "ada@example.com");
    assert!(resp.body.get("password_hash").is_none(), "hash leaked: {}", resp.body);
    let user_id = resp.body["id"].as_i64().unwrap();

    let role_id = app.grant(user_id, "viewer", &[("articles", "read")]).await?;
    assert!(role_id > 0);

    let resp = app
        .json("POST", "/auth/login", None, Some(json!({ "username": "ada", "password": "password123" })))
        .await?;
    assert_eq!(resp.status, StatusCode::OK);
    let token = resp.body["token"].as_str().unwrap().to_string();
    assert_eq!(token.split('.').count(), 3);

    let resp = app.json("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["id"], user_id);
    assert_eq!(resp.body["roles"], json!(["viewer"]));

    Ok(())
}

#[tokio::test]
async fn signup_edge_cases() -> Result<()> {
    let app = common::spawn_app().await?;
    app.register("ada", "password123").await?;

    let cases = [
        (json!({ "username": "ada", "password": "password456" }), StatusCode::CONFLICT, "conflict"),
        (json!({ "username": "grace", "password": "short" }), StatusCode::BAD_REQUEST, "bad_request"),
        (json!({ "username": "", "password": "password123" }), StatusCode::BAD_REQUEST, "bad_request"),
        (json!({ "username": "grace hopper", "password": "password123" }), StatusCode::BAD_REQUEST, "bad_request"),
        (
            json!({ "username": "grace", "email": "nope", "password": "password123" }),
            StatusCode::BAD_REQUEST,
            "bad_request",
        ),
    ];

    for (payload, status, kind) in cases {
        let resp = app.json("POST", "/auth/signup", None, Some(payload.clone())).await?;
        assert_eq!(resp.status, status, "{payload}");
        assert_eq!(resp.body["error"], kind, "{payload}");
    }

    Ok(())
}

#[tokio::test]
async fn login_failures_look_identical() -> Result<()> {
    let app = common::spawn_app().await?;
    app.register("ada", "password123").await?;

    let wrong_password = app
        .json("POST", "/auth/login", None, Some(json!({ "username": "ada", "password": "password124" })))
        .await?;
    let unknown_user = app
        .json("POST", "/auth/login", None, Some(json!({ "username": "nobody", "password": "password123" })))
        .await?;

    for resp in [&wrong_password, &unknown_user] {
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(resp.body["error"], "invalid_credentials");
    }
    assert_eq!(wrong_password.body, unknown_user.body);

    Ok(())
}

#[tokio::test]
async fn me_requires_a_valid_token() -> Result<()> {
    let app = common::spawn_app().await?;

    let resp = app.json("GET", "/auth/me", None, None).await?;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], "unauthorized");

    let resp = app.json("GET", "/auth/me", Some("garbage"), None).await?;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], "malformed");

    Ok(())
}

#[tokio::test]
async fn token_of_deleted_user_is_rejected() -> Result<()> {
    let app = common::spawn_app().await?;
    let (user_id, token) = app.register("ada", "password123").await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(app.store.pool())
        .await?;

    let resp = app.json("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], "unauthorized");

    Ok(())
}

#[tokio::test]
async fn unparseable_bodies_get_the_error_envelope() -> Result<()> {
    let app = common::spawn_app().await?;

    let cases = [
        ("/auth/login", "application/json", "{not json"),
        ("/auth/login", "application/json", r#"{"username":"ada"}"#),
        ("/auth/login", "application/json", r#"{"username":"ada","password":7}"#),
        ("/auth/signup", "application/json", "[]"),
        ("/auth/signup", "text/plain", r#"{"username":"ada","password":"password123"}"#),
    ];

    for (uri, content_type, body) in cases {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .body(Body::from(body))?;
        let resp = app.send(req).await?;

        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{uri} {body}");
        assert_eq!(resp.body["error"], "malformed", "{uri} {body}");
        assert!(resp.body["message"].as_str().is_some_and(|m| !m.is_empty()), "{uri} {body}");
    }

    Ok(())
}
