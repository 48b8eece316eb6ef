#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use chrono::{Duration, Utc};
use mockito::{Matcher, Server};
use opencloud_client::{ClientConfig, Error, OAuth2App};
use serde_json::json;

const REDIRECT: &str = "https://example.com/callback";

fn app(server: &Server) -> OAuth2App {
    let config = ClientConfig::default().with_base_url(server.url());
    OAuth2App::with_config(3210, "client-secret", REDIRECT, &config).unwrap()
}

fn token_body(access: &str, refresh: &str) -> String {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "openid profile"
    })
    .to_string()
}

#[tokio::test]
async fn test_exchange_code() {
    let mut server = Server::new_async().await;

    let m = server
        .mock("POST", "/oauth/v1/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("client_id".into(), "3210".into()),
            Matcher::UrlEncoded("client_secret".into(), "client-secret".into()),
            Matcher::UrlEncoded("redirect_uri".into(), REDIRECT.into()),
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "abc".into()),
        ]))
        .with_status(200)
        .with_body(token_body("access-1", "refresh-1"))
        .create_async()
        .await;

    let before = Utc::now();
    let token = app(&server).exchange_code("abc").await.unwrap();

    assert_eq!(token.token(), "access-1");
    assert_eq!(token.refresh_token(), "refresh-1");
    assert_eq!(token.scopes(), &["openid".to_string(), "profile".to_string()]);
    assert!(token.expires_at() >= before + Duration::seconds(3600));
    assert!(token.expires_at() <= Utc::now() + Duration::seconds(3600));
    assert!(!token.is_expired());
    m.assert_async().await;
}

#[tokio::test]
async fn test_exchange_rejected_code() {
    let mut server = Server::new_async().await;

    let _m = server
        .mock("POST", "/oauth/v1/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let err = app(&server).exchange_code("stale").await.unwrap_err();
    assert!(matches!(err, Error::InvalidCredential(ref msg) if msg.contains("redirect uri")));
}

#[tokio::test]
async fn test_token_bound_bad_request() {
    let mut server = Server::new_async().await;

    let _m = server
        .mock("POST", "/oauth/v1/token/resources")
        .with_status(400)
        .create_async()
        .await;

    let err = app(&server)
        .token_from_string("good-token")
        .fetch_resources()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidCredential(ref msg) if !msg.contains("redirect")));
}

#[tokio::test]
async fn test_exchange_with_unrepresentable_lifetime() {
    let mut server = Server::new_async().await;

    let _m = server
        .mock("POST", "/oauth/v1/token")
        .with_status(200)
        .with_body(
            json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": i64::MAX,
                "scope": "openid"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let result = app(&server).exchange_code("abc").await;
    assert!(matches!(result, Err(Error::Decode(ref msg)) if msg.contains("out of range")));
}

#[tokio::test]
async fn test_refresh() {
    let mut server = Server::new_async().await;

    let _exchange = server
        .mock("POST", "/oauth/v1/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()))
        .with_status(200)
        .with_body(token_body("access-1", "refresh-1"))
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/oauth/v1/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
        ]))
        .with_status(200)
        .with_body(token_body("access-2", "refresh-2"))
        .create_async()
        .await;

    let token = app(&server).exchange_code("abc").await.unwrap();
    let renewed = token.refresh().await.unwrap();

    assert_eq!(renewed.token(), "access-2");
    assert_eq!(renewed.refresh_token(), "refresh-2");
    assert_eq!(token.token(), "access-1");
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_userinfo_and_insufficient_scope() {
    let mut server = Server::new_async().await;

    let _ok = server
        .mock("GET", "/oauth/v1/userinfo")
        .match_header("authorization", "Bearer good-token")
        .with_status(200)
        .with_body(
            json!({
                "sub": "77",
                "name": "Builder",
                "preferred_username": "builder77",
                "created_at": 1_500_000_000
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _scoped = server
        .mock("GET", "/oauth/v1/userinfo")
        .match_header("authorization", "Bearer narrow-token")
        .with_status(401)
        .with_body(r#"{"error":"insufficient_scope","scope":"profile"}"#)
        .create_async()
        .await;

    let app = app(&server);

    let info = app
        .token_from_string("good-token")
        .fetch_userinfo()
        .await
        .unwrap();
    assert_eq!(info.sub, "77");
    assert_eq!(info.preferred_username.as_deref(), Some("builder77"));
    assert_eq!(info.created_at, Some(1_500_000_000));

    let err = app
        .token_from_string("narrow-token")
        .fetch_userinfo()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientScope { ref scope } if scope == "profile"));
}

#[tokio::test]
async fn test_fetch_resources() {
    let mut server = Server::new_async().await;

    let _m = server
        .mock("POST", "/oauth/v1/token/resources")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("token".into(), "good-token".into()),
            Matcher::UrlEncoded("client_id".into(), "3210".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "resource_infos": [
                    {
                        "owner": {"id": "77", "type": "User"},
                        "resources": {"universe": {"ids": ["1234", "5678"]}}
                    },
                    {
                        "owner": {"id": "9", "type": "Group"},
                        "resources": {}
                    }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let resources = app(&server)
        .token_from_string("good-token")
        .fetch_resources()
        .await
        .unwrap();

    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0].owner.kind, "User");
    assert_eq!(resources[0].universe_ids, vec![1234, 5678]);
    assert!(resources[1].universe_ids.is_empty());
}

#[tokio::test]
async fn test_bearer_token_drives_data_stores() {
    let mut server = Server::new_async().await;

    let m = server
        .mock(
            "DELETE",
            "/datastores/v1/universes/1234/standard-datastores/datastore/entries/entry",
        )
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer good-token")
        .with_status(204)
        .create_async()
        .await;

    let universe = app(&server).token_from_string("good-token").universe(1234);
    universe
        .data_store("players", Some("global"))
        .remove("user_1")
        .await
        .unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn test_revoke_tokens() {
    let mut server = Server::new_async().await;

    let _exchange = server
        .mock("POST", "/oauth/v1/token")
        .with_status(200)
        .with_body(token_body("access-1", "refresh-1"))
        .create_async()
        .await;
    let revoke_refresh = server
        .mock("POST", "/oauth/v1/token/revoke")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("token".into(), "refresh-1".into()),
            Matcher::UrlEncoded("client_secret".into(), "client-secret".into()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let revoke_access = server
        .mock("POST", "/oauth/v1/token/revoke")
        .match_body(Matcher::UrlEncoded("token".into(), "other-token".into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let app = app(&server);
    let token = app.exchange_code("abc").await.unwrap();
    token.revoke_refresh_token().await.unwrap();
    app.token_from_string("other-token").revoke().await.unwrap();

    revoke_refresh.assert_async().await;
    revoke_access.assert_async().await;
}
