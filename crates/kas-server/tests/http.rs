mod common;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use common::*;
use opentdf_kas::opentdf_crypto::{KeyEncapsulation, RsaOaepKem};
use opentdf_kas_server::service;
use serde_json::{json, Value};

fn x() -> String {
    format!("{}/attr/A/value/x", NS)
}

#[tokio::test]
async fn test_public_key() {
    let server = TestServer::new().await;

    let response = server.send(request("GET", "/kas_public_key", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let pem: String = serde_json::from_value(body_json(response).await).unwrap();
    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

    let response = server
        .send(request("GET", "/kas_public_key?algorithm=ec:secp256r1", None, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .send(request("GET", "/kas_public_key?algorithm=dsa:1024", None, None))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["status"], 500);
    assert_eq!(body["title"], "Internal Server Error");
    assert!(!body["detail"].as_str().unwrap().contains("dsa"));
}

#[tokio::test]
async fn test_health_probes() {
    let server = TestServer::new().await;

    for uri in ["/healthz", "/healthz?probe=liveness", "/healthz?probe=readiness"] {
        let response = server.send(request("GET", uri, None, None)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT, "{}", uri);
    }

    server.jwks.set_offline(true);
    let response = server.send(request("GET", "/healthz?probe=readiness", None, None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let response = server.send(request("GET", "/healthz?probe=liveness", None, None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = server.send(request("GET", "/healthz?probe=vibes", None, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rewrap_over_http() {
    let server = TestServer::new().await;
    let bearer = token("alice", CLIENT_AUDIENCE, &["Rel/value/USA"]);
    let (body, key) = rewrap_body(&server.app, &["Rel/value/USA"]);

    let response = server
        .send(request("POST", "/v2/rewrap", Some(&bearer), Some(&envelope(&body))))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let wrapped = BASE64.decode(json["entityWrappedKey"].as_str().unwrap()).unwrap();
    let unwrapped = RsaOaepKem::with_sha1().unwrap(&wrapped, &shared().client).unwrap();
    assert_eq!(unwrapped, key);
    assert_eq!(json["metadata"], json!({}));
}

#[tokio::test]
async fn test_signed_rewrap_is_jwt() {
    let server = TestServer::new().await;
    let bearer = token("alice", CLIENT_AUDIENCE, &["Rel/value/USA"]);
    let (mut body, _) = rewrap_body(&server.app, &["Rel/value/USA"]);
    body["signedResponse"] = Value::from(true);

    let response = server
        .send(request("POST", "/v2/rewrap", Some(&bearer), Some(&envelope(&body))))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/jwt");
    let token = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(token.split('.').count(), 3);
}

#[tokio::test]
async fn test_rewrap_errors_use_common_shape() {
    let server = TestServer::new().await;
    let (body, _) = rewrap_body(&server.app, &["Rel/value/USA"]);

    let response = server
        .send(request("POST", "/v2/rewrap", None, Some(&envelope(&body))))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["status"], 401);
    assert!(json["title"].is_string());
    assert!(json["detail"].is_string());

    let denied = token("bob", CLIENT_AUDIENCE, &["Rel/value/CAN"]);
    let response = server
        .send(request("POST", "/v2/rewrap", Some(&denied), Some(&envelope(&body))))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["detail"], "anyof-miss: https://ex.com/attr/Rel");

    let bearer = token("alice", CLIENT_AUDIENCE, &["Rel/value/USA"]);
    let response = server
        .send(request("POST", "/v2/rewrap", Some(&bearer), Some(&json!({"nope": 1}))))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rewrap_audience_mismatch() {
    let server = TestServer::new().await;
    let (body, _) = rewrap_body(&server.app, &["Rel/value/USA"]);
    let bearer = token("alice", "other", &["Rel/value/USA"]);

    let response = server
        .send(request("POST", "/v2/rewrap", Some(&bearer), Some(&envelope(&body))))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["detail"], "unauthorized");
    let text = json.to_string();
    assert!(!text.contains(CLIENT_AUDIENCE));
    assert!(!text.contains(REALM));
    assert_eq!(server.jwks.fetch_count(), 0);
}

#[tokio::test]
async fn test_foreign_realm_detail_is_generic() {
    let server = TestServer::new().await;
    let (body, _) = rewrap_body(&server.app, &["Rel/value/USA"]);
    let bearer = token_from("https://keycloak.ex.com/auth/realms/elsewhere", CLIENT_AUDIENCE);

    let response = server
        .send(request("POST", "/v2/rewrap", Some(&bearer), Some(&envelope(&body))))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let text = body_json(response).await.to_string();
    assert!(!text.contains("elsewhere"));
    assert!(!text.contains("realm"));
}

#[tokio::test]
async fn test_upsert_over_http() {
    let server = TestServer::new().await;
    let bearer = token("alice", CLIENT_AUDIENCE, &[]);
    let (body, _) = rewrap_body(&server.app, &["Rel/value/USA"]);
    let upsert = json!({ "keyAccess": body["keyAccess"], "policy": body["policy"] });

    let response = server
        .send(request("POST", "/v2/upsert", Some(&bearer), Some(&envelope(&upsert))))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([""]));
}

#[tokio::test]
async fn test_entitlement_soft_delete() {
    let server = TestServer::new().await;
    let admin = token("admin", ENTITLEMENT_AUDIENCE, &[]);
    let grant = json!([x()]);

    let list = |server: &TestServer| {
        let request = request("GET", "/entitlements", Some(&admin), None);
        let router = server.router.clone();
        async move { tower::ServiceExt::oneshot(router, request).await.unwrap() }
    };

    let response = server
        .send(request("POST", "/entitlements/e1", Some(&admin), Some(&grant)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, grant);

    let response = server
        .send(request("DELETE", "/entitlements/e1", Some(&admin), Some(&grant)))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = list(&server).await;
    assert_eq!(response.headers()["meta-total-count"], "0");
    assert_eq!(body_json(response).await, json!([]));

    server
        .send(request("POST", "/entitlements/e1", Some(&admin), Some(&grant)))
        .await;
    server
        .send(request("POST", "/entitlements/e1", Some(&admin), Some(&grant)))
        .await;
    let response = list(&server).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["meta-total-count"], "1");
    assert_eq!(body_json(response).await, json!([{ "e1": [x()] }]));
}

#[tokio::test]
async fn test_entitlements_require_entitlement_audience() {
    let server = TestServer::new().await;
    let client = token("alice", CLIENT_AUDIENCE, &[]);

    let response = server
        .send(request("GET", "/entitlements", Some(&client), None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let admin = token("admin", ENTITLEMENT_AUDIENCE, &[]);
    let unknown = json!([format!("{}/attr/A/value/zzz", NS)]);
    let response = server
        .send(request("POST", "/entitlements/e1", Some(&admin), Some(&unknown)))
        .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_root_path_nesting() {
    let server = TestServer::new().await;
    let routes = service(server.app.clone(), Some("/api/kas"), &["*".to_string()]);

    let response = tower::ServiceExt::oneshot(routes.clone(), request("GET", "/api/kas/healthz", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = tower::ServiceExt::oneshot(routes, request("GET", "/healthz", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
