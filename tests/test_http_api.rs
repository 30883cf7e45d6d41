// HTTP API tests driving the router in-process

mod helpers;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use gatehouse::rbac::Gatehouse;
use helpers::{seed_permission, GatehouseBuilder, TestDb};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    actor: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        request = request.header("x-actor-id", actor);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

async fn app(test_db: &TestDb) -> (Router, Gatehouse) {
    let gatehouse = GatehouseBuilder::new().build(test_db.connection());
    seed_permission(&gatehouse, "logs", "view").await;
    (gatehouse::web::router(gatehouse.clone()), gatehouse)
}

#[tokio::test]
async fn test_healthz_and_security_headers() {
    let test_db = TestDb::new().await;
    let (app, _) = app(&test_db).await;

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["cache-control"], "no-store");
}

#[tokio::test]
async fn test_assignment_lifecycle() {
    let test_db = TestDb::new().await;
    let (app, _) = app(&test_db).await;
    let body = json!({ "user_id": "u1", "role": "operator" });

    let (status, err) = send(&app, Method::POST, "/v1/assignments", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "actor header is required");
    assert_eq!(err["error"], "invalid_argument");

    let (status, created) =
        send(&app, Method::POST, "/v1/assignments", Some("admin"), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, err) =
        send(&app, Method::POST, "/v1/assignments", Some("admin"), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "duplicate_assignment");

    let (status, list) = send(&app, Method::GET, "/v1/assignments?user_id=u1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["role"], "operator");

    let uri = format!("/v1/assignments/{id}");
    let (status, removed) = send(&app, Method::DELETE, &uri, Some("admin"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["id"], id.as_str());

    let (status, err) = send(&app, Method::DELETE, &uri, Some("admin"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "not_found");

    let (_, newest) = send(&app, Method::GET, "/v1/audit?limit=1", None, None).await;
    assert_eq!(newest[0]["action"], "remove_role");
    assert_eq!(newest[0]["resource_id"], id.as_str());
    assert_eq!(newest[0]["actor_user_id"], "admin");
}

#[tokio::test]
async fn test_unknown_role_is_bad_request() {
    let test_db = TestDb::new().await;
    let (app, gatehouse) = app(&test_db).await;

    let (status, err) = send(
        &app,
        Method::POST,
        "/v1/grants",
        Some("admin"),
        Some(json!({ "role": "superuser", "permission_id": "view_logs" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid_argument");

    let (status, _) = send(&app, Method::GET, "/v1/grants?role=superuser", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(gatehouse.engine().list_grants(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_grant_check_and_revoke() {
    let test_db = TestDb::new().await;
    let (app, _) = app(&test_db).await;
    let check = json!({ "user_id": "u1", "resource": "logs", "action": "view" });

    send(
        &app,
        Method::POST,
        "/v1/assignments",
        Some("admin"),
        Some(json!({ "user_id": "u1", "role": "viewer" })),
    )
    .await;
    let (_, decision) = send(&app, Method::POST, "/v1/check", None, Some(check.clone())).await;
    assert_eq!(decision, json!({ "allowed": false }));

    let grant = json!({ "role": "viewer", "permission_id": "view_logs" });
    let (status, created) =
        send(&app, Method::POST, "/v1/grants", Some("admin"), Some(grant.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let grant_id = created["id"].as_str().unwrap().to_string();

    let (status, err) = send(&app, Method::POST, "/v1/grants", Some("admin"), Some(grant)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "duplicate_grant");

    let (_, decision) = send(&app, Method::POST, "/v1/check", None, Some(check.clone())).await;
    assert_eq!(decision, json!({ "allowed": true }));

    let (_, permissions) = send(&app, Method::GET, "/v1/users/u1/permissions", None, None).await;
    assert_eq!(permissions[0]["id"], "view_logs");

    let (_, grants) = send(&app, Method::GET, "/v1/grants?role=viewer", None, None).await;
    assert_eq!(grants[0]["id"], grant_id.as_str());

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/v1/grants/{grant_id}"),
        Some("admin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, decision) = send(&app, Method::POST, "/v1/check", None, Some(check)).await;
    assert_eq!(decision, json!({ "allowed": false }));
}

#[tokio::test]
async fn test_toggle_and_matrix() {
    let test_db = TestDb::new().await;
    let (app, _) = app(&test_db).await;
    let cell = json!({ "role": "operator", "permission_id": "view_logs" });

    let (status, first) =
        send(&app, Method::POST, "/v1/grants/toggle", Some("admin"), Some(cell.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "granted");

    let (_, matrix) = send(&app, Method::GET, "/v1/matrix", None, None).await;
    let cells = matrix["rows"][0]["cells"].as_array().unwrap();
    let operator = cells.iter().find(|c| c["role"] == "operator").unwrap();
    assert_eq!(operator["granted"], true);
    assert_eq!(operator["grant_id"], first["grant_id"]);

    let (_, second) =
        send(&app, Method::POST, "/v1/grants/toggle", Some("admin"), Some(cell)).await;
    assert_eq!(second["outcome"], "revoked");
    assert_eq!(second["grant_id"], first["grant_id"]);
}

#[tokio::test]
async fn test_catalog_roles_stats_and_audit_filters() {
    let test_db = TestDb::new().await;
    let (app, _) = app(&test_db).await;

    send(
        &app,
        Method::POST,
        "/v1/assignments",
        Some("alice"),
        Some(json!({ "user_id": "u1", "role": "network_admin" })),
    )
    .await;

    let (_, permissions) = send(&app, Method::GET, "/v1/permissions", None, None).await;
    assert_eq!(permissions.as_array().unwrap().len(), 1);
    assert_eq!(permissions[0]["resource"], "logs");

    let (_, roles) = send(&app, Method::GET, "/v1/roles", None, None).await;
    assert_eq!(roles.as_array().unwrap().len(), 5);
    let network_admin = roles
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["role"] == "network_admin")
        .unwrap();
    assert_eq!(network_admin["display_name"], "Network Admin");
    assert_eq!(network_admin["users"], 1);

    let (_, stats) = send(&app, Method::GET, "/v1/stats", None, None).await;
    assert_eq!(stats["total_users"], 1);
    assert_eq!(stats["active_roles"], 1);
    assert_eq!(stats["audit_events_last_24h"], 2);

    let (_, by_alice) = send(&app, Method::GET, "/v1/audit?actor=alice", None, None).await;
    assert_eq!(by_alice.as_array().unwrap().len(), 1);
    let (_, creations) =
        send(&app, Method::GET, "/v1/audit?action=create_permission", None, None).await;
    assert_eq!(creations.as_array().unwrap().len(), 1);
    assert!(creations[0]["actor_user_id"].is_null());
    let (_, none) = send(&app, Method::GET, "/v1/audit?before=0", None, None).await;
    assert!(none.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_jobs() {
    let test_db = TestDb::new().await;
    let (app, _) = app(&test_db).await;

    let (status, log) = send(
        &app,
        Method::POST,
        "/v1/admin/jobs/reconcile_audit_trail",
        Some("admin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["success"], true);

    let (status, _) = send(&app, Method::POST, "/v1/admin/jobs/nope", Some("admin"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, jobs) = send(&app, Method::GET, "/v1/admin/jobs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs["available"][0]["name"], "reconcile_audit_trail");
    assert_eq!(jobs["executions"].as_array().unwrap().len(), 1);
}
