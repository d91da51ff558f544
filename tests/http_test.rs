mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use common::{ANON_MAX, TestApp, setup, upload};
use filebox::services::share_service::NewShare;
use filebox::{errors::INVALID_SHARE_CODE, handlers::actor::ACTOR_HEADER, routes::routes::routes};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "filebox-test-boundary";

fn router(app: &TestApp) -> Router {
    routes().with_state(app.state.clone())
}

fn multipart_body(file_name: &str, content: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(uri: &str, actor: Option<Uuid>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(id) = actor {
        builder = builder.header(ACTOR_HEADER, id.to_string());
    }
    builder.body(Body::from(body)).unwrap()
}

fn get_request(uri: &str, actor: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(id) = actor {
        builder = builder.header(ACTOR_HEADER, id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = setup().await;
    let response = router(&app).oneshot(get_request("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router(&app).oneshot(get_request("/readyz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checks"]["sqlite"]["ok"], json!(true));
    assert_eq!(body["checks"]["storage"]["ok"], json!(true));
}

#[tokio::test]
async fn anonymous_upload_share_and_single_download() {
    let app = setup().await;

    let body = multipart_body("hello.txt", b"hello over http", &[("download_limit", "1"), ("code", "Hello123")]);
    let response = router(&app)
        .oneshot(upload_request("/api/files/anonymous", None, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["share"]["code"], json!("Hello123"));
    assert_eq!(created["share"]["download_limit"], json!(1));
    assert_eq!(created["file"]["name"], json!("hello.txt"));
    assert!(created["file"].get("storage_handle").is_none());

    let response = router(&app).oneshot(get_request("/api/shares/Hello123", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["file"]["size_bytes"], json!(15));

    let response = router(&app)
        .oneshot(get_request("/api/shares/Hello123/download", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "15");
    assert!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("hello.txt")
    );
    assert_eq!(body_bytes(response).await, b"hello over http");

    // The only download has been used.
    let response = router(&app)
        .oneshot(get_request("/api/shares/Hello123/download", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], json!(INVALID_SHARE_CODE));

    let response = router(&app).oneshot(get_request("/api/shares/nope1234", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], json!(INVALID_SHARE_CODE));
}

#[tokio::test]
async fn anonymous_upload_over_the_ceiling_is_rejected() {
    let app = setup().await;
    let content = vec![b'x'; ANON_MAX as usize + 1];

    let response = router(&app)
        .oneshot(upload_request("/api/files/anonymous", None, multipart_body("big.txt", &content, &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn anonymous_upload_with_bad_code_leaves_nothing_behind() {
    let app = setup().await;

    let body = multipart_body("a.txt", b"abc", &[("code", "no")]);
    let response = router(&app)
        .oneshot(upload_request("/api/files/anonymous", None, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(files, 0);
    assert_eq!(common::stored_object_count(app.storage_root()), 0);
}

#[tokio::test]
async fn owner_flow_upload_list_share_delete() {
    let app = setup().await;
    let owner = Uuid::new_v4();

    let response = router(&app)
        .oneshot(upload_request("/api/files", Some(owner), multipart_body("doc.txt", b"document", &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let file = body_json(response).await;
    let file_id = file["id"].as_str().unwrap().to_string();
    assert_eq!(file["owner_id"], json!(owner.to_string()));

    let response = router(&app).oneshot(get_request("/api/files", Some(owner))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list = body_json(response).await;
    assert_eq!(list["total"], json!(1));
    assert_eq!(list["page"], json!(1));
    assert_eq!(list["limit"], json!(10));

    // Someone else can neither read nor download it.
    let stranger = Some(Uuid::new_v4());
    let response = router(&app)
        .oneshot(get_request(&format!("/api/files/{file_id}/download"), stranger))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(&app)
        .oneshot(get_request(&format!("/api/files/{file_id}/download"), Some(owner)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"document");

    let share_request = Request::builder()
        .method("POST")
        .uri(format!("/api/files/{file_id}/share"))
        .header(ACTOR_HEADER, owner.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "expires_in": 3, "download_limit": 2 }).to_string()))
        .unwrap();
    let response = router(&app).oneshot(share_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let ticket = body_json(response).await;
    let ticket_id = ticket["id"].as_str().unwrap().to_string();

    let response = router(&app).oneshot(get_request("/api/shares", Some(owner))).await.unwrap();
    let shares = body_json(response).await;
    assert_eq!(shares["total"], json!(1));
    assert_eq!(shares["shares"][0]["file_name"], json!("doc.txt"));
    assert_eq!(shares["shares"][0]["code"], ticket["code"]);

    let delete = |uri: String, actor: Uuid| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .header(ACTOR_HEADER, actor.to_string())
            .body(Body::empty())
            .unwrap()
    };

    let response = router(&app)
        .oneshot(delete(format!("/api/shares/{ticket_id}"), Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(&app)
        .oneshot(delete(format!("/api/shares/{ticket_id}"), owner))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router(&app)
        .oneshot(delete(format!("/api/files/{file_id}"), owner))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router(&app)
        .oneshot(get_request(&format!("/api/files/{file_id}"), Some(owner)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_requires_an_actor() {
    let app = setup().await;

    for uri in ["/api/files", "/api/shares"] {
        let response = router(&app).oneshot(get_request(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let bad_actor = Request::builder()
        .uri("/api/files")
        .header(ACTOR_HEADER, "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = router(&app).oneshot(bad_actor).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_share_downloads_respect_the_limit() {
    const ATTEMPTS: usize = 16;
    let app = setup().await;
    let file = upload(&app, b"only once", "once.txt", None).await;
    let ticket = app
        .state
        .shares
        .create(
            file.id,
            NewShare {
                code: None,
                expires_in_hours: 1,
                download_limit: 1,
            },
            None,
        )
        .await
        .unwrap();

    let uri = format!("/api/shares/{}/download", ticket.code);
    let mut tasks = Vec::new();
    for _ in 0..ATTEMPTS {
        let app = router(&app);
        let request = get_request(&uri, None);
        tasks.push(tokio::spawn(async move { app.oneshot(request).await.unwrap().status() }));
    }

    let mut served = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => served += 1,
            StatusCode::NOT_FOUND => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(served, 1);
}

#[tokio::test]
async fn huge_page_number_yields_an_empty_page() {
    let app = setup().await;
    let owner = Uuid::new_v4();
    upload(&app, b"doc", "doc.txt", Some(owner)).await;

    let response = router(&app)
        .oneshot(get_request(&format!("/api/files?page={}&limit=100", i64::MAX), Some(owner)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list = body_json(response).await;
    assert_eq!(list["total"], json!(1));
    assert_eq!(list["files"], json!([]));

    let response = router(&app)
        .oneshot(get_request(&format!("/api/shares?page={}", i64::MAX), Some(owner)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
