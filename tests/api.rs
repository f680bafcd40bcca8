use std::{fs, path::Path};

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::{Method, Request, Response, StatusCode, body::Incoming, header};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use intake::{config::Config, router::CLEAR_TOKEN_HEADER, server::ServerHandle};
use serde_json::{Value, json};
use tempfile::tempdir;

const JANE_DOE_FORM: &str = "fullname=Jane+Doe&dob=2000-01-01&email=jane%40example.com&phone=%2B15550000000&gender=Female&course=Data+Science&session=Morning&address=1+Main+St";

struct TestServer {
    server: ServerHandle,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl TestServer {
    async fn start(storage_path: &Path, extra_server_toml: &str) -> Self {
        let config = Config::from_toml_str(&format!(
            r#"
[server]
listen = "127.0.0.1:0"
{extra_server_toml}

[storage]
path = "{}"
"#,
            storage_path.display()
        ))
        .unwrap();
        let server = intake::server::serve(&config).await.unwrap();
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { server, client }
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> Response<Incoming> {
        self.client.request(req).await.unwrap()
    }

    fn uri(&self, path_and_query: &str) -> String {
        format!("http://{}{path_and_query}", self.server.listen_addr)
    }

    async fn get(&self, path_and_query: &str) -> Response<Incoming> {
        self.send(
            Request::builder()
                .method(Method::GET)
                .uri(self.uri(path_and_query))
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
        .await
    }

    async fn submit(&self, content_type: &str, body: &str) -> Response<Incoming> {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(self.uri("/api.php?action=submit"))
                .header(header::CONTENT_TYPE, content_type)
                .body(Full::new(Bytes::from(body.to_owned())))
                .unwrap(),
        )
        .await
    }
}

async fn body_json(response: Response<Incoming>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response<Incoming>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn submit_fetch_clear_lifecycle() {
    let storage = tempdir().unwrap();
    let server = TestServer::start(storage.path(), "").await;
    assert!(
        storage
            .path()
            .join("admission_db")
            .join("intake.db")
            .is_file()
    );

    let receipt = server
        .submit(
            "application/json",
            &json!({
                "fullName": "Jane Doe",
                "email": "jane@example.com",
                "phone": "+15550000000",
                "gender": "Female",
                "dob": "2000-01-01",
                "course": "Data Science",
                "session": "Morning",
                "address": "1 Main St",
            })
            .to_string(),
        )
        .await;
    assert_eq!(receipt.status(), StatusCode::OK);
    assert_eq!(
        receipt.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let receipt = body_json(receipt).await;
    assert_eq!(receipt["success"], json!(true));
    assert_eq!(receipt["data"]["fullName"], json!("Jane Doe"));
    let ref_id = receipt["refId"].as_str().unwrap().to_owned();
    assert!(
        regex::Regex::new(r"^APP-[0-9]{6}$").unwrap().is_match(&ref_id),
        "refId: {ref_id}"
    );
    assert!(
        regex::Regex::new(r"^[A-Z][a-z]{2} [0-9]{1,2}, [0-9]{4} [0-9]{2}:[0-9]{2}$")
            .unwrap()
            .is_match(receipt["date"].as_str().unwrap()),
        "date: {}",
        receipt["date"]
    );

    let fetched = server.get("/api.php?action=fetch").await;
    assert_eq!(fetched.status(), StatusCode::OK);
    let fetched = body_json(fetched).await;
    let rows = fetched.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["fullname"], json!("Jane Doe"));
    assert_eq!(rows[0]["ref_id"], json!(ref_id));
    assert_eq!(rows[0]["dob"], json!("2000-01-01"));
    assert_eq!(rows[0]["session_time"], json!("Morning"));

    let cleared = server.get("/api.php?action=clear").await;
    assert_eq!(cleared.status(), StatusCode::OK);
    assert_eq!(body_json(cleared).await, json!({ "success": true }));

    let after_clear = body_json(server.get("/api.php?action=fetch").await).await;
    assert_eq!(after_clear, json!([]));

    server.server.shutdown().await;
}

#[tokio::test]
async fn browser_form_posts_are_stored_newest_first() {
    let storage = tempdir().unwrap();
    let server = TestServer::start(storage.path(), "").await;

    let first = server
        .submit("application/x-www-form-urlencoded", JANE_DOE_FORM)
        .await;
    let first = body_json(first).await;
    assert_eq!(first["data"]["fullname"], json!("Jane Doe"));

    let second_form = JANE_DOE_FORM.replace("Jane+Doe", "John+Roe");
    let second = server
        .submit("application/x-www-form-urlencoded", &second_form)
        .await;
    assert_eq!(body_json(second).await["success"], json!(true));

    let rows = body_json(server.get("/api.php?action=fetch").await).await;
    let names: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["fullname"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["John Roe", "Jane Doe"]);

    server.server.shutdown().await;
}

#[tokio::test]
async fn invalid_submissions_are_rejected_and_not_stored() {
    let storage = tempdir().unwrap();
    let server = TestServer::start(storage.path(), "max_body_bytes = 512").await;

    let missing = server
        .submit("application/x-www-form-urlencoded", "fullname=Jane+Doe")
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let missing = body_json(missing).await;
    assert_eq!(missing["success"], json!(false));
    assert!(missing["error"].as_str().unwrap().contains("email"));

    let oversized = server
        .submit(
            "application/x-www-form-urlencoded",
            &format!("{JANE_DOE_FORM}&address={}", "x".repeat(1024)),
        )
        .await;
    assert_eq!(oversized.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let unsupported = server.submit("text/plain", JANE_DOE_FORM).await;
    assert_eq!(unsupported.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let rows = body_json(server.get("/api.php?action=fetch").await).await;
    assert_eq!(rows, json!([]));

    server.server.shutdown().await;
}

#[tokio::test]
async fn non_api_requests_fall_through_to_index_page() {
    let storage = tempdir().unwrap();
    let index = storage.path().join("index.html");
    fs::write(&index, "<h1>Apply</h1>").unwrap();
    let server = TestServer::start(
        storage.path(),
        &format!("index_file = \"{}\"", index.display()),
    )
    .await;

    let page = server.get("/").await;
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(
        page.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/html; charset=utf-8"
    );
    assert_eq!(body_text(page).await, "<h1>Apply</h1>");

    // submit over GET is not an api call
    let wrong_method = server.get("/api.php?action=submit").await;
    assert_eq!(wrong_method.status(), StatusCode::OK);
    assert_eq!(body_text(wrong_method).await, "<h1>Apply</h1>");

    server.server.shutdown().await;
}

#[tokio::test]
async fn non_api_requests_without_index_page_are_not_found() {
    let storage = tempdir().unwrap();
    let server = TestServer::start(storage.path(), "").await;

    let response = server.get("/api.php?action=unknown").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.server.shutdown().await;
}

#[tokio::test]
async fn configured_clear_token_guards_clear() {
    let storage = tempdir().unwrap();
    let server = TestServer::start(storage.path(), "clear_token = \"letmein\"").await;

    let submitted = server
        .submit("application/x-www-form-urlencoded", JANE_DOE_FORM)
        .await;
    assert_eq!(submitted.status(), StatusCode::OK);

    let denied = server.get("/api.php?action=clear").await;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(denied).await["success"], json!(false));
    let rows = body_json(server.get("/api.php?action=fetch").await).await;
    assert_eq!(rows.as_array().unwrap().len(), 1);

    let allowed = server
        .send(
            Request::builder()
                .method(Method::GET)
                .uri(server.uri("/api.php?action=clear"))
                .header(CLEAR_TOKEN_HEADER, "letmein")
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
        .await;
    assert_eq!(allowed.status(), StatusCode::OK);
    let rows = body_json(server.get("/api.php?action=fetch").await).await;
    assert_eq!(rows, json!([]));

    server.server.shutdown().await;
}

#[tokio::test]
async fn restart_reuses_provisioned_storage() {
    let storage = tempdir().unwrap();

    let first = TestServer::start(storage.path(), "").await;
    let submitted = first
        .submit("application/x-www-form-urlencoded", JANE_DOE_FORM)
        .await;
    assert_eq!(submitted.status(), StatusCode::OK);
    first.server.shutdown().await;

    let second = TestServer::start(storage.path(), "").await;
    let rows = body_json(second.get("/api.php?action=fetch").await).await;
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["fullname"], json!("Jane Doe"));
    second.server.shutdown().await;
}
