//! End-to-end tests against a server bound to an ephemeral port
//!
//! Each test starts its own server on an in-memory store and drives it
//! over HTTP with reqwest.

use clap::Parser;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sitetrack::config::Args;
use sitetrack::export::DOCX_CONTENT_TYPE;
use sitetrack::server::{serve, AppState};
use sitetrack::store::{ChangeFeed, DocumentStore, MemoryStore};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const ADMIN: &str = "admin@site.ph";

struct TestServer {
    base: String,
    http: Client,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(&[]).await
    }

    /// Start with extra command line flags
    async fn start_with(extra: &[&str]) -> Self {
        let mut argv = vec![
            "sitetrack",
            "--dev-mode",
            "--memory-store",
            "--admin-email",
            ADMIN,
            "--listen",
            "127.0.0.1:0",
        ];
        argv.extend_from_slice(extra);
        let args = Args::parse_from(argv);
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new(ChangeFeed::new(64)));
        let state = Arc::new(AppState::new(args, store).await.unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = serve(listener, state).await;
        });

        Self {
            base: format!("http://{}", addr),
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut req = self.http.post(self.url(path)).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn put(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .http
            .put(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = self.http.get(self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn signup(&self, email: &str) -> (StatusCode, Value) {
        self.post(
            "/auth/signup",
            None,
            json!({"email": email, "password": "secret123", "confirmPassword": "secret123"}),
        )
        .await
    }

    async fn login(&self, email: &str) -> (StatusCode, Value) {
        self.post(
            "/auth/login",
            None,
            json!({"email": email, "password": "secret123"}),
        )
        .await
    }

    async fn admin_token(&self) -> String {
        let (status, body) = self.signup(ADMIN).await;
        assert_eq!(status, StatusCode::CREATED);
        body["token"].as_str().unwrap().to_string()
    }

    /// Sign up and approve a member, returning (id, token)
    async fn member(&self, admin: &str, email: &str) -> (String, String) {
        let (_, body) = self.signup(email).await;
        let id = body["user"]["id"].as_str().unwrap().to_string();
        let (status, _) = self
            .post(&format!("/api/users/{}/approve", id), Some(admin), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self.login(email).await;
        assert_eq!(status, StatusCode::OK);
        (id, body["token"].as_str().unwrap().to_string())
    }

    async fn download(&self, path: &str, token: &str) -> reqwest::Response {
        self.http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    async fn viewer_token(&self) -> String {
        let (status, body) = self.post("/auth/view-only", None, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert_eq!(body["views"]["projects"], 0);
}

#[tokio::test]
async fn test_signup_requires_approval() {
    let server = TestServer::start().await;
    let admin = server.admin_token().await;

    let (status, body) = server.signup("Engineer@Site.ph").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "engineer@site.ph");
    assert_eq!(body["user"]["approved"], false);
    assert!(body.get("token").is_none());
    let id = body["user"]["id"].as_str().unwrap().to_string();

    let (status, _) = server.login("engineer@site.ph").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server.get("/api/users?status=pending", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert!(body[0].get("passwordHash").is_none());

    let (status, _) = server
        .post(&format!("/api/users/{}/approve", id), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server.login("engineer@site.ph").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "MEMBER");

    let (status, _) = server.signup("engineer@site.ph").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let server = TestServer::start().await;
    server.admin_token().await;
    let (status, _) = server
        .post(
            "/auth/login",
            None,
            json!({"email": ADMIN, "password": "not-the-password"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_viewer_is_read_only() {
    let server = TestServer::start().await;
    let viewer = server.viewer_token().await;

    let (status, body) = server.get("/auth/me", Some(&viewer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["viewOnly"], true);

    let (status, _) = server.get("/api/projects", Some(&viewer)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = server.get("/api/deepwells", Some(&viewer)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server.get("/api/reforestations", Some(&viewer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = server
        .post("/api/projects", Some(&viewer), json!({"name": "X", "contractor": "Y"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = server
        .post("/api/messages", Some(&viewer), json!({"text": "hi"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server.get("/api/projects", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_project_lifecycle() {
    let server = TestServer::start().await;
    let admin = server.admin_token().await;
    let (_, member) = server.member(&admin, "eng@site.ph").await;

    let (status, created) = server
        .post(
            "/api/projects",
            Some(&member),
            json!({
                "name": "Seawall Phase 2",
                "contractor": "ACME Builders",
                "implementingAgency": "DPWH",
                "contractAmount": "1,250,000",
                "contractDocsLink": "https://docs.example/seawall",
                "accomplishment": {"percent": 40, "plannedPercent": 50}
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["contractAmount"], 1250000.0);
    assert_eq!(created["status"], "Delayed");
    // Members cannot set the contract documents link
    assert_eq!(created["contractDocsLink"], "");
    assert_eq!(created["history"].as_array().unwrap().len(), 1);

    let (status, rows) = server.get("/api/projects?status=Delayed", Some(&member)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["percent"], 40.0);

    let (status, updated) = server
        .put(
            &format!("/api/projects/{}", id),
            &admin,
            json!({
                "name": "Seawall Phase 2",
                "contractor": "ACME Builders",
                "contractDocsLink": "https://docs.example/seawall"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["contractDocsLink"], "https://docs.example/seawall");
    assert_eq!(updated["history"].as_array().unwrap().len(), 2);
    assert_eq!(updated["accomplishments"].as_array().unwrap().len(), 1);

    let (status, _) = server
        .put("/api/projects/missing", &admin, json!({"name": "A", "contractor": "B"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.delete(&format!("/api/projects/{}", id), &member).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = server.delete(&format!("/api/projects/{}", id), &admin).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = server.get(&format!("/api/projects/{}", id), Some(&admin)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deepwell_production_totals() {
    let server = TestServer::start().await;
    let admin = server.admin_token().await;
    let (_, member) = server.member(&admin, "water@site.ph").await;

    let (status, well) = server
        .post(
            "/api/deepwells",
            Some(&member),
            json!({
                "name": "Barangay 3 Well",
                "provider": "mwci",
                "months": [
                    {"month": "2024-01", "prod": 100},
                    {"month": "2024-02", "prod": "300"},
                    {"month": "", "prod": 50}
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(well["months"].as_array().unwrap().len(), 2);
    assert_eq!(well["totalProd"], 400.0);
    assert_eq!(well["avgProd"], 200.0);

    let (status, totals) = server.get("/api/deepwells/production", Some(&member)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(totals["hasData"], true);
    assert_eq!(totals["mwci"], json!([100.0, 300.0]));
}

#[tokio::test]
async fn test_messages_between_members() {
    let server = TestServer::start().await;
    let admin = server.admin_token().await;
    let (alice_id, alice) = server.member(&admin, "alice@site.ph").await;
    let (_, bob) = server.member(&admin, "bob@site.ph").await;

    let (status, sent) = server
        .post(
            "/api/messages",
            Some(&bob),
            json!({"text": " hello alice ", "toId": alice_id}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["text"], "hello alice");
    let message_id = sent["id"].as_str().unwrap().to_string();

    let (status, _) = server
        .post("/api/messages", Some(&alice), json!({"text": "morning all", "toId": "all"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, inbox) = server.get("/api/messages", Some(&alice)).await;
    assert_eq!(inbox.as_array().unwrap().len(), 2);
    let (_, broadcast) = server.get("/api/messages?with=all", Some(&bob)).await;
    assert_eq!(broadcast.as_array().unwrap().len(), 1);

    // Only the sender may delete
    let (status, _) = server
        .delete(&format!("/api/messages/{}", message_id), &alice)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, hidden) = server
        .delete(&format!("/api/messages/{}", message_id), &bob)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hidden["deleted"], true);
    assert!(hidden["deletedAt"].is_string());
    let (_, inbox) = server.get("/api/messages", Some(&alice)).await;
    assert_eq!(inbox.as_array().unwrap().len(), 1);

    let (status, _) = server.delete("/api/messages", &bob).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, cleared) = server.delete("/api/messages", &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["deleted"], 2);
}

#[tokio::test]
async fn test_unknown_route() {
    let server = TestServer::start().await;
    let (status, _) = server.get("/api/nothing-here", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_change_feed_delivers_snapshot_and_changes() {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let server = TestServer::start().await;
    let admin = server.admin_token().await;
    let viewer = server.viewer_token().await;

    let ws_url = format!("{}/ws?token={}", server.base.replace("http://", "ws://"), viewer);
    let (mut ws, _) = tokio_test::assert_ok!(tokio_tungstenite::connect_async(ws_url).await);

    let next_json = |msg: Message| -> Value {
        match msg {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    };

    let snapshot = next_json(ws.next().await.unwrap().unwrap());
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["role"], "VIEWER");
    assert!(snapshot.get("reforestations").is_none());

    let (status, _) = server
        .post(
            "/api/projects",
            Some(&admin),
            json!({"name": "Drainage", "contractor": "RiverWorks"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let change = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let change = next_json(change);
    assert_eq!(change["type"], "change");
    assert_eq!(change["collection"], "projects");
    assert_eq!(change["kind"], "added");
    assert_eq!(change["doc"]["name"], "Drainage");
}

#[tokio::test]
async fn test_change_feed_requires_token() {
    let server = TestServer::start().await;
    let ws_url = format!("{}/ws", server.base.replace("http://", "ws://"));
    assert!(tokio_tungstenite::connect_async(ws_url).await.is_err());
}

/// One-paragraph report template written to `dir`
fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("report.docx");
    let mut zip = ZipWriter::new(std::fs::File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    zip.start_file("[Content_Types].xml", options).unwrap();
    zip.write_all(b"<Types/>").unwrap();
    zip.start_file("word/document.xml", options).unwrap();
    zip.write_all(
        br#"<w:document><w:body><w:p><w:r><w:t>Report: {ProjectName}</w:t></w:r></w:p></w:body></w:document>"#,
    )
    .unwrap();
    zip.finish().unwrap();
    path
}

fn document_xml(docx: &[u8]) -> String {
    let mut archive = ZipArchive::new(Cursor::new(docx)).unwrap();
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

async fn create_project(server: &TestServer, token: &str) -> String {
    let (status, created) = server
        .post(
            "/api/projects",
            Some(token),
            json!({"name": "Seawall", "contractor": "ACME Builders"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    created["id"].as_str().unwrap().to_string()
}

fn assert_docx_fallback(resp: &reqwest::Response) {
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-export-fallback"], "docx");
    assert_eq!(resp.headers()["content-type"], DOCX_CONTENT_TYPE);
    let disposition = resp.headers()["content-disposition"].to_str().unwrap();
    assert!(disposition.ends_with(".docx\""), "{}", disposition);
}

#[tokio::test]
async fn test_pdf_export_serves_docx_when_conversion_fails() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let converter = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/forms/libreoffice/convert"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&converter)
        .await;
    let endpoint = format!("{}/forms/libreoffice/convert", converter.uri());

    let server = TestServer::start_with(&[
        "--docx-template-url",
        template.to_str().unwrap(),
        "--pdf-endpoint",
        &endpoint,
    ])
    .await;
    let admin = server.admin_token().await;
    let id = create_project(&server, &admin).await;

    let resp = server
        .download(&format!("/api/projects/{}/export.pdf", id), &admin)
        .await;
    assert_docx_fallback(&resp);
    let body = resp.bytes().await.unwrap();
    assert!(document_xml(&body).contains("Report: Seawall"));
}

#[tokio::test]
async fn test_pdf_export_without_endpoint_serves_docx() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let server = TestServer::start_with(&["--docx-template-url", template.to_str().unwrap()]).await;
    let admin = server.admin_token().await;
    let id = create_project(&server, &admin).await;

    let resp = server
        .download(&format!("/api/projects/{}/export.pdf", id), &admin)
        .await;
    assert_docx_fallback(&resp);

    let resp = server
        .download(&format!("/api/projects/{}/export.docx", id), &admin)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("x-export-fallback").is_none());
}
