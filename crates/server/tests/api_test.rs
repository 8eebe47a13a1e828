use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use fleetindex_core::{Config, PathMapping, Result};
use fleetindex_index::{PartialIndex, PartialMeta, VectorSet};
use fleetindex_orchestrator::{BackendResponse, Hit, Orchestrator, QueryBackend, QueryOrchestrator};
use fleetindex_remote::MockExecutor;
use fleetindex_server::{build_router, AppState, API_KEY_HEADER};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const KEY: &str = "dev-key-12345";
const MODEL: &str = "clip-test";

struct EmptyBackend;

#[async_trait]
impl QueryBackend for EmptyBackend {
    async fn search(&self, _text: &str, _top_k: usize) -> Result<BackendResponse> {
        Ok(BackendResponse {
            model_name: MODEL.to_string(),
            embedding_dim: 2,
            hits: vec![Hit { score: 1.0, id: 0 }],
        })
    }
}

/// Worker stand-in: writes a two-dimensional partial from the local manifest
fn write_partial(work_dir: &Path, command: &str) {
    let value = |flag: &str| {
        let mut parts = command.split_whitespace();
        parts.find(|p| *p == flag);
        parts.next().expect("flag value").to_string()
    };
    let node_prefix = value("--index-prefix");
    let node_id: usize = value("--worker-id").parse().expect("worker id");
    let job_prefix = node_prefix
        .strip_suffix(&format!("_worker_{node_id}"))
        .expect("worker prefix")
        .to_string();
    let name = Path::new(&node_prefix)
        .file_name()
        .expect("name")
        .to_string_lossy()
        .into_owned();
    let paths: Vec<String> = std::fs::read_to_string(work_dir.join(format!("{name}.txt")))
        .expect("manifest")
        .lines()
        .map(str::to_string)
        .collect();

    PartialIndex {
        node_id,
        meta: PartialMeta {
            worker_id: node_id,
            model_name: MODEL.to_string(),
            embedding_dim: 2,
            num_images: paths.len(),
            num_failed: 0,
            processing_time_seconds: None,
            batch_size: None,
        },
        vectors: VectorSet::from_flat(2, vec![1.0; paths.len() * 2]).expect("vectors"),
        paths,
    }
    .write(Path::new(&job_prefix))
    .expect("write partial");
}

struct TestApp {
    _dir: TempDir,
    orchestrator: Arc<Orchestrator>,
    router: Router,
}

fn app(require_auth: bool) -> TestApp {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path();
    let script = root.join("worker_index.py");
    std::fs::write(&script, "# worker\n").expect("script");

    let config = Config::from_toml_str(&format!(
        r#"
        [index]
        prefix = "{root}/imageindex"
        state_file = "{root}/state.json"
        partials_dir = "{root}/partials"
        work_dir = "{root}/work"
        model_name = "{MODEL}"
        embedding_dim = 2

        [[nodes]]
        hostname = "only"
        weight = 1.0

        [remote]
        worker_script = "{script}"

        [monitor]
        poll_interval_ms = 1

        [server]
        api_keys = ["{KEY}"]
        require_auth = {require_auth}
        "#,
        root = root.display(),
        script = script.display(),
    ))
    .expect("config");

    let work_dir = root.join("work");
    let executor = Arc::new(
        MockExecutor::new().on_start(move |_, command| write_partial(&work_dir, command)),
    );
    let query = Arc::new(QueryOrchestrator::new(
        Arc::new(EmptyBackend),
        &config.index.prefix,
        root.join("results"),
        PathMapping::default(),
    ));
    let server_config = config.server.clone();
    let orchestrator = Orchestrator::new(config, executor).expect("orchestrator");
    let router = build_router(AppState::new(orchestrator.clone(), query), &server_config);

    TestApp {
        _dir: dir,
        orchestrator,
        router,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder.body(Body::empty()).expect("request")
}

fn post(uri: &str, key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn test_root_and_health_are_public() {
    let app = app(true);

    let (status, body) = send(&app.router, get("/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"service": "Image Indexing API", "status": "running", "version": "1.0.0"})
    );

    let (status, body) = send(&app.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["index_available"], false);
}

#[tokio::test]
async fn test_api_key_is_enforced() {
    let app = app(true);

    let (status, body) = send(&app.router, get("/api/v1/index/stats", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing API key header (X-API-Key)");

    let (status, body) = send(&app.router, get("/api/v1/index/stats", Some("wrong"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Invalid API key");

    let (status, _) = send(&app.router, get("/api/v1/index/stats", Some(KEY))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_can_be_disabled() {
    let app = app(false);
    let (status, _) = send(&app.router, get("/api/v1/index/status", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stats_fall_back_before_first_merge() {
    let app = app(true);
    let (status, body) = send(&app.router, get("/api/v1/index/stats", Some(KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "model_name": MODEL,
            "embedding_dim": 2,
            "total_images": 0,
            "num_failed": 0,
            "last_updated": "never",
            "index_size_mb": 0.0
        })
    );
}

#[tokio::test]
async fn test_add_images_then_poll_status() {
    let app = app(true);

    let (status, body) = send(
        &app.router,
        post(
            "/api/v1/index/add-images",
            Some(KEY),
            json!({"image_paths": ["/img/a.jpg", "/img/b.jpg", "/img/c.jpg"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["new_images_count"], 3);
    let job_id = body["job_id"].as_str().expect("job id").to_string();

    app.orchestrator.wait_for(&job_id).await.expect("job finishes");

    let (status, body) = send(
        &app.router,
        get(&format!("/api/v1/index/status/{job_id}"), Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"]["total_images"], 3);
    assert_eq!(body["progress"]["processed_images"], 3);
    assert_eq!(body["progress"]["percent_complete"], 100.0);
    assert!(body["completed_at"].is_string());
    assert!(body["error_message"].is_null());

    let (_, body) = send(&app.router, get("/api/v1/index/status", Some(KEY))).await;
    assert_eq!(body["total_indexed_images"], 3);
    assert_eq!(body["active_jobs"], 0);
    assert_eq!(body["recent_jobs"][0]["job_id"], job_id.as_str());
    assert_eq!(body["recent_jobs"][0]["images"], 3);
    assert_eq!(body["index_stats"]["total_images"], 3);

    let (_, body) = send(
        &app.router,
        post(
            "/api/v1/index/add-images",
            Some(KEY),
            json!({"image_paths": ["/img/a.jpg", "/img/b.jpg", "/img/c.jpg"], "priority": "high"}),
        ),
    )
    .await;
    assert_eq!(body["job_id"], "none");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["already_indexed_count"], 3);

    let (status, body) = send(
        &app.router,
        post(
            "/api/v1/query",
            Some(KEY),
            json!({"text": "a cat", "top_k": 1, "copy_results": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["rank"], 1);
    assert_eq!(body["results"][0]["path"], "/img/a.jpg");
}

#[tokio::test]
async fn test_client_errors() {
    let app = app(true);

    let (status, _) = send(
        &app.router,
        post("/api/v1/index/add-images", Some(KEY), json!({"image_paths": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app.router,
        get("/api/v1/index/status/idx_20000101_000000", Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job idx_20000101_000000 not found");

    let (status, _) = send(
        &app.router,
        post("/api/v1/query", Some(KEY), json!({"text": "a cat"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
