//! Full agent runs against temp directories, with in-memory and HTTP sinks

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use logship::cli::run::{http_sinks, run_agent, RunSummary};
use logship::client::{PushError, PushRequest, PushSink};
use logship::config::load_config_str;
use logship::config::types::Config;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MemorySink {
    requests: Mutex<Vec<PushRequest>>,
}

impl MemorySink {
    fn lines(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flat_map(|r| r.streams.iter())
            .flat_map(|s| s.values.iter().map(|[_, line]| line.clone()))
            .collect()
    }
}

#[async_trait]
impl PushSink for MemorySink {
    async fn push(&self, request: &PushRequest) -> Result<(), PushError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

fn agent_config(dir: &Path, clients: &[&str]) -> Config {
    let clients: String = clients
        .iter()
        .map(|url| {
            format!(
                "  - url: {}\n    batch_wait: 50ms\n    tenant_id: bots\n    external_labels:\n      host: box1\n    backoff:\n      min_period: 10ms\n      max_period: 20ms\n      max_retries: 3\n",
                url
            )
        })
        .collect();

    let yaml = format!(
        r#"
server:
  graceful_shutdown_timeout: 2s
positions:
  filename: {dir}/positions.yaml
  sync_period: 50ms
clients:
{clients}
target_config:
  sync_period: 50ms
  debounce: 0s
tail:
  poll_interval: 20ms
pipeline:
  workers: 2
  channel_capacity: 16
scrape_configs:
  - job_name: bot
    static_configs:
      - labels:
          job: bot
          __path__: {dir}/logs/*.log
    pipeline_stages:
      - regex:
          expression: '^(?P<level>[A-Z]+) (?P<message>.*)$'
      - labels:
          level:
      - output:
          source: message
"#,
        dir = dir.display(),
        clients = clients,
    );
    load_config_str(&yaml).unwrap()
}

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn start(
    config: Config,
    sinks: Vec<Arc<dyn PushSink>>,
) -> (CancellationToken, JoinHandle<RunSummary>) {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { run_agent(config, sinks, token).await.unwrap() });
    (shutdown, handle)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..250 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 5s");
}

fn setup() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    (dir, logs.join("bot.log"))
}

#[tokio::test]
async fn test_delivers_and_resumes_after_restart() {
    let (dir, log) = setup();
    // The trailing partial line must wait for its newline
    append(&log, "INFO first\nINFO second\nINFO thi");

    let sink = Arc::new(MemorySink::default());
    let (shutdown, handle) = start(agent_config(dir.path(), &["http://unused"]), vec![sink.clone()]);
    wait_until(|| sink.lines().len() == 2).await;
    shutdown.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(sink.lines(), vec!["first", "second"]);
    assert_eq!(summary.deliveries[0].entries_sent, 2);
    assert_eq!(summary.positions.len(), 1);
    assert_eq!(summary.positions[0].offset, 23);
    assert!(dir.path().join("positions.yaml").exists());

    append(&log, "rd\nINFO fourth\n");

    let sink = Arc::new(MemorySink::default());
    let (shutdown, handle) = start(agent_config(dir.path(), &["http://unused"]), vec![sink.clone()]);
    wait_until(|| sink.lines().len() == 2).await;
    // Give a duplicate a chance to show up
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(sink.lines(), vec!["third", "fourth"]);
    assert_eq!(
        summary.positions[0].offset,
        fs::metadata(&log).unwrap().len()
    );
}

#[tokio::test]
async fn test_every_client_gets_every_line_in_order() {
    let (dir, log) = setup();
    let text: String = (0..200).map(|i| format!("INFO line {}\n", i)).collect();
    append(&log, &text);

    let first = Arc::new(MemorySink::default());
    let second = Arc::new(MemorySink::default());
    let config = agent_config(dir.path(), &["http://a", "http://b"]);
    let (shutdown, handle) = start(config, vec![first.clone(), second.clone()]);

    wait_until(|| first.lines().len() == 200 && second.lines().len() == 200).await;
    shutdown.cancel();
    let summary = handle.await.unwrap();

    let expected: Vec<String> = (0..200).map(|i| format!("line {}", i)).collect();
    assert_eq!(first.lines(), expected);
    assert_eq!(second.lines(), expected);
    assert_eq!(summary.deliveries.len(), 2);
    assert_eq!(summary.positions[0].offset, text.len() as u64);
}

#[tokio::test]
async fn test_truncated_file_is_read_from_start() {
    let (dir, log) = setup();
    append(&log, "INFO before truncation\n");

    let sink = Arc::new(MemorySink::default());
    let (shutdown, handle) = start(agent_config(dir.path(), &["http://unused"]), vec![sink.clone()]);
    wait_until(|| sink.lines().len() == 1).await;

    fs::write(&log, "INFO after\n").unwrap();
    wait_until(|| sink.lines().len() == 2).await;
    shutdown.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(sink.lines(), vec!["before truncation", "after"]);
    assert_eq!(summary.positions[0].epoch, 1);
    assert_eq!(summary.positions[0].offset, 11);
}

#[tokio::test]
async fn test_rotated_file_is_followed() {
    let (dir, log) = setup();
    append(&log, "INFO old\n");

    let sink = Arc::new(MemorySink::default());
    let (shutdown, handle) = start(agent_config(dir.path(), &["http://unused"]), vec![sink.clone()]);
    wait_until(|| sink.lines().len() == 1).await;

    append(&log, "INFO old tail\n");
    fs::rename(&log, dir.path().join("logs/bot.log.1")).unwrap();
    append(&log, "INFO new\n");

    wait_until(|| sink.lines().len() == 3).await;
    shutdown.cancel();
    handle.await.unwrap();

    let lines = sink.lines();
    assert!(lines.contains(&"old tail".to_string()), "{:?}", lines);
    assert!(lines.contains(&"new".to_string()), "{:?}", lines);
}

type Received = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

#[derive(Clone)]
struct PushServer {
    received: Received,
    /// Requests answered with `fail_status` before the server starts accepting
    failures: Arc<AtomicUsize>,
    fail_status: StatusCode,
}

async fn handle_push(
    State(server): State<PushServer>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let remaining = server.failures.load(Ordering::SeqCst);
    if remaining > 0 {
        server.failures.store(remaining - 1, Ordering::SeqCst);
        return server.fail_status;
    }

    let tenant = headers
        .get("x-scope-orgid")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    server.received.lock().unwrap().push((tenant, body));
    StatusCode::NO_CONTENT
}

async fn spawn_push_server(server: PushServer) -> String {
    let app = Router::new()
        .route("/loki/api/v1/push", post(handle_push))
        .with_state(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}/loki/api/v1/push", addr)
}

fn push_server(failures: usize, fail_status: StatusCode) -> PushServer {
    PushServer {
        received: Arc::default(),
        failures: Arc::new(AtomicUsize::new(failures)),
        fail_status,
    }
}

#[tokio::test]
async fn test_http_push_wire_format() {
    let (dir, log) = setup();
    append(&log, "ERROR disk full\n");

    let server = push_server(0, StatusCode::OK);
    let url = spawn_push_server(server.clone()).await;
    let config = agent_config(dir.path(), &[&url]);
    let sinks = http_sinks(&config).unwrap();
    let (shutdown, handle) = start(config, sinks);

    wait_until(|| !server.received.lock().unwrap().is_empty()).await;
    shutdown.cancel();
    handle.await.unwrap();

    let received = server.received.lock().unwrap();
    let (tenant, body) = &received[0];
    assert_eq!(tenant.as_deref(), Some("bots"));

    let stream = &body["streams"][0];
    assert_eq!(stream["stream"]["job"], "bot");
    assert_eq!(stream["stream"]["level"], "ERROR");
    assert_eq!(stream["stream"]["host"], "box1");
    assert_eq!(stream["stream"]["filename"], log.to_str().unwrap());
    assert!(stream["stream"].get("__path__").is_none());

    let value = &stream["values"][0];
    let nanos = value[0].as_str().unwrap();
    assert!(nanos.len() >= 19 && nanos.chars().all(|c| c.is_ascii_digit()), "{}", nanos);
    assert_eq!(value[1], "disk full");
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (dir, log) = setup();
    append(&log, "INFO eventually\n");

    let server = push_server(2, StatusCode::SERVICE_UNAVAILABLE);
    let url = spawn_push_server(server.clone()).await;
    let config = agent_config(dir.path(), &[&url]);
    let sinks = http_sinks(&config).unwrap();
    let (shutdown, handle) = start(config, sinks);

    wait_until(|| !server.received.lock().unwrap().is_empty()).await;
    shutdown.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(summary.deliveries[0].entries_sent, 1);
    assert_eq!(summary.deliveries[0].retries, 2);
}

#[tokio::test]
async fn test_rejected_batch_is_dropped_and_position_advances() {
    let (dir, log) = setup();
    append(&log, "INFO malformed\n");

    let server = push_server(usize::MAX, StatusCode::BAD_REQUEST);
    let url = spawn_push_server(server.clone()).await;
    let config = agent_config(dir.path(), &[&url]);
    let sinks = http_sinks(&config).unwrap();
    let (shutdown, handle) = start(config, sinks);

    wait_until(|| server.failures.load(Ordering::SeqCst) < usize::MAX).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(summary.deliveries[0].entries_dropped, 1);
    assert_eq!(server.failures.load(Ordering::SeqCst), usize::MAX - 1);
    assert_eq!(summary.positions[0].offset, 15);
}
