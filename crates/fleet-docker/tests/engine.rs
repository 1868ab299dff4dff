//! `DockerOrchestrator` and preflight checks against a canned engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use fleet_core::{
    Orchestrator, OrchestratorError, RegistryCredentials, ServiceSpec, SpecVersion, TaskFilter,
    TaskState,
};
use fleet_docker::{DockerOrchestrator, EngineClient, Endpoint, PreflightError, preflight};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: String,
}

type Handler = Arc<dyn Fn(&Recorded) -> (u16, String) + Send + Sync>;

/// Serves one canned response per request and records what it saw.
struct FakeEngine {
    addr: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeEngine {
    async fn start(handler: impl Fn(&Recorded) -> (u16, String) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let seen = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let seen = seen.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, seen, handler).await;
                });
            }
        });

        Self { addr, requests }
    }

    fn orchestrator(&self) -> DockerOrchestrator {
        DockerOrchestrator::new(self.client())
    }

    fn client(&self) -> EngineClient {
        EngineClient::new(Endpoint::Tcp(self.addr.clone()), "1.45")
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    seen: Arc<Mutex<Vec<Recorded>>>,
    handler: Handler,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).to_string();

    let recorded = Recorded {
        method,
        path,
        headers,
        body,
    };
    let (status, response) = handler(&recorded);
    seen.lock().unwrap().push(recorded);

    let reply = format!(
        "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response}",
        response.len()
    );
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

const SERVICE: &str = r#"{
  "ID": "svc1",
  "Version": { "Index": 42 },
  "Spec": {
    "Name": "web",
    "Labels": { "team": "storefront" },
    "TaskTemplate": { "ContainerSpec": { "Image": "registry.local/web:v1" } },
    "Mode": { "Replicated": { "Replicas": 2 } }
  }
}"#;

#[tokio::test]
async fn inspect_reads_spec_and_version() {
    let engine = FakeEngine::start(|_| (200, SERVICE.to_string())).await;

    let service = engine.orchestrator().inspect_service("web").await.unwrap();
    assert_eq!(service.id, "svc1");
    assert_eq!(service.version, SpecVersion(42));
    assert_eq!(service.spec.replicas, 2);
    assert_eq!(service.spec.image, "registry.local/web:v1");

    let requests = engine.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/v1.45/services/web");
}

#[tokio::test]
async fn update_writes_at_given_version_and_keeps_labels() {
    let engine = FakeEngine::start(|req| match req.method.as_str() {
        "GET" => (200, SERVICE.to_string()),
        _ => (200, r#"{"Warnings":["image could not be accessed on a registry"]}"#.to_string()),
    })
    .await;
    let orch = engine.orchestrator().with_credentials(&RegistryCredentials {
        server: "registry.local".into(),
        username: "ci".into(),
        password: "hunter2".into(),
    });

    let mut spec = ServiceSpec::new("web", "registry.local/web:v1");
    spec.replicas = 4;
    let warnings = orch
        .update_service("svc1", SpecVersion(42), &spec)
        .await
        .unwrap();
    assert_eq!(warnings, ["image could not be accessed on a registry"]);

    let requests = engine.requests();
    let update = requests.iter().find(|r| r.method == "POST").unwrap();
    assert_eq!(update.path, "/v1.45/services/svc1/update?version=42");
    assert!(update.headers.contains_key("x-registry-auth"));

    let body: serde_json::Value = serde_json::from_str(&update.body).unwrap();
    assert_eq!(body["Mode"]["Replicated"]["Replicas"], 4);
    assert_eq!(body["Labels"]["team"], "storefront");
}

#[tokio::test]
async fn out_of_sequence_update_is_a_version_conflict() {
    let engine = FakeEngine::start(|req| match req.method.as_str() {
        "GET" => (200, SERVICE.to_string()),
        _ => (
            500,
            r#"{"message":"rpc error: code = Unknown desc = update out of sequence"}"#.to_string(),
        ),
    })
    .await;

    let err = engine
        .orchestrator()
        .update_service("svc1", SpecVersion(41), &ServiceSpec::new("web", "web:v2"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::VersionConflict {
            service: "svc1".into(),
            version: SpecVersion(41),
        }
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn missing_service_is_not_found() {
    let engine =
        FakeEngine::start(|_| (404, r#"{"message":"service shop not found"}"#.to_string())).await;
    let err = engine.orchestrator().inspect_service("shop").await.unwrap_err();
    assert_eq!(err, OrchestratorError::NotFound("shop".into()));
}

#[tokio::test]
async fn create_returns_id() {
    let engine = FakeEngine::start(|_| (201, r#"{"ID":"svc9"}"#.to_string())).await;
    let id = engine
        .orchestrator()
        .create_service(&ServiceSpec::new("shop", "registry.local/shop:latest"))
        .await
        .unwrap();
    assert_eq!(id, "svc9");

    let requests = engine.requests();
    assert_eq!(requests[0].path, "/v1.45/services/create");
    assert!(!requests[0].headers.contains_key("x-registry-auth"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["Name"], "shop");
}

#[tokio::test]
async fn tasks_and_stats() {
    let engine = FakeEngine::start(|req| {
        if req.path.contains("/tasks") {
            (
                200,
                r#"[{"ID":"t1","ServiceID":"svc1","Status":{"State":"running","ContainerStatus":{"ContainerID":"c1"}}}]"#
                    .to_string(),
            )
        } else {
            (
                200,
                r#"{"cpu_stats":{"cpu_usage":{"total_usage":170},"system_cpu_usage":200,"online_cpus":2},
                    "precpu_stats":{"cpu_usage":{"total_usage":100},"system_cpu_usage":100}}"#
                    .to_string(),
            )
        }
    })
    .await;
    let orch = engine.orchestrator();

    let tasks = orch.list_tasks(&TaskFilter::service("svc1")).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::Running);
    assert_eq!(tasks[0].container_id.as_deref(), Some("c1"));

    let sample = orch.container_stats("c1").await.unwrap();
    assert_eq!(sample.cpu_total, 170);
    assert_eq!(sample.online_cpus, 2);

    let requests = engine.requests();
    assert_eq!(
        requests[0].path,
        "/v1.45/tasks?filters=%7B%22service%22%3A%5B%22svc1%22%5D%7D"
    );
    assert_eq!(requests[1].path, "/v1.45/containers/c1/stats?stream=false");
}

#[tokio::test]
async fn unreachable_engine_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let orch = DockerOrchestrator::new(EngineClient::new(Endpoint::Tcp(addr), "1.45"));
    let err = orch.inspect_service("web").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Unavailable(_)), "{err}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn preflight_requires_swarm_manager() {
    let engine = FakeEngine::start(|req| {
        if req.path.ends_with("/_ping") {
            (200, "OK".to_string())
        } else {
            (
                200,
                r#"{"Swarm":{"LocalNodeState":"inactive","ControlAvailable":false}}"#.to_string(),
            )
        }
    })
    .await;

    let err = preflight(&engine.client()).await.unwrap_err();
    assert!(
        matches!(&err, PreflightError::NotSwarmManager { state } if state == "inactive"),
        "{err}"
    );
}

#[tokio::test]
async fn preflight_passes_on_manager() {
    let engine = FakeEngine::start(|req| {
        if req.path.ends_with("/_ping") {
            (200, "OK".to_string())
        } else {
            (
                200,
                r#"{"Swarm":{"LocalNodeState":"active","ControlAvailable":true}}"#.to_string(),
            )
        }
    })
    .await;
    preflight(&engine.client()).await.unwrap();
}
