use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use serde_json::{Map, Value, json};
use toolmux_core::{ConfigError, NewServerConfig, RecordingEmitter, RepositoryError, TransportKind};

use super::*;
use crate::client::{CallToolResult, ContentBlock, ToolDefinition};

mock! {
    pub Repo {}

    #[async_trait]
    impl ServerConfigRepository for Repo {
        async fn insert(&self, config: NewServerConfig) -> Result<ServerConfig, RepositoryError>;
        async fn get_by_id(&self, id: i64) -> Result<ServerConfig, RepositoryError>;
        async fn list(&self) -> Result<Vec<ServerConfig>, RepositoryError>;
        async fn list_enabled(&self) -> Result<Vec<ServerConfig>, RepositoryError>;
        async fn update(&self, config: &ServerConfig) -> Result<(), RepositoryError>;
        async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
        async fn set_enabled(&self, id: i64, enabled: bool) -> Result<(), RepositoryError>;
    }
}

struct FakeSession {
    server: String,
    tools: Vec<String>,
    alive: AtomicBool,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

#[async_trait]
impl ToolSession for FakeSession {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        Ok(self
            .tools
            .iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: Some(format!("{} from {}", name, self.server)),
                input_schema: Some(json!({"type": "object", "properties": {}})),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult, McpError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        match name {
            "explode" => Err(McpError::Server {
                code: -32000,
                message: "kaboom".into(),
            }),
            "refuse" => Ok(CallToolResult {
                content: vec![ContentBlock::text("not allowed")],
                is_error: true,
                ..CallToolResult::default()
            }),
            "huge" => Ok(CallToolResult {
                content: vec![ContentBlock::text("z".repeat(50))],
                ..CallToolResult::default()
            }),
            _ => Ok(CallToolResult {
                content: vec![ContentBlock::text(format!(
                    "{}:{}:{}",
                    self.server,
                    name,
                    Value::Object(arguments)
                ))],
                ..CallToolResult::default()
            }),
        }
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Opens a [`FakeSession`] per server name; unknown names fail to connect.
#[derive(Default)]
struct FakeFactory {
    catalogs: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
    opened: StdMutex<Vec<Arc<FakeSession>>>,
    releases: AtomicUsize,
}

impl FakeFactory {
    fn with_server(mut self, name: &str, tools: &[&str]) -> Self {
        self.catalogs
            .insert(name.to_string(), tools.iter().map(ToString::to_string).collect());
        self
    }

    fn session(&self, server: &str) -> Arc<FakeSession> {
        let opened = self.opened.lock().unwrap();
        Arc::clone(opened.iter().rev().find(|s| s.server == server).unwrap())
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, config: &ServerConfig) -> Result<Arc<dyn ToolSession>, McpError> {
        let Some(tools) = self.catalogs.get(&config.name) else {
            return Err(McpError::Protocol(format!("{} is unreachable", config.name)));
        };
        let session = Arc::new(FakeSession {
            server: config.name.clone(),
            tools: tools.clone(),
            alive: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            delay: self.delay,
        });
        self.opened.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn stdio(id: i64, name: &str) -> ServerConfig {
    NewServerConfig::stdio(name, format!("{name}-server"), vec![]).into_config(id, Utc::now())
}

fn repo_with(configs: Vec<ServerConfig>) -> MockRepo {
    let mut repo = MockRepo::new();
    repo.expect_list_enabled()
        .returning(move || Ok(configs.iter().filter(|c| c.enabled).cloned().collect()));
    repo
}

fn manager(repo: MockRepo, factory: Arc<FakeFactory>) -> (ConnectionManager, Arc<RecordingEmitter>) {
    manager_with_settings(repo, factory, Settings::with_defaults())
}

fn manager_with_settings(
    repo: MockRepo,
    factory: Arc<FakeFactory>,
    settings: Settings,
) -> (ConnectionManager, Arc<RecordingEmitter>) {
    let emitter = Arc::new(RecordingEmitter::new());
    let manager = ConnectionManager::new(Arc::new(repo), factory, Arc::clone(&emitter) as Arc<dyn EventEmitter>, settings);
    (manager, emitter)
}

fn call(name: &str) -> ToolCall {
    ToolCall::new("call-1", name, Map::new())
}

fn collisions(emitter: &RecordingEmitter) -> Vec<ManagerEvent> {
    emitter
        .events()
        .into_iter()
        .filter(|e| matches!(e, ManagerEvent::ToolCollision { .. }))
        .collect()
}

#[tokio::test]
async fn first_registered_server_wins_collisions() {
    let factory = Arc::new(
        FakeFactory::default()
            .with_server("alpha", &["search", "fetch"])
            .with_server("beta", &["search", "browse"]),
    );
    let (manager, emitter) = manager(repo_with(vec![stdio(2, "beta"), stdio(1, "alpha")]), factory);

    let state = manager.connect_all(false).await.unwrap();
    assert_eq!(state.connected_servers, 2);
    assert_eq!(manager.route_for("search").await, Some(1));
    assert_eq!(manager.route_for("browse").await, Some(2));

    let names: Vec<_> = manager.tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["search", "fetch", "browse"]);

    assert_eq!(
        collisions(&emitter),
        vec![ManagerEvent::tool_collision("search", 1, 2)]
    );

    let result = manager.call_tool(&call("search")).await;
    assert!(!result.is_error);
    assert!(result.output.starts_with("alpha:search"));
}

#[tokio::test]
async fn unrouted_call_returns_error_result() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search"]));
    let (manager, _) = manager(repo_with(vec![stdio(1, "alpha")]), factory);
    manager.connect_all(false).await.unwrap();

    let result = manager.call_tool(&call("nope")).await;
    assert!(result.is_error);
    assert_eq!(result.call_id, "call-1");
    assert_eq!(
        serde_json::from_str::<Value>(&result.output).unwrap(),
        json!({"error": "No server provides tool: nope"})
    );
}

#[tokio::test]
async fn call_after_disconnect_reports_not_connected() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search"]));
    let (manager, emitter) = manager(repo_with(vec![stdio(1, "alpha")]), Arc::clone(&factory));
    manager.connect_all(false).await.unwrap();

    assert!(manager.disconnect(1).await);
    assert!(!manager.disconnect(1).await);
    assert!(!factory.session("alpha").is_alive());

    let result = manager.call_tool(&call("search")).await;
    assert!(result.is_error);
    assert_eq!(
        serde_json::from_str::<Value>(&result.output).unwrap(),
        json!({"error": "Server not connected"})
    );
    assert!(emitter.events().contains(&ManagerEvent::server_disconnected(1)));
}

#[tokio::test]
async fn dead_session_reports_not_connected() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search"]));
    let (manager, _) = manager(repo_with(vec![stdio(1, "alpha")]), Arc::clone(&factory));
    manager.connect_all(false).await.unwrap();

    factory.session("alpha").alive.store(false, Ordering::SeqCst);
    let result = manager.call_tool(&call("search")).await;
    assert!(result.output.contains("Server not connected"));
}

#[tokio::test]
async fn callee_errors_become_error_results() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["explode", "refuse"]));
    let (manager, _) = manager(repo_with(vec![stdio(1, "alpha")]), factory);
    manager.connect_all(false).await.unwrap();

    let exploded = manager.call_tool(&call("explode")).await;
    assert!(exploded.is_error);
    assert!(exploded.output.contains("kaboom"));

    let refused = manager.call_tool(&call("refuse")).await;
    assert!(refused.is_error);
    assert_eq!(refused.output, "not allowed");
}

#[tokio::test]
async fn output_is_capped() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["huge"]));
    let settings = Settings {
        max_tool_output_chars: Some(10),
        ..Settings::with_defaults()
    };
    let (manager, _) = manager_with_settings(repo_with(vec![stdio(1, "alpha")]), factory, settings);
    manager.connect_all(false).await.unwrap();

    let result = manager.call_tool(&call("huge")).await;
    assert_eq!(result.output, format!("{}{}", "z".repeat(10), toolmux_core::TRUNCATION_MARKER));
}

#[tokio::test]
async fn error_output_respects_cap() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["explode"]));
    let settings = Settings {
        max_tool_output_chars: Some(10),
        ..Settings::with_defaults()
    };
    let (manager, _) = manager_with_settings(repo_with(vec![stdio(1, "alpha")]), factory, settings);
    manager.connect_all(false).await.unwrap();
    let bound = 10 + toolmux_core::TRUNCATION_MARKER.chars().count();

    let unrouted = manager.call_tool(&call(&"q".repeat(200))).await;
    assert!(unrouted.is_error);
    assert!(unrouted.output.chars().count() <= bound);

    let exploded = manager.call_tool(&call("explode")).await;
    assert!(exploded.is_error);
    assert!(exploded.output.chars().count() <= bound);
}

#[tokio::test]
async fn one_failing_server_does_not_block_others() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search"]));
    let (manager, emitter) = manager(
        repo_with(vec![stdio(1, "ghost"), stdio(2, "alpha")]),
        factory,
    );

    let state = manager.connect_all(false).await.unwrap();
    assert_eq!(state.attempted_servers, 2);
    assert_eq!(state.failed_servers, 1);
    assert_eq!(state.connected_servers, 1);
    assert!(state.server_errors[&1].contains("unreachable"));
    assert_eq!(manager.route_for("search").await, Some(2));
    assert!(emitter
        .events()
        .iter()
        .any(|e| matches!(e, ManagerEvent::ServerFailed { server_id: 1, .. })));
}

#[tokio::test]
async fn blank_command_fails_with_config_error_and_registers_nothing() {
    let factory = Arc::new(FakeFactory::default().with_server("blank", &["search"]));
    let (manager, _) = manager(repo_with(vec![]), factory);

    let mut config = stdio(1, "blank");
    config.command = Some("   ".into());
    let err = manager.connect(&config).await.unwrap_err();
    assert!(matches!(err, McpError::Config(ConfigError::MissingCommand)));
    assert!(manager.connected_server_ids().await.is_empty());
    assert!(manager.tools().is_empty());
}

#[tokio::test]
async fn disabled_config_is_skipped() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search"]));
    let (manager, _) = manager(repo_with(vec![]), factory);
    let mut config = stdio(1, "alpha");
    config.enabled = false;
    manager.connect(&config).await.unwrap();
    assert!(manager.connected_server_ids().await.is_empty());
}

#[tokio::test]
async fn connect_all_then_disconnect_all_leaves_nothing() {
    let factory = Arc::new(
        FakeFactory::default()
            .with_server("alpha", &["search"])
            .with_server("beta", &["browse"]),
    );
    let (manager, _) = manager(
        repo_with(vec![stdio(1, "alpha"), stdio(2, "beta")]),
        Arc::clone(&factory),
    );
    let tools = manager.available_tools();

    manager.connect_all(false).await.unwrap();
    assert_eq!(tools.borrow().len(), 2);

    manager.disconnect_all().await;
    assert!(manager.connected_server_ids().await.is_empty());
    assert!(manager.route_for("search").await.is_none());
    assert!(tools.borrow().is_empty());
    assert_eq!(*manager.connection_state().borrow(), ConnectionState::default());
    assert_eq!(factory.releases.load(Ordering::SeqCst), 1);
    assert!(!factory.session("alpha").is_alive());
    assert!(!factory.session("beta").is_alive());
}

#[tokio::test]
async fn live_connections_are_kept_unless_forced() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search"]));
    let (manager, _) = manager(repo_with(vec![stdio(1, "alpha")]), Arc::clone(&factory));

    manager.connect_all(false).await.unwrap();
    manager.connect_all(false).await.unwrap();
    assert_eq!(factory.opened.lock().unwrap().len(), 1);

    manager.connect_all(true).await.unwrap();
    assert_eq!(factory.opened.lock().unwrap().len(), 2);
    assert!(!factory.opened.lock().unwrap()[0].is_alive());
    assert_eq!(manager.connected_server_ids().await, vec![1]);
}

#[tokio::test]
async fn servers_no_longer_enabled_are_pruned() {
    let factory = Arc::new(
        FakeFactory::default()
            .with_server("alpha", &["search"])
            .with_server("beta", &["browse"]),
    );
    let enabled = Arc::new(StdMutex::new(vec![stdio(1, "alpha"), stdio(2, "beta")]));
    let mut repo = MockRepo::new();
    let source = Arc::clone(&enabled);
    repo.expect_list_enabled()
        .returning(move || Ok(source.lock().unwrap().clone()));
    let (manager, _) = manager(repo, factory);

    manager.connect_all(false).await.unwrap();
    enabled.lock().unwrap().retain(|c| c.id != 2);
    manager.connect_all(false).await.unwrap();

    assert_eq!(manager.connected_server_ids().await, vec![1]);
    assert!(manager.route_for("browse").await.is_none());
}

#[tokio::test]
async fn allow_list_filters_tools() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search", "delete"]));
    let mut config = stdio(1, "alpha");
    config.allowed_tools = Some(vec!["search".into()]);
    let (manager, _) = manager(repo_with(vec![config]), factory);
    manager.connect_all(false).await.unwrap();

    assert_eq!(manager.route_for("search").await, Some(1));
    assert!(manager.route_for("delete").await.is_none());
    assert!(manager.call_tool(&call("delete")).await.is_error);
}

#[tokio::test]
async fn concurrent_calls_all_complete() {
    let factory = Arc::new(FakeFactory {
        delay: Some(Duration::from_millis(5)),
        ..FakeFactory::default().with_server("alpha", &["search"])
    });
    let (manager, _) = manager(repo_with(vec![stdio(1, "alpha")]), Arc::clone(&factory));
    manager.connect_all(false).await.unwrap();
    let manager = Arc::new(manager);

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let mut args = Map::new();
            args.insert("n".into(), json!(i));
            manager.call_tool(&ToolCall::new(format!("c{i}"), "search", args)).await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.call_id, format!("c{i}"));
        assert!(result.output.contains(&format!("\"n\":{i}")));
    }
    assert_eq!(factory.session("alpha").calls.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn set_enabled_persists_and_toggles_connection() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search"]));
    let mut repo = MockRepo::new();
    repo.expect_set_enabled()
        .withf(|id, _| *id == 1)
        .times(2)
        .returning(|_, _| Ok(()));
    repo.expect_get_by_id().returning(|id| Ok(stdio(id, "alpha")));
    let (manager, _) = manager(repo, factory);

    manager.set_enabled(1, true).await.unwrap();
    assert_eq!(manager.route_for("search").await, Some(1));

    manager.set_enabled(1, false).await.unwrap();
    assert!(manager.connected_server_ids().await.is_empty());
    assert!(manager.route_for("search").await.is_none());
}

#[tokio::test]
async fn test_connection_counts_tools_without_registering() {
    let factory = Arc::new(FakeFactory::default().with_server("alpha", &["search", "fetch"]));
    let (manager, _) = manager(repo_with(vec![]), Arc::clone(&factory));

    assert_eq!(manager.test_connection(&stdio(9, "alpha")).await.unwrap(), 2);
    assert!(manager.connected_server_ids().await.is_empty());
    assert!(!factory.session("alpha").is_alive());

    let err = manager.test_connection(&stdio(10, "ghost")).await.unwrap_err();
    assert!(matches!(err, McpError::Protocol(_)));
}

#[tokio::test]
async fn store_failure_is_reported() {
    let mut repo = MockRepo::new();
    repo.expect_list_enabled()
        .returning(|| Err(RepositoryError::Internal("disk gone".into())));
    let (manager, _) = manager(repo, Arc::new(FakeFactory::default()));
    assert!(matches!(
        manager.connect_all(false).await,
        Err(McpError::Repository(RepositoryError::Internal(_)))
    ));
}

#[tokio::test]
async fn remote_config_validation_runs_before_connect() {
    let (manager, _) = manager(repo_with(vec![]), Arc::new(FakeFactory::default()));
    let config = NewServerConfig::remote("web", TransportKind::WebSocket, "http://example.com/ws")
        .into_config(4, Utc::now());
    assert!(matches!(
        manager.connect(&config).await,
        Err(McpError::Config(ConfigError::UnsupportedScheme { .. }))
    ));
}
