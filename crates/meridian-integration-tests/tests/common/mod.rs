//! Shared test harness for integration tests.
//!
//! [`MockLauncher`] serves any server whose command is [`MOCK_COMMAND`] with
//! a scripted MCP server speaking line-delimited JSON-RPC over an in-process
//! duplex stream. Other commands are spawned as real processes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_mcp::{
    HostConfig, Launched, McpResult, ProcessLauncher, ServerConfig, ServerLauncher,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

/// Command routed to the scripted server.
pub const MOCK_COMMAND: &str = "meridian-mock-server";

/// Argument that hides the prompts capability.
#[allow(dead_code)]
pub const NO_PROMPTS: &str = "--no-prompts";

/// Tools every scripted server offers.
const TOOLS: [&str; 6] = ["echo", "fail", "slow", "ask", "summarize", "run_inference"];

/// How long the `slow` tool takes to answer. `run_inference` takes as long
/// when the prompt mentions "slow".
pub const SLOW_TOOL_DELAY: Duration = Duration::from_secs(1);

/// A server served by the scripted mock.
pub fn mock_server(name: &str) -> ServerConfig {
    ServerConfig::stdio(name, MOCK_COMMAND)
}

/// Host configuration without known servers or workspace detection.
pub fn offline_config(servers: Vec<ServerConfig>) -> HostConfig {
    let mut config = HostConfig::default();
    config.registry.include_known = false;
    config.roots.detect_workspace = false;
    for server in servers {
        config.add_server(server);
    }
    config
}

/// What a scripted server observed.
#[derive(Debug, Default)]
pub struct MockState {
    /// `notifications/roots/list_changed` received.
    pub roots_notifications: AtomicUsize,
    /// Root URIs reported by each `roots/list` answer, oldest first.
    pub roots_seen: Mutex<Vec<Vec<String>>>,
    /// Methods of every request received.
    pub requests: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockState {
    /// The most recent `roots/list` answer.
    pub fn latest_roots(&self) -> Option<Vec<String>> {
        self.roots_seen.lock().unwrap().last().cloned()
    }

    /// How many requests with `method` arrived.
    pub fn request_count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|m| *m == method)
            .count()
    }
}

/// Launcher serving mock servers in-process.
#[derive(Debug, Default)]
pub struct MockLauncher {
    states: Mutex<HashMap<String, Arc<MockState>>>,
}

#[allow(dead_code)]
impl MockLauncher {
    /// Create a launcher.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// State of the most recent mock launched as `name`.
    pub fn state(&self, name: &str) -> Option<Arc<MockState>> {
        self.states.lock().unwrap().get(name).cloned()
    }
}

impl ServerLauncher for MockLauncher {
    fn launch(&self, config: &ServerConfig) -> McpResult<Launched> {
        if config.command != MOCK_COMMAND {
            return ProcessLauncher.launch(config);
        }

        let (client, server) = tokio::io::duplex(65_536);
        let state = Arc::new(MockState::default());
        self.states
            .lock()
            .unwrap()
            .insert(config.name.clone(), Arc::clone(&state));

        let script = MockScript {
            name: config.name.clone(),
            prompts: !config.args.iter().any(|a| a == NO_PROMPTS),
            state,
        };
        tokio::spawn(script.run(server));
        Ok(Launched::Stream(client))
    }
}

/// Poll `check` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn wait_for(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// The file URI of `path`, as the host reports it.
#[allow(dead_code)]
pub fn file_uri(path: &Path) -> String {
    meridian_mcp::path_to_uri(path).unwrap()
}

/// A scripted MCP server.
struct MockScript {
    name: String,
    prompts: bool,
    state: Arc<MockState>,
}

/// A tool call waiting on a request the mock sent to the host.
struct Pending {
    call_id: Value,
}

impl MockScript {
    async fn run(self, stream: DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let mut line = message.to_string();
                line.push('\n');
                if write.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut pending: HashMap<String, Pending> = HashMap::new();
        let mut next_id: u64 = 0;
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let method = message.get("method").and_then(Value::as_str);
            let id = message.get("id").cloned();
            let params = message.get("params").cloned().unwrap_or(Value::Null);

            match (method, id) {
                (Some(method), Some(id)) => {
                    self.state.requests.lock().unwrap().push(method.to_string());
                    self.request(method, id, &params, &tx, &mut pending, &mut next_id);
                },
                (Some("notifications/roots/list_changed"), None) => {
                    self.state.roots_notifications.fetch_add(1, Ordering::SeqCst);
                    next_id = next_id.wrapping_add(1);
                    let _ = tx.send(json!({
                        "jsonrpc": "2.0",
                        "id": format!("roots-{next_id}"),
                        "method": "roots/list",
                    }));
                },
                (None, Some(Value::String(id))) if id.starts_with("roots-") => {
                    let uris = message
                        .pointer("/result/roots")
                        .and_then(Value::as_array)
                        .map(|roots| {
                            roots
                                .iter()
                                .filter_map(|r| r.get("uri").and_then(Value::as_str))
                                .map(String::from)
                                .collect()
                        })
                        .unwrap_or_default();
                    self.state.roots_seen.lock().unwrap().push(uris);
                },
                (None, Some(Value::String(id))) => {
                    if let Some(waiting) = pending.remove(&id) {
                        let _ = tx.send(tool_text(waiting.call_id, &answer_text(&message), false));
                    }
                },
                _ => {},
            }
        }
    }

    fn request(
        &self,
        method: &str,
        id: Value,
        params: &Value,
        tx: &mpsc::UnboundedSender<Value>,
        pending: &mut HashMap<String, Pending>,
        next_id: &mut u64,
    ) {
        let result = match method {
            "initialize" => {
                let mut capabilities = json!({"tools": {}, "resources": {}});
                if self.prompts {
                    capabilities["prompts"] = json!({});
                }
                json!({
                    "protocolVersion": params
                        .get("protocolVersion")
                        .cloned()
                        .unwrap_or_else(|| json!("2025-06-18")),
                    "capabilities": capabilities,
                    "serverInfo": {"name": format!("mock-{}", self.name), "version": "0.0.1"},
                    "instructions": "scripted test server",
                })
            },
            "ping" => json!({}),
            "tools/list" => {
                let tools: Vec<Value> = TOOLS
                    .iter()
                    .map(|name| {
                        json!({
                            "name": name,
                            "description": format!("{name} tool"),
                            "inputSchema": {"type": "object"},
                        })
                    })
                    .collect();
                json!({ "tools": tools })
            },
            "tools/call" => {
                self.call_tool(id, params, tx, pending, next_id);
                return;
            },
            "resources/list" => json!({
                "resources": [{
                    "uri": "memo://notes",
                    "name": "notes",
                    "mimeType": "text/plain",
                }],
            }),
            "resources/read" => json!({
                "contents": [{
                    "uri": params.get("uri").cloned().unwrap_or(Value::Null),
                    "mimeType": "text/plain",
                    "text": format!("notes from {}", self.name),
                }],
            }),
            "prompts/list" => json!({
                "prompts": [{
                    "name": "greet",
                    "description": "Greets someone",
                    "arguments": [{"name": "who", "required": true}],
                }],
            }),
            "prompts/get" => {
                let who = params
                    .pointer("/arguments/who")
                    .and_then(Value::as_str)
                    .unwrap_or("nobody");
                json!({
                    "description": "Greets someone",
                    "messages": [{
                        "role": "user",
                        "content": {"type": "text", "text": format!("Hello, {who}")},
                    }],
                })
            },
            _ => {
                let _ = tx.send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("unknown method {method}")},
                }));
                return;
            },
        };

        let _ = tx.send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    fn call_tool(
        &self,
        id: Value,
        params: &Value,
        tx: &mpsc::UnboundedSender<Value>,
        pending: &mut HashMap<String, Pending>,
        next_id: &mut u64,
    ) {
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        let tool = params.get("name").and_then(Value::as_str).unwrap_or_default();

        match tool {
            "echo" => {
                let text = arguments
                    .get("text")
                    .and_then(Value::as_str)
                    .map_or_else(|| arguments.to_string(), String::from);
                let _ = tx.send(tool_text(id, &text, false));
            },
            "fail" => {
                let _ = tx.send(tool_text(id, "boom", true));
            },
            "slow" => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(SLOW_TOOL_DELAY).await;
                    let _ = tx.send(tool_text(id, "finally", false));
                });
            },
            "run_inference" => {
                let prompt = arguments
                    .get("prompt")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let text = format!("Model: mock-llm\n**Response:** {prompt}");
                if prompt.contains("slow") {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(SLOW_TOOL_DELAY).await;
                        let _ = tx.send(tool_text(id, &text, false));
                    });
                } else {
                    let _ = tx.send(tool_text(id, &text, false));
                }
            },
            "ask" => {
                *next_id = next_id.wrapping_add(1);
                let request_id = format!("srv-{next_id}");
                pending.insert(request_id.clone(), Pending { call_id: id });
                let _ = tx.send(json!({
                    "jsonrpc": "2.0",
                    "id": request_id,
                    "method": "elicitation/create",
                    "params": {
                        "mode": "form",
                        "message": "Approve?",
                        "requestedSchema": {
                            "type": "object",
                            "properties": {
                                "approve": {"type": "boolean", "default": true},
                            },
                            "required": ["approve"],
                        },
                    },
                }));
            },
            "summarize" => {
                *next_id = next_id.wrapping_add(1);
                let request_id = format!("srv-{next_id}");
                pending.insert(request_id.clone(), Pending { call_id: id });
                let _ = tx.send(json!({
                    "jsonrpc": "2.0",
                    "id": request_id,
                    "method": "sampling/createMessage",
                    "params": {
                        "messages": [{
                            "role": "user",
                            "content": {"type": "text", "text": "Summarize this"},
                        }],
                        "maxTokens": 64,
                    },
                }));
            },
            other => {
                let _ = tx.send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32602, "message": format!("unknown tool {other}")},
                }));
            },
        }
    }
}

fn tool_text(id: Value, text: &str, is_error: bool) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{"type": "text", "text": text}],
            "isError": is_error,
        },
    })
}

/// Text a tool reports for the host's answer to a server request.
///
/// Sampling answers report the generated text, elicitation answers the
/// whole result, errors `error: <message>`.
fn answer_text(message: &Value) -> String {
    if let Some(error) = message.get("error") {
        let reason = error.get("message").and_then(Value::as_str).unwrap_or("?");
        return format!("error: {reason}");
    }

    let result = message.get("result").cloned().unwrap_or(Value::Null);
    if result.get("action").is_some() {
        return result.to_string();
    }

    let content = result.get("content").cloned().unwrap_or(Value::Null);
    let content = match content {
        Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
        other => other,
    };
    content
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
