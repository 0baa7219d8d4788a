//! Server lifecycle and request routing.
//!
//! The `ServerManager` owns every tool-provider process and its transport.
//! Stdio servers are spawned as shell-wrapped children in their own OS
//! process group (so grandchildren die with the parent) and confirmed alive
//! after a short grace period. HTTP servers have no lifecycle — they are
//! marked running immediately.
//!
//! Spawn and I/O failures are caught and recorded on the server's
//! definition, never thrown.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::transport::{HttpEndpoint, StdioConnection};
use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::config::{ServerDefinition, ServersConfig, TransportConfig};
use crate::events::{EventBus, Notification};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a freshly spawned child must survive to count as started.
const SPAWN_GRACE: Duration = Duration::from_millis(500);

/// Default window for an id-matching response.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace for voluntary exit after the shutdown notification, before killing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Maximum restart attempts before giving up on a server.
const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Base delay between restart attempts (doubles each time).
const RESTART_BASE_DELAY: Duration = Duration::from_secs(1);

// ─── Types ───────────────────────────────────────────────────────────────────

/// A server definition shared between the manager and the validation layer,
/// mutated in place as runtime state changes.
pub type SharedDefinition = Arc<RwLock<ServerDefinition>>;

/// Live transport to one server.
#[derive(Clone)]
enum Connection {
    Stdio(Arc<StdioConnection>),
    Http(HttpEndpoint),
}

// ─── ServerManager ───────────────────────────────────────────────────────────

/// Owns tool-provider processes and the request/response transport.
pub struct ServerManager {
    definitions: RwLock<HashMap<String, SharedDefinition>>,
    connections: RwLock<HashMap<String, Connection>>,
    children: RwLock<HashMap<String, Arc<TokioMutex<Child>>>>,
    restart_counts: RwLock<HashMap<String, u32>>,
    next_request_id: AtomicU64,
    http: reqwest::Client,
    events: EventBus,
    shutdown: CancellationToken,
}

impl ServerManager {
    /// Create a manager over the loaded server map.
    pub fn new(config: ServersConfig, events: EventBus) -> Self {
        let definitions = config
            .servers
            .into_iter()
            .map(|(name, def)| (name, Arc::new(RwLock::new(def))))
            .collect();

        Self {
            definitions: RwLock::new(definitions),
            connections: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            restart_counts: RwLock::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            http: reqwest::Client::new(),
            events: events.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    /// The shared definition for a server, if configured.
    pub async fn definition(&self, name: &str) -> Option<SharedDefinition> {
        self.definitions.read().await.get(name).cloned()
    }

    /// Sorted names of all configured servers.
    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// A cancellation token linked to manager shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start a server. Returns `false` on spawn error, immediate exit, or a
    /// disabled/unknown server; the failure is recorded on the definition.
    ///
    /// HTTP servers have no process to start and are marked running
    /// immediately. Starting an already-running server is a no-op `true`.
    pub async fn start_server(&self, name: &str) -> bool {
        let Some(def) = self.definition(name).await else {
            tracing::warn!(server = name, "start requested for unknown server");
            return false;
        };

        let (enabled, transport) = {
            let d = def.read().await;
            (d.enabled, d.transport.clone())
        };
        if !enabled {
            tracing::debug!(server = name, "server disabled, not starting");
            return false;
        }

        match transport {
            TransportConfig::Http { url } => {
                let endpoint = HttpEndpoint::new(name, &url, self.http.clone());
                self.connections
                    .write()
                    .await
                    .insert(name.to_string(), Connection::Http(endpoint));
                {
                    let mut d = def.write().await;
                    d.state.is_running = true;
                    d.state.last_error = None;
                }
                self.emit_status(name, true, None);
                true
            }
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                if self.is_server_running(name).await {
                    return true;
                }
                self.spawn_stdio(name, &def, &command, &args, &env, cwd.as_deref())
                    .await
            }
        }
    }

    async fn spawn_stdio(
        &self,
        name: &str,
        def: &SharedDefinition,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> bool {
        let command_line = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");

        // Shell-wrap so config commands can use PATH lookup and arguments
        // exactly as a user would type them.
        #[cfg(unix)]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&command_line);
            // Own process group: killing the group takes grandchildren too.
            cmd.process_group(0);
            cmd
        };
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&command_line);
            // Prevent a console window from appearing for child processes.
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
            cmd
        };

        cmd.envs(env);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("spawn failed: {e}");
                tracing::warn!(server = name, error = %e, "failed to spawn server");
                def.write().await.record_error(&reason);
                self.emit_status(name, false, Some(reason));
                return false;
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let reason = "failed to capture child stdio".to_string();
            def.write().await.record_error(&reason);
            let _ = child.kill().await;
            self.emit_status(name, false, Some(reason));
            return false;
        };
        let stderr = child.stderr.take();

        let conn = StdioConnection::new(name, stdin, stdout, stderr);

        // Grace period: a server that dies within ~500ms never started.
        tokio::time::sleep(SPAWN_GRACE).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                let tail = conn.stderr_tail();
                let reason = if tail.is_empty() {
                    format!("exited immediately with {status}")
                } else {
                    format!("exited immediately with {status} | stderr: {tail}")
                };
                tracing::warn!(server = name, %status, "server exited during spawn grace");
                def.write().await.record_error(&reason);
                self.emit_status(name, false, Some(reason));
                false
            }
            Err(e) => {
                let reason = format!("cannot inspect spawned process: {e}");
                def.write().await.record_error(&reason);
                let _ = child.kill().await;
                self.emit_status(name, false, Some(reason));
                false
            }
            Ok(None) => {
                let pid = child.id();
                self.children
                    .write()
                    .await
                    .insert(name.to_string(), Arc::new(TokioMutex::new(child)));
                self.connections
                    .write()
                    .await
                    .insert(name.to_string(), Connection::Stdio(Arc::new(conn)));
                {
                    let mut d = def.write().await;
                    d.state.is_running = true;
                    d.state.process_id = pid;
                    d.state.last_error = None;
                }
                tracing::info!(server = name, pid = ?pid, "server started");
                self.emit_status(name, true, None);
                true
            }
        }
    }

    /// Stop a server: tracked-handle kill → pid kill → kill-by-process-name.
    ///
    /// Internal state (connection, child handle, running flag, pid) is always
    /// cleared, whichever path succeeds.
    pub async fn stop_server(&self, name: &str) -> bool {
        let def = self.definition(name).await;

        let (transport, pid) = match &def {
            Some(def) => {
                let d = def.read().await;
                (Some(d.transport.clone()), d.state.process_id)
            }
            None => (None, None),
        };

        // Best-effort shutdown notification, then drop the connection.
        // Closing our end of stdin gives well-behaved servers an EOF to
        // exit on before the grace period runs out.
        if let Some(conn) = self.connections.write().await.remove(name) {
            if let Connection::Stdio(conn) = conn {
                let _ = conn.notify("shutdown").await;
                conn.close();
            }
        }

        let child = self.children.write().await.remove(name);
        // Nothing tracked and no recorded pid: an idempotent no-op stop.
        let mut stopped = child.is_none() && pid.is_none();

        if let Some(child) = child {
            let mut guard = child.lock().await;
            let exited = tokio::time::timeout(SHUTDOWN_GRACE, guard.wait()).await;
            match exited {
                Ok(_) => stopped = true,
                Err(_) => {
                    #[cfg(unix)]
                    if let Some(pid) = guard.id() {
                        kill_process_group(pid);
                    }
                    if guard.kill().await.is_ok() {
                        stopped = true;
                    }
                }
            }
        }

        if !stopped {
            if let Some(pid) = pid {
                stopped = kill_pid(pid);
            }
        }

        if !stopped {
            if let Some(proc_name) = transport.as_ref().and_then(|t| t.process_name()) {
                stopped = kill_by_name(&proc_name);
            }
        }

        if let Some(def) = &def {
            let mut d = def.write().await;
            let was_http = !d.transport.is_stdio();
            d.state.is_running = false;
            d.state.process_id = None;
            // HTTP servers have no process; clearing state is the whole stop.
            if was_http {
                stopped = true;
            }
        }

        tracing::info!(server = name, stopped, "server stopped");
        self.emit_status(name, false, None);
        stopped
    }

    /// Authoritative liveness check combining the tracked handle and pid
    /// existence. Self-heals the definition's `is_running`/`process_id` when
    /// they disagree with reality.
    pub async fn is_server_running(&self, name: &str) -> bool {
        let Some(def) = self.definition(name).await else {
            return false;
        };

        let (is_stdio, flagged_running, pid) = {
            let d = def.read().await;
            (
                d.transport.is_stdio(),
                d.state.is_running,
                d.state.process_id,
            )
        };

        if !is_stdio {
            // HTTP lifecycle is a no-op; trust the start/stop flag.
            return flagged_running;
        }

        let child = self.children.read().await.get(name).cloned();
        let alive = match child {
            Some(child) => {
                let mut guard = child.lock().await;
                matches!(guard.try_wait(), Ok(None))
            }
            None => pid.is_some_and(pid_exists),
        };

        if !alive {
            self.children.write().await.remove(name);
            if let Some(Connection::Stdio(conn)) =
                self.connections.write().await.remove(name)
            {
                conn.close();
            }
        }

        if alive != flagged_running || (!alive && pid.is_some()) {
            let mut d = def.write().await;
            d.state.is_running = alive;
            if !alive {
                d.state.process_id = None;
            }
            tracing::debug!(server = name, alive, "healed stale running state");
        }

        alive
    }

    /// Restart a stdio server with exponential backoff, up to three attempts
    /// across the server's lifetime.
    pub async fn restart_server(&self, name: &str) -> bool {
        let attempt = {
            let counts = self.restart_counts.read().await;
            counts.get(name).copied().unwrap_or(0)
        };
        if attempt >= MAX_RESTART_ATTEMPTS {
            tracing::warn!(server = name, attempts = attempt, "restart budget exhausted");
            if let Some(def) = self.definition(name).await {
                def.write().await.record_error(format!(
                    "gave up after {MAX_RESTART_ATTEMPTS} restart attempts"
                ));
            }
            return false;
        }

        // Backoff: 1s, 2s, 4s.
        tokio::time::sleep(RESTART_BASE_DELAY * 2u32.pow(attempt)).await;

        self.stop_server(name).await;
        let started = self.start_server(name).await;
        self.restart_counts
            .write()
            .await
            .insert(name.to_string(), attempt + 1);
        started
    }

    // ─── Request Routing ─────────────────────────────────────────────────

    /// Send a JSON-RPC request over the server's transport and wait for the
    /// id-matching response.
    ///
    /// `None` on timeout (default 10s), cancellation, or transport failure;
    /// the pending-correlation entry is removed in every case and the
    /// failure recorded on the definition.
    pub async fn send_request_and_read_response(
        &self,
        name: &str,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Option<JsonRpcResponse> {
        let timeout = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let conn = self.connections.read().await.get(name).cloned();
        let Some(conn) = conn else {
            tracing::debug!(server = name, method, "no transport for request");
            return None;
        };

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let cancel = self.shutdown.child_token();

        let response = match conn {
            Connection::Stdio(conn) => conn.send_request(&request, timeout, &cancel).await,
            Connection::Http(endpoint) => endpoint.send_request(&request, timeout, &cancel).await,
        };

        if response.is_none() {
            if let Some(def) = self.definition(name).await {
                def.write().await.record_error(format!(
                    "no response to '{method}' within {}ms",
                    timeout.as_millis()
                ));
            }
        }
        response
    }

    // ─── Batch Operations ────────────────────────────────────────────────

    /// Start every configured server concurrently; per-name success map.
    pub async fn start_all_servers(&self) -> HashMap<String, bool> {
        let names = self.server_names().await;
        let results = futures::future::join_all(
            names
                .iter()
                .map(|name| async { (name.clone(), self.start_server(name).await) }),
        )
        .await;
        results.into_iter().collect()
    }

    /// Stop every configured server concurrently; per-name success map.
    pub async fn stop_all_servers(&self) -> HashMap<String, bool> {
        let names = self.server_names().await;
        let results = futures::future::join_all(
            names
                .iter()
                .map(|name| async { (name.clone(), self.stop_server(name).await) }),
        )
        .await;
        results.into_iter().collect()
    }

    /// Cancel outstanding work and tear down all processes.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop_all_servers().await;
    }

    fn emit_status(&self, server: &str, is_running: bool, message: Option<String>) {
        self.events.emit(Notification::StatusChanged {
            server: server.to_string(),
            is_running,
            message,
        });
    }
}

/// Quote one argument for the shell wrapper. Plain tokens pass through;
/// anything else is single-quoted with embedded quotes escaped.
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

// ─── Process Helpers ─────────────────────────────────────────────────────────

fn pid_exists(pid: u32) -> bool {
    let mut sys = System::new_all();
    sys.refresh_all();
    sys.process(Pid::from_u32(pid)).is_some()
}

fn kill_pid(pid: u32) -> bool {
    let mut sys = System::new_all();
    sys.refresh_all();
    sys.process(Pid::from_u32(pid))
        .map(|p| p.kill())
        .unwrap_or(false)
}

fn kill_by_name(name: &str) -> bool {
    let mut sys = System::new_all();
    sys.refresh_all();
    let mut any = false;
    for process in sys.processes_by_name(OsStr::new(name)) {
        any |= process.kill();
    }
    any
}

/// Kill an entire process group (the child was made its own group leader).
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .status();
}

// ─── Tests ───────────────────────────────────────────────────────────────────
