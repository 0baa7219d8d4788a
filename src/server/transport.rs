//! JSON-RPC transport — stdio correlation and HTTP POST.
//!
//! Stdio servers speak line-delimited JSON over the child's stdin/stdout.
//! Requests are written in issue order but responses may arrive out of
//! order; correlation is strictly by JSON-RPC `id`, via a pending-request
//! map of `id → oneshot sender` drained by a per-server reader task.
//!
//! Partial output (a JSON object pretty-printed across several lines) is
//! buffered with a brace-balance heuristic until a complete object is
//! assembled. Non-JSON lines (server log noise) are skipped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::{JsonRpcRequest, JsonRpcResponse};

// ─── JSON Assembly ───────────────────────────────────────────────────────────

/// Assembles complete JSON objects from a stream of stdout lines.
///
/// Lines are accumulated only once an opening `{` has been seen; balance is
/// tracked with string/escape awareness so braces inside string values don't
/// confuse the count. Lines arriving while the buffer is empty that don't
/// start an object are treated as log noise and dropped.
#[derive(Debug, Default)]
pub struct JsonAssembler {
    buf: String,
    depth: i64,
    in_string: bool,
    escaped: bool,
}

impl JsonAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a complete JSON object once braces balance.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if self.buf.is_empty() && !trimmed.starts_with('{') {
            // Not the start of an object — log output, skip.
            return None;
        }

        for ch in trimmed.chars() {
            self.scan(ch);
        }
        self.buf.push_str(trimmed);

        if self.depth <= 0 {
            let complete = std::mem::take(&mut self.buf);
            self.reset_scan();
            // A negative depth means garbage; drop it rather than emit.
            if self.depth < 0 {
                self.depth = 0;
                return None;
            }
            Some(complete)
        } else {
            None
        }
    }

    fn scan(&mut self, ch: char) {
        if self.escaped {
            self.escaped = false;
            return;
        }
        match ch {
            '\\' if self.in_string => self.escaped = true,
            '"' => self.in_string = !self.in_string,
            '{' if !self.in_string => self.depth += 1,
            '}' if !self.in_string => self.depth -= 1,
            _ => {}
        }
    }

    fn reset_scan(&mut self) {
        self.in_string = false;
        self.escaped = false;
    }

    /// Whether a partial object is currently buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

// ─── Pending-Request Correlation ────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Lines of stderr retained for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

// ─── Stdio Connection ───────────────────────────────────────────────────────

/// A live stdio transport to a running server child.
///
/// Owns the child's stdin (behind an async mutex so concurrent requests
/// serialize their writes) and a background reader task that routes each
/// assembled response to the oneshot sender registered under its `id`.
pub struct StdioConnection {
    server: String,
    stdin: TokioMutex<ChildStdin>,
    pending: PendingMap,
    reader: JoinHandle<()>,
    stderr_drain: Option<JoinHandle<()>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl StdioConnection {
    /// Wire up a connection over a freshly spawned child's pipes.
    pub fn new(
        server: &str,
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: Option<ChildStderr>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));

        let reader = spawn_reader(server.to_string(), stdout, Arc::clone(&pending));
        let stderr_drain = stderr
            .map(|err| spawn_stderr_drain(server.to_string(), err, Arc::clone(&stderr_tail)));

        Self {
            server: server.to_string(),
            stdin: TokioMutex::new(stdin),
            pending,
            reader,
            stderr_drain,
            stderr_tail,
        }
    }

    /// Write a request line and wait for the id-matching response.
    ///
    /// Returns `None` on write failure, timeout, or cancellation; in every
    /// case the pending-correlation entry is removed (no leak).
    pub async fn send_request(
        &self,
        request: &JsonRpcRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        let line = match request.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(server = %self.server, error = %e, "failed to serialize request");
                return None;
            }
        };

        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.pending.lock() {
            map.insert(request.id, tx);
        } else {
            return None;
        }

        {
            let mut stdin = self.stdin.lock().await;
            let write = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                tracing::warn!(server = %self.server, error = %e, "failed to write to stdin");
                self.remove_pending(request.id);
                return None;
            }
        }

        tokio::select! {
            resp = rx => resp.ok(),
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    server = %self.server,
                    id = request.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                self.remove_pending(request.id);
                None
            }
            _ = cancel.cancelled() => {
                tracing::debug!(server = %self.server, id = request.id, "request cancelled");
                self.remove_pending(request.id);
                None
            }
        }
    }

    /// Send a JSON-RPC notification (no id, no response expected).
    pub async fn notify(&self, method: &str) -> bool {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        let mut line = notification.to_string();
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.is_ok() && stdin.flush().await.is_ok()
    }

    fn remove_pending(&self, id: u64) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&id);
        }
    }

    /// Number of requests awaiting responses.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// The last few stderr lines, newline-joined. Empty if quiet.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// Tear down the connection: stop background tasks and drop any pending
    /// senders so waiters resolve to `None`.
    pub fn close(&self) {
        self.reader.abort();
        if let Some(drain) = &self.stderr_drain {
            drain.abort();
        }
        if let Ok(mut map) = self.pending.lock() {
            map.clear();
        }
    }
}

impl Drop for StdioConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_reader(server: String, stdout: ChildStdout, pending: PendingMap) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut assembler = JsonAssembler::new();

        while let Ok(Some(line)) = lines.next_line().await {
            let Some(object) = assembler.push_line(&line) else {
                continue;
            };
            match serde_json::from_str::<JsonRpcResponse>(&object) {
                Ok(resp) => {
                    let sender = pending
                        .lock()
                        .ok()
                        .and_then(|mut map| map.remove(&resp.id));
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(resp);
                        }
                        None => {
                            tracing::trace!(
                                server = %server,
                                id = resp.id,
                                "response with no pending request (late or duplicate)"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        server = %server,
                        error = %e,
                        "assembled object is not a JSON-RPC response, skipping"
                    );
                }
            }
        }
        tracing::debug!(server = %server, "stdout closed, reader exiting");
    })
}

fn spawn_stderr_drain(
    server: String,
    stderr: ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, stderr = %line, "server stderr");
            if let Ok(mut tail) = tail.lock() {
                if tail.len() >= STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    })
}

// ─── HTTP Endpoint ──────────────────────────────────────────────────────────

/// JSON-RPC over HTTP POST. No process lifecycle; each request is its own
/// round-trip and correlation is trivial.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    server: String,
    url: String,
    client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(server: &str, url: &str, client: reqwest::Client) -> Self {
        Self {
            server: server.to_string(),
            url: url.to_string(),
            client,
        }
    }

    /// POST the request, returning the body as a JSON-RPC response.
    ///
    /// Returns `None` on transport error, non-success status, body parse
    /// failure, id mismatch, timeout, or cancellation.
    pub async fn send_request(
        &self,
        request: &JsonRpcRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        let send = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(request)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(server = %self.server, id = request.id, "http request cancelled");
                return None;
            }
            result = send => match result {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(server = %self.server, error = %e, "http request failed");
                    return None;
                }
            },
        };

        if !response.status().is_success() {
            tracing::warn!(
                server = %self.server,
                status = response.status().as_u16(),
                "http server returned non-success status"
            );
            return None;
        }

        match response.json::<JsonRpcResponse>().await {
            Ok(resp) if resp.id == request.id => Some(resp),
            Ok(resp) => {
                tracing::warn!(
                    server = %self.server,
                    expected = request.id,
                    got = resp.id,
                    "http response id mismatch"
                );
                None
            }
            Err(e) => {
                tracing::warn!(server = %self.server, error = %e, "malformed http response body");
                None
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ─── JsonAssembler ───────────────────────────────────────────────

    #[test]
    fn test_assembler_single_line_object() {
        let mut asm = JsonAssembler::new();
        let out = asm.push_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert_eq!(out.as_deref(), Some(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#));
        assert!(!asm.has_partial());
    }

    #[test]
    fn test_assembler_multi_line_object() {
        let mut asm = JsonAssembler::new();
        assert!(asm.push_line("{").is_none());
        assert!(asm.has_partial());
        assert!(asm.push_line(r#""id": 4,"#).is_none());
        let out = asm.push_line(r#""result": {"ok": true}}"#);
        assert!(out.is_some());
        let parsed: serde_json::Value = serde_json::from_str(&out.unwrap()).unwrap();
        assert_eq!(parsed["id"], 4);
    }

    #[test]
    fn test_assembler_skips_log_noise() {
        let mut asm = JsonAssembler::new();
        assert!(asm.push_line("INFO server listening on stdio").is_none());
        assert!(asm.push_line("").is_none());
        assert!(!asm.has_partial());
        // A real object still assembles afterwards
        assert!(asm.push_line(r#"{"id":1,"result":null}"#).is_some());
    }

    #[test]
    fn test_assembler_braces_inside_strings() {
        let mut asm = JsonAssembler::new();
        let line = r#"{"id":2,"result":{"text":"closing } and opening { inside"}}"#;
        let out = asm.push_line(line);
        assert_eq!(out.as_deref(), Some(line));
    }

    #[test]
    fn test_assembler_escaped_quote_inside_string() {
        let mut asm = JsonAssembler::new();
        let line = r#"{"id":3,"result":{"text":"a \" quote and a } brace"}}"#;
        assert!(asm.push_line(line).is_some());
    }

    #[test]
    fn test_assembler_noise_between_fragments_is_buffered_verbatim() {
        // Once an object has begun, subsequent lines are part of it.
        let mut asm = JsonAssembler::new();
        assert!(asm.push_line(r#"{"id": 9,"#).is_none());
        let out = asm.push_line(r#""result": 1}"#).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["id"], 9);
    }

    // ─── StdioConnection (real child processes) ──────────────────────

    async fn spawn_cat() -> (tokio::process::Child, StdioConnection) {
        let mut child = tokio::process::Command::new("cat")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .expect("spawn cat");
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take();
        let conn = StdioConnection::new("echo", stdin, stdout, stderr);
        (child, conn)
    }

    #[tokio::test]
    async fn test_stdio_correlates_echoed_response() {
        // `cat` echoes the request line back; the echoed object carries the
        // same `id`, so correlation resolves it as the response.
        let (mut child, conn) = spawn_cat().await;
        let cancel = CancellationToken::new();

        let req = JsonRpcRequest::new(1, "initialize", None);
        let resp = conn
            .send_request(&req, Duration::from_secs(5), &cancel)
            .await;

        let resp = resp.expect("echoed response should correlate");
        assert_eq!(resp.id, 1);
        assert_eq!(conn.pending_len(), 0);

        conn.close();
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn test_stdio_timeout_removes_pending_entry() {
        // `sleep` never writes to stdout — the request must time out and the
        // correlation entry must be gone afterwards.
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sleep");
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let conn = StdioConnection::new("silent", stdin, stdout, None);
        let cancel = CancellationToken::new();

        let req = JsonRpcRequest::new(42, "tools/list", None);
        let resp = conn
            .send_request(&req, Duration::from_millis(200), &cancel)
            .await;

        assert!(resp.is_none());
        assert_eq!(conn.pending_len(), 0);

        conn.close();
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn test_stdio_cancellation_removes_pending_entry() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sleep");
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let conn = StdioConnection::new("silent", stdin, stdout, None);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let req = JsonRpcRequest::new(7, "tools/list", None);
        let resp = conn
            .send_request(&req, Duration::from_secs(5), &cancel)
            .await;

        assert!(resp.is_none());
        assert_eq!(conn.pending_len(), 0);

        conn.close();
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn test_stdio_out_of_order_correlation() {
        // A scripted server that answers id 2 before id 1. Requests are
        // written in issue order; responses must still land correctly.
        let script = r#"read a; read b; \
            echo '{"jsonrpc":"2.0","id":2,"result":{"who":"second"}}'; \
            echo '{"jsonrpc":"2.0","id":1,"result":{"who":"first"}}'"#;
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let conn = Arc::new(StdioConnection::new("scripted", stdin, stdout, None));
        let cancel = CancellationToken::new();

        let c1 = Arc::clone(&conn);
        let t1 = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let req = JsonRpcRequest::new(1, "tools/call", None);
                c1.send_request(&req, Duration::from_secs(5), &cancel).await
            })
        };
        // Second request issued slightly later so the script reads both lines.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let c2 = Arc::clone(&conn);
        let t2 = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let req = JsonRpcRequest::new(2, "tools/call", None);
                c2.send_request(&req, Duration::from_secs(5), &cancel).await
            })
        };

        let r1 = t1.await.unwrap().expect("response for id 1");
        let r2 = t2.await.unwrap().expect("response for id 2");
        assert_eq!(r1.result.unwrap()["who"], "first");
        assert_eq!(r2.result.unwrap()["who"], "second");

        conn.close();
        let _ = child.kill().await;
    }
}
