//! Line-delimited JSON-RPC 2.0 server.
//!
//! Reads one request per line and writes one response per line. Logs go to
//! stderr so the output stream carries nothing but responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::cache::LookupCache;
use crate::errors::Result;
use crate::refkeeper::RefKeeper;

use super::methods::{handle_method, CallError};
use super::transport::{error_envelope, ok_envelope, ErrorCode, JsonRpcRequest, JsonRpcResponse};

/// Runtime statistics for the server.
pub struct ServerStats {
    started_at: Instant,
    total_requests: AtomicU64,
    method_calls: AtomicU64,
    failed_calls: AtomicU64,
    protocol_errors: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            method_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
        }
    }
}

/// The RPC server wrapping a [`RefKeeper`] store.
pub struct RpcServer {
    rk: RefKeeper,
    stats: ServerStats,
    method_counts: Mutex<HashMap<String, u64>>,
}

impl RpcServer {
    pub fn new(rk: RefKeeper) -> Self {
        Self {
            rk,
            stats: ServerStats::new(),
            method_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn refkeeper(&self) -> &RefKeeper {
        &self.rk
    }

    /// Serves stdin/stdout until stdin is closed.
    pub async fn run(&self) -> Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.serve(reader, writer).await
    }

    /// Serves requests from `reader` until end of input, writing responses
    /// to `writer`. Expired cache entries are purged periodically meanwhile.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let purge = spawn_cache_purge(
            Arc::clone(self.rk.cache()),
            Duration::from_secs(self.rk.config().cache_purge_interval_secs.max(1)),
        );
        info!(root = %self.rk.project_root().display(), "rpc server started");

        let mut lines = reader.lines();
        let outcome = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            };
            let Some(output) = self.handle_line(&line) else {
                continue;
            };
            if let Err(e) = writer.write_all(format!("{}\n", output).as_bytes()).await {
                break Err(e.into());
            }
            if let Err(e) = writer.flush().await {
                break Err(e.into());
            }
        };

        purge.abort();
        info!(
            requests = self.stats.total_requests.load(Ordering::Relaxed),
            "rpc server stopped"
        );
        outcome
    }

    /// Handles one raw input line. Returns the serialized response, or
    /// `None` for blank lines and notifications.
    pub fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(&request)?,
            Err(e) => {
                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                JsonRpcResponse::error(
                    Value::Null,
                    ErrorCode::ParseError,
                    format!("failed to parse JSON-RPC request: {}", e),
                )
            }
        };

        match serde_json::to_string(&response) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "failed to serialize response");
                None
            }
        }
    }

    /// Dispatches a parsed request. Returns `None` for notifications.
    pub fn handle_request(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let id = request.id.clone();

        if request.jsonrpc != "2.0" {
            self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
            return Some(JsonRpcResponse::error(
                id,
                ErrorCode::InvalidRequest,
                format!("unsupported jsonrpc version '{}'", request.jsonrpc),
            ));
        }

        let params = request.params.clone().unwrap_or_else(|| json!({}));
        self.stats.method_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut counts) = self.method_counts.lock() {
            *counts.entry(request.method.clone()).or_insert(0) += 1;
        }
        debug!(method = %request.method, "rpc call");

        let outcome = if request.method == "status" {
            self.status()
        } else {
            handle_method(&self.rk, &request.method, &params)
        };

        let response = match outcome {
            Ok(data) => JsonRpcResponse::success(id, ok_envelope(data)),
            Err(CallError::Domain(err)) => {
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                debug!(method = %request.method, error = %err, "call refused");
                JsonRpcResponse::success(id, error_envelope(&err))
            }
            Err(CallError::UnknownMethod(name)) => {
                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                JsonRpcResponse::error(id, ErrorCode::MethodNotFound, format!("method not found: {}", name))
            }
            Err(CallError::InvalidParams(message)) => {
                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                JsonRpcResponse::error(id, ErrorCode::InvalidParams, message)
            }
        };

        if request.is_notification() {
            return None;
        }
        Some(response)
    }

    fn status(&self) -> std::result::Result<Value, CallError> {
        let stats = self.rk.get_stats()?;
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "store": stats,
            "cache_entries": self.rk.cache().len(),
            "server": self.server_stats_json(),
        }))
    }

    /// Returns the current server runtime statistics as a JSON value.
    pub fn server_stats_json(&self) -> Value {
        let method_counts: Value = self
            .method_counts
            .lock()
            .map(|counts| json!(*counts))
            .unwrap_or(json!({}));

        json!({
            "uptime_secs": self.stats.started_at.elapsed().as_secs(),
            "total_requests": self.stats.total_requests.load(Ordering::Relaxed),
            "method_calls": self.stats.method_calls.load(Ordering::Relaxed),
            "failed_calls": self.stats.failed_calls.load(Ordering::Relaxed),
            "protocol_errors": self.stats.protocol_errors.load(Ordering::Relaxed),
            "method_counts": method_counts,
        })
    }
}

/// Purges expired cache entries every `every` until aborted.
fn spawn_cache_purge(cache: Arc<LookupCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, "purged expired cache entries");
            }
        }
    })
}
