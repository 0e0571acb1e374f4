//! Plugin host: a "sub-process bridge" in place of dynamically
//! synthesizing plugin classes at load time.
//!
//! Parser, release, mapping, and parallelizer functions named in a
//! manifest (`"module:function"`) are resolved by asking the plugin's own
//! packaged entrypoint script to execute them, rather than compiling
//! templated source at load time.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to spawn plugin host process")]
    Spawn(#[source] std::io::Error),
    #[error("plugin host process exited with {0}")]
    ExitStatus(std::process::ExitStatus),
    #[error("plugin host produced no output")]
    NoOutput,
    #[error("malformed response from plugin host")]
    Malformed(#[source] serde_json::Error),
    #[error("plugin function {0:?} raised an error: {1}")]
    Remote(String, String),
}

/// A resolver of manifest-declared functions (`"module:function"`) by
/// name. `call` invokes the named function with JSON-encodable arguments
/// and returns its JSON-encodable result.
#[async_trait]
pub trait PluginHost: Send + Sync {
    async fn call(&self, function: &str, args: Value) -> Result<Value, HostError>;
}

/// One request/response pair of the stdio protocol: a single JSON object
/// per line in, a single JSON object per line out.
#[derive(serde::Serialize)]
struct Request<'a> {
    function: &'a str,
    args: Value,
}

#[derive(serde::Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Bridges to a plugin's packaged entrypoint script: `python3
/// <entrypoint> --call` (or whatever interpreter the plugin's manifest
/// implies), one process per call, function name and arguments passed as
/// a JSON line on stdin, a JSON line of `{result}` or `{error}` read back
/// from stdout.
pub struct StdioPluginHost {
    pub interpreter: PathBuf,
    pub entrypoint: PathBuf,
    pub working_dir: PathBuf,
}

impl StdioPluginHost {
    pub fn new(interpreter: impl Into<PathBuf>, entrypoint: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            entrypoint: entrypoint.into(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl PluginHost for StdioPluginHost {
    async fn call(&self, function: &str, args: Value) -> Result<Value, HostError> {
        let mut child = Command::new(&self.interpreter)
            .arg(&self.entrypoint)
            .arg("--call")
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(HostError::Spawn)?;

        let request = Request { function, args };
        let line = serde_json::to_string(&request).map_err(HostError::Malformed)?;
        {
            let stdin = child.stdin.as_mut().expect("piped stdin");
            stdin
                .write_all(format!("{line}\n").as_bytes())
                .await
                .map_err(HostError::Spawn)?;
        }

        let stdout = child.stdout.take().expect("piped stdout");
        let mut reader = BufReader::new(stdout);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .await
            .map_err(HostError::Spawn)?;

        let status = child.wait().await.map_err(HostError::Spawn)?;
        if !status.success() {
            return Err(HostError::ExitStatus(status));
        }
        if response_line.trim().is_empty() {
            return Err(HostError::NoOutput);
        }

        let response: Response =
            serde_json::from_str(response_line.trim()).map_err(HostError::Malformed)?;
        match (response.result, response.error) {
            (_, Some(err)) => Err(HostError::Remote(function.to_string(), err)),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// A host used in tests and for plugins whose functions never get
/// invoked (e.g. a dry validation run).
pub struct NullPluginHost;

#[async_trait]
impl PluginHost for NullPluginHost {
    async fn call(&self, function: &str, _args: Value) -> Result<Value, HostError> {
        Err(HostError::Remote(
            function.to_string(),
            "no plugin host configured".to_string(),
        ))
    }
}
