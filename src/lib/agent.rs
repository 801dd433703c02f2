//! Line-delimited JSON-RPC server over stdio for editor agents.
//!
//! One request per line on stdin, one response per line on stdout. Only the
//! `tools/call` method with the `get_status` tool is exposed; everything an
//! agent needs beyond that goes through the regular CLI. Malformed input
//! lines are skipped rather than killing the loop.

use std::io::{BufRead, Write};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use serde::Deserialize;
use serde_json::{Value, json};

use crate::metadata::MetadataStore;
use crate::sync::EnvSync;

pub const SERVER_NAME: &str = "coenv-agent";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct Request {
  #[serde(default)]
  id: Option<Value>,
  method: String,
  #[serde(default)]
  params: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
  name: String,
  #[serde(default)]
  arguments: Value,
}

/// Runs the serve loop until stdin closes. `default_root` is used when a call
/// carries no `project_root` argument.
pub fn serve(
  input: impl BufRead,
  mut output: impl Write,
  default_root: &Path,
) -> std::io::Result<()> {
  writeln!(
    std::io::stderr(),
    "{} ready (protocol {})",
    SERVER_NAME,
    PROTOCOL_VERSION
  )?;

  for line in input.lines() {
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }

    let request: Request = match serde_json::from_str(&line) {
      Ok(request) => request,
      Err(_err) => {
        #[cfg(feature = "tracing")]
        warn!(error = %_err, "skipping malformed request line");
        continue;
      }
    };

    #[cfg(feature = "tracing")]
    debug!(method = %request.method, "handling request");

    let response = handle(&request, default_root);
    serde_json::to_writer(&mut output, &response)?;
    writeln!(output)?;
    output.flush()?;
  }

  Ok(())
}

fn handle(request: &Request, default_root: &Path) -> Value {
  let id = request.id.clone().unwrap_or(Value::Null);
  match request.method.as_str() {
    "initialize" => reply(
      id,
      json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
        "capabilities": { "tools": {} },
      }),
    ),
    "tools/list" => reply(
      id,
      json!({
        "tools": [{
          "name": "get_status",
          "description": "Environment key status for a project: every key, its source file, sync state, health, and owner.",
          "inputSchema": {
            "type": "object",
            "properties": {
              "project_root": { "type": "string", "description": "Project directory; defaults to the server's working root." }
            }
          }
        }]
      }),
    ),
    "tools/call" => match serde_json::from_value::<ToolCall>(request.params.clone()) {
      Ok(call) if call.name == "get_status" => {
        let root = call
          .arguments
          .get("project_root")
          .and_then(Value::as_str)
          .map(Path::new)
          .unwrap_or(default_root);
        match get_status(root) {
          Ok(report) => reply(
            id,
            json!({ "content": [{ "type": "text", "text": report }] }),
          ),
          Err(message) => error_reply(id, -32000, &message),
        }
      }
      Ok(call) => error_reply(id, -32602, &format!("unknown tool '{}'", call.name)),
      Err(err) => error_reply(id, -32602, &format!("invalid params: {err}")),
    },
    method => error_reply(id, -32601, &format!("method '{method}' not found")),
  }
}

fn get_status(project_root: &Path) -> Result<String, String> {
  let metadata = MetadataStore::open(project_root).map_err(|err| err.to_string())?;
  let report =
    EnvSync::status_report(project_root, &metadata).map_err(|err| err.to_string())?;
  serde_json::to_string_pretty(&report).map_err(|err| err.to_string())
}

fn reply(id: Value, result: Value) -> Value {
  json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_reply(id: Value, code: i64, message: &str) -> Value {
  json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}
