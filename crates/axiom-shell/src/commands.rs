//! JSON-lines commands
//!
//! One request per line: `{"id": .., "method": "..", "params": {..}}`. Every
//! request gets exactly one response line carrying the same id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use axiom_core::{OrchestratorError, TabEvent};
use axiom_engine::TabOptions;

use crate::state::ShellState;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct CommandResult {
    pub id: Value,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(id: Value, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(id: Value, error: String) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// A fan-out event as written to stdout.
#[derive(Debug, Serialize)]
pub struct EventLine<'a> {
    pub event: &'a TabEvent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabParams {
    tab_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    tab_id: String,
    backend: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchParams {
    tab_id: String,
    target: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateParams {
    tab_id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptParams {
    tab_id: String,
    code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearParams {
    #[serde(default)]
    tab_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendParams {
    backend: String,
}

#[derive(Error, Debug)]
enum CommandError {
    #[error("Invalid params: {0}")]
    Params(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Cannot encode result: {0}")]
    Encode(String),
}

fn params<T: DeserializeOwned>(raw: Value) -> Result<T, CommandError> {
    let raw = if raw.is_null() {
        Value::Object(Default::default())
    } else {
        raw
    };
    serde_json::from_value(raw).map_err(|e| CommandError::Params(e.to_string()))
}

fn encode<T: Serialize>(value: T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Encode(e.to_string()))
}

/// True when the request asked the shell to stop.
pub fn is_shutdown(request: &Request) -> bool {
    request.method == "shutdown"
}

pub async fn dispatch(state: &ShellState, request: Request) -> CommandResult {
    let id = request.id.clone();
    let method = request.method.clone();

    match run(state, request).await {
        Ok(data) => CommandResult::ok(id, data),
        Err(e) => {
            match &e {
                CommandError::Orchestrator(inner) if !inner.is_caller_error() => {
                    tracing::warn!(method = %method, error = %inner, "Command failed");
                }
                _ => tracing::debug!(method = %method, error = %e, "Command rejected"),
            }
            CommandResult::err(id, e.to_string())
        }
    }
}

async fn run(state: &ShellState, request: Request) -> Result<Value, CommandError> {
    let o = state.orchestrator();

    match request.method.as_str() {
        "list_backends" => encode(o.list_backends()?),
        "list_bindings" => encode(o.list_bindings()?),
        "get_binding" => {
            let p: TabParams = params(request.params)?;
            encode(o.get_binding(&p.tab_id)?)
        }
        "capabilities" => {
            let p: BackendParams = params(request.params)?;
            encode(o.capabilities(&p.backend)?)
        }
        "create_tab" => {
            let p: CreateParams = params(request.params)?;
            let options = TabOptions {
                initial_url: p.url,
                user_agent: p.user_agent,
            };
            let info = o.create_tab(&p.tab_id, &p.backend, options).await?;
            state.record_created(&info);
            encode(info)
        }
        "close_tab" => {
            let p: TabParams = params(request.params)?;
            o.close_tab(&p.tab_id).await?;
            state.mirror(&p.tab_id, |m| m.record_closed(&p.tab_id));
            Ok(Value::Null)
        }
        "show_tab" => {
            let p: TabParams = params(request.params)?;
            o.show_tab(&p.tab_id).await?;
            state.mirror(&p.tab_id, |m| m.record_shown(&p.tab_id));
            Ok(Value::Null)
        }
        "hide_tab" => {
            let p: TabParams = params(request.params)?;
            o.hide_tab(&p.tab_id).await?;
            state.mirror(&p.tab_id, |m| m.record_hidden(&p.tab_id));
            Ok(Value::Null)
        }
        "switch_engine" => {
            let p: SwitchParams = params(request.params)?;
            let info = o.switch_engine(&p.tab_id, &p.target).await?;
            state.mirror(&p.tab_id, |m| m.record_switched(&info));
            encode(info)
        }
        "navigate" => {
            let p: NavigateParams = params(request.params)?;
            encode(o.navigate(&p.tab_id, &p.url).await?)
        }
        "go_back" => {
            let p: TabParams = params(request.params)?;
            encode(o.go_back(&p.tab_id).await?)
        }
        "go_forward" => {
            let p: TabParams = params(request.params)?;
            encode(o.go_forward(&p.tab_id).await?)
        }
        "reload" => {
            let p: TabParams = params(request.params)?;
            encode(o.reload(&p.tab_id).await?)
        }
        "stop" => {
            let p: TabParams = params(request.params)?;
            o.stop(&p.tab_id).await?;
            Ok(Value::Null)
        }
        "execute_script" => {
            let p: ScriptParams = params(request.params)?;
            Ok(o.execute_script(&p.tab_id, &p.code).await?)
        }
        "page_state" => {
            let p: TabParams = params(request.params)?;
            let page = o.page_state(&p.tab_id)?;
            let loading = o.is_loading(&p.tab_id).unwrap_or(false);
            let mut data = encode(page)?;
            if let Value::Object(map) = &mut data {
                map.insert("loading".to_string(), Value::Bool(loading));
            }
            Ok(data)
        }
        "clear_cache" => {
            let p: ClearParams = params(request.params)?;
            o.clear_cache(p.tab_id.as_deref()).await?;
            Ok(Value::Null)
        }
        "clear_cookies" => {
            let p: ClearParams = params(request.params)?;
            o.clear_cookies(p.tab_id.as_deref()).await?;
            Ok(Value::Null)
        }
        "shutdown" => {
            o.shutdown().await?;
            Ok(Value::Null)
        }
        other => Err(CommandError::UnknownMethod(other.to_string())),
    }
}
