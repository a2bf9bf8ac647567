//! Inspector wire format: message classification and value conversion.
//!
//! Requests are `{"id", "method", "params"}`; responses echo `id` with either
//! `result` or `error`; events carry only `method` and `params`. Lines and
//! columns are 0-based on the wire and converted here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::driver::pending::Reply;
use crate::driver::DriverEvent;
use crate::models::stack::{PauseReason, StackFrame, Variable};
use crate::{AppError, Result};

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to the request numbered `id`.
    Response {
        /// Request identifier being answered.
        id: u64,
        /// `result` on success, the error message otherwise.
        reply: Reply,
    },
    /// Notification the driver acts on.
    Event(DriverEvent),
    /// A pending breakpoint bound to a script that loaded after it was set.
    BreakpointResolved(String),
    /// Anything else.
    Ignored,
}

/// Script id to URL table, fed by `Debugger.scriptParsed`.
///
/// Call frames may omit their `url`; the table fills it in.
#[derive(Debug, Default)]
pub struct ScriptTable {
    urls: HashMap<String, String>,
}

impl ScriptTable {
    /// URL recorded for `script_id`.
    #[must_use]
    pub fn url(&self, script_id: &str) -> Option<&str> {
        self.urls.get(script_id).map(String::as_str)
    }
}

/// Serialise a request.
#[must_use]
pub fn request(id: u64, method: &str, params: &Value) -> String {
    json!({ "id": id, "method": method, "params": params }).to_string()
}

/// Parse one text frame.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the frame is not a JSON object.
pub fn parse_message(text: &str, scripts: &mut ScriptTable) -> Result<Inbound> {
    let msg: Value = serde_json::from_str(text)?;
    if !msg.is_object() {
        return Err(AppError::Protocol("inspector message is not an object".into()));
    }

    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
        let reply = match msg.get("error") {
            Some(err) => Err(err
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| err.to_string(), str::to_owned)),
            None => Ok(msg.get("result").cloned().unwrap_or_else(|| json!({}))),
        };
        return Ok(Inbound::Response { id, reply });
    }

    let method = msg.get("method").and_then(Value::as_str).unwrap_or("");
    let params = msg.get("params").cloned().unwrap_or(Value::Null);
    Ok(parse_event(method, params, scripts))
}

fn parse_event(method: &str, params: Value, scripts: &mut ScriptTable) -> Inbound {
    match method {
        "Debugger.paused" => {
            let hit = params
                .get("hitBreakpoints")
                .and_then(Value::as_array)
                .is_some_and(|hits| !hits.is_empty());
            let reason = pause_reason(
                params.get("reason").and_then(Value::as_str).unwrap_or("other"),
                hit,
            );
            let mut call_frames = match params.get("callFrames") {
                Some(Value::Array(frames)) => frames.clone(),
                _ => Vec::new(),
            };
            for frame in &mut call_frames {
                fill_frame_url(frame, scripts);
            }
            Inbound::Event(DriverEvent::Paused {
                reason,
                thread_id: None,
                call_frames,
            })
        }
        "Debugger.breakpointResolved" => params
            .get("breakpointId")
            .and_then(Value::as_str)
            .map_or(Inbound::Ignored, |id| Inbound::BreakpointResolved(id.to_owned())),
        "Debugger.scriptParsed" => {
            let id = params.get("scriptId").and_then(Value::as_str);
            let url = params.get("url").and_then(Value::as_str);
            if let (Some(id), Some(url)) = (id, url) {
                if !url.is_empty() {
                    scripts.urls.insert(id.to_owned(), url.to_owned());
                }
            }
            Inbound::Ignored
        }
        "Runtime.consoleAPICalled" => {
            let text = params
                .get("args")
                .and_then(Value::as_array)
                .map(|args| {
                    args.iter()
                        .map(console_arg_text)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            Inbound::Event(DriverEvent::Output(text))
        }
        "Runtime.exceptionThrown" => {
            let details = params.get("exceptionDetails").unwrap_or(&Value::Null);
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("Uncaught exception");
            Inbound::Event(DriverEvent::Output(text.to_owned()))
        }
        "Inspector.detached" => {
            let reason = params
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("inspector detached");
            Inbound::Event(DriverEvent::Terminated(reason.to_owned()))
        }
        "Runtime.executionContextDestroyed" => {
            Inbound::Event(DriverEvent::Terminated("execution context destroyed".into()))
        }
        _ => Inbound::Ignored,
    }
}

/// Classify a `Debugger.paused` reason.
#[must_use]
pub fn pause_reason(reason: &str, hit_breakpoints: bool) -> PauseReason {
    if hit_breakpoints {
        return PauseReason::Breakpoint;
    }
    match reason {
        "Break on start" => PauseReason::Entry,
        "exception" | "promiseRejection" => PauseReason::Exception,
        "other" | "step" => PauseReason::Step,
        other => PauseReason::from_wire(other),
    }
}

/// Convert a public 1-based line to the wire's 0-based numbering.
///
/// # Errors
///
/// Returns [`AppError::InvalidArgument`] for line 0.
pub fn to_wire_line(line: u32) -> Result<u32> {
    line.checked_sub(1)
        .ok_or_else(|| AppError::InvalidArgument("line numbers start at 1".into()))
}

/// Convert a 0-based wire line to the public 1-based numbering.
#[must_use]
pub fn from_wire_line(line: u64) -> u32 {
    u32::try_from(line).map_or(u32::MAX, |l| l.saturating_add(1))
}

/// `file://` URL for an absolute path, as the inspector reports script URLs.
#[must_use]
pub fn file_url(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        format!("file://{text}")
    } else {
        format!("file:///{text}")
    }
}

/// Path for a `file://` URL; other schemes yield `None`.
#[must_use]
pub fn url_to_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

/// Convert raw call frames into stack frames, innermost first.
#[must_use]
pub fn stack_frames(call_frames: &[Value]) -> Vec<StackFrame> {
    call_frames
        .iter()
        .enumerate()
        .map(|(index, frame)| {
            let name = frame
                .get("functionName")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .unwrap_or("(anonymous)")
                .to_owned();
            let url = frame.get("url").and_then(Value::as_str).unwrap_or("");
            StackFrame {
                index,
                name,
                file: url_to_path(url).or_else(|| (!url.is_empty()).then(|| PathBuf::from(url))),
                line: from_wire_line(
                    frame
                        .pointer("/location/lineNumber")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                ),
            }
        })
        .collect()
}

/// Display value of a `RemoteObject`.
#[must_use]
pub fn display_value(obj: &Value) -> String {
    if obj.get("subtype").and_then(Value::as_str) == Some("null") {
        return "null".into();
    }
    if let Some(value) = obj.get("value") {
        return match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    if let Some(text) = obj
        .get("unserializableValue")
        .or_else(|| obj.get("description"))
        .and_then(Value::as_str)
    {
        return text.to_owned();
    }
    obj.get("type")
        .and_then(Value::as_str)
        .unwrap_or("undefined")
        .to_owned()
}

/// Type tag of a `RemoteObject`: subtype when present, else type.
#[must_use]
pub fn type_tag(obj: &Value) -> String {
    obj.get("subtype")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Convert one `Runtime.getProperties` entry, interning child object ids.
///
/// Accessor-only properties without a value are skipped.
pub fn property_variable(prop: &Value, handles: &mut ObjectHandles) -> Option<Variable> {
    let name = prop.get("name").and_then(Value::as_str)?;
    let value = prop.get("value")?;
    Some(Variable {
        name: name.to_owned(),
        type_name: type_tag(value),
        value: display_value(value),
        reference: value
            .get("objectId")
            .and_then(Value::as_str)
            .map(|id| handles.intern(id)),
    })
}

fn console_arg_text(arg: &Value) -> String {
    match arg.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => display_value(arg),
    }
}

fn fill_frame_url(frame: &mut Value, scripts: &ScriptTable) {
    let missing = frame
        .get("url")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty);
    if !missing {
        return;
    }
    let url = frame
        .pointer("/location/scriptId")
        .and_then(Value::as_str)
        .and_then(|id| scripts.url(id))
        .map(str::to_owned);
    if let (Some(url), Some(obj)) = (url, frame.as_object_mut()) {
        obj.insert("url".into(), Value::String(url));
    }
}

/// Numeric handles for inspector object ids, valid until the next resume.
#[derive(Debug, Default)]
pub struct ObjectHandles {
    ids: Vec<String>,
}

impl ObjectHandles {
    /// Handle for `object_id`; handles start at 1.
    pub fn intern(&mut self, object_id: &str) -> i64 {
        let pos = self
            .ids
            .iter()
            .position(|id| id == object_id)
            .unwrap_or_else(|| {
                self.ids.push(object_id.to_owned());
                self.ids.len() - 1
            });
        i64::try_from(pos + 1).unwrap_or(i64::MAX)
    }

    /// Object id behind `handle`.
    #[must_use]
    pub fn resolve(&self, handle: i64) -> Option<&str> {
        let index = usize::try_from(handle.checked_sub(1)?).ok()?;
        self.ids.get(index).map(String::as_str)
    }

    /// Invalidate every handle.
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
