//! Persistent session driven across separate invocations.
//!
//! Each CLI invocation is short-lived. `start` spawns a daemon that owns
//! the live [`DebugSession`](crate::orchestrator::debug_session::DebugSession)
//! and writes a [`SessionRecord`] naming its pid and port; every later
//! command loads that record and forwards one request over the socket.
//!
//! | Situation                        | `start`            | other commands      | `stop`            |
//! |----------------------------------|--------------------|---------------------|-------------------|
//! | no record                        | spawn daemon       | state error         | no-op             |
//! | record, daemon alive             | state error        | forward             | forward, delete   |
//! | record, daemon dead              | drop record, spawn | daemon unavailable  | delete record     |

use std::path::Path;

use tracing::{info, warn};

use crate::config::DebugConfig;
use crate::daemon::client::DaemonClient;
use crate::daemon::protocol::DaemonRequest;
use crate::daemon::spawner::DaemonLauncher;
use crate::models::record::SessionRecord;
use crate::models::stack::StepMode;
use crate::orchestrator::debug_session::absolutize;
use crate::persistence::session_store::SessionStore;
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

/// Caller-side handle on the daemon-hosted session.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    config: DebugConfig,
    store: SessionStore,
    launcher: DaemonLauncher,
}

impl RemoteSession {
    /// Handle backed by `config.session_file`.
    #[must_use]
    pub fn new(config: DebugConfig, launcher: DaemonLauncher) -> Self {
        let store = SessionStore::new(config.session_file.clone());
        Self {
            config,
            store,
            launcher,
        }
    }

    /// The record store this handle reads and writes.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Spawn a daemon running `program` and record it.
    ///
    /// # Errors
    ///
    /// - `AppError::State` if a live daemon is already recorded.
    /// - `AppError::Start` if the program is missing or the daemon fails
    ///   to come up.
    /// - `AppError::Io` if the record cannot be written.
    pub async fn start(&self, program: &Path, runtime: RuntimeKind) -> Result<String> {
        if let Some(record) = self.store.load()? {
            let client = self.client(&record);
            if client.is_alive() {
                return Err(AppError::State(format!(
                    "a session for {} is already running (daemon pid {}); stop it first",
                    record.program, record.daemon_pid
                )));
            }
            warn!(
                pid = record.daemon_pid,
                "recorded daemon is gone, removing stale session record"
            );
            self.store.delete()?;
        }

        let program = absolutize(program);
        if !program.is_file() {
            return Err(AppError::Start(format!(
                "program not found: {}",
                program.display()
            )));
        }

        let spawned = self.launcher.spawn(&self.config, &program, runtime).await?;
        let record = SessionRecord {
            runtime_kind: runtime,
            program: program.display().to_string(),
            breakpoints: std::collections::BTreeMap::new(),
            daemon_port: spawned.port,
            daemon_pid: spawned.pid,
            started_at: chrono::Utc::now(),
        };

        if let Err(err) = self.store.save(&record) {
            warn!(%err, "failed to record session, stopping daemon");
            if let Err(stop_err) = self.client(&record).send(&DaemonRequest::Stop).await {
                warn!(%stop_err, "failed to stop unrecorded daemon");
            }
            return Err(err);
        }

        info!(pid = spawned.pid, port = spawned.port, "session recorded");
        Ok(spawned.message)
    }

    /// Register a breakpoint and remember it in the record.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn add_breakpoint(&self, file: &Path, line: u32) -> Result<String> {
        let file = absolutize(file).display().to_string();
        let (mut record, text) = self
            .send(DaemonRequest::Breakpoint {
                file: file.clone(),
                line,
            })
            .await?;
        record.add_breakpoint(&file, line);
        self.store.save(&record)?;
        Ok(text)
    }

    /// Resume the debuggee.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn resume(&self) -> Result<String> {
        self.forward(DaemonRequest::Continue).await
    }

    /// Execute one step.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn step(&self, mode: StepMode) -> Result<String> {
        self.forward(DaemonRequest::Step { mode }).await
    }

    /// Evaluate an expression in a paused frame.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn evaluate(&self, expression: &str, frame: Option<usize>) -> Result<String> {
        self.forward(DaemonRequest::Evaluate {
            expression: expression.to_owned(),
            frame,
        })
        .await
    }

    /// Call stack.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn stack(&self) -> Result<String> {
        self.forward(DaemonRequest::Stack).await
    }

    /// Locals of the innermost frame.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn variables(&self) -> Result<String> {
        self.forward(DaemonRequest::Variables).await
    }

    /// Children of a compound variable.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn expand(&self, reference: i64) -> Result<String> {
        self.forward(DaemonRequest::Expand { reference }).await
    }

    /// Session summary.
    ///
    /// # Errors
    ///
    /// Propagates record, transport and session errors.
    pub async fn status(&self) -> Result<String> {
        self.forward(DaemonRequest::Status).await
    }

    /// Stop the daemon and forget the session.
    ///
    /// Succeeds when there is nothing to stop. The record is removed only
    /// after the daemon has answered, unless the daemon is already gone.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if the daemon does not answer in time; the
    ///   record is kept so `stop` can be retried.
    /// - Any error the daemon reported while tearing down.
    pub async fn stop(&self) -> Result<String> {
        let Some(record) = self.store.load()? else {
            return Ok("No active session.".into());
        };

        let client = self.client(&record);
        if !client.is_alive() {
            warn!(pid = record.daemon_pid, "daemon already gone");
            self.store.delete()?;
            return Ok("Daemon was not running; removed stale session record.".into());
        }

        match client.send(&DaemonRequest::Stop).await {
            Ok(text) => {
                self.store.delete()?;
                Ok(text)
            }
            Err(AppError::DaemonUnavailable(msg)) => {
                warn!(%msg, "daemon unreachable during stop");
                self.store.delete()?;
                Ok("Daemon was not reachable; removed stale session record.".into())
            }
            Err(err @ AppError::Protocol(_)) => Err(err),
            Err(err) => {
                self.store.delete()?;
                Err(err)
            }
        }
    }

    async fn forward(&self, request: DaemonRequest) -> Result<String> {
        self.send(request).await.map(|(_, text)| text)
    }

    async fn send(&self, request: DaemonRequest) -> Result<(SessionRecord, String)> {
        let record = self.store.load()?.ok_or_else(|| {
            AppError::State("no active session; run `start` first".into())
        })?;
        let text = self.client(&record).send(&request).await?;
        Ok((record, text))
    }

    fn client(&self, record: &SessionRecord) -> DaemonClient {
        DaemonClient::new(record, self.config.timeouts.daemon_command())
    }
}
