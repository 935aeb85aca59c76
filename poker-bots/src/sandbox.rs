//! Sandboxed, timeout-bounded bot decision RPC, per spec.md §4.3.
//!
//! Grounded on `original_source/backend/app/bots/{runtime,sandbox}.py`:
//! the timeout/state-size/response-normalization contract and the
//! subprocess resource-limit and environment-whitelist steps are carried
//! over directly. Per Design Notes §9 ("native task primitive"), timeout
//! enforcement and the bounded decision pool use `std::thread` + `mpsc`
//! rather than a thread-pool crate.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MAX_STATE_BYTES: usize = 64 * 1024;
const SANDBOX_ENV_WHITELIST: &[&str] =
    &["PATH", "LANG", "LC_ALL", "LC_CTYPE", "TZ", "PYTHONPATH"];

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub timeout: Duration,
    pub max_state_bytes: usize,
    pub memory_limit_bytes: u64,
    pub cpu_seconds: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            max_state_bytes: MAX_STATE_BYTES,
            memory_limit_bytes: 256 * 1024 * 1024,
            cpu_seconds: 3,
        }
    }
}

/// The engine-visible result of a `Decide` call. `error` is populated for
/// every `BotRuntimeError` kind in spec.md §7; it is never surfaced to a
/// caller outside this crate, only fed back into the engine's action
/// normalization as a safe fallback (fold, or check when free).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    pub amount: i64,
    pub error: Option<String>,
}

impl Decision {
    fn fallback(kind: &str) -> Self {
        Self {
            action: "fold".to_string(),
            amount: 0,
            error: Some(kind.to_string()),
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum SandboxError {
    #[display(fmt = "bot could not be loaded: {}", _0)]
    LoadError(String),
}

/// A loaded, invocable bot. May be in-process (trusted) or out-of-process
/// (subprocess, container). The hand state machine is polymorphic over this
/// capability only, per Design Notes §9.
pub trait BotHandle: Send + Sync {
    /// `state_json` is the already-serialized decision payload. Never
    /// invokes the bot at all if it's oversize or unserializable — those
    /// are caller-side checks performed by `decide_checked` below.
    fn invoke(&self, state_json: &str) -> Result<Decision, String>;
}

/// Wraps any `BotHandle` with the size-bound and timeout contract common to
/// every backend, per spec.md §4.3. Call this, not `invoke` directly.
pub fn decide_checked(
    handle: &dyn BotHandle,
    state_json: &str,
    cfg: &SandboxConfig,
    pool: &DecisionPool,
) -> Decision {
    if state_json.len() > cfg.max_state_bytes {
        return Decision::fallback("state_too_large");
    }
    pool.run_with_timeout(cfg.timeout, {
        let state_json = state_json.to_string();
        move || match handle.invoke(&state_json) {
            Ok(d) => d,
            Err(msg) => Decision {
                action: "fold".to_string(),
                amount: 0,
                error: Some(format!("error:{msg}")),
            },
        }
    })
}

/// A fixture bot for trusted, in-process play (tests, reference bots shipped
/// with `poker-bin`) — the Rust stand-in for the original's in-process
/// `BotRunner` path, since this crate has no Python interpreter to embed.
pub struct FnBotHandle<F>(pub F)
where
    F: Fn(&str) -> Result<Decision, String> + Send + Sync;

impl<F> BotHandle for FnBotHandle<F>
where
    F: Fn(&str) -> Result<Decision, String> + Send + Sync,
{
    fn invoke(&self, state_json: &str) -> Result<Decision, String> {
        self.0(state_json)
    }
}

/// Out-of-process subprocess sandbox: writes the state to the child's
/// stdin, reads one JSON object from stdout, enforces address-space and
/// CPU-time resource limits on Unix.
pub struct SubprocessHandle {
    pub runtime_helper: String,
    pub artifact_dir: std::path::PathBuf,
    pub cfg: SandboxConfig,
}

impl BotHandle for SubprocessHandle {
    fn invoke(&self, state_json: &str) -> Result<Decision, String> {
        let mut cmd = Command::new("python3");
        cmd.arg(&self.runtime_helper)
            .current_dir(&self.artifact_dir)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for key in SANDBOX_ENV_WHITELIST {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env("PYTHONNOUSERSITE", "1");

        apply_resource_limits(&mut cmd, &self.cfg);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("runtime_launch_failed:{e}"))?;
        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| "runtime_launch_failed:no stdin".to_string())?;
            stdin
                .write_all(state_json.as_bytes())
                .map_err(|e| format!("runtime_launch_failed:{e}"))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| format!("runtime_failure:{e}"))?;
        if !output.status.success() {
            return Err(format!("runtime_failure:exit {:?}", output.status.code()));
        }
        let envelope: SubprocessEnvelope = serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("runtime_malformed_output:{e}"))?;
        match envelope {
            SubprocessEnvelope::Result { result } => Ok(result),
            SubprocessEnvelope::Error { error } => Err(error),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum SubprocessEnvelope {
    Result { result: Decision },
    Error { error: String },
}

#[cfg(unix)]
fn apply_resource_limits(cmd: &mut Command, cfg: &SandboxConfig) {
    let memory_limit = cfg.memory_limit_bytes;
    let cpu_seconds = cfg.cpu_seconds;
    unsafe {
        cmd.pre_exec(move || {
            rlimit::setrlimit(rlimit::Resource::AS, memory_limit, memory_limit)?;
            rlimit::setrlimit(rlimit::Resource::CPU, cpu_seconds, cpu_seconds)?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_resource_limits(_cmd: &mut Command, _cfg: &SandboxConfig) {}

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Bounded pool of ≤4 concurrent decision workers, per spec.md §4.3/§5.
/// Enforces the wall-clock timeout with a waiter thread: the job runs on a
/// pool worker, and the caller races a channel receive against the timeout.
/// A job that outlives the timeout keeps running on its worker (abandoned,
/// not killed) — matching the original's `ThreadPoolExecutor` behavior where
/// a timed-out future is simply not awaited further.
pub struct DecisionPool {
    sender: mpsc::Sender<Job>,
    _workers: Vec<std::thread::JoinHandle<()>>,
}

type Job = Box<dyn FnOnce() + Send>;

impl DecisionPool {
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let receiver = Arc::clone(&receiver);
            handles.push(std::thread::spawn(move || loop {
                let job = { receiver.lock().unwrap().recv() };
                match job {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            }));
        }
        Self {
            sender,
            _workers: handles,
        }
    }

    pub fn run_with_timeout<F>(&self, timeout: Duration, f: F) -> Decision
    where
        F: FnOnce() -> Decision + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(f());
        });
        if self.sender.send(job).is_err() {
            return Decision::fallback("runtime_failure");
        }
        match rx.recv_timeout(timeout) {
            Ok(decision) => decision,
            Err(_) => Decision::fallback("timeout"),
        }
    }
}

impl Default for DecisionPool {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversize_state_short_circuits_without_invoking_bot() {
        let called = Arc::new(Mutex::new(false));
        let called2 = Arc::clone(&called);
        let handle = FnBotHandle(move |_| {
            *called2.lock().unwrap() = true;
            Ok(Decision {
                action: "check".into(),
                amount: 0,
                error: None,
            })
        });
        let cfg = SandboxConfig {
            max_state_bytes: 4,
            ..Default::default()
        };
        let pool = DecisionPool::new(1);
        let decision = decide_checked(&handle, "this is way more than 4 bytes", &cfg, &pool);
        assert_eq!(decision.error.as_deref(), Some("state_too_large"));
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn slow_bot_times_out_and_folds() {
        let handle = FnBotHandle(|_| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Decision {
                action: "check".into(),
                amount: 0,
                error: None,
            })
        });
        let cfg = SandboxConfig {
            timeout: Duration::from_millis(30),
            ..Default::default()
        };
        let pool = DecisionPool::new(1);
        let start = std::time::Instant::now();
        let decision = decide_checked(&handle, "{}", &cfg, &pool);
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(decision.action, "fold");
        assert_eq!(decision.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn panicking_bot_is_isolated() {
        let handle = FnBotHandle(|_| Err("error:boom".to_string()));
        let cfg = SandboxConfig::default();
        let pool = DecisionPool::new(1);
        let decision = decide_checked(&handle, "{}", &cfg, &pool);
        assert_eq!(decision.action, "fold");
        assert!(decision.error.unwrap().starts_with("error:"));
    }

    #[test]
    fn subsequent_decide_on_same_handle_still_succeeds() {
        let attempt = Arc::new(Mutex::new(0));
        let attempt2 = Arc::clone(&attempt);
        let handle = FnBotHandle(move |_| {
            let mut n = attempt2.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Err("error:boom".to_string())
            } else {
                Ok(Decision {
                    action: "check".into(),
                    amount: 0,
                    error: None,
                })
            }
        });
        let cfg = SandboxConfig::default();
        let pool = DecisionPool::new(1);
        let first = decide_checked(&handle, "{}", &cfg, &pool);
        let second = decide_checked(&handle, "{}", &cfg, &pool);
        assert_eq!(first.action, "fold");
        assert_eq!(second.action, "check");
    }
}
