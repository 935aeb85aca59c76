//! Ambient configuration surface, per spec.md §6 and SPEC_FULL §6.
//!
//! A single struct rather than the teacher's scattered `const DEF_SB`/
//! `DEF_BB` idiom (`poker-core/src/state.rs`), generalized so every
//! documented knob is present, typed, and `serde`-derived the way the
//! teacher's crates already are.

use poker_bots::sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackend {
    InProcess,
    Subprocess,
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub starting_stack_units: i64,
    pub small_blind_units: i64,
    pub big_blind_units: i64,
    pub hand_interval_seconds: f64,
    pub decision_timeout_seconds: f64,
    pub max_state_bytes: usize,
    pub max_upload_bytes: usize,
    pub max_archive_members: usize,
    pub max_archive_file_bytes: usize,
    pub max_archive_uncompressed_bytes: usize,
    pub max_bot_source_bytes: usize,
    pub max_requirements_bytes: usize,
    pub sandbox_memory_limit_bytes: u64,
    pub sandbox_cpu_seconds: u64,
    pub sandbox_backend: SandboxBackend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let decision_timeout_seconds = 2.0;
        Self {
            starting_stack_units: 10_000,
            small_blind_units: 50,
            big_blind_units: 100,
            hand_interval_seconds: 1.0,
            decision_timeout_seconds,
            max_state_bytes: 64 * 1024,
            max_upload_bytes: 10 * 1024 * 1024,
            max_archive_members: 128,
            max_archive_file_bytes: 1024 * 1024,
            max_archive_uncompressed_bytes: 2 * 1024 * 1024,
            max_bot_source_bytes: 256 * 1024,
            max_requirements_bytes: 32 * 1024,
            sandbox_memory_limit_bytes: 256 * 1024 * 1024,
            sandbox_cpu_seconds: decision_timeout_seconds.ceil() as u64 + 1,
            sandbox_backend: SandboxBackend::Subprocess,
        }
    }
}

impl EngineConfig {
    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.decision_timeout_seconds)
    }

    pub fn hand_interval(&self) -> Duration {
        Duration::from_secs_f64(self.hand_interval_seconds)
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            timeout: self.decision_timeout(),
            max_state_bytes: self.max_state_bytes,
            memory_limit_bytes: self.sandbox_memory_limit_bytes,
            cpu_seconds: self.sandbox_cpu_seconds,
        }
    }
}
