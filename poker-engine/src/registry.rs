//! Seat & Bot Registry, per spec.md §4.8.
//!
//! Generalizes `original_source/backend/app/services/match_service.py`'s
//! `SeatState`/`_seats` dict and `register_bot` from its hardcoded `A`/`B`
//! pair to six `SeatId`-addressed slots, binding a `BotHandle` (rather than
//! the original's in-process-only `BotRunner`) per spec.md §3.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use poker_bots::archive::ArchiveError;
use poker_bots::artifact::ArtifactRef;
use poker_bots::sandbox::{BotHandle, SandboxConfig, SandboxError, SubprocessHandle};
use poker_core::seat::SeatId;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum BotLoadError {
    #[display(fmt = "invalid seat id")]
    InvalidSeat,
    #[display(fmt = "archive rejected: {}", _0)]
    Archive(ArchiveError),
    #[display(fmt = "{}", _0)]
    Sandbox(SandboxError),
}

impl From<ArchiveError> for BotLoadError {
    fn from(e: ArchiveError) -> Self {
        Self::Archive(e)
    }
}

impl From<SandboxError> for BotLoadError {
    fn from(e: SandboxError) -> Self {
        Self::Sandbox(e)
    }
}

#[derive(Debug, Clone)]
pub struct SeatSnapshot {
    pub seat_id: SeatId,
    pub ready: bool,
    pub bot_name: Option<String>,
    pub bot_id: Option<String>,
    pub uploaded_at: Option<SystemTime>,
    pub declared_protocol_version: Option<String>,
}

struct SeatEntry {
    ready: bool,
    bot_name: Option<String>,
    bot_id: Option<String>,
    uploaded_at: Option<SystemTime>,
    handle: Option<Arc<dyn BotHandle>>,
    declared_protocol_version: Option<String>,
}

impl SeatEntry {
    fn empty() -> Self {
        Self {
            ready: false,
            bot_name: None,
            bot_id: None,
            uploaded_at: None,
            handle: None,
            declared_protocol_version: None,
        }
    }

    fn snapshot(&self, seat_id: SeatId) -> SeatSnapshot {
        SeatSnapshot {
            seat_id,
            ready: self.ready,
            bot_name: self.bot_name.clone(),
            bot_id: self.bot_id.clone(),
            uploaded_at: self.uploaded_at,
            declared_protocol_version: self.declared_protocol_version.clone(),
        }
    }
}

/// Six fixed seat slots, each optionally bound to a loaded, invocable bot.
pub struct Registry {
    seats: HashMap<SeatId, SeatEntry>,
    runtime_helper: String,
}

impl Registry {
    pub fn new(runtime_helper: impl Into<String>) -> Self {
        Self {
            seats: SeatId::all().map(|s| (s, SeatEntry::empty())).collect(),
            runtime_helper: runtime_helper.into(),
        }
    }

    pub fn seats(&self) -> Vec<SeatSnapshot> {
        let mut out: Vec<_> = self
            .seats
            .iter()
            .map(|(&id, entry)| entry.snapshot(id))
            .collect();
        out.sort_by_key(|s| s.seat_id);
        out
    }

    pub fn ready_count(&self) -> usize {
        self.seats.values().filter(|e| e.ready).count()
    }

    pub fn bot_handles(&self) -> HashMap<SeatId, Arc<dyn BotHandle>> {
        self.seats
            .iter()
            .filter_map(|(&id, e)| e.handle.clone().map(|h| (id, h)))
            .collect()
    }

    pub fn seat_names(&self) -> HashMap<SeatId, String> {
        self.seats
            .iter()
            .filter_map(|(&id, e)| e.bot_name.clone().map(|n| (id, n)))
            .collect()
    }

    /// Declared protocol version per ready seat (spec.md §4.4), as extracted
    /// by `ArchiveValidator` and passed to `register_bot`. Absent entries
    /// mean "undeclared" — the Decision Protocol Adapter falls back to
    /// legacy per SPEC_FULL §9 OQ3.
    pub fn declared_protocol_versions(&self) -> HashMap<SeatId, String> {
        self.seats
            .iter()
            .filter_map(|(&id, e)| e.declared_protocol_version.clone().map(|v| (id, v)))
            .collect()
    }

    /// Validates the seat, resolves `artifact` to a `BotHandle`, replaces any
    /// existing handle on that seat (the old one is simply dropped — its
    /// subprocess children, if any, are owned by the handle itself), and
    /// marks the seat ready. Step order follows spec.md §4.8 exactly.
    /// `declared_protocol_version` is whatever `archive::validate` statically
    /// extracted from the bot's source (`ValidatedArchive::
    /// declared_protocol_version`), carried here so every subsequent
    /// decision for this seat uses the right wire format.
    pub fn register_bot(
        &mut self,
        seat_id: SeatId,
        name: &str,
        artifact: &ArtifactRef,
        bot_id: Option<&str>,
        sandbox_cfg: &SandboxConfig,
        declared_protocol_version: Option<&str>,
    ) -> Result<SeatSnapshot, BotLoadError> {
        let entry = self.seats.get_mut(&seat_id).ok_or(BotLoadError::InvalidSeat)?;

        let handle: Arc<dyn BotHandle> = Arc::new(SubprocessHandle {
            runtime_helper: self.runtime_helper.clone(),
            artifact_dir: artifact.storage_path.parent().unwrap_or(&artifact.storage_path).to_path_buf(),
            cfg: sandbox_cfg.clone(),
        });

        entry.handle = Some(handle);
        entry.ready = true;
        entry.bot_name = Some(name.to_string());
        entry.bot_id = bot_id.map(str::to_string);
        entry.uploaded_at = Some(SystemTime::now());
        entry.declared_protocol_version = declared_protocol_version.map(str::to_string);

        Ok(entry.snapshot(seat_id))
    }

    /// Releases every bound `BotHandle` and resets all six slots, per
    /// spec.md §4.8.
    pub fn reset(&mut self) {
        for entry in self.seats.values_mut() {
            *entry = SeatEntry::empty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_has_six_empty_seats() {
        let registry = Registry::new("runtime/bot_runner.py");
        let seats = registry.seats();
        assert_eq!(seats.len(), 6);
        assert!(seats.iter().all(|s| !s.ready));
        assert_eq!(registry.ready_count(), 0);
    }

    #[test]
    fn register_bot_marks_seat_ready() {
        let mut registry = Registry::new("runtime/bot_runner.py");
        let artifact = ArtifactRef {
            artifact_id: "bot-1:deadbeef".to_string(),
            filename: "bot.zip".to_string(),
            sha256: "deadbeef".to_string(),
            size_bytes: 10,
            storage_path: std::path::PathBuf::from("/tmp/artifacts/bot-1/deadbeef/bot.zip"),
        };
        let seat = SeatId::new(1).unwrap();
        let snapshot = registry
            .register_bot(
                seat,
                "My Bot",
                &artifact,
                Some("bot-1"),
                &SandboxConfig::default(),
                Some("2.0"),
            )
            .unwrap();
        assert!(snapshot.ready);
        assert_eq!(snapshot.declared_protocol_version.as_deref(), Some("2.0"));
        assert_eq!(registry.ready_count(), 1);
        assert_eq!(registry.bot_handles().len(), 1);
        assert_eq!(
            registry.declared_protocol_versions().get(&seat).map(String::as_str),
            Some("2.0")
        );
    }

    #[test]
    fn reset_releases_every_handle() {
        let mut registry = Registry::new("runtime/bot_runner.py");
        let artifact = ArtifactRef {
            artifact_id: "bot-1:deadbeef".to_string(),
            filename: "bot.zip".to_string(),
            sha256: "deadbeef".to_string(),
            size_bytes: 10,
            storage_path: std::path::PathBuf::from("/tmp/artifacts/bot-1/deadbeef/bot.zip"),
        };
        let seat = SeatId::new(1).unwrap();
        registry
            .register_bot(seat, "My Bot", &artifact, None, &SandboxConfig::default(), None)
            .unwrap();
        registry.reset();
        assert_eq!(registry.ready_count(), 0);
        assert!(registry.bot_handles().is_empty());
    }
}
