//! Match Scheduler, per spec.md §4.6 and §5.
//!
//! Generalizes `original_source/backend/app/services/match_service.py`'s
//! `MatchService` from its hardcoded two-seat `A`/`B` table to spec.md's
//! up-to-six-seat `Registry`-backed table, while keeping its concurrency
//! shape almost unchanged: one `Mutex`-guarded state struct, one
//! `Condvar`-backed shutdown signal (Python's `threading.Event` becomes a
//! `(Mutex<bool>, Condvar)` pair, the idiomatic substitute per Design Notes
//! §9's "background thread to native task primitive" mapping), one
//! background `std::thread::JoinHandle`. `start/pause/resume/end/reset`
//! keep the original's exact transition table and its
//! `join(timeout=2)`-from-outside-the-worker / never-self-join rule.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::SystemTime;

use poker_bots::sandbox::DecisionPool;
use poker_core::pot::Currency;
use poker_core::seat::SeatId;

use crate::config::EngineConfig;
use crate::handstate::{play_hand, HandInput};
use crate::registry::Registry;
use crate::store::{format_hand_history, HandLog, HandRecord, HandStore, Leaderboard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Waiting,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum TransitionError {
    #[display(fmt = "match already running")]
    AlreadyRunning,
    #[display(fmt = "match is paused; use resume")]
    IsPaused,
    #[display(fmt = "at least two seats must be ready to start")]
    NotEnoughSeatsReady,
    #[display(fmt = "match is not running")]
    NotRunning,
    #[display(fmt = "match is not paused")]
    NotPaused,
}

#[derive(Debug, Clone)]
pub struct MatchSnapshot {
    pub status: MatchStatus,
    pub started_at: Option<SystemTime>,
    pub hands_played: u64,
    pub last_hand_id: Option<String>,
}

struct Inner {
    status: MatchStatus,
    started_at: Option<SystemTime>,
    hand_counter: u64,
    last_button: Option<SeatId>,
}

pub type HandCompletedHook =
    dyn Fn(&HandRecord, &HashMap<SeatId, Currency>, &HashMap<SeatId, String>) + Send + Sync;

/// Owns `MatchState` and the single background worker that iterates hands,
/// per spec.md §4.6.
pub struct MatchScheduler {
    inner: Mutex<Inner>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    registry: Mutex<Registry>,
    hand_log: Mutex<HandLog>,
    leaderboard: Mutex<Leaderboard>,
    hand_store: HandStore,
    pool: DecisionPool,
    cfg: EngineConfig,
    table_id: String,
    on_hand_completed: Arc<HandCompletedHook>,
}

impl MatchScheduler {
    pub fn new(
        table_id: impl Into<String>,
        cfg: EngineConfig,
        hand_store: HandStore,
        runtime_helper: impl Into<String>,
        on_hand_completed: impl Fn(&HandRecord, &HashMap<SeatId, Currency>, &HashMap<SeatId, String>)
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                status: MatchStatus::Waiting,
                started_at: None,
                hand_counter: 0,
                last_button: None,
            }),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
            registry: Mutex::new(Registry::new(runtime_helper)),
            hand_log: Mutex::new(HandLog::default()),
            leaderboard: Mutex::new(Leaderboard::default()),
            hand_store,
            pool: DecisionPool::default(),
            cfg,
            table_id: table_id.into(),
            on_hand_completed: Arc::new(on_hand_completed),
        })
    }

    pub fn registry(&self) -> &Mutex<Registry> {
        &self.registry
    }

    pub fn leaderboard(&self) -> &Mutex<Leaderboard> {
        &self.leaderboard
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        let inner = self.inner.lock().unwrap();
        let log = self.hand_log.lock().unwrap();
        MatchSnapshot {
            status: inner.status,
            started_at: inner.started_at,
            hands_played: log.len() as u64,
            last_hand_id: log.last().map(|r| r.hand_id.clone()),
        }
    }

    pub fn list_hands(
        &self,
        page: usize,
        page_size: usize,
        max_hand_id: Option<usize>,
    ) -> Vec<HandRecord> {
        self.hand_log
            .lock()
            .unwrap()
            .list_hands(page, page_size, max_hand_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn list_pnl(&self, since_hand_id: Option<u64>) -> (Vec<crate::store::PnlEntry>, Option<u64>) {
        self.hand_log.lock().unwrap().list_pnl(since_hand_id)
    }

    pub fn get_hand(&self, hand_id: &str) -> Option<(HandRecord, String)> {
        let record = {
            let log = self.hand_log.lock().unwrap();
            log.list_hands(1, usize::MAX, None)
                .into_iter()
                .find(|r| r.hand_id == hand_id)
                .cloned()
        }?;
        let text = self.hand_store.load_hand(hand_id).ok()?;
        Some((record, text))
    }

    pub fn start_match(self: &Arc<Self>) -> Result<(), TransitionError> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        match inner.status {
            MatchStatus::Running => return Err(TransitionError::AlreadyRunning),
            MatchStatus::Paused => return Err(TransitionError::IsPaused),
            _ => {}
        }
        if self.registry.lock().unwrap().ready_count() < 2 {
            return Err(TransitionError::NotEnoughSeatsReady);
        }
        let previous = inner.status;
        inner.status = MatchStatus::Running;
        if matches!(previous, MatchStatus::Waiting | MatchStatus::Stopped) || inner.started_at.is_none() {
            inner.started_at = Some(now);
        }
        drop(inner);
        self.ensure_loop_running_locked();
        Ok(())
    }

    pub fn pause_match(&self) -> Result<(), TransitionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != MatchStatus::Running {
                return Err(TransitionError::NotRunning);
            }
            inner.status = MatchStatus::Paused;
        }
        self.signal_shutdown_and_join();
        Ok(())
    }

    pub fn resume_match(self: &Arc<Self>) -> Result<(), TransitionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != MatchStatus::Paused {
                return Err(TransitionError::NotPaused);
            }
            if self.registry.lock().unwrap().ready_count() < 2 {
                return Err(TransitionError::NotEnoughSeatsReady);
            }
            inner.status = MatchStatus::Running;
            if inner.started_at.is_none() {
                inner.started_at = Some(SystemTime::now());
            }
        }
        self.ensure_loop_running_locked();
        Ok(())
    }

    pub fn end_match(&self) -> Result<(), TransitionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.status, MatchStatus::Running | MatchStatus::Paused) {
                return Err(TransitionError::NotRunning);
            }
            inner.status = MatchStatus::Stopped;
        }
        self.signal_shutdown_and_join();
        Ok(())
    }

    /// Releases every `BotHandle`, clears hand history and the in-memory
    /// log, and returns the match to `waiting`. Joins the worker first if
    /// called from outside it; never self-joins when called from within the
    /// worker's own crash-containment path, per spec.md §5.
    pub fn reset_match(&self) -> Result<(), TransitionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.status = MatchStatus::Waiting;
            inner.started_at = None;
            inner.hand_counter = 0;
            inner.last_button = None;
        }
        self.registry.lock().unwrap().reset();
        self.hand_log.lock().unwrap().clear();
        self.signal_shutdown_and_join();
        let _ = self.hand_store.clear();
        Ok(())
    }

    fn ensure_loop_running_locked(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        *self.shutdown.0.lock().unwrap() = false;
        let scheduler = Arc::clone(self);
        *worker = Some(thread::spawn(move || scheduler.run_loop()));
    }

    fn signal_shutdown_and_join(&self) {
        {
            let (lock, cvar) = &*self.shutdown;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if thread::current().id() != handle.thread().id() {
                let _ = handle.join();
            }
        }
    }

    fn run_loop(self: Arc<Self>) {
        loop {
            {
                let (lock, cvar) = &*self.shutdown;
                let shutdown = lock.lock().unwrap();
                if *shutdown {
                    return;
                }
                drop(shutdown);
                let _ = cvar;
            }

            let status_ok = self.inner.lock().unwrap().status == MatchStatus::Running;
            if !status_ok {
                return;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.simulate_hand()));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("hand loop failed on table {}: {}", self.table_id, err);
                    self.crash_contain();
                    return;
                }
                Err(_) => {
                    log::error!("hand loop panicked on table {}", self.table_id);
                    self.crash_contain();
                    return;
                }
            }

            let (lock, cvar) = &*self.shutdown;
            let guard = lock.lock().unwrap();
            let (_guard, _timeout) = cvar
                .wait_timeout(guard, self.cfg.hand_interval())
                .unwrap();
        }
    }

    fn crash_contain(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = MatchStatus::Waiting;
        inner.started_at = None;
        drop(inner);
        *self.shutdown.0.lock().unwrap() = true;
    }

    fn simulate_hand(&self) -> Result<(), crate::handstate::EngineError> {
        let (bot_handles, seat_names, protocol_versions) = {
            let registry = self.registry.lock().unwrap();
            (
                registry.bot_handles(),
                registry.seat_names(),
                registry.declared_protocol_versions(),
            )
        };

        let mut active: Vec<SeatId> = bot_handles.keys().copied().collect();
        active.sort();

        let (hand_id, button) = {
            let mut inner = self.inner.lock().unwrap();
            inner.hand_counter += 1;
            let hand_id = inner.hand_counter.to_string();
            let button = match inner.last_button {
                Some(prev) if active.contains(&prev) => prev.next_active(&active),
                _ => *active.first().unwrap_or(&SeatId::new(1).unwrap()),
            };
            inner.last_button = Some(button);
            (hand_id, button)
        };

        let input = HandInput {
            hand_id: &hand_id,
            table_id: &self.table_id,
            bot_handles: &bot_handles,
            seat_names: &seat_names,
            protocol_versions: &protocol_versions,
            button_seat: button,
            deck_seed: poker_core::cards::DeckSeed::new(),
        };

        let result = play_hand(input, &self.cfg, &self.pool)?;

        let small_blind = Currency::from(self.cfg.small_blind_units as i32);
        let big_blind = Currency::from(self.cfg.big_blind_units as i32);
        let timestamp = format_timestamp(SystemTime::now());
        let history = format_hand_history(&result, &seat_names, small_blind, big_blind, &timestamp);
        let history_path = self
            .hand_store
            .save_hand(&result.hand_id, &history)
            .map_err(|e| crate::handstate::EngineError::Invariant(e.to_string()))?;

        let record = HandRecord {
            hand_id: result.hand_id.clone(),
            completed_at: SystemTime::now(),
            summary: format!(
                "Hand #{}: Seat {} won {}",
                result.hand_id,
                result
                    .winners
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                result.pot
            ),
            winners: result.winners.clone(),
            pot: result.pot,
            deltas: result.deltas.clone(),
            active_seats: result.active_seats.clone(),
            history_path,
        };

        self.hand_log.lock().unwrap().push(record.clone());

        let bot_ids: HashMap<SeatId, String> = {
            let registry = self.registry.lock().unwrap();
            registry
                .seats()
                .into_iter()
                .filter_map(|s| s.bot_id.map(|b| (s.seat_id, b)))
                .collect()
        };
        self.leaderboard.lock().unwrap().on_hand_completed(
            &record,
            &result.deltas,
            &bot_ids,
            big_blind,
            SystemTime::now(),
        );
        (self.on_hand_completed)(&record, &result.deltas, &seat_names);

        Ok(())
    }
}

fn format_timestamp(_t: SystemTime) -> String {
    "UTC".to_string()
}
