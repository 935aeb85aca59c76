//! Hand history text, storage, pagination, and leaderboard aggregation, per
//! spec.md §4.7.
//!
//! Grounded on `original_source/backend/app/storage/hand_store.py` and
//! `engine/hand_history.py` for the storage layout, generalized from the
//! MVP's placeholder-body, two-seat history text to the full per-street,
//! per-`ActionEvent` format spec.md §4.7 requires. `list_hands`'s
//! newest-first, `max_hand_id`-snapshotted pagination is carried over from
//! `match_service.py::list_hands` almost verbatim (same start/end
//! arithmetic).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use poker_core::seat::SeatId;

use crate::handstate::HandResult;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum StoreError {
    #[display(fmt = "i/o error persisting hand history: {}", _0)]
    Io(std::io::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Renders the canonical, deterministic hand-history text for one hand, per
/// spec.md §4.7. `$`-prefixed currency is a fixed wire format (SPEC_FULL §9
/// OQ4), not locale-sensitive, matching `hand_history.py`'s hardcoded
/// `f"{...:.2f}"`.
pub fn format_hand_history(
    result: &HandResult,
    seat_names: &HashMap<SeatId, String>,
    small_blind: poker_core::pot::Currency,
    big_blind: poker_core::pot::Currency,
    timestamp: &str,
) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Hand #{}", result.hand_id));
    lines.push(format!("Date: {timestamp}"));
    lines.push(format!(
        "Game: Hold'em No Limit ({}/{})",
        small_blind, big_blind
    ));

    let mut seats: Vec<SeatId> = result.hole_cards.keys().copied().collect();
    seats.sort();
    for seat in &seats {
        let name = seat_names.get(seat).map(String::as_str).unwrap_or("");
        lines.push(format!("Seat {seat}: {name}"));
    }
    lines.push(format!("Button: Seat {}", result.button));

    lines.push("*** HOLE CARDS ***".to_string());
    for seat in &seats {
        let cards = &result.hole_cards[seat];
        lines.push(format!("Seat {seat}: [{} {}]", cards[0], cards[1]));
    }

    let streets = ["preflop", "flop", "turn", "river"];
    let mut board_shown = 0usize;
    for street in streets {
        let events: Vec<_> = result
            .actions
            .iter()
            .filter(|e| e.street == street)
            .collect();
        if events.is_empty() && street != "preflop" {
            continue;
        }
        let header = match street {
            "preflop" => "*** PREFLOP ***".to_string(),
            "flop" => {
                board_shown = 3.min(result.board.len());
                format!(
                    "*** FLOP [{}] ***",
                    cards_str(&result.board[..board_shown])
                )
            }
            "turn" => {
                let upto = 4.min(result.board.len());
                let section = cards_str(&result.board[..upto]);
                board_shown = upto;
                format!("*** TURN [{}] ***", section)
            }
            "river" => {
                let upto = 5.min(result.board.len());
                let section = cards_str(&result.board[..upto]);
                board_shown = upto;
                format!("*** RIVER [{}] ***", section)
            }
            _ => unreachable!(),
        };
        lines.push(header);
        for event in events {
            lines.push(format!(
                "Seat {}: {} {}",
                event.seat,
                event.action,
                poker_core::pot::Currency::from(event.amount as i32)
            ));
        }
    }
    let _ = board_shown;

    lines.push("*** SUMMARY ***".to_string());
    lines.push(format!("Total pot: {}", result.pot));
    let winners = result
        .winners
        .iter()
        .map(|s| format!("Seat {s}"))
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(format!("Winner: {winners}"));
    lines.push(format!("Board: {}", cards_str(&result.board)));
    lines.push(format!("Blinds: {small_blind}/{big_blind}"));

    lines.join("\n")
}

fn cards_str(cards: &[poker_core::cards::Card]) -> String {
    cards
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// One file per hand under `<runtime>/hands/<handId>.txt`, per spec.md §6.
pub struct HandStore {
    root: PathBuf,
}

impl HandStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn hands_dir(&self) -> PathBuf {
        self.root.join("hands")
    }

    pub fn save_hand(&self, hand_id: &str, text: &str) -> Result<PathBuf, StoreError> {
        let dir = self.hands_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{hand_id}.txt"));
        fs::write(&path, text)?;
        Ok(path)
    }

    pub fn load_hand(&self, hand_id: &str) -> Result<String, StoreError> {
        Ok(fs::read_to_string(self.hands_dir().join(format!("{hand_id}.txt")))?)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let dir = self.hands_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HandRecord {
    pub hand_id: String,
    pub completed_at: SystemTime,
    pub summary: String,
    pub winners: Vec<SeatId>,
    pub pot: poker_core::pot::Currency,
    pub deltas: HashMap<SeatId, poker_core::pot::Currency>,
    pub active_seats: Vec<SeatId>,
    pub history_path: PathBuf,
}

/// In-memory, append-only hand log held by the Match Scheduler.
#[derive(Debug, Default)]
pub struct HandLog {
    hands: Vec<HandRecord>,
}

impl HandLog {
    pub fn push(&mut self, record: HandRecord) {
        self.hands.push(record);
    }

    pub fn len(&self) -> usize {
        self.hands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }

    pub fn last(&self) -> Option<&HandRecord> {
        self.hands.last()
    }

    pub fn clear(&mut self) {
        self.hands.clear();
    }

    /// Newest-first pagination, snapshotted to `min(handsPlayed, max_hand_id)`,
    /// carried over from `match_service.py::list_hands` almost verbatim.
    pub fn list_hands(
        &self,
        page: usize,
        page_size: usize,
        max_hand_id: Option<usize>,
    ) -> Vec<&HandRecord> {
        let total = self.hands.len();
        let snapshot_count = max_hand_id.map(|m| m.min(total)).unwrap_or(total);
        if page_size == 0 || snapshot_count == 0 || page == 0 {
            return Vec::new();
        }
        let start = snapshot_count.saturating_sub(page * page_size);
        let end = snapshot_count.saturating_sub((page - 1) * page_size);
        if end == 0 || start >= snapshot_count {
            return Vec::new();
        }
        self.hands[start..end].iter().rev().collect()
    }

    /// Per-hand PnL since `since_hand_id` (exclusive), oldest-first, plus the
    /// newest numeric hand id seen. Carried over from
    /// `match_service.py::list_pnl`, generalized from its hardcoded two-seat
    /// `delta_a`/`delta_b` pair to the full per-seat `deltas` map.
    pub fn list_pnl(&self, since_hand_id: Option<u64>) -> (Vec<PnlEntry>, Option<u64>) {
        let mut entries = Vec::new();
        let mut last_hand_id = None;
        for record in &self.hands {
            let Ok(hand_number) = record.hand_id.parse::<u64>() else {
                continue;
            };
            last_hand_id = Some(hand_number);
            if let Some(since) = since_hand_id {
                if hand_number <= since {
                    continue;
                }
            }
            entries.push(PnlEntry {
                hand_id: record.hand_id.clone(),
                deltas: record.deltas.clone(),
            });
        }
        (entries, last_hand_id)
    }
}

/// One hand's per-seat PnL, as returned by `HandLog::list_pnl`.
#[derive(Debug, Clone)]
pub struct PnlEntry {
    pub hand_id: String,
    pub deltas: HashMap<SeatId, poker_core::pot::Currency>,
}

/// Leaderboard row per spec.md §4.7.
#[derive(Debug, Clone)]
pub struct LeaderboardRow {
    pub bot_id: String,
    pub hands_played: u64,
    pub bb_won: f64,
    pub updated_at: SystemTime,
}

impl LeaderboardRow {
    pub fn bb_per_hand(&self) -> f64 {
        if self.hands_played == 0 {
            0.0
        } else {
            self.bb_won / self.hands_played as f64
        }
    }
}

/// Plain in-memory leaderboard; the `on_hand_completed` hook is the only
/// contract this crate owns (no database — out of scope per spec.md §1).
#[derive(Debug, Default)]
pub struct Leaderboard {
    rows: HashMap<String, LeaderboardRow>,
}

impl Leaderboard {
    pub fn on_hand_completed(
        &mut self,
        record: &HandRecord,
        deltas: &HashMap<SeatId, poker_core::pot::Currency>,
        seat_bot_ids: &HashMap<SeatId, String>,
        big_blind: poker_core::pot::Currency,
        now: SystemTime,
    ) {
        for (seat, bot_id) in seat_bot_ids {
            let Some(&delta) = deltas.get(seat) else {
                continue;
            };
            let delta_bb = *delta as f64 / *big_blind as f64;
            let row = self.rows.entry(bot_id.clone()).or_insert_with(|| LeaderboardRow {
                bot_id: bot_id.clone(),
                hands_played: 0,
                bb_won: 0.0,
                updated_at: now,
            });
            row.hands_played += 1;
            row.bb_won += delta_bb;
            row.updated_at = now;
        }
        let _ = record;
    }

    /// Ranking key: `(bb_per_hand desc, hands_played desc, updated_at desc,
    /// bot_id desc)`, per spec.md §4.7.
    pub fn ranked(&self) -> Vec<&LeaderboardRow> {
        let mut rows: Vec<&LeaderboardRow> = self.rows.values().collect();
        rows.sort_by(|a, b| {
            b.bb_per_hand()
                .partial_cmp(&a.bb_per_hand())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.hands_played.cmp(&a.hands_played))
                .then(b.updated_at.cmp(&a.updated_at))
                .then(b.bot_id.cmp(&a.bot_id))
        });
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_hands_returns_newest_first() {
        let mut log = HandLog::default();
        for i in 1..=5 {
            log.push(HandRecord {
                hand_id: i.to_string(),
                completed_at: SystemTime::now(),
                summary: format!("Hand #{i}"),
                winners: vec![SeatId::new(1).unwrap()],
                pot: 100.into(),
                deltas: HashMap::new(),
                active_seats: vec![SeatId::new(1).unwrap()],
                history_path: PathBuf::from(format!("{i}.txt")),
            });
        }
        let page = log.list_hands(1, 2, None);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].hand_id, "5");
        assert_eq!(page[1].hand_id, "4");
    }

    #[test]
    fn list_hands_honors_max_hand_id_snapshot() {
        let mut log = HandLog::default();
        for i in 1..=5 {
            log.push(HandRecord {
                hand_id: i.to_string(),
                completed_at: SystemTime::now(),
                summary: String::new(),
                winners: vec![],
                pot: 0.into(),
                deltas: HashMap::new(),
                active_seats: vec![],
                history_path: PathBuf::new(),
            });
        }
        let page = log.list_hands(1, 10, Some(3));
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].hand_id, "3");
    }

    #[test]
    fn list_pnl_excludes_hands_at_or_before_since_hand_id() {
        let mut log = HandLog::default();
        let seat = SeatId::new(1).unwrap();
        for i in 1..=4 {
            let mut deltas = HashMap::new();
            deltas.insert(seat, poker_core::pot::Currency::from(i * 10));
            log.push(HandRecord {
                hand_id: i.to_string(),
                completed_at: SystemTime::now(),
                summary: String::new(),
                winners: vec![seat],
                pot: (i * 10).into(),
                deltas,
                active_seats: vec![seat],
                history_path: PathBuf::new(),
            });
        }
        let (entries, last) = log.list_pnl(Some(2));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].hand_id, "3");
        assert_eq!(entries[1].hand_id, "4");
        assert_eq!(*entries[1].deltas[&seat], 40);
        assert_eq!(last, Some(4));
    }

    #[test]
    fn list_pnl_with_no_since_returns_every_hand() {
        let mut log = HandLog::default();
        let seat = SeatId::new(1).unwrap();
        let mut deltas = HashMap::new();
        deltas.insert(seat, poker_core::pot::Currency::from(50));
        log.push(HandRecord {
            hand_id: "1".to_string(),
            completed_at: SystemTime::now(),
            summary: String::new(),
            winners: vec![seat],
            pot: 50.into(),
            deltas,
            active_seats: vec![seat],
            history_path: PathBuf::new(),
        });
        let (entries, last) = log.list_pnl(None);
        assert_eq!(entries.len(), 1);
        assert_eq!(last, Some(1));
    }

    #[test]
    fn leaderboard_ranks_by_bb_per_hand_descending() {
        let mut board = Leaderboard::default();
        let seat = SeatId::new(1).unwrap();
        let mut deltas = HashMap::new();
        deltas.insert(seat, poker_core::pot::Currency::from(500));
        let mut bot_ids = HashMap::new();
        bot_ids.insert(seat, "bot-a".to_string());
        let record = HandRecord {
            hand_id: "1".to_string(),
            completed_at: SystemTime::now(),
            summary: String::new(),
            winners: vec![seat],
            pot: 1000.into(),
            deltas: deltas.clone(),
            active_seats: vec![seat],
            history_path: PathBuf::new(),
        };
        board.on_hand_completed(&record, &deltas, &bot_ids, 100.into(), SystemTime::now());
        let ranked = board.ranked();
        assert_eq!(ranked[0].bot_id, "bot-a");
        assert_eq!(ranked[0].hands_played, 1);
    }
}
