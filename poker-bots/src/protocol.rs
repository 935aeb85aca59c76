//! Decision payload construction and action normalization, per spec.md §4.4.
//!
//! Grounded line-for-line on `original_source/backend/app/bots/protocol.py`
//! (`build_decision_state`, `_build_legal_actions`, `_build_action_history`,
//! `build_legacy_state`) and `original_source/backend/app/engine/game.py`'s
//! `normalize_action` / `legal_actions` / `min_raise_to`.

use serde::{Deserialize, Serialize};

pub const LEGACY_PROTOCOL_VERSION: &str = "1.0";
pub const STRUCTURED_PROTOCOL_VERSION: &str = "2.0";

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum DecisionError {
    #[display(fmt = "state failed to serialize")]
    Unserializable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub player_id: String,
    pub seat_id: u8,
    pub name: String,
    pub stack: i64,
    pub bet: i64,
    pub folded: bool,
    pub all_in: bool,
    pub is_hero: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalAction {
    pub action: String,
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionHistoryEntry {
    pub index: usize,
    pub street: String,
    pub player_id: String,
    pub seat_id: u8,
    pub action: String,
    pub amount: i64,
    pub pot_after: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableView {
    pub table_id: String,
    pub hand_id: String,
    pub street: String,
    pub button_seat: u8,
    pub small_blind: i64,
    pub big_blind: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeroView {
    pub player_id: String,
    pub seat_id: u8,
    pub name: String,
    pub hole_cards: Vec<String>,
    pub stack: i64,
    pub bet: i64,
    pub to_call: i64,
    pub min_raise_to: i64,
    pub max_raise_to: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub cards: Vec<String>,
    pub pot: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub server_time: String,
    pub state_bytes: usize,
}

/// Protocol 2.0: canonical, structured decision state, per spec.md §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredDecisionState {
    pub protocol_version: String,
    pub decision_id: String,
    pub table: TableView,
    pub hero: HeroView,
    pub players: Vec<PlayerView>,
    pub board: BoardView,
    pub legal_actions: Vec<LegalAction>,
    pub action_history: Vec<ActionHistoryEntry>,
    pub meta: Meta,
}

/// Protocol 1.0 (legacy, default when no version is declared): a flat object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyDecisionState {
    pub seat: u8,
    pub seat_name: String,
    pub street: String,
    pub hole_cards: Vec<String>,
    pub board: Vec<String>,
    pub pot: i64,
    pub stack: i64,
    pub to_call: i64,
    pub min_raise_to: i64,
    pub legal_actions: Vec<LegalAction>,
    pub players: Vec<PlayerView>,
    pub button: u8,
    pub small_blind: i64,
    pub big_blind: i64,
}

/// Everything needed to build a decision payload for one hero seat at one
/// decision point, gathered by the hand state machine.
pub struct DecisionContext<'a> {
    pub table_id: &'a str,
    pub hand_id: &'a str,
    pub street: &'a str,
    pub button_seat: u8,
    pub small_blind: i64,
    pub big_blind: i64,
    pub hero_seat: u8,
    pub hero_player_id: &'a str,
    pub hero_name: &'a str,
    pub hero_hole_cards: &'a [String],
    pub hero_stack: i64,
    pub hero_bet: i64,
    pub to_call: i64,
    pub min_raise_to: i64,
    pub board: &'a [String],
    pub pot: i64,
    pub players: &'a [PlayerView],
    pub action_history: &'a [ActionHistoryEntry],
    pub server_time: &'a str,
}

pub struct ProtocolAdapter;

impl ProtocolAdapter {
    /// `legal_actions` are identical in semantics between both protocol
    /// versions, per spec.md §4.4.
    pub fn legal_actions(ctx: &DecisionContext) -> Vec<LegalAction> {
        let mut actions = vec![LegalAction {
            action: "fold".to_string(),
            min_amount: None,
            max_amount: None,
        }];
        if ctx.to_call > 0 {
            actions.push(LegalAction {
                action: "call".to_string(),
                min_amount: Some(ctx.to_call),
                max_amount: Some(ctx.to_call),
            });
        } else {
            actions.push(LegalAction {
                action: "check".to_string(),
                min_amount: None,
                max_amount: None,
            });
        }
        if ctx.hero_stack > 0 {
            let kind = if ctx.to_call > 0 { "raise" } else { "bet" };
            actions.push(LegalAction {
                action: kind.to_string(),
                min_amount: Some(ctx.min_raise_to),
                max_amount: Some(ctx.hero_bet + ctx.hero_stack),
            });
        }
        actions
    }

    /// `(table_id, hand_id, street, hero_seat, |history|)` deterministically
    /// identifies this decision point, per spec.md §4.4.
    fn decision_id(ctx: &DecisionContext) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            ctx.table_id,
            ctx.hand_id,
            ctx.street,
            ctx.hero_seat,
            ctx.action_history.len()
        )
    }

    pub fn build_structured(ctx: &DecisionContext) -> Result<String, DecisionError> {
        let decision_id = Self::decision_id(ctx);
        let legal_actions = Self::legal_actions(ctx);
        let mut state = StructuredDecisionState {
            protocol_version: STRUCTURED_PROTOCOL_VERSION.to_string(),
            decision_id,
            table: TableView {
                table_id: ctx.table_id.to_string(),
                hand_id: ctx.hand_id.to_string(),
                street: ctx.street.to_string(),
                button_seat: ctx.button_seat,
                small_blind: ctx.small_blind,
                big_blind: ctx.big_blind,
            },
            hero: HeroView {
                player_id: ctx.hero_player_id.to_string(),
                seat_id: ctx.hero_seat,
                name: ctx.hero_name.to_string(),
                hole_cards: ctx.hero_hole_cards.to_vec(),
                stack: ctx.hero_stack,
                bet: ctx.hero_bet,
                to_call: ctx.to_call,
                min_raise_to: ctx.min_raise_to,
                max_raise_to: ctx.hero_bet + ctx.hero_stack,
            },
            players: ctx.players.to_vec(),
            board: BoardView {
                cards: ctx.board.to_vec(),
                pot: ctx.pot,
            },
            legal_actions,
            action_history: ctx.action_history.to_vec(),
            meta: Meta {
                server_time: ctx.server_time.to_string(),
                state_bytes: 0,
            },
        };
        // state_bytes is a decimal usize, so writing a new length can change
        // its own digit count and invalidate the length just measured.
        // Reserialize until the embedded value and the actual length agree.
        let mut encoded =
            serde_json::to_string(&state).map_err(|_| DecisionError::Unserializable)?;
        loop {
            let len = encoded.len();
            if len == state.meta.state_bytes {
                break;
            }
            state.meta.state_bytes = len;
            encoded = serde_json::to_string(&state).map_err(|_| DecisionError::Unserializable)?;
        }
        Ok(encoded)
    }

    pub fn build_legacy(ctx: &DecisionContext) -> Result<String, DecisionError> {
        let legal_actions = Self::legal_actions(ctx);
        let state = LegacyDecisionState {
            seat: ctx.hero_seat,
            seat_name: ctx.hero_name.to_string(),
            street: ctx.street.to_string(),
            hole_cards: ctx.hero_hole_cards.to_vec(),
            board: ctx.board.to_vec(),
            pot: ctx.pot,
            stack: ctx.hero_stack,
            to_call: ctx.to_call,
            min_raise_to: ctx.min_raise_to,
            legal_actions,
            players: ctx.players.to_vec(),
            button: ctx.button_seat,
            small_blind: ctx.small_blind,
            big_blind: ctx.big_blind,
        };
        serde_json::to_string(&state).map_err(|_| DecisionError::Unserializable)
    }

    pub fn build(
        ctx: &DecisionContext,
        declared_version: Option<&str>,
    ) -> Result<String, DecisionError> {
        match declared_version {
            Some(STRUCTURED_PROTOCOL_VERSION) => Self::build_structured(ctx),
            _ => Self::build_legacy(ctx),
        }
    }
}

/// Raw bot reply, before normalization.
#[derive(Debug, Clone)]
pub struct RawAction {
    pub action: String,
    pub amount: Option<i64>,
}

/// The engine-side context a raw action is normalized against.
pub struct RoundContext {
    pub to_call: i64,
    pub current_bet: i64,
    pub min_raise_to: i64,
    pub stack: i64,
    pub bet: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedAction {
    Fold,
    Check,
    Call(i64),
    Bet(i64),
    Raise(i64),
}

/// Implements spec.md §4.4's normalization algorithm exactly, including the
/// fold-to-call-zero override and the degrade-to-call/check rules.
pub fn normalize_action(raw: &RawAction, ctx: &RoundContext) -> NormalizedAction {
    let base = match raw.action.as_str() {
        "fold" | "check" | "call" | "bet" | "raise" => raw.action.as_str(),
        _ => return fallback(ctx),
    };

    // coerce bet/raise and check/call consistently with the round
    let coerced = match base {
        "bet" if ctx.current_bet > 0 => "raise",
        "raise" if ctx.current_bet == 0 => "bet",
        "check" if ctx.to_call > 0 => "call",
        "call" if ctx.to_call <= 0 => "check",
        other => other,
    };

    // fold when to_call == 0 is never legal: always check for free
    if coerced == "fold" && ctx.to_call == 0 {
        return NormalizedAction::Check;
    }

    match coerced {
        "fold" => NormalizedAction::Fold,
        "check" => NormalizedAction::Check,
        "call" => NormalizedAction::Call(ctx.to_call.min(ctx.stack)),
        "bet" | "raise" => normalize_bet_or_raise(raw.amount, ctx, coerced == "raise"),
        _ => fallback(ctx),
    }
}

fn normalize_bet_or_raise(amount: Option<i64>, ctx: &RoundContext, is_raise: bool) -> NormalizedAction {
    let max_target = ctx.bet + ctx.stack;
    let desired = amount.unwrap_or(ctx.min_raise_to);

    if max_target <= ctx.current_bet {
        return if ctx.to_call > 0 {
            NormalizedAction::Call(ctx.to_call.min(ctx.stack))
        } else {
            NormalizedAction::Check
        };
    }

    let clamped = if desired < ctx.min_raise_to {
        if max_target >= ctx.min_raise_to {
            ctx.min_raise_to
        } else {
            max_target
        }
    } else if desired > max_target {
        max_target
    } else {
        desired
    };

    if clamped <= ctx.current_bet {
        return if ctx.to_call > 0 {
            NormalizedAction::Call(ctx.to_call.min(ctx.stack))
        } else {
            NormalizedAction::Check
        };
    }

    if is_raise {
        NormalizedAction::Raise(clamped)
    } else {
        NormalizedAction::Bet(clamped)
    }
}

fn fallback(ctx: &RoundContext) -> NormalizedAction {
    if ctx.to_call == 0 {
        NormalizedAction::Check
    } else {
        NormalizedAction::Fold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision_ctx<'a>(
        action_history: &'a [ActionHistoryEntry],
        players: &'a [PlayerView],
        hero_hole_cards: &'a [String],
        board: &'a [String],
    ) -> DecisionContext<'a> {
        DecisionContext {
            table_id: "table-1",
            hand_id: "42",
            street: "flop",
            button_seat: 1,
            small_blind: 5,
            big_blind: 10,
            hero_seat: 2,
            hero_player_id: "player-2",
            hero_name: "Hero",
            hero_hole_cards,
            hero_stack: 985,
            hero_bet: 10,
            to_call: 0,
            min_raise_to: 20,
            board,
            pot: 40,
            players,
            action_history,
            server_time: "2026-07-31T00:00:00Z",
        }
    }

    #[test]
    fn structured_state_bytes_matches_its_own_serialized_length() {
        let players = vec![PlayerView {
            player_id: "player-2".to_string(),
            seat_id: 2,
            name: "Hero".to_string(),
            stack: 985,
            bet: 10,
            folded: false,
            all_in: false,
            is_hero: true,
        }];
        let hole_cards = vec!["As".to_string(), "Kd".to_string()];
        let board = vec!["2c".to_string(), "7h".to_string(), "Qs".to_string()];
        let history = vec![];
        let ctx = decision_ctx(&history, &players, &hole_cards, &board);

        let encoded = ProtocolAdapter::build_structured(&ctx).unwrap();
        let decoded: StructuredDecisionState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.meta.state_bytes, encoded.len());
    }

    #[test]
    fn structured_state_bytes_stays_correct_with_a_long_action_history() {
        let players = vec![PlayerView {
            player_id: "player-2".to_string(),
            seat_id: 2,
            name: "Hero".to_string(),
            stack: 985,
            bet: 10,
            folded: false,
            all_in: false,
            is_hero: true,
        }];
        let hole_cards = vec!["As".to_string(), "Kd".to_string()];
        let board = vec!["2c".to_string(), "7h".to_string(), "Qs".to_string()];
        let history: Vec<ActionHistoryEntry> = (0..200)
            .map(|i| ActionHistoryEntry {
                index: i,
                street: "preflop".to_string(),
                player_id: format!("player-{}", i % 6),
                seat_id: (i % 6) as u8 + 1,
                action: "call".to_string(),
                amount: 10,
                pot_after: 10 * i as i64,
            })
            .collect();
        let ctx = decision_ctx(&history, &players, &hole_cards, &board);

        let encoded = ProtocolAdapter::build_structured(&ctx).unwrap();
        let decoded: StructuredDecisionState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.meta.state_bytes, encoded.len());
    }

    fn ctx(to_call: i64, current_bet: i64, min_raise_to: i64, stack: i64, bet: i64) -> RoundContext {
        RoundContext {
            to_call,
            current_bet,
            min_raise_to,
            stack,
            bet,
        }
    }

    #[test]
    fn unknown_action_falls_back_to_fold_when_facing_a_bet() {
        let c = ctx(50, 100, 200, 1000, 0);
        let raw = RawAction {
            action: "yolo".into(),
            amount: None,
        };
        assert_eq!(normalize_action(&raw, &c), NormalizedAction::Fold);
    }

    #[test]
    fn fold_when_free_becomes_check() {
        let c = ctx(0, 0, 100, 1000, 0);
        let raw = RawAction {
            action: "fold".into(),
            amount: None,
        };
        assert_eq!(normalize_action(&raw, &c), NormalizedAction::Check);
    }

    #[test]
    fn bet_when_facing_a_bet_is_coerced_to_raise() {
        let c = ctx(50, 50, 150, 1000, 0);
        let raw = RawAction {
            action: "bet".into(),
            amount: Some(200),
        };
        assert_eq!(normalize_action(&raw, &c), NormalizedAction::Raise(200));
    }

    #[test]
    fn raise_amount_clamps_to_min_raise_to() {
        let c = ctx(50, 50, 150, 1000, 0);
        let raw = RawAction {
            action: "raise".into(),
            amount: Some(60),
        };
        assert_eq!(normalize_action(&raw, &c), NormalizedAction::Raise(150));
    }

    #[test]
    fn raise_amount_clamps_to_all_in_when_short() {
        let c = ctx(50, 50, 150, 80, 0);
        let raw = RawAction {
            action: "raise".into(),
            amount: Some(500),
        };
        assert_eq!(normalize_action(&raw, &c), NormalizedAction::Raise(80));
    }

    #[test]
    fn undersized_raise_degrades_to_call() {
        let c = ctx(50, 50, 150, 20, 0);
        let raw = RawAction {
            action: "raise".into(),
            amount: Some(60),
        };
        assert_eq!(normalize_action(&raw, &c), NormalizedAction::Call(20));
    }

    #[test]
    fn call_amount_caps_at_stack() {
        let c = ctx(500, 500, 1000, 100, 0);
        let raw = RawAction {
            action: "call".into(),
            amount: None,
        };
        assert_eq!(normalize_action(&raw, &c), NormalizedAction::Call(100));
    }
}
