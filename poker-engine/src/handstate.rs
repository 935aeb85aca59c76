//! Plays exactly one hand end to end, per spec.md §4.5.
//!
//! Generalizes the teacher's `poker-core::state::GameState` (2-12 players,
//! one persistent game, DB replay log) down to spec.md's exact rules,
//! cross-checked against `original_source/backend/app/engine/game.py::
//! PokerEngine.play_hand` / `_run_betting_round` for blind posting,
//! per-street reset, and payout order.

use std::collections::HashMap;
use std::sync::Arc;

use poker_bots::protocol::{
    self, ActionHistoryEntry, DecisionContext, NormalizedAction, PlayerView, ProtocolAdapter,
    RawAction, RoundContext,
};
use poker_bots::sandbox::{decide_checked, BotHandle, DecisionPool};
use poker_core::bet::BetAction;
use poker_core::cards::{Card, Deck, DeckSeed};
use poker_core::hand::best_of_seven;
use poker_core::pot::{Currency, Pot};
use poker_core::seat::SeatId;

use crate::config::EngineConfig;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum EngineError {
    #[display(fmt = "at least two active seats are required to play a hand")]
    NotEnoughSeats,
    #[display(fmt = "chip conservation invariant violated: {}", _0)]
    Invariant(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Street {
    Preflop,
    Flop,
    Turn,
    River,
}

impl Street {
    fn label(&self) -> &'static str {
        match self {
            Street::Preflop => "preflop",
            Street::Flop => "flop",
            Street::Turn => "turn",
            Street::River => "river",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionEvent {
    pub seat: SeatId,
    pub action: String,
    pub amount: i64,
    pub street: String,
    pub pot_after: i64,
}

#[derive(Debug, Clone)]
pub struct HandResult {
    pub hand_id: String,
    pub button: SeatId,
    pub winners: Vec<SeatId>,
    pub pot: Currency,
    pub board: Vec<Card>,
    pub hole_cards: HashMap<SeatId, [Card; 2]>,
    pub actions: Vec<ActionEvent>,
    pub deltas: HashMap<SeatId, Currency>,
    pub contributions: HashMap<SeatId, Currency>,
    pub active_seats: Vec<SeatId>,
}

pub struct HandInput<'a> {
    pub hand_id: &'a str,
    pub table_id: &'a str,
    pub bot_handles: &'a HashMap<SeatId, Arc<dyn BotHandle>>,
    pub seat_names: &'a HashMap<SeatId, String>,
    /// Per-seat protocol version statically declared in the bot's source
    /// (`ArchiveValidator::declared_protocol_version`), per spec.md §4.4.
    /// A seat with no entry gets the legacy ("1.0") wire format.
    pub protocol_versions: &'a HashMap<SeatId, String>,
    pub button_seat: SeatId,
    pub deck_seed: DeckSeed,
}

struct Seat {
    stack: Currency,
    bet: Currency,
    folded: bool,
}

/// Plays one hand and returns its full result. `active` (the domain of
/// `input.bot_handles`) must contain at least two seats.
pub fn play_hand(
    input: HandInput,
    cfg: &EngineConfig,
    pool: &DecisionPool,
) -> Result<HandResult, EngineError> {
    let mut active: Vec<SeatId> = input.bot_handles.keys().copied().collect();
    active.sort();
    if active.len() < 2 {
        return Err(EngineError::NotEnoughSeats);
    }

    let button = if active.contains(&input.button_seat) {
        input.button_seat
    } else {
        active[0]
    };

    let small_blind = Currency::from(cfg.small_blind_units as i32);
    let big_blind = Currency::from(cfg.big_blind_units as i32);
    let starting_stack = Currency::from(cfg.starting_stack_units as i32);

    let (sb_seat, bb_seat, preflop_actor, postflop_actor) = if active.len() == 2 {
        let other = button.next_active(&active);
        (button, other, button, other)
    } else {
        let sb = button.next_active(&active);
        let bb = sb.next_active(&active);
        let preflop = bb.next_active(&active);
        (sb, bb, preflop, button)
    };

    let mut seats: HashMap<SeatId, Seat> = active
        .iter()
        .map(|&s| {
            (
                s,
                Seat {
                    stack: starting_stack,
                    bet: Currency::default(),
                    folded: false,
                },
            )
        })
        .collect();

    let mut deck = Deck::new(&input.deck_seed);
    let dealt = deck
        .deal_hole_cards(active.len())
        .map_err(|e| EngineError::Invariant(e.to_string()))?;
    let hole_cards: HashMap<SeatId, [Card; 2]> =
        active.iter().copied().zip(dealt).collect();

    let mut board: Vec<Card> = Vec::new();
    let mut pot = Pot::default();
    let mut actions: Vec<ActionEvent> = Vec::new();
    let mut contributions: HashMap<SeatId, Currency> =
        active.iter().map(|&s| (s, Currency::default())).collect();

    post_blind(&mut seats, sb_seat, small_blind, &mut pot, &mut actions, &mut contributions);
    post_blind(&mut seats, bb_seat, big_blind, &mut pot, &mut actions, &mut contributions);
    pot.finalize_round();

    let mut folded_winner: Option<SeatId> = None;
    let mut current_bet = seats[&bb_seat].bet;
    let mut min_raise = big_blind;
    let street_starts = [
        (Street::Preflop, preflop_actor),
        (Street::Flop, postflop_actor),
        (Street::Turn, postflop_actor),
        (Street::River, postflop_actor),
    ];

    for (i, (street, starting_actor)) in street_starts.into_iter().enumerate() {
        if i > 0 {
            for seat in seats.values_mut() {
                seat.bet = Currency::default();
            }
            current_bet = Currency::default();
            min_raise = big_blind;
            match street {
                Street::Flop => deal_board(&mut deck, &mut board, 3)
                    .map_err(|e| EngineError::Invariant(e.to_string()))?,
                Street::Turn | Street::River => deal_board(&mut deck, &mut board, 1)
                    .map_err(|e| EngineError::Invariant(e.to_string()))?,
                Street::Preflop => unreachable!(),
            }
        }

        let no_action_shortcut = active
            .iter()
            .filter(|s| !seats[s].folded)
            .all(|s| seats[s].stack == Currency::default());
        if no_action_shortcut {
            continue;
        }

        folded_winner = run_betting_round(
            &street,
            starting_actor,
            &mut active,
            &mut seats,
            &hole_cards,
            &board,
            input.bot_handles,
            input.seat_names,
            input.protocol_versions,
            &mut pot,
            &mut current_bet,
            &mut min_raise,
            &mut actions,
            &mut contributions,
            input.table_id,
            input.hand_id,
            button,
            small_blind,
            big_blind,
            cfg,
            pool,
        );
        pot.finalize_round();
        if folded_winner.is_some() {
            break;
        }
    }

    if folded_winner.is_none() && board.len() < 5 {
        deal_board(&mut deck, &mut board, 5 - board.len())
            .map_err(|e| EngineError::Invariant(e.to_string()))?;
    }

    let total_pot = pot.total_value();
    let (winners, payouts) = if let Some(winner) = folded_winner {
        let mut hm = HashMap::new();
        hm.insert(winner, total_pot);
        (vec![winner], hm)
    } else {
        let ranked = showdown(&active, &seats, &hole_cards, &board);
        let winners = ranked.first().cloned().unwrap_or_default();
        (winners, pot.payout(&ranked))
    };

    let sum_contributions: Currency = contributions.values().copied().sum();
    if sum_contributions != total_pot {
        return Err(EngineError::Invariant(format!(
            "contributions {} != pot {}",
            sum_contributions, total_pot
        )));
    }

    let mut deltas = HashMap::new();
    for &seat in &active {
        let payout = payouts.get(&seat).copied().unwrap_or_default();
        deltas.insert(seat, payout - contributions[&seat]);
    }

    let mut active_seats = active.clone();
    active_seats.sort();

    Ok(HandResult {
        hand_id: input.hand_id.to_string(),
        button,
        winners,
        pot: total_pot,
        board,
        hole_cards,
        actions,
        deltas,
        contributions,
        active_seats,
    })
}

fn post_blind(
    seats: &mut HashMap<SeatId, Seat>,
    seat_id: SeatId,
    amount: Currency,
    pot: &mut Pot,
    actions: &mut Vec<ActionEvent>,
    contributions: &mut HashMap<SeatId, Currency>,
) {
    let seat = seats.get_mut(&seat_id).expect("blind seat must be active");
    let actual = amount.min(seat.stack);
    seat.stack -= actual;
    seat.bet += actual;
    *contributions.get_mut(&seat_id).unwrap() += actual;
    let action = if seat.stack == Currency::default() {
        BetAction::AllIn(seat.bet)
    } else {
        BetAction::Call(seat.bet)
    };
    pot.bet(seat_id, action);
    actions.push(ActionEvent {
        seat: seat_id,
        action: "blind".to_string(),
        amount: *actual as i64,
        street: Street::Preflop.label().to_string(),
        pot_after: *pot.total_value() as i64,
    });
}

fn deal_board(
    deck: &mut Deck,
    board: &mut Vec<Card>,
    n: usize,
) -> Result<(), poker_core::cards::DeckError> {
    for _ in 0..n {
        board.push(deck.draw()?);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_betting_round(
    street: &Street,
    starting_seat: SeatId,
    active: &mut Vec<SeatId>,
    seats: &mut HashMap<SeatId, Seat>,
    hole_cards: &HashMap<SeatId, [Card; 2]>,
    board: &[Card],
    bot_handles: &HashMap<SeatId, Arc<dyn BotHandle>>,
    seat_names: &HashMap<SeatId, String>,
    protocol_versions: &HashMap<SeatId, String>,
    pot: &mut Pot,
    current_bet: &mut Currency,
    min_raise: &mut Currency,
    actions: &mut Vec<ActionEvent>,
    contributions: &mut HashMap<SeatId, Currency>,
    table_id: &str,
    hand_id: &str,
    button: SeatId,
    small_blind: Currency,
    big_blind: Currency,
    cfg: &EngineConfig,
    pool: &DecisionPool,
) -> Option<SeatId> {
    let mut pending: Vec<SeatId> = active
        .iter()
        .copied()
        .filter(|s| seats[s].stack > Currency::default())
        .collect();
    pending.sort();
    if pending.is_empty() {
        return None;
    }

    let mut seat = if pending.contains(&starting_seat) {
        starting_seat
    } else {
        starting_seat.next_active(&pending)
    };

    loop {
        let to_call = *current_bet - seats[&seat].bet;
        let min_raise_to = if *current_bet == Currency::default() {
            *min_raise
        } else {
            *current_bet + *min_raise
        };

        let players: Vec<PlayerView> = active
            .iter()
            .map(|&s| PlayerView {
                player_id: s.to_string(),
                seat_id: s.get(),
                name: seat_names.get(&s).cloned().unwrap_or_default(),
                stack: *seats[&s].stack as i64,
                bet: *seats[&s].bet as i64,
                folded: seats[&s].folded,
                all_in: seats[&s].stack == Currency::default() && !seats[&s].folded,
                is_hero: s == seat,
            })
            .collect();

        let action_history: Vec<ActionHistoryEntry> = actions
            .iter()
            .enumerate()
            .map(|(i, e)| ActionHistoryEntry {
                index: i,
                street: e.street.clone(),
                player_id: e.seat.to_string(),
                seat_id: e.seat.get(),
                action: e.action.clone(),
                amount: e.amount,
                pot_after: e.pot_after,
            })
            .collect();

        let hero_hole: Vec<String> = hole_cards[&seat].iter().map(|c| c.to_string()).collect();
        let board_strs: Vec<String> = board.iter().map(|c| c.to_string()).collect();

        let ctx = DecisionContext {
            table_id,
            hand_id,
            street: street.label(),
            button_seat: button.get(),
            small_blind: *small_blind as i64,
            big_blind: *big_blind as i64,
            hero_seat: seat.get(),
            hero_player_id: &seat.to_string(),
            hero_name: seat_names.get(&seat).map(String::as_str).unwrap_or(""),
            hero_hole_cards: &hero_hole,
            hero_stack: *seats[&seat].stack as i64,
            hero_bet: *seats[&seat].bet as i64,
            to_call: *to_call as i64,
            min_raise_to: *min_raise_to as i64,
            board: &board_strs,
            pot: *pot.total_value() as i64,
            players: &players,
            action_history: &action_history,
            server_time: "",
        };

        let declared_version = protocol_versions.get(&seat).map(String::as_str);
        let state_json = ProtocolAdapter::build(&ctx, declared_version).unwrap_or_default();
        let handle = bot_handles.get(&seat).expect("acting seat must have a bot");
        let sandbox_cfg = cfg.sandbox_config();
        let decision = decide_checked(handle.as_ref(), &state_json, &sandbox_cfg, pool);

        let round_ctx = RoundContext {
            to_call: *to_call as i64,
            current_bet: *current_bet as i64,
            min_raise_to: *min_raise_to as i64,
            stack: *seats[&seat].stack as i64,
            bet: *seats[&seat].bet as i64,
        };
        let raw = RawAction {
            action: decision.action.clone(),
            amount: Some(decision.amount),
        };
        let normalized = protocol::normalize_action(&raw, &round_ctx);

        match normalized {
            NormalizedAction::Fold => {
                seats.get_mut(&seat).unwrap().folded = true;
                active.retain(|s| *s != seat);
                actions.push(ActionEvent {
                    seat,
                    action: "fold".to_string(),
                    amount: 0,
                    street: street.label().to_string(),
                    pot_after: *pot.total_value() as i64,
                });
                if active.len() == 1 {
                    return Some(active[0]);
                }
                pending.retain(|s| *s != seat);
            }
            NormalizedAction::Check => {
                actions.push(ActionEvent {
                    seat,
                    action: "check".to_string(),
                    amount: 0,
                    street: street.label().to_string(),
                    pot_after: *pot.total_value() as i64,
                });
                pending.retain(|s| *s != seat);
            }
            NormalizedAction::Call(delta) => {
                apply_contribution(
                    seats, pot, contributions, seat, Currency::from(delta as i32), false,
                );
                actions.push(ActionEvent {
                    seat,
                    action: "call".to_string(),
                    amount: delta,
                    street: street.label().to_string(),
                    pot_after: *pot.total_value() as i64,
                });
                pending.retain(|s| *s != seat);
            }
            NormalizedAction::Bet(target) | NormalizedAction::Raise(target) => {
                let target = Currency::from(target as i32);
                let before = seats[&seat].bet;
                let delta = (target - before).max(Currency::default()).min(seats[&seat].stack);
                apply_contribution(seats, pot, contributions, seat, delta, true);
                let raise_size = seats[&seat].bet - *current_bet;
                *current_bet = seats[&seat].bet;
                *min_raise = raise_size.max(*min_raise);
                actions.push(ActionEvent {
                    seat,
                    action: if matches!(normalized, NormalizedAction::Raise(_)) {
                        "raise".to_string()
                    } else {
                        "bet".to_string()
                    },
                    amount: *delta as i64,
                    street: street.label().to_string(),
                    pot_after: *pot.total_value() as i64,
                });
                pending = active
                    .iter()
                    .copied()
                    .filter(|s| *s != seat && seats[s].stack > Currency::default())
                    .collect();
                pending.sort();
            }
        }

        if pending.is_empty() {
            return None;
        }
        seat = seat.next_active(&pending);
    }
}

fn apply_contribution(
    seats: &mut HashMap<SeatId, Seat>,
    pot: &mut Pot,
    contributions: &mut HashMap<SeatId, Currency>,
    seat_id: SeatId,
    delta: Currency,
    is_bet_or_raise: bool,
) {
    let seat = seats.get_mut(&seat_id).unwrap();
    seat.stack -= delta;
    seat.bet += delta;
    *contributions.get_mut(&seat_id).unwrap() += delta;
    let is_allin = seat.stack == Currency::default();
    let action = if is_allin {
        BetAction::AllIn(seat.bet)
    } else if is_bet_or_raise {
        BetAction::Raise(seat.bet)
    } else {
        BetAction::Call(seat.bet)
    };
    pot.bet(seat_id, action);
}

fn showdown(
    active: &[SeatId],
    seats: &HashMap<SeatId, Seat>,
    hole_cards: &HashMap<SeatId, [Card; 2]>,
    board: &[Card],
) -> Vec<Vec<SeatId>> {
    let mut ranked: Vec<(SeatId, poker_core::hand::HandRank)> = active
        .iter()
        .filter(|s| !seats[s].folded)
        .map(|&s| {
            let mut seven = [board[0]; 7];
            seven[0] = hole_cards[&s][0];
            seven[1] = hole_cards[&s][1];
            seven[2..7].copy_from_slice(&board[..5]);
            (s, best_of_seven(&seven))
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut groups: Vec<(poker_core::hand::HandRank, Vec<SeatId>)> = Vec::new();
    for (seat, rank) in ranked {
        match groups.last_mut() {
            Some((last_rank, seats)) if *last_rank == rank => seats.push(seat),
            _ => groups.push((rank, vec![seat])),
        }
    }
    groups.into_iter().map(|(_, seats)| seats).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use poker_bots::sandbox::{Decision, FnBotHandle};

    fn passive_handle() -> Arc<dyn BotHandle> {
        Arc::new(FnBotHandle(|_state: &str| {
            Ok(Decision {
                action: "check".to_string(),
                amount: 0,
                error: None,
            })
        }))
    }

    fn folding_handle() -> Arc<dyn BotHandle> {
        Arc::new(FnBotHandle(|_state: &str| {
            Ok(Decision {
                action: "fold".to_string(),
                amount: 0,
                error: None,
            })
        }))
    }

    fn two_seat_setup() -> (
        HashMap<SeatId, Arc<dyn BotHandle>>,
        HashMap<SeatId, String>,
    ) {
        let s1 = SeatId::new(1).unwrap();
        let s2 = SeatId::new(2).unwrap();
        let mut handles: HashMap<SeatId, Arc<dyn BotHandle>> = HashMap::new();
        handles.insert(s1, passive_handle());
        handles.insert(s2, passive_handle());
        let mut names = HashMap::new();
        names.insert(s1, "Bot One".to_string());
        names.insert(s2, "Bot Two".to_string());
        (handles, names)
    }

    #[test]
    fn two_passive_bots_play_a_complete_hand() {
        let (handles, names) = two_seat_setup();
        let cfg = EngineConfig::default();
        let pool = DecisionPool::new(2);
        let input = HandInput {
            hand_id: "1",
            table_id: "table-1",
            bot_handles: &handles,
            seat_names: &names,
            protocol_versions: &HashMap::new(),
            button_seat: SeatId::new(1).unwrap(),
            deck_seed: DeckSeed::new(),
        };
        let result = play_hand(input, &cfg, &pool).unwrap();
        assert_eq!(result.board.len(), 5);
        let total_delta: i32 = result.deltas.values().map(|d| **d).sum();
        assert_eq!(total_delta, 0);
        assert!(*result.pot >= 200);
    }

    #[test]
    fn immediate_preflop_fold_awards_blinds() {
        let s1 = SeatId::new(1).unwrap();
        let s2 = SeatId::new(2).unwrap();
        let mut handles: HashMap<SeatId, Arc<dyn BotHandle>> = HashMap::new();
        handles.insert(s1, folding_handle());
        handles.insert(s2, passive_handle());
        let mut names = HashMap::new();
        names.insert(s1, "Folder".to_string());
        names.insert(s2, "Checker".to_string());

        let cfg = EngineConfig::default();
        let pool = DecisionPool::new(2);
        let input = HandInput {
            hand_id: "2",
            table_id: "table-1",
            bot_handles: &handles,
            seat_names: &names,
            protocol_versions: &HashMap::new(),
            button_seat: s1,
            deck_seed: DeckSeed::new(),
        };
        let result = play_hand(input, &cfg, &pool).unwrap();
        assert_eq!(result.winners, vec![s2]);
        assert_eq!(result.board.len(), 0);
        assert_eq!(*result.deltas[&s2], 50);
        assert_eq!(*result.deltas[&s1], -50);
    }

    /// A seat with a declared `protocol_version` of "2.0" receives the
    /// structured decision payload; a seat with no declared version falls
    /// back to the legacy flat payload, per spec.md §4.4.
    #[test]
    fn declared_protocol_version_selects_structured_payload() {
        let s1 = SeatId::new(1).unwrap();
        let s2 = SeatId::new(2).unwrap();
        let seen: Arc<std::sync::Mutex<HashMap<SeatId, String>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));

        let handle_for = |seat: SeatId, seen: Arc<std::sync::Mutex<HashMap<SeatId, String>>>| {
            Arc::new(FnBotHandle(move |state: &str| {
                seen.lock().unwrap().insert(seat, state.to_string());
                Ok(Decision {
                    action: "check".to_string(),
                    amount: 0,
                    error: None,
                })
            })) as Arc<dyn BotHandle>
        };

        let mut handles: HashMap<SeatId, Arc<dyn BotHandle>> = HashMap::new();
        handles.insert(s1, handle_for(s1, Arc::clone(&seen)));
        handles.insert(s2, handle_for(s2, Arc::clone(&seen)));
        let mut names = HashMap::new();
        names.insert(s1, "Structured".to_string());
        names.insert(s2, "Legacy".to_string());
        let mut versions = HashMap::new();
        versions.insert(s1, "2.0".to_string());

        let cfg = EngineConfig::default();
        let pool = DecisionPool::new(2);
        let input = HandInput {
            hand_id: "3",
            table_id: "table-1",
            bot_handles: &handles,
            seat_names: &names,
            protocol_versions: &versions,
            button_seat: s1,
            deck_seed: DeckSeed::new(),
        };
        play_hand(input, &cfg, &pool).unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen[&s1].contains("\"protocol_version\":\"2.0\""));
        assert!(!seen[&s2].contains("\"protocol_version\""));
    }
}
