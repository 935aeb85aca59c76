//! Chip accounting and side-pot settlement, per spec.md §4.5.
//!
//! Grounded on `poker-core/src/game/pot.rs`: same incremental side-pot
//! construction (sort this round's stakes so all-in amounts come first,
//! smallest first; slice each stake across the existing pot ladder, opening
//! a new pot when a stake outruns every existing `max_in`) and the same
//! `split_x_by_y` leftover-chip distribution, re-keyed from `PlayerId` (i32)
//! to `SeatId`.

use crate::bet::BetAction;
use crate::seat::SeatId;
use derive_more::{Add, AddAssign, Div, From, Mul, Rem, Sub, SubAssign, Sum};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Minor-unit chip amount. Displayed as `$dollars.cents`, per SPEC_FULL §9 OQ4.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialOrd,
    Ord,
    PartialEq,
    Eq,
    Default,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    Div,
    Rem,
    Mul,
    Sum,
    From,
    Serialize,
    Deserialize,
    derive_more::Deref,
)]
pub struct Currency(i32);

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let dollars = self.0 / 100;
        let cents = (self.0 - dollars * 100).abs();
        write!(f, "${}.{:02}", dollars, cents)
    }
}

#[derive(Debug, Copy, Clone)]
struct Stake {
    is_allin: bool,
    amount: Currency,
}

impl From<(bool, Currency)> for Stake {
    fn from(tup: (bool, Currency)) -> Self {
        Self {
            is_allin: tup.0,
            amount: tup.1,
        }
    }
}

/// Divide `x` as evenly as possible `y` ways using only positive ints.
///
/// `split_x_by_y(5, 3) == [2, 2, 1]`: leftover chips go one-per-winner,
/// matching spec.md §4.5's "leftover chips distributed one-per-winner" rule.
///
/// # Panics
/// Panics if given a non-positive `x` or `y`.
fn split_x_by_y(x: i32, y: i32) -> Vec<i32> {
    assert!(y.is_positive());
    assert!(x.is_positive());
    let mut ret = Vec::with_capacity(y as usize);
    let mut frac_accum = 0;
    for i in 0..y {
        frac_accum += x % y;
        if frac_accum >= y || (i == y - 1 && frac_accum > 0) {
            ret.push((x / y) + 1);
        } else {
            ret.push(x / y);
        }
        if frac_accum >= y {
            frac_accum -= y;
        }
    }
    ret.sort_unstable();
    ret.reverse();
    ret
}

#[derive(Debug, Default)]
struct InnerPot {
    players: HashMap<SeatId, Stake>,
    max_in: Option<Currency>,
}

impl InnerPot {
    fn payout(self, ranked_seats: &[Vec<SeatId>]) -> HashMap<SeatId, Currency> {
        let mut hm = HashMap::new();
        for seat_group in ranked_seats {
            let winners: Vec<_> = seat_group
                .iter()
                .filter(|s| self.players.contains_key(s))
                .collect();
            if winners.is_empty() {
                continue;
            }
            let payouts = split_x_by_y(*self.value(), winners.len() as i32);
            for (seat, payout) in winners.into_iter().zip(payouts) {
                hm.insert(*seat, payout.into());
            }
            break;
        }
        hm
    }

    fn value(&self) -> Currency {
        self.players.values().map(|s| s.amount).sum()
    }
}

/// Accumulates per-street bets and settles them into side pots at showdown.
///
/// `bet()` is called with each seat's **cumulative** commitment for the
/// current street; `finalize_round()` must be called between streets; and
/// `payout()` consumes the pot once, at showdown, given seats grouped by
/// descending hand rank (ties share a group).
#[derive(Debug, Default)]
pub struct Pot {
    settled: Vec<InnerPot>,
    working: HashMap<SeatId, Stake>,
}

impl Pot {
    pub fn bet(&mut self, seat: SeatId, action: BetAction) {
        let stake: Stake = match action {
            BetAction::Check | BetAction::Fold => return,
            BetAction::Call(v) | BetAction::Bet(v) | BetAction::Raise(v) => (false, v).into(),
            BetAction::AllIn(v) => (true, v).into(),
        };
        self.working.insert(seat, stake);
    }

    /// Settle this street's bets into one or more `InnerPot`s, opening a new
    /// side pot whenever a stake exceeds every existing pot's `max_in`.
    pub fn finalize_round(&mut self) {
        let mut pots: Vec<InnerPot> = vec![];
        let ordered: Vec<_> = self
            .working
            .drain()
            .sorted_unstable_by(|l, r| match (l.1.is_allin, r.1.is_allin) {
                (true, true) => l.1.amount.cmp(&r.1.amount),
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => Ordering::Equal,
            })
            .collect();

        for (seat, mut stake) in ordered {
            for pot in pots.iter_mut() {
                match pot.max_in {
                    None => {
                        pot.players.insert(seat, stake);
                        stake.amount = 0.into();
                        break;
                    }
                    Some(max_in) => match stake.amount.cmp(&max_in) {
                        Ordering::Less | Ordering::Equal => {
                            pot.players.insert(seat, stake);
                            stake.amount = 0.into();
                            break;
                        }
                        Ordering::Greater => {
                            pot.players.insert(seat, (stake.is_allin, max_in).into());
                            stake.amount -= max_in;
                        }
                    },
                }
            }
            if stake.amount > 0.into() {
                let mut new = InnerPot {
                    max_in: stake.is_allin.then_some(stake.amount),
                    ..Default::default()
                };
                new.players.insert(seat, stake);
                pots.push(new);
            }
        }
        self.settled.append(&mut pots);
    }

    pub fn total_value(&self) -> Currency {
        let settled: Currency = self.settled.iter().map(InnerPot::value).sum();
        let working: Currency = self.working.values().map(|s| s.amount).sum();
        settled + working
    }

    /// Consume the pot, paying out every settled side pot to the best
    /// eligible seat(s). `ranked_seats[0]` is the best hand(s) (a tie shares
    /// a slot); only seats still eligible to showdown (not folded) should be
    /// present anywhere in `ranked_seats`.
    pub fn payout(mut self, ranked_seats: &[Vec<SeatId>]) -> HashMap<SeatId, Currency> {
        if !self.working.is_empty() {
            self.finalize_round();
        }
        let mut hm: HashMap<SeatId, Currency> = HashMap::new();
        for pot in self.settled {
            for (seat, amount) in pot.payout(ranked_seats) {
                *hm.entry(seat).or_insert_with(|| 0.into()) += amount;
            }
        }
        hm
    }
}


#[cfg(test)]
mod test_split_x_by_y {
    use super::split_x_by_y;

    #[test]
    fn uneven_split_front_loads_remainder() {
        assert_eq!(split_x_by_y(5, 3), vec![2, 2, 1]);
        assert_eq!(split_x_by_y(8, 5), vec![2, 2, 2, 1, 1]);
    }

    #[test]
    fn even_split() {
        assert_eq!(split_x_by_y(6, 2), vec![3, 3]);
    }
}
