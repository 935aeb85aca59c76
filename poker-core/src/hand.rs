//! Best-of-seven hand evaluation, per spec.md §4.1.
//!
//! Grounded on `poker-core/src/cards/hand.rs`'s `which()` classification
//! order and wheel-straight handling, restructured so the result is a single
//! `Ord` key (category, tiebreak vector) rather than a `beats_*` dispatch
//! table: `HandRank` derives `Ord` directly, so "return the maximum key,
//! total order" falls out of `Iterator::max` instead of a bespoke comparator.

use crate::cards::{Card, Rank};
use itertools::Itertools;

/// A totally ordered, stable key: higher `HandRank` always wins at showdown.
/// `category` dominates; `tiebreak` is compared lexicographically within a
/// tied category. Both fields use raw rank values (2..=14) so no information
/// is lost comparing across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandRank {
    category: u8,
    tiebreak: [u8; 5],
}

impl HandRank {
    pub fn category(&self) -> u8 {
        self.category
    }
}

fn rank_of_five(cards: [Card; 5]) -> HandRank {
    let mut sorted = cards;
    sorted.sort_unstable_by_key(|c| std::cmp::Reverse(c.rank.value()));

    let is_flush = sorted.iter().map(|c| c.suit).dedup().count() == 1;
    let straight_high = straight_high(&sorted);

    let mut by_rank: Vec<(Rank, u8)> = sorted
        .iter()
        .map(|c| c.rank)
        .dedup_with_count()
        .map(|(n, r)| (r, n as u8))
        .collect();
    // dedup_with_count needs adjacent duplicates; ranks were sorted descending by value above,
    // equal ranks are adjacent, so this holds.
    by_rank.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

    let counts: Vec<u8> = by_rank.iter().map(|(_, n)| *n).collect();
    let ranks_desc: Vec<u8> = by_rank.iter().map(|(r, _)| r.value()).collect();

    if let Some(high) = straight_high {
        if is_flush {
            return HandRank {
                category: 8,
                tiebreak: pad([high]),
            };
        }
    }
    if counts[0] == 4 {
        return HandRank {
            category: 7,
            tiebreak: pad([ranks_desc[0], ranks_desc[1]]),
        };
    }
    if counts[0] == 3 && counts.get(1) == Some(&2) {
        return HandRank {
            category: 6,
            tiebreak: pad([ranks_desc[0], ranks_desc[1]]),
        };
    }
    if is_flush {
        return HandRank {
            category: 5,
            tiebreak: pad_slice(&ranks_desc),
        };
    }
    if let Some(high) = straight_high {
        return HandRank {
            category: 4,
            tiebreak: pad([high]),
        };
    }
    if counts[0] == 3 {
        return HandRank {
            category: 3,
            tiebreak: pad_slice(&ranks_desc),
        };
    }
    if counts[0] == 2 && counts.get(1) == Some(&2) {
        return HandRank {
            category: 2,
            tiebreak: pad([ranks_desc[0], ranks_desc[1], ranks_desc[2]]),
        };
    }
    if counts[0] == 2 {
        return HandRank {
            category: 1,
            tiebreak: pad_slice(&ranks_desc),
        };
    }
    HandRank {
        category: 0,
        tiebreak: pad_slice(&ranks_desc),
    }
}

/// Returns the rank value of the high card of a straight, if any, special-casing the
/// wheel (A-2-3-4-5, whose high card for ranking purposes is the 5). `sorted` must be
/// sorted descending by rank value.
fn straight_high(sorted: &[Card; 5]) -> Option<u8> {
    let values: Vec<i16> = sorted.iter().map(|c| c.rank.value() as i16).collect();
    if values == [14, 5, 4, 3, 2] {
        return Some(5);
    }
    for w in values.windows(2) {
        if w[0] - w[1] != 1 {
            return None;
        }
    }
    // all distinct and consecutive descending (duplicate ranks would have produced some
    // window with a delta of 0, already rejected above)
    Some(values[0] as u8)
}

fn pad(vals: impl IntoIterator<Item = u8>) -> [u8; 5] {
    let mut out = [0u8; 5];
    for (slot, v) in out.iter_mut().zip(vals) {
        *slot = v;
    }
    out
}

fn pad_slice(vals: &[u8]) -> [u8; 5] {
    pad(vals.iter().copied())
}

/// Best 5-card hand out of exactly 7 cards (2 hole + 5 board), per spec.md §4.1:
/// enumerate all C(7,5) = 21 combinations and return the maximum key.
pub fn best_of_seven(cards: &[Card; 7]) -> HandRank {
    cards
        .iter()
        .copied()
        .combinations(5)
        .map(|c| rank_of_five([c[0], c[1], c[2], c[3], c[4]]))
        .max()
        .expect("21 combinations of 7 choose 5 is never empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::Suit;

    fn card(rank: Rank, suit: Suit) -> Card {
        Card::new(suit, rank)
    }

    #[test]
    fn straight_flush_beats_quads() {
        let sf = [
            card(Rank::Nine, Suit::Club),
            card(Rank::Eight, Suit::Club),
            card(Rank::Seven, Suit::Club),
            card(Rank::Six, Suit::Club),
            card(Rank::Five, Suit::Club),
        ];
        let quads = [
            card(Rank::Ace, Suit::Club),
            card(Rank::Ace, Suit::Diamond),
            card(Rank::Ace, Suit::Heart),
            card(Rank::Ace, Suit::Spade),
            card(Rank::King, Suit::Club),
        ];
        assert!(rank_of_five(sf) > rank_of_five(quads));
    }

    #[test]
    fn wheel_straight_ranks_as_five_high() {
        let wheel = [
            card(Rank::Ace, Suit::Club),
            card(Rank::Two, Suit::Diamond),
            card(Rank::Three, Suit::Heart),
            card(Rank::Four, Suit::Spade),
            card(Rank::Five, Suit::Club),
        ];
        let six_high = [
            card(Rank::Two, Suit::Club),
            card(Rank::Three, Suit::Diamond),
            card(Rank::Four, Suit::Heart),
            card(Rank::Five, Suit::Spade),
            card(Rank::Six, Suit::Club),
        ];
        assert_eq!(rank_of_five(wheel).category(), 4);
        assert!(rank_of_five(six_high) > rank_of_five(wheel));
    }

    #[test]
    fn category_monotonicity_by_inclusion() {
        let straight = [
            card(Rank::Nine, Suit::Club),
            card(Rank::Eight, Suit::Diamond),
            card(Rank::Seven, Suit::Heart),
            card(Rank::Six, Suit::Spade),
            card(Rank::Five, Suit::Club),
        ];
        assert!(rank_of_five(straight).category() >= 4);
        let flush = [
            card(Rank::Nine, Suit::Club),
            card(Rank::Two, Suit::Club),
            card(Rank::Seven, Suit::Club),
            card(Rank::Six, Suit::Club),
            card(Rank::Jack, Suit::Club),
        ];
        assert!(rank_of_five(flush).category() >= 5);
    }

    #[test]
    fn best_of_seven_ignores_permutation() {
        let cards = [
            card(Rank::Ace, Suit::Spade),
            card(Rank::King, Suit::Spade),
            card(Rank::Queen, Suit::Spade),
            card(Rank::Jack, Suit::Spade),
            card(Rank::Ten, Suit::Spade),
            card(Rank::Two, Suit::Club),
            card(Rank::Three, Suit::Diamond),
        ];
        let base = best_of_seven(&cards);
        let mut permuted = cards;
        permuted.reverse();
        assert_eq!(base, best_of_seven(&permuted));
        assert_eq!(base.category(), 8); // royal, a straight flush
    }

    #[test]
    fn full_house_beats_flush() {
        let boat = [
            card(Rank::Three, Suit::Club),
            card(Rank::Three, Suit::Diamond),
            card(Rank::Three, Suit::Heart),
            card(Rank::Four, Suit::Spade),
            card(Rank::Four, Suit::Club),
        ];
        let flush = [
            card(Rank::Ace, Suit::Spade),
            card(Rank::Ten, Suit::Spade),
            card(Rank::Eight, Suit::Spade),
            card(Rank::Six, Suit::Spade),
            card(Rank::Two, Suit::Spade),
        ];
        assert!(rank_of_five(boat) > rank_of_five(flush));
    }

    #[test]
    fn ties_split_equal_keys() {
        let a = [
            card(Rank::King, Suit::Club),
            card(Rank::King, Suit::Diamond),
            card(Rank::Four, Suit::Heart),
            card(Rank::Three, Suit::Spade),
            card(Rank::Two, Suit::Club),
        ];
        let b = [
            card(Rank::King, Suit::Heart),
            card(Rank::King, Suit::Spade),
            card(Rank::Four, Suit::Diamond),
            card(Rank::Three, Suit::Club),
            card(Rank::Two, Suit::Diamond),
        ];
        assert_eq!(rank_of_five(a), rank_of_five(b));
    }
}
