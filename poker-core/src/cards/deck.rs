use super::card::{all_cards, Card};
use rand::prelude::*;
use rand_chacha::ChaChaRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SEED_LEN: usize = 32;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum DeckError {
    #[display(fmt = "deck is out of cards")]
    OutOfCards,
    #[display(fmt = "deck seed must be {} hex bytes", SEED_LEN)]
    BadSeedEncoding,
}

/// 52 cards, dealt from the top (end of the Vec) down.
///
/// Determinism: `seeded_shuffle` sorts before shuffling so the same seed
/// always produces the same order regardless of the deck's prior state.
#[derive(Debug, PartialEq)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Default for Deck {
    fn default() -> Self {
        let mut d = Deck {
            cards: all_cards().to_vec(),
        };
        d.shuffle();
        d
    }
}

impl Deck {
    pub fn new(seed: &DeckSeed) -> Self {
        let mut d = Self {
            cards: all_cards().to_vec(),
        };
        d.seeded_shuffle(seed);
        d
    }

    pub fn shuffle(&mut self) {
        self.seeded_shuffle(&DeckSeed::default());
    }

    pub fn seeded_shuffle(&mut self, seed: &DeckSeed) {
        let mut rng = ChaChaRng::from_seed(seed.0);
        self.cards.sort_unstable_by_key(|c| (c.suit, c.rank));
        self.cards.shuffle(&mut rng);
    }

    pub fn draw(&mut self) -> Result<Card, DeckError> {
        self.cards.pop().ok_or(DeckError::OutOfCards)
    }

    pub fn remaining(&self) -> usize {
        self.cards.len()
    }

    /// Deal two hole cards to each of `num_seats` seats, alternating one card
    /// at a time the way a live dealer would. Burn cards are not modeled, per
    /// spec.md §4.5.
    pub fn deal_hole_cards(&mut self, num_seats: usize) -> Result<Vec<[Card; 2]>, DeckError> {
        let mut first = Vec::with_capacity(num_seats);
        for _ in 0..num_seats {
            first.push(self.draw()?);
        }
        let mut pockets = Vec::with_capacity(num_seats);
        for c1 in first {
            let c2 = self.draw()?;
            pockets.push([c1, c2]);
        }
        Ok(pockets)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeckSeed([u8; SEED_LEN]);

impl DeckSeed {
    pub const fn new(b: [u8; SEED_LEN]) -> Self {
        Self(b)
    }
}

impl Default for DeckSeed {
    fn default() -> Self {
        let mut b = [0u8; SEED_LEN];
        thread_rng().fill_bytes(&mut b);
        Self(b)
    }
}

impl fmt::Display for DeckSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for DeckSeed {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SEED_LEN * 2 {
            return Err(DeckError::BadSeedEncoding);
        }
        let mut b = [0u8; SEED_LEN];
        for (i, byte) in b.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| DeckError::BadSeedEncoding)?;
        }
        Ok(DeckSeed(b))
    }
}

impl Serialize for DeckSeed {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeckSeed {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
