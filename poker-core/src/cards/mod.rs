mod card;
mod deck;

pub use card::{all_cards, Card, Rank, Suit, ALL_RANKS, ALL_SUITS};
pub use deck::{Deck, DeckError, DeckSeed};
