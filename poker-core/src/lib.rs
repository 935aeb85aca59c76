pub mod bet;
pub mod cards;
pub mod hand;
pub mod pot;
pub mod seat;

pub use cards::{Card, Deck, Rank, Suit};
pub use hand::HandRank;
pub use pot::Currency;
pub use seat::SeatId;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum GameError {
    #[display(fmt = "not enough active seats to play a hand")]
    NotEnoughSeats,
    #[display(fmt = "seat {} is not active in this hand", _0)]
    SeatNotActive(SeatId),
    #[display(fmt = "seat {} acted out of turn", _0)]
    OutOfTurn(SeatId),
    #[display(fmt = "chip conservation invariant violated")]
    ChipConservationViolated,
}
