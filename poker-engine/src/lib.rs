pub mod config;
pub mod handstate;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use config::{EngineConfig, SandboxBackend};
pub use handstate::{play_hand, ActionEvent, EngineError, HandInput, HandResult, Street};
pub use registry::{BotLoadError, Registry, SeatSnapshot};
pub use scheduler::{MatchScheduler, MatchSnapshot, MatchStatus, TransitionError};
pub use store::{
    format_hand_history, HandLog, HandRecord, HandStore, Leaderboard, LeaderboardRow, PnlEntry,
    StoreError,
};
