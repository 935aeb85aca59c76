//! Runs a short demo match against one or more uploaded bot archives,
//! printing each hand's history text and the final leaderboard.
//!
//! Grounded on `poker-bin/src/bin/manual-game.rs`'s `structopt`-driven CLI
//! shape, but drives `poker_engine::MatchScheduler` instead of a manually
//! typed-in hand.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use poker_bots::archive;
use poker_bots::artifact::ArtifactStore;
use poker_core::seat::SeatId;
use poker_engine::{EngineConfig, MatchScheduler};
use structopt::StructOpt;

#[derive(StructOpt)]
struct Opt {
    /// Path to a bot archive (.zip) to register. Repeat for up to six bots.
    #[structopt(long = "bot")]
    bots: Vec<PathBuf>,

    /// Number of hands to let the match play before stopping.
    #[structopt(long, default_value = "5")]
    hands: u64,

    /// Working directory for artifacts and hand history files.
    #[structopt(long, default_value = "./demo-workspace")]
    workspace: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let opt = Opt::from_args();

    if opt.bots.len() < 2 {
        return Err("at least two --bot archives are required to start a match".into());
    }

    let artifacts = ArtifactStore::new(opt.workspace.join("artifacts"));
    let hand_store = poker_engine::HandStore::new(opt.workspace.join("history"));
    let cfg = EngineConfig::default();

    let scheduler = MatchScheduler::new(
        "demo-table",
        cfg,
        hand_store,
        "poker-bots/runtime/bot_runner.py",
        |record, deltas, seat_names| {
            println!("-- hand {} complete --", record.hand_id);
            for (seat, delta) in deltas {
                let name = seat_names.get(seat).map(String::as_str).unwrap_or("?");
                println!("  seat {seat} ({name}): {delta:+}");
            }
        },
    );

    for (i, bot_path) in opt.bots.iter().enumerate() {
        let seat = SeatId::new(i as u8 + 1).map_err(|e| e.to_string())?;
        let bytes = std::fs::read(bot_path)?;
        let filename = bot_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("bot.zip");
        let validated = archive::validate(&bytes, filename)?;
        let bot_id = format!("bot-{}", i + 1);
        let artifact = artifacts.store(&bot_id, filename, &bytes)?;
        archive::extract_safely(&bytes, artifact.storage_path.parent().unwrap())?;

        let mut registry = scheduler.registry().lock().unwrap();
        registry.register_bot(
            seat,
            filename,
            &artifact,
            Some(&bot_id),
            &EngineConfig::default().sandbox_config(),
            validated.declared_protocol_version.as_deref(),
        )?;
    }

    scheduler.start_match()?;
    for _ in 0..opt.hands {
        thread::sleep(Duration::from_millis(200));
    }
    scheduler.end_match()?;

    println!("-- leaderboard --");
    for row in scheduler.leaderboard().lock().unwrap().ranked() {
        println!(
            "{}: {} hands, {:.2} bb/hand",
            row.bot_id,
            row.hands_played,
            row.bb_per_hand()
        );
    }

    Ok(())
}
