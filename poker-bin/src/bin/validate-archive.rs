//! Validates a bot archive against spec.md §4.2 without registering it
//! anywhere, for bot authors iterating locally. Mirrors the single-purpose
//! shape of `poker-bin/src/bin/foo.rs`.

use std::env;
use std::fs;
use std::process::ExitCode;

use poker_bots::archive;

fn main() -> ExitCode {
    let path = match env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: validate-archive <path-to-bot.zip>");
            return ExitCode::FAILURE;
        }
    };

    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("could not read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filename = std::path::Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("bot.zip");

    match archive::validate(&bytes, filename) {
        Ok(validated) => {
            println!("ok: entrypoint = {}", validated.entrypoint_path);
            if let Some(v) = validated.declared_protocol_version {
                println!("declared protocol version = {v}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("rejected: {e}");
            ExitCode::FAILURE
        }
    }
}
