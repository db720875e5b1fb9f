use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Result, anyhow};

use squadsim_terminal::config::{self, Settings};
use squadsim_terminal::push_feed::PushManager;
use squadsim_terminal::state::{
    MatchOutcome, MatchStatus, SyncDelta, SyncState, TrackTarget, apply_delta,
};
use squadsim_terminal::status_fetch::RestStatusApi;
use squadsim_terminal::sync::{SyncTuning, spawn_synchronizer};

/// Headless watcher: follows one match (or the job creating it) to the end
/// and exits zero only when the match finishes.
fn main() -> Result<()> {
    config::load_env();
    let settings = Settings::from_env();

    let target = parse_target_args().unwrap_or_else(|| settings.target.clone());
    if target.is_empty() {
        return Err(anyhow!(
            "nothing to watch; pass --match <id> or --job <id>, or set MATCH_ID/JOB_ID"
        ));
    }

    let api = RestStatusApi::from_settings(&settings)
        .ok_or_else(|| anyhow!("SQUADSIM_API_BASE is not set"))?;
    let manager = PushManager::from_settings(&settings)
        .ok_or_else(|| anyhow!("no push endpoint; set SQUADSIM_WS_URL or SQUADSIM_API_BASE"))?;
    let subscription = manager.open();

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api,
        subscription,
        target.clone(),
        SyncTuning::from_settings(&settings),
        tx,
    );

    let mut state = SyncState::tracking(&target);
    let mut last_line = String::new();
    let outcome = loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(delta) => {
                print_events(&state, &delta);
                apply_delta(&mut state, delta);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break None,
        }

        let line = progress_line(&state);
        if line != last_line {
            println!("{line}");
            last_line = line;
        }

        if let Some(outcome) = state.take_completion() {
            break Some(outcome);
        }
    };

    handle.stop();

    match outcome {
        Some(MatchOutcome::Finished {
            home_score,
            away_score,
            winner,
        }) => {
            let home = state.home_team.as_deref().unwrap_or("home");
            let away = state.away_team.as_deref().unwrap_or("away");
            println!("final: {home} {home_score}-{away_score} {away}");
            if let Some(winner) = winner {
                println!("winner: {winner}");
            }
            Ok(())
        }
        Some(MatchOutcome::JobFailed { error }) => Err(anyhow!("match creation failed: {error}")),
        None => Err(anyhow!("update feed closed before the match ended")),
    }
}

/// Echoes the narrative parts of a delta before it is applied: console lines
/// and timeline entries the state has not seen yet. Replayed batch entries
/// stay quiet.
fn print_events(state: &SyncState, delta: &SyncDelta) {
    match delta {
        SyncDelta::Console(line) => println!("{line}"),
        SyncDelta::LogEntry { match_id, entry } if state.tracks_match(match_id) => {
            if !state.logs.contains(entry) {
                println!("{:>3}' {}", entry.minute, entry.description);
            }
        }
        SyncDelta::LogBatch { match_id, entries } if state.tracks_match(match_id) => {
            for entry in entries {
                if !state.logs.contains(entry) {
                    println!("{:>3}' {}", entry.minute, entry.description);
                }
            }
        }
        _ => {}
    }
}

fn progress_line(state: &SyncState) -> String {
    let status = state.status.map(MatchStatus::wire_name).unwrap_or("-");
    format!(
        "{:>3}% {:<18} {} {}-{} {} [{}]",
        state.progress,
        status,
        state.home_team.as_deref().unwrap_or("home"),
        state.home_score,
        state.away_score,
        state.away_team.as_deref().unwrap_or("away"),
        state.transport.label()
    )
}

fn parse_target_args() -> Option<TrackTarget> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(id) = arg.strip_prefix("--match=") {
            let trimmed = id.trim();
            if !trimmed.is_empty() {
                return Some(TrackTarget::for_match(trimmed));
            }
        }
        if arg == "--match"
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(TrackTarget::for_match(next.trim()));
        }
        if let Some(id) = arg.strip_prefix("--job=") {
            let trimmed = id.trim();
            if !trimmed.is_empty() {
                return Some(TrackTarget::for_job(trimmed));
            }
        }
        if arg == "--job"
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(TrackTarget::for_job(next.trim()));
        }
    }
    None
}
