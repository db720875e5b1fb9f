use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::state::{
    JobRecord, JobStatus, MatchLogEntry, MatchStatus, SyncCommand, SyncDelta, TrackTarget,
    TransportMode,
};

const SQUAD_POOL: &[&str] = &[
    "Crimson Harriers",
    "Dockside Rovers",
    "Northgate Albion",
    "Velodrome FC",
    "Saltmarsh Town",
    "Ironbridge City",
    "Kestrel Athletic",
    "Old Quarter SC",
];

const FILLER_PLAYS: &[&str] = &[
    "Corner won on the left",
    "Shot on target, parried",
    "Yellow card for a late challenge",
    "Substitution, fresh legs in midfield",
    "Free kick in a dangerous area",
    "Offside flag cuts out a counter",
    "Long spell of possession in midfield",
];

/// Demo provider: walks a scripted match through the same delta channel the
/// live synchronizer uses, so the whole UI can be exercised offline. Each
/// command restarts the script with a fresh job.
pub fn spawn_fake_feed(tx: Sender<SyncDelta>, cmd_rx: Receiver<SyncCommand>) {
    thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let mut job_seq: u32 = 0;
        let mut steps = scripted_run(&mut job_seq, &mut rng);

        loop {
            loop {
                match cmd_rx.try_recv() {
                    Ok(SyncCommand::Stop) | Err(TryRecvError::Disconnected) => return,
                    Ok(SyncCommand::CreateMatch { .. }) => {
                        steps = scripted_run(&mut job_seq, &mut rng);
                    }
                    Ok(SyncCommand::Track(target)) => {
                        steps = scripted_target(&target, &mut job_seq, &mut rng);
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            if let Some(batch) = steps.pop_front() {
                for delta in batch {
                    let _ = tx.send(delta);
                }
            }

            thread::sleep(Duration::from_millis(rng.gen_range(450..900)));
        }
    });
}

fn scripted_run(job_seq: &mut u32, rng: &mut impl Rng) -> VecDeque<Vec<SyncDelta>> {
    *job_seq += 1;
    let job_id = format!("job-fake-{job_seq}");
    let match_id = format!("match-fake-{job_seq}");

    let mut steps = VecDeque::new();
    steps.push_back(vec![
        SyncDelta::Tracking(TrackTarget::for_job(job_id.clone())),
        SyncDelta::Transport(TransportMode::Connecting),
    ]);
    steps.push_back(vec![
        SyncDelta::Transport(TransportMode::Push),
        SyncDelta::JobUpdate(job_record(&job_id, JobStatus::Pending, None)),
    ]);
    steps.push_back(vec![SyncDelta::JobUpdate(job_record(
        &job_id,
        JobStatus::Processing,
        None,
    ))]);
    steps.push_back(vec![SyncDelta::JobUpdate(job_record(
        &job_id,
        JobStatus::Completed,
        Some(&match_id),
    ))]);
    steps.extend(match_script(&match_id, rng));
    steps
}

fn scripted_target(
    target: &TrackTarget,
    job_seq: &mut u32,
    rng: &mut impl Rng,
) -> VecDeque<Vec<SyncDelta>> {
    if let Some(match_id) = target.match_id.clone() {
        let mut steps = VecDeque::new();
        steps.push_back(vec![
            SyncDelta::Tracking(TrackTarget::for_match(match_id.clone())),
            SyncDelta::Transport(TransportMode::Connecting),
        ]);
        steps.push_back(vec![SyncDelta::Transport(TransportMode::Push)]);
        steps.extend(match_script(&match_id, rng));
        steps
    } else if target.job_id.is_some() {
        scripted_run(job_seq, rng)
    } else {
        VecDeque::from([vec![SyncDelta::Tracking(TrackTarget::default())]])
    }
}

fn match_script(match_id: &str, rng: &mut impl Rng) -> VecDeque<Vec<SyncDelta>> {
    let mut squads = SQUAD_POOL.to_vec();
    squads.shuffle(rng);
    let home = squads[0].to_string();
    let away = squads[1].to_string();
    let final_home: u8 = rng.gen_range(0..=3);
    let final_away: u8 = rng.gen_range(0..=3);

    let mut steps = VecDeque::new();
    steps.push_back(vec![
        SyncDelta::SetTeams {
            match_id: match_id.to_string(),
            home: home.clone(),
            away: away.clone(),
        },
        status(match_id, MatchStatus::Matchmaking, None),
    ]);
    steps.push_back(vec![status(
        match_id,
        MatchStatus::OpponentFound,
        Some(format!("Opponent found: {away}")),
    )]);
    steps.push_back(vec![status(match_id, MatchStatus::PreparingStadium, None)]);
    steps.push_back(vec![status(match_id, MatchStatus::PlayersEntering, None)]);
    steps.push_back(vec![
        status(match_id, MatchStatus::MatchStarted, None),
        log(match_id, 1, "Kickoff"),
    ]);
    steps.push_back(vec![status(match_id, MatchStatus::SimulationActive, None)]);

    let timeline = build_timeline(rng, &home, &away, final_home, final_away);
    let first_half: Vec<TimelinePlay> = timeline
        .iter()
        .filter(|play| play.entry.minute <= 45)
        .cloned()
        .collect();
    let second_half: Vec<TimelinePlay> = timeline
        .iter()
        .filter(|play| play.entry.minute > 45)
        .cloned()
        .collect();

    // First-half delivery gets roughed up the way a flaky stream would hand
    // it over: two filler plays swap places and one repeats. Goals stay in
    // order so the running score never moves backward.
    let mut delivery = first_half.clone();
    let fillers: Vec<usize> = delivery
        .iter()
        .enumerate()
        .filter(|(_, play)| play.goal_for_home.is_none())
        .map(|(idx, _)| idx)
        .collect();
    if fillers.len() >= 2 {
        delivery.swap(fillers[0], fillers[1]);
    }
    if let Some(&idx) = fillers.first() {
        let repeat = first_half[idx].clone();
        delivery.push(repeat);
    }

    let mut score = (0u8, 0u8);
    for play in &delivery {
        steps.push_back(play_step(match_id, play, &mut score));
    }

    // Halftime recap batch repeats everything already sent plus one fresh
    // entry; the client is expected to keep the timeline deduplicated.
    let mut recap = vec![MatchLogEntry {
        minute: 1,
        description: "Kickoff".to_string(),
    }];
    recap.extend(first_half.iter().map(|play| play.entry.clone()));
    recap.push(MatchLogEntry {
        minute: 45,
        description: "End of the first half".to_string(),
    });
    steps.push_back(vec![SyncDelta::LogBatch {
        match_id: match_id.to_string(),
        entries: recap,
    }]);

    for play in &second_half {
        steps.push_back(play_step(match_id, play, &mut score));
    }

    let winner = if final_home > final_away {
        Some(home.clone())
    } else if final_away > final_home {
        Some(away.clone())
    } else {
        None
    };
    steps.push_back(vec![
        log(match_id, 90, "Full time"),
        SyncDelta::MatchEnded {
            match_id: match_id.to_string(),
            home_score: final_home,
            away_score: final_away,
            winner,
        },
    ]);
    steps
}

#[derive(Clone)]
struct TimelinePlay {
    entry: MatchLogEntry,
    goal_for_home: Option<bool>,
}

fn build_timeline(
    rng: &mut impl Rng,
    home: &str,
    away: &str,
    final_home: u8,
    final_away: u8,
) -> Vec<TimelinePlay> {
    let mut goals: Vec<bool> = Vec::new();
    goals.extend(std::iter::repeat(true).take(final_home as usize));
    goals.extend(std::iter::repeat(false).take(final_away as usize));
    goals.shuffle(rng);

    let mut plays = Vec::new();
    let mut minute: u16 = 2;
    for goal_for_home in goals {
        minute += rng.gen_range(6..14);
        let scorer = if goal_for_home { home } else { away };
        plays.push(TimelinePlay {
            entry: MatchLogEntry {
                minute,
                description: format!("GOAL! {scorer} score"),
            },
            goal_for_home: Some(goal_for_home),
        });
    }

    for _ in 0..rng.gen_range(4..7) {
        let filler = FILLER_PLAYS[rng.gen_range(0..FILLER_PLAYS.len())];
        plays.push(TimelinePlay {
            entry: MatchLogEntry {
                minute: rng.gen_range(3..88),
                description: filler.to_string(),
            },
            goal_for_home: None,
        });
    }

    plays.sort_by_key(|play| play.entry.minute);
    plays
}

fn play_step(match_id: &str, play: &TimelinePlay, score: &mut (u8, u8)) -> Vec<SyncDelta> {
    match play.goal_for_home {
        Some(for_home) => {
            if for_home {
                score.0 += 1;
            } else {
                score.1 += 1;
            }
            vec![
                SyncDelta::ScoreUpdate {
                    match_id: match_id.to_string(),
                    home_score: score.0,
                    away_score: score.1,
                },
                log(match_id, play.entry.minute, &play.entry.description),
            ]
        }
        None => vec![log(match_id, play.entry.minute, &play.entry.description)],
    }
}

fn job_record(job_id: &str, status: JobStatus, match_id: Option<&str>) -> JobRecord {
    JobRecord {
        job_id: job_id.to_string(),
        status,
        match_id: match_id.map(str::to_string),
        error: None,
    }
}

fn status(match_id: &str, status: MatchStatus, message: Option<String>) -> SyncDelta {
    SyncDelta::StatusUpdate {
        match_id: match_id.to_string(),
        status,
        message,
        home_score: None,
        away_score: None,
    }
}

fn log(match_id: &str, minute: u16, description: &str) -> SyncDelta {
    SyncDelta::LogEntry {
        match_id: match_id.to_string(),
        entry: MatchLogEntry {
            minute,
            description: description.to_string(),
        },
    }
}
