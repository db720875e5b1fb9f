use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Canonical match lifecycle as reported by the simulation backend.
///
/// The wire form is SCREAMING_SNAKE_CASE and is part of the backend contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Matchmaking,
    OpponentFound,
    PreparingStadium,
    PlayersEntering,
    MatchStarted,
    SimulationActive,
    MatchEnded,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 7] = [
        MatchStatus::Matchmaking,
        MatchStatus::OpponentFound,
        MatchStatus::PreparingStadium,
        MatchStatus::PlayersEntering,
        MatchStatus::MatchStarted,
        MatchStatus::SimulationActive,
        MatchStatus::MatchEnded,
    ];

    /// Fixed progress percentage for the progress gauge. Non-decreasing across
    /// the canonical order; MATCH_ENDED is always 100.
    pub fn progress(self) -> u8 {
        match self {
            MatchStatus::Matchmaking => 20,
            MatchStatus::OpponentFound => 30,
            MatchStatus::PreparingStadium => 40,
            MatchStatus::PlayersEntering => 55,
            MatchStatus::MatchStarted => 70,
            MatchStatus::SimulationActive => 85,
            MatchStatus::MatchEnded => 100,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            MatchStatus::Matchmaking => "Searching for an opponent...",
            MatchStatus::OpponentFound => "Opponent found. Preparing the match.",
            MatchStatus::PreparingStadium => "Preparing the stadium...",
            MatchStatus::PlayersEntering => "Players are entering the pitch.",
            MatchStatus::MatchStarted => "Kick-off! The match is under way.",
            MatchStatus::SimulationActive => "Match in progress...",
            MatchStatus::MatchEnded => "Full time.",
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            MatchStatus::Matchmaking => "MATCHMAKING",
            MatchStatus::OpponentFound => "OPPONENT_FOUND",
            MatchStatus::PreparingStadium => "PREPARING_STADIUM",
            MatchStatus::PlayersEntering => "PLAYERS_ENTERING",
            MatchStatus::MatchStarted => "MATCH_STARTED",
            MatchStatus::SimulationActive => "SIMULATION_ACTIVE",
            MatchStatus::MatchEnded => "MATCH_ENDED",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        let status = match raw.trim() {
            "MATCHMAKING" => MatchStatus::Matchmaking,
            "OPPONENT_FOUND" => MatchStatus::OpponentFound,
            "PREPARING_STADIUM" => MatchStatus::PreparingStadium,
            "PLAYERS_ENTERING" => MatchStatus::PlayersEntering,
            "MATCH_STARTED" => MatchStatus::MatchStarted,
            "SIMULATION_ACTIVE" => MatchStatus::SimulationActive,
            "MATCH_ENDED" => MatchStatus::MatchEnded,
            _ => return None,
        };
        Some(status)
    }

    /// Position in the canonical order, used only to notice backward jumps.
    pub fn canonical_index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::MatchEnded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Server-side record of an asynchronous match-creation job. The client only
/// observes transitions; `completed` and `failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchLogEntry {
    pub minute: u16,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Uninitialized,
    Connecting,
    Push,
    Pull,
}

impl TransportMode {
    pub fn label(self) -> &'static str {
        match self {
            TransportMode::Uninitialized => "IDLE",
            TransportMode::Connecting => "CONNECTING",
            TransportMode::Push => "PUSH",
            TransportMode::Pull => "PULL",
        }
    }
}

/// What the synchronizer is tracking. At least one id must be set for any
/// network activity; with neither the view stays idle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTarget {
    pub job_id: Option<String>,
    pub match_id: Option<String>,
}

impl TrackTarget {
    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            match_id: None,
        }
    }

    pub fn for_match(match_id: impl Into<String>) -> Self {
        Self {
            job_id: None,
            match_id: Some(match_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.job_id.is_none() && self.match_id.is_none()
    }
}

/// Terminal outcome of one tracked view, observed exactly once via
/// [`SyncState::take_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Finished {
        home_score: u8,
        away_score: u8,
        winner: Option<String>,
    },
    JobFailed {
        error: String,
    },
}

// Initial progress per the mount contract: a submitted job counts for 10, an
// existing match shell for 40, nothing known for 0.
pub const JOB_SUBMITTED_PROGRESS: u8 = 10;
pub const MATCH_READY_PROGRESS: u8 = 40;

/// Normalized live view of one match (or the job creating it). Owned by a
/// single synchronizer view; all mutation goes through [`apply_delta`].
#[derive(Debug, Clone)]
pub struct SyncState {
    pub job_id: Option<String>,
    pub match_id: Option<String>,
    pub status: Option<MatchStatus>,
    pub progress: u8,
    pub message: String,
    pub home_score: u8,
    pub away_score: u8,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub winner: Option<String>,
    pub logs: Vec<MatchLogEntry>,
    pub transport: TransportMode,
    /// Terminal user-visible failure (job failed, reconnection exhausted).
    /// Replaces the progress display when set.
    pub failure: Option<String>,
    pub completed: bool,
    pending_completion: Option<MatchOutcome>,
    pub console: VecDeque<String>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            job_id: None,
            match_id: None,
            status: None,
            progress: 0,
            message: String::new(),
            home_score: 0,
            away_score: 0,
            home_team: None,
            away_team: None,
            winner: None,
            logs: Vec::new(),
            transport: TransportMode::Uninitialized,
            failure: None,
            completed: false,
            pending_completion: None,
            console: VecDeque::with_capacity(200),
        }
    }

    pub fn tracking(target: &TrackTarget) -> Self {
        let mut state = Self::new();
        state.job_id = target.job_id.clone();
        state.match_id = target.match_id.clone();
        if state.match_id.is_some() {
            state.progress = MATCH_READY_PROGRESS;
            state.message = "Match found. Waiting for updates...".to_string();
        } else if state.job_id.is_some() {
            state.progress = JOB_SUBMITTED_PROGRESS;
            state.message = "Match is being created...".to_string();
        }
        state
    }

    pub fn tracks_match(&self, match_id: &str) -> bool {
        self.match_id.as_deref() == Some(match_id)
    }

    fn tracks_job(&self, job_id: &str) -> bool {
        self.job_id.as_deref() == Some(job_id)
    }

    pub fn push_console(&mut self, msg: impl Into<String>) {
        const MAX_LINES: usize = 200;
        self.console.push_back(msg.into());
        while self.console.len() > MAX_LINES {
            self.console.pop_front();
        }
    }

    /// Yields the terminal outcome exactly once, no matter how many terminal
    /// updates arrived.
    pub fn take_completion(&mut self) -> Option<MatchOutcome> {
        self.pending_completion.take()
    }

    fn complete(&mut self, outcome: MatchOutcome) {
        // Until the outcome is surfaced a later terminal event may refine it
        // (match-ended follows a terminal status and adds the winner). After
        // surfacing, further terminal events change nothing.
        if self.completed && self.pending_completion.is_none() {
            return;
        }
        self.completed = true;
        self.pending_completion = Some(outcome);
    }

    fn fail_job(&mut self, error: String) {
        self.failure = Some(error.clone());
        self.message = error.clone();
        self.complete(MatchOutcome::JobFailed { error });
    }
}

/// One normalized update from the synchronizer, whatever transport carried it.
#[derive(Debug, Clone)]
pub enum SyncDelta {
    Transport(TransportMode),
    /// Fresh tracking target after an explicit reset or a new match request.
    Tracking(TrackTarget),
    JobUpdate(JobRecord),
    StatusUpdate {
        match_id: String,
        status: MatchStatus,
        message: Option<String>,
        home_score: Option<u8>,
        away_score: Option<u8>,
    },
    LogEntry {
        match_id: String,
        entry: MatchLogEntry,
    },
    /// Authoritative snapshot; replaces the log wholesale.
    LogBatch {
        match_id: String,
        entries: Vec<MatchLogEntry>,
    },
    ScoreUpdate {
        match_id: String,
        home_score: u8,
        away_score: u8,
    },
    MatchEnded {
        match_id: String,
        home_score: u8,
        away_score: u8,
        winner: Option<String>,
    },
    SetTeams {
        match_id: String,
        home: String,
        away: String,
    },
    /// Terminal user-visible failure outside the match lifecycle.
    Failure(String),
    Console(String),
}

#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Drop the current subscriptions and track a new target.
    Track(TrackTarget),
    CreateMatch {
        squad_id: String,
    },
    Stop,
}

pub fn apply_delta(state: &mut SyncState, delta: SyncDelta) {
    match delta {
        SyncDelta::Transport(mode) => {
            if state.transport != mode {
                state.push_console(format!(
                    "[INFO] transport {} -> {}",
                    state.transport.label(),
                    mode.label()
                ));
            }
            state.transport = mode;
        }
        SyncDelta::Tracking(target) => {
            // New target means a new view; only the console survives the reset.
            let console = std::mem::take(&mut state.console);
            let transport = state.transport;
            *state = SyncState::tracking(&target);
            state.console = console;
            state.transport = transport;
        }
        SyncDelta::JobUpdate(job) => {
            if !state.tracks_job(&job.job_id) {
                return;
            }
            match job.status {
                JobStatus::Pending | JobStatus::Processing => {
                    // Pre-adoption heartbeat; once a match is tracked or the
                    // view is terminal the job record has nothing left to say.
                    if state.match_id.is_none() && !state.completed {
                        state.message = "Match is being created...".to_string();
                    }
                }
                JobStatus::Completed => {
                    let Some(match_id) = job.match_id else {
                        state.push_console(
                            "[WARN] job completed without a match id".to_string(),
                        );
                        return;
                    };
                    if let Some(existing) = state.match_id.as_deref() {
                        if existing != match_id {
                            state.push_console(format!(
                                "[WARN] job resolved to {match_id} but already tracking {existing}"
                            ));
                        }
                        return;
                    }
                    state.match_id = Some(match_id.clone());
                    // Until a real status event lands, the match shell alone
                    // accounts for the jump to the baseline.
                    if state.status.is_none() {
                        state.progress = MATCH_READY_PROGRESS;
                        state.message = "Match created. Waiting for kick-off...".to_string();
                    }
                    state.push_console(format!("[INFO] job done, tracking match {match_id}"));
                }
                JobStatus::Failed => {
                    let error = job
                        .error
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| "Match creation failed.".to_string());
                    state.push_console(format!("[ALERT] job failed: {error}"));
                    state.fail_job(error);
                }
            }
        }
        SyncDelta::StatusUpdate {
            match_id,
            status,
            message,
            home_score,
            away_score,
        } => {
            if !state.tracks_match(&match_id) {
                return;
            }
            if let Some(prev) = state.status
                && status.canonical_index() < prev.canonical_index()
            {
                // Overwrites are deliberate even when they move backward; the
                // console line keeps the regression observable.
                state.push_console(format!(
                    "[WARN] status moved backward: {} -> {}",
                    prev.wire_name(),
                    status.wire_name()
                ));
            }
            state.status = Some(status);
            state.progress = status.progress();
            state.message = message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| status.default_message().to_string());
            if let Some(home) = home_score {
                state.home_score = home;
            }
            if let Some(away) = away_score {
                state.away_score = away;
            }
            if status.is_terminal() {
                state.complete(MatchOutcome::Finished {
                    home_score: state.home_score,
                    away_score: state.away_score,
                    winner: state.winner.clone(),
                });
            }
        }
        SyncDelta::LogEntry { match_id, entry } => {
            if !state.tracks_match(&match_id) {
                return;
            }
            merge_log_entry(&mut state.logs, entry);
        }
        SyncDelta::LogBatch { match_id, entries } => {
            if !state.tracks_match(&match_id) {
                return;
            }
            state.logs = normalize_log_batch(entries);
        }
        SyncDelta::ScoreUpdate {
            match_id,
            home_score,
            away_score,
        } => {
            if !state.tracks_match(&match_id) {
                return;
            }
            let changed = state.home_score != home_score || state.away_score != away_score;
            state.home_score = home_score;
            state.away_score = away_score;
            if changed {
                let line = format!(
                    "[ALERT] score: {} {home_score}-{away_score} {}",
                    state.home_team.as_deref().unwrap_or("home"),
                    state.away_team.as_deref().unwrap_or("away"),
                );
                state.push_console(line);
            }
        }
        SyncDelta::MatchEnded {
            match_id,
            home_score,
            away_score,
            winner,
        } => {
            if !state.tracks_match(&match_id) {
                return;
            }
            state.status = Some(MatchStatus::MatchEnded);
            state.progress = MatchStatus::MatchEnded.progress();
            state.message = MatchStatus::MatchEnded.default_message().to_string();
            state.home_score = home_score;
            state.away_score = away_score;
            if winner.is_some() {
                state.winner = winner;
            }
            state.complete(MatchOutcome::Finished {
                home_score,
                away_score,
                winner: state.winner.clone(),
            });
        }
        SyncDelta::SetTeams {
            match_id,
            home,
            away,
        } => {
            if !state.tracks_match(&match_id) {
                return;
            }
            state.home_team = Some(home);
            state.away_team = Some(away);
        }
        SyncDelta::Failure(message) => {
            state.failure = Some(message);
        }
        SyncDelta::Console(line) => {
            state.push_console(line);
        }
    }
}

/// Inserts one entry unless an identical `(minute, description)` pair already
/// exists, then restores ascending minute order. The sort is stable so entries
/// sharing a minute keep arrival order.
pub fn merge_log_entry(logs: &mut Vec<MatchLogEntry>, entry: MatchLogEntry) {
    let duplicate = logs
        .iter()
        .any(|e| e.minute == entry.minute && e.description == entry.description);
    if duplicate {
        return;
    }
    logs.push(entry);
    logs.sort_by_key(|e| e.minute);
}

/// Dedupes a snapshot (first occurrence wins) and sorts it by minute.
pub fn normalize_log_batch(entries: Vec<MatchLogEntry>) -> Vec<MatchLogEntry> {
    let mut merged: Vec<MatchLogEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let duplicate = merged
            .iter()
            .any(|e| e.minute == entry.minute && e.description == entry.description);
        if !duplicate {
            merged.push(entry);
        }
    }
    merged.sort_by_key(|e| e.minute);
    merged
}
