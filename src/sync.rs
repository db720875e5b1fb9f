use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::push_feed::{PushChannel, PushEvent, ServerEvent, Topic};
use crate::state::{
    JobRecord, JobStatus, MatchLogEntry, SyncCommand, SyncDelta, TrackTarget, TransportMode,
};
use crate::status_fetch::{MatchResource, StatusApi};

/// Timing knobs for one synchronizer view. Tests shrink these to keep the
/// scenario suite fast.
#[derive(Debug, Clone, Copy)]
pub struct SyncTuning {
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub tick: Duration,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            tick: Duration::from_millis(150),
        }
    }
}

impl SyncTuning {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            connect_timeout: settings.connect_timeout,
            ..Self::default()
        }
    }
}

/// Transport phase of one view. Push is preferred; the plan falls back to
/// polling when the connect window closes, and upgrades back whenever the
/// push channel comes alive.
#[derive(Debug, Clone)]
pub struct TransportPlan {
    mode: TransportMode,
    connect_deadline: Option<Instant>,
}

impl TransportPlan {
    pub fn new() -> Self {
        Self {
            mode: TransportMode::Uninitialized,
            connect_deadline: None,
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn start(&mut self, now: Instant, window: Duration) -> TransportMode {
        self.mode = TransportMode::Connecting;
        self.connect_deadline = Some(now + window);
        self.mode
    }

    /// Closes the connect window once it expires; the view then polls.
    pub fn on_tick(&mut self, now: Instant) -> Option<TransportMode> {
        if self.mode == TransportMode::Connecting
            && let Some(deadline) = self.connect_deadline
            && now >= deadline
        {
            self.mode = TransportMode::Pull;
            self.connect_deadline = None;
            return Some(self.mode);
        }
        None
    }

    pub fn on_push_connected(&mut self) -> Option<TransportMode> {
        match self.mode {
            TransportMode::Connecting | TransportMode::Pull => {
                self.mode = TransportMode::Push;
                self.connect_deadline = None;
                Some(self.mode)
            }
            TransportMode::Push | TransportMode::Uninitialized => None,
        }
    }

    /// A dropped push session gets a fresh connect window before the plan
    /// falls back to polling.
    pub fn on_push_lost(&mut self, now: Instant, window: Duration) -> Option<TransportMode> {
        match self.mode {
            TransportMode::Push => {
                self.mode = TransportMode::Connecting;
                self.connect_deadline = Some(now + window);
                Some(self.mode)
            }
            _ => None,
        }
    }

    /// The reconnect budget is spent; polling is all that remains.
    pub fn on_push_abandoned(&mut self) -> Option<TransportMode> {
        match self.mode {
            TransportMode::Connecting | TransportMode::Push => {
                self.mode = TransportMode::Pull;
                self.connect_deadline = None;
                Some(self.mode)
            }
            TransportMode::Pull | TransportMode::Uninitialized => None,
        }
    }
}

/// Fixed-interval fetch timer. Unarmed unless the view is in pull mode.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    interval: Duration,
    next_due: Option<Instant>,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Arms the timer for an immediate fetch.
    pub fn due_now(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.next_due, Some(due) if now >= due)
    }

    pub fn mark_polled(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }
}

/// Owner of one view's synchronization: stops the provider thread and tears
/// down subscriptions on drop, so teardown happens on every exit path.
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<SyncCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SyncHandle {
    /// Sender for retracking or requesting a new match on the live view.
    pub fn commands(&self) -> mpsc::Sender<SyncCommand> {
        self.cmd_tx.clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(SyncCommand::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns the provider thread reconciling push events and status polls into
/// one [`SyncDelta`] stream. With an empty target the thread idles without
/// touching the network until a command gives it something to track.
pub fn spawn_synchronizer<A, P>(
    api: A,
    push: P,
    target: TrackTarget,
    tuning: SyncTuning,
    tx: mpsc::Sender<SyncDelta>,
) -> SyncHandle
where
    A: StatusApi + Send + 'static,
    P: PushChannel + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let synchronizer = Synchronizer::new(api, push, target, tuning, tx);
    let thread = thread::spawn(move || synchronizer.run(cmd_rx));
    SyncHandle {
        cmd_tx,
        thread: Some(thread),
    }
}

struct Synchronizer<A, P> {
    api: A,
    push: P,
    tx: mpsc::Sender<SyncDelta>,
    tuning: SyncTuning,
    target: TrackTarget,
    match_id: Option<String>,
    plan: TransportPlan,
    poll: PollSchedule,
    done: bool,
    job_terminal: bool,
    info_fetched: bool,
    final_fetched: bool,
    push_gone: bool,
}

impl<A, P> Synchronizer<A, P>
where
    A: StatusApi,
    P: PushChannel,
{
    fn new(
        api: A,
        push: P,
        target: TrackTarget,
        tuning: SyncTuning,
        tx: mpsc::Sender<SyncDelta>,
    ) -> Self {
        let match_id = target.match_id.clone();
        Self {
            api,
            push,
            tx,
            tuning,
            target,
            match_id,
            plan: TransportPlan::new(),
            poll: PollSchedule::new(tuning.poll_interval),
            done: false,
            job_terminal: false,
            info_fetched: false,
            final_fetched: false,
            push_gone: false,
        }
    }

    fn run(mut self, cmd_rx: mpsc::Receiver<SyncCommand>) {
        self.start();
        loop {
            let mut stop = false;
            loop {
                match cmd_rx.try_recv() {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            stop = true;
                            break;
                        }
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        stop = true;
                        break;
                    }
                }
            }
            if stop {
                break;
            }
            self.tick();
            thread::sleep(self.tuning.tick);
        }
        self.teardown();
    }

    fn start(&mut self) {
        if self.target.is_empty() {
            return;
        }
        self.begin_tracking();
    }

    fn begin_tracking(&mut self) {
        let mode = self.plan.start(Instant::now(), self.tuning.connect_timeout);
        self.emit_mode(mode);
        if let Some(job_id) = self.target.job_id.clone() {
            self.push.subscribe(Topic::Job(job_id));
        }
        if let Some(match_id) = self.match_id.clone() {
            self.push.subscribe(Topic::Match(match_id));
        }
        if self.match_id.is_some() {
            self.fetch_match_info();
        }
    }

    fn tick(&mut self) {
        while let Some(event) = self.push.try_recv() {
            self.handle_push_event(event);
        }
        if self.target.is_empty() || self.done {
            return;
        }
        let now = Instant::now();
        if self.push.is_connected()
            && let Some(mode) = self.plan.on_push_connected()
        {
            self.emit_mode(mode);
            self.poll.cancel();
        }
        if let Some(mode) = self.plan.on_tick(now) {
            self.emit_mode(mode);
            if mode == TransportMode::Pull {
                self.console("[WARN] no live connection; polling for status".to_string());
                self.poll.due_now(now);
            }
        }
        self.maybe_poll(now);
    }

    fn handle_command(&mut self, cmd: SyncCommand) -> bool {
        match cmd {
            SyncCommand::Stop => return false,
            SyncCommand::Track(target) => self.retrack(target),
            SyncCommand::CreateMatch { squad_id } => self.create_match(&squad_id),
        }
        true
    }

    fn retrack(&mut self, target: TrackTarget) {
        self.release_subscriptions();
        self.match_id = target.match_id.clone();
        self.target = target.clone();
        self.plan = TransportPlan::new();
        self.poll = PollSchedule::new(self.tuning.poll_interval);
        self.done = false;
        self.job_terminal = false;
        self.info_fetched = false;
        self.final_fetched = false;
        self.emit(SyncDelta::Tracking(target));
        if self.target.is_empty() {
            self.emit_mode(TransportMode::Uninitialized);
            return;
        }
        self.begin_tracking();
    }

    fn create_match(&mut self, squad_id: &str) {
        match self.api.create_match(squad_id) {
            Ok(job_id) => {
                self.console(format!("[INFO] match requested, job {job_id} accepted"));
                self.retrack(TrackTarget::for_job(job_id));
            }
            Err(err) => {
                self.console(format!("[WARN] match request failed: {err:#}"));
            }
        }
    }

    fn handle_push_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::Connected => {
                if let Some(mode) = self.plan.on_push_connected() {
                    self.emit_mode(mode);
                    self.poll.cancel();
                }
            }
            PushEvent::Disconnected { reason } => {
                if self.done {
                    return;
                }
                if self.plan.mode() == TransportMode::Push {
                    self.console(format!("[WARN] push connection lost: {reason}"));
                }
                if let Some(mode) = self.plan.on_push_lost(Instant::now(), self.tuning.connect_timeout)
                {
                    self.emit_mode(mode);
                }
            }
            PushEvent::RetriesExhausted => {
                if self.done || self.push_gone {
                    return;
                }
                self.push_gone = true;
                self.console("[ALERT] reconnection failed, live updates unavailable".to_string());
                self.emit(SyncDelta::Failure(
                    "Live connection failed. Updates continue by polling.".to_string(),
                ));
                if let Some(mode) = self.plan.on_push_abandoned() {
                    self.emit_mode(mode);
                    if mode == TransportMode::Pull {
                        self.poll.due_now(Instant::now());
                    }
                }
            }
            PushEvent::Malformed { detail } => {
                self.console(format!("[WARN] dropped malformed push frame: {detail}"));
            }
            PushEvent::Event(event) => self.handle_server_event(event),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::StatusUpdate(payload) => {
                let terminal = payload.status.is_terminal() && self.tracks_match(&payload.match_id);
                let (home_score, away_score) = payload
                    .additional_info
                    .map(|info| (info.home_score, info.away_score))
                    .unwrap_or((None, None));
                self.emit(SyncDelta::StatusUpdate {
                    match_id: payload.match_id,
                    status: payload.status,
                    message: payload.message,
                    home_score,
                    away_score,
                });
                if terminal {
                    self.finish_view();
                }
            }
            ServerEvent::LogEntry(payload) => {
                self.emit(SyncDelta::LogEntry {
                    match_id: payload.match_id,
                    entry: MatchLogEntry {
                        minute: payload.minute,
                        description: payload.description,
                    },
                });
            }
            ServerEvent::LogBatch(payload) => {
                self.emit(SyncDelta::LogBatch {
                    match_id: payload.match_id,
                    entries: payload.entries,
                });
            }
            ServerEvent::ScoreUpdate(payload) => {
                self.emit(SyncDelta::ScoreUpdate {
                    match_id: payload.match_id,
                    home_score: payload.home_score,
                    away_score: payload.away_score,
                });
            }
            ServerEvent::MatchEnded(payload) => {
                let tracked = self.tracks_match(&payload.match_id);
                self.emit(SyncDelta::MatchEnded {
                    match_id: payload.match_id,
                    home_score: payload.home_score,
                    away_score: payload.away_score,
                    winner: payload.winner,
                });
                if tracked {
                    self.finish_view();
                }
            }
            ServerEvent::JobStatus(record) => self.handle_job_record(record),
            ServerEvent::JobCompleted(payload) => self.handle_job_record(JobRecord {
                job_id: payload.job_id,
                status: JobStatus::Completed,
                match_id: Some(payload.match_id),
                error: None,
            }),
        }
    }

    /// Shared between push job events and job polls. Adoption and failure are
    /// decided here; the reducer applies the same record on the UI side.
    fn handle_job_record(&mut self, record: JobRecord) {
        let tracked = self.target.job_id.as_deref() == Some(record.job_id.as_str());
        let adoption = if tracked && record.status == JobStatus::Completed {
            record.match_id.clone()
        } else {
            None
        };
        let failed = tracked && record.status == JobStatus::Failed;
        if tracked && record.status.is_terminal() {
            self.job_terminal = true;
        }
        self.emit(SyncDelta::JobUpdate(record));
        if let Some(match_id) = adoption {
            self.adopt_match(match_id);
        }
        if failed {
            // Job failures are terminal for the whole view; no pull fallback
            // retries match creation.
            self.finish_view();
        }
    }

    fn adopt_match(&mut self, match_id: String) {
        if self.match_id.is_some() {
            return;
        }
        if let Some(job_id) = self.target.job_id.clone() {
            self.push.unsubscribe(Topic::Job(job_id));
        }
        self.push.subscribe(Topic::Match(match_id.clone()));
        self.match_id = Some(match_id);
        self.fetch_match_info();
    }

    fn maybe_poll(&mut self, now: Instant) {
        if self.done || self.plan.mode() != TransportMode::Pull || !self.poll.is_due(now) {
            return;
        }
        self.poll.mark_polled(now);
        if let Some(match_id) = self.match_id.clone() {
            match self.api.fetch_match_status(&match_id) {
                Ok(payload) => {
                    let terminal = payload.status.is_terminal();
                    if terminal {
                        // The status route has no scores; the match resource
                        // carries the final result.
                        self.fetch_final_result(&match_id);
                    }
                    self.emit(SyncDelta::StatusUpdate {
                        match_id: match_id.clone(),
                        status: payload.status,
                        message: payload.message,
                        home_score: None,
                        away_score: None,
                    });
                    if terminal {
                        self.finish_view();
                    }
                }
                Err(err) => self.console(format!("[WARN] status poll failed: {err:#}")),
            }
        } else if !self.job_terminal
            && let Some(job_id) = self.target.job_id.clone()
        {
            match self.api.fetch_job(&job_id) {
                Ok(record) => self.handle_job_record(record),
                Err(err) => self.console(format!("[WARN] job poll failed: {err:#}")),
            }
        }
    }

    fn fetch_match_info(&mut self) {
        if self.info_fetched {
            return;
        }
        let Some(match_id) = self.match_id.clone() else {
            return;
        };
        self.info_fetched = true;
        match self.api.fetch_match(&match_id) {
            Ok(resource) => self.apply_match_resource(resource),
            Err(err) => self.console(format!("[WARN] match info fetch failed: {err:#}")),
        }
    }

    fn fetch_final_result(&mut self, match_id: &str) {
        if self.final_fetched {
            return;
        }
        self.final_fetched = true;
        match self.api.fetch_match(match_id) {
            Ok(resource) => self.apply_match_resource(resource),
            Err(err) => self.console(format!("[WARN] final result fetch failed: {err:#}")),
        }
    }

    fn apply_match_resource(&mut self, resource: MatchResource) {
        if let (Some(home), Some(away)) = (resource.home_team.clone(), resource.away_team.clone())
        {
            self.emit(SyncDelta::SetTeams {
                match_id: resource.id.clone(),
                home,
                away,
            });
        }
        if let Some(result) = resource.result {
            self.emit(SyncDelta::MatchEnded {
                match_id: resource.id,
                home_score: result.home_score,
                away_score: result.away_score,
                winner: result.winner,
            });
            self.finish_view();
        } else if let Some(status) = resource.status {
            let terminal = status.is_terminal();
            self.emit(SyncDelta::StatusUpdate {
                match_id: resource.id,
                status,
                message: None,
                home_score: None,
                away_score: None,
            });
            if terminal {
                self.finish_view();
            }
        }
    }

    /// Terminal state for the view: all timers stop and every subscription is
    /// released. Commands can still revive the view with a new target.
    fn finish_view(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.poll.cancel();
        self.release_subscriptions();
    }

    fn release_subscriptions(&mut self) {
        if let Some(job_id) = self.target.job_id.clone() {
            self.push.unsubscribe(Topic::Job(job_id));
        }
        if let Some(match_id) = self.match_id.clone() {
            self.push.unsubscribe(Topic::Match(match_id));
        }
    }

    fn teardown(&mut self) {
        self.poll.cancel();
        self.release_subscriptions();
        self.push.shutdown();
    }

    fn tracks_match(&self, match_id: &str) -> bool {
        self.match_id.as_deref() == Some(match_id)
    }

    fn emit(&self, delta: SyncDelta) {
        let _ = self.tx.send(delta);
    }

    fn emit_mode(&self, mode: TransportMode) {
        self.emit(SyncDelta::Transport(mode));
    }

    fn console(&self, line: String) {
        self.emit(SyncDelta::Console(line));
    }
}
