use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use squadsim_terminal::push_feed::{PushChannel, PushEvent, ServerEvent, Topic, decode_server_event};
use squadsim_terminal::state::{
    JobRecord, MatchOutcome, MatchStatus, SyncDelta, SyncState, TrackTarget, TransportMode,
    apply_delta,
};
use squadsim_terminal::status_fetch::{MatchResource, MatchResult, MatchStatusPayload, StatusApi};
use squadsim_terminal::sync::{SyncTuning, spawn_synchronizer};

fn fast_tuning() -> SyncTuning {
    SyncTuning {
        poll_interval: Duration::from_millis(40),
        connect_timeout: Duration::from_millis(60),
        tick: Duration::from_millis(5),
    }
}

/// Polls a condition until it holds or the deadline passes. Keeps the suite
/// quick on a fast machine without going flaky on a loaded one.
fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Scripted REST double. Status fetches pop a queue (an empty queue reports a
/// transient error, which the synchronizer must tolerate); every call is
/// recorded for the timer assertions.
#[derive(Clone, Default)]
struct ScriptedApi {
    calls: Arc<Mutex<Vec<String>>>,
    statuses: Arc<Mutex<VecDeque<MatchStatusPayload>>>,
    jobs: Arc<Mutex<VecDeque<JobRecord>>>,
    matches: Arc<Mutex<HashMap<String, MatchResource>>>,
}

impl ScriptedApi {
    fn queue_status(&self, status: MatchStatus) {
        self.statuses.lock().unwrap().push_back(MatchStatusPayload {
            status,
            message: None,
        });
    }

    fn insert_match(&self, resource: MatchResource) {
        self.matches
            .lock()
            .unwrap()
            .insert(resource.id.clone(), resource);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn status_call_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with("status:"))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl StatusApi for ScriptedApi {
    fn fetch_match_status(&self, match_id: &str) -> Result<MatchStatusPayload> {
        self.record(format!("status:{match_id}"));
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted status queue is empty"))
    }

    fn fetch_match(&self, match_id: &str) -> Result<MatchResource> {
        // Recorded after the lookup so a test that waits on this entry can
        // then restage the resource without racing the fetch.
        let found = self.matches.lock().unwrap().get(match_id).cloned();
        self.record(format!("match:{match_id}"));
        found.ok_or_else(|| anyhow!("no scripted match {match_id}"))
    }

    fn fetch_job(&self, job_id: &str) -> Result<JobRecord> {
        self.record(format!("job:{job_id}"));
        self.jobs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted job queue is empty"))
    }

    fn create_match(&self, squad_id: &str) -> Result<String> {
        self.record(format!("create:{squad_id}"));
        Ok("job-sim-1".to_string())
    }
}

#[derive(Default)]
struct StubPushInner {
    connected: bool,
    events: VecDeque<PushEvent>,
    log: Vec<String>,
}

/// Hand-driven push channel: tests flip the connected flag and feed events.
#[derive(Clone, Default)]
struct StubPush {
    inner: Arc<Mutex<StubPushInner>>,
}

impl StubPush {
    fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = connected;
    }

    fn feed(&self, event: PushEvent) {
        self.inner.lock().unwrap().events.push_back(event);
    }

    fn feed_frame(&self, raw: &str) {
        let event = decode_server_event(raw).expect("test frame should decode");
        self.feed(PushEvent::Event(event));
    }

    fn pending(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    fn log(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    fn saw(&self, entry: &str) -> bool {
        self.log().iter().any(|line| line == entry)
    }
}

fn topic_tag(topic: &Topic) -> String {
    match topic {
        Topic::Match(id) => format!("match {id}"),
        Topic::Job(id) => format!("job {id}"),
    }
}

impl PushChannel for StubPush {
    fn subscribe(&mut self, topic: Topic) {
        let tag = format!("sub {}", topic_tag(&topic));
        self.inner.lock().unwrap().log.push(tag);
    }

    fn unsubscribe(&mut self, topic: Topic) {
        let tag = format!("unsub {}", topic_tag(&topic));
        self.inner.lock().unwrap().log.push(tag);
    }

    fn try_recv(&mut self) -> Option<PushEvent> {
        self.inner.lock().unwrap().events.pop_front()
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    fn shutdown(&mut self) {
        self.inner.lock().unwrap().log.push("shutdown".to_string());
    }
}

fn drain(rx: &mpsc::Receiver<SyncDelta>, state: &mut SyncState) -> Vec<SyncDelta> {
    let mut seen = Vec::new();
    while let Ok(delta) = rx.try_recv() {
        apply_delta(state, delta.clone());
        seen.push(delta);
    }
    seen
}

fn transport_path(deltas: &[SyncDelta]) -> Vec<TransportMode> {
    deltas
        .iter()
        .filter_map(|delta| match delta {
            SyncDelta::Transport(mode) => Some(*mode),
            _ => None,
        })
        .collect()
}

fn plain_match(id: &str) -> MatchResource {
    MatchResource {
        id: id.to_string(),
        home_team: Some("Dockside Rovers".to_string()),
        away_team: Some("Saltmarsh Town".to_string()),
        status: None,
        result: None,
    }
}

#[test]
fn mounting_with_no_ids_stays_off_the_network() {
    let api = ScriptedApi::default();
    let push = StubPush::default();

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::default(),
        fast_tuning(),
        tx,
    );

    // Several connect windows and poll intervals pass; none may fire.
    thread::sleep(Duration::from_millis(400));
    handle.stop();

    assert!(api.calls().is_empty(), "calls: {:?}", api.calls());
    assert_eq!(push.log(), vec!["shutdown".to_string()]);

    let mut state = SyncState::new();
    let deltas = drain(&rx, &mut state);
    assert!(deltas.is_empty(), "deltas: {deltas:?}");
    assert_eq!(state.transport, TransportMode::Uninitialized);
}

#[test]
fn silent_push_channel_falls_back_to_pull_and_polls_promptly() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-1"));
    api.queue_status(MatchStatus::SimulationActive);
    let push = StubPush::default();

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_match("m-1"),
        fast_tuning(),
        tx,
    );

    // Connect window 60ms plus one poll interval, with slack for CI.
    assert!(
        wait_until(1_000, || api.status_call_count() >= 1),
        "expected a poll soon after the window closed: {:?}",
        api.calls()
    );
    handle.stop();

    let mut state = SyncState::tracking(&TrackTarget::for_match("m-1"));
    let deltas = drain(&rx, &mut state);

    let path = transport_path(&deltas);
    assert_eq!(path.first(), Some(&TransportMode::Connecting));
    assert!(path.contains(&TransportMode::Pull), "path: {path:?}");
    assert_eq!(state.status, Some(MatchStatus::SimulationActive));
    assert_eq!(state.home_team.as_deref(), Some("Dockside Rovers"));
}

#[test]
fn terminal_status_seen_by_pull_stops_the_poll_timer() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-1"));
    api.queue_status(MatchStatus::MatchEnded);
    let push = StubPush::default();

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_match("m-1"),
        fast_tuning(),
        tx,
    );

    // Let the start-time info fetch see the in-play resource, then stage the
    // final result for the fetch that follows the terminal poll.
    assert!(wait_until(1_000, || {
        api.calls().iter().any(|call| call == "match:m-1")
    }));
    let mut finished = plain_match("m-1");
    finished.result = Some(MatchResult {
        home_score: 2,
        away_score: 1,
        winner: Some("Dockside Rovers".to_string()),
    });
    api.insert_match(finished);

    assert!(
        wait_until(1_000, || api.status_call_count() == 1),
        "calls: {:?}",
        api.calls()
    );

    // Several more intervals pass; the schedule must stay cancelled.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(api.status_call_count(), 1, "calls: {:?}", api.calls());

    let mut state = SyncState::tracking(&TrackTarget::for_match("m-1"));
    drain(&rx, &mut state);
    assert!(state.completed);
    assert_eq!((state.home_score, state.away_score), (2, 1));
    assert_eq!(state.winner.as_deref(), Some("Dockside Rovers"));
    assert_eq!(
        state.take_completion(),
        Some(MatchOutcome::Finished {
            home_score: 2,
            away_score: 1,
            winner: Some("Dockside Rovers".to_string()),
        })
    );
    assert!(push.saw("unsub match m-1"), "log: {:?}", push.log());
    handle.stop();
}

#[test]
fn stopping_the_view_cancels_pending_polls() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-1"));
    api.queue_status(MatchStatus::SimulationActive);
    api.queue_status(MatchStatus::SimulationActive);
    let push = StubPush::default();

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_match("m-1"),
        fast_tuning(),
        tx,
    );

    assert!(wait_until(1_000, || api.status_call_count() >= 1));
    handle.stop();
    let after_stop = api.status_call_count();

    thread::sleep(Duration::from_millis(200));
    assert_eq!(
        api.status_call_count(),
        after_stop,
        "no fetch may run after the view is gone"
    );
    assert!(push.saw("shutdown"), "log: {:?}", push.log());
    assert!(push.saw("unsub match m-1"), "log: {:?}", push.log());

    drop(rx);
}

#[test]
fn push_connection_keeps_polling_off_and_carries_events() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-1"));
    let push = StubPush::default();
    push.set_connected(true);
    push.feed(PushEvent::Connected);

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_match("m-1"),
        fast_tuning(),
        tx,
    );

    push.feed_frame(
        r#"{"event":"status-update","data":{"matchId":"m-1","status":"MATCH_STARTED"}}"#,
    );
    push.feed_frame(
        r#"{"event":"score-update","data":{"matchId":"m-1","homeScore":1,"awayScore":0}}"#,
    );
    assert!(wait_until(1_000, || push.pending() == 0));
    thread::sleep(Duration::from_millis(120));

    let mut state = SyncState::tracking(&TrackTarget::for_match("m-1"));
    let deltas = drain(&rx, &mut state);
    handle.stop();

    assert!(transport_path(&deltas).contains(&TransportMode::Push));
    assert_eq!(state.transport, TransportMode::Push);
    assert_eq!(state.status, Some(MatchStatus::MatchStarted));
    assert_eq!((state.home_score, state.away_score), (1, 0));
    assert_eq!(
        api.status_call_count(),
        0,
        "push mode must not poll: {:?}",
        api.calls()
    );
}

#[test]
fn push_drop_retries_then_degrades_to_pull() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-1"));
    api.queue_status(MatchStatus::SimulationActive);
    let push = StubPush::default();
    push.set_connected(true);

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_match("m-1"),
        fast_tuning(),
        tx,
    );

    thread::sleep(Duration::from_millis(40));
    push.set_connected(false);
    push.feed(PushEvent::Disconnected {
        reason: "stream ended".to_string(),
    });

    // One fresh connect window must elapse before pull takes over.
    assert!(
        wait_until(1_000, || api.status_call_count() >= 1),
        "calls: {:?}",
        api.calls()
    );
    handle.stop();

    let mut state = SyncState::tracking(&TrackTarget::for_match("m-1"));
    let deltas = drain(&rx, &mut state);

    let path = transport_path(&deltas);
    let push_pos = path
        .iter()
        .position(|m| *m == TransportMode::Push)
        .expect("push mode reached");
    let reconnect_pos = path
        .iter()
        .rposition(|m| *m == TransportMode::Connecting)
        .expect("a fresh connect window follows the drop");
    let pull_pos = path
        .iter()
        .rposition(|m| *m == TransportMode::Pull)
        .expect("pull takes over in the end");
    assert!(
        push_pos < reconnect_pos && reconnect_pos < pull_pos,
        "expected push -> connecting -> pull, got {path:?}"
    );
    assert_eq!(state.status, Some(MatchStatus::SimulationActive));
}

#[test]
fn exhausted_reconnects_surface_a_failure_and_pull_carries_on() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-1"));
    api.queue_status(MatchStatus::SimulationActive);
    let push = StubPush::default();
    push.feed(PushEvent::RetriesExhausted);

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_match("m-1"),
        fast_tuning(),
        tx,
    );

    assert!(
        wait_until(1_000, || api.status_call_count() >= 1),
        "calls: {:?}",
        api.calls()
    );
    handle.stop();

    let mut state = SyncState::tracking(&TrackTarget::for_match("m-1"));
    drain(&rx, &mut state);

    assert!(state.failure.is_some());
    assert_eq!(state.transport, TransportMode::Pull);
    assert_eq!(state.status, Some(MatchStatus::SimulationActive));
}

#[test]
fn job_resolution_switches_push_subscriptions_to_the_match() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-77"));
    let push = StubPush::default();
    push.set_connected(true);

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_job("j-9"),
        fast_tuning(),
        tx,
    );

    push.feed_frame(r#"{"event":"job-completed","data":{"jobId":"j-9","matchId":"m-77"}}"#);
    assert!(
        wait_until(1_000, || push.saw("sub match m-77")),
        "log: {:?}",
        push.log()
    );
    thread::sleep(Duration::from_millis(30));
    handle.stop();

    let mut state = SyncState::tracking(&TrackTarget::for_job("j-9"));
    let deltas = drain(&rx, &mut state);

    assert_eq!(state.match_id.as_deref(), Some("m-77"));
    assert_eq!(state.home_team.as_deref(), Some("Dockside Rovers"));
    assert!(push.saw("sub job j-9"), "log: {:?}", push.log());
    assert!(push.saw("unsub job j-9"), "log: {:?}", push.log());
    assert!(
        deltas
            .iter()
            .any(|delta| matches!(delta, SyncDelta::SetTeams { .. })),
        "team names should arrive with adoption"
    );
}

#[test]
fn match_ended_over_push_releases_the_subscription() {
    let api = ScriptedApi::default();
    api.insert_match(plain_match("m-1"));
    let push = StubPush::default();
    push.set_connected(true);

    let (tx, rx) = mpsc::channel();
    let handle = spawn_synchronizer(
        api.clone(),
        push.clone(),
        TrackTarget::for_match("m-1"),
        fast_tuning(),
        tx,
    );

    push.feed_frame(
        r#"{"event":"match-ended","data":{"matchId":"m-1","homeScore":3,"awayScore":2,"winner":"Dockside Rovers"}}"#,
    );
    assert!(
        wait_until(1_000, || push.saw("unsub match m-1")),
        "log: {:?}",
        push.log()
    );

    // Terminal state also means no pull fallback later.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(api.status_call_count(), 0, "calls: {:?}", api.calls());
    handle.stop();

    let mut state = SyncState::tracking(&TrackTarget::for_match("m-1"));
    drain(&rx, &mut state);

    assert!(state.completed);
    assert_eq!((state.home_score, state.away_score), (3, 2));
    assert_eq!(state.winner.as_deref(), Some("Dockside Rovers"));
}

#[test]
fn unknown_push_event_names_are_rejected_by_the_decoder() {
    let raw = r#"{"event":"stadium-weather","data":{"matchId":"m-1"}}"#;
    assert!(decode_server_event(raw).is_err());

    let missing_field = r#"{"event":"score-update","data":{"matchId":"m-1","homeScore":1}}"#;
    assert!(decode_server_event(missing_field).is_err());

    let ok = r#"{"event":"log-entry","data":{"matchId":"m-1","minute":12,"description":"Shot"}}"#;
    assert!(matches!(
        decode_server_event(ok),
        Ok(ServerEvent::LogEntry(_))
    ));
}
