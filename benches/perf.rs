use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use squadsim_terminal::push_feed::decode_server_event;
use squadsim_terminal::state::{
    MatchLogEntry, MatchStatus, SyncDelta, SyncState, TrackTarget, apply_delta, merge_log_entry,
    normalize_log_batch,
};
use squadsim_terminal::status_fetch::parse_match_json;

fn frame_text(index: usize) -> String {
    let frames: Vec<serde_json::Value> =
        serde_json::from_str(PUSH_FRAMES_JSON).expect("valid fixture json");
    serde_json::to_string(&frames[index]).expect("frame should re-serialize")
}

fn sample_log(len: u16) -> Vec<MatchLogEntry> {
    (0..len)
        .map(|minute| MatchLogEntry {
            minute,
            description: format!("Play {minute} develops in midfield"),
        })
        .collect()
}

fn bench_status_frame_decode(c: &mut Criterion) {
    let frame = frame_text(0);
    c.bench_function("status_frame_decode", |b| {
        b.iter(|| {
            let event = decode_server_event(black_box(&frame)).unwrap();
            black_box(event);
        })
    });
}

fn bench_log_batch_frame_decode(c: &mut Criterion) {
    let frame = frame_text(2);
    c.bench_function("log_batch_frame_decode", |b| {
        b.iter(|| {
            let event = decode_server_event(black_box(&frame)).unwrap();
            black_box(event);
        })
    });
}

fn bench_log_merge(c: &mut Criterion) {
    let base = sample_log(200);
    let incoming = MatchLogEntry {
        minute: 97,
        description: "Stoppage time chance".to_string(),
    };
    c.bench_function("log_merge", |b| {
        b.iter(|| {
            let mut logs = base.clone();
            merge_log_entry(&mut logs, black_box(incoming.clone()));
            black_box(logs.len());
        })
    });
}

fn bench_log_batch_normalize(c: &mut Criterion) {
    // A snapshot with every entry doubled, the way a replaying stream
    // hands it over.
    let mut snapshot = sample_log(150);
    snapshot.extend(sample_log(150));
    c.bench_function("log_batch_normalize", |b| {
        b.iter(|| {
            let logs = normalize_log_batch(black_box(snapshot.clone()));
            black_box(logs.len());
        })
    });
}

fn bench_delta_apply(c: &mut Criterion) {
    let mut script: Vec<SyncDelta> = Vec::new();
    for status in MatchStatus::ALL {
        script.push(SyncDelta::StatusUpdate {
            match_id: "match-271".to_string(),
            status,
            message: None,
            home_score: None,
            away_score: None,
        });
    }
    for minute in 0..90u16 {
        script.push(SyncDelta::LogEntry {
            match_id: "match-271".to_string(),
            entry: MatchLogEntry {
                minute,
                description: format!("Play {minute} develops in midfield"),
            },
        });
        if minute % 30 == 10 {
            script.push(SyncDelta::ScoreUpdate {
                match_id: "match-271".to_string(),
                home_score: (minute / 30) as u8 + 1,
                away_score: 0,
            });
        }
    }

    c.bench_function("delta_apply", |b| {
        b.iter(|| {
            let mut state = SyncState::tracking(&TrackTarget::for_match("match-271"));
            for delta in &script {
                apply_delta(&mut state, black_box(delta.clone()));
            }
            black_box(state.logs.len());
        })
    });
}

fn bench_match_resource_parse(c: &mut Criterion) {
    c.bench_function("match_resource_parse", |b| {
        b.iter(|| {
            let resource = parse_match_json(black_box(MATCH_RESOURCE_JSON)).unwrap();
            black_box(resource.id.len());
        })
    });
}

criterion_group!(
    perf,
    bench_status_frame_decode,
    bench_log_batch_frame_decode,
    bench_log_merge,
    bench_log_batch_normalize,
    bench_delta_apply,
    bench_match_resource_parse
);
criterion_main!(perf);

static PUSH_FRAMES_JSON: &str = include_str!("../tests/fixtures/push_frames.json");
static MATCH_RESOURCE_JSON: &str = include_str!("../tests/fixtures/match_resource.json");
