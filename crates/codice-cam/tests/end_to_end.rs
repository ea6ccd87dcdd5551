mod common;

use approx::assert_abs_diff_eq;
use codice_cam::core::{Frame, GrayImage};
use codice_cam::tuio::{AbsencePolicy, LifecycleEvent, MarkerState, RecordingServer, TuioCommand};
use codice_cam::{CodiceConfig, CodicePipeline, PipelineError};
use common::table_frame;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn at(t0: Instant, millis: u64) -> Instant {
    t0 + Duration::from_millis(millis)
}

fn pipeline(cfg: &CodiceConfig) -> CodicePipeline<RecordingServer> {
    CodicePipeline::new(cfg, RecordingServer::new()).expect("pipeline")
}

fn states(events: &[codice_cam::EventSummary]) -> Vec<(u32, MarkerState)> {
    events.iter().map(|e| (e.id, e.state)).collect()
}

#[test]
fn marker_seen_once_is_detected_then_lost() {
    let mut p = pipeline(&CodiceConfig::default());
    let marked = table_frame(320, 240, &[(5, (160.0, 120.0))]);
    let empty = GrayImage::filled(320, 240, 255);
    let t0 = Instant::now();

    let mut all = Vec::new();
    let first = p.process_frame(&Frame::from_gray(&marked), t0).unwrap();
    assert_eq!(first.decoded.len(), 1);
    assert_eq!(first.decoded[0].id, 5);
    assert_eq!(first.tracked.len(), 1);
    assert_abs_diff_eq!(first.tracked[0].x, 0.5, epsilon = 0.01);
    assert_abs_diff_eq!(first.tracked[0].y, 0.5, epsilon = 0.01);
    all.extend(states(&first.events));

    for ms in [33, 66, 500, 1500, 2500] {
        let diag = p
            .process_frame(&Frame::from_gray(&empty), at(t0, ms))
            .unwrap();
        all.extend(states(&diag.events));
    }

    assert_eq!(
        all,
        vec![(5, MarkerState::Detected), (5, MarkerState::Lost)]
    );
    assert!(p.manager().is_empty());

    let frames = p.bridge().server().frames();
    assert!(matches!(frames[0].as_slice(), [TuioCommand::Add(o)] if o.symbol_id == 5 && o.session_id == 1000));
    assert_eq!(frames[1], vec![TuioCommand::Remove { session_id: 1000 }]);
    assert!(frames[2..].iter().all(|f| f.is_empty()));
}

#[test]
fn steady_marker_keeps_its_session() {
    let mut p = pipeline(&CodiceConfig::default());
    let marked = table_frame(320, 240, &[(300, (150.0, 110.0))]);
    let t0 = Instant::now();

    let mut sessions = Vec::new();
    let mut kinds = Vec::new();
    for i in 0..4 {
        let diag = p
            .process_frame(&Frame::from_gray(&marked), at(t0, 33 * i))
            .unwrap();
        for e in &diag.events {
            sessions.push(e.session_id);
            kinds.push(e.state);
        }
    }

    assert_eq!(sessions, vec![1000; 4]);
    assert_eq!(
        kinds,
        vec![
            MarkerState::Detected,
            MarkerState::Updated,
            MarkerState::Updated,
            MarkerState::Updated
        ]
    );
    let marker = p.manager().get(300).expect("tracked");
    assert_eq!(marker.update_count, 3);

    let stats = p.stats();
    assert_eq!(stats.bridge.objects_created, 1);
    assert_eq!(stats.bridge.objects_updated, 3);
    assert_eq!(stats.detection.markers_detected, 4);
}

#[test]
fn rejected_symbol_does_not_block_the_others() {
    let mut server = RecordingServer::new();
    server.reject_symbol(900);
    let mut p = CodicePipeline::new(&CodiceConfig::default(), server).unwrap();

    let frame = table_frame(400, 200, &[(900, (100.0, 100.0)), (17, (290.0, 100.0))]);

    let diag = p.process_frame(&Frame::from_gray(&frame), Instant::now()).unwrap();
    let ids: Vec<u32> = diag.decoded.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![17, 900]);
    assert_eq!(diag.tracked.len(), 2);

    let frames = p.bridge().server().frames();
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0].as_slice(), [TuioCommand::Add(o)] if o.symbol_id == 17));
    assert_eq!(p.stats().bridge.object_errors, 1);
}

#[test]
fn hold_policy_bridges_short_gaps() {
    let mut cfg = CodiceConfig::default();
    cfg.tracking.absence_policy = AbsencePolicy::HoldUntilTimeout;
    let mut p = pipeline(&cfg);
    let marked = table_frame(320, 240, &[(42, (160.0, 120.0))]);
    let empty = GrayImage::filled(320, 240, 255);
    let t0 = Instant::now();

    p.process_frame(&Frame::from_gray(&marked), t0).unwrap();
    let gap = p.process_frame(&Frame::from_gray(&empty), at(t0, 200)).unwrap();
    assert!(gap.events.is_empty());
    assert_eq!(gap.tracked[0].state, MarkerState::Active);

    let back = p.process_frame(&Frame::from_gray(&marked), at(t0, 400)).unwrap();
    assert_eq!(states(&back.events), vec![(42, MarkerState::Updated)]);

    let late = p.process_frame(&Frame::from_gray(&empty), at(t0, 1600)).unwrap();
    assert_eq!(states(&late.events), vec![(42, MarkerState::Lost)]);
}

#[test]
fn listener_sees_events_in_emission_order() {
    let mut p = pipeline(&CodiceConfig::default());
    let seen: Arc<Mutex<Vec<(u32, MarkerState)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    p.set_listener(Box::new(move |e: &LifecycleEvent| {
        sink.lock().unwrap().push((e.id, e.state));
    }));

    let marked = table_frame(320, 240, &[(7, (160.0, 120.0))]);
    let t0 = Instant::now();
    p.process_frame(&Frame::from_gray(&marked), t0).unwrap();
    p.process_frame(&Frame::from_gray(&marked), at(t0, 33)).unwrap();
    let removed = p.shutdown(at(t0, 66)).unwrap();

    assert_eq!(states(&removed), vec![(7, MarkerState::Lost)]);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (7, MarkerState::Detected),
            (7, MarkerState::Updated),
            (7, MarkerState::Lost)
        ]
    );
}

#[test]
fn shutdown_closes_with_a_single_frame() {
    let mut p = pipeline(&CodiceConfig::default());
    let marked = table_frame(320, 240, &[(7, (160.0, 120.0))]);
    let t0 = Instant::now();
    p.process_frame(&Frame::from_gray(&marked), t0).unwrap();
    p.shutdown(at(t0, 33)).unwrap();

    let frames = p.bridge().server().frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], vec![TuioCommand::Remove { session_id: 1000 }]);
    assert_eq!(p.bridge().active_objects().count(), 0);
    assert_eq!(p.stats().bridge.frames, 2);
}

#[test]
fn malformed_frame_between_good_ones_changes_nothing() {
    let mut p = pipeline(&CodiceConfig::default());
    let marked = table_frame(320, 240, &[(5, (160.0, 120.0))]);
    let t0 = Instant::now();

    p.process_frame(&Frame::from_gray(&marked), t0).unwrap();
    let commands_before = p.bridge().server().commands().len();

    let short = vec![0u8; 100];
    let err = p
        .process_frame(&Frame::new(320, 240, 1, &short), at(t0, 33))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Detect(_)));
    assert_eq!(p.bridge().server().commands().len(), commands_before);
    assert_eq!(p.manager().len(), 1);

    let next = p.process_frame(&Frame::from_gray(&marked), at(t0, 66)).unwrap();
    assert_eq!(next.frame_index, 1);
    assert_eq!(states(&next.events), vec![(5, MarkerState::Updated)]);
}
