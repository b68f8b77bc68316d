mod common;

use common::{sample, snapshot, test_config, MockTransport, ScriptedSource};
use procwatch::config::Config;
use procwatch::detector::TriggerKind;
use procwatch::sampler::{PublishedState, SampleLoop};
use tokio::sync::{broadcast, watch};

type TestLoop = SampleLoop<ScriptedSource, MockTransport>;

fn make_loop(
    config: Config,
    source: ScriptedSource,
    transport: MockTransport,
) -> (
    TestLoop,
    watch::Receiver<PublishedState>,
    broadcast::Sender<String>,
) {
    let (events_tx, _) = broadcast::channel(16);
    let (sampler, published) = SampleLoop::new(config, source, transport, events_tx.clone());
    (sampler, published, events_tx)
}

// pid 100, CPU times [10, 10, 15] at 5 second spacing, threshold 50% for 5s.
fn burn_scenario() -> ScriptedSource {
    ScriptedSource::new(vec![
        snapshot(0.0, vec![sample(100, 1, 10.0, 0)]),
        snapshot(5.0, vec![sample(100, 1, 10.0, 0)]),
        snapshot(10.0, vec![sample(100, 1, 15.0, 0)]),
    ])
}

#[test]
fn sustained_cpu_burn_raises_one_alert() {
    let transport = MockTransport::new(true);
    let log = transport.log.clone();
    let (mut sampler, published, _events) = make_loop(test_config(), burn_scenario(), transport);

    sampler.tick(); // everything new
    sampler.tick(); // 0% cpu
    assert!(published.borrow().alerts.is_empty());

    sampler.tick(); // 100% for 5 cumulative seconds
    let state = published.borrow().clone();
    assert_eq!(state.alerts.len(), 1);
    let alert = &state.alerts[0];
    assert_eq!(alert.key.pid, 100);
    assert_eq!(alert.kind, TriggerKind::Cpu);
    assert_eq!(alert.peak, 100.0);
    assert_eq!(alert.since, 10.0);
    assert_eq!(state.alerts_raised, 1);

    let log = log.lock().unwrap();
    assert_eq!(log.created.len(), 1);
    let (_, title, body) = &log.created[0];
    assert!(title.contains("High CPU use"));
    assert!(body.contains("PID 100"));
    assert!(log.open.len() <= 1);
}

#[test]
fn one_quiet_tick_clears_the_alert_and_closes_the_notification() {
    let transport = MockTransport::new(true);
    let log = transport.log.clone();
    let mut source = burn_scenario();
    source.push(snapshot(15.0, vec![sample(100, 1, 15.0, 0)])); // 0% again
    let (mut sampler, published, _events) = make_loop(test_config(), source, transport);

    for _ in 0..4 {
        sampler.tick();
    }
    assert!(published.borrow().alerts.is_empty());
    let log = log.lock().unwrap();
    assert_eq!(log.created.len(), 1);
    assert_eq!(log.closed, vec![log.created[0].0]);
}

#[test]
fn exit_while_offending_retracts_on_the_next_tick() {
    let transport = MockTransport::new(true);
    let log = transport.log.clone();
    let mut source = burn_scenario();
    source.push(snapshot(15.0, vec![])); // process gone
    let (mut sampler, published, _events) = make_loop(test_config(), source, transport);

    for _ in 0..4 {
        sampler.tick();
    }
    assert!(published.borrow().alerts.is_empty());
    let log = log.lock().unwrap();
    assert_eq!(log.closed, vec![log.created[0].0]);
    assert!(log.open.is_empty());
}

#[test]
fn capture_failure_keeps_previous_state_and_episode() {
    let transport = MockTransport::new(true);
    let log = transport.log.clone();
    let mut source = ScriptedSource::new(vec![
        snapshot(0.0, vec![sample(100, 1, 0.0, 0)]),
        snapshot(5.0, vec![sample(100, 1, 5.0, 0)]), // 100%, offending
    ]);
    source.push_error();
    // After the failed tick the deltas bridge the gap: 10s of CPU over 10s.
    source.push(snapshot(15.0, vec![sample(100, 1, 15.0, 0)]));
    let (mut sampler, published, _events) = make_loop(test_config(), source, transport);

    sampler.tick();
    sampler.tick();
    assert_eq!(published.borrow().alerts.len(), 1);

    sampler.tick(); // fatal capture error: state intact, no publish
    assert_eq!(published.borrow().alerts.len(), 1);

    sampler.tick(); // recovered: same episode continues
    let state = published.borrow().clone();
    assert_eq!(state.alerts.len(), 1);
    assert_eq!(state.alerts_raised, 1);
    assert_eq!(log.lock().unwrap().created.len(), 1);
}

#[test]
fn absent_transport_still_publishes_the_offense() {
    let transport = MockTransport::new(false);
    let log = transport.log.clone();
    let (mut sampler, published, _events) = make_loop(test_config(), burn_scenario(), transport);

    for _ in 0..3 {
        sampler.tick();
    }
    let state = published.borrow().clone();
    assert_eq!(state.alerts.len(), 1);
    assert_eq!(state.alerts[0].handle, None);
    assert!(log.lock().unwrap().created.is_empty());
}

#[test]
fn transport_recovery_opens_the_notification_mid_episode() {
    let transport = MockTransport::new(false);
    let log = transport.log.clone();
    // Continuous 100% burn, 25 ticks at 5 second spacing.
    let snaps = (0..25)
        .map(|i| snapshot(5.0 * i as f64, vec![sample(100, 1, 5.0 * i as f64, 0)]))
        .collect();
    let (mut sampler, published, _events) =
        make_loop(test_config(), ScriptedSource::new(snaps), transport);

    sampler.tick();
    sampler.tick();
    assert_eq!(published.borrow().alerts.len(), 1);
    // Notification daemon comes up; the forwarder notices on a later
    // re-probe without a restart.
    log.lock().unwrap().available = true;

    for _ in 2..25 {
        sampler.tick();
    }
    let state = published.borrow().clone();
    assert_eq!(state.alerts.len(), 1);
    assert!(state.alerts[0].handle.is_some());
    let log = log.lock().unwrap();
    assert_eq!(log.created.len(), 1);
    assert!(!log.replaced.is_empty());
}

#[test]
fn external_dismissal_reopens_exactly_once_per_episode() {
    let transport = MockTransport::new(true);
    let log = transport.log.clone();
    let snaps = (0..8)
        .map(|i| snapshot(5.0 * i as f64, vec![sample(100, 1, 5.0 * i as f64, 0)]))
        .collect();
    let (mut sampler, published, _events) =
        make_loop(test_config(), ScriptedSource::new(snaps), transport);

    sampler.tick();
    sampler.tick(); // offense starts, notification 1 opened
    let first = log.lock().unwrap().created[0].0;
    sampler.tick(); // replaced in place
    assert_eq!(log.lock().unwrap().replaced.len(), 1);

    log.lock().unwrap().dismiss(first);
    sampler.tick(); // stale replace: one fresh notification
    assert_eq!(log.lock().unwrap().created.len(), 2);
    let second = log.lock().unwrap().created[1].0;

    log.lock().unwrap().dismiss(second);
    sampler.tick(); // dismissed again: the episode goes silent
    sampler.tick();
    sampler.tick();
    let state = published.borrow().clone();
    assert_eq!(state.alerts.len(), 1);
    assert_eq!(state.alerts[0].handle, None);
    assert!(state.alerts[0].reopened);
    assert_eq!(log.lock().unwrap().created.len(), 2);
}

#[test]
fn pause_gap_is_not_credited_to_sustained_duration() {
    let mut config = test_config();
    config.detection.cpu.duration_seconds = 10.0;
    let transport = MockTransport::new(true);
    let source = ScriptedSource::new(vec![
        snapshot(0.0, vec![sample(100, 1, 0.0, 0)]),
        snapshot(5.0, vec![sample(100, 1, 5.0, 0)]), // run 5 of 10
        snapshot(65.0, vec![sample(100, 1, 65.0, 0)]), // after 60s paused
        snapshot(70.0, vec![sample(100, 1, 70.0, 0)]),
    ]);
    let (mut sampler, published, _events) = make_loop(config, source, transport);

    sampler.tick();
    sampler.tick();
    sampler.pause();
    sampler.resume();
    sampler.tick(); // burning the whole pause, but the gap counts for zero
    assert!(published.borrow().alerts.is_empty());
    sampler.tick(); // run reaches 10
    assert_eq!(published.borrow().alerts.len(), 1);
}

#[test]
fn rule_handover_ends_the_old_episode_and_starts_a_new_one() {
    let mut config = test_config();
    config.detection.memory.threshold_bytes = 2_000;
    let transport = MockTransport::new(true);
    let log = transport.log.clone();
    let source = ScriptedSource::new(vec![
        snapshot(0.0, vec![sample(100, 1, 0.0, 2_000)]),
        snapshot(5.0, vec![sample(100, 1, 5.0, 2_100)]), // cpu wins the tie
        snapshot(10.0, vec![sample(100, 1, 5.0, 2_200)]), // cpu idle, memory continues
    ]);
    let (mut sampler, published, _events) = make_loop(config, source, transport);

    sampler.tick();
    sampler.tick();
    assert_eq!(published.borrow().alerts[0].kind, TriggerKind::Cpu);

    sampler.tick();
    let state = published.borrow().clone();
    assert_eq!(state.alerts.len(), 1);
    assert_eq!(state.alerts[0].kind, TriggerKind::Memory);
    assert_eq!(state.alerts_raised, 2);
    let log = log.lock().unwrap();
    assert_eq!(log.created.len(), 2);
    assert_eq!(log.closed.len(), 1);
}

#[test]
fn alert_transitions_are_broadcast_to_clients() {
    let transport = MockTransport::new(true);
    let (mut sampler, _published, events) = make_loop(test_config(), burn_scenario(), transport);
    let mut rx = events.subscribe();

    for _ in 0..3 {
        sampler.tick();
    }
    let event = rx.try_recv().expect("an alert event should be queued");
    assert!(event.contains("\"type\":\"alert\""));
    assert!(event.contains("\"pid\":100"));
}

#[test]
fn published_snapshot_preserves_every_sample_field() {
    let mut full = sample(100, 1, 123.456, 987_654_321);
    full.uss_bytes = Some(42);
    full.shared_bytes = Some(7);
    full.read_bytes = Some(u64::MAX);
    full.write_bytes = Some(u64::MAX - 1);
    let transport = MockTransport::new(true);
    let source = ScriptedSource::new(vec![snapshot(0.0, vec![full.clone()])]);
    let (mut sampler, published, _events) = make_loop(test_config(), source, transport);

    sampler.tick();
    let state = published.borrow().clone();
    assert_eq!(state.snapshot.processes[&full.key()], full);
}
