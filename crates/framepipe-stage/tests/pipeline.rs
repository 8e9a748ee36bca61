//! End-to-end stage runs over real channels. Threads stand in for the
//! separate processes a deployed pipeline uses.

use std::thread;
use std::time::{Duration, Instant};

use framepipe_node::{NodeError, NodeSource, PixelColor, SampleMeta};
use framepipe_stage::{
    EndReason, Monitor, Relay, Stage, StageBody, StageConfig, StageError, StageState, TestFrame,
    logging,
};

fn channel(tag: &str) -> String {
    format!("fp-pipeline-{tag}-{}", std::process::id())
}

fn frame_server(name: &str, rate: f64, limit: u64) -> Stage {
    let config = StageConfig::from_rate(rate)
        .unwrap()
        .with_output(name)
        .with_sample_limit(limit);
    let body = TestFrame::gradient(12, 16, PixelColor::Bgr).unwrap();
    let mut stage = Stage::new(config, body);
    stage.connect().unwrap();
    stage
}

/// Read until the channel closes, optionally holding one sample for a while.
fn read_all(mut source: NodeSource, hold: Option<(u64, Duration)>) -> Vec<SampleMeta> {
    let mut seen = Vec::new();
    loop {
        match source.acquire_for_read() {
            Ok(guard) => {
                seen.push(*guard.meta());
                if let Some((index, delay)) = hold
                    && guard.index() == index
                {
                    thread::sleep(delay);
                }
                guard.release();
            }
            Err(e) if e.is_end_of_stream() => return seen,
            Err(e) => panic!("unexpected read error: {e}"),
        }
    }
}

fn indices(metas: &[SampleMeta]) -> Vec<u64> {
    metas.iter().map(|m| m.index).collect()
}

#[test]
fn five_samples_at_ten_hertz() {
    logging::init_for_tests();
    let name = channel("five");
    let mut server = frame_server(&name, 10.0, 5);
    assert_eq!(server.state(), StageState::Running);

    let mut source = NodeSource::connect(&name).unwrap();
    assert_eq!(source.period(), Duration::from_millis(100));

    let start = Instant::now();
    let writer = thread::spawn(move || server.run());

    let mut seen = Vec::new();
    for _ in 0..5 {
        let guard = source.acquire_for_read().unwrap();
        assert_eq!(guard.payload().len(), 12 * 16 * 3);
        seen.push(*guard.meta());
    }

    let summary = writer.join().unwrap().unwrap();
    assert_eq!(summary.iterations, 5);
    assert_eq!(summary.published, 5);
    assert_eq!(summary.end, EndReason::SampleLimit);
    assert!(start.elapsed() >= Duration::from_millis(380));

    assert_eq!(indices(&seen), vec![0, 1, 2, 3, 4]);
    assert!(seen.iter().all(|m| m.period == Duration::from_millis(100)));
    assert!(matches!(
        source.acquire_for_read(),
        Err(NodeError::ChannelClosed(_))
    ));
}

#[test]
fn slow_reader_delays_the_next_publish() {
    logging::init_for_tests();
    let name = channel("slow");
    let mut server = frame_server(&name, 10.0, 5);

    let fast = NodeSource::connect(&name).unwrap();
    let slow = NodeSource::connect(&name).unwrap();
    let fast = thread::spawn(move || read_all(fast, None));
    let slow = thread::spawn(move || read_all(slow, Some((2, Duration::from_millis(500)))));

    let summary = server.run().unwrap();
    assert_eq!(summary.published, 5);

    let fast = fast.join().unwrap();
    let slow = slow.join().unwrap();
    assert_eq!(indices(&fast), vec![0, 1, 2, 3, 4]);
    assert_eq!(indices(&slow), vec![0, 1, 2, 3, 4]);

    let gap = slow[3].timestamp.saturating_sub(slow[2].timestamp);
    assert!(gap >= Duration::from_millis(450), "sample 3 followed sample 2 after {gap:?}");
    assert!(gap < Duration::from_millis(1500), "sample 3 followed sample 2 after {gap:?}");
    assert_eq!(fast[3], slow[3]);
}

#[test]
fn relay_chain_carries_every_sample() {
    logging::init_for_tests();
    let upstream = channel("chain-up");
    let downstream = channel("chain-down");

    let mut server = frame_server(&upstream, 200.0, 10);
    let expected_frame = match server.body() {
        StageBody::TestFrame(frame) => frame.frame().to_vec(),
        other => panic!("unexpected body {other:?}"),
    };

    let mut relay = Stage::new(
        StageConfig::default()
            .with_input(upstream.as_str())
            .with_output(downstream.as_str()),
        Relay::new(),
    );
    relay.connect().unwrap();

    let mut viewer = Stage::new(
        StageConfig::default().with_input(downstream.as_str()),
        Monitor::with_history(),
    );
    viewer.connect().unwrap();

    // A reader that leaves after the first sample.
    let mut probe = NodeSource::connect(&downstream).unwrap();
    assert_eq!(probe.period(), Duration::from_millis(5));
    let probe = thread::spawn(move || {
        let first = probe.acquire_for_read().unwrap();
        (first.index(), first.payload().to_vec())
    });

    let relay = thread::spawn(move || (relay.run(), relay));
    let viewer = thread::spawn(move || (viewer.run(), viewer));

    let server_summary = server.run().unwrap();
    assert_eq!(server_summary.end, EndReason::SampleLimit);

    let (first_index, first_payload) = probe.join().unwrap();
    assert_eq!(first_index, 0);
    assert_eq!(first_payload, expected_frame);

    let (relay_summary, relay) = relay.join().unwrap();
    let relay_summary = relay_summary.unwrap();
    assert_eq!(relay_summary.end, EndReason::UpstreamClosed);
    assert_eq!(relay_summary.published, 10);
    assert!(matches!(relay.body(), StageBody::Relay(r) if r.forwarded() == 10));

    let (viewer_summary, viewer) = viewer.join().unwrap();
    let viewer_summary = viewer_summary.unwrap();
    assert_eq!(viewer_summary.end, EndReason::UpstreamClosed);
    assert_eq!(viewer_summary.iterations, 10);
    assert_eq!(viewer_summary.published, 0);
    match viewer.body() {
        StageBody::Monitor(monitor) => {
            assert_eq!(indices(monitor.history()), (0..10).collect::<Vec<_>>());
            assert_eq!(monitor.skipped(), 0);
        }
        other => panic!("unexpected body {other:?}"),
    }
    assert_eq!(viewer.state(), StageState::Terminated);
}

#[test]
fn interrupt_stops_a_blocked_reader_stage() {
    logging::init_for_tests();
    let name = channel("idle");
    let mut server = frame_server(&name, 1.0, 1);

    let mut viewer = Stage::new(StageConfig::default().with_input(name.as_str()), Monitor::new());
    viewer.connect().unwrap();
    let interrupt = viewer.interrupt().clone();
    let viewer = thread::spawn(move || viewer.run());

    thread::sleep(Duration::from_millis(50));
    interrupt.trigger();
    let summary = viewer.join().unwrap().unwrap();
    assert_eq!(summary.end, EndReason::Shutdown);
    assert_eq!(summary.iterations, 0);

    server.drain();
}

#[test]
fn interrupt_cuts_a_pacing_sleep_short() {
    logging::init_for_tests();
    let name = channel("pacing");
    let server = frame_server(&name, 0.5, 100);
    let interrupt = server.interrupt().clone();

    let start = Instant::now();
    let mut server = server;
    let writer = thread::spawn(move || server.run());
    thread::sleep(Duration::from_millis(50));
    interrupt.trigger();

    let summary = writer.join().unwrap().unwrap();
    assert_eq!(summary.end, EndReason::Shutdown);
    assert_eq!(summary.published, 1);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn zero_sample_limit_runs_until_shutdown() {
    logging::init_for_tests();
    let name = channel("unbounded");
    let server = frame_server(&name, 200.0, 0);
    let interrupt = server.interrupt().clone();

    let mut server = server;
    let writer = thread::spawn(move || server.run());
    thread::sleep(Duration::from_millis(150));
    interrupt.trigger();

    let summary = writer.join().unwrap().unwrap();
    assert_eq!(summary.end, EndReason::Shutdown);
    assert!(summary.published >= 5, "published {}", summary.published);
}

#[test]
fn missing_input_fails_the_stage() {
    logging::init_for_tests();
    let mut config = StageConfig::default().with_input(channel("absent"));
    config.connect_timeout = Duration::from_millis(100);
    let mut viewer = Stage::new(config, Monitor::new());

    let err = viewer.run().unwrap_err();
    assert!(matches!(
        err,
        StageError::Node(NodeError::ChannelNotFound { .. })
    ));
    assert_eq!(viewer.state(), StageState::Terminated);
}

#[test]
fn wrong_wiring_is_a_config_error() {
    logging::init_for_tests();
    let mut relay = Stage::new(StageConfig::default().with_input("a"), Relay::new());
    assert!(matches!(relay.connect(), Err(StageError::Config(_))));

    let mut viewer = Stage::new(
        StageConfig::default().with_output(channel("nowhere")),
        Monitor::new(),
    );
    assert!(matches!(viewer.connect(), Err(StageError::Config(_))));
}
