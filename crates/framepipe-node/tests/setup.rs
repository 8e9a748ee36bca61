//! Channel setup: bind, connect, and the setup error taxonomy.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use framepipe_node::segment::segment_path;
use framepipe_node::{
    Geometry, Interrupt, MAX_READERS, NodeError, NodeOptions, NodeSink, NodeSource, PixelColor,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn channel(tag: &str) -> String {
    format!("fp-setup-{tag}-{}", std::process::id())
}

fn quick() -> NodeOptions {
    NodeOptions::default().with_connect_timeout(Duration::from_millis(150))
}

#[test]
fn reader_sees_bound_geometry_and_period() {
    init_tracing();
    let name = channel("roundtrip");
    let geometry = Geometry::frame(48, 64, PixelColor::Hsv);
    let period = Duration::from_micros(33_333);

    let mut sink = NodeSink::new();
    sink.bind(&name, geometry, period).unwrap();

    let source = NodeSource::connect(&name).unwrap();
    assert_eq!(source.geometry(), geometry);
    assert_eq!(source.period(), period);
    assert_eq!(source.name(), name);
    assert_eq!(sink.attached_readers(), 1);

    drop(source);
    assert_eq!(sink.attached_readers(), 0);
}

#[test]
fn binding_twice_is_already_bound() {
    init_tracing();
    let name = channel("twice");
    let mut sink = NodeSink::new();
    sink.bind(&name, Geometry::position2d(), Duration::ZERO).unwrap();

    let err = sink
        .bind(&channel("twice-other"), Geometry::position2d(), Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, NodeError::AlreadyBound(ref n) if *n == name));
    assert!(err.is_setup_error());
}

#[test]
fn second_sink_is_name_in_use() {
    init_tracing();
    let name = channel("taken");
    let mut first = NodeSink::new();
    first.bind(&name, Geometry::position2d(), Duration::ZERO).unwrap();

    let mut second = NodeSink::new();
    let err = second
        .bind(&name, Geometry::position2d(), Duration::ZERO)
        .unwrap_err();
    match err {
        NodeError::NameInUse { name: n, pid } => {
            assert_eq!(n, name);
            assert_eq!(pid, std::process::id());
        }
        other => panic!("expected NameInUse, got {other:?}"),
    }
    assert!(!second.is_bound());
}

#[test]
fn name_is_free_again_after_destroy() {
    init_tracing();
    let name = channel("reuse");
    let mut first = NodeSink::new();
    first.bind(&name, Geometry::position2d(), Duration::ZERO).unwrap();
    drop(first);

    let mut second = NodeSink::new();
    second
        .bind(&name, Geometry::frame(2, 2, PixelColor::Mono), Duration::ZERO)
        .unwrap();
    let source = NodeSource::connect(&name).unwrap();
    assert_eq!(source.geometry(), Geometry::frame(2, 2, PixelColor::Mono));
}

#[test]
fn stale_segment_is_replaced() {
    init_tracing();
    let name = channel("stale");
    fs::write(segment_path(&name), vec![0xA5u8; 4096]).unwrap();

    let mut sink = NodeSink::new();
    sink.bind(&name, Geometry::position2d(), Duration::ZERO).unwrap();
    assert!(NodeSource::connect(&name).is_ok());
}

#[test]
fn missing_channel_times_out() {
    init_tracing();
    let name = channel("missing");
    let start = Instant::now();
    let err = NodeSource::connect_with(&name, None, &quick()).unwrap_err();
    match err {
        NodeError::ChannelNotFound { name: n, waited } => {
            assert_eq!(n, name);
            assert!(waited >= Duration::from_millis(150));
        }
        other => panic!("expected ChannelNotFound, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn connect_waits_for_a_late_bind() {
    init_tracing();
    let name = channel("late-bind");
    let binder = {
        let name = name.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut sink = NodeSink::new();
            sink.bind(&name, Geometry::position2d(), Duration::ZERO).unwrap();
            // Keep the channel alive until the reader has attached.
            while sink.attached_readers() == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            sink
        })
    };

    let source = NodeSource::connect(&name).unwrap();
    assert_eq!(source.geometry(), Geometry::position2d());
    drop(binder.join().unwrap());
}

#[test]
fn mismatched_geometry_is_rejected() {
    init_tracing();
    let name = channel("mismatch");
    let bound = Geometry::frame(480, 640, PixelColor::Bgr);
    let expected = Geometry::frame(480, 640, PixelColor::Mono);

    let mut sink = NodeSink::new();
    sink.bind(&name, bound, Duration::ZERO).unwrap();

    let err = NodeSource::connect_with(&name, Some(expected), &quick()).unwrap_err();
    match err {
        NodeError::GeometryMismatch {
            expected: e,
            found: f,
            ..
        } => {
            assert_eq!(e, expected);
            assert_eq!(f, bound);
        }
        other => panic!("expected GeometryMismatch, got {other:?}"),
    }
    assert_eq!(sink.attached_readers(), 0);
    assert!(NodeSource::connect_with(&name, Some(bound), &quick()).is_ok());
}

#[test]
fn reader_table_has_a_limit() {
    init_tracing();
    let name = channel("full");
    let mut sink = NodeSink::new();
    sink.bind(&name, Geometry::position2d(), Duration::ZERO).unwrap();

    let readers: Vec<_> = (0..MAX_READERS)
        .map(|_| NodeSource::connect(&name).unwrap())
        .collect();
    let err = NodeSource::connect(&name).unwrap_err();
    assert!(matches!(err, NodeError::TooManyReaders(_)));

    drop(readers);
    assert!(NodeSource::connect(&name).is_ok());
}

#[test]
fn bad_names_are_rejected_up_front() {
    init_tracing();
    let mut sink = NodeSink::new();
    let err = sink
        .bind("no/slashes", Geometry::position2d(), Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, NodeError::InvalidName { .. }));
    assert!(matches!(
        NodeSource::connect(""),
        Err(NodeError::InvalidName { .. })
    ));
}

#[test]
fn interrupt_cancels_connect() {
    init_tracing();
    let interrupt = Interrupt::new();
    let options = NodeOptions::default()
        .with_connect_timeout(Duration::from_secs(30))
        .with_interrupt(interrupt.clone());

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        interrupt.trigger();
    });

    let start = Instant::now();
    let err = NodeSource::connect_with(&channel("never"), None, &options).unwrap_err();
    assert!(err.is_interrupted());
    assert!(start.elapsed() < Duration::from_secs(5));
    trigger.join().unwrap();
}
