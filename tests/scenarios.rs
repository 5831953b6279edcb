//! End-to-end runs against the synthetic driver

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use kinect_publish::capture::{ElementType, Stream};
use kinect_publish::driver::SyntheticDriver;
use kinect_publish::pipeline::read_latest;
use kinect_publish::runloop::{run_loop, Shutdown};
use kinect_publish::{Config, Session, SessionError, SessionState};
use tempfile::tempdir;

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.publish.directory = dir.to_path_buf();
    config.driver.frame_rate = 60;
    config
}

fn wait_for(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn medium_streams_publish_sensor_sized_records() {
    let dir = tempdir().unwrap();
    let driver = SyntheticDriver::new(1, 60);
    let mut session = Session::init(&driver, &config_in(dir.path())).unwrap();
    session.start().unwrap();

    let dispatcher = session.dispatcher().clone();
    wait_for("frames on both streams", || {
        dispatcher.stats(Stream::Depth).published >= 2 && dispatcher.stats(Stream::Color).published >= 2
    });

    let depth = read_latest(&dir.path().join("depth")).unwrap();
    assert_eq!((depth.cols, depth.rows, depth.step), (640, 480, 1280));
    assert_eq!(depth.element, ElementType::Depth16S);
    assert_eq!(depth.payload.len(), 640 * 480 * 2);
    assert!(depth.samples().iter().all(|&s| s < 2048));

    let image = read_latest(&dir.path().join("image")).unwrap();
    assert_eq!((image.cols, image.rows, image.step), (640, 480, 1920));
    assert_eq!(image.element, ElementType::Rgb8);
    assert_eq!(image.payload.len(), 921_600);

    session.stop();
    assert_eq!(dispatcher.stats(Stream::Color).failures, 0);
}

#[test]
fn zero_devices_writes_no_sinks() {
    let dir = tempdir().unwrap();
    let driver = SyntheticDriver::new(0, 30);

    let result = Session::init(&driver, &config_in(dir.path()));

    assert!(matches!(result, Err(SessionError::NoDevices)));
    assert!(!dir.path().join("depth").exists());
    assert!(!dir.path().join("image").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_keeps_last_records_and_returns_promptly() {
    let dir = tempdir().unwrap();
    let driver = SyntheticDriver::new(1, 60);
    let mut session = Session::init(&driver, &config_in(dir.path())).unwrap();
    session.start().unwrap();

    let dispatcher = session.dispatcher().clone();
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    let watcher = tokio::task::spawn_blocking(move || {
        wait_for("first frames", || {
            dispatcher.stats(Stream::Depth).published > 0 && dispatcher.stats(Stream::Color).published > 0
        });
        trigger.request();
        Instant::now()
    });

    let mut out = Vec::new();
    run_loop(&mut session, &shutdown, Duration::from_millis(20), "#end", &mut out)
        .await
        .unwrap();
    let requested_at = watcher.await.unwrap();

    assert!(requested_at.elapsed() < Duration::from_secs(1));
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(String::from_utf8(out).unwrap().starts_with("#end\n"));

    let published = session.dispatcher().stats(Stream::Depth).published;
    thread::sleep(Duration::from_millis(100));
    assert_eq!(session.dispatcher().stats(Stream::Depth).published, published);

    let depth = read_latest(&dir.path().join("depth")).unwrap();
    assert_eq!(depth.payload.len(), 614_400);
    let image = read_latest(&dir.path().join("image")).unwrap();
    assert_eq!(image.payload.len(), 921_600);

    session.stop();
}
