//! Tests for `nightcam::capture` - state transitions, photo capture and
//! the asynchronous video stop.
mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use nightcam::camera::Camera;
use nightcam::capture::{CaptureMachine, Mode, STATUS_DURATION, StopWorker};
use nightcam::recognizer::GestureType;
use nightcam::storage::Storage;

use common::{FakeCamera, capture_machine, list_names, storage_config, wait_until};

fn photo_dir(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("home").join("Nachtsicht_Fotos")
}

fn live_machine(dir: &TempDir, camera: FakeCamera) -> CaptureMachine<FakeCamera> {
    let mut machine = capture_machine(dir.path(), camera);
    machine.on_gesture(GestureType::DoubleTap, Instant::now());
    assert_eq!(machine.mode(), Mode::Live);
    machine
}

// -- Transitions ----------------------------------------------

#[test]
fn test_starts_idle() {
    let dir = TempDir::new().unwrap();
    let machine = capture_machine(dir.path(), FakeCamera::new());
    assert_eq!(machine.mode(), Mode::Idle);
    assert!(!machine.is_stopping());
    assert_eq!(machine.recording_path(), None);
}

#[test]
fn test_double_tap_goes_live() {
    let dir = TempDir::new().unwrap();
    live_machine(&dir, FakeCamera::new());
}

#[test]
fn test_tap_in_idle_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut machine = capture_machine(dir.path(), FakeCamera::new());
    let log = std::sync::Arc::clone(&machine.camera_mut().log);
    machine.on_gesture(GestureType::Tap, Instant::now());
    machine.on_gesture(GestureType::LongPress, Instant::now());
    assert_eq!(machine.mode(), Mode::Idle);
    assert_eq!(log.lock().unwrap().frames, 0);
    assert!(log.lock().unwrap().recordings.is_empty());
}

#[test]
fn test_double_tap_ignored_when_live() {
    let dir = TempDir::new().unwrap();
    let mut machine = live_machine(&dir, FakeCamera::new());
    machine.on_gesture(GestureType::DoubleTap, Instant::now());
    assert_eq!(machine.mode(), Mode::Live);
}

#[test]
fn test_very_long_press_not_a_capture_gesture() {
    let dir = TempDir::new().unwrap();
    let mut machine = live_machine(&dir, FakeCamera::new());
    machine.on_gesture(GestureType::VeryLongPress, Instant::now());
    assert_eq!(machine.mode(), Mode::Live);
}

#[test]
fn test_mode_names() {
    assert_eq!(Mode::Idle.to_string(), "IDLE");
    assert_eq!(Mode::Live.to_string(), "LIVE");
    assert_eq!(Mode::Recording.to_string(), "RECORDING");
}

// -- Photos ---------------------------------------------------

#[test]
fn test_tap_in_live_takes_equalized_photo() {
    let dir = TempDir::new().unwrap();
    let mut machine = live_machine(&dir, FakeCamera::new());
    let now = Instant::now();
    machine.on_gesture(GestureType::Tap, now);

    assert_eq!(machine.mode(), Mode::Live);
    assert_eq!(list_names(&photo_dir(&dir)), ["Nachtsicht_Foto1.jpg"]);
    assert_eq!(machine.status(now), Some("Saved Nachtsicht_Foto1.jpg"));

    let photo = image::open(photo_dir(&dir).join("Nachtsicht_Foto1.jpg"))
        .unwrap()
        .to_luma8();
    assert_eq!(photo.dimensions(), (64, 48));
    // The 100..140 input range is stretched (JPEG leaves some slack).
    let (lo, hi) = photo
        .pixels()
        .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    assert!(lo < 60 && hi > 195, "range {lo}..{hi}");
}

#[test]
fn test_photos_are_numbered() {
    let dir = TempDir::new().unwrap();
    let mut machine = live_machine(&dir, FakeCamera::new());
    for _ in 0..3 {
        machine.take_photo(Instant::now()).unwrap();
    }
    assert_eq!(
        list_names(&photo_dir(&dir)),
        ["Nachtsicht_Foto1.jpg", "Nachtsicht_Foto2.jpg", "Nachtsicht_Foto3.jpg"]
    );
}

#[test]
fn test_camera_failure_shows_status() {
    let dir = TempDir::new().unwrap();
    let mut camera = FakeCamera::new();
    camera.fail_frames = true;
    let mut machine = live_machine(&dir, camera);
    let now = Instant::now();
    machine.on_gesture(GestureType::Tap, now);
    assert_eq!(machine.mode(), Mode::Live);
    assert_eq!(machine.status(now), Some("Photo failed: camera error"));
    assert!(list_names(&photo_dir(&dir)).is_empty());
}

#[test]
fn test_storage_full_shows_status() {
    let dir = TempDir::new().unwrap();
    let mut config = storage_config(dir.path());
    config.photo_bytes = u64::MAX;
    let mut machine = CaptureMachine::new(FakeCamera::new(), Storage::new(config));
    let now = Instant::now();
    machine.on_gesture(GestureType::DoubleTap, now);
    machine.on_gesture(GestureType::Tap, now);
    assert_eq!(machine.status(now), Some("Photo failed: storage full"));

    machine.on_gesture(GestureType::LongPress, now);
    assert_eq!(machine.mode(), Mode::Live);
    assert_eq!(machine.status(now), Some("Video failed: storage full"));
}

#[test]
fn test_status_expires() {
    let dir = TempDir::new().unwrap();
    let mut machine = capture_machine(dir.path(), FakeCamera::new());
    let now = Instant::now();
    machine.set_status("hello", now);
    assert_eq!(machine.status(now + STATUS_DURATION / 2), Some("hello"));
    assert_eq!(machine.status(now + STATUS_DURATION), None);
}

// -- Video ----------------------------------------------------

#[test]
fn test_long_press_starts_recording() {
    let dir = TempDir::new().unwrap();
    let camera = FakeCamera::new();
    let log = std::sync::Arc::clone(&camera.log);
    let mut machine = live_machine(&dir, camera);
    machine.on_gesture(GestureType::LongPress, Instant::now());

    assert_eq!(machine.mode(), Mode::Recording);
    let path = machine.recording_path().unwrap();
    assert!(path.starts_with(dir.path().join("home").join("Nachtsicht_Videos")));
    assert!(path.exists());
    assert_eq!(log.lock().unwrap().recordings, [path]);
}

#[test]
fn test_start_while_recording_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut machine = live_machine(&dir, FakeCamera::new());
    assert!(machine.start_video(Instant::now()).unwrap());
    assert!(!machine.start_video(Instant::now()).unwrap());
    assert_eq!(machine.camera_mut().log.lock().unwrap().recordings.len(), 1);
}

#[test]
fn test_stop_when_not_recording_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut machine = live_machine(&dir, FakeCamera::new());
    assert!(!machine.stop_video());
    assert!(!machine.is_stopping());
    assert_eq!(machine.mode(), Mode::Live);
}

#[test]
fn test_tap_while_recording_stops_in_background() {
    let dir = TempDir::new().unwrap();
    let camera = FakeCamera::gated();
    let gate = std::sync::Arc::clone(&camera.gate);
    let log = std::sync::Arc::clone(&camera.log);
    let mut machine = live_machine(&dir, camera);

    machine.on_gesture(GestureType::LongPress, Instant::now());
    let path = machine.recording_path().unwrap();
    machine.on_gesture(GestureType::Tap, Instant::now());

    // Phase one: state flips at once, the stop is still running.
    assert_eq!(machine.mode(), Mode::Live);
    assert!(machine.is_stopping());
    assert_eq!(machine.recording_path(), None);

    // A new recording is refused while the stop is in flight.
    machine.on_gesture(GestureType::LongPress, Instant::now());
    assert_eq!(machine.mode(), Mode::Live);
    assert_eq!(log.lock().unwrap().recordings.len(), 1);

    gate.store(true, Ordering::SeqCst);
    assert!(wait_until(|| !machine.is_stopping()));
    assert_eq!(log.lock().unwrap().stopped, [path]);

    machine.on_gesture(GestureType::LongPress, Instant::now());
    assert_eq!(machine.mode(), Mode::Recording);
}

#[test]
fn test_flush_waits_for_stop() {
    let dir = TempDir::new().unwrap();
    let camera = FakeCamera::gated();
    let gate = std::sync::Arc::clone(&camera.gate);
    let log = std::sync::Arc::clone(&camera.log);
    let mut machine = live_machine(&dir, camera);
    machine.start_video(Instant::now()).unwrap();

    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        gate.store(true, Ordering::SeqCst);
    });
    machine.flush();
    assert!(!machine.is_stopping());
    assert_eq!(log.lock().unwrap().stopped.len(), 1);
    opener.join().unwrap();
}

#[test]
fn test_shutdown_releases_camera() {
    let dir = TempDir::new().unwrap();
    let mut machine = live_machine(&dir, FakeCamera::new());
    machine.camera_mut().start().unwrap();
    machine.start_video(Instant::now()).unwrap();
    machine.shutdown();
    let log = machine.camera_mut().log.lock().unwrap();
    assert!(!log.started);
    assert_eq!(log.stopped.len(), 1);
}

// -- StopWorker -----------------------------------------------

#[test]
fn test_stop_worker_single_slot() {
    let dir = TempDir::new().unwrap();
    let mut camera = FakeCamera::gated();
    let first = camera.start_recording(&dir.path().join("a.h264")).unwrap();
    let second = camera.start_recording(&dir.path().join("b.h264")).unwrap();

    let mut worker = StopWorker::new();
    assert!(worker.submit(first).is_ok());
    assert!(worker.is_busy());
    let rejected = worker.submit(second).unwrap_err();
    assert_eq!(rejected.path(), dir.path().join("b.h264"));

    camera.gate.store(true, Ordering::SeqCst);
    worker.wait_idle();
    assert!(!worker.is_busy());
    assert!(worker.submit(rejected).is_ok());
    worker.wait_idle();
    assert_eq!(camera.log.lock().unwrap().stopped.len(), 2);
}
