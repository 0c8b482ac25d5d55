//! Open, close, reconnect and recycle against the mock driver.

mod common;

use std::sync::{mpsc, Arc};

use camera_agent::device::mock::{MockCameraDriver, MOCK_JPEG};
use camera_agent::device::{CameraSettings, PreviewSurface, Size};
use camera_agent::looper::Executor;
use camera_agent::{AgentError, CameraAgent, CameraState, PictureCallbacks};
use common::{agent_with, fast_config, open, wait_until, RecordingExecutor, CALLBACK_TIMEOUT};

#[test]
fn test_open_and_synced_close() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());

    let proxy = open(&agent, &executor, 0);
    assert_eq!(proxy.camera_id(), 0);
    assert!(proxy.characteristics().unwrap().is_facing_back());
    assert_eq!(agent.state(), CameraState::Idle);
    assert!(driver.is_open());

    agent.close_camera(true).unwrap();
    assert_eq!(agent.state(), CameraState::Unopened);
    assert!(!driver.is_open());
}

#[test]
fn test_unsynced_close_reaches_unopened() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    open(&agent, &executor, 1);

    agent.close_camera(false).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || agent.state() == CameraState::Unopened));
    assert!(!driver.is_open());
}

#[test]
fn test_open_failure_is_reported_to_callback() {
    let driver = Arc::new(MockCameraDriver::new());
    driver.fail_on("open");
    let (agent, executor) = agent_with(driver.clone());

    let (tx, rx) = mpsc::channel();
    agent
        .open_camera(Some(executor.clone()), 0, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    match rx.recv_timeout(CALLBACK_TIMEOUT).unwrap() {
        Err(AgentError::DeviceOpenFailure { camera_id, info }) => {
            assert_eq!(camera_id, 0);
            assert!(info.starts_with("HIST_0"));
        }
        other => panic!("unexpected open result: {other:?}"),
    }
    assert_eq!(agent.state(), CameraState::Unopened);

    driver.clear_failures();
    open(&agent, &executor, 0);
    assert_eq!(agent.state(), CameraState::Idle);
}

#[test]
fn test_second_open_reports_already_open() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver);
    open(&agent, &executor, 0);

    let (tx, rx) = mpsc::channel();
    agent
        .open_camera(Some(executor.clone()), 1, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    assert!(matches!(
        rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(),
        Err(AgentError::DeviceAlreadyOpen { camera_id: 1, .. })
    ));
    assert_eq!(agent.state(), CameraState::Idle);
}

#[test]
fn test_reconnect_success_and_failure() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);

    let (tx, rx) = mpsc::channel();
    let sender = tx.clone();
    proxy
        .reconnect(Some(executor.clone()), move |result| {
            let _ = sender.send(result);
        })
        .unwrap();
    let reconnected = rx.recv_timeout(CALLBACK_TIMEOUT).unwrap().unwrap();
    assert_eq!(reconnected.camera_id(), 0);
    assert_eq!(agent.state(), CameraState::Idle);

    driver.fail_on("reconnect");
    proxy
        .reconnect(Some(executor.clone()), move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    match rx.recv_timeout(CALLBACK_TIMEOUT).unwrap() {
        Err(AgentError::ReconnectionFailure { info }) => assert!(info.contains("reconnect")),
        other => panic!("unexpected reconnect result: {other:?}"),
    }
    // The camera stays open after a failed reconnect.
    assert!(driver.is_open());
}

#[test]
fn test_unlock_then_capture_then_lock() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);

    proxy.unlock().unwrap();
    assert_eq!(agent.state(), CameraState::Unlocked);

    let (tx, rx) = mpsc::channel();
    proxy
        .take_picture(
            Some(executor.clone()),
            PictureCallbacks::new().on_jpeg(move |data, _| {
                let _ = tx.send(data);
            }),
        )
        .unwrap();
    assert_eq!(
        rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(),
        Some(MOCK_JPEG.to_vec())
    );

    proxy.lock().unwrap();
    proxy.stop_preview().unwrap();
    assert_eq!(agent.state(), CameraState::Idle);
    let ops = driver.operations();
    let unlock = ops.iter().position(|op| op == "unlock").unwrap();
    let capture = ops.iter().position(|op| op == "take_picture").unwrap();
    let lock = ops.iter().position(|op| op == "lock").unwrap();
    assert!(unlock < capture && capture < lock);
}

#[test]
fn test_settings_apply_and_read_back() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);

    assert!(!proxy.apply_settings(None).unwrap());

    let unsupported = CameraSettings {
        zoom_index: 99,
        ..CameraSettings::default()
    };
    assert!(!proxy.apply_settings(Some(&unsupported)).unwrap());

    let settings = CameraSettings {
        zoom_index: 5,
        photo_size: Size::new(4032, 3024),
        ..CameraSettings::default()
    };
    assert!(proxy.apply_settings(Some(&settings)).unwrap());

    let read = proxy.get_settings().unwrap();
    assert_eq!(read, settings);
    assert_eq!(driver.current_settings(), settings);
    let dump = proxy.dump_device_settings();
    assert!(dump.contains("zoom_index=5\n"));
    assert!(dump.contains("focus_mode=auto\n"));
}

#[test]
fn test_settings_unavailable_after_close() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver);
    let proxy = open(&agent, &executor, 0);
    proxy.get_settings().unwrap();

    agent.close_camera(true).unwrap();
    assert!(matches!(proxy.get_settings(), Err(AgentError::DeviceNotOpen)));
    assert!(proxy.dump_device_settings().is_empty());
}

#[test]
fn test_preview_and_device_toggles() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);

    proxy
        .set_preview_surface_sync(PreviewSurface {
            id: 1,
            size: Size::new(1280, 720),
        })
        .unwrap();
    let (tx, rx) = mpsc::channel();
    proxy
        .start_preview_with_callback(Some(executor.clone()), move |proxy| {
            let _ = tx.send(proxy.camera_id());
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(), 0);

    proxy.enable_shutter_sound(false).unwrap();
    proxy.start_face_detection().unwrap();
    proxy.stop_face_detection().unwrap();
    proxy.stop_preview().unwrap();

    assert!(!driver.shutter_sound_enabled());
    let ops = driver.operations();
    let tail: Vec<&str> = ops.iter().skip(1).map(String::as_str).collect();
    assert_eq!(
        tail,
        vec![
            "set_preview_surface",
            "start_preview",
            "enable_shutter_sound",
            "start_face_detection",
            "stop_face_detection",
            "stop_preview",
        ]
    );
}

#[test]
fn test_capture_state_sequence() {
    let driver = Arc::new(MockCameraDriver::new().manual_completion());
    let (agent, executor) = agent_with(driver.clone());
    let mut states = vec![agent.state()];

    let proxy = open(&agent, &executor, 0);
    states.push(proxy.state());

    let (tx, rx) = mpsc::channel();
    proxy
        .take_picture(
            Some(executor.clone()),
            PictureCallbacks::new().on_jpeg(move |data, _| {
                let _ = tx.send(data);
            }),
        )
        .unwrap();
    proxy.get_settings().unwrap();
    states.push(proxy.state());

    assert!(driver.finish_capture(vec![7, 7, 7]));
    assert_eq!(rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(), Some(vec![7, 7, 7]));
    states.push(proxy.state());

    agent.close_camera(true).unwrap();
    states.push(agent.state());

    assert_eq!(
        states,
        vec![
            CameraState::Unopened,
            CameraState::Idle,
            CameraState::Capturing,
            CameraState::Idle,
            CameraState::Unopened,
        ]
    );
}

#[test]
fn test_callbacks_run_on_requested_executor() {
    let driver = Arc::new(MockCameraDriver::new());
    let agent = CameraAgent::new(driver, &fast_config()).unwrap();
    let recorder = RecordingExecutor::new("recorder");
    let executor: Arc<dyn Executor> = recorder.clone();

    let proxy = open(&agent, &executor, 0);
    let (tx, rx) = mpsc::channel();
    let shutter = tx.clone();
    proxy
        .take_picture(
            Some(executor.clone()),
            PictureCallbacks::new()
                .on_shutter(move |_| {
                    let _ = shutter.send("shutter");
                })
                .on_jpeg(move |_, _| {
                    let _ = tx.send("jpeg");
                }),
        )
        .unwrap();

    assert_eq!(rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(), "shutter");
    assert_eq!(rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(), "jpeg");
    let threads = recorder.threads();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|name| name.as_deref() == Some("recorder")));
}

#[test]
fn test_callbacks_without_executor_are_dropped() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);

    let (tx, rx) = mpsc::channel::<()>();
    proxy
        .take_picture(
            None,
            PictureCallbacks::new().on_jpeg(move |_, _| {
                let _ = tx.send(());
            }),
        )
        .unwrap();
    proxy.stop_preview().unwrap();

    assert!(driver.operations().iter().any(|op| op == "take_picture"));
    assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
    assert_eq!(agent.state(), CameraState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_handle_as_executor() {
    let driver = Arc::new(MockCameraDriver::new());
    let agent = CameraAgent::new(driver, &fast_config()).unwrap();
    let executor: Arc<dyn Executor> = Arc::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    agent
        .open_camera(Some(executor), 0, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    let proxy = tokio::time::timeout(CALLBACK_TIMEOUT, rx)
        .await
        .expect("open callback")
        .unwrap()
        .unwrap();
    assert_eq!(proxy.camera_id(), 0);

    tokio::task::spawn_blocking(move || agent.recycle())
        .await
        .unwrap();
}

#[test]
fn test_recycle_releases_camera_and_rejects_work() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);

    agent.recycle();

    assert!(!driver.is_open());
    assert_eq!(agent.state(), CameraState::Unopened);
    assert!(matches!(proxy.start_preview(), Err(AgentError::DispatcherEnded)));
    assert!(matches!(proxy.stop_preview(), Err(AgentError::DispatcherEnded)));
    assert!(matches!(
        agent.open_camera(None, 0, |_| {}),
        Err(AgentError::DispatcherEnded)
    ));
}

/// Run `f` on a helper thread and report whether it finished within `timeout`.
fn finishes_within(timeout: std::time::Duration, f: impl FnOnce() + Send + 'static) -> bool {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    rx.recv_timeout(timeout).is_ok()
}

#[test]
fn test_recycle_drops_gated_job_on_closed_camera() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);
    agent.close_camera(true).unwrap();

    // Waits for Idle, which a closed camera never reaches.
    proxy.take_picture(None, PictureCallbacks::new()).unwrap();

    let agent = Arc::new(agent);
    let recycled = {
        let agent = agent.clone();
        finishes_within(CALLBACK_TIMEOUT, move || agent.recycle())
    };
    assert!(recycled, "recycle did not finish with a gated job pending");
    assert!(!driver.operations().iter().any(|op| op == "take_picture"));
    assert_eq!(agent.state(), CameraState::Unopened);
    assert!(matches!(proxy.start_preview(), Err(AgentError::DispatcherEnded)));
}

#[test]
fn test_drop_with_pending_focus_gate_finishes() {
    let driver = Arc::new(MockCameraDriver::new().manual_completion());
    let (agent, executor) = agent_with(driver.clone());
    let proxy = open(&agent, &executor, 0);

    proxy.auto_focus(None, |_, _| {}).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || driver.has_pending_focus()));
    // Gated on Idle while the focus sweep never completes.
    proxy.take_picture(None, PictureCallbacks::new()).unwrap();

    assert!(
        finishes_within(CALLBACK_TIMEOUT, move || drop(agent)),
        "dropping the agent did not finish"
    );
    assert!(!driver.is_open());
    assert!(!driver.operations().iter().any(|op| op == "take_picture"));
}

#[test]
fn test_recycle_from_handler_executor() {
    let driver = Arc::new(MockCameraDriver::new());
    let (agent, executor) = agent_with(driver.clone());
    open(&agent, &executor, 0);

    let agent = Arc::new(agent);
    let (tx, rx) = mpsc::channel();
    let task_agent = agent.clone();
    assert!(agent.handler_executor().post(Box::new(move || {
        task_agent.recycle();
        let _ = tx.send(());
    })));

    rx.recv_timeout(CALLBACK_TIMEOUT)
        .expect("recycle on the handler thread returned");
    assert!(wait_until(CALLBACK_TIMEOUT, || !driver.is_open()));
    assert_eq!(agent.state(), CameraState::Unopened);
    assert!(matches!(
        agent.open_camera(None, 0, |_| {}),
        Err(AgentError::DispatcherEnded)
    ));

    // Already recycled: returns at once.
    assert!(finishes_within(CALLBACK_TIMEOUT, move || drop(agent)));
}
