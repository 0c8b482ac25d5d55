//! In-memory camera driver for tests and the demo binary.
//!
//! Records every device call, can be told to fail or panic in a named
//! operation, and completes focus and capture either immediately or when the
//! test says so.

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::{
    CameraCapabilities, CameraCharacteristics, CameraDevice, CameraDeviceInfo, CameraDriver,
    CameraId, CameraSettings, CaptureSink, Facing, FlashMode, FocusMode, FocusSink,
    PreviewSurface, Size,
};

/// JPEG payload delivered by immediate captures.
pub const MOCK_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

/// When asynchronous operations report completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Inside the device call that started them
    Immediate,
    /// When [`MockCameraDriver::finish_focus`] or
    /// [`MockCameraDriver::finish_capture`] is called
    Manual,
}

#[derive(Default)]
struct MockState {
    open: Option<CameraId>,
    operations: Vec<String>,
    failures: HashSet<&'static str>,
    panics: HashSet<&'static str>,
    pending_focus: Option<FocusSink>,
    pending_capture: Option<CaptureSink>,
    settings: CameraSettings,
    shutter_sound: bool,
    orientations: Vec<u32>,
}

/// Mock camera driver with two cameras: back-facing id 0, front-facing id 1.
pub struct MockCameraDriver {
    info: CameraDeviceInfo,
    capabilities: CameraCapabilities,
    completion: Completion,
    state: Arc<Mutex<MockState>>,
}

impl MockCameraDriver {
    pub fn new() -> Self {
        Self::with_cameras(vec![
            CameraCharacteristics {
                facing: Facing::Back,
                sensor_orientation: 90,
                can_disable_shutter_sound: true,
            },
            CameraCharacteristics {
                facing: Facing::Front,
                sensor_orientation: 270,
                can_disable_shutter_sound: false,
            },
        ])
    }

    pub fn with_cameras(cameras: Vec<CameraCharacteristics>) -> Self {
        Self {
            info: CameraDeviceInfo::new(cameras),
            capabilities: Self::default_capabilities(),
            completion: Completion::Immediate,
            state: Arc::new(Mutex::new(MockState {
                shutter_sound: true,
                ..MockState::default()
            })),
        }
    }

    /// Hold focus and capture completions until finished explicitly.
    pub fn manual_completion(mut self) -> Self {
        self.completion = Completion::Manual;
        self
    }

    pub fn default_capabilities() -> CameraCapabilities {
        CameraCapabilities {
            photo_sizes: vec![Size::new(1920, 1080), Size::new(4032, 3024)],
            preview_sizes: vec![Size::new(1280, 720), Size::new(1920, 1080)],
            focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousPicture, FocusMode::Fixed],
            flash_modes: vec![FlashMode::Off, FlashMode::Auto, FlashMode::On],
            max_zoom_index: 30,
            exposure_compensation_range: (-6, 6),
            max_fps: 30,
        }
    }

    /// Make every later call to `operation` fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.state.lock().failures.insert(operation);
    }

    /// Make every later call to `operation` panic.
    pub fn panic_on(&self, operation: &'static str) {
        self.state.lock().panics.insert(operation);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.panics.clear();
    }

    /// Device calls made so far, by name.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().operations.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open.is_some()
    }

    /// Settings most recently applied to the device.
    pub fn current_settings(&self) -> CameraSettings {
        self.state.lock().settings.clone()
    }

    pub fn shutter_sound_enabled(&self) -> bool {
        self.state.lock().shutter_sound
    }

    /// Every display orientation set, in call order.
    pub fn display_orientations(&self) -> Vec<u32> {
        self.state.lock().orientations.clone()
    }

    /// Complete a pending auto-focus. Returns `false` if none is pending.
    pub fn finish_focus(&self, success: bool) -> bool {
        let sink = self.state.lock().pending_focus.take();
        match sink {
            Some(sink) => {
                sink.done(success);
                true
            }
            None => false,
        }
    }

    /// Complete a pending capture. Returns `false` if none is pending.
    pub fn finish_capture(&self, jpeg: Vec<u8>) -> bool {
        let sink = self.state.lock().pending_capture.take();
        match sink {
            Some(sink) => {
                finish_capture(sink, jpeg);
                true
            }
            None => false,
        }
    }

    pub fn has_pending_capture(&self) -> bool {
        self.state.lock().pending_capture.is_some()
    }

    pub fn has_pending_focus(&self) -> bool {
        self.state.lock().pending_focus.is_some()
    }
}

impl Default for MockCameraDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn finish_capture(mut sink: CaptureSink, jpeg: Vec<u8>) {
    sink.shutter();
    sink.raw(None);
    sink.postview(None);
    sink.jpeg(Some(jpeg));
}

/// Record `operation` and apply any injected failure.
#[allow(clippy::panic)]
fn record(state: &Mutex<MockState>, operation: &'static str) -> Result<()> {
    let mut state = state.lock();
    state.operations.push(operation.to_string());
    if state.panics.contains(operation) {
        drop(state);
        panic!("mock camera panicked in {operation}");
    }
    if state.failures.contains(operation) {
        bail!("mock camera failure in {operation}");
    }
    Ok(())
}

impl CameraDriver for MockCameraDriver {
    fn device_info(&self) -> Result<CameraDeviceInfo> {
        Ok(self.info.clone())
    }

    fn open(&self, camera_id: CameraId) -> Result<Box<dyn CameraDevice>> {
        record(&self.state, "open")?;
        if self.info.characteristics(camera_id).is_none() {
            return Err(anyhow!("no camera with id {camera_id}"));
        }
        let mut state = self.state.lock();
        if let Some(open) = state.open {
            bail!("camera {open} is already in use");
        }
        state.open = Some(camera_id);
        debug!(camera_id, "mock camera opened");

        Ok(Box::new(MockCameraDevice {
            camera_id,
            capabilities: self.capabilities.clone(),
            completion: self.completion,
            state: self.state.clone(),
        }))
    }
}

struct MockCameraDevice {
    camera_id: CameraId,
    capabilities: CameraCapabilities,
    completion: Completion,
    state: Arc<Mutex<MockState>>,
}

impl CameraDevice for MockCameraDevice {
    fn release(&mut self) -> Result<()> {
        record(&self.state, "release")?;
        let mut state = self.state.lock();
        state.open = None;
        state.pending_focus = None;
        state.pending_capture = None;
        debug!(camera_id = self.camera_id, "mock camera released");
        Ok(())
    }

    fn reconnect(&mut self) -> Result<()> {
        record(&self.state, "reconnect")
    }

    fn lock(&mut self) -> Result<()> {
        record(&self.state, "lock")
    }

    fn unlock(&mut self) -> Result<()> {
        record(&self.state, "unlock")
    }

    fn set_preview_surface(&mut self, _surface: &PreviewSurface) -> Result<()> {
        record(&self.state, "set_preview_surface")
    }

    fn start_preview(&mut self) -> Result<()> {
        record(&self.state, "start_preview")
    }

    fn stop_preview(&mut self) -> Result<()> {
        record(&self.state, "stop_preview")
    }

    fn auto_focus(&mut self, sink: FocusSink) -> Result<()> {
        record(&self.state, "auto_focus")?;
        match self.completion {
            Completion::Immediate => sink.done(true),
            Completion::Manual => self.state.lock().pending_focus = Some(sink),
        }
        Ok(())
    }

    fn cancel_auto_focus(&mut self) -> Result<()> {
        record(&self.state, "cancel_auto_focus")?;
        self.state.lock().pending_focus = None;
        Ok(())
    }

    fn take_picture(&mut self, sink: CaptureSink) -> Result<()> {
        record(&self.state, "take_picture")?;
        match self.completion {
            Completion::Immediate => finish_capture(sink, MOCK_JPEG.to_vec()),
            Completion::Manual => self.state.lock().pending_capture = Some(sink),
        }
        Ok(())
    }

    fn set_display_orientation(&mut self, degrees: u32) -> Result<()> {
        record(&self.state, "set_display_orientation")?;
        self.state.lock().orientations.push(degrees);
        Ok(())
    }

    fn enable_shutter_sound(&mut self, enable: bool) -> Result<()> {
        record(&self.state, "enable_shutter_sound")?;
        self.state.lock().shutter_sound = enable;
        Ok(())
    }

    fn start_face_detection(&mut self) -> Result<()> {
        record(&self.state, "start_face_detection")
    }

    fn stop_face_detection(&mut self) -> Result<()> {
        record(&self.state, "stop_face_detection")
    }

    fn parameters(&mut self) -> Result<CameraSettings> {
        record(&self.state, "parameters")?;
        Ok(self.state.lock().settings.clone())
    }

    fn apply_settings(&mut self, settings: &CameraSettings) -> Result<()> {
        record(&self.state, "apply_settings")?;
        self.state.lock().settings = settings.clone();
        Ok(())
    }

    fn capabilities(&self) -> CameraCapabilities {
        self.capabilities.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_records_and_rejects_second_open() {
        let driver = MockCameraDriver::new();
        let mut device = driver.open(0).unwrap();
        assert!(driver.is_open());
        assert!(driver.open(1).is_err());

        device.release().unwrap();
        assert!(!driver.is_open());
        assert_eq!(driver.operations(), vec!["open", "open", "release"]);
    }

    #[test]
    fn test_unknown_camera_fails() {
        let driver = MockCameraDriver::new();
        assert!(driver.open(7).is_err());
        assert!(!driver.is_open());
    }

    #[test]
    fn test_injected_failure() {
        let driver = MockCameraDriver::new();
        let mut device = driver.open(0).unwrap();
        driver.fail_on("start_preview");
        assert!(device.start_preview().is_err());
        driver.clear_failures();
        assert!(device.start_preview().is_ok());
    }

    #[test]
    fn test_apply_then_read_settings() {
        let driver = MockCameraDriver::new();
        let mut device = driver.open(0).unwrap();
        let mut settings = CameraSettings::default();
        settings.zoom_index = 4;
        device.apply_settings(&settings).unwrap();
        assert_eq!(device.parameters().unwrap().zoom_index, 4);
        assert_eq!(driver.current_settings(), settings);
    }

    #[test]
    fn test_default_capabilities_support_default_settings() {
        assert!(MockCameraDriver::default_capabilities().supports(&CameraSettings::default()));
    }
}
