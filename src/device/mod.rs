//! Camera device collaborator interface.
//!
//! The agent never talks to hardware directly. A [`CameraDriver`] enumerates
//! cameras and opens them; the resulting [`CameraDevice`] is owned by the
//! camera handler thread and only ever called from there. Device calls return
//! `anyhow::Result` and are wrapped into [`AgentError`](crate::error::AgentError)
//! at the handler boundary.
//!
//! Long-running operations (auto-focus, capture) complete asynchronously: the
//! device keeps the [`FocusSink`] / [`CaptureSink`] it was handed and reports
//! through it later, from any thread.

pub mod mock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use crate::handler::{CaptureSink, FocusSink};

/// Camera index as reported by the driver.
pub type CameraId = u32;

/// Driver for a family of cameras.
pub trait CameraDriver: Send + Sync {
    /// Enumerate the cameras this driver can open.
    fn device_info(&self) -> Result<CameraDeviceInfo>;

    /// Open camera `camera_id` for exclusive use.
    fn open(&self, camera_id: CameraId) -> Result<Box<dyn CameraDevice>>;
}

/// An open camera.
pub trait CameraDevice: Send {
    /// Release the device. The handle is discarded afterwards.
    fn release(&mut self) -> Result<()>;

    /// Re-acquire the device after another process used it.
    fn reconnect(&mut self) -> Result<()>;

    /// Re-take the device after [`unlock`](Self::unlock).
    fn lock(&mut self) -> Result<()>;

    /// Let another user (e.g. a recorder) access the device.
    fn unlock(&mut self) -> Result<()>;

    fn set_preview_surface(&mut self, surface: &PreviewSurface) -> Result<()>;

    fn start_preview(&mut self) -> Result<()>;

    fn stop_preview(&mut self) -> Result<()>;

    /// Start an auto-focus sweep; report the outcome through `sink`.
    fn auto_focus(&mut self, sink: FocusSink) -> Result<()>;

    fn cancel_auto_focus(&mut self) -> Result<()>;

    /// Start a capture; report each stage through `sink`.
    fn take_picture(&mut self, sink: CaptureSink) -> Result<()>;

    fn set_display_orientation(&mut self, degrees: u32) -> Result<()>;

    fn enable_shutter_sound(&mut self, enable: bool) -> Result<()>;

    fn start_face_detection(&mut self) -> Result<()>;

    fn stop_face_detection(&mut self) -> Result<()>;

    /// Read the settings currently in effect.
    fn parameters(&mut self) -> Result<CameraSettings>;

    fn apply_settings(&mut self, settings: &CameraSettings) -> Result<()>;

    /// Static capabilities, read once when the device is opened.
    fn capabilities(&self) -> CameraCapabilities;
}

// ============================================================================
// Enumeration
// ============================================================================

/// Which way a camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Back,
    Front,
    External,
}

/// Static per-camera facts reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraCharacteristics {
    pub facing: Facing,
    /// Clockwise rotation of the sensor relative to the device, in degrees
    pub sensor_orientation: u32,
    pub can_disable_shutter_sound: bool,
}

impl CameraCharacteristics {
    pub fn is_facing_back(&self) -> bool {
        self.facing == Facing::Back
    }

    pub fn is_facing_front(&self) -> bool {
        self.facing == Facing::Front
    }
}

/// Enumeration of the cameras a driver exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDeviceInfo {
    cameras: Vec<CameraCharacteristics>,
}

impl CameraDeviceInfo {
    /// Camera ids are indices into `cameras`.
    pub fn new(cameras: Vec<CameraCharacteristics>) -> Self {
        Self { cameras }
    }

    pub fn number_of_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn characteristics(&self, camera_id: CameraId) -> Option<&CameraCharacteristics> {
        self.cameras.get(camera_id as usize)
    }

    /// Smallest id of a back-facing camera.
    pub fn first_back_camera_id(&self) -> Option<CameraId> {
        self.first_facing(Facing::Back)
    }

    /// Smallest id of a front-facing camera.
    pub fn first_front_camera_id(&self) -> Option<CameraId> {
        self.first_facing(Facing::Front)
    }

    fn first_facing(&self, facing: Facing) -> Option<CameraId> {
        self.cameras
            .iter()
            .position(|c| c.facing == facing)
            .and_then(|i| CameraId::try_from(i).ok())
    }
}

// ============================================================================
// Settings and capabilities
// ============================================================================

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    Auto,
    ContinuousPicture,
    ContinuousVideo,
    Fixed,
    Infinity,
    Macro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    Off,
    Auto,
    On,
    Torch,
}

/// Snapshot of configurable camera parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub photo_size: Size,
    pub preview_size: Size,
    /// Preview frame-rate range in frames per second, `(min, max)`
    pub preview_fps_range: (u32, u32),
    pub jpeg_quality: u8,
    pub zoom_index: u32,
    pub exposure_compensation: i32,
    pub focus_mode: FocusMode,
    pub flash_mode: FlashMode,
    pub auto_exposure_lock: bool,
    pub auto_white_balance_lock: bool,
    pub recording_hint: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            photo_size: Size::new(1920, 1080),
            preview_size: Size::new(1280, 720),
            preview_fps_range: (15, 30),
            jpeg_quality: 95,
            zoom_index: 0,
            exposure_compensation: 0,
            focus_mode: FocusMode::Auto,
            flash_mode: FlashMode::Off,
            auto_exposure_lock: false,
            auto_white_balance_lock: false,
            recording_hint: false,
        }
    }
}

impl CameraSettings {
    /// One `key=value` line per parameter, sorted by key.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(self) {
            for (key, value) in fields {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                out.push_str(&key);
                out.push('=');
                out.push_str(&value);
                out.push('\n');
            }
        }
        out
    }
}

/// What a camera can be configured to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraCapabilities {
    pub photo_sizes: Vec<Size>,
    pub preview_sizes: Vec<Size>,
    pub focus_modes: Vec<FocusMode>,
    pub flash_modes: Vec<FlashMode>,
    pub max_zoom_index: u32,
    /// Inclusive exposure compensation range, `(min, max)`
    pub exposure_compensation_range: (i32, i32),
    pub max_fps: u32,
}

impl CameraCapabilities {
    /// True if every value in `settings` is within these capabilities.
    pub fn supports(&self, settings: &CameraSettings) -> bool {
        let (min_fps, max_fps) = settings.preview_fps_range;
        let (min_ev, max_ev) = self.exposure_compensation_range;

        self.photo_sizes.contains(&settings.photo_size)
            && self.preview_sizes.contains(&settings.preview_size)
            && self.focus_modes.contains(&settings.focus_mode)
            && self.flash_modes.contains(&settings.flash_mode)
            && settings.zoom_index <= self.max_zoom_index
            && (min_ev..=max_ev).contains(&settings.exposure_compensation)
            && min_fps <= max_fps
            && max_fps <= self.max_fps
            && (1..=100).contains(&settings.jpeg_quality)
    }
}

/// Opaque handle to the surface the preview is rendered into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewSurface {
    pub id: u64,
    pub size: Size,
}
