//! Per-camera operation API.
//!
//! Every method queues a job on the dispatch thread and returns. Methods
//! documented as blocking wait for the handler to finish, bounded by the
//! configured operation timeout. Errors returned here are submission errors
//! (`QueueFull`, `DispatcherEnded`, `OperationTimeout`); device failures never
//! come back to the caller this way.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::agent::AgentContext;
use crate::command::{CaptureForwards, Command, OpenResult, PictureData};
use crate::device::{
    CameraCapabilities, CameraCharacteristics, CameraId, CameraSettings, PreviewSurface,
};
use crate::error::{AgentError, AgentResult};
use crate::forward::CallbackForward;
use crate::looper::Executor;
use crate::state::CameraState;

type ShutterFn = Box<dyn FnOnce(CameraProxy) + Send + 'static>;
type PictureFn = Box<dyn FnOnce(PictureData, CameraProxy) + Send + 'static>;

/// Callbacks for the stages of [`CameraProxy::take_picture`]. Unset stages
/// are skipped.
#[derive(Default)]
pub struct PictureCallbacks {
    shutter: Option<ShutterFn>,
    raw: Option<PictureFn>,
    postview: Option<PictureFn>,
    jpeg: Option<PictureFn>,
}

impl PictureCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_shutter(mut self, f: impl FnOnce(CameraProxy) + Send + 'static) -> Self {
        self.shutter = Some(Box::new(f));
        self
    }

    pub fn on_raw(mut self, f: impl FnOnce(PictureData, CameraProxy) + Send + 'static) -> Self {
        self.raw = Some(Box::new(f));
        self
    }

    pub fn on_postview(
        mut self,
        f: impl FnOnce(PictureData, CameraProxy) + Send + 'static,
    ) -> Self {
        self.postview = Some(Box::new(f));
        self
    }

    pub fn on_jpeg(mut self, f: impl FnOnce(PictureData, CameraProxy) + Send + 'static) -> Self {
        self.jpeg = Some(Box::new(f));
        self
    }
}

struct ProxyInner {
    camera_id: CameraId,
    characteristics: Option<CameraCharacteristics>,
    capabilities: CameraCapabilities,
    context: Arc<AgentContext>,
}

/// Handle to an open camera. Cheap to clone; all clones drive the same
/// camera through the same agent.
#[derive(Clone)]
pub struct CameraProxy {
    inner: Arc<ProxyInner>,
}

impl fmt::Debug for CameraProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraProxy")
            .field("camera_id", &self.inner.camera_id)
            .finish_non_exhaustive()
    }
}

impl CameraProxy {
    pub(crate) fn new(
        context: Arc<AgentContext>,
        camera_id: CameraId,
        characteristics: Option<CameraCharacteristics>,
        capabilities: CameraCapabilities,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                camera_id,
                characteristics,
                capabilities,
                context,
            }),
        }
    }

    fn context(&self) -> &AgentContext {
        &self.inner.context
    }

    fn forward<T, F>(&self, executor: Option<Arc<dyn Executor>>, callback: F) -> CallbackForward<T>
    where
        T: Send + 'static,
        F: FnOnce(T, CameraProxy) + Send + 'static,
    {
        CallbackForward::with_proxy(executor, self, callback)
    }

    pub fn camera_id(&self) -> CameraId {
        self.inner.camera_id
    }

    pub fn characteristics(&self) -> Option<&CameraCharacteristics> {
        self.inner.characteristics.as_ref()
    }

    pub fn capabilities(&self) -> &CameraCapabilities {
        &self.inner.capabilities
    }

    /// Current camera state. Advisory.
    pub fn state(&self) -> CameraState {
        self.context().state.state()
    }

    /// Re-acquire the camera. The result is delivered like an open result.
    pub fn reconnect<F>(&self, executor: Option<Arc<dyn Executor>>, callback: F) -> AgentResult<()>
    where
        F: FnOnce(OpenResult) + Send + 'static,
    {
        self.context().post_command(Command::Reconnect {
            camera_id: self.camera_id(),
            callback: CallbackForward::new(executor, Some(Box::new(callback))),
        })
    }

    /// Hand the camera to another user. Blocking.
    pub fn unlock(&self) -> AgentResult<()> {
        self.context().post_command_sync(Command::Unlock, "camera unlock")
    }

    /// Take the camera back after [`unlock`](Self::unlock).
    pub fn lock(&self) -> AgentResult<()> {
        self.context().post_command(Command::Lock)
    }

    pub fn set_preview_surface(&self, surface: PreviewSurface) -> AgentResult<()> {
        self.context().post_command(Command::SetPreviewSurface(surface))
    }

    /// Blocking variant of [`set_preview_surface`](Self::set_preview_surface).
    pub fn set_preview_surface_sync(&self, surface: PreviewSurface) -> AgentResult<()> {
        self.context()
            .post_command_sync(Command::SetPreviewSurface(surface), "set preview surface")
    }

    pub fn start_preview(&self) -> AgentResult<()> {
        self.context().post_command(Command::StartPreview {
            callback: CallbackForward::noop(),
        })
    }

    /// Start the preview and call `callback` on `executor` once it runs.
    pub fn start_preview_with_callback<F>(
        &self,
        executor: Option<Arc<dyn Executor>>,
        callback: F,
    ) -> AgentResult<()>
    where
        F: FnOnce(CameraProxy) + Send + 'static,
    {
        let callback = self.forward(executor, move |(), proxy| callback(proxy));
        self.context().post_command(Command::StartPreview { callback })
    }

    /// Blocking.
    pub fn stop_preview(&self) -> AgentResult<()> {
        self.context().post_command_sync(Command::StopPreview, "stop preview")
    }

    /// Focus once the camera is idle. `callback` receives whether focus
    /// succeeded.
    pub fn auto_focus<F>(&self, executor: Option<Arc<dyn Executor>>, callback: F) -> AgentResult<()>
    where
        F: FnOnce(bool, CameraProxy) + Send + 'static,
    {
        let callback = self.forward(executor, callback);
        self.context()
            .post_command_when(CameraState::Idle.into(), Command::AutoFocus { callback })
    }

    pub fn cancel_auto_focus(&self) -> AgentResult<()> {
        self.context().post_command(Command::CancelAutoFocus)
    }

    /// Capture once the camera is idle or unlocked.
    pub fn take_picture(
        &self,
        executor: Option<Arc<dyn Executor>>,
        callbacks: PictureCallbacks,
    ) -> AgentResult<()> {
        let PictureCallbacks {
            shutter,
            raw,
            postview,
            jpeg,
        } = callbacks;
        let picture = |f: Option<PictureFn>| match f {
            Some(f) => self.forward(executor.clone(), f),
            None => CallbackForward::noop(),
        };
        let forwards = CaptureForwards {
            shutter: match shutter {
                Some(f) => self.forward(executor.clone(), move |(), proxy| f(proxy)),
                None => CallbackForward::noop(),
            },
            raw: picture(raw),
            postview: picture(postview),
            jpeg: picture(jpeg),
        };
        self.context().post_command_when(
            CameraState::Idle | CameraState::Unlocked,
            Command::Capture(forwards),
        )
    }

    pub fn set_display_orientation(&self, degrees: u32) -> AgentResult<()> {
        self.context()
            .post_command(Command::SetDisplayOrientation(degrees))
    }

    pub fn start_face_detection(&self) -> AgentResult<()> {
        self.context().post_command(Command::StartFaceDetection)
    }

    pub fn stop_face_detection(&self) -> AgentResult<()> {
        self.context().post_command(Command::StopFaceDetection)
    }

    pub fn enable_shutter_sound(&self, enable: bool) -> AgentResult<()> {
        self.context().post_command(Command::EnableShutterSound(enable))
    }

    /// Queue `settings` to be applied once the camera is idle or unlocked.
    ///
    /// Returns `Ok(false)` without queueing anything when `settings` is
    /// absent or outside this camera's capabilities.
    pub fn apply_settings(&self, settings: Option<&CameraSettings>) -> AgentResult<bool> {
        let Some(settings) = settings else {
            debug!("no settings to apply");
            return Ok(false);
        };
        if !self.capabilities().supports(settings) {
            return Ok(false);
        }
        self.context().post_command_when(
            CameraState::Idle | CameraState::Unlocked,
            Command::ApplySettings(Box::new(settings.clone())),
        )?;
        Ok(true)
    }

    /// Current settings, re-read from the device if they changed. Blocking.
    pub fn get_settings(&self) -> AgentResult<CameraSettings> {
        self.context()
            .post_command_sync(Command::GetParameters, "get parameters")?;
        self.context()
            .parameters
            .lock()
            .clone()
            .ok_or(AgentError::DeviceNotOpen)
    }

    /// Mark the cached settings stale.
    pub fn refresh_settings(&self) -> AgentResult<()> {
        self.context().post_command(Command::RefreshParameters)
    }

    /// The cached settings as `key=value` lines. Empty until settings have
    /// been read once.
    pub fn dump_device_settings(&self) -> String {
        self.context()
            .parameters
            .lock()
            .as_ref()
            .map(CameraSettings::dump)
            .unwrap_or_default()
    }
}
