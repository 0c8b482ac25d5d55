//! The camera handler thread.
//!
//! The handler owns the open [`CameraDevice`] and is the only place device
//! calls are made and the camera state is written. It consumes a mailbox of
//! [`HandlerMessage`]s: commands are dispatched through a table keyed by
//! [`CommandTag`], plain tasks (barrier unlocks, callbacks posted to the
//! handler as an executor) are run in line.
//!
//! ## Failure handling
//!
//! A routine that fails or panics is handled at the loop boundary:
//!
//! - device open and the command is not `Release`: the device is
//!   force-released, the state reset to `Unopened`, and the error escalated
//!   to the agent's [`ExceptionPolicy`](crate::exception::ExceptionPolicy)
//! - no device open: an `Open` reports `DeviceOpenFailure` to its callback;
//!   anything else is logged and dropped
//! - `Release` failing with a device open: escalated, device kept

use std::collections::HashMap;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::agent::AgentContext;
use crate::command::{CaptureForwards, Command, CommandHistory, CommandTag, PictureData};
use crate::device::{CameraDevice, CameraDriver, CameraId};
use crate::error::{AgentError, AgentResult};
use crate::forward::CallbackForward;
use crate::looper::{panic_message, run_contained, Executor, Task};
use crate::proxy::CameraProxy;
use crate::state::CameraState;

/// Message consumed by the handler thread.
pub(crate) enum HandlerMessage {
    Command(Command),
    Task(Task),
    Quit,
}

/// Sending side of the handler thread's message queue.
///
/// Also an [`Executor`]: tasks posted to it run on the handler thread,
/// ordered with commands.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::UnboundedSender<HandlerMessage>,
}

/// Receiving side of the handler thread's message queue.
pub(crate) struct MailboxReceiver {
    receiver: mpsc::UnboundedReceiver<HandlerMessage>,
}

impl Mailbox {
    pub(crate) fn channel() -> (Mailbox, MailboxReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Mailbox { sender }, MailboxReceiver { receiver })
    }

    /// Queue `command` for the handler. Returns `false` if the handler has
    /// quit.
    pub(crate) fn send(&self, command: Command) -> bool {
        let tag = command.tag();
        let sent = self.sender.send(HandlerMessage::Command(command)).is_ok();
        if !sent {
            warn!(command = %tag, "camera handler has quit; command dropped");
        }
        sent
    }

    /// Ask the handler to exit after the messages already queued.
    pub(crate) fn quit(&self) -> bool {
        self.sender.send(HandlerMessage::Quit).is_ok()
    }
}

impl Executor for Mailbox {
    fn post(&self, task: Task) -> bool {
        self.sender.send(HandlerMessage::Task(task)).is_ok()
    }
}

impl MailboxReceiver {
    /// Run `handler` on a new named thread until told to quit.
    pub(crate) fn spawn(
        mut self,
        name: &str,
        mut handler: CameraHandler,
    ) -> std::io::Result<JoinHandle<()>> {
        let name = name.to_string();
        thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(message) = self.receiver.blocking_recv() {
                match message {
                    HandlerMessage::Command(command) => handler.handle(command),
                    HandlerMessage::Task(task) => run_contained(&name, task),
                    HandlerMessage::Quit => break,
                }
            }
            handler.shutdown();
            debug!(thread = %name, "camera handler exited");
        })
    }

    /// Run only tasks, dropping commands. Used where a dispatcher is tested
    /// without a camera behind it.
    #[cfg(test)]
    pub(crate) fn spawn_passthrough(mut self, name: &str) -> std::io::Result<JoinHandle<()>> {
        let name = name.to_string();
        thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(message) = self.receiver.blocking_recv() {
                match message {
                    HandlerMessage::Command(_) => {}
                    HandlerMessage::Task(task) => run_contained(&name, task),
                    HandlerMessage::Quit => break,
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<HandlerMessage> {
        self.receiver.try_recv().ok()
    }
}

// ============================================================================
// Completion sinks
// ============================================================================

/// Handed to [`CameraDevice::auto_focus`]; reports the end of the sweep.
pub struct FocusSink {
    callback: CallbackForward<bool>,
    mailbox: Mailbox,
}

impl FocusSink {
    pub(crate) fn new(callback: CallbackForward<bool>, mailbox: Mailbox) -> Self {
        Self { callback, mailbox }
    }

    /// The sweep finished. Safe to call from any thread.
    pub fn done(self, success: bool) {
        self.mailbox.send(Command::FocusDone {
            success,
            callback: self.callback,
        });
    }
}

/// Handed to [`CameraDevice::take_picture`]; reports each capture stage.
///
/// `shutter`, `raw` and `postview` go straight to the caller. `jpeg` ends the
/// capture and goes through the handler, which returns the camera to `Idle`.
pub struct CaptureSink {
    forwards: CaptureForwards,
    mailbox: Mailbox,
}

impl CaptureSink {
    pub(crate) fn new(forwards: CaptureForwards, mailbox: Mailbox) -> Self {
        Self { forwards, mailbox }
    }

    pub fn shutter(&mut self) {
        mem::take(&mut self.forwards.shutter).forward(());
    }

    pub fn raw(&mut self, data: PictureData) {
        mem::take(&mut self.forwards.raw).forward(data);
    }

    pub fn postview(&mut self, data: PictureData) {
        mem::take(&mut self.forwards.postview).forward(data);
    }

    /// The capture finished. Safe to call from any thread.
    pub fn jpeg(self, data: PictureData) {
        self.mailbox.send(Command::PictureTaken {
            data,
            callback: self.forwards.jpeg,
        });
    }
}

// ============================================================================
// Handler
// ============================================================================

type Routine = fn(&mut CameraHandler, &mut Command) -> AgentResult<()>;

/// State owned by the handler thread.
pub(crate) struct CameraHandler {
    driver: Arc<dyn CameraDriver>,
    context: Arc<AgentContext>,
    device: Option<Box<dyn CameraDevice>>,
    camera_id: CameraId,
    proxy: Option<CameraProxy>,
    parameters_dirty: bool,
    history: CommandHistory,
    routines: HashMap<CommandTag, Routine>,
}

fn routines() -> HashMap<CommandTag, Routine> {
    let mut table: HashMap<CommandTag, Routine> = HashMap::with_capacity(CommandTag::ALL.len());
    table.insert(CommandTag::Open, CameraHandler::open);
    table.insert(CommandTag::Release, CameraHandler::release);
    table.insert(CommandTag::Reconnect, CameraHandler::reconnect);
    table.insert(CommandTag::Unlock, CameraHandler::unlock);
    table.insert(CommandTag::Lock, CameraHandler::lock);
    table.insert(CommandTag::SetPreviewSurface, CameraHandler::set_preview_surface);
    table.insert(CommandTag::StartPreview, CameraHandler::start_preview);
    table.insert(CommandTag::StopPreview, CameraHandler::stop_preview);
    table.insert(CommandTag::AutoFocus, CameraHandler::auto_focus);
    table.insert(CommandTag::CancelAutoFocus, CameraHandler::cancel_auto_focus);
    table.insert(CommandTag::FocusDone, CameraHandler::focus_done);
    table.insert(CommandTag::Capture, CameraHandler::capture);
    table.insert(CommandTag::PictureTaken, CameraHandler::picture_taken);
    table.insert(CommandTag::SetDisplayOrientation, CameraHandler::set_display_orientation);
    table.insert(CommandTag::EnableShutterSound, CameraHandler::enable_shutter_sound);
    table.insert(CommandTag::StartFaceDetection, CameraHandler::start_face_detection);
    table.insert(CommandTag::StopFaceDetection, CameraHandler::stop_face_detection);
    table.insert(CommandTag::ApplySettings, CameraHandler::apply_settings);
    table.insert(CommandTag::GetParameters, CameraHandler::get_parameters);
    table.insert(CommandTag::RefreshParameters, CameraHandler::refresh_parameters);
    table
}

/// The open device, or `DeviceNotOpen`.
fn opened(
    device: &mut Option<Box<dyn CameraDevice>>,
) -> AgentResult<&mut (dyn CameraDevice + 'static)> {
    device.as_deref_mut().ok_or(AgentError::DeviceNotOpen)
}

fn mismatch(routine: CommandTag, command: &Command) -> AgentError {
    AgentError::InvalidCommand(format!(
        "{} routine received a {} command",
        routine,
        command.tag()
    ))
}

impl CameraHandler {
    pub(crate) fn new(
        driver: Arc<dyn CameraDriver>,
        context: Arc<AgentContext>,
        history_size: usize,
    ) -> Self {
        Self {
            driver,
            context,
            device: None,
            camera_id: 0,
            proxy: None,
            parameters_dirty: true,
            history: CommandHistory::new(history_size),
            routines: routines(),
        }
    }

    /// Run one command through the dispatch table and the failure boundary.
    pub(crate) fn handle(&mut self, mut command: Command) {
        let tag = command.tag();
        self.history.record(tag);
        debug!(command = %tag, "handling camera command");

        let result = match self.routines.get(&tag).copied() {
            Some(routine) => catch_unwind(AssertUnwindSafe(|| routine(self, &mut command)))
                .unwrap_or_else(|payload| {
                    Err(AgentError::device(
                        tag.as_str(),
                        anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())),
                    ))
                }),
            None => Err(AgentError::InvalidCommand(format!(
                "no routine registered for {tag}"
            ))),
        };

        if let Err(err) = result {
            self.on_failure(tag, command, err);
        }
    }

    fn on_failure(&mut self, tag: CommandTag, mut command: Command, err: AgentError) {
        if self.device.is_none() {
            match command.take_open_callback() {
                Some((camera_id, callback)) => {
                    warn!(camera_id, error = %err, "failed to open camera");
                    let info = self.history.describe(camera_id);
                    callback.forward(Err(AgentError::DeviceOpenFailure { camera_id, info }));
                }
                None => {
                    warn!(command = %tag, error = %err, "cannot handle command, no camera open");
                }
            }
            return;
        }

        if tag != CommandTag::Release {
            self.force_release();
        }
        self.context.exception.escalate(err);
    }

    /// Release the device after a failure. Release errors are logged, not
    /// raised; the handle is dropped either way.
    fn force_release(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.release() {
                error!(camera_id = self.camera_id, error = %e, "failed to release the camera");
            }
        }
        self.forget_device_state();
    }

    fn forget_device_state(&mut self) {
        self.proxy = None;
        self.parameters_dirty = true;
        *self.context.parameters.lock() = None;
        self.context.state.set_state(CameraState::Unopened);
    }

    /// Called once the handler loop exits.
    fn shutdown(&mut self) {
        if self.device.is_some() {
            warn!(camera_id = self.camera_id, "camera still open at shutdown; releasing");
            self.force_release();
        }
    }

    fn proxy(&self) -> Option<CameraProxy> {
        self.proxy.clone()
    }

    // ------------------------------------------------------------------------
    // Routines
    // ------------------------------------------------------------------------

    fn open(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::Open {
            camera_id,
            callback,
        } = command
        else {
            return Err(mismatch(CommandTag::Open, command));
        };
        let camera_id = *camera_id;

        if self.context.state.state() != CameraState::Unopened {
            warn!(camera_id, "camera already open");
            let history = self.history.describe(camera_id);
            mem::take(callback).forward(Err(AgentError::DeviceAlreadyOpen { camera_id, history }));
            return Ok(());
        }

        let device = self
            .driver
            .open(camera_id)
            .map_err(|e| AgentError::device("open", e))?;
        let capabilities = device.capabilities();
        let characteristics = match self.driver.device_info() {
            Ok(info) => info.characteristics(camera_id).cloned(),
            Err(e) => {
                warn!(camera_id, error = %e, "could not read camera characteristics");
                None
            }
        };

        self.device = Some(device);
        self.camera_id = camera_id;
        self.parameters_dirty = true;
        let proxy =
            CameraProxy::new(self.context.clone(), camera_id, characteristics, capabilities);
        self.proxy = Some(proxy.clone());
        self.context.state.set_state(CameraState::Idle);
        info!(camera_id, "camera opened");

        mem::take(callback).forward(Ok(proxy));
        Ok(())
    }

    fn release(&mut self, _command: &mut Command) -> AgentResult<()> {
        let Some(device) = self.device.as_deref_mut() else {
            warn!("releasing camera without any camera opened");
            return Ok(());
        };
        device
            .release()
            .map_err(|e| AgentError::device("release", e))?;

        self.device = None;
        self.forget_device_state();
        info!(camera_id = self.camera_id, "camera released");
        Ok(())
    }

    fn reconnect(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::Reconnect {
            camera_id,
            callback,
        } = command
        else {
            return Err(mismatch(CommandTag::Reconnect, command));
        };
        let camera_id = *camera_id;

        if let Err(e) = opened(&mut self.device)?.reconnect() {
            warn!(camera_id, error = %e, "camera reconnection failed");
            let info = self.history.describe(self.camera_id);
            mem::take(callback).forward(Err(AgentError::ReconnectionFailure { info }));
            return Ok(());
        }

        self.context.state.set_state(CameraState::Idle);
        match self.proxy() {
            Some(proxy) => {
                mem::take(callback).forward(Ok(proxy));
            }
            None => warn!(camera_id, "reconnected without a camera proxy"),
        }
        Ok(())
    }

    fn unlock(&mut self, _command: &mut Command) -> AgentResult<()> {
        opened(&mut self.device)?
            .unlock()
            .map_err(|e| AgentError::device("unlock", e))?;
        self.context.state.set_state(CameraState::Unlocked);
        Ok(())
    }

    fn lock(&mut self, _command: &mut Command) -> AgentResult<()> {
        opened(&mut self.device)?
            .lock()
            .map_err(|e| AgentError::device("lock", e))?;
        self.context.state.set_state(CameraState::Idle);
        Ok(())
    }

    fn set_preview_surface(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::SetPreviewSurface(surface) = command else {
            return Err(mismatch(CommandTag::SetPreviewSurface, command));
        };
        // A bad surface leaves the camera usable; report and carry on.
        if let Err(e) = opened(&mut self.device)?.set_preview_surface(surface) {
            error!(surface = surface.id, error = %e, "could not set preview surface");
        }
        Ok(())
    }

    fn start_preview(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::StartPreview { callback } = command else {
            return Err(mismatch(CommandTag::StartPreview, command));
        };
        opened(&mut self.device)?
            .start_preview()
            .map_err(|e| AgentError::device("start preview", e))?;
        mem::take(callback).forward(());
        Ok(())
    }

    fn stop_preview(&mut self, _command: &mut Command) -> AgentResult<()> {
        opened(&mut self.device)?
            .stop_preview()
            .map_err(|e| AgentError::device("stop preview", e))
    }

    fn auto_focus(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::AutoFocus { callback } = command else {
            return Err(mismatch(CommandTag::AutoFocus, command));
        };
        let device = opened(&mut self.device)?;
        let sink = FocusSink::new(mem::take(callback), self.context.mailbox.clone());
        self.context.state.set_state(CameraState::Focusing);
        device
            .auto_focus(sink)
            .map_err(|e| AgentError::device("auto focus", e))
    }

    fn cancel_auto_focus(&mut self, _command: &mut Command) -> AgentResult<()> {
        opened(&mut self.device)?
            .cancel_auto_focus()
            .map_err(|e| AgentError::device("cancel auto focus", e))?;
        self.context.state.set_state(CameraState::Idle);
        Ok(())
    }

    fn focus_done(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::FocusDone { success, callback } = command else {
            return Err(mismatch(CommandTag::FocusDone, command));
        };
        let state = self.context.state.state();
        if state == CameraState::Focusing {
            self.context.state.set_state(CameraState::Idle);
        } else {
            warn!(%state, "auto focus completed while not focusing");
        }
        mem::take(callback).forward(*success);
        Ok(())
    }

    fn capture(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::Capture(forwards) = command else {
            return Err(mismatch(CommandTag::Capture, command));
        };
        let device = opened(&mut self.device)?;
        let sink = CaptureSink::new(mem::take(forwards), self.context.mailbox.clone());
        self.context.state.set_state(CameraState::Capturing);
        device.take_picture(sink).map_err(|e| {
            error!(camera_id = self.camera_id, "take picture failed");
            AgentError::device("take picture", e)
        })
    }

    fn picture_taken(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::PictureTaken { data, callback } = command else {
            return Err(mismatch(CommandTag::PictureTaken, command));
        };
        let state = self.context.state.state();
        if state == CameraState::Capturing {
            self.context.state.set_state(CameraState::Idle);
        } else {
            warn!(%state, "picture delivered while not capturing");
        }
        mem::take(callback).forward(data.take());
        Ok(())
    }

    fn set_display_orientation(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::SetDisplayOrientation(degrees) = command else {
            return Err(mismatch(CommandTag::SetDisplayOrientation, command));
        };
        opened(&mut self.device)?
            .set_display_orientation(*degrees)
            .map_err(|e| AgentError::device("set display orientation", e))
    }

    fn enable_shutter_sound(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::EnableShutterSound(enable) = command else {
            return Err(mismatch(CommandTag::EnableShutterSound, command));
        };
        opened(&mut self.device)?
            .enable_shutter_sound(*enable)
            .map_err(|e| AgentError::device("enable shutter sound", e))
    }

    fn start_face_detection(&mut self, _command: &mut Command) -> AgentResult<()> {
        opened(&mut self.device)?
            .start_face_detection()
            .map_err(|e| AgentError::device("start face detection", e))
    }

    fn stop_face_detection(&mut self, _command: &mut Command) -> AgentResult<()> {
        opened(&mut self.device)?
            .stop_face_detection()
            .map_err(|e| AgentError::device("stop face detection", e))
    }

    fn apply_settings(&mut self, command: &mut Command) -> AgentResult<()> {
        let Command::ApplySettings(settings) = command else {
            return Err(mismatch(CommandTag::ApplySettings, command));
        };
        let device = opened(&mut self.device)?;
        self.parameters_dirty = true;
        device
            .apply_settings(settings)
            .map_err(|e| AgentError::device("apply settings", e))
    }

    fn get_parameters(&mut self, _command: &mut Command) -> AgentResult<()> {
        if !self.parameters_dirty {
            return Ok(());
        }
        let parameters = opened(&mut self.device)?
            .parameters()
            .map_err(|e| AgentError::device("get parameters", e))?;
        *self.context.parameters.lock() = Some(parameters);
        self.parameters_dirty = false;
        Ok(())
    }

    fn refresh_parameters(&mut self, _command: &mut Command) -> AgentResult<()> {
        self.parameters_dirty = true;
        Ok(())
    }
}
