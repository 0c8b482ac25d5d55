//! Commands consumed by the camera handler thread.

use std::collections::VecDeque;
use std::fmt;

use crate::device::{CameraId, CameraSettings, PreviewSurface};
use crate::error::AgentResult;
use crate::forward::CallbackForward;
use crate::proxy::CameraProxy;

/// Identifies which handler routine a [`Command`] is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    Open,
    Release,
    Reconnect,
    Unlock,
    Lock,
    SetPreviewSurface,
    StartPreview,
    StopPreview,
    AutoFocus,
    CancelAutoFocus,
    FocusDone,
    Capture,
    PictureTaken,
    SetDisplayOrientation,
    EnableShutterSound,
    StartFaceDetection,
    StopFaceDetection,
    ApplySettings,
    GetParameters,
    RefreshParameters,
}

impl CommandTag {
    pub const ALL: [CommandTag; 20] = [
        CommandTag::Open,
        CommandTag::Release,
        CommandTag::Reconnect,
        CommandTag::Unlock,
        CommandTag::Lock,
        CommandTag::SetPreviewSurface,
        CommandTag::StartPreview,
        CommandTag::StopPreview,
        CommandTag::AutoFocus,
        CommandTag::CancelAutoFocus,
        CommandTag::FocusDone,
        CommandTag::Capture,
        CommandTag::PictureTaken,
        CommandTag::SetDisplayOrientation,
        CommandTag::EnableShutterSound,
        CommandTag::StartFaceDetection,
        CommandTag::StopFaceDetection,
        CommandTag::ApplySettings,
        CommandTag::GetParameters,
        CommandTag::RefreshParameters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandTag::Open => "open",
            CommandTag::Release => "release",
            CommandTag::Reconnect => "reconnect",
            CommandTag::Unlock => "unlock",
            CommandTag::Lock => "lock",
            CommandTag::SetPreviewSurface => "set_preview_surface",
            CommandTag::StartPreview => "start_preview",
            CommandTag::StopPreview => "stop_preview",
            CommandTag::AutoFocus => "auto_focus",
            CommandTag::CancelAutoFocus => "cancel_auto_focus",
            CommandTag::FocusDone => "focus_done",
            CommandTag::Capture => "capture",
            CommandTag::PictureTaken => "picture_taken",
            CommandTag::SetDisplayOrientation => "set_display_orientation",
            CommandTag::EnableShutterSound => "enable_shutter_sound",
            CommandTag::StartFaceDetection => "start_face_detection",
            CommandTag::StopFaceDetection => "stop_face_detection",
            CommandTag::ApplySettings => "apply_settings",
            CommandTag::GetParameters => "get_parameters",
            CommandTag::RefreshParameters => "refresh_parameters",
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result delivered to an open or reconnect callback.
pub type OpenResult = AgentResult<CameraProxy>;

/// Optional data delivered with a picture callback.
pub type PictureData = Option<Vec<u8>>;

/// Forwarders for each stage of a capture.
#[derive(Debug, Default)]
pub struct CaptureForwards {
    pub shutter: CallbackForward<()>,
    pub raw: CallbackForward<PictureData>,
    pub postview: CallbackForward<PictureData>,
    pub jpeg: CallbackForward<PictureData>,
}

/// A request for the camera handler thread.
///
/// Consumed exactly once. Routines take callbacks out of the command as they
/// deliver them, so whatever is left when a routine fails is still available
/// to the failure path.
#[derive(Debug)]
pub enum Command {
    Open {
        camera_id: CameraId,
        callback: CallbackForward<OpenResult>,
    },
    Release,
    Reconnect {
        camera_id: CameraId,
        callback: CallbackForward<OpenResult>,
    },
    Unlock,
    Lock,
    SetPreviewSurface(PreviewSurface),
    StartPreview {
        callback: CallbackForward<()>,
    },
    StopPreview,
    AutoFocus {
        callback: CallbackForward<bool>,
    },
    CancelAutoFocus,
    /// Posted by a [`FocusSink`](crate::handler::FocusSink) when the sweep ends.
    FocusDone {
        success: bool,
        callback: CallbackForward<bool>,
    },
    Capture(CaptureForwards),
    /// Posted by a [`CaptureSink`](crate::handler::CaptureSink) with the JPEG.
    PictureTaken {
        data: PictureData,
        callback: CallbackForward<PictureData>,
    },
    SetDisplayOrientation(u32),
    EnableShutterSound(bool),
    StartFaceDetection,
    StopFaceDetection,
    ApplySettings(Box<CameraSettings>),
    GetParameters,
    RefreshParameters,
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Open { .. } => CommandTag::Open,
            Command::Release => CommandTag::Release,
            Command::Reconnect { .. } => CommandTag::Reconnect,
            Command::Unlock => CommandTag::Unlock,
            Command::Lock => CommandTag::Lock,
            Command::SetPreviewSurface(_) => CommandTag::SetPreviewSurface,
            Command::StartPreview { .. } => CommandTag::StartPreview,
            Command::StopPreview => CommandTag::StopPreview,
            Command::AutoFocus { .. } => CommandTag::AutoFocus,
            Command::CancelAutoFocus => CommandTag::CancelAutoFocus,
            Command::FocusDone { .. } => CommandTag::FocusDone,
            Command::Capture(_) => CommandTag::Capture,
            Command::PictureTaken { .. } => CommandTag::PictureTaken,
            Command::SetDisplayOrientation(_) => CommandTag::SetDisplayOrientation,
            Command::EnableShutterSound(_) => CommandTag::EnableShutterSound,
            Command::StartFaceDetection => CommandTag::StartFaceDetection,
            Command::StopFaceDetection => CommandTag::StopFaceDetection,
            Command::ApplySettings(_) => CommandTag::ApplySettings,
            Command::GetParameters => CommandTag::GetParameters,
            Command::RefreshParameters => CommandTag::RefreshParameters,
        }
    }

    /// The camera id and remaining callback of an `Open` command.
    pub(crate) fn take_open_callback(&mut self) -> Option<(CameraId, CallbackForward<OpenResult>)> {
        match self {
            Command::Open {
                camera_id,
                callback,
            } => Some((*camera_id, std::mem::take(callback))),
            _ => None,
        }
    }
}

/// Bounded record of recently handled command tags.
#[derive(Debug)]
pub struct CommandHistory {
    entries: VecDeque<CommandTag>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append `tag`, evicting the oldest entry when full.
    pub fn record(&mut self, tag: CommandTag) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(tag);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failure info string: the camera id followed by recorded tags, oldest
    /// first.
    pub fn describe(&self, camera_id: CameraId) -> String {
        let tags: Vec<&str> = self.entries.iter().map(CommandTag::as_str).collect();
        format!("HIST_{}: {}", camera_id, tags.join(", "))
    }
}
