//! Export failures.

use crate::export::ExportState;

/// A recorder failed to start, accept data or finalize.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{recorder} recorder: {message}")]
pub struct RecorderError {
    pub recorder: String,
    pub message: String,
}

impl RecorderError {
    pub fn new(recorder: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recorder: recorder.into(),
            message: message.into(),
        }
    }
}

/// Why an export did not produce an artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportError {
    #[error(
        "Timed out after {waited_secs:.1}s waiting for media metadata \
         (video ready: {primary_ready}, narration ready: {secondary_ready})"
    )]
    MetadataLoadTimeout {
        waited_secs: f64,
        primary_ready: bool,
        secondary_ready: bool,
    },

    #[error("Could not create the audio graph: {message}")]
    AudioGraphCreation { message: String },

    #[error("Narration cannot be played: {message}")]
    NarrationUnplayable { message: String },

    #[error("No supported recording format (tried: {})", .tried.join(", "))]
    UnsupportedRecordingFormat { tried: Vec<String> },

    #[error("Could not start playback: {message}")]
    Playback { message: String },

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error("Could not create the export canvas: {message}")]
    Canvas { message: String },

    #[error("Cannot {action} while the export is {state}")]
    InvalidState {
        state: ExportState,
        action: &'static str,
    },

    #[error("Export cancelled before recording started")]
    Cancelled,
}

impl ExportError {
    /// Whether retrying the same export can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExportError::AudioGraphCreation { .. }
                | ExportError::MetadataLoadTimeout { .. }
                | ExportError::Cancelled
        )
    }

    /// Message suitable for showing to the person who asked for the export.
    pub fn user_message(&self) -> String {
        match self {
            ExportError::MetadataLoadTimeout { .. } => {
                "The video or narration did not finish loading. Check the files and try again."
                    .to_string()
            }
            ExportError::AudioGraphCreation { .. } => {
                "Audio could not be started. Start the export again from a click or key press."
                    .to_string()
            }
            ExportError::NarrationUnplayable { .. } => {
                "The narration has no playable audio. Choose a different narration file.".to_string()
            }
            ExportError::UnsupportedRecordingFormat { .. } => {
                "No supported video format is available. Install ffmpeg with VP9/VP8 or H.264 encoders."
                    .to_string()
            }
            ExportError::Playback { .. } => {
                "The video could not be played. Check that the source file is readable.".to_string()
            }
            ExportError::Recorder(e) => format!("Recording failed: {}.", e.message),
            ExportError::Canvas { .. } => {
                "The export canvas could not be created. Try a smaller aspect preset.".to_string()
            }
            ExportError::InvalidState { .. } => {
                "An export is already running or has finished.".to_string()
            }
            ExportError::Cancelled => "Export cancelled.".to_string(),
        }
    }
}
