// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the render and recording pipelines

use std::fmt;

/// Status returned to callers when a recording starts successfully
pub const STATUS_OK: i32 = 0;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Render engine errors
    Render(RenderError),
    /// Recording errors
    Recording(RecordingError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Render engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Display/device/context creation failed
    ContextCreation(String),
    /// Shader program could not be built
    Shader(String),
    /// Surface could not be bound as a render target
    InvalidSurface(String),
    /// Draw call into a target failed
    Draw(String),
    /// Presenting (swapping) a target failed
    Present(String),
    /// The render worker is not running
    WorkerUnavailable,
}

/// Errors raised by a drawable surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// Surface has been released by its owner
    Released,
    /// Presented image does not match the surface size
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Downstream refused the image
    Push(String),
}

/// Recording errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// A recording session is already active
    AlreadyRecording,
    /// Encoder could not be created, configured or started
    EncoderConfiguration(String),
    /// Multiplexer could not be created
    MuxerConfiguration(String),
    /// Polling the encoder output failed
    Drain(String),
    /// Writing to the multiplexer failed
    Muxer(String),
    /// Encoder input surface error
    Surface(SurfaceError),
}

impl RecordingError {
    /// Negative status code reported to the control plane
    pub fn status_code(&self) -> i32 {
        match self {
            RecordingError::AlreadyRecording => -1,
            _ => -2,
        }
    }
}

/// Status code of a recording start: `STATUS_OK` or the error's negative code
pub fn recording_status<T>(result: &Result<T, RecordingError>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.status_code(),
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Render(e) => write!(f, "Render error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::ContextCreation(msg) => {
                write!(f, "Graphics context creation failed: {}", msg)
            }
            RenderError::Shader(msg) => write!(f, "Shader error: {}", msg),
            RenderError::InvalidSurface(msg) => write!(f, "Invalid surface: {}", msg),
            RenderError::Draw(msg) => write!(f, "Draw failed: {}", msg),
            RenderError::Present(msg) => write!(f, "Present failed: {}", msg),
            RenderError::WorkerUnavailable => write!(f, "Render worker is not running"),
        }
    }
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceError::Released => write!(f, "Surface has been released"),
            SurfaceError::SizeMismatch { expected, actual } => write!(
                f,
                "Image size {}x{} doesn't match surface {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            SurfaceError::Push(msg) => write!(f, "Failed to push image: {}", msg),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::EncoderConfiguration(msg) => {
                write!(f, "Encoder configuration failed: {}", msg)
            }
            RecordingError::MuxerConfiguration(msg) => {
                write!(f, "Muxer configuration failed: {}", msg)
            }
            RecordingError::Drain(msg) => write!(f, "Encoder drain failed: {}", msg),
            RecordingError::Muxer(msg) => write!(f, "Muxer error: {}", msg),
            RecordingError::Surface(e) => write!(f, "Input surface error: {}", e),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for RenderError {}
impl std::error::Error for SurfaceError {}
impl std::error::Error for RecordingError {}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err)
    }
}

impl From<RecordingError> for AppError {
    fn from(err: RecordingError) -> Self {
        AppError::Recording(err)
    }
}

impl From<SurfaceError> for RecordingError {
    fn from(err: SurfaceError) -> Self {
        RecordingError::Surface(err)
    }
}

impl From<SurfaceError> for RenderError {
    fn from(err: SurfaceError) -> Self {
        RenderError::Present(err.to_string())
    }
}

impl From<String> for RenderError {
    fn from(msg: String) -> Self {
        RenderError::ContextCreation(msg)
    }
}

impl From<String> for RecordingError {
    fn from(msg: String) -> Self {
        RecordingError::EncoderConfiguration(msg)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RecordingError::AlreadyRecording.status_code(), -1);
        assert_eq!(
            RecordingError::EncoderConfiguration("no encoder".into()).status_code(),
            -2
        );
        assert_eq!(
            RecordingError::MuxerConfiguration("bad path".into()).status_code(),
            -2
        );
    }

    #[test]
    fn test_recording_status() {
        assert_eq!(recording_status::<()>(&Ok(())), STATUS_OK);
        assert_eq!(
            recording_status::<()>(&Err(RecordingError::AlreadyRecording)),
            -1
        );
        assert_eq!(
            recording_status::<()>(&Err(RecordingError::EncoderConfiguration("none".into()))),
            -2
        );
    }

    #[test]
    fn test_size_mismatch_message() {
        let err = SurfaceError::SizeMismatch {
            expected: (1280, 720),
            actual: (640, 480),
        };
        assert_eq!(
            err.to_string(),
            "Image size 640x480 doesn't match surface 1280x720"
        );
    }
}
