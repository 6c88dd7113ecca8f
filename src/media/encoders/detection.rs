// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer element detection

use super::video::enumerate_h264_encoders;
use gstreamer as gst;
use tracing::info;

/// Check if a specific GStreamer element is installed
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().ok();
    gst::ElementFactory::find(element_name).is_some()
}

/// Elements every recording needs besides the encoder itself
pub const RECORDING_ELEMENTS: [&str; 6] = [
    "appsrc",
    "videoconvert",
    "h264parse",
    "appsink",
    "mp4mux",
    "filesink",
];

/// Required elements that are not installed
pub fn missing_recording_elements() -> Vec<&'static str> {
    RECORDING_ELEMENTS
        .iter()
        .copied()
        .filter(|name| !is_element_available(name))
        .collect()
}

/// Log all available encoders (for debugging)
pub fn log_available_encoders() {
    let encoders = enumerate_h264_encoders();
    info!(count = encoders.len(), "Detected H.264 encoders");
    for encoder in &encoders {
        info!(
            encoder = %encoder.element_name,
            hardware = encoder.is_hardware,
            "  {}",
            encoder.display_name
        );
    }

    let missing = missing_recording_elements();
    if !missing.is_empty() {
        info!(?missing, "Recording elements missing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_runs() {
        // Just ensure detection doesn't panic without plugins
        let _ = missing_recording_elements();
        assert!(!is_element_available("definitely-not-an-element"));
    }
}
