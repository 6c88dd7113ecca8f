// SPDX-License-Identifier: GPL-3.0-only

//! Encoder selection for the recording pipeline
//!
//! A preferred encoder, when configured, is the only candidate. Otherwise
//! installed encoders are tried in priority order and the first one that can
//! be instantiated wins.

use super::session::EncoderSettings;
use crate::media::encoders::video::{
    EncoderInfo, create_h264_encoder, encoder_info, enumerate_h264_encoders,
};
use gstreamer as gst;
use tracing::{info, warn};

/// An instantiated and configured encoder element
pub struct SelectedVideoEncoder {
    pub info: EncoderInfo,
    pub element: gst::Element,
}

/// Candidates for `settings` in the order they should be tried
pub fn candidate_encoders(settings: &EncoderSettings) -> Vec<EncoderInfo> {
    match settings.preferred_encoder.as_deref() {
        Some(name) => vec![encoder_info(name)],
        None => enumerate_h264_encoders(),
    }
}

/// Select and configure the best available H.264 encoder
pub fn select_h264_encoder(settings: &EncoderSettings) -> Result<SelectedVideoEncoder, String> {
    let candidates = candidate_encoders(settings);
    if candidates.is_empty() {
        return Err("No H.264 encoder installed".to_string());
    }

    let mut last_error = String::new();
    for info in candidates {
        match create_h264_encoder(&info, settings.bitrate_bps) {
            Ok(element) => {
                info!(
                    encoder = %info.display_name,
                    hardware = info.is_hardware,
                    "Selected video encoder"
                );
                return Ok(SelectedVideoEncoder { info, element });
            }
            Err(e) => {
                warn!(encoder = %info.element_name, error = %e, "Encoder unusable, trying next");
                last_error = e;
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_encoder_is_sole_candidate() {
        let mut settings = EncoderSettings::new(640, 480, 1_000_000);
        settings.preferred_encoder = Some("x264enc".to_string());
        let candidates = candidate_encoders(&settings);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].element_name, "x264enc");
    }

    #[test]
    fn test_missing_preferred_encoder_fails() {
        let _ = gst::init();
        let mut settings = EncoderSettings::new(640, 480, 1_000_000);
        settings.preferred_encoder = Some("no-such-h264enc".to_string());
        assert!(select_h264_encoder(&settings).is_err());
    }
}
