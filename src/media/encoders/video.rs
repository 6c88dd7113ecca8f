// SPDX-License-Identifier: GPL-3.0-only

//! H.264 encoder table with hardware acceleration priority
//!
//! Recording always produces H.264 in MP4. Hardware encoders are preferred;
//! x264 and OpenH264 are the software fallbacks.

use crate::constants::{FRAME_RATE, KEYFRAME_INTERVAL_SECS};
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info};

/// Parser placed after every H.264 encoder
pub const H264_PARSER: &str = "h264parse";

/// Container muxer for recordings
pub const MP4_MUXER: &str = "mp4mux";

/// Information about an H.264 encoder element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// GStreamer element name
    pub element_name: String,
    /// Human-readable name
    pub display_name: String,
    /// Whether this is hardware accelerated
    pub is_hardware: bool,
    /// Priority (lower = higher priority)
    pub priority: u32,
}

/// Known H.264 encoders: element, display name, hardware, priority
const H264_ENCODERS: [(&str, &str, bool, u32); 8] = [
    ("vah264enc", "VA-API H.264 (HW)", true, 1),
    ("vaapih264enc", "VA-API H.264, legacy (HW)", true, 2),
    ("nvh264enc", "NVIDIA H.264 (HW)", true, 3),
    ("qsvh264enc", "Intel QSV H.264 (HW)", true, 4),
    ("amfh264enc", "AMD AMF H.264 (HW)", true, 5),
    ("v4l2h264enc", "V4L2 H.264 (HW)", true, 6),
    ("x264enc", "x264 H.264 (SW)", false, 10),
    ("openh264enc", "OpenH264 H.264 (SW)", false, 11),
];

/// Look up an element in the table; unknown names are treated as software
pub fn encoder_info(element_name: &str) -> EncoderInfo {
    H264_ENCODERS
        .iter()
        .find(|(name, ..)| *name == element_name)
        .map(|(name, display, hw, priority)| EncoderInfo {
            element_name: name.to_string(),
            display_name: display.to_string(),
            is_hardware: *hw,
            priority: *priority,
        })
        .unwrap_or_else(|| EncoderInfo {
            element_name: element_name.to_string(),
            display_name: element_name.to_string(),
            is_hardware: false,
            priority: u32::MAX,
        })
}

/// Enumerate installed H.264 encoders, sorted by priority
pub fn enumerate_h264_encoders() -> Vec<EncoderInfo> {
    if gst::init().is_err() {
        return Vec::new();
    }

    let mut available: Vec<EncoderInfo> = H264_ENCODERS
        .iter()
        .filter(|(name, ..)| gst::ElementFactory::find(name).is_some())
        .map(|(name, ..)| encoder_info(name))
        .collect();

    available.sort_by_key(|e| e.priority);
    available
}

/// Keyframe interval in frames
pub fn keyframe_interval_frames() -> u32 {
    FRAME_RATE * KEYFRAME_INTERVAL_SECS
}

/// Create and configure an encoder element
pub fn create_h264_encoder(info: &EncoderInfo, bitrate_bps: u32) -> Result<gst::Element, String> {
    let encoder = gst::ElementFactory::make(&info.element_name)
        .build()
        .map_err(|e| format!("Failed to create encoder {}: {}", info.element_name, e))?;

    configure_h264_encoder(&encoder, &info.element_name, bitrate_bps);
    info!(
        encoder = %info.element_name,
        hardware = info.is_hardware,
        bitrate_bps,
        "Created H.264 encoder"
    );
    Ok(encoder)
}

/// Set a property by its string form if the element has it
///
/// Property types differ between plugin versions (enum vs int, int vs
/// uint), parsing from a string lets GStreamer do the conversion.
fn set_if_present(encoder: &gst::Element, name: &str, value: &str) {
    if encoder.has_property(name) {
        encoder.set_property_from_str(name, value);
    } else {
        debug!(property = name, "Encoder has no such property, skipping");
    }
}

/// Apply bitrate, keyframe interval and low-latency settings per element
///
/// Most elements take kbit/s; OpenH264 and V4L2 take bit/s.
fn configure_h264_encoder(encoder: &gst::Element, encoder_name: &str, bitrate_bps: u32) {
    let kbps = (bitrate_bps / 1000).max(1).to_string();
    let bps = bitrate_bps.to_string();
    let gop = keyframe_interval_frames().to_string();

    match encoder_name {
        "x264enc" => {
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "key-int-max", &gop);
            set_if_present(encoder, "bframes", "0");
        }

        "openh264enc" => {
            set_if_present(encoder, "rate-control", "bitrate");
            set_if_present(encoder, "usage-type", "camera");
            set_if_present(encoder, "bitrate", &bps);
            set_if_present(encoder, "gop-size", &gop);
        }

        "vaapih264enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "keyframe-period", &gop);
        }

        "vah264enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "key-int-max", &gop);
            set_if_present(encoder, "b-frames", "0");
        }

        "nvh264enc" => {
            set_if_present(encoder, "rc-mode", "cbr");
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "gop-size", &gop);
            set_if_present(encoder, "bframes", "0");
        }

        "qsvh264enc" | "amfh264enc" => {
            set_if_present(encoder, "bitrate", &kbps);
            set_if_present(encoder, "gop-size", &gop);
        }

        "v4l2h264enc" => {
            // Driver controls only
            let controls = gst::Structure::builder("controls")
                .field("video_bitrate", bitrate_bps as i32)
                .field("h264_i_frame_period", keyframe_interval_frames() as i32)
                .build();
            if encoder.has_property("extra-controls") {
                encoder.set_property("extra-controls", controls);
            }
        }

        _ => {
            debug!(encoder = encoder_name, "Unknown encoder, using default configuration");
            return;
        }
    }

    debug!(encoder = encoder_name, bitrate_bps, gop = %gop, "Configured encoder");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_interval_is_one_second() {
        assert_eq!(keyframe_interval_frames(), 30);
    }

    #[test]
    fn test_table_is_hardware_first() {
        let first_sw = H264_ENCODERS.iter().position(|(_, _, hw, _)| !hw).unwrap();
        assert!(H264_ENCODERS[..first_sw].iter().all(|(_, _, hw, _)| *hw));
        assert!(H264_ENCODERS[first_sw..].iter().all(|(_, _, hw, _)| !hw));
    }

    #[test]
    fn test_unknown_encoder_info() {
        let info = encoder_info("myenc");
        assert!(!info.is_hardware);
        assert_eq!(info.priority, u32::MAX);
        assert_eq!(encoder_info("x264enc").display_name, "x264 H.264 (SW)");
    }

    #[test]
    fn test_enumeration_sorted() {
        let encoders = enumerate_h264_encoders();
        assert!(encoders.windows(2).all(|w| w[0].priority <= w[1].priority));
    }
}
