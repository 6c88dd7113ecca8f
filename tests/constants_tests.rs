// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use dualcast::constants::{
    BitratePreset, DEFAULT_BITRATE, FRAME_RATE, KEYFRAME_INTERVAL_SECS, format_bitrate,
    frame_duration, round_up_even, timing,
};
use std::time::Duration;

#[test]
fn test_bitrate_preset_values() {
    assert_eq!(BitratePreset::ALL.len(), 3);
}

#[test]
fn test_bitrate_preset_ordering() {
    let mut prev_bitrate = 0u32;
    for preset in BitratePreset::ALL {
        let bitrate = preset.bitrate_bps(1920);
        assert!(
            bitrate >= prev_bitrate,
            "Presets should be ordered from lowest to highest"
        );
        prev_bitrate = bitrate;
    }
}

#[test]
fn test_bitrate_scales_with_resolution() {
    let hd_bitrate = BitratePreset::Medium.bitrate_bps(1280);
    let fhd_bitrate = BitratePreset::Medium.bitrate_bps(1920);
    let uhd_bitrate = BitratePreset::Medium.bitrate_bps(3840);

    assert!(hd_bitrate < fhd_bitrate);
    assert!(fhd_bitrate < uhd_bitrate);
}

#[test]
fn test_encoder_defaults() {
    assert_eq!(DEFAULT_BITRATE, 4_000_000);
    assert_eq!(FRAME_RATE, 30);
    assert_eq!(KEYFRAME_INTERVAL_SECS, 1);
    assert_eq!(timing::DRAIN_POLL_TIMEOUT, Duration::from_millis(10));
    assert_eq!(timing::STOP_DRAIN_GRACE, Duration::from_millis(500));
}

#[test]
fn test_even_dimensions() {
    assert_eq!(round_up_even(1281), 1282);
    assert_eq!(round_up_even(721), 722);
    assert_eq!(round_up_even(720), 720);
    assert_eq!(round_up_even(0), 0);
}

#[test]
fn test_frame_duration_and_display() {
    let frame = frame_duration();
    assert!(frame > Duration::from_millis(33) && frame < Duration::from_millis(34));
    assert_eq!(format_bitrate(4_000_000), "4 Mbps");
    assert_eq!(format_bitrate(2_500_000), "2.5 Mbps");
}
