// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Vendor signal-to-percentage conversions.
//!
//! All formulas use floor division and clamp the result to `0..=100`.

/// CSQ value meaning "not known or not detectable".
pub const CSQ_UNKNOWN: i32 = 99;

fn scale(value: i32, offset: i32, span: i32) -> u8 {
    ((value + offset) * 100).div_euclid(span).clamp(0, 100) as u8
}

/// Generic RSSI on the 0..31 CSQ scale.
pub fn csq_to_percent(csq: i32) -> Option<u8> {
    if csq == CSQ_UNKNOWN || csq < 0 {
        return None;
    }
    Some((csq * 100 / 31).min(100) as u8)
}

/// LTE RSRP in dBm (-140 dBm = 0 %, -80 dBm = 100 %).
pub fn rsrp_to_percent(rsrp_dbm: i32) -> u8 {
    scale(rsrp_dbm, 140, 60)
}

/// RSSI in dBm as reported by `AT!GSTATUS?` (-120 dBm = 0 %).
pub fn gstatus_rssi_to_percent(rssi_dbm: i32) -> u8 {
    scale(rssi_dbm, 120, 60)
}

/// `^HCSQ` value, interpreted according to the reported system mode.
pub fn hcsq_to_percent(mode: &str, value: i32) -> u8 {
    match mode.trim().trim_matches('"').to_ascii_uppercase().as_str() {
        "LTE" => scale(value, 140, 60),
        "WCDMA" => scale(value, 120, 60),
        _ => scale(value, 110, 50),
    }
}

/// Router RSSI in dBm: distance from -100 dBm, capped at 100.
pub fn router_rssi_to_percent(rssi_dbm: i32) -> u8 {
    (rssi_dbm + 100).unsigned_abs().min(100) as u8
}
