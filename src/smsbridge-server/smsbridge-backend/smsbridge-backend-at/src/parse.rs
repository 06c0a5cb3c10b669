// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Response grammars for the AT command sets.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use regex::Regex;

use smsbridge_core::signal;
use smsbridge_core::SignalDetails;

use crate::link::AtResponse;

/// One entry of an `AT+CMGL` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmglEntry {
    pub index: u32,
    pub status: String,
    pub from: String,
    pub timestamp: Option<String>,
    pub text: String,
}

/// Split a comma separated field list, honouring double quotes.
pub fn split_fields(input: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Parse `+CMGL:` headers and their text bodies.
///
/// The body is every following line up to the next header; multi-line
/// messages are joined with `\n`.
pub fn parse_cmgl(lines: &[String]) -> Vec<CmglEntry> {
    let mut entries = Vec::new();
    let mut current: Option<(CmglEntry, Vec<String>)> = None;

    for line in lines {
        if let Some(header) = line.strip_prefix("+CMGL:") {
            if let Some((mut entry, body)) = current.take() {
                entry.text = body.join("\n");
                entries.push(entry);
            }
            let fields = split_fields(header);
            let Some(index) = fields.first().and_then(|f| f.parse().ok()) else {
                continue;
            };
            // idx,"stat","oa",["alpha"],"yy/MM/dd,hh:mm:ss+zz"
            let timestamp = match fields.get(4) {
                Some(both) if both.contains(',') => Some(both.clone()),
                Some(date) if !date.is_empty() => {
                    fields.get(5).map(|time| format!("{date},{time}"))
                }
                _ => None,
            };
            current = Some((
                CmglEntry {
                    index,
                    status: fields.get(1).cloned().unwrap_or_default(),
                    from: fields.get(2).cloned().unwrap_or_default(),
                    timestamp,
                    text: String::new(),
                },
                Vec::new(),
            ));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line.clone());
        }
    }
    if let Some((mut entry, body)) = current {
        entry.text = body.join("\n");
        entries.push(entry);
    }
    entries
}

/// Parse a service-centre timestamp `yy/MM/dd,hh:mm:ss±zz`.
///
/// The zone is given in quarter hours.
pub fn parse_sms_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_matches('"');
    if value.len() < 17 {
        return None;
    }
    let (local, zone) = value.split_at(17);
    let naive = NaiveDateTime::parse_from_str(local, "%y/%m/%d,%H:%M:%S").ok()?;
    let quarters: i64 = if zone.is_empty() {
        0
    } else {
        zone.parse().ok()?
    };
    let utc = naive - ChronoDuration::minutes(quarters * 15);
    Some(DateTime::from_naive_utc_and_offset(utc, Utc))
}

/// Raw CSQ RSSI value from `+CSQ: <rssi>,<ber>`.
pub fn parse_csq(resp: &AtResponse) -> Option<i32> {
    resp.find("+CSQ:")?.split(',').next()?.trim().parse().ok()
}

/// `^HCSQ` report: percentage plus details.
pub fn parse_hcsq(resp: &AtResponse) -> Option<(u8, SignalDetails)> {
    let fields = split_fields(resp.find("^HCSQ:")?);
    let mode = fields.first()?.clone();
    let value: i32 = fields.get(1)?.parse().ok()?;
    let mut details = SignalDetails::new();
    details.insert("mode".into(), mode.clone());
    details.insert("rssi".into(), value.to_string());
    for (key, idx) in [("rsrp", 2), ("sinr", 3), ("rsrq", 4)] {
        if let Some(v) = fields.get(idx).filter(|v| !v.is_empty()) {
            details.insert(key.into(), v.clone());
        }
    }
    Some((signal::hcsq_to_percent(&mode, value), details))
}

fn gstatus_field(name: &str) -> Option<&'static Regex> {
    static RSSI: OnceLock<Option<Regex>> = OnceLock::new();
    static RSRP: OnceLock<Option<Regex>> = OnceLock::new();
    static SINR: OnceLock<Option<Regex>> = OnceLock::new();
    let (cell, pattern) = match name {
        "rssi" => (&RSSI, r"RSSI\s*(?:\(dBm\))?\s*[=:]\s*(-\d+)"),
        "rsrp" => (&RSRP, r"RSRP\s*(?:\(dBm\))?\s*[=:]\s*(-\d+)"),
        _ => (&SINR, r"SINR\s*(?:\(dB\))?\s*[=:]\s*(-?\d+)"),
    };
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// `AT!GSTATUS?` report: RSSI drives the percentage.
pub fn parse_gstatus(resp: &AtResponse) -> Option<(u8, SignalDetails)> {
    let text = resp.text();
    let capture = |name: &str| -> Option<i32> {
        gstatus_field(name)?
            .captures(&text)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    };
    let rssi = capture("rssi")?;
    let mut details = SignalDetails::new();
    details.insert("rssi".into(), rssi.to_string());
    if let Some(rsrp) = capture("rsrp") {
        details.insert("rsrp".into(), rsrp.to_string());
    }
    if let Some(sinr) = capture("sinr") {
        details.insert("sinr".into(), sinr.to_string());
    }
    Some((signal::gstatus_rssi_to_percent(rssi), details))
}

/// `+GTCCINFO` report: RSRP drives the percentage.
pub fn parse_gtccinfo(resp: &AtResponse) -> Option<(u8, SignalDetails)> {
    let fields = split_fields(resp.find("+GTCCINFO:")?);
    let rsrp: i32 = fields.get(3)?.parse().ok()?;
    let mut details = SignalDetails::new();
    for (key, idx) in [
        ("rat", 1),
        ("band", 2),
        ("rsrp", 3),
        ("rsrq", 4),
        ("sinr", 5),
        ("cell_id", 6),
        ("pci", 7),
        ("earfcn", 8),
    ] {
        if let Some(v) = fields.get(idx) {
            details.insert(key.into(), v.clone());
        }
    }
    Some((signal::rsrp_to_percent(rsrp), details))
}

/// `AT!PCTEMP?` sensor readings.
pub fn parse_pctemp(resp: &AtResponse) -> BTreeMap<String, f64> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = RE
        .get_or_init(|| Regex::new(r"(\w+)\s*=\s*(-?\d+(?:\.\d+)?)").ok())
        .as_ref()
    else {
        return BTreeMap::new();
    };
    let text = resp.text();
    re.captures_iter(&text)
        .filter_map(|c| Some((c.get(1)?.as_str().to_string(), c.get(2)?.as_str().parse().ok()?)))
        .collect()
}

/// Operator name from `+COPS: mode,format,"name"[,act]`.
pub fn parse_operator(resp: &AtResponse) -> Option<String> {
    split_fields(resp.find("+COPS:")?)
        .get(2)
        .filter(|s| !s.is_empty())
        .cloned()
}

/// Value of an identity query, with or without the echoed prefix.
pub fn identity_value(resp: &AtResponse, prefix: &str) -> Option<String> {
    let value = match resp.find(prefix) {
        Some(v) => v.to_string(),
        None => resp.lines.first()?.trim().to_string(),
    };
    let value = value.trim_matches('"').trim().to_string();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::parse_transcript;
    use chrono::TimeZone;

    fn resp(raw: &str) -> AtResponse {
        parse_transcript(raw, "").unwrap()
    }

    #[test]
    fn fields_respect_quotes() {
        assert_eq!(
            split_fields(r#" 3,"REC UNREAD","+15551234",,"24/01/02,03:04:05+08""#),
            vec!["3", "REC UNREAD", "+15551234", "", "24/01/02,03:04:05+08"]
        );
    }

    #[test]
    fn cmgl_single_and_multiline() {
        let r = resp(
            "+CMGL: 1,\"REC READ\",\"+15550001\",,\"24/01/02,03:04:05+00\"\r\n\
             Hello\r\n\
             +CMGL: 2,\"REC UNREAD\",\"+15550002\",,\"24/01/02,03:05:00+00\"\r\n\
             line one\r\n\
             line two\r\n\
             OK\r\n",
        );
        let entries = parse_cmgl(&r.lines);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].from, "+15550001");
        assert_eq!(entries[0].text, "Hello");
        assert_eq!(entries[0].timestamp.as_deref(), Some("24/01/02,03:04:05+00"));
        assert_eq!(entries[1].status, "REC UNREAD");
        assert_eq!(entries[1].text, "line one\nline two");
    }

    #[test]
    fn cmgl_text_with_commas_and_quotes() {
        let r = resp(
            "+CMGL: 4,\"REC UNREAD\",\"Bank\",\"\",\"24/03/10,10:00:00+04\"\r\n\
             Code: 1234, valid \"5 min\"\r\nOK\r\n",
        );
        let entries = parse_cmgl(&r.lines);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Code: 1234, valid \"5 min\"");
    }

    #[test]
    fn cmgl_empty_listing() {
        assert!(parse_cmgl(&resp("OK\r\n").lines).is_empty());
    }

    #[test]
    fn timestamp_zone_in_quarter_hours() {
        let ts = parse_sms_timestamp("24/01/02,03:04:05+08").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 1, 4, 5).unwrap());
        let ts = parse_sms_timestamp("\"24/01/02,03:04:05-04\"").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 4, 4, 5).unwrap());
        assert!(parse_sms_timestamp("garbage").is_none());
    }

    #[test]
    fn csq_value() {
        assert_eq!(parse_csq(&resp("+CSQ: 20,0\r\nOK\r\n")), Some(20));
        assert_eq!(parse_csq(&resp("+CSQ: 99,99\r\nOK\r\n")), Some(99));
        assert_eq!(parse_csq(&resp("OK\r\n")), None);
    }

    #[test]
    fn hcsq_lte() {
        let (pct, details) = parse_hcsq(&resp("^HCSQ: \"LTE\",-110,45,120,20\r\nOK\r\n")).unwrap();
        assert_eq!(pct, 50);
        assert_eq!(details.get("mode").map(String::as_str), Some("LTE"));
        assert_eq!(details.get("rsrp").map(String::as_str), Some("45"));
        assert_eq!(details.get("rsrq").map(String::as_str), Some("20"));
    }

    #[test]
    fn gstatus_fields() {
        let text = "!GSTATUS: \r\nCurrent Time:  1234\r\nRSSI (dBm):  -90   Tx Power:  0\r\n\
                    RSRP (dBm):  -100  TAC:  1A2B\r\nSINR (dB):  12.4\r\nOK\r\n";
        let (pct, details) = parse_gstatus(&resp(text)).unwrap();
        assert_eq!(pct, 50);
        assert_eq!(details.get("rsrp").map(String::as_str), Some("-100"));
        assert_eq!(details.get("sinr").map(String::as_str), Some("12"));

        let (pct, _) = parse_gstatus(&resp("RSSI = -60\r\nOK\r\n")).unwrap();
        assert_eq!(pct, 100);
        assert!(parse_gstatus(&resp("OK\r\n")).is_none());
    }

    #[test]
    fn gtccinfo_fields() {
        let (pct, details) =
            parse_gtccinfo(&resp("+GTCCINFO: 1,LTE,3,-95,-10,15,1A2B3C,101,1300\r\nOK\r\n"))
                .unwrap();
        assert_eq!(pct, 75);
        assert_eq!(details.get("rat").map(String::as_str), Some("LTE"));
        assert_eq!(details.get("cell_id").map(String::as_str), Some("1A2B3C"));
        assert_eq!(details.get("earfcn").map(String::as_str), Some("1300"));
    }

    #[test]
    fn pctemp_readings() {
        let temps = parse_pctemp(&resp("!PCTEMP: PA=38.5 PMIC=41.0\r\nOK\r\n"));
        assert_eq!(temps.get("PA"), Some(&38.5));
        assert_eq!(temps.get("PMIC"), Some(&41.0));
    }

    #[test]
    fn identity_with_and_without_prefix() {
        assert_eq!(
            identity_value(&resp("^ICCID: 89860000000000000001\r\nOK\r\n"), "^ICCID:"),
            Some("89860000000000000001".to_string())
        );
        assert_eq!(
            identity_value(&resp("E3372\r\nOK\r\n"), "+CGMM:"),
            Some("E3372".to_string())
        );
        assert_eq!(identity_value(&resp("OK\r\n"), "+CGMM:"), None);
    }

    #[test]
    fn operator_name() {
        assert_eq!(
            parse_operator(&resp("+COPS: 0,0,\"T-Mobile\",7\r\nOK\r\n")),
            Some("T-Mobile".to_string())
        );
    }
}
