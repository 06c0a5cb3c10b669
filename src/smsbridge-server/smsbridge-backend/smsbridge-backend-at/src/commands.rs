// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Vendor AT command set tables.

use std::fmt;
use std::time::Duration;

pub const ATTENTION: &str = "AT";
pub const TEXT_MODE: &str = "AT+CMGF=1";
pub const CHARSET_GSM: &str = "AT+CSCS=\"GSM\"";
pub const LIST_ALL: &str = "AT+CMGL=\"ALL\"";
pub const SIGNAL: &str = "AT+CSQ";
pub const MODEL: &str = "AT+CGMM";
pub const REVISION: &str = "AT+CGMR";
pub const OPERATOR: &str = "AT+COPS?";
pub const RADIO_ON: &str = "AT+CFUN=1";
pub const RADIO_OFF: &str = "AT+CFUN=0";

pub fn delete(index: u32) -> String {
    format!("AT+CMGD={index}")
}

pub fn send(to: &str) -> String {
    format!("AT+CMGS=\"{to}\"")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Vendor {
    #[default]
    Generic,
    Huawei,
    Sierra,
    Fibocom,
}

impl Vendor {
    /// Unknown names fall back to the generic set.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
            Some("huawei") => Self::Huawei,
            Some("sierra") | Some("sierra-wireless") | Some("sierrawireless") => Self::Sierra,
            Some("fibocom") => Self::Fibocom,
            _ => Self::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Huawei => "huawei",
            Self::Sierra => "sierra",
            Self::Fibocom => "fibocom",
        }
    }

    pub fn command_set(&self) -> &'static CommandSet {
        match self {
            Self::Generic => &GENERIC,
            Self::Huawei => &HUAWEI,
            Self::Sierra => &SIERRA,
            Self::Fibocom => &FIBOCOM,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grammar of the vendor's extended signal report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalGrammar {
    /// `^HCSQ: "<mode>",v1,v2,v3,v4`
    Hcsq,
    /// `AT!GSTATUS?` free text with `RSSI`, `RSRP`, `SINR` fields.
    Gstatus,
    /// `+GTCCINFO: x,rat,band,rsrp,rsrq,sinr,cell,pci,earfcn`
    Gtccinfo,
}

#[derive(Debug)]
pub struct CommandSet {
    /// Best-effort setup run before text mode is selected.
    pub init: &'static [&'static str],
    /// Pause after the setup commands (port switch, radio power-up).
    pub init_settle: Duration,
    /// ICCID query and its response prefix.
    pub iccid: Option<(&'static str, &'static str)>,
    pub extended_signal: Option<(&'static str, SignalGrammar)>,
    pub network_modes: &'static [(&'static str, &'static str)],
    pub bands: &'static [(&'static str, &'static str)],
    pub usb_modes: &'static [(&'static str, &'static str)],
    pub firmware: &'static str,
    pub cell_info: &'static str,
}

impl CommandSet {
    pub fn network_mode(&self, name: &str) -> Option<&'static str> {
        lookup(self.network_modes, name)
    }

    pub fn band_set(&self, name: &str) -> Option<&'static str> {
        lookup(self.bands, name)
    }

    pub fn usb_mode(&self, name: &str) -> Option<&'static str> {
        lookup(self.usb_modes, name)
    }
}

fn lookup(table: &'static [(&'static str, &'static str)], name: &str) -> Option<&'static str> {
    let name = name.trim().to_ascii_lowercase();
    table.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

pub static GENERIC: CommandSet = CommandSet {
    init: &[],
    init_settle: Duration::ZERO,
    iccid: Some(("AT+CCID", "+CCID:")),
    extended_signal: None,
    network_modes: &[],
    bands: &[],
    usb_modes: &[],
    firmware: REVISION,
    cell_info: OPERATOR,
};

pub static HUAWEI: CommandSet = CommandSet {
    init: &["AT^SETPORT=\"A1,A2\"", "AT^CURC=0"],
    init_settle: Duration::from_secs(2),
    iccid: Some(("AT^ICCID?", "^ICCID:")),
    extended_signal: Some(("AT^HCSQ?", SignalGrammar::Hcsq)),
    network_modes: &[
        ("auto", "00"),
        ("4g_only", "03"),
        ("3g_only", "02"),
        ("2g_only", "01"),
        ("4g_preferred", "0301"),
        ("3g_preferred", "0201"),
        ("2g_preferred", "0102"),
    ],
    bands: &[
        ("all", "3FFFFFFF"),
        ("eu", "0080080C0"),
        ("us", "00800C5"),
        ("asia", "00300000"),
    ],
    usb_modes: &[("modem", "\"A1,A2\""), ("cdrom", "\"FF\"")],
    firmware: REVISION,
    cell_info: "AT^MONSC",
};

pub static SIERRA: CommandSet = CommandSet {
    init: &[RADIO_ON],
    init_settle: Duration::from_secs(2),
    iccid: Some(("AT+ICCID", "+ICCID:")),
    extended_signal: Some(("AT!GSTATUS?", SignalGrammar::Gstatus)),
    network_modes: &[],
    bands: &[
        ("all", "00000000"),
        ("b2_b4_b12", "00000842"),
        ("b2_b4", "00000042"),
        ("b13", "00001000"),
    ],
    usb_modes: &[("qmi", "1,1,10D"), ("mbim", "1,1,10B")],
    firmware: "AT!PACKAGE?",
    cell_info: OPERATOR,
};

pub static FIBOCOM: CommandSet = CommandSet {
    init: &["AT+GTENG=1", "AT+GTPWR=1", "AT+GTTMP=1"],
    init_settle: Duration::ZERO,
    iccid: Some(("AT+ICCID", "+ICCID:")),
    extended_signal: Some(("AT+GTCCINFO?", SignalGrammar::Gtccinfo)),
    network_modes: &[
        ("auto", "2,2,0"),
        ("lte_only", "3,3,0"),
        ("wcdma_only", "2,2,0"),
    ],
    bands: &[
        ("all", "1,1,1,1,1,1,1,1"),
        ("us", "1,1,1,0,0,0,0,0"),
        ("eu", "0,0,0,1,1,0,0,0"),
        ("asia", "0,0,0,0,0,1,1,1"),
    ],
    usb_modes: &[("mbim", "17"), ("ecm", "16"), ("rndis", "18")],
    firmware: "AT+GTSWV?",
    cell_info: OPERATOR,
};

/// Commands making up one auxiliary operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxPlan {
    pub commands: Vec<String>,
    /// Pause between consecutive commands.
    pub gap: Duration,
}

impl AuxPlan {
    fn single(command: String) -> Self {
        Self {
            commands: vec![command],
            gap: Duration::ZERO,
        }
    }
}

/// Map a named network mode to the vendor command.
pub fn network_mode_command(vendor: Vendor, name: &str) -> Option<AuxPlan> {
    let code = vendor.command_set().network_mode(name)?;
    match vendor {
        Vendor::Huawei => Some(AuxPlan::single(format!("AT^SYSCFGEX={code}"))),
        Vendor::Fibocom => Some(AuxPlan::single(format!("AT+GTRAT={code}"))),
        _ => None,
    }
}

/// Map a named band set to the vendor command(s).
pub fn band_command(vendor: Vendor, name: &str) -> Option<AuxPlan> {
    let mask = vendor.command_set().band_set(name)?;
    match vendor {
        Vendor::Huawei => Some(AuxPlan::single(format!("AT^SYSCFGEX=\"{mask}\""))),
        // Band lock only takes effect after a radio power cycle.
        Vendor::Sierra => Some(AuxPlan {
            commands: vec![
                format!("AT!BAND={mask}"),
                RADIO_OFF.to_string(),
                RADIO_ON.to_string(),
            ],
            gap: Duration::from_secs(1),
        }),
        Vendor::Fibocom => Some(AuxPlan::single(format!("AT+GTBANDSEL={mask}"))),
        Vendor::Generic => None,
    }
}

pub fn usb_mode_command(vendor: Vendor, name: &str) -> Option<AuxPlan> {
    let code = vendor.command_set().usb_mode(name)?;
    match vendor {
        Vendor::Huawei => Some(AuxPlan::single(format!("AT^SETPORT={code}"))),
        Vendor::Sierra => Some(AuxPlan::single(format!("AT!USBCOMP={code}"))),
        Vendor::Fibocom => Some(AuxPlan::single(format!("AT+GTUSBMODE={code}"))),
        Vendor::Generic => None,
    }
}
