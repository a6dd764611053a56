//! Device enumeration helpers
//!
//! Turns the raw platform device list into a clean, de-duplicated list for
//! one device kind and picks the device to use.

use super::traits::{DeviceInfo, DeviceKind};
use serde::{Deserialize, Serialize};

/// Device ids the platform uses for virtual aliases of a physical device
const ALIAS_IDS: &[&str] = &["default", "communications"];

/// Label prefixes added by the platform to alias entries
const ALIAS_LABEL_PREFIXES: &[&str] = &["default - ", "communications - "];

/// Filtered device list with the selected device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceList {
    pub kind: DeviceKind,
    pub devices: Vec<DeviceInfo>,
    pub selected: Option<String>,
}

/// Remembered device choice per kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePreferences {
    pub audio_input: Option<String>,
    pub video_input: Option<String>,
}

impl DevicePreferences {
    pub fn get(&self, kind: DeviceKind) -> Option<&str> {
        match kind {
            DeviceKind::AudioInput => self.audio_input.as_deref(),
            DeviceKind::VideoInput => self.video_input.as_deref(),
            DeviceKind::AudioOutput => None,
        }
    }

    pub fn set(&mut self, kind: DeviceKind, device_id: impl Into<String>) {
        match kind {
            DeviceKind::AudioInput => self.audio_input = Some(device_id.into()),
            DeviceKind::VideoInput => self.video_input = Some(device_id.into()),
            DeviceKind::AudioOutput => {}
        }
    }
}

fn is_alias(device: &DeviceInfo) -> bool {
    ALIAS_IDS.contains(&device.id.as_str())
}

/// Drops alias entries that duplicate a physical device of the same kind
///
/// An alias with no physical counterpart is kept.
pub fn filter_virtual_aliases(devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let physical: Vec<(DeviceKind, String)> = devices
        .iter()
        .filter(|device| !is_alias(device))
        .map(|device| (device.kind, device.group_id.clone()))
        .collect();

    devices
        .into_iter()
        .filter(|device| {
            if !is_alias(device) {
                return true;
            }
            let duplicated = physical.iter().any(|(kind, group)| {
                *kind == device.kind && (device.group_id.is_empty() || *group == device.group_id)
            });
            !duplicated
        })
        .collect()
}

/// Strips alias prefixes and trailing USB `(vid:pid)` identifiers from a label
pub fn clean_label(label: &str) -> String {
    let mut cleaned = label.trim();

    for prefix in ALIAS_LABEL_PREFIXES {
        let matches = cleaned
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if matches {
            cleaned = cleaned[prefix.len()..].trim_start();
        }
    }

    if let Some(open) = cleaned.rfind('(') {
        let tail = &cleaned[open..];
        if tail.ends_with(')') && is_usb_identifier(&tail[1..tail.len() - 1]) {
            cleaned = cleaned[..open].trim_end();
        }
    }

    cleaned.to_string()
}

fn is_usb_identifier(value: &str) -> bool {
    match value.split_once(':') {
        Some((vendor, product)) => {
            vendor.len() == 4
                && product.len() == 4
                && vendor.chars().all(|c| c.is_ascii_hexdigit())
                && product.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Picks the remembered device if still present, else the first
/// non-communications device, else the first device
pub fn select_device<'a>(devices: &'a [DeviceInfo], preferred: Option<&str>) -> Option<&'a DeviceInfo> {
    if let Some(preferred) = preferred {
        if let Some(device) = devices.iter().find(|device| device.id == preferred) {
            return Some(device);
        }
    }

    devices
        .iter()
        .find(|device| {
            device.id != "communications" && !device.label.to_ascii_lowercase().contains("communications")
        })
        .or_else(|| devices.first())
}

/// Builds the device list shown for one kind
pub fn prepare_device_list(raw: Vec<DeviceInfo>, kind: DeviceKind, preferred: Option<&str>) -> DeviceList {
    let of_kind: Vec<DeviceInfo> = raw.into_iter().filter(|device| device.kind == kind).collect();

    let fallback_name = match kind {
        DeviceKind::AudioInput => "Microphone",
        DeviceKind::VideoInput => "Camera",
        DeviceKind::AudioOutput => "Speaker",
    };

    // Selection looks at the raw labels so "communications" entries are still recognizable
    let filtered = filter_virtual_aliases(of_kind);
    let selected = select_device(&filtered, preferred).map(|device| device.id.clone());

    let devices = filtered
        .into_iter()
        .enumerate()
        .map(|(index, mut device)| {
            let cleaned = clean_label(&device.label);
            device.label = if cleaned.is_empty() {
                format!("{} {}", fallback_name, index + 1)
            } else {
                cleaned
            };
            device
        })
        .collect();

    DeviceList {
        kind,
        devices,
        selected,
    }
}
