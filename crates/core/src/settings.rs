// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advanced settings registry (§6 "Configuration of advanced settings").
//!
//! A closed, recognized set of boolean flags a session's
//! `advanced_settings` map may carry. Unknown names are silently ignored
//! when applying an update — the registry exists to give each known flag a
//! display label and description for the client, not to validate every
//! string a caller might send.

use std::collections::BTreeMap;

/// One recognized advanced-settings flag.
#[derive(Debug, Clone, Copy)]
pub struct SettingDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub default: bool,
}

/// The closed set of flags the core recognizes. All default to `false`
/// (opt-in), per §6.
pub const REGISTRY: &[SettingDescriptor] = &[
    SettingDescriptor {
        name: "auto_approve_edits",
        label: "Auto-approve file edits",
        description: "Skip the permission prompt for tool calls that only write files.",
        default: false,
    },
    SettingDescriptor {
        name: "auto_approve_commands",
        label: "Auto-approve shell commands",
        description: "Skip the permission prompt for tool calls that run shell commands.",
        default: false,
    },
    SettingDescriptor {
        name: "verbose_thoughts",
        label: "Show agent thoughts",
        description: "Stream the agent's intermediate reasoning as agent_thought events.",
        default: false,
    },
];

pub fn descriptor(name: &str) -> Option<&'static SettingDescriptor> {
    REGISTRY.iter().find(|d| d.name == name)
}

/// Defaults for every recognized flag, used to seed a fresh session's
/// `advanced_settings` map.
pub fn defaults() -> BTreeMap<String, bool> {
    REGISTRY.iter().map(|d| (d.name.to_owned(), d.default)).collect()
}

/// Merge an update into an existing settings map. Unknown flag names are
/// silently ignored (§6); recognized names overwrite their current value.
///
/// The effect of a changed flag is *not* applied here — per §6, a flag
/// takes effect only on the session's next start (archive + unarchive).
pub fn apply_update(current: &mut BTreeMap<String, bool>, update: &BTreeMap<String, bool>) {
    for (name, value) in update {
        if descriptor(name).is_some() {
            current.insert(name.clone(), *value);
        }
    }
}

pub fn is_enabled(settings: &BTreeMap<String, bool>, name: &str) -> bool {
    settings.get(name).copied().unwrap_or_else(|| descriptor(name).map(|d| d.default).unwrap_or(false))
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
