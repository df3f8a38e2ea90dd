// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults_cover_every_registry_entry() {
    let defaults = defaults();
    assert_eq!(defaults.len(), REGISTRY.len());
    for d in REGISTRY {
        assert_eq!(defaults.get(d.name), Some(&d.default));
    }
}

#[test]
fn unknown_flag_names_are_ignored() {
    let mut current = defaults();
    let mut update = BTreeMap::new();
    update.insert("not_a_real_flag".to_owned(), true);
    apply_update(&mut current, &update);
    assert!(!current.contains_key("not_a_real_flag"));
}

#[test]
fn known_flag_overwrites_value() {
    let mut current = defaults();
    let mut update = BTreeMap::new();
    update.insert("auto_approve_edits".to_owned(), true);
    apply_update(&mut current, &update);
    assert_eq!(current.get("auto_approve_edits"), Some(&true));
}

#[test]
fn is_enabled_falls_back_to_descriptor_default_when_absent() {
    let settings = BTreeMap::new();
    assert!(!is_enabled(&settings, "auto_approve_commands"));
    assert!(!is_enabled(&settings, "totally_unknown"));
}
