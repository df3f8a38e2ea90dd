// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn extracts_numbered_options() {
    let text = "Here's what I could do next:\n1. Run the tests\n2. Open a PR\n3. Nothing else";
    let buttons = default_classifier(text);
    assert_eq!(buttons.len(), 3);
    assert_eq!(buttons[0].response_text, "Run the tests");
    assert_eq!(buttons[1].response_text, "Open a PR");
}

#[test]
fn caps_at_max_buttons() {
    let text = "1. a\n2. b\n3. c\n4. d\n5. e";
    let buttons = default_classifier(text);
    assert_eq!(buttons.len(), 4);
}

#[test]
fn detects_would_you_like_me_to_question() {
    let text = "I fixed the bug. Would you like me to also add a regression test?";
    let buttons = default_classifier(text);
    assert_eq!(buttons.len(), 1);
    assert_eq!(buttons[0].label, "Yes, please");
}

#[test]
fn plain_prose_yields_no_buttons() {
    let text = "I made the change you asked for and ran the test suite, which passed.";
    assert!(default_classifier(text).is_empty());
}

#[test]
fn dash_bullets_are_not_mistaken_for_numbered_options() {
    let text = "- first\n- second";
    assert!(numbered_list_options(text).is_empty());
}
