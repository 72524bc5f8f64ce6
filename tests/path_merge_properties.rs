//! Property-based tests for PATH merging and command quoting
//!
//! PATH values merged for a child never contain empty or repeated entries,
//! keep first-seen order, and survive being merged again. Interpreter
//! wrapping quotes every argument reversibly.

use std::collections::HashMap;

use proptest::prelude::*;
use subexec::env::{merge_env, merge_path};
use subexec::normalize::{normalize, quote};
use subexec::Platform;

/// Segments with optional surrounding blanks, sometimes empty
fn segment_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-z]{1,4}",
        " [a-z]{1,4} ",
    ]
}

fn path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(segment_strategy(), 0..6).prop_map(|segments| segments.join(";"))
}

fn split(value: &str) -> Vec<&str> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(';').collect()
    }
}

#[test]
fn test_documented_merges() {
    assert_eq!(merge_path("a;b", "a;c", ';'), "a;b;c");
    assert_eq!(merge_path("", "", ';'), "");
    assert_eq!(merge_path("a;", ";c", ';'), "a;c");
    assert_eq!(merge_path("; a ; b ;", "g ; e", ';'), "a;b;g;e");
}

proptest! {
    #[test]
    fn prop_merged_segments_are_clean(first in path_strategy(), second in path_strategy()) {
        let merged = merge_path(&first, &second, ';');
        let segments = split(&merged);

        for segment in &segments {
            prop_assert!(!segment.is_empty());
            prop_assert_eq!(segment.trim(), *segment);
        }
        let mut unique = segments.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), segments.len());
    }

    #[test]
    fn prop_every_input_segment_survives(first in path_strategy(), second in path_strategy()) {
        let merged = merge_path(&first, &second, ';');
        let segments = split(&merged);
        for input in first.split(';').chain(second.split(';')) {
            let input = input.trim();
            if !input.is_empty() {
                prop_assert!(segments.contains(&input));
            }
        }
    }

    #[test]
    fn prop_first_value_keeps_its_order(first in path_strategy(), second in path_strategy()) {
        let merged = merge_path(&first, &second, ';');
        let alone = merge_path(&first, "", ';');
        prop_assert!(merged.starts_with(&alone));
    }

    #[test]
    fn prop_merge_is_idempotent(first in path_strategy(), second in path_strategy()) {
        let merged = merge_path(&first, &second, ';');
        prop_assert_eq!(merge_path(&merged, &merged, ';'), merged.clone());
        prop_assert_eq!(merge_path(&merged, &second, ';'), merged);
    }

    #[test]
    fn prop_case_insensitive_env_has_one_path(
        base_path in path_strategy(),
        override_path in path_strategy(),
    ) {
        let base = HashMap::from([
            ("Path".to_string(), base_path.clone()),
            ("HOME".to_string(), "/home/user".to_string()),
        ]);
        let overrides = HashMap::from([("PATH".to_string(), override_path.clone())]);
        let merged = merge_env(base, overrides, &Platform::windows());

        let path_keys: Vec<&String> = merged.keys().filter(|k| k.eq_ignore_ascii_case("path")).collect();
        prop_assert_eq!(path_keys, vec!["Path"]);
        prop_assert_eq!(&merged["Path"], &merge_path(&base_path, &override_path, ';'));
    }

    #[test]
    fn prop_quote_is_reversible(item in "[ -~]{0,16}") {
        let quoted = quote(&item);
        prop_assert!(quoted.len() >= 2);
        prop_assert!(quoted.starts_with('"') && quoted.ends_with('"'));
        let inner = &quoted[1..quoted.len() - 1];
        prop_assert_eq!(inner.replace("\\\"", "\""), item);
    }

    #[test]
    fn prop_posix_commands_pass_through(
        program in "[a-z]{1,8}",
        args in proptest::collection::vec("[ -~]{0,8}", 0..4),
    ) {
        let cmd = normalize(&program, &args, false, &Platform::unix(), None);
        prop_assert_eq!(cmd.program, program);
        prop_assert_eq!(cmd.args, args);
        prop_assert!(cmd.substituted.is_none());
    }

    #[test]
    fn prop_windows_commands_are_wrapped(
        program in "[a-z]{1,8}",
        args in proptest::collection::vec("[a-z0-9 ]{0,8}", 0..4),
    ) {
        prop_assume!(program != "cmd");
        let cmd = normalize(&program, &args, false, &Platform::windows(), None);
        prop_assert_eq!(cmd.program.as_str(), "cmd.exe");
        prop_assert_eq!(&cmd.args[..2], &["/s".to_string(), "/c".to_string()][..]);
        for arg in &args {
            prop_assert!(cmd.args[2].contains(&quote(arg)));
        }
    }
}
