// tests/property_checks.rs

//! Property tests for the pattern translation and the hashing primitives.

use proptest::prelude::*;

use pipewright::hashing;
use pipewright::rules::RulePattern;

proptest! {
    #[test]
    fn wildcard_star_captures_the_stem(stem in "[a-zA-Z0-9_-]{1,16}") {
        let pattern = RulePattern::compile("*.asset").unwrap();
        let name = format!("{stem}.asset");

        let m = pattern.matches(&name).unwrap();
        prop_assert_eq!(m.text(), name.as_str());
        prop_assert_eq!(m.group(1), Some(stem.as_str()));
        prop_assert_eq!(m.expand("$1.meta"), format!("{stem}.meta"));
    }

    #[test]
    fn wildcard_question_mark_is_exactly_one_character(c in "[a-z]") {
        let pattern = RulePattern::compile("v?.pak").unwrap();
        let one = format!("v{c}.pak");
        let two = format!("v{c}{c}.pak");
        prop_assert!(pattern.matches(&one).is_some());
        prop_assert!(pattern.matches(&two).is_none());
        prop_assert!(pattern.matches("v.pak").is_none());
    }

    #[test]
    fn non_matching_names_never_match(stem in "[a-z]{1,8}") {
        let pattern = RulePattern::compile("*.asset").unwrap();
        let name = format!("{stem}.other");
        prop_assert!(pattern.matches(&name).is_none());
    }

    #[test]
    fn stream_hash_is_deterministic(
        bytes in proptest::collection::vec(any::<u8>(), 0..512),
        seed in any::<u32>(),
    ) {
        let first = hashing::hash_stream(bytes.as_slice(), seed).unwrap();
        let second = hashing::hash_stream(bytes.as_slice(), seed).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn stream_hash_differs_when_a_byte_flips(
        mut bytes in proptest::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let original = hashing::hash_stream(bytes.as_slice(), 144).unwrap();

        let i = index.index(bytes.len());
        bytes[i] ^= 0x01;
        let flipped = hashing::hash_stream(bytes.as_slice(), 144).unwrap();

        prop_assert_ne!(original, flipped);
    }

    #[test]
    fn string_hash_is_deterministic(s in ".{0,64}", seed in any::<u32>()) {
        prop_assert_eq!(hashing::hash_str(&s, seed), hashing::hash_str(&s, seed));
    }
}
