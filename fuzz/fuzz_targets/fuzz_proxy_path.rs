#![no_main]

//! Fuzz target for forward path normalization.
//!
//! For any request path and wildcard tail:
//! - no panic (including on multi-byte UTF-8 boundaries)
//! - the tail never starts with a separator
//! - the join carries exactly one separator
//! - normalizing the result again is a no-op

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tenantgate::proxy_path::normalize;

#[derive(Debug, Arbitrary)]
struct Input {
    request_path: String,
    wildcard_tail: String,
}

fuzz_target!(|input: Input| {
    let once = normalize(&input.request_path, &input.wildcard_tail);

    assert!(!once.tail().starts_with('/'));
    if !once.tail().is_empty() {
        let join = &once.as_str()[..once.as_str().len() - once.tail().len()];
        assert!(join.ends_with('/'));
        assert!(!join.ends_with("//"));
    }

    let twice = normalize(once.as_str(), once.tail());
    assert_eq!(once.as_str(), twice.as_str());
});
