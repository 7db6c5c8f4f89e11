#![no_main]

//! Fuzz target for tenant resolution and the isolation decision.
//!
//! Arbitrary header bytes and paths must never panic, and a short-circuit
//! must always carry the lower-cased, non-empty tenant that was asserted.

use arbitrary::Arbitrary;
use http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;
use tenantgate::config::IsolationSettings;
use tenantgate::isolation::{IsolationDecision, decide};
use tenantgate::tenant::resolve;

#[derive(Debug, Arbitrary)]
struct Input {
    path: String,
    tenant_header: String,
    admin_tenant: String,
    header_value: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let settings = IsolationSettings::new(input.tenant_header.clone(), input.admin_tenant);
    let mut headers = HeaderMap::new();
    if let (Ok(name), Ok(value)) = (
        http::HeaderName::from_bytes(input.tenant_header.as_bytes()),
        HeaderValue::from_bytes(&input.header_value),
    ) {
        headers.insert(name, value);
    }

    let resolved = resolve(&headers, &settings);
    match decide(&input.path, &resolved.tenant, &resolved.admin_tenant) {
        IsolationDecision::ShortCircuit(tenant) => {
            assert!(!tenant.is_empty());
            assert_eq!(tenant.as_str(), tenant.as_str().to_lowercase());
            assert_ne!(tenant.as_str(), resolved.admin_tenant);
        }
        IsolationDecision::PassThrough => {}
    }
});
