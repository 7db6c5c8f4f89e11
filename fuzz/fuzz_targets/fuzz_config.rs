#![no_main]

//! Fuzz target for YAML configuration parsing and validation.

use libfuzzer_sys::fuzz_target;
use tenantgate::config::GatewayConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = GatewayConfig::from_yaml(raw) {
        let _ = config.validate();
    }
});
