//! Fuzz target: `Configuration::from_yaml`
//!
//! Arbitrary text must parse or fail with a typed error.  Anything that
//! parses must apply to a fresh Controller without panicking and must
//! re-serialise to an equivalent document.
//!
//! cargo fuzz run fuzz_config

#![no_main]

use libfuzzer_sys::fuzz_target;
use woodpeckers::Controller;
use woodpeckers::config::Configuration;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = Configuration::from_yaml(text) else {
        return;
    };

    let yaml = config.to_yaml().expect("valid config serialises");
    let again = Configuration::from_yaml(&yaml).expect("serialised config parses");
    assert_eq!(again, config);

    let mut ctrl = Controller::with_seed(0);
    let _ = config.apply(&mut ctrl);
});
