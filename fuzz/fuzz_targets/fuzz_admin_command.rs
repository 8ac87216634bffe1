//! Fuzz target: `admin::parse_command`
//!
//! cargo fuzz run fuzz_admin_command

#![no_main]

use libfuzzer_sys::fuzz_target;
use woodpeckers::admin::{AdminCommand, parse_command};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    for line in text.lines() {
        if let Some(AdminCommand::Stop) = parse_command(line) {
            let word = line.trim().to_ascii_lowercase();
            assert!(word == "stop" || word == "quit");
        }
    }
});
