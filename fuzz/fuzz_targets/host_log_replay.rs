#![no_main]

use libfuzzer_sys::fuzz_target;
use rastro::config::RecorderConfig;
use rastro::host_log::{self, HostLog};
use rastro::sink::MemorySink;

fuzz_target!(|data: &[u8]| {
    // Any host log that validates must replay without panicking
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(log) = HostLog::from_json(input) {
            let _ = host_log::replay(&log, &RecorderConfig::default(), Box::new(MemorySink::new()));
        }
    }
});
