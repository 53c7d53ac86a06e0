//! Fuzz target for fixture descriptor parsing.

#![no_main]

use kfix::descriptor::build_fixtures;
use kfix::LoadAddress;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = build_fixtures(data, LoadAddress(0x1000), 63);
});
