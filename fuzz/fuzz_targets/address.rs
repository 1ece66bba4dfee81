#![no_main]

use ipv4_cardinality::address;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(addr) = address::parse(data) {
        let text = address::format(addr);
        assert_eq!(address::parse(text.as_bytes()).unwrap(), addr);
    }
});
