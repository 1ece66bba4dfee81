#![no_main]

use std::io::Cursor;

use ipv4_cardinality::chunk;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u8, &[u8])| {
    let (workers, data) = input;
    let workers = usize::from(workers % 16) + 1;
    let len = data.len() as u64;
    let chunks = chunk::plan(&mut Cursor::new(data), len, workers).unwrap();

    assert_eq!(chunks.len(), workers);
    let mut start = 0;
    for c in &chunks {
        assert_eq!(c.start, start);
        assert!(c.end >= c.start);
        if c.end < len {
            assert_eq!(data[c.end as usize - 1], b'\n');
        }
        start = c.end;
    }
    assert_eq!(start, len);
});
