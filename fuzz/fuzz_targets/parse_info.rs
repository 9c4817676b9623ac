#![no_main]

use fb_protocol::{DatabaseInfo, DescribeParser, DescribeProgress};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = DatabaseInfo::parse(data);

    // Feed the same bytes as consecutive describe responses
    let mut parser = DescribeParser::new();
    for chunk in data.chunks(64) {
        match parser.feed(chunk) {
            Ok(DescribeProgress::Continue(_)) => continue,
            Ok(DescribeProgress::Complete) | Err(_) => break,
        }
    }
    let _ = parser.finish();
});
