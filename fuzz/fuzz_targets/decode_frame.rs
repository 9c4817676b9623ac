#![no_main]

use fb_protocol::{Frame, RowShape, XdrShape};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Without a row shape, then with one for fetch and sql responses
    let shape = RowShape::new(vec![XdrShape::Fixed(4), XdrShape::Varying(32)]);
    for row_shape in [None, Some(&shape)] {
        let mut cursor = data;
        while !cursor.is_empty() {
            match Frame::decode(&mut cursor, row_shape) {
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
});
