#![no_main]

use arbitrary::Arbitrary;
use fb_protocol::{Dialect, RowDescriptor, TypeDescriptor, TypeLengthCalculator};
use libfuzzer_sys::fuzz_target;

/// A field as the server describes it.
#[derive(Debug, Arbitrary)]
struct FuzzField {
    sql_type: i32,
    sub_type: i32,
    length: i32,
    scale: i32,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    fields: Vec<FuzzField>,
    row: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let Ok(fields) = input
        .fields
        .iter()
        .map(|f| TypeDescriptor::from_wire(f.sql_type, f.sub_type, f.length, f.scale))
        .collect::<Result<Vec<_>, _>>()
    else {
        return;
    };
    let descriptor = RowDescriptor::new(fields);

    for dialect in [Dialect::V1, Dialect::V2, Dialect::V3] {
        let calculator = TypeLengthCalculator::new(dialect);
        let _ = calculator.row_layout(&descriptor);
        let _ = calculator.blr(&descriptor);
        if let Ok(shape) = calculator.row_shape(&descriptor) {
            let mut cursor = &input.row[..];
            let _ = shape.decode(&mut cursor);
        }
    }
});
