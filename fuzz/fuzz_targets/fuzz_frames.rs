// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for wire frame decoding and error classification

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_sql::protocol::{decode, encode};
use parley_sql::{classify, Response, WrappedRequest};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Arbitrary frames must be rejected, never panic
        if let Ok(request) = decode::<WrappedRequest>(s) {
            let frame = encode(&request).unwrap();
            assert_eq!(decode::<WrappedRequest>(&frame).unwrap(), request);
        }
        let _ = decode::<Response>(s);

        // Classification is total over any description
        let _ = classify(s);
    }
});
