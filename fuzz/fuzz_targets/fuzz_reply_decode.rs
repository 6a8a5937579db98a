//! Fuzz target: reply and request decoders
//!
//! Arbitrary bytes go through every call-site decoder. None may panic,
//! and anything that decodes as a request must re-encode and decode to
//! the same value.
//!
//! cargo fuzz run fuzz_reply_decode

#![no_main]

use aepsych_client::rpc::codec::{
    decode_integer, decode_query_message, decode_request, decode_trial_config, encode_request,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decode_integer(data);
    let _ = decode_query_message(data);

    if let Ok(cfg) = decode_trial_config(data) {
        assert!(cfg.iter().all(|(_, v)| !v.is_empty()), "empty value list accepted");
    }

    if let Ok(req) = decode_request(data) {
        let bytes = encode_request(&req).expect("decoded request must re-encode");
        let again = decode_request(&bytes).expect("re-encoded request must decode");
        assert_eq!(again.kind(), req.kind());
    }
});
