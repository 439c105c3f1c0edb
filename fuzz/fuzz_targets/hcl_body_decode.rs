#![no_main]

use ccr_config::{decode_hcl_body, encode_hcl_body};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(decoded) = decode_hcl_body(&raw) else {
        return;
    };
    let reencoded = encode_hcl_body(&decoded, 0);
    let again = decode_hcl_body(&reencoded).expect("encoded body must decode");
    assert_eq!(again, decoded);
});
