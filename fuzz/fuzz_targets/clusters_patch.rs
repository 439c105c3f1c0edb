#![no_main]

use ccr_config::{locate_block, patch_block, BlockTarget};
use libfuzzer_sys::fuzz_target;
use serde_json::{json, Map};

const TARGET: BlockTarget<'static> = BlockTarget {
    anchor: Some("variable \"clusters\" {"),
    marker: "default = {",
    depth: 2,
};

fuzz_target!(|data: &[u8]| {
    let document = String::from_utf8_lossy(data);
    let Ok(span) = locate_block(&document, &TARGET) else {
        return;
    };
    let mut body = Map::new();
    body.insert("fuzz".to_string(), json!({"workers": 1, "tags": ["a", "b"]}));
    let patched = patch_block(&document, &TARGET, &body).expect("located block must patch");
    assert!(patched.starts_with(&document[..span.start]));
    assert!(patched.ends_with(&document[span.end()..]));
});
