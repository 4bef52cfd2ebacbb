//! Fuzz target: `protocol::classify`
//!
//! Any UTF-8 line must classify or fail cleanly; a response must carry the
//! id found in the line.
//!
//! cargo fuzz run fuzz_classify

#![no_main]

use divinofax::link::protocol::{Inbound, classify, trigger_from_push};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|line: &str| {
    match classify(line) {
        Ok(Inbound::Response(response)) => {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["id"].as_u64(), Some(response.id));
        }
        Ok(Inbound::Push(event)) => {
            let _ = trigger_from_push(&event, 0);
        }
        Err(_) => {}
    }
});
