//! Fuzz target: `LineDecoder::feed`
//!
//! Drives arbitrary byte sequences into the line decoder, split at an
//! arbitrary point, and asserts that it never panics, never yields a line
//! longer than `MAX_LINE_LEN`, and gives the same lines however the input
//! is chunked.
//!
//! cargo fuzz run fuzz_line_decoder

#![no_main]

use divinofax::link::codec::{LineDecoder, MAX_LINE_LEN};
use libfuzzer_sys::fuzz_target;

fn decode(chunks: &[&[u8]]) -> Vec<Result<String, String>> {
    let mut decoder = LineDecoder::new();
    let mut out = Vec::new();
    for chunk in chunks {
        decoder.feed(chunk, |line| {
            out.push(line.map(str::to_owned).map_err(|e| e.to_string()));
        });
    }
    out
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let at = usize::from(split).min(rest.len());

    let whole = decode(&[rest]);
    let split = decode(&[&rest[..at], &rest[at..]]);
    assert_eq!(whole, split, "chunking changed the decoded lines");

    for line in whole.iter().flatten() {
        assert!(line.len() <= MAX_LINE_LEN, "line exceeds MAX_LINE_LEN");
        assert!(!line.contains('\n'), "line still contains a newline");
    }
});
