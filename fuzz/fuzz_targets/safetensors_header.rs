#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Write;

/// Fuzz target for the safetensors header reader
///
/// Arbitrary bytes must yield a parsed header or an error, never a panic or
/// an allocation driven by an unchecked length prefix.
fuzz_target!(|data: &[u8]| {
    let Ok(mut file) = tempfile::NamedTempFile::new() else {
        return;
    };
    if file.write_all(data).is_err() {
        return;
    }

    if let Ok(header) = qobserve::io::read_safetensors_header(file.path()) {
        let len = u64::from_le_bytes(data[..8].try_into().unwrap_or([0; 8]));
        assert!(len <= qobserve::io::MAX_HEADER_SIZE);
        let _ = header.len();
    }
});
