//! Dictionary (LZW) codec
//!
//! Byte-oriented LZW over the canonical serialized form of a working
//! payload. The dictionary is seeded with the 256 single-byte codes and
//! grown with the standard insertion rule; the decoder rebuilds an
//! identical dictionary on the fly from an integer-indexed arena and
//! handles the `entry = w + w[0]` case where a code references the
//! not-yet-inserted entry.

use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// Compress a string into an LZW code stream.
///
/// Empty input yields an empty stream. Operates on UTF-8 bytes, so any
/// unicode text round-trips exactly.
pub fn lzw_compress(input: &str) -> Vec<u32> {
    let bytes = input.as_bytes();
    if bytes.is_empty() {
        return Vec::new();
    }

    let mut dict: HashMap<Vec<u8>, u32> = (0u32..256).map(|i| (vec![i as u8], i)).collect();
    let mut next_code: u32 = 256;
    let mut codes = Vec::new();
    let mut w: Vec<u8> = Vec::new();

    for &k in bytes {
        let mut wk = w.clone();
        wk.push(k);
        if dict.contains_key(&wk) {
            w = wk;
        } else {
            codes.push(dict[&w]);
            dict.insert(wk, next_code);
            next_code += 1;
            w = vec![k];
        }
    }
    codes.push(dict[&w]);
    codes
}

/// Decompress an LZW code stream back into the original string.
///
/// Fails with `CorruptData` when a code references an entry the decoder
/// cannot have built yet, or when the decoded bytes are not valid UTF-8.
pub fn lzw_decompress(codes: &[u32]) -> Result<String> {
    if codes.is_empty() {
        return Ok(String::new());
    }

    // Arena dictionary indexed directly by code
    let mut dict: Vec<Vec<u8>> = (0u16..256).map(|i| vec![i as u8]).collect();

    let first = codes[0] as usize;
    if first >= dict.len() {
        return Err(EngineError::CorruptData(format!(
            "lzw stream starts with unseeded code {}",
            first
        )));
    }
    let mut w = dict[first].clone();
    let mut out = w.clone();

    for &code in &codes[1..] {
        let code = code as usize;
        let entry = if code < dict.len() {
            dict[code].clone()
        } else if code == dict.len() {
            // The "device code" case: the code being read is the entry
            // currently under construction, so it must be w + w[0]
            let mut e = w.clone();
            e.push(w[0]);
            e
        } else {
            return Err(EngineError::CorruptData(format!(
                "lzw code {} exceeds dictionary size {}",
                code,
                dict.len()
            )));
        };

        out.extend_from_slice(&entry);
        let mut inserted = w;
        inserted.push(entry[0]);
        dict.push(inserted);
        w = entry;
    }

    String::from_utf8(out)
        .map_err(|e| EngineError::CorruptData(format!("lzw output is not valid utf-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(s: &str) {
        let codes = lzw_compress(s);
        assert_eq!(lzw_decompress(&codes).unwrap(), s);
    }

    #[test]
    fn test_round_trip_plain() {
        round_trip("the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn test_round_trip_empty() {
        round_trip("");
        assert!(lzw_compress("").is_empty());
    }

    #[test]
    fn test_round_trip_unicode() {
        round_trip("naïve résumé — 記憶エンジン 🚀 züge");
    }

    #[test]
    fn test_round_trip_repetitive() {
        let s = "abcabcabc".repeat(200);
        let codes = lzw_compress(&s);
        assert!(codes.len() < s.len());
        assert_eq!(lzw_decompress(&codes).unwrap(), s);
    }

    #[test]
    fn test_device_code_edge_case() {
        // Classic trigger: cScSc pattern forces a reference to the entry
        // still under construction
        round_trip("ababababa");
    }

    #[test]
    fn test_corrupt_stream_rejected() {
        let err = lzw_decompress(&[99999]).unwrap_err();
        assert!(matches!(err, EngineError::CorruptData(_)));

        let err = lzw_decompress(&[65, 70000]).unwrap_err();
        assert!(matches!(err, EngineError::CorruptData(_)));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        // 0xC3 alone is a truncated multi-byte sequence
        let err = lzw_decompress(&[0xC3]).unwrap_err();
        assert!(matches!(err, EngineError::CorruptData(_)));
    }
}
