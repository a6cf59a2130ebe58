//! PCR/Quote codec: wire encoding for quote blobs and the PCR-16 data-bind
//! hash, both of which are on-the-wire compatibility-critical and must be
//! preserved bit-for-bit.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

use crate::error::{TpmError, TpmResult};

/// PCR index reserved for data-binding (resettable, used as a bind channel).
pub const TPM_DATA_PCR: u32 = 16;
/// PCR index reserved for the IMA measurement aggregate.
pub const IMA_PCR: u32 = 10;

/// Encode raw TPM quote bytes for transport: a one-character type tag
/// (`'d'` deep, `'r'` shallow) followed by `base64(zlib_deflate(raw))`.
pub fn encode_quote(raw_bytes: &[u8], deep: bool) -> TpmResult<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw_bytes)
        .map_err(|e| TpmError::MalformedQuote(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| TpmError::MalformedQuote(e.to_string()))?;

    let tag = if deep { 'd' } else { 'r' };
    let mut out = String::with_capacity(1 + compressed.len() * 2);
    out.push(tag);
    out.push_str(&BASE64.encode(compressed));
    Ok(out)
}

/// Decode a quote blob produced by [`encode_quote`] back into its
/// deep/shallow flag and the raw TPM bytes.
pub fn decode_quote(text: &str) -> TpmResult<(bool, Vec<u8>)> {
    let mut chars = text.chars();
    let tag = chars
        .next()
        .ok_or_else(|| TpmError::MalformedQuote("empty quote blob".to_string()))?;
    let deep = match tag {
        'd' => true,
        'r' => false,
        other => {
            return Err(TpmError::MalformedQuote(format!(
                "unknown quote tag byte {other:?}"
            )))
        }
    };

    let body = chars.as_str();
    let compressed = BASE64
        .decode(body)
        .map_err(|e| TpmError::MalformedQuote(e.to_string()))?;

    let mut decoder = ZlibDecoder::new(&compressed[..]);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| TpmError::MalformedQuote(e.to_string()))?;

    Ok((deep, raw))
}

/// Parse `mask_text` as an integer (accepting a `0x`-prefixed hex literal)
/// and test whether bit `pcr_index` is set. A missing mask is `false`.
pub fn check_mask(mask_text: Option<&str>, pcr_index: u32) -> bool {
    let Some(text) = mask_text else {
        return false;
    };
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse::<u64>()
    };
    match parsed {
        Ok(mask) if pcr_index < 64 => (mask >> pcr_index) & 1 == 1,
        _ => false,
    }
}

/// The PCR-16 value that must be read after a `pcrreset` followed by
/// `extend -ic <sha1_hex_of(data)>`:
/// `SHA1( 0x00×20 || SHA1( hex_ascii( SHA1(data) ) ) )`.
///
/// The double hashing mirrors how the TPM's PCR-extend of a text-form hash
/// interacts with an initially-zero PCR.
pub fn expected_bind_pcr(data: &[u8]) -> String {
    let inner_digest = Sha1::digest(data);
    let inner_hex = hex::encode(inner_digest);

    let hex_digest = Sha1::digest(inner_hex.as_bytes());

    let mut extend_input = [0u8; 20];
    extend_input.copy_from_slice(&[0u8; 20]);
    let mut hasher = Sha1::new();
    hasher.update(extend_input);
    hasher.update(hex_digest);
    let final_digest = hasher.finalize();

    hex::encode(final_digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_of_encode_round_trips() {
        for deep in [true, false] {
            let raw = b"some raw tpm quote bytes, arbitrary length here".to_vec();
            let text = encode_quote(&raw, deep).unwrap();
            let (decoded_deep, decoded_raw) = decode_quote(&text).unwrap();
            assert_eq!(decoded_deep, deep);
            assert_eq!(decoded_raw, raw);
        }
    }

    #[test]
    fn encode_quote_tag_matches_deep_flag() {
        let raw = b"x";
        assert!(encode_quote(raw, true).unwrap().starts_with('d'));
        assert!(encode_quote(raw, false).unwrap().starts_with('r'));
    }

    #[test]
    fn decode_quote_rejects_unknown_tag() {
        let result = decode_quote("xSGVsbG8=");
        assert!(matches!(result, Err(TpmError::MalformedQuote(_))));
    }

    #[test]
    fn decode_quote_rejects_empty_input() {
        assert!(decode_quote("").is_err());
    }

    #[test]
    fn check_mask_parses_hex_and_decimal() {
        assert!(check_mask(Some("0x401"), 0));
        assert!(check_mask(Some("0x401"), 10));
        assert!(!check_mask(Some("0x401"), 1));
        assert!(check_mask(Some("4"), 2));
    }

    #[test]
    fn check_mask_none_is_always_false() {
        assert!(!check_mask(None, 0));
    }

    #[test]
    fn expected_bind_pcr_is_deterministic_and_40_hex_chars() {
        let a = expected_bind_pcr(b"hello world");
        let b = expected_bind_pcr(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn expected_bind_pcr_differs_for_different_data() {
        assert_ne!(expected_bind_pcr(b"data one"), expected_bind_pcr(b"data two"));
    }
}
