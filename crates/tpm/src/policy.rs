//! PCR whitelist policy: a mapping from PCR index to acceptable digests,
//! plus the derived `mask` summarising every mentioned index.

use std::collections::{HashMap, HashSet};

use crate::codec::{IMA_PCR, TPM_DATA_PCR};
use crate::error::{TpmError, TpmResult};

/// A PCR whitelist: index -> set of acceptable lowercase hex digests.
///
/// Invariant: never contains [`TPM_DATA_PCR`] (16) or [`IMA_PCR`] (10) as a
/// value-whitelisted key — those indices are handled structurally by the
/// verifier, and naming them here is a configuration error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    entries: HashMap<u32, HashSet<String>>,
}

impl Policy {
    /// Parse a policy from `{index: digest | [digest, ...]}` pairs, as
    /// decoded from the wire JSON object (caller strips any synthetic
    /// `"mask"` field before calling this).
    pub fn parse(raw: HashMap<String, PolicyValue>) -> TpmResult<Self> {
        let mut entries = HashMap::new();
        for (key, value) in raw {
            let index: u32 = key
                .parse()
                .map_err(|_| TpmError::MalformedQuote(format!("non-numeric PCR index {key:?}")))?;

            if index >= 24 {
                return Err(TpmError::PcrIndexOutOfRange { index });
            }
            if index == TPM_DATA_PCR || index == IMA_PCR {
                return Err(TpmError::ReservedPcrInPolicy { index });
            }

            let digests: HashSet<String> = match value {
                PolicyValue::Single(d) => std::iter::once(d.to_lowercase()).collect(),
                PolicyValue::Multiple(ds) => ds.into_iter().map(|d| d.to_lowercase()).collect(),
            };
            entries.insert(index, digests);
        }
        Ok(Policy { entries })
    }

    /// Parse a policy directly from a JSON object of `{index: digest |
    /// [digest, ...]}` pairs, as read from a policy file on disk.
    pub fn from_json(text: &str) -> TpmResult<Self> {
        let raw: HashMap<String, PolicyValue> = serde_json::from_str(text)
            .map_err(|e| TpmError::MalformedQuote(format!("invalid policy JSON: {e}")))?;
        Self::parse(raw)
    }

    /// The bitmask of all indices mentioned by this policy (PCR 16/10
    /// excluded by construction since `parse` rejects them).
    pub fn mask(&self) -> u64 {
        self.entries.keys().fold(0u64, |acc, &idx| acc | (1 << idx))
    }

    /// The mask as the `"0x<HEX>"` text the wire format uses.
    pub fn mask_hex(&self) -> String {
        format!("0x{:X}", self.mask())
    }

    /// Every whitelisted index, for the "all indices must appear" check.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// `true` if `digest` (any case) is acceptable for `index`.
    pub fn accepts(&self, index: u32, digest: &str) -> bool {
        self.entries
            .get(&index)
            .map(|set| set.contains(&digest.to_lowercase()))
            .unwrap_or(false)
    }

    /// `true` if this policy whitelists `index` at all.
    pub fn contains_index(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }
}

/// A policy value as it appears on the wire: either a single hex digest or
/// a list of acceptable digests for that index.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum PolicyValue {
    /// A single acceptable digest.
    Single(String),
    /// Several acceptable digests.
    Multiple(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(d: &str) -> PolicyValue {
        PolicyValue::Single(d.to_string())
    }

    #[test]
    fn parse_rejects_pcr_16_and_10() {
        let mut raw = HashMap::new();
        raw.insert("16".to_string(), single("f".repeat(40).as_str()));
        assert!(matches!(
            Policy::parse(raw),
            Err(TpmError::ReservedPcrInPolicy { index: 16 })
        ));

        let mut raw = HashMap::new();
        raw.insert("10".to_string(), single("f".repeat(40).as_str()));
        assert!(matches!(
            Policy::parse(raw),
            Err(TpmError::ReservedPcrInPolicy { index: 10 })
        ));
    }

    #[test]
    fn from_json_parses_single_and_multiple_digests() {
        let text = r#"{"22":"ffffffffffffffffffffffffffffffffffffffff","02":["0000000000000000000000000000000000000000","1111111111111111111111111111111111111111"]}"#;
        let policy = Policy::from_json(text).unwrap();
        assert!(policy.contains_index(22));
        assert!(policy.contains_index(2));
        assert!(policy.accepts(2, "1111111111111111111111111111111111111111"));
    }

    #[test]
    fn from_json_rejects_reserved_pcr() {
        let text = r#"{"16":"ffffffffffffffffffffffffffffffffffffffff"}"#;
        assert!(matches!(
            Policy::from_json(text),
            Err(TpmError::ReservedPcrInPolicy { index: 16 })
        ));
    }

    #[test]
    fn parse_rejects_out_of_range_index() {
        let mut raw = HashMap::new();
        raw.insert("24".to_string(), single("0".repeat(40).as_str()));
        assert!(matches!(
            Policy::parse(raw),
            Err(TpmError::PcrIndexOutOfRange { index: 24 })
        ));
    }

    #[test]
    fn mask_reflects_mentioned_indices() {
        let mut raw = HashMap::new();
        raw.insert("22".to_string(), single("f".repeat(40).as_str()));
        raw.insert("2".to_string(), single("0".repeat(40).as_str()));
        let policy = Policy::parse(raw).unwrap();
        assert_eq!(policy.mask(), (1u64 << 22) | (1u64 << 2));
        assert_eq!(policy.mask_hex(), format!("0x{:X}", (1u64 << 22) | (1u64 << 2)));
    }

    #[test]
    fn accepts_is_case_insensitive() {
        let mut raw = HashMap::new();
        raw.insert("5".to_string(), single(&"AB".repeat(20)));
        let policy = Policy::parse(raw).unwrap();
        assert!(policy.accepts(5, &"ab".repeat(20)));
        assert!(!policy.accepts(5, &"cd".repeat(20)));
        assert!(!policy.accepts(6, &"ab".repeat(20)));
    }

    #[test]
    fn accepts_multiple_digests_per_index() {
        let mut raw = HashMap::new();
        raw.insert(
            "3".to_string(),
            PolicyValue::Multiple(vec!["aa".repeat(20), "bb".repeat(20)]),
        );
        let policy = Policy::parse(raw).unwrap();
        assert!(policy.accepts(3, &"aa".repeat(20)));
        assert!(policy.accepts(3, &"bb".repeat(20)));
        assert!(!policy.accepts(3, &"cc".repeat(20)));
    }
}
