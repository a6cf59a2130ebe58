//! Quote verifier (C3): given a quote, AIK(s), nonce, policy, and optional
//! IMA inputs, decide pass/fail against a PCR whitelist and IMA whitelist.

use std::path::Path;
use std::process::Command;

use tempfile::NamedTempFile;

use crate::codec::{decode_quote, expected_bind_pcr, IMA_PCR, TPM_DATA_PCR};
use crate::error::{TpmError, TpmResult};
use crate::policy::Policy;

const SIGNATURE_SUCCESS_LINE: &str = "Verification against AIK succeeded";
const PHYSICAL_PCR_LABEL: &str = "PCR contents from quote:";
const VIRTUAL_PCR_LABEL: &str = "PCR contents from vTPM quote:";

/// One `<tag> <index> <hex_digest>` line from the native verifier's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrEntry {
    /// PCR index.
    pub index: u32,
    /// Lowercase hex digest the quote reported for this PCR.
    pub digest: String,
}

/// The external native quote-verification helper (`tpm_cexec`), abstracted
/// for testing. Implementations invoke a signature check over a decoded
/// quote file and return its raw stdout for this module to parse.
pub trait NativeQuoteVerifier: Send + Sync {
    /// Run the signature check, returning the tool's stdout text.
    fn verify(&self, aik_paths: &[&Path], quote_file: &Path, nonce: &str) -> TpmResult<String>;
}

/// Shells out to the native verifier binary.
pub struct ProcessNativeVerifier {
    binary: String,
}

impl ProcessNativeVerifier {
    /// Create a verifier that invokes `binary` (found on `PATH` by default).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ProcessNativeVerifier {
    fn default() -> Self {
        Self::new("tpm_cexec")
    }
}

impl NativeQuoteVerifier for ProcessNativeVerifier {
    fn verify(&self, aik_paths: &[&Path], quote_file: &Path, nonce: &str) -> TpmResult<String> {
        let mut cmd = Command::new(&self.binary);
        for path in aik_paths {
            cmd.arg("-aik").arg(path);
        }
        cmd.arg("-quote").arg(quote_file).arg("-nonce").arg(nonce);

        let output = cmd
            .output()
            .map_err(|e| TpmError::TpmFailure(format!("failed to spawn native verifier: {e}")))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A canned verifier for tests: always reports signature success and
/// returns whatever PCR block text the test supplies.
pub struct StubNativeVerifier {
    stdout: String,
}

impl StubNativeVerifier {
    /// Build a stub whose stdout is a successful header plus `pcr_block`.
    pub fn success_with_pcrs(pcr_block: &str) -> Self {
        Self {
            stdout: format!("{SIGNATURE_SUCCESS_LINE}\n{pcr_block}"),
        }
    }

    /// Build a stub whose signature line reports failure.
    pub fn failure() -> Self {
        Self {
            stdout: "Verification against AIK failed\n".to_string(),
        }
    }
}

impl NativeQuoteVerifier for StubNativeVerifier {
    fn verify(&self, _aik_paths: &[&Path], _quote_file: &Path, _nonce: &str) -> TpmResult<String> {
        Ok(self.stdout.clone())
    }
}

/// The external IMA measurement-list parser: reduces a newline-delimited
/// measurement log to a single aggregate digest that must equal the quoted
/// PCR 10 value.
pub trait ImaPolicy: Send + Sync {
    /// Compute the aggregate digest for `ima_list`, optionally filtered by a
    /// whitelist of acceptable file measurements.
    fn aggregate(&self, ima_list: &str, ima_whitelist: Option<&str>) -> TpmResult<String>;
}

/// Line-oriented stub IMA parser for tests: the aggregate is just the
/// lowercase hex SHA1 of the full measurement list text, ignoring the
/// whitelist (full template parsing is out of scope).
pub struct StubImaPolicy;

impl ImaPolicy for StubImaPolicy {
    fn aggregate(&self, ima_list: &str, _ima_whitelist: Option<&str>) -> TpmResult<String> {
        use sha1::{Digest, Sha1};
        Ok(hex::encode(Sha1::digest(ima_list.as_bytes())))
    }
}

fn parse_verifier_output(output: &str) -> TpmResult<(Vec<PcrEntry>, Vec<PcrEntry>)> {
    let first_line = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("");
    if first_line.trim() != SIGNATURE_SUCCESS_LINE {
        return Err(TpmError::SignatureFailure);
    }

    let mut physical = Vec::new();
    let mut virt = Vec::new();
    let mut target = &mut physical;
    let mut seen_physical_label = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == SIGNATURE_SUCCESS_LINE {
            continue;
        }
        if trimmed == PHYSICAL_PCR_LABEL {
            seen_physical_label = true;
            target = &mut physical;
            continue;
        }
        if trimmed == VIRTUAL_PCR_LABEL {
            target = &mut virt;
            continue;
        }
        if !seen_physical_label {
            // Pre-label chatter (none expected in practice) is ignored.
            continue;
        }
        if let Some(entry) = parse_pcr_line(trimmed) {
            target.push(entry);
        }
    }

    Ok((physical, virt))
}

fn parse_pcr_line(line: &str) -> Option<PcrEntry> {
    let mut parts = line.split_whitespace();
    let _tag = parts.next()?;
    let index: u32 = parts.next()?.parse().ok()?;
    let digest = parts.next()?.to_lowercase();
    Some(PcrEntry { index, digest })
}

/// Validate a set of parsed PCR entries against a policy, with optional
/// data-bind (PCR 16) and IMA (PCR 10) handling.
pub fn check_pcrs(
    entries: &[PcrEntry],
    policy: &Policy,
    data: Option<&[u8]>,
    ima_list: Option<&str>,
    ima_whitelist: Option<&str>,
    ima_policy: Option<&dyn ImaPolicy>,
) -> TpmResult<bool> {
    let mut seen = std::collections::HashSet::new();

    for entry in entries {
        if entry.index == TPM_DATA_PCR {
            if let Some(data) = data {
                if entry.digest != expected_bind_pcr(data) {
                    return Ok(false);
                }
            }
            continue;
        }

        if entry.index == IMA_PCR {
            let Some(list) = ima_list else {
                return Ok(false);
            };
            let Some(parser) = ima_policy else {
                return Ok(false);
            };
            let aggregate = parser.aggregate(list, ima_whitelist)?;
            if aggregate != entry.digest {
                return Ok(false);
            }
            seen.insert(entry.index);
            continue;
        }

        if !policy.contains_index(entry.index) {
            tracing::warn!(pcr = entry.index, "quoted PCR not in whitelist, ignoring");
            continue;
        }

        if !policy.accepts(entry.index, &entry.digest) {
            return Ok(false);
        }
        seen.insert(entry.index);
    }

    for index in policy.indices() {
        if !seen.contains(&index) {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Decode `quote`, verify its signature, and check its PCRs against
/// `policy` (and, if `ima_list` is present, the PCR-10 IMA aggregate).
#[allow(clippy::too_many_arguments)]
pub fn check_quote(
    nonce: &str,
    data: Option<&[u8]>,
    quote: &str,
    aik_path: &Path,
    policy: &Policy,
    ima_list: Option<&str>,
    ima_whitelist: Option<&str>,
    verifier: &dyn NativeQuoteVerifier,
    ima_policy: Option<&dyn ImaPolicy>,
) -> TpmResult<bool> {
    let (deep, raw) = decode_quote(quote)?;
    if deep {
        return Err(TpmError::MalformedQuote(
            "check_quote received a deep-tagged blob".to_string(),
        ));
    }

    let tmp = write_temp_quote(&raw)?;
    let output = verifier.verify(&[aik_path], tmp.path(), nonce)?;
    let (physical, _virtual) = match parse_verifier_output(&output) {
        Ok(v) => v,
        Err(TpmError::SignatureFailure) => return Ok(false),
        Err(e) => return Err(e),
    };

    check_pcrs(&physical, policy, data, ima_list, ima_whitelist, ima_policy)
}

/// Decode a deep `quote`, verify its signature, and check the physical block
/// against `tpm_policy` (without data binding) and the virtual block against
/// `vtpm_policy` (with data binding and IMA).
#[allow(clippy::too_many_arguments)]
pub fn check_deep_quote(
    nonce: &str,
    data: Option<&[u8]>,
    quote: &str,
    vaik_path: &Path,
    haik_path: &Path,
    vtpm_policy: &Policy,
    tpm_policy: &Policy,
    ima_list: Option<&str>,
    ima_whitelist: Option<&str>,
    verifier: &dyn NativeQuoteVerifier,
    ima_policy: Option<&dyn ImaPolicy>,
) -> TpmResult<bool> {
    let (deep, raw) = decode_quote(quote)?;
    if !deep {
        return Err(TpmError::MalformedQuote(
            "check_deep_quote received a shallow-tagged blob".to_string(),
        ));
    }

    let tmp = write_temp_quote(&raw)?;
    let output = verifier.verify(&[vaik_path, haik_path], tmp.path(), nonce)?;
    let (physical, virt) = match parse_verifier_output(&output) {
        Ok(v) => v,
        Err(TpmError::SignatureFailure) => return Ok(false),
        Err(e) => return Err(e),
    };

    let physical_ok = check_pcrs(&physical, tpm_policy, None, None, None, None)?;
    if !physical_ok {
        return Ok(false);
    }

    check_pcrs(&virt, vtpm_policy, data, ima_list, ima_whitelist, ima_policy)
}

fn write_temp_quote(raw: &[u8]) -> TpmResult<NamedTempFile> {
    use std::io::Write;
    let mut tmp =
        NamedTempFile::new().map_err(|e| TpmError::TpmFailure(format!("temp file: {e}")))?;
    tmp.write_all(raw)
        .map_err(|e| TpmError::TpmFailure(format!("temp file write: {e}")))?;
    Ok(tmp)
}
