//! The TPM transport: a single owner exposing `reset_pcr`/`extend_pcr`/
//! `quote`/`deep_quote`. Serialisation of the `pcrreset`+`extend`+`quote`
//! sequence is a property of [`crate::producer::QuoteProducer`] owning one
//! of these behind its own mutex — not a separate lock here.

use std::process::Command;
use std::time::Duration;

use crate::error::{TpmError, TpmResult};

/// Arguments for a shallow (physical TPM) quote.
pub struct QuoteArgs<'a> {
    /// AIK handle/context to quote with.
    pub aik_handle: &'a str,
    /// Caller-chosen nonce, already validated alphanumeric.
    pub nonce: &'a str,
    /// Physical PCR mask, as a textual mask (e.g. `"0x401"`).
    pub pcrmask: &'a str,
}

/// Arguments for a deep (vTPM) quote, extending [`QuoteArgs`] with the
/// virtual PCR mask and owner password needed to reach the physical TPM.
pub struct DeepQuoteArgs<'a> {
    /// Virtual AIK handle.
    pub vaik_handle: &'a str,
    /// Caller-chosen nonce.
    pub nonce: &'a str,
    /// Virtual PCR mask.
    pub vpcrmask: &'a str,
    /// Physical PCR mask.
    pub pcrmask: &'a str,
    /// TPM owner password, required to reach the physical TPM from the vTPM.
    pub owner_password: &'a str,
}

/// The external TPM command-line tool, abstracted so the producer can be
/// exercised without real hardware.
pub trait TpmTransport: Send {
    /// Reset a resettable PCR (only PCR 16 is resettable in practice).
    fn reset_pcr(&mut self, pcr_index: u32) -> TpmResult<()>;

    /// Extend `pcr_index` with the ASCII-hex SHA1 digest `hex_digest`.
    fn extend_pcr(&mut self, pcr_index: u32, hex_digest: &str) -> TpmResult<()>;

    /// Produce a shallow quote, returning the raw (undecoded) TPM bytes.
    fn quote(&mut self, args: QuoteArgs<'_>) -> TpmResult<Vec<u8>>;

    /// Produce a deep quote, returning the raw (undecoded) bytes.
    fn deep_quote(&mut self, args: DeepQuoteArgs<'_>) -> TpmResult<Vec<u8>>;
}

/// Shells out to the external TPM command-line tools (`tpmquote`,
/// `deepquote`, `pcrreset`, `extend`), mirroring `tpm_exec.run()`.
pub struct ProcessTpmTransport {
    tpm_bin_dir: Option<String>,
}

impl ProcessTpmTransport {
    /// Create a transport that invokes TPM tools found on `PATH`.
    pub fn new() -> Self {
        Self { tpm_bin_dir: None }
    }

    /// Create a transport that invokes TPM tools from a specific directory
    /// (useful when the tools aren't installed system-wide).
    pub fn with_bin_dir(dir: impl Into<String>) -> Self {
        Self {
            tpm_bin_dir: Some(dir.into()),
        }
    }

    fn command(&self, name: &str) -> Command {
        match &self.tpm_bin_dir {
            Some(dir) => Command::new(format!("{dir}/{name}")),
            None => Command::new(name),
        }
    }

    fn run(&self, mut cmd: Command) -> TpmResult<Vec<u8>> {
        let output = cmd
            .output()
            .map_err(|e| TpmError::TpmFailure(format!("failed to spawn: {e}")))?;
        if !output.status.success() {
            return Err(TpmError::TpmFailure(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output.stdout)
    }
}

impl Default for ProcessTpmTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TpmTransport for ProcessTpmTransport {
    fn reset_pcr(&mut self, pcr_index: u32) -> TpmResult<()> {
        let mut cmd = self.command("pcrreset");
        cmd.arg("-ix").arg(pcr_index.to_string());
        self.run(cmd)?;
        Ok(())
    }

    fn extend_pcr(&mut self, pcr_index: u32, hex_digest: &str) -> TpmResult<()> {
        let mut cmd = self.command("extend");
        cmd.arg("-ix")
            .arg(pcr_index.to_string())
            .arg("-ic")
            .arg(hex_digest);
        self.run(cmd)?;
        Ok(())
    }

    fn quote(&mut self, args: QuoteArgs<'_>) -> TpmResult<Vec<u8>> {
        let tmp = tempfile::NamedTempFile::new()
            .map_err(|e| TpmError::TpmFailure(format!("temp file: {e}")))?;
        let mut cmd = self.command("tpmquote");
        cmd.arg("-hk")
            .arg(args.aik_handle)
            .arg("-bm")
            .arg(args.pcrmask)
            .arg("-nonce")
            .arg(args.nonce)
            .arg("-oq")
            .arg(tmp.path());
        self.run(cmd)?;
        std::fs::read(tmp.path()).map_err(|e| TpmError::TpmFailure(e.to_string()))
    }

    fn deep_quote(&mut self, args: DeepQuoteArgs<'_>) -> TpmResult<Vec<u8>> {
        let tmp = tempfile::NamedTempFile::new()
            .map_err(|e| TpmError::TpmFailure(format!("temp file: {e}")))?;
        let mut cmd = self.command("deepquote");
        cmd.arg("-hk")
            .arg(args.vaik_handle)
            .arg("-vbm")
            .arg(args.vpcrmask)
            .arg("-bm")
            .arg(args.pcrmask)
            .arg("-nonce")
            .arg(args.nonce)
            .arg("-pwdo")
            .arg(args.owner_password)
            .arg("-oq")
            .arg(tmp.path());
        self.run(cmd)?;
        std::fs::read(tmp.path()).map_err(|e| TpmError::TpmFailure(e.to_string()))
    }
}

/// Test-mode transport (`STUB_TPM`): returns canned blobs after a
/// configurable delay, so CI can exercise the producer without hardware.
pub struct StubTpmTransport {
    delay: Duration,
    reset_calls: Vec<u32>,
    extend_calls: Vec<(u32, String)>,
}

impl StubTpmTransport {
    /// Create a stub transport with no artificial delay.
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            reset_calls: Vec::new(),
            extend_calls: Vec::new(),
        }
    }

    /// Create a stub transport that sleeps `delay` before returning from
    /// `quote`/`deep_quote`, matching the original's configurable stub delay.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            reset_calls: Vec::new(),
            extend_calls: Vec::new(),
        }
    }

    /// PCR indices this stub has been asked to reset, for test assertions.
    pub fn reset_calls(&self) -> &[u32] {
        &self.reset_calls
    }

    /// `(index, hex_digest)` pairs this stub has been asked to extend.
    pub fn extend_calls(&self) -> &[(u32, String)] {
        &self.extend_calls
    }
}

impl Default for StubTpmTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TpmTransport for StubTpmTransport {
    fn reset_pcr(&mut self, pcr_index: u32) -> TpmResult<()> {
        self.reset_calls.push(pcr_index);
        Ok(())
    }

    fn extend_pcr(&mut self, pcr_index: u32, hex_digest: &str) -> TpmResult<()> {
        self.extend_calls.push((pcr_index, hex_digest.to_string()));
        Ok(())
    }

    fn quote(&mut self, _args: QuoteArgs<'_>) -> TpmResult<Vec<u8>> {
        std::thread::sleep(self.delay);
        Ok(b"STUB_SHALLOW_QUOTE".to_vec())
    }

    fn deep_quote(&mut self, _args: DeepQuoteArgs<'_>) -> TpmResult<Vec<u8>> {
        std::thread::sleep(self.delay);
        Ok(b"STUB_DEEP_QUOTE".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_quote_returns_canned_blob() {
        let mut stub = StubTpmTransport::new();
        let raw = stub
            .quote(QuoteArgs {
                aik_handle: "aik",
                nonce: "abc123",
                pcrmask: "0x1",
            })
            .unwrap();
        assert_eq!(raw, b"STUB_SHALLOW_QUOTE");
    }

    #[test]
    fn stub_records_reset_and_extend_calls() {
        let mut stub = StubTpmTransport::new();
        stub.reset_pcr(16).unwrap();
        stub.extend_pcr(16, &"a".repeat(40)).unwrap();
        assert_eq!(stub.reset_calls(), &[16]);
        assert_eq!(stub.extend_calls(), &[(16, "a".repeat(40))]);
    }

    #[test]
    fn stub_deep_quote_returns_canned_blob() {
        let mut stub = StubTpmTransport::new();
        let raw = stub
            .deep_quote(DeepQuoteArgs {
                vaik_handle: "vaik",
                nonce: "abc123",
                vpcrmask: "0x1",
                pcrmask: "0x1",
                owner_password: "",
            })
            .unwrap();
        assert_eq!(raw, b"STUB_DEEP_QUOTE");
    }
}
