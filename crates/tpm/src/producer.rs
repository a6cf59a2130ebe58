//! Quote producer (C2): under a process-wide TPM lock, optionally bind data
//! into PCR 16, then invoke the TPM transport to produce a shallow or deep
//! quote.

use std::sync::Mutex;

use sha1::{Digest, Sha1};

use crate::codec::{encode_quote, TPM_DATA_PCR};
use crate::error::TpmResult;
use crate::transport::{DeepQuoteArgs, QuoteArgs, TpmTransport};

/// Default mask when the caller supplies none: PCR 0 only.
const DEFAULT_MASK: &str = "1";

/// Owns the TPM transport behind a mutex. The mutex is held for the full
/// reset+extend+quote sequence — serialisation is a property of this
/// ownership, not a lock callers must remember to take.
pub struct QuoteProducer {
    transport: Mutex<Box<dyn TpmTransport>>,
    aik_handle: String,
    vaik_handle: Option<String>,
    owner_password: String,
}

impl QuoteProducer {
    /// Construct a producer around a transport and the node's AIK handle(s).
    pub fn new(transport: Box<dyn TpmTransport>, aik_handle: impl Into<String>) -> Self {
        Self {
            transport: Mutex::new(transport),
            aik_handle: aik_handle.into(),
            vaik_handle: None,
            owner_password: String::new(),
        }
    }

    /// Attach a virtual AIK handle and owner password, required for
    /// [`Self::make_deep`].
    pub fn with_vtpm(mut self, vaik_handle: impl Into<String>, owner_password: impl Into<String>) -> Self {
        self.vaik_handle = Some(vaik_handle.into());
        self.owner_password = owner_password.into();
        self
    }

    /// `true` if this producer was configured with a virtual AIK handle
    /// (i.e. the node is running under a vTPM).
    pub fn has_vtpm(&self) -> bool {
        self.vaik_handle.is_some()
    }

    /// Extend an arbitrary PCR with a precomputed hex digest, under the same
    /// transport lock used for quoting. Used by the payload pipeline to
    /// measure the decrypted workload.
    pub fn measure(&self, pcr_index: u32, hex_digest: &str) -> TpmResult<()> {
        let mut transport = self.transport.lock().expect("TPM transport mutex poisoned");
        transport.extend_pcr(pcr_index, hex_digest)
    }

    /// Produce a shallow (physical TPM) quote.
    ///
    /// `nonce` must already be alphanumeric-validated by the caller (the
    /// HTTP surface). `bind_data`, if present, is bound into PCR 16 before
    /// quoting. `pcrmask` defaults to `"1"` when absent.
    pub fn make_shallow(
        &self,
        nonce: &str,
        bind_data: Option<&[u8]>,
        pcrmask: Option<&str>,
    ) -> TpmResult<String> {
        let mut transport = self.transport.lock().expect("TPM transport mutex poisoned");
        let mask = pcrmask.unwrap_or(DEFAULT_MASK).to_string();
        let effective_mask = bind_pcr_16_if_needed(&mut **transport, bind_data, &mask)?;

        let raw = transport.quote(QuoteArgs {
            aik_handle: &self.aik_handle,
            nonce,
            pcrmask: &effective_mask,
        })?;
        encode_quote(&raw, false)
    }

    /// Produce a deep (vTPM) quote. Mask augmentation for the data bind
    /// happens on the *physical* mask, not the virtual one — the data is
    /// only ever bound into the virtual quote's PCR 16, but the vTPM's
    /// physical-TPM-facing mask is what must carry the extra bit so the
    /// physical quote underlying it covers PCR 16 too.
    pub fn make_deep(
        &self,
        nonce: &str,
        bind_data: Option<&[u8]>,
        vpcrmask: Option<&str>,
        pcrmask: Option<&str>,
    ) -> TpmResult<String> {
        let vaik_handle = self
            .vaik_handle
            .as_deref()
            .expect("make_deep called without a vTPM AIK handle configured");

        let mut transport = self.transport.lock().expect("TPM transport mutex poisoned");
        let physical_mask = pcrmask.unwrap_or(DEFAULT_MASK).to_string();
        let effective_physical_mask =
            bind_pcr_16_if_needed(&mut **transport, bind_data, &physical_mask)?;
        let virtual_mask = vpcrmask.unwrap_or(DEFAULT_MASK);

        let raw = transport.deep_quote(DeepQuoteArgs {
            vaik_handle,
            nonce,
            vpcrmask: virtual_mask,
            pcrmask: &effective_physical_mask,
            owner_password: &self.owner_password,
        })?;
        encode_quote(&raw, true)
    }
}

fn bind_pcr_16_if_needed(
    transport: &mut dyn TpmTransport,
    bind_data: Option<&[u8]>,
    mask: &str,
) -> TpmResult<String> {
    let Some(data) = bind_data else {
        return Ok(mask.to_string());
    };

    transport.reset_pcr(TPM_DATA_PCR)?;
    let hex_digest = hex::encode(Sha1::digest(data));
    transport.extend_pcr(TPM_DATA_PCR, &hex_digest)?;

    let mask_value = parse_mask(mask) | (1u64 << TPM_DATA_PCR);
    Ok(format!("0x{mask_value:X}"))
}

fn parse_mask(mask: &str) -> u64 {
    if let Some(hex) = mask.strip_prefix("0x").or_else(|| mask.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        mask.parse().unwrap_or(0)
    }
}
