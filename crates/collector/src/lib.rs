//! Key-Share Collector (C4): a thread-safe multiset of U and V candidates.
//! On any insert, attempts every `(u, v)` pairing against the auth tag
//! until K is derived exactly once.

mod error;

use std::sync::Mutex;

use keylime_crypto::{verify_hmac_tag, xor_shares};
use tracing::info;
use zeroize::Zeroize;

pub use error::{CollectorError, CollectorResult};

/// Result of a submission: whether this call is the one that derived K.
///
/// `Derived` is returned both the moment K is actually derived *and* on any
/// later submission once K already exists — the caller-visible behaviour
/// (HTTP 200) is identical either way; only the first transition actually
/// ran the post-derive pipeline, which callers detect via
/// [`KeyShareCollector::just_derived`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// K is set (whether by this call or a previous one).
    Derived,
    /// Not enough matching shares yet; this is the normal in-between state.
    Pending,
}

struct CollectorState {
    u_set: Vec<Vec<u8>>,
    v_set: Vec<Vec<u8>>,
    auth_tag: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
    k: Option<Vec<u8>>,
    final_u: Option<Vec<u8>>,
}

impl Drop for CollectorState {
    fn drop(&mut self) {
        self.u_set.iter_mut().for_each(Zeroize::zeroize);
        self.v_set.iter_mut().for_each(Zeroize::zeroize);
        self.auth_tag.zeroize();
        self.payload.zeroize();
        self.k.zeroize();
        self.final_u.zeroize();
    }
}

/// Thread-safe collector of key shares, guarded by a single mutex covering
/// every read-modify-write sequence (insert-then-try-derive, read-then-clear).
pub struct KeyShareCollector {
    node_uuid: String,
    state: Mutex<CollectorState>,
}

impl KeyShareCollector {
    /// Create an empty collector bound to this node's (immutable) UUID.
    pub fn new(node_uuid: impl Into<String>) -> Self {
        Self {
            node_uuid: node_uuid.into(),
            state: Mutex::new(CollectorState {
                u_set: Vec::new(),
                v_set: Vec::new(),
                auth_tag: None,
                payload: None,
                k: None,
                final_u: None,
            }),
        }
    }

    /// The node UUID this collector authenticates candidate keys against.
    pub fn node_uuid(&self) -> &str {
        &self.node_uuid
    }

    /// Seed `u_set` with a value persisted from a previous run (NVRAM warm
    /// restart). Does not itself attempt a derivation — no `auth_tag` is
    /// known yet at startup.
    pub fn seed_u(&self, u: Vec<u8>) {
        let mut state = self.state.lock().expect("collector mutex poisoned");
        state.u_set.push(u);
    }

    /// Insert `u` plus the request's `auth_tag` (and optional payload
    /// ciphertext), then attempt derivation against every known `v`.
    pub fn submit_u(
        &self,
        u: Vec<u8>,
        auth_tag: Vec<u8>,
        payload: Option<Vec<u8>>,
    ) -> CollectorResult<CollectOutcome> {
        let mut state = self.state.lock().expect("collector mutex poisoned");
        state.u_set.push(u);
        state.auth_tag = Some(auth_tag);
        if let Some(p) = payload {
            state.payload = Some(p);
        }
        self.try_derive_locked(&mut state)
    }

    /// Insert `v`, then attempt derivation against every known `u`.
    pub fn submit_v(&self, v: Vec<u8>) -> CollectorResult<CollectOutcome> {
        let mut state = self.state.lock().expect("collector mutex poisoned");
        state.v_set.push(v);
        self.try_derive_locked(&mut state)
    }

    fn try_derive_locked(&self, state: &mut CollectorState) -> CollectorResult<CollectOutcome> {
        if state.k.is_some() {
            return Ok(CollectOutcome::Derived);
        }

        let Some(auth_tag) = state.auth_tag.clone() else {
            return Ok(CollectOutcome::Pending);
        };

        for u in &state.u_set {
            for v in &state.v_set {
                if u.len() != v.len() {
                    continue;
                }
                let candidate = xor_shares(u, v)?;
                if verify_hmac_tag(&candidate, self.node_uuid.as_bytes(), &auth_tag) {
                    state.k = Some(candidate);
                    state.final_u = Some(u.clone());
                    state.u_set.clear();
                    state.v_set.clear();
                    info!(node_uuid = %self.node_uuid, "bootstrap key derived");
                    return Ok(CollectOutcome::Derived);
                }
            }
        }

        Ok(CollectOutcome::Pending)
    }

    /// The derived bootstrap key, if any.
    pub fn k(&self) -> Option<Vec<u8>> {
        self.state.lock().expect("collector mutex poisoned").k.clone()
    }

    /// The U value that paired with some V to derive K, for NVRAM persistence.
    pub fn final_u(&self) -> Option<Vec<u8>> {
        self.state
            .lock()
            .expect("collector mutex poisoned")
            .final_u
            .clone()
    }

    /// Take (consume) the most recently submitted payload ciphertext, for
    /// the post-derive pipeline to decrypt exactly once.
    pub fn take_payload(&self) -> Option<Vec<u8>> {
        self.state.lock().expect("collector mutex poisoned").payload.take()
    }

    /// `true` once K has been derived.
    pub fn has_derived_key(&self) -> bool {
        self.state.lock().expect("collector mutex poisoned").k.is_some()
    }

    /// Number of distinct U candidates currently held (for tests/metrics;
    /// never logged with contents).
    pub fn pending_u_count(&self) -> usize {
        self.state.lock().expect("collector mutex poisoned").u_set.len()
    }

    /// Number of distinct V candidates currently held.
    pub fn pending_v_count(&self) -> usize {
        self.state.lock().expect("collector mutex poisoned").v_set.len()
    }
}
