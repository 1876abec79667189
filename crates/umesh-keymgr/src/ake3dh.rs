//! Triple Diffie-Hellman authenticated key exchange (C6), grounded on
//! `ake_3dh.c`/`.h`.
//!
//! Each session drives itself forward one idempotent step per tick: fill in
//! whatever value is next computable, send whatever request/response is due,
//! and once all three shared secrets exist, derive the session keys and
//! report the result. Nothing here talks to the wire directly; [`step`]
//! returns the messages it wants sent, and the caller (the key manager)
//! owns delivery and retry bookkeeping beyond the per-request backoff
//! already modelled here.

use umesh_crypto::sha::{derive_master_key, derive_session_key};
use umesh_crypto::x25519::x25519;
use zeroize::Zeroize;

use crate::error::KeyMgrError;
use crate::messages::{AkeContent, AkeMessage, SESSION_ID_SIZE};

/// Initial backoff before the first `EPKRequest`/`IPKRequest` resend.
pub const REQUEST_INITIAL_INTERVAL_MS: u32 = 200;
/// Backoff multiplier applied after each request send.
pub const REQUEST_INTERVAL_MULTIPLIER: u32 = 2;
/// Backoff ceiling.
pub const REQUEST_INTERVAL_MAX_MS: u32 = 2_000;

/// Outcome of a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AkeResult {
    /// Not yet determined.
    #[default]
    None,
    /// Key exchange completed; TX/RX keys are valid.
    Ok,
    /// Key exchange failed (e.g. equal ephemeral public keys).
    Failed,
}

/// Which side of the exchange this session ended up playing; determines
/// the sh2/sh3 computation order and the TX/RX key assignment (§4.7 step 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Not yet determined (before both ephemeral public keys are known).
    #[default]
    Unknown,
    /// The lexicographically lesser ephemeral public key.
    Alice,
    /// The lexicographically greater ephemeral public key.
    Bob,
}

/// A backoff timer for a periodically-resent request.
#[derive(Debug, Clone, Copy, Default)]
struct RequestBackoff {
    interval_ms: u32,
    elapsed_ms: u32,
}

impl RequestBackoff {
    fn due(&mut self, dt_ms: u32) -> bool {
        self.elapsed_ms += dt_ms;
        if self.interval_ms == 0 {
            self.interval_ms = REQUEST_INITIAL_INTERVAL_MS;
        }
        if self.elapsed_ms < self.interval_ms {
            return false;
        }
        self.elapsed_ms = 0;
        self.interval_ms = (self.interval_ms * REQUEST_INTERVAL_MULTIPLIER).min(REQUEST_INTERVAL_MAX_MS);
        true
    }
}

/// One 3DH session, tracking every sub-step of the protocol to completion.
pub struct Ake3dhSession {
    session_id: Option<[u8; SESSION_ID_SIZE]>,

    my_esk: Option<[u8; 32]>,
    my_epk: Option<[u8; 32]>,
    my_epk_requested: bool,

    peer_epk: Option<[u8; 32]>,
    peer_epk_backoff: RequestBackoff,

    my_isk: [u8; 32],
    my_ipk: [u8; 32],
    my_ipk_requested: bool,

    peer_ipk: Option<[u8; 32]>,
    peer_ipk_backoff: RequestBackoff,

    sh1: Option<[u8; 32]>,
    role: Role,
    sh2: Option<[u8; 32]>,
    sh3: Option<[u8; 32]>,

    master_key: Option<[u8; 32]>,
    master_tx_key: Option<[u8; 32]>,
    master_rx_key: Option<[u8; 32]>,

    /// Result is set at most once; further steps become no-ops.
    pub result: AkeResult,
}

impl Drop for Ake3dhSession {
    fn drop(&mut self) {
        self.my_esk.zeroize();
        self.my_isk.zeroize();
        self.sh1.zeroize();
        self.sh2.zeroize();
        self.sh3.zeroize();
        self.master_key.zeroize();
        self.master_tx_key.zeroize();
        self.master_rx_key.zeroize();
    }
}

/// Outbound messages a step may ask the caller to send.
#[derive(Debug, Default)]
pub struct StepOutput {
    /// Messages to hand to the peer, in order.
    pub send: Vec<AkeMessage>,
}

impl Ake3dhSession {
    /// Start a new session with our identity keypair, optionally seeded
    /// with a session id supplied by the peer (receive-side allocation;
    /// §4.6: "starts a 3DH session seeded with the received session-id").
    #[must_use]
    pub fn new(my_isk: [u8; 32], my_ipk: [u8; 32], session_id: Option<[u8; SESSION_ID_SIZE]>) -> Self {
        Self {
            session_id,
            my_esk: None,
            my_epk: None,
            my_epk_requested: false,
            peer_epk: None,
            peer_epk_backoff: RequestBackoff::default(),
            my_isk,
            my_ipk,
            my_ipk_requested: false,
            peer_ipk: None,
            peer_ipk_backoff: RequestBackoff::default(),
            sh1: None,
            role: Role::Unknown,
            sh2: None,
            sh3: None,
            master_key: None,
            master_tx_key: None,
            master_rx_key: None,
            result: AkeResult::None,
        }
    }

    /// The session id once generated/seeded.
    #[must_use]
    pub fn session_id(&self) -> Option<[u8; SESSION_ID_SIZE]> {
        self.session_id
    }

    /// TX key, once the exchange has completed successfully.
    #[must_use]
    pub fn master_tx_key(&self) -> Option<[u8; 32]> {
        self.master_tx_key
    }

    /// RX key, once the exchange has completed successfully.
    #[must_use]
    pub fn master_rx_key(&self) -> Option<[u8; 32]> {
        self.master_rx_key
    }

    /// Apply an inbound message to this session's state.
    pub fn receive(&mut self, content: &AkeContent) -> Result<(), KeyMgrError> {
        match content {
            AkeContent::EpkRequest => self.my_epk_requested = true,
            AkeContent::EpkResponse { ephemeral_pk } => self.peer_epk = Some(*ephemeral_pk),
            AkeContent::IpkRequest => self.my_ipk_requested = true,
            AkeContent::IpkResponse { identity_pk } => self.peer_ipk = Some(*identity_pk),
            AkeContent::IpkResponseEncrypted { .. } => {
                return Err(KeyMgrError::EncryptedIdentityKeyUnsupported);
            }
        }
        Ok(())
    }

    /// Run one tick of the §4.7 algorithm: generate whatever can be
    /// generated, request/respond as backoffs allow, and once all three
    /// shared secrets exist, finish the key schedule.
    pub fn step<R: umesh_core::mac::Rng>(
        &mut self,
        dt_ms: u32,
        rng: &mut R,
    ) -> Result<StepOutput, KeyMgrError> {
        let mut out = StepOutput::default();
        if self.result != AkeResult::None {
            return Ok(out);
        }

        if self.session_id.is_none() {
            let mut id = [0u8; SESSION_ID_SIZE];
            rng.fill(&mut id);
            self.session_id = Some(id);
        }
        let session_id = self.session_id.expect("just set");

        if self.my_esk.is_none() {
            let mut esk = [0u8; 32];
            rng.fill(&mut esk);
            self.my_esk = Some(esk);
        }

        if self.my_epk.is_none() {
            let esk = self.my_esk.expect("just set");
            self.my_epk = Some(x25519(&esk, &X25519_BASEPOINT)?);
        }
        let my_epk = self.my_epk.expect("just set");

        if self.peer_epk.is_none() && self.peer_epk_backoff.due(dt_ms) {
            out.send.push(AkeMessage {
                session_id,
                content: AkeContent::EpkRequest,
            });
        }

        if self.peer_ipk.is_none() && self.peer_ipk_backoff.due(dt_ms) {
            out.send.push(AkeMessage {
                session_id,
                content: AkeContent::IpkRequest,
            });
        }

        if self.my_epk_requested {
            self.my_epk_requested = false;
            out.send.push(AkeMessage {
                session_id,
                content: AkeContent::EpkResponse {
                    ephemeral_pk: my_epk,
                },
            });
        }

        if self.my_ipk_requested {
            self.my_ipk_requested = false;
            out.send.push(AkeMessage {
                session_id,
                content: AkeContent::IpkResponse {
                    identity_pk: self.my_ipk,
                },
            });
        }

        if let (Some(peer_epk), None) = (self.peer_epk, self.sh1) {
            if peer_epk == my_epk {
                self.result = AkeResult::Failed;
                return Ok(out);
            }
            self.role = if my_epk < peer_epk { Role::Alice } else { Role::Bob };
            let esk = self.my_esk.expect("set above");
            self.sh1 = Some(x25519(&esk, &peer_epk)?);
        }

        match self.role {
            Role::Alice => {
                if self.sh2.is_none() {
                    if let Some(peer_epk) = self.peer_epk {
                        self.sh2 = Some(x25519(&self.my_isk, &peer_epk)?);
                    }
                }
                if self.sh3.is_none() {
                    if let Some(peer_ipk) = self.peer_ipk {
                        let esk = self.my_esk.expect("set above");
                        self.sh3 = Some(x25519(&esk, &peer_ipk)?);
                    }
                }
            }
            Role::Bob => {
                if self.sh2.is_none() {
                    if let Some(peer_ipk) = self.peer_ipk {
                        let esk = self.my_esk.expect("set above");
                        self.sh2 = Some(x25519(&esk, &peer_ipk)?);
                    }
                }
                if self.sh3.is_none() {
                    if let Some(peer_epk) = self.peer_epk {
                        self.sh3 = Some(x25519(&self.my_isk, &peer_epk)?);
                    }
                }
            }
            Role::Unknown => {}
        }

        if self.master_key.is_none() {
            if let (Some(sh1), Some(sh2), Some(sh3)) = (self.sh1, self.sh2, self.sh3) {
                self.master_key = Some(derive_master_key(&sh1, &sh2, &sh3));
            }
        }

        if let Some(master_key) = self.master_key {
            if self.master_tx_key.is_none() {
                let k1 = derive_session_key(&master_key, b"first");
                let k2 = derive_session_key(&master_key, b"second");
                let (tx, rx) = match self.role {
                    Role::Alice | Role::Unknown => (k1, k2),
                    Role::Bob => (k2, k1),
                };
                self.master_tx_key = Some(tx);
                self.master_rx_key = Some(rx);
                self.result = AkeResult::Ok;
            }
        }

        Ok(out)
    }
}

/// Curve25519 base point, per RFC 7748.
const X25519_BASEPOINT: [u8; 32] = {
    let mut bp = [0u8; 32];
    bp[0] = 9;
    bp
};

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRng(Vec<[u8; 32]>, usize);
    impl umesh_core::mac::Rng for FixedRng {
        fn fill(&mut self, buf: &mut [u8]) {
            let src = self.0[self.1 % self.0.len()];
            self.1 += 1;
            buf.copy_from_slice(&src[..buf.len()]);
        }
    }

    fn isk_ipk(seed: u8) -> ([u8; 32], [u8; 32]) {
        let mut isk = [0u8; 32];
        isk[0] = seed;
        let ipk = x25519(&isk, &X25519_BASEPOINT).unwrap();
        (isk, ipk)
    }

    #[test]
    fn full_exchange_agrees_on_tx_rx_keys() {
        let (alice_isk, alice_ipk) = isk_ipk(1);
        let (bob_isk, bob_ipk) = isk_ipk(2);

        let mut alice = Ake3dhSession::new(alice_isk, alice_ipk, None);
        let mut bob = Ake3dhSession::new(bob_isk, bob_ipk, None);

        let mut alice_rng = FixedRng(vec![[0x11; 32], [0x33; 32]], 0);
        let mut bob_rng = FixedRng(vec![[0x11; 32], [0x44; 32]], 0);

        // Drive both sessions until keys are set, feeding each other's
        // outbound messages back in. A handful of ticks is enough since
        // every step is idempotent and requests/responses are immediate
        // once backed off.
        for _ in 0..40 {
            let out_a = alice.step(50, &mut alice_rng).unwrap();
            let out_b = bob.step(50, &mut bob_rng).unwrap();
            for msg in out_a.send {
                bob.receive(&msg.content).unwrap();
            }
            for msg in out_b.send {
                alice.receive(&msg.content).unwrap();
            }
            if alice.result != AkeResult::None && bob.result != AkeResult::None {
                break;
            }
        }

        assert_eq!(alice.result, AkeResult::Ok);
        assert_eq!(bob.result, AkeResult::Ok);
        assert_eq!(alice.master_tx_key(), bob.master_rx_key());
        assert_eq!(alice.master_rx_key(), bob.master_tx_key());
    }

    #[test]
    fn equal_ephemeral_keys_fail_the_session() {
        let (isk, ipk) = isk_ipk(1);
        let mut session = Ake3dhSession::new(isk, ipk, None);
        let mut rng = FixedRng(vec![[0x11; 32]], 0);
        session.step(50, &mut rng).unwrap();
        let my_epk = session.my_epk.unwrap();
        session.receive(&AkeContent::EpkResponse { ephemeral_pk: my_epk }).unwrap();
        session.step(50, &mut rng).unwrap();
        assert_eq!(session.result, AkeResult::Failed);
    }

    #[test]
    fn encrypted_identity_key_is_rejected() {
        let (isk, ipk) = isk_ipk(1);
        let mut session = Ake3dhSession::new(isk, ipk, None);
        let result = session.receive(&AkeContent::IpkResponseEncrypted {
            encrypted_identity_pk: vec![1, 2, 3],
        });
        assert!(matches!(
            result,
            Err(KeyMgrError::EncryptedIdentityKeyUnsupported)
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = RequestBackoff::default();
        assert!(!backoff.due(100));
        assert!(backoff.due(100));
        assert_eq!(backoff.interval_ms, REQUEST_INITIAL_INTERVAL_MS * 2);
        for _ in 0..10 {
            backoff.due(REQUEST_INTERVAL_MAX_MS);
        }
        assert_eq!(backoff.interval_ms, REQUEST_INTERVAL_MAX_MS);
    }
}
