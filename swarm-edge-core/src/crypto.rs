//! Report signing and verification
//!
//! Ed25519 signatures over a canonical hash of a [`NodeReport`]. The consensus
//! round itself never checks signatures; the trust layer in front of the
//! aggregator does, using [`ReportAuth::verify`].

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::consensus::NodeReport;
use crate::traits::NodeId;

/// Domain separation tag for report signatures
const REPORT_TAG: &[u8] = b"swarmedge.report.v0";

/// Key pair for signing reports
#[derive(Clone)]
pub struct KeyPair {
    /// Secret signing key
    secret: SigningKey,
    /// Public key bytes (32 bytes)
    pub public: [u8; 32],
}

impl KeyPair {
    /// Build a key pair from seed bytes
    ///
    /// The caller must ensure the seed is cryptographically random
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let secret = SigningKey::from_bytes(&seed);
        let public = secret.verifying_key().to_bytes();
        Self { secret, public }
    }

    /// Node ID derived from this key pair
    pub fn node_id(&self) -> NodeId {
        NodeId::from_public_key(&self.public)
    }

    /// Get the public key bytes
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }
}

/// Signature bytes (64 bytes for Ed25519)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// Create from bytes
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self, VerifyError> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| VerifyError::InvalidSignatureEncoding)?;
        Ok(Self(arr))
    }

    /// Get the signature bytes
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Convert to internal Dalek signature
    pub fn to_dalek(&self) -> Result<DalekSignature, VerifyError> {
        DalekSignature::from_slice(&self.0).map_err(|_| VerifyError::InvalidSignatureEncoding)
    }
}

/// Errors that can occur during verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// report carries no signature
    MissingSignature,
    /// malformed signature bytes
    InvalidSignatureEncoding,
    /// malformed public key
    InvalidPublicKey,
    /// public key does not hash to the reporting node id
    NodeMismatch,
    /// signature verification failed
    VerificationFailed,
}

impl core::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VerifyError::MissingSignature => write!(f, "missing signature"),
            VerifyError::InvalidSignatureEncoding => write!(f, "invalid signature encoding"),
            VerifyError::InvalidPublicKey => write!(f, "invalid public key"),
            VerifyError::NodeMismatch => write!(f, "public key does not match node id"),
            VerifyError::VerificationFailed => write!(f, "signature verification failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VerifyError {}

/// Canonical hash binding the round, node and value bits.
fn report_digest(report: &NodeReport) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(REPORT_TAG);
    hasher.update(report.round_id.0.to_le_bytes());
    hasher.update(report.node.as_bytes());
    hasher.update(report.value.to_bits().to_le_bytes());
    hasher.finalize().into()
}

/// Report authentication helper
pub struct ReportAuth {
    key_pair: KeyPair,
}

impl ReportAuth {
    /// Create a new report authenticator
    pub fn new(key_pair: KeyPair) -> Self {
        Self { key_pair }
    }

    /// Sign a report's canonical digest
    pub fn sign(&self, report: &NodeReport) -> Signature {
        let sig = self.key_pair.secret.sign(&report_digest(report));
        Signature(sig.to_bytes())
    }

    /// Sign and attach the signature to the report
    pub fn sign_report(&self, report: NodeReport) -> NodeReport {
        let sig = self.sign(&report);
        report.with_signature(sig.as_bytes().to_vec())
    }

    /// Verify a report's attached signature against `public_key`.
    ///
    /// The key must hash to `report.node`, so a node cannot sign for another.
    pub fn verify(public_key: &[u8; 32], report: &NodeReport) -> Result<(), VerifyError> {
        if NodeId::from_public_key(public_key) != report.node {
            return Err(VerifyError::NodeMismatch);
        }
        let raw = report
            .signature
            .as_deref()
            .ok_or(VerifyError::MissingSignature)?;
        let sig = Signature::from_slice(raw)?.to_dalek()?;
        let key =
            VerifyingKey::from_bytes(public_key).map_err(|_| VerifyError::InvalidPublicKey)?;

        key.verify_strict(&report_digest(report), &sig)
            .map_err(|_| VerifyError::VerificationFailed)
    }

    /// Get the key pair
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::RoundId;

    fn signed(seed: u8, value: f64) -> (KeyPair, NodeReport) {
        let pair = KeyPair::from_seed([seed; 32]);
        let auth = ReportAuth::new(pair.clone());
        let report = auth.sign_report(NodeReport::new(RoundId(3), pair.node_id(), value));
        (pair, report)
    }

    #[test]
    fn signed_report_verifies() {
        let (pair, report) = signed(1, 42.0);
        assert!(ReportAuth::verify(&pair.public, &report).is_ok());
    }

    #[test]
    fn tampered_value_fails() {
        let (pair, mut report) = signed(2, 42.0);
        report.value = 4200.0;
        assert_eq!(
            ReportAuth::verify(&pair.public, &report),
            Err(VerifyError::VerificationFailed)
        );
    }

    #[test]
    fn tampered_round_fails() {
        let (pair, mut report) = signed(3, 42.0);
        report.round_id = RoundId(4);
        assert_eq!(
            ReportAuth::verify(&pair.public, &report),
            Err(VerifyError::VerificationFailed)
        );
    }

    #[test]
    fn key_for_other_node_is_rejected() {
        let (_, report) = signed(4, 42.0);
        let other = KeyPair::from_seed([5u8; 32]);
        assert_eq!(
            ReportAuth::verify(&other.public, &report),
            Err(VerifyError::NodeMismatch)
        );
    }

    #[test]
    fn missing_and_malformed_signatures() {
        let pair = KeyPair::from_seed([6u8; 32]);
        let bare = NodeReport::new(RoundId(1), pair.node_id(), 1.0);
        assert_eq!(
            ReportAuth::verify(&pair.public, &bare),
            Err(VerifyError::MissingSignature)
        );

        let short = bare.with_signature(alloc::vec![0u8; 32]);
        assert_eq!(
            ReportAuth::verify(&pair.public, &short),
            Err(VerifyError::InvalidSignatureEncoding)
        );
    }

    #[test]
    fn signature_is_deterministic_for_fixed_seed() {
        let (_, a) = signed(7, 1.5);
        let (_, b) = signed(7, 1.5);
        assert_eq!(a.signature, b.signature);
    }
}
