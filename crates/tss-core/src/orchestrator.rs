//! Session orchestrator: runs keygen and signing sessions over simulated
//! parties and keeps the resulting wallets

use crate::aggregate;
use crate::keygen::{self, KeygenOutput};
use crate::mpc::{run_session, ProtocolEngine};
use crate::sign;
use crate::wallet::{Wallet, WalletStore};
use crate::{validate_threshold, Error, Result, SessionKind, SortedPartyIds};
use crate::{DEFAULT_PARTIES, DEFAULT_THRESHOLD};
use std::time::Duration;
use tracing::{info, instrument};

/// Orchestrator-wide settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parties used when a keygen request does not name them
    pub parties: usize,
    /// Threshold used when a keygen request does not name it
    pub threshold: usize,
    /// Deadline for a single session; `None` waits indefinitely
    pub session_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parties: DEFAULT_PARTIES,
            threshold: DEFAULT_THRESHOLD,
            session_timeout: None,
        }
    }
}

/// Parameters of one keygen session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeygenConfig {
    pub parties: usize,
    pub threshold: usize,
}

impl KeygenConfig {
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.parties, self.threshold)
    }
}

/// Result of a successful keygen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenResult {
    pub address: String,
    /// `0x` + 64 raw coordinate bytes
    pub public_key_hex: String,
}

/// Public view of a stored wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSummary {
    pub address: String,
    pub public_key_hex: String,
}

impl From<&Wallet> for WalletSummary {
    fn from(wallet: &Wallet) -> Self {
        Self {
            address: wallet.address.clone(),
            public_key_hex: wallet.public_key_hex(),
        }
    }
}

/// Entry point for keygen and signing.
///
/// Owns the wallet store; clones share it. The store lock is never held
/// while a session runs, so sessions proceed concurrently.
#[derive(Clone, Default)]
pub struct Orchestrator {
    store: WalletStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_store(config, WalletStore::new())
    }

    /// Build an orchestrator over an existing store
    pub fn with_store(config: OrchestratorConfig, store: WalletStore) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &WalletStore {
        &self.store
    }

    /// Keygen parameters from the orchestrator defaults
    pub fn default_keygen(&self) -> KeygenConfig {
        KeygenConfig {
            parties: self.config.parties,
            threshold: self.config.threshold,
        }
    }

    /// Run a keygen session and store the wallet it produces.
    ///
    /// Nothing is stored if the session fails.
    #[instrument(skip_all, fields(parties = config.parties, threshold = config.threshold))]
    pub async fn run_keygen(&self, config: KeygenConfig) -> Result<KeygenResult> {
        config.validate()?;

        let party_ids = SortedPartyIds::generate(config.parties, self.store.len())?;
        let engines = keygen::new_parties(&party_ids, config.threshold)?;
        self.keygen_session(party_ids, config.threshold, engines).await
    }

    async fn keygen_session<E>(&self, party_ids: SortedPartyIds, threshold: usize, engines: Vec<E>) -> Result<KeygenResult>
    where
        E: ProtocolEngine<Output = KeygenOutput>,
    {
        let outputs = run_session(SessionKind::Keygen, engines, self.config.session_timeout).await?;

        let wallet = aggregate::aggregate_keygen(&party_ids, threshold, outputs)?;
        let result = KeygenResult {
            address: wallet.address.clone(),
            public_key_hex: wallet.public_key_hex(),
        };
        self.store.put(wallet.address.clone(), wallet);

        info!(address = %result.address, "Wallet created");
        Ok(result)
    }

    /// Sign `message` with every party of `wallet`; returns hex of `r || s`
    #[instrument(skip(self, wallet, message), fields(address = %wallet.address, len = message.len()))]
    pub async fn run_signing(&self, wallet: &Wallet, message: &[u8]) -> Result<String> {
        let engines = sign::new_parties(wallet, message)?;
        let outputs = run_session(SessionKind::Signing, engines, self.config.session_timeout).await?;

        let signature = aggregate::aggregate_signatures(wallet.party_ids.len(), &outputs)?;
        info!("Message signed");
        Ok(hex::encode(signature.to_bytes()))
    }

    /// Validate a sign request, look the wallet up and sign.
    ///
    /// `data_hex` may carry a `0x` prefix; `"0x"` alone is the empty message.
    pub async fn sign(&self, address: &str, data_hex: &str) -> Result<String> {
        if address.is_empty() {
            return Err(Error::InvalidInput("wallet address is required".into()));
        }
        if data_hex.is_empty() {
            return Err(Error::InvalidInput("data is required".into()));
        }
        let digits = data_hex.strip_prefix("0x").unwrap_or(data_hex);
        let message = hex::decode(digits)
            .map_err(|e| Error::InvalidInput(format!("data is not valid hex: {}", e)))?;

        let wallet = self
            .store
            .get(address)
            .ok_or_else(|| Error::WalletNotFound(address.to_string()))?;
        self.run_signing(&wallet, &message).await
    }

    /// Summaries of every stored wallet, in no particular order
    pub fn wallets(&self) -> Vec<WalletSummary> {
        self.store
            .list()
            .iter()
            .map(|wallet| WalletSummary::from(wallet.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{signature::hazmat::PrehashVerifier, VerifyingKey};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn three_of_one() -> KeygenConfig {
        KeygenConfig {
            parties: 3,
            threshold: 1,
        }
    }

    #[tokio::test]
    async fn test_keygen_stores_one_wallet() {
        init_tracing();
        let orchestrator = Orchestrator::default();

        let result = orchestrator.run_keygen(three_of_one()).await.unwrap();

        assert_eq!(orchestrator.store().len(), 1);
        assert!(result.address.starts_with("0x"));
        assert_eq!(hex::decode(result.address[2..].to_lowercase()).unwrap().len(), 20);
        assert!(result.public_key_hex.starts_with("0x"));
        assert_eq!(hex::decode(&result.public_key_hex[2..]).unwrap().len(), 64);

        let wallet = orchestrator.store().get(&result.address).unwrap();
        assert_eq!(wallet.party_ids.len(), 3);
        assert_eq!(wallet.save_data.len(), 3);
    }

    #[tokio::test]
    async fn test_stored_key_matches_address() {
        let orchestrator = Orchestrator::default();
        orchestrator.run_keygen(three_of_one()).await.unwrap();
        orchestrator
            .run_keygen(KeygenConfig {
                parties: 5,
                threshold: 2,
            })
            .await
            .unwrap();

        let wallets = orchestrator.store().list();
        assert_eq!(wallets.len(), 2);
        for wallet in wallets {
            assert_eq!(aggregate::public_key_to_address(&wallet.public_key), wallet.address);
        }
    }

    #[tokio::test]
    async fn test_invalid_keygen_config_rejected() {
        let orchestrator = Orchestrator::default();
        for (parties, threshold) in [(0, 0), (1, 0), (1, 1), (3, 0), (3, 3), (4, 5)] {
            let err = orchestrator
                .run_keygen(KeygenConfig { parties, threshold })
                .await
                .unwrap_err();
            assert!(err.is_invalid_input(), "({parties}, {threshold}): {err}");
        }
        assert!(orchestrator.store().is_empty());
    }

    #[tokio::test]
    async fn test_sign_hex_message() {
        init_tracing();
        let orchestrator = Orchestrator::default();
        let wallet = orchestrator.run_keygen(three_of_one()).await.unwrap();

        let signature = orchestrator.sign(&wallet.address, "0x74657374").await.unwrap();

        assert!(!signature.is_empty());
        assert_eq!(hex::decode(&signature).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_signature_verifies_under_wallet_key() {
        let orchestrator = Orchestrator::default();
        let result = orchestrator.run_keygen(three_of_one()).await.unwrap();
        let wallet = orchestrator.store().get(&result.address).unwrap();

        let prehash = [0x42u8; 32];
        let signature = orchestrator.run_signing(&wallet, &prehash).await.unwrap();

        let bytes = hex::decode(signature).unwrap();
        let ecdsa = k256::ecdsa::Signature::from_slice(&bytes).unwrap();
        VerifyingKey::from(&wallet.public_key)
            .verify_prehash(&prehash, &ecdsa)
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_message_signs() {
        let orchestrator = Orchestrator::default();
        let wallet = orchestrator.run_keygen(three_of_one()).await.unwrap();

        let signature = orchestrator.sign(&wallet.address, "0x").await.unwrap();
        assert_eq!(signature.len(), 128);
    }

    #[tokio::test]
    async fn test_sign_unknown_wallet() {
        let orchestrator = Orchestrator::default();
        let err = orchestrator
            .sign("0x0000000000000000000000000000000000000000", "0x74657374")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WalletNotFound(_)));
    }

    #[tokio::test]
    async fn test_sign_rejects_bad_input_before_lookup() {
        let orchestrator = Orchestrator::default();
        // unknown address, so any non-InvalidInput error means the lookup ran first
        let address = "0x0000000000000000000000000000000000000000";

        for data in ["", "0xzz", "0x123", "not hex"] {
            let err = orchestrator.sign(address, data).await.unwrap_err();
            assert!(err.is_invalid_input(), "{data:?}: {err}");
        }
        let err = orchestrator.sign("", "0x74657374").await.unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_repeated_signing_leaves_store_unchanged() {
        let orchestrator = Orchestrator::default();
        let result = orchestrator.run_keygen(three_of_one()).await.unwrap();
        let before = orchestrator.wallets();

        let first = orchestrator.sign(&result.address, "0x74657374").await.unwrap();
        let second = orchestrator.sign(&result.address, "0x74657374").await.unwrap();

        assert_eq!(orchestrator.wallets(), before);

        let wallet = orchestrator.store().get(&result.address).unwrap();
        for signature in [first, second] {
            let bytes = hex::decode(signature).unwrap();
            let signature = crate::Signature::new(
                bytes[..32].try_into().unwrap(),
                bytes[32..].try_into().unwrap(),
                0,
            );
            sign::verify_signature(&wallet.public_key, crate::vss::message_scalar(b"test"), &signature).unwrap();
        }
    }

    #[tokio::test]
    async fn test_two_party_wallet_signs() {
        let orchestrator = Orchestrator::default();
        let result = orchestrator
            .run_keygen(KeygenConfig {
                parties: 2,
                threshold: 1,
            })
            .await
            .unwrap();
        let wallet = orchestrator.store().get(&result.address).unwrap();

        let prehash = [0x17u8; 32];
        let signature = orchestrator.run_signing(&wallet, &prehash).await.unwrap();

        let ecdsa = k256::ecdsa::Signature::from_slice(&hex::decode(signature).unwrap()).unwrap();
        VerifyingKey::from(&wallet.public_key)
            .verify_prehash(&prehash, &ecdsa)
            .unwrap();
    }

    /// Keygen engine whose share verification always fails for one party
    struct RejectingParty {
        inner: keygen::KeygenParty,
        reject: bool,
    }

    impl ProtocolEngine for RejectingParty {
        type Message = keygen::KeygenMessage;
        type Output = KeygenOutput;

        fn party_id(&self) -> &crate::PartyId {
            self.inner.party_id()
        }

        fn start(&mut self) -> Result<crate::mpc::Step<Self::Message, Self::Output>> {
            self.inner.start()
        }

        fn deliver(
            &mut self,
            message: Self::Message,
            from: &crate::PartyId,
            is_broadcast: bool,
        ) -> Result<crate::mpc::Step<Self::Message, Self::Output>> {
            if self.reject {
                return Err(Error::VerificationFailed("share does not match commitments".into()));
            }
            self.inner.deliver(message, from, is_broadcast)
        }
    }

    #[tokio::test]
    async fn test_failed_keygen_stores_nothing() {
        let orchestrator = Orchestrator::default();
        let party_ids = SortedPartyIds::generate(3, 0).unwrap();
        let engines: Vec<RejectingParty> = keygen::new_parties(&party_ids, 1)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, inner)| RejectingParty { inner, reject: i == 1 })
            .collect();

        let err = orchestrator.keygen_session(party_ids, 1, engines).await.unwrap_err();

        assert!(matches!(err, Error::ProtocolUpdate { .. }), "{err}");
        assert!(orchestrator.store().is_empty());
        assert!(orchestrator.wallets().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_share_store() {
        let orchestrator = Orchestrator::default();
        let (a, b) = tokio::join!(
            orchestrator.run_keygen(three_of_one()),
            orchestrator.run_keygen(three_of_one())
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.address, b.address);

        let (sa, sb) = tokio::join!(
            orchestrator.sign(&a.address, "0x01"),
            orchestrator.sign(&b.address, "0x02")
        );
        sa.unwrap();
        sb.unwrap();

        let mut listed: Vec<_> = orchestrator.wallets().into_iter().map(|w| w.address).collect();
        listed.sort();
        let mut expected = vec![a.address, b.address];
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_default_config() {
        let orchestrator = Orchestrator::default();
        assert_eq!(
            orchestrator.default_keygen(),
            KeygenConfig {
                parties: DEFAULT_PARTIES,
                threshold: DEFAULT_THRESHOLD
            }
        );
        assert!(orchestrator.config().session_timeout.is_none());
    }
}
