//! Wallets and the in-memory wallet store

use crate::keygen::LocalSaveData;
use crate::{aggregate, SortedPartyIds};
use k256::PublicKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A threshold wallet produced by one keygen session
#[derive(Debug, Clone)]
pub struct Wallet {
    /// Checksummed `0x` address
    pub address: String,
    /// Joint public key
    pub public_key: PublicKey,
    /// Threshold the key was generated with
    pub threshold: usize,
    /// Parties holding shares, in sorted order
    pub party_ids: SortedPartyIds,
    /// Save data by party identifier
    pub save_data: HashMap<String, LocalSaveData>,
}

impl Wallet {
    /// `0x` + hex of the 64 raw coordinate bytes
    pub fn public_key_hex(&self) -> String {
        format!("0x{}", hex::encode(aggregate::raw_public_key(&self.public_key)))
    }
}

/// Address → wallet map shared by every request path.
///
/// One lock guards the map and is held only for the map operation itself,
/// never while a session runs. Clones share the same map.
#[derive(Clone, Default)]
pub struct WalletStore {
    wallets: Arc<Mutex<HashMap<String, Arc<Wallet>>>>,
}

impl WalletStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // The map holds no invariant a panicking holder could break.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Wallet>>> {
        self.wallets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a wallet, replacing any wallet under the same address
    pub fn put(&self, address: impl Into<String>, wallet: Wallet) -> Arc<Wallet> {
        let wallet = Arc::new(wallet);
        self.lock().insert(address.into(), Arc::clone(&wallet));
        wallet
    }

    /// Look up a wallet by address
    pub fn get(&self, address: &str) -> Option<Arc<Wallet>> {
        self.lock().get(address).cloned()
    }

    /// Snapshot of all wallets, in no particular order
    pub fn list(&self) -> Vec<Arc<Wallet>> {
        self.lock().values().cloned().collect()
    }

    /// Number of stored wallets
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::{ProjectivePoint, Scalar};

    fn wallet(secret: u64) -> Wallet {
        let point = ProjectivePoint::GENERATOR * Scalar::from(secret);
        let public_key = PublicKey::from_affine(point.to_affine()).unwrap();
        Wallet {
            address: aggregate::public_key_to_address(&public_key),
            public_key,
            threshold: 1,
            party_ids: SortedPartyIds::generate(3, 0).unwrap(),
            save_data: HashMap::new(),
        }
    }

    #[test]
    fn test_put_get_list() {
        let store = WalletStore::new();
        assert!(store.is_empty());

        let first = wallet(1);
        let second = wallet(2);
        store.put(first.address.clone(), first.clone());
        store.put(second.address.clone(), second.clone());

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&first.address).unwrap().public_key, first.public_key);
        assert!(store.get("0x0000000000000000000000000000000000000000").is_none());

        let mut addresses: Vec<_> = store.list().iter().map(|w| w.address.clone()).collect();
        addresses.sort();
        let mut expected = vec![first.address, second.address];
        expected.sort();
        assert_eq!(addresses, expected);
    }

    #[test]
    fn test_put_overwrites() {
        let store = WalletStore::new();
        let first = wallet(7);
        let replacement = wallet(8);

        store.put("same", first);
        store.put("same", replacement.clone());

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("same").unwrap().public_key, replacement.public_key);
    }

    #[test]
    fn test_clones_share_map() {
        let store = WalletStore::new();
        let other = store.clone();
        let w = wallet(3);
        other.put(w.address.clone(), w.clone());

        assert!(store.get(&w.address).is_some());
    }

    #[test]
    fn test_public_key_hex_is_64_bytes() {
        let w = wallet(5);
        let hex_key = w.public_key_hex();
        assert!(hex_key.starts_with("0x"));
        assert_eq!(hex::decode(&hex_key[2..]).unwrap().len(), 64);
    }
}
