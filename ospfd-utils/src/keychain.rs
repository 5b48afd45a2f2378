//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoAlgo;

// Type aliases.
pub type Keychains = BTreeMap<String, Arc<Keychain>>;

// Authentication key-chain.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct Keychain {
    // Name of the key-chain.
    pub name: String,
    // Maximum digest size among all keys.
    #[new(default)]
    pub max_digest_size: u8,
    // Tolerated clock drift when checking key lifetimes, in seconds.
    #[new(default)]
    pub tolerance: u32,
    // List of configured keys.
    #[new(default)]
    pub keys: BTreeMap<u64, KeychainKey>,
}

// Single key in a key-chain.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct KeychainKey {
    // Key's data.
    pub data: Key,
    // The key's send lifetime.
    #[new(default)]
    pub send_lifetime: KeyLifetime,
    // The key's accept lifetime.
    #[new(default)]
    pub accept_lifetime: KeyLifetime,
}

// Authentication key.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct Key {
    // Numeric value uniquely identifying the key.
    pub id: u64,
    // Cryptographic algorithm associated with the key.
    pub algo: CryptoAlgo,
    // The key string.
    pub string: Vec<u8>,
}

// Key lifetime.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct KeyLifetime {
    // Optional start time.
    pub start: Option<DateTime<Utc>>,
    // Optional end time (`None` means infinite).
    pub end: Option<DateTime<Utc>>,
}

// ===== impl Keychain =====

impl Keychain {
    // Adds a key, updating the maximum digest size.
    pub fn key_add(&mut self, key: KeychainKey) {
        let digest_size = key.data.algo.digest_size();
        if digest_size > self.max_digest_size {
            self.max_digest_size = digest_size;
        }
        self.keys.insert(key.data.id, key);
    }

    // Looks up the key used to send a packet. Among the keys whose send
    // lifetime covers the present, the one with the most recent start time
    // wins (falling back to the highest key ID).
    pub fn key_lookup_send(&self) -> Option<&Key> {
        self.keys
            .values()
            .filter(|key| key.send_lifetime.is_active(0))
            .max_by_key(|key| (key.send_lifetime.start, key.data.id))
            .map(|key| &key.data)
    }

    // Looks up the key used to accept a packet. The key of the provided key
    // ID is selected as long as its accept lifetime, widened by the
    // configured clock-drift tolerance, covers the present.
    pub fn key_lookup_accept(&self, key_id: u64) -> Option<&Key> {
        self.keys
            .values()
            .find(|key| key.data.id == key_id)
            .filter(|key| key.accept_lifetime.is_active(self.tolerance))
            .map(|key| &key.data)
    }
}

// ===== impl KeyLifetime =====

impl KeyLifetime {
    // Checks if the key lifetime covers the present, allowing for the given
    // clock drift in seconds on both boundaries.
    pub fn is_active(&self, tolerance: u32) -> bool {
        let now = Utc::now();
        let tolerance = Duration::seconds(tolerance.into());

        if let Some(start) = self.start
            && now < start - tolerance
        {
            return false;
        }
        if let Some(end) = self.end
            && now > end + tolerance
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u64) -> Key {
        Key::new(id, CryptoAlgo::Md5, b"secret".to_vec())
    }

    #[test]
    fn send_key_selection() {
        let mut keychain = Keychain::new("test".to_owned());

        // Key 1: always valid.
        keychain.key_add(KeychainKey::new(key(1)));

        // Key 2: valid since one hour ago.
        let mut key2 = KeychainKey::new(key(2));
        key2.send_lifetime.start = Some(Utc::now() - Duration::hours(1));
        keychain.key_add(key2);

        // Key 3: not yet valid.
        let mut key3 = KeychainKey::new(key(3));
        key3.send_lifetime.start = Some(Utc::now() + Duration::hours(1));
        keychain.key_add(key3);

        // The newest currently-valid key must be selected.
        assert_eq!(keychain.key_lookup_send().unwrap().id, 2);
    }

    #[test]
    fn accept_key_drift_tolerance() {
        let mut keychain = Keychain::new("test".to_owned());
        keychain.tolerance = 600;

        // Key expired five minutes ago, but within the drift tolerance.
        let mut key1 = KeychainKey::new(key(1));
        key1.accept_lifetime.end = Some(Utc::now() - Duration::minutes(5));
        keychain.key_add(key1);

        assert!(keychain.key_lookup_accept(1).is_some());

        // An expiry outside the tolerance must be honored.
        let mut key2 = KeychainKey::new(key(2));
        key2.accept_lifetime.end = Some(Utc::now() - Duration::minutes(15));
        keychain.key_add(key2);

        assert!(keychain.key_lookup_accept(2).is_none());
    }
}
