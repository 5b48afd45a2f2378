//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use serde::{Deserialize, Serialize};

// Cryptographic algorithms usable for packet authentication.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum CryptoAlgo {
    Md5,
    HmacSha1,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

// A precomputed Apad value as used by RFC 5709-style HMAC authentication.
//
// Apad is the hexadecimal value 0x878FE1F3 repeated (L/4) times, where L is
// the length of the hash, measured in bytes. The value defined here is sized
// for the largest supported hash (SHA512, 64 bytes).
pub static HMAC_APAD: Lazy<Vec<u8>> = Lazy::new(|| {
    [0x87, 0x8F, 0xE1, 0xF3]
        .into_iter()
        .cycle()
        .take(64)
        .collect()
});

// ===== impl CryptoAlgo =====

impl CryptoAlgo {
    pub fn digest_size(&self) -> u8 {
        match self {
            CryptoAlgo::Md5 => 16,
            CryptoAlgo::HmacSha1 => 20,
            CryptoAlgo::HmacSha256 => 32,
            CryptoAlgo::HmacSha384 => 48,
            CryptoAlgo::HmacSha512 => 64,
        }
    }
}

impl std::fmt::Display for CryptoAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoAlgo::Md5 => write!(f, "md5"),
            CryptoAlgo::HmacSha1 => write!(f, "hmac-sha-1"),
            CryptoAlgo::HmacSha256 => write!(f, "hmac-sha-256"),
            CryptoAlgo::HmacSha384 => write!(f, "hmac-sha-384"),
            CryptoAlgo::HmacSha512 => write!(f, "hmac-sha-512"),
        }
    }
}
