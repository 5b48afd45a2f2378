//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use derive_new::new;
use hmac::digest::block_buffer::Eager;
use hmac::digest::core_api::{
    BlockSizeUser, BufferKindUser, CoreProxy, FixedOutputCore, UpdateCore,
};
use hmac::digest::typenum::{IsLess, Le, NonZero, U256};
use hmac::digest::{Digest, HashMarker, Mac};
use hmac::Hmac;
use md5::Md5;
use ospfd_utils::crypto::{CryptoAlgo, HMAC_APAD};
use ospfd_utils::keychain::{Key, Keychain};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

// OSPFv2 simple passwords are padded to the size of the 64-bit header
// authentication field.
pub const SIMPLE_PWD_LENGTH: usize = 8;

// Authentication configuration attached to an interface. It outlives any
// individual packet: replay-sequence state and key selection depend on it.
#[derive(Clone, Debug)]
pub enum AuthMethod {
    SimplePassword(Vec<u8>),
    ManualKey(Key),
    Keychain(Arc<Keychain>),
}

// Authentication context used when encoding a single packet.
#[derive(Clone, Copy, Debug)]
pub enum AuthEncodeCtx<'a> {
    Simple(&'a [u8]),
    Cryptographic {
        // Authentication key.
        key: &'a Key,
        // Non-decreasing sequence number, shared by all interfaces.
        seqno: &'a Arc<AtomicU64>,
    },
}

// Authentication context used when decoding a single packet.
#[derive(Clone, Debug, new)]
pub struct AuthDecodeCtx<'a> {
    // Authentication method.
    pub method: &'a AuthMethod,
}

// ===== impl AuthMethod =====

impl AuthMethod {
    // Returns the key used to send a packet, if any is currently valid.
    pub(crate) fn key_lookup_send(&self) -> Option<&Key> {
        match self {
            AuthMethod::SimplePassword(_) => None,
            AuthMethod::ManualKey(key) => Some(key),
            AuthMethod::Keychain(keychain) => keychain.key_lookup_send(),
        }
    }

    // Returns the space an authentication trailer can take on the wire.
    pub(crate) fn max_digest_size(&self) -> u16 {
        match self {
            AuthMethod::SimplePassword(_) => 0,
            AuthMethod::ManualKey(key) => key.algo.digest_size() as u16,
            AuthMethod::Keychain(keychain) => keychain.max_digest_size as u16,
        }
    }
}

// ===== helper functions =====

// Keyed-MD5 digest per RFC 2328 appendix D.4.3: MD5 over the packet followed
// by the secret padded to 16 bytes.
fn keyed_md5_digest(data: &[u8], key: &[u8]) -> Vec<u8> {
    let mut key = key.to_vec();
    key.resize(16, 0);

    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.update(&key);
    hasher.finalize().to_vec()
}

// HMAC-SHA digest per RFC 5709: HMAC over the packet followed by Apad.
fn hmac_sha_digest<H>(data: &[u8], key: &[u8]) -> Vec<u8>
where
    H: CoreProxy,
    H::Core: HashMarker
        + UpdateCore
        + FixedOutputCore
        + BufferKindUser<BufferKind = Eager>
        + Default
        + Clone,
    <H::Core as BlockSizeUser>::BlockSize: IsLess<U256>,
    Le<<H::Core as BlockSizeUser>::BlockSize, U256>: NonZero,
{
    let mut mac = Hmac::<H>::new_from_slice(key).unwrap();
    mac.update(data);
    let digest_size = <H::Core as hmac::digest::OutputSizeUser>::output_size();
    mac.update(&HMAC_APAD[..digest_size]);
    let digest = mac.finalize();
    digest.into_bytes().to_vec()
}

// ===== global functions =====

pub(crate) fn message_digest(
    data: &[u8],
    algo: CryptoAlgo,
    key: &[u8],
) -> Vec<u8> {
    match algo {
        CryptoAlgo::Md5 => keyed_md5_digest(data, key),
        CryptoAlgo::HmacSha1 => hmac_sha_digest::<Sha1>(data, key),
        CryptoAlgo::HmacSha256 => hmac_sha_digest::<Sha256>(data, key),
        CryptoAlgo::HmacSha384 => hmac_sha_digest::<Sha384>(data, key),
        CryptoAlgo::HmacSha512 => hmac_sha_digest::<Sha512>(data, key),
    }
}

// Pads or truncates a simple password to the size of the header
// authentication field.
pub(crate) fn simple_pwd_pad(password: &[u8]) -> [u8; SIMPLE_PWD_LENGTH] {
    let mut pwd = [0; SIMPLE_PWD_LENGTH];
    let len = std::cmp::min(password.len(), SIMPLE_PWD_LENGTH);
    pwd[..len].copy_from_slice(&password[..len]);
    pwd
}
