//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, LazyLock as Lazy};

use bytes::Bytes;
use ospfd::ospfv2::packet::lsa::*;
use ospfd::ospfv2::packet::*;
use ospfd::packet::auth::{AuthDecodeCtx, AuthEncodeCtx, AuthMethod};
use ospfd::packet::error::DecodeError;
use ospfd::packet::lsa::{Lsa, LsaKey};
use ospfd::packet::{DbDescFlags, Packet, PacketType};
use ospfd::version::Ospfv2;
use ospfd_utils::crypto::CryptoAlgo;
use ospfd_utils::ip::AddressFamily;
use ospfd_utils::keychain::Key;

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet<Ospfv2>) {
    let bytes_actual = packet.encode(None);
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet<Ospfv2>) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let packet_actual =
        Packet::decode(AddressFamily::Ipv4, &mut buf, None).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_encode_lsa(bytes_expected: &[u8], lsa: &Lsa<Ospfv2>) {
    assert_eq!(bytes_expected, lsa.raw.as_ref());
}

fn test_decode_lsa(bytes: &[u8], lsa_expected: &Lsa<Ospfv2>) {
    let mut bytes = Bytes::copy_from_slice(bytes);
    let lsa_actual = Lsa::decode(AddressFamily::Ipv4, &mut bytes).unwrap();
    assert_eq!(*lsa_expected, lsa_actual);
}

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Packet<Ospfv2>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0xf6, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x03, 0x02, 0x01, 0x00,
            0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::Hello(Hello {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
                auth_seqno: None,
            },
            network_mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
            hello_interval: 3,
            options: Options::E,
            priority: 1,
            dead_interval: 36,
            dr: None,
            bdr: None,
            neighbors: [Ipv4Addr::from_str("1.1.1.1").unwrap()].into(),
        }),
    )
});

static LSREQUEST1: Lazy<(Vec<u8>, Packet<Ospfv2>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x03, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0x46, 0xab, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x05, 0xac, 0x10, 0x01, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::LsRequest(LsRequest {
            hdr: PacketHdr {
                pkt_type: PacketType::LsRequest,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
                auth_seqno: None,
            },
            entries: vec![
                LsaKey {
                    lsa_type: LsaTypeCode::Router.into(),
                    adv_rtr: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    lsa_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                },
                LsaKey {
                    lsa_type: LsaTypeCode::AsExternal.into(),
                    adv_rtr: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    lsa_id: Ipv4Addr::from_str("172.16.1.0").unwrap(),
                },
            ],
        }),
    )
});

static LSUPDATE1: Lazy<(Vec<u8>, Packet<Ospfv2>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x04, 0x00, 0x78, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0x40, 0xa1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x31, 0x02, 0x01, 0x02,
            0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x02,
            0x37, 0xf4, 0x00, 0x24, 0x01, 0x00, 0x00, 0x01, 0x0a, 0x00, 0x01,
            0x00, 0xff, 0xff, 0xff, 0x00, 0x03, 0x00, 0x00, 0x0a, 0x00, 0x31,
            0x02, 0x03, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x80,
            0x00, 0x00, 0x01, 0xd2, 0x7a, 0x00, 0x1c, 0xff, 0xff, 0xff, 0xff,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x31, 0x02, 0x03, 0x0a, 0x00, 0x02,
            0x00, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0xfa, 0x44,
            0x00, 0x1c, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x0a,
        ],
        Packet::LsUpdate(LsUpdate {
            hdr: PacketHdr {
                pkt_type: PacketType::LsUpdate,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
                auth_seqno: None,
            },
            lsas: vec![
                Lsa::new(
                    49,
                    Some(Options::E),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    0x80000002,
                    LsaBody::Router(LsaRouter {
                        flags: LsaRouterFlags::B,
                        links: vec![LsaRouterLink {
                            link_type: LsaRouterLinkType::StubNetwork,
                            link_id: Ipv4Addr::from_str("10.0.1.0").unwrap(),
                            link_data: Ipv4Addr::from_str("255.255.255.0")
                                .unwrap(),
                            metric: 10,
                        }],
                    }),
                ),
                Lsa::new(
                    49,
                    Some(Options::E),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    0x80000001,
                    LsaBody::SummaryNetwork(LsaSummary {
                        mask: Ipv4Addr::from_str("255.255.255.255").unwrap(),
                        metric: 0,
                    }),
                ),
                Lsa::new(
                    49,
                    Some(Options::E),
                    Ipv4Addr::from_str("10.0.2.0").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    0x80000001,
                    LsaBody::SummaryNetwork(LsaSummary {
                        mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
                        metric: 10,
                    }),
                ),
            ],
        }),
    )
});

static LSACK1: Lazy<(Vec<u8>, Packet<Ospfv2>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x05, 0x00, 0x54, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0xa0, 0x2e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x03, 0x03, 0x03, 0x03, 0x02,
            0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0x09, 0x36, 0x00, 0x1c,
            0x00, 0x01, 0x02, 0x03, 0x0a, 0x00, 0x03, 0x00, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x01, 0x54, 0xdf, 0x00, 0x1c, 0x00, 0x01,
            0x02, 0x03, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x02, 0x02, 0x02, 0x80,
            0x00, 0x00, 0x01, 0x49, 0xe9, 0x00, 0x1c,
        ],
        Packet::LsAck(LsAck {
            hdr: PacketHdr {
                pkt_type: PacketType::LsAck,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
                auth_seqno: None,
            },
            lsa_hdrs: vec![
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: Ipv4Addr::from_str("3.3.3.3").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    seq_no: 0x80000001,
                    cksum: 0x0936,
                    length: 28,
                },
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: Ipv4Addr::from_str("10.0.3.0").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    seq_no: 0x80000001,
                    cksum: 0x54df,
                    length: 28,
                },
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: Ipv4Addr::from_str("10.0.4.0").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    seq_no: 0x80000001,
                    cksum: 0x49e9,
                    length: 28,
                },
            ],
        }),
    )
});

//
// Test LSAs.
//

static LSA1: Lazy<(Vec<u8>, Lsa<Ospfv2>)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x31, 0x02, 0x01, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x02, 0x37, 0xf4, 0x00, 0x24, 0x01, 0x00,
            0x00, 0x01, 0x0a, 0x00, 0x01, 0x00, 0xff, 0xff, 0xff, 0x00, 0x03,
            0x00, 0x00, 0x0a,
        ],
        Lsa::new(
            49,
            Some(Options::E),
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            0x80000002,
            LsaBody::Router(LsaRouter {
                flags: LsaRouterFlags::B,
                links: vec![LsaRouterLink {
                    link_type: LsaRouterLinkType::StubNetwork,
                    link_id: Ipv4Addr::from_str("10.0.1.0").unwrap(),
                    link_data: Ipv4Addr::from_str("255.255.255.0").unwrap(),
                    metric: 10,
                }],
            }),
        ),
    )
});

static LSA2: Lazy<Lsa<Ospfv2>> = Lazy::new(|| {
    Lsa::new(
        1,
        Some(Options::NP),
        Ipv4Addr::from_str("172.16.1.0").unwrap(),
        Ipv4Addr::from_str("1.1.1.1").unwrap(),
        0x80000001,
        LsaBody::NssaAsExternal(LsaAsExternal {
            mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
            flags: LsaAsExternalFlags::E,
            metric: 20,
            fwd_addr: Some(Ipv4Addr::from_str("10.0.1.1").unwrap()),
            tag: 42,
        }),
    )
});

//
// Tests.
//

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_encode_packet(bytes, hello);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_decode_packet(bytes, hello);
}

#[test]
fn test_encode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_encode_packet(bytes, request);
}

#[test]
fn test_decode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_decode_packet(bytes, request);
}

#[test]
fn test_encode_lsupdate1() {
    let (ref bytes, ref lsupdate) = *LSUPDATE1;
    test_encode_packet(bytes, lsupdate);
}

#[test]
fn test_decode_lsupdate1() {
    let (ref bytes, ref lsupdate) = *LSUPDATE1;
    test_decode_packet(bytes, lsupdate);
}

#[test]
fn test_encode_lsack1() {
    let (ref bytes, ref lsack) = *LSACK1;
    test_encode_packet(bytes, lsack);
}

#[test]
fn test_decode_lsack1() {
    let (ref bytes, ref lsack) = *LSACK1;
    test_decode_packet(bytes, lsack);
}

#[test]
fn test_encode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_decode_lsa(bytes, lsa);
}

// NSSA Type-7 LSAs use the AS-External body format; the encoded form must
// decode back to the same LSA with a verifiable checksum.
#[test]
fn test_lsa2_roundtrip() {
    let lsa = &*LSA2;
    assert!(lsa.validate().is_ok());
    test_decode_lsa(&lsa.raw.to_vec(), lsa);
}

// Truncating a valid packet by any amount must yield a decode error.
#[test]
fn test_decode_truncated() {
    let (ref bytes, _) = *HELLO1;
    for len in 0..bytes.len() {
        let mut buf = Bytes::copy_from_slice(&bytes[..len]);
        assert!(
            Packet::<Ospfv2>::decode(AddressFamily::Ipv4, &mut buf, None)
                .is_err()
        );
    }
}

// Bytes trailing the declared packet length must be ignored.
#[test]
fn test_decode_trailing_bytes() {
    let (ref bytes, ref hello) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    test_decode_packet(&bytes, hello);
}

// A corrupted checksum must be detected.
#[test]
fn test_decode_bad_cksum() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[30] ^= 0xff;
    let mut buf = Bytes::copy_from_slice(&bytes);
    assert!(matches!(
        Packet::<Ospfv2>::decode(AddressFamily::Ipv4, &mut buf, None),
        Err(DecodeError::InvalidChecksum)
    ));
}

// The Fletcher checksum of an encoded LSA must verify, and aging the LSA
// must not invalidate it.
#[test]
fn test_lsa_cksum_age_independent() {
    let (_, ref lsa) = *LSA1;
    let mut lsa = lsa.clone();
    let cksum = lsa.hdr.cksum;
    assert_ne!(cksum, 0);

    for age in [0u16, 1, 600, 3600] {
        let mut raw = lsa.raw.to_vec();
        raw[0..2].copy_from_slice(&age.to_be_bytes());
        lsa.raw = Bytes::from(raw);
        lsa.hdr.age = age;
        let mut buf = Bytes::copy_from_slice(&lsa.raw);
        let decoded = Lsa::<Ospfv2>::decode(AddressFamily::Ipv4, &mut buf)
            .unwrap();
        assert_eq!(decoded.hdr.cksum, cksum);
        assert!(decoded.validate().is_ok());
    }
}

// Keyed-MD5 authentication: encode with a key, decode with the same key,
// reject with a different key or Key ID.
#[test]
fn test_auth_md5_roundtrip() {
    let (_, ref hello) = *HELLO1;

    let key = Key::new(1, CryptoAlgo::Md5, b"s3cr3t".to_vec());
    let seqno = Arc::new(AtomicU64::new(843436052));
    let auth = AuthEncodeCtx::Cryptographic {
        key: &key,
        seqno: &seqno,
    };
    let bytes = hello.encode(Some(auth));

    // Decoding with the same key must succeed and recover the sequence
    // number.
    let method = AuthMethod::ManualKey(key.clone());
    let mut buf = Bytes::copy_from_slice(&bytes);
    let decoded = Packet::<Ospfv2>::decode(
        AddressFamily::Ipv4,
        &mut buf,
        Some(AuthDecodeCtx::new(&method)),
    )
    .unwrap();
    let Packet::Hello(decoded) = decoded else {
        panic!("unexpected packet type");
    };
    assert_eq!(decoded.hdr.auth_seqno, Some(843436052));

    // A different secret must be rejected.
    let bad_key = Key::new(1, CryptoAlgo::Md5, b"wrong".to_vec());
    let method = AuthMethod::ManualKey(bad_key);
    let mut buf = Bytes::copy_from_slice(&bytes);
    assert!(matches!(
        Packet::<Ospfv2>::decode(
            AddressFamily::Ipv4,
            &mut buf,
            Some(AuthDecodeCtx::new(&method)),
        ),
        Err(DecodeError::AuthError)
    ));

    // A different Key ID must be rejected.
    let bad_key = Key::new(2, CryptoAlgo::Md5, b"s3cr3t".to_vec());
    let method = AuthMethod::ManualKey(bad_key);
    let mut buf = Bytes::copy_from_slice(&bytes);
    assert!(matches!(
        Packet::<Ospfv2>::decode(
            AddressFamily::Ipv4,
            &mut buf,
            Some(AuthDecodeCtx::new(&method)),
        ),
        Err(DecodeError::AuthKeyIdNotFound(1))
    ));

    // Unauthenticated receivers must reject authenticated packets.
    let mut buf = Bytes::copy_from_slice(&bytes);
    assert!(matches!(
        Packet::<Ospfv2>::decode(AddressFamily::Ipv4, &mut buf, None),
        Err(DecodeError::AuthTypeMismatch)
    ));
}

// Simple-password authentication: the password rides in the header
// authentication field and the checksum is computed with it zeroed.
#[test]
fn test_auth_simple_roundtrip() {
    let (_, ref hello) = *HELLO1;

    let bytes = hello.encode(Some(AuthEncodeCtx::Simple(b"pass")));

    let method = AuthMethod::SimplePassword(b"pass".to_vec());
    let mut buf = Bytes::copy_from_slice(&bytes);
    let decoded = Packet::<Ospfv2>::decode(
        AddressFamily::Ipv4,
        &mut buf,
        Some(AuthDecodeCtx::new(&method)),
    )
    .unwrap();
    let Packet::Hello(decoded) = decoded else {
        panic!("unexpected packet type");
    };
    assert_eq!(decoded.neighbors, hello_neighbors(hello));

    // A wrong password must be rejected.
    let method = AuthMethod::SimplePassword(b"wrong".to_vec());
    let mut buf = Bytes::copy_from_slice(&bytes);
    assert!(matches!(
        Packet::<Ospfv2>::decode(
            AddressFamily::Ipv4,
            &mut buf,
            Some(AuthDecodeCtx::new(&method)),
        ),
        Err(DecodeError::AuthError)
    ));
}

// DbDesc packets survive an encode/decode round trip.
#[test]
fn test_dbdesc_roundtrip() {
    let (_, ref lsa) = *LSA1;
    let dbdesc = Packet::DbDesc(DbDesc {
        hdr: PacketHdr {
            pkt_type: PacketType::DbDesc,
            router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            area_id: Ipv4Addr::from_str("0.0.0.0").unwrap(),
            auth_seqno: None,
        },
        mtu: 1500,
        options: Options::E,
        dd_flags: DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
        dd_seq_no: 0x12345678,
        lsa_hdrs: vec![lsa.hdr],
    });

    let bytes = dbdesc.encode(None);
    let mut buf = Bytes::copy_from_slice(&bytes);
    let decoded =
        Packet::<Ospfv2>::decode(AddressFamily::Ipv4, &mut buf, None).unwrap();
    assert_eq!(dbdesc, decoded);
}

// ===== helper functions =====

fn hello_neighbors(
    packet: &Packet<Ospfv2>,
) -> std::collections::BTreeSet<Ipv4Addr> {
    match packet {
        Packet::Hello(hello) => hello.neighbors.clone(),
        _ => panic!("unexpected packet type"),
    }
}
