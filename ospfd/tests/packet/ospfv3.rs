//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use bytes::Bytes;
use ipnetwork::IpNetwork;
use ospfd::ospfv3::packet::lsa::*;
use ospfd::ospfv3::packet::*;
use ospfd::packet::lsa::{Lsa, LsaKey};
use ospfd::packet::{DbDescFlags, Packet, PacketType};
use ospfd::version::Ospfv3;
use ospfd_utils::ip::AddressFamily;

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet<Ospfv3>) {
    let bytes_actual = packet.encode(None);
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet<Ospfv3>) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let packet_actual =
        Packet::decode(AddressFamily::Ipv6, &mut buf, None).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_encode_lsa(bytes_expected: &[u8], lsa: &Lsa<Ospfv3>) {
    assert_eq!(bytes_expected, lsa.raw.as_ref());
}

fn test_decode_lsa(bytes: &[u8], lsa_expected: &Lsa<Ospfv3>) {
    let mut bytes = Bytes::copy_from_slice(bytes);
    let lsa_actual = Lsa::decode(AddressFamily::Ipv6, &mut bytes).unwrap();
    assert_eq!(*lsa_expected, lsa_actual);
}

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Packet<Ospfv3>)> = Lazy::new(|| {
    (
        vec![
            0x03, 0x01, 0x00, 0x28, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x01, 0x00,
            0x00, 0x13, 0x00, 0x03, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x02, 0x02, 0x02, 0x02,
        ],
        Packet::Hello(Hello {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
                instance_id: 0,
            },
            iface_id: 4,
            priority: 1,
            options: Options::R | Options::E | Options::V6,
            hello_interval: 3,
            dead_interval: 36,
            dr: None,
            bdr: None,
            neighbors: [Ipv4Addr::from_str("2.2.2.2").unwrap()].into(),
        }),
    )
});

//
// Test LSAs.
//

static LSA1: Lazy<(Vec<u8>, Lsa<Ospfv3>)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x04, 0x00, 0x08, 0x00, 0x00, 0x00, 0x03, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x01, 0x16, 0x3a, 0x00, 0x2c, 0x01, 0x00,
            0x00, 0x13, 0xfe, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xcc,
            0x81, 0x6e, 0xff, 0xfe, 0xa8, 0x26, 0xd0, 0x00, 0x00, 0x00, 0x00,
        ],
        Lsa::new(
            4,
            None,
            Ipv4Addr::from_str("0.0.0.3").unwrap(),
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            0x80000001,
            LsaBody::Link(LsaLink {
                priority: 1,
                options: Options::R | Options::E | Options::V6,
                linklocal: Ipv6Addr::from_str("fe80::cc81:6eff:fea8:26d0")
                    .unwrap(),
                prefixes: vec![],
            }),
        ),
    )
});

static LSA2: Lazy<Lsa<Ospfv3>> = Lazy::new(|| {
    Lsa::new(
        1,
        None,
        Ipv4Addr::from_str("0.0.0.0").unwrap(),
        Ipv4Addr::from_str("1.1.1.1").unwrap(),
        0x80000001,
        LsaBody::Router(LsaRouter::new(
            LsaRouterFlags::B,
            Options::R | Options::E | Options::V6,
            vec![LsaRouterLink::new(
                LsaRouterLinkType::PointToPoint,
                10,
                4,
                6,
                Ipv4Addr::from_str("2.2.2.2").unwrap(),
            )],
        )),
    )
});

static LSA3: Lazy<Lsa<Ospfv3>> = Lazy::new(|| {
    Lsa::new(
        1,
        None,
        Ipv4Addr::from_str("0.0.0.0").unwrap(),
        Ipv4Addr::from_str("1.1.1.1").unwrap(),
        0x80000001,
        LsaBody::IntraAreaPrefix(LsaIntraAreaPrefix::new(
            LsaFunctionCode::Router.into(),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::from_str("1.1.1.1").unwrap(),
            vec![
                LsaIntraAreaPrefixEntry::new(
                    PrefixOptions::empty(),
                    IpNetwork::from_str("2001:db8:1::/64").unwrap(),
                    10,
                ),
                LsaIntraAreaPrefixEntry::new(
                    PrefixOptions::LA,
                    IpNetwork::from_str("2001:db8::1/128").unwrap(),
                    0,
                ),
            ],
        )),
    )
});

static LSA4: Lazy<Lsa<Ospfv3>> = Lazy::new(|| {
    Lsa::new(
        1,
        None,
        Ipv4Addr::from_str("0.0.0.1").unwrap(),
        Ipv4Addr::from_str("1.1.1.1").unwrap(),
        0x80000001,
        LsaBody::AsExternal(LsaAsExternal::new(
            LsaAsExternalFlags::E
                | LsaAsExternalFlags::F
                | LsaAsExternalFlags::T,
            20,
            PrefixOptions::empty(),
            IpNetwork::from_str("2001:db8:ffff::/48").unwrap(),
            Some(IpAddr::from_str("2001:db8:1::1").unwrap()),
            Some(42),
            None,
            None,
        )),
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
fn test_encode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_decode_lsa(bytes, lsa);
}

// Router-LSAs survive an encode/decode round trip.
#[test]
fn test_lsa2_roundtrip() {
    let lsa = &*LSA2;
    assert!(lsa.validate().is_ok());
    test_decode_lsa(&lsa.raw.to_vec(), lsa);
}

// Intra-Area-Prefix-LSAs exercise the padded prefix encoding.
#[test]
fn test_lsa3_roundtrip() {
    let lsa = &*LSA3;
    assert!(lsa.validate().is_ok());
    test_decode_lsa(&lsa.raw.to_vec(), lsa);
}

// AS-External-LSAs with optional forwarding address and route tag.
#[test]
fn test_lsa4_roundtrip() {
    let lsa = &*LSA4;
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
            Packet::<Ospfv3>::decode(AddressFamily::Ipv6, &mut buf, None)
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

// DbDesc and LsRequest packets survive an encode/decode round trip.
#[test]
fn test_dbdesc_lsrequest_roundtrip() {
    let (_, ref lsa) = *LSA1;
    let hdr = PacketHdr {
        pkt_type: PacketType::DbDesc,
        router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
        area_id: Ipv4Addr::from_str("0.0.0.0").unwrap(),
        instance_id: 0,
    };
    let dbdesc = Packet::DbDesc(DbDesc {
        hdr,
        options: Options::R | Options::E | Options::V6,
        mtu: 1500,
        dd_flags: DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
        dd_seq_no: 0x12345678,
        lsa_hdrs: vec![lsa.hdr],
    });

    let bytes = dbdesc.encode(None);
    let mut buf = Bytes::copy_from_slice(&bytes);
    let decoded =
        Packet::<Ospfv3>::decode(AddressFamily::Ipv6, &mut buf, None).unwrap();
    assert_eq!(dbdesc, decoded);

    let hdr = PacketHdr {
        pkt_type: PacketType::LsRequest,
        router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
        area_id: Ipv4Addr::from_str("0.0.0.0").unwrap(),
        instance_id: 0,
    };
    let request = Packet::LsRequest(LsRequest {
        hdr,
        entries: vec![LsaKey {
            lsa_type: LsaFunctionCode::Router.into(),
            adv_rtr: Ipv4Addr::from_str("2.2.2.2").unwrap(),
            lsa_id: Ipv4Addr::UNSPECIFIED,
        }],
    });

    let bytes = request.encode(None);
    let mut buf = Bytes::copy_from_slice(&bytes);
    let decoded =
        Packet::<Ospfv3>::decode(AddressFamily::Ipv6, &mut buf, None).unwrap();
    assert_eq!(request, decoded);
}

// Unknown LSA types are preserved for flooding: the raw bytes are kept
// verbatim and the scope is derived from the type bits.
#[test]
fn test_decode_unknown_lsa() {
    use ospfd::packet::lsa::{LsaScope, LsaTypeVersion};

    // Area-scope LSA with an unassigned function code and the U-bit set.
    let bytes = vec![
        0x00, 0x01, 0xa0, 0x42, 0x00, 0x00, 0x00, 0x07, 0x03, 0x03, 0x03,
        0x03, 0x80, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x1c, 0x01, 0x02,
        0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
    ];
    let mut buf = Bytes::copy_from_slice(&bytes);
    let lsa = Lsa::<Ospfv3>::decode(AddressFamily::Ipv6, &mut buf).unwrap();
    assert!(matches!(lsa.body, LsaBody::Unknown(_)));
    assert!(lsa.hdr.lsa_type.u_bit());
    assert_eq!(lsa.hdr.lsa_type.scope(), LsaScope::Area);
    assert_eq!(lsa.raw.as_ref(), &bytes[..]);
}
