//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::hint::black_box;
use std::net::Ipv4Addr;
use std::str::FromStr;

use criterion::{Criterion, criterion_group, criterion_main};
use ospfd::ospfv2::packet::lsa::{
    LsaBody, LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
};
use ospfd::ospfv2::packet::{Hello, LsUpdate, Options, PacketHdr};
use ospfd::packet::lsa::Lsa;
use ospfd::packet::{Packet, PacketType};
use ospfd::version::Ospfv2;

fn hello_packet() -> Packet<Ospfv2> {
    Packet::Hello(Hello {
        hdr: PacketHdr {
            pkt_type: PacketType::Hello,
            router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            area_id: Ipv4Addr::from_str("0.0.0.0").unwrap(),
            auth_seqno: None,
        },
        network_mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
        hello_interval: 10,
        options: Options::E,
        priority: 1,
        dead_interval: 40,
        dr: None,
        bdr: None,
        neighbors: [
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            Ipv4Addr::from_str("3.3.3.3").unwrap(),
        ]
        .into(),
    })
}

fn router_lsa() -> Lsa<Ospfv2> {
    let links = (0..16)
        .map(|i| {
            LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                Ipv4Addr::from(0x0a000000 + (i << 8)),
                Ipv4Addr::from_str("255.255.255.0").unwrap(),
                10,
            )
        })
        .collect();

    Lsa::new(
        1,
        Some(Options::E),
        Ipv4Addr::from_str("1.1.1.1").unwrap(),
        Ipv4Addr::from_str("1.1.1.1").unwrap(),
        0x80000001,
        LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::B,
            links,
        }),
    )
}

fn criterion_benchmark(c: &mut Criterion) {
    let hello = hello_packet();
    c.bench_function("encode hello", |b| {
        b.iter(|| black_box(&hello).encode(None))
    });

    let lsupdate = Packet::LsUpdate(LsUpdate {
        hdr: PacketHdr {
            pkt_type: PacketType::LsUpdate,
            router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            area_id: Ipv4Addr::from_str("0.0.0.0").unwrap(),
            auth_seqno: None,
        },
        lsas: vec![router_lsa()],
    });
    c.bench_function("encode ls-update", |b| {
        b.iter(|| black_box(&lsupdate).encode(None))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
