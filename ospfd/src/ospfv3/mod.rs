//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod area;
pub mod interface;
pub mod lsdb;
pub mod neighbor;
pub mod network;
pub mod packet;
pub mod spf;
