//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod bytes;
pub mod capabilities;
pub mod crypto;
pub mod ip;
pub mod keychain;
pub mod policy;
pub mod protocol;
pub mod socket;
pub mod southbound;
pub mod task;

// Channel type aliases.
pub type Sender<T> = tokio::sync::mpsc::Sender<T>;
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
