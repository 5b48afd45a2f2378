//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use capctl::caps::CapState;
use tracing::error;

/// Runs the provided closure with elevated capabilities.
///
/// Raw-IP sockets require CAP_NET_RAW, which is kept out of the effective set
/// except around the few syscalls that need it.
pub fn raise<F, R>(cb: F) -> R
where
    F: FnOnce() -> R,
{
    let mut caps = CapState::get_current().unwrap();
    caps.effective = caps.permitted;
    if let Err(error) = caps.set_current() {
        error!("failed to update current capabilities: {}", error);
    }

    let ret = cb();

    caps.effective.clear();
    if let Err(error) = caps.set_current() {
        error!("failed to update current capabilities: {}", error);
    }

    ret
}
