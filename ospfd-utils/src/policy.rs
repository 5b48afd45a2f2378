//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::protocol::Protocol;

// Opaque route-policy tags. The routing engine round-trips them between the
// redistribution interface and the RIB without interpreting them.
pub type PolicyTags = BTreeSet<u32>;

// Metric type of an external route.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ExternalMetricType {
    Type1,
    #[default]
    Type2,
}

// Attributes of a redistributed route offered to the policy engine.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ExternalRoute {
    pub prefix: IpNetwork,
    pub nexthop: Option<IpAddr>,
    pub metric: u32,
    pub metric_type: ExternalMetricType,
    pub tag: Option<u32>,
    pub origin: Protocol,
    pub tags: PolicyTags,
}

// Outcome of a policy evaluation. `Accept` carries the (possibly modified)
// route attributes.
#[derive(Clone, Debug)]
pub enum PolicyVerdict {
    Accept(ExternalRoute),
    Reject,
}

// Policy evaluation hook installed by the embedding process.
pub type PolicyFilter =
    Arc<dyn Fn(ExternalRoute) -> PolicyVerdict + Send + Sync>;

// Applies the optional policy filter to a redistributed route.
pub fn apply(
    filter: Option<&PolicyFilter>,
    route: ExternalRoute,
) -> Option<ExternalRoute> {
    match filter {
        Some(filter) => match filter.as_ref()(route) {
            PolicyVerdict::Accept(route) => Some(route),
            PolicyVerdict::Reject => None,
        },
        None => Some(route),
    }
}
