//! # sipkit
//!
//! A SIP stack core: message model, transport layer and transaction
//! layer per RFC 3261, with the RFC 3581 `rport` extension and the RFC
//! 6026 transaction-state patches.

pub mod endpoint;
pub mod headers;
pub mod message;
pub mod parser;
pub mod transaction;
pub mod transport;

pub(crate) mod error;

pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{Error, Result};

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

use std::net::SocketAddr;

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::transaction::key::BRANCH_MAGIC_COOKIE;

/// Generates an RFC 3261 branch parameter (magic cookie prefixed).
pub fn generate_branch() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();

    format!("{BRANCH_MAGIC_COOKIE}{suffix}")
}

/// Generates a From/To tag parameter.
pub fn generate_tag() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Generates a Call-ID.
pub fn generate_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn local_name_for(addr: &SocketAddr) -> String {
    let ip = local_ip_address::local_ip().unwrap_or(addr.ip());

    format!("{}:{}", ip, addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_branch_carries_the_magic_cookie() {
        let branch = generate_branch();

        assert!(branch.starts_with(BRANCH_MAGIC_COOKIE));
        assert!(branch.len() > BRANCH_MAGIC_COOKIE.len());
        assert_ne!(generate_branch(), branch);
    }

    #[test]
    fn test_generated_tags_differ() {
        assert_ne!(generate_tag(), generate_tag());
    }
}
