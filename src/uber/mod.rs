//! Outbound side of the integration: OAuth against the Uber auth server and
//! the REST client used to manage webhook subscriptions.

mod client;
mod oauth;

pub use client::*;
pub use oauth::*;

#[cfg(test)]
pub(crate) use client::tests as testing;
