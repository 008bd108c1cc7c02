//! Background coordinator: tab lifecycle tracking, command aggregation and
//! request routing for the tabdeck palette, exposed to the browser over a
//! Unix socket bridge.

pub mod aggregator;
pub mod bridge;
pub mod config;
pub mod github;
pub mod host;
pub mod registry;
pub mod router;
pub mod sources;

#[cfg(test)]
mod test_support;
