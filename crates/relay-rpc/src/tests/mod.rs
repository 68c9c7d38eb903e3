//! Test module for relay-rpc
//!
//! Behavioral tests spanning several modules, plus property-based tests
//! using proptest.


#[cfg(test)]
pub mod middleware_tests;

#[cfg(test)]
pub mod router_tests;
