//! Domain layer: value types, invariants and the ports the engine talks through.

pub mod changeset;
pub mod cycle;
pub mod group;
pub mod ledger;
pub mod money;
pub mod ports;
pub mod transaction;
pub mod user;
pub mod wallet;
