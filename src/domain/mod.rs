//! Domain layer: the order aggregate, its ledger, the lifecycle rules, and
//! the ports through which the application reaches the outside world.

pub mod caller;
pub mod forfeiture;
pub mod ledger;
pub mod money;
pub mod order;
pub mod policy;
pub mod ports;
pub mod state_machine;
