//! Domain model: the payment entity, actors, audit rows and the ports the
//! services are written against.

pub mod actor;
pub mod audit;
pub mod payment;
pub mod ports;
pub mod stage;
