// Domain layer: extract/metadata models and the ports the client and poller work through.

pub mod model;
pub mod ports;
