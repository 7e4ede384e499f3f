//! Delivery worker: wires settings into one queue consumer per stage.

pub mod wiring;
