// Acquisition side: meter driver → producer adapter → reading channel.
// The driver is opaque; everything here only sees pushed readings and a start/stop contract.

pub mod reading;
pub mod channel;
pub mod producer;
pub mod simulated;
