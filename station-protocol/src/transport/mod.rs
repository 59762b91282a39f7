//! TCP Transport Layer
//!
//! Session establishment and non-destructive liveness checking for the
//! station's hardware peers.

pub mod probe;
pub mod tcp;

pub use probe::{LivenessProbe, ProbeOutcome};
pub use tcp::TcpTransport;
