//! Explainer Proxy Library
//!
//! Byte-level TCP pass-through proxy. Connections can be wrapped in spies
//! that report every byte crossing them without changing it.

pub mod proxy;
pub mod spy;
pub mod transcript;

pub use proxy::{Network, PassThroughProxy, ProxyRoute};
pub use spy::{
    Connection, Listener, Observation, SpiedConn, SpiedListener, TracingObserver,
    TrafficObserver, TranscriptObserver,
};
pub use transcript::{parse_transcript, Direction, TrafficRecord};
