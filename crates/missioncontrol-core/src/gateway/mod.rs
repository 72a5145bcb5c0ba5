//! Gateway bridge: consumes session-lifecycle events from an external agent
//! gateway and maps them onto worker tracker operations.

pub mod bridge;

pub use bridge::{
    BridgeError, BridgeResult, BridgeStatus, GatewayBridge, GatewayMessage, GatewayTransport,
    LifecyclePhase,
};
