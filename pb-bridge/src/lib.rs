mod server;

pub use server::{
    BridgeConfig, BridgeState, CommandOutcome, DebugInfo, DispatchError, ParameterReadback,
    ReadbackSource, SessionDetail, SessionSummary, build_bridge_app,
};
