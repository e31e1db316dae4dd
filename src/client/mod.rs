mod backoff;
mod push;
mod reconnect;

pub use backoff::{
    Backoff, CloseKind, ConnectionState, NextStep, ReconnectConfig, ReconnectPolicy,
};
pub use push::PushClient;
pub use reconnect::Reconnector;
