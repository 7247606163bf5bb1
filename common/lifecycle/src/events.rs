use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::phase::LifecyclePhase;

/// Readiness notifications raised by the host application while it boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostSignal {
    /// Data model loaded. Honoured once.
    ModelReady,
    /// Transport layer (HTTP server) configured. Honoured once.
    TransportReady,
    /// A listener started accepting connections. Raised once per listener.
    AcceptingConnections,
    /// Request handlers are registered. Honoured once.
    HandlersRegistered,
}

impl HostSignal {
    pub const ALL: [HostSignal; 4] = [
        HostSignal::ModelReady,
        HostSignal::TransportReady,
        HostSignal::AcceptingConnections,
        HostSignal::HandlersRegistered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostSignal::ModelReady => "model-ready",
            HostSignal::TransportReady => "transport-ready",
            HostSignal::AcceptingConnections => "accepting-connections",
            HostSignal::HandlersRegistered => "handlers-registered",
        }
    }

    pub fn fires_once(&self) -> bool {
        !matches!(self, HostSignal::AcceptingConnections)
    }
}

impl fmt::Display for HostSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published on the coordinator's broadcast channel, see [`Coordinator::subscribe`](crate::Coordinator::subscribe).
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    PhaseChanged {
        from: LifecyclePhase,
        to: LifecyclePhase,
    },
    /// `initialize` was called again after the first call.
    InitializeRepeated,
    ServerReady {
        listeners: u32,
    },
    HooksRegistered,
    SignalFailed {
        signal: HostSignal,
        reason: String,
    },
    ShutdownRequested {
        reason: String,
    },
    ShutdownCompleted {
        clean: bool,
        elapsed: Duration,
    },
}
