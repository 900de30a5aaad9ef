pub mod command;
pub mod context;
pub mod image;
pub mod lifecycle;
pub mod logging;
pub mod polling;
pub mod reconciler;
pub mod remediation;

pub use context::CloudrigContext;
pub use lifecycle::{
    get_state, public_dns, start, stop, InstanceState, LifecyclePhase, StartTicket, StopOutcome,
};
pub use polling::PollPolicy;
pub use reconciler::{setup, Question, Remediation, ResourceKind, SetupReport};
