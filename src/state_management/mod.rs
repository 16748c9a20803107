pub mod load_status_machine;
pub mod lifecycle;

pub use load_status_machine::{LoadStatusMachine, TransitionContext, TransitionOutcome};
pub use lifecycle::Lifecycle;
