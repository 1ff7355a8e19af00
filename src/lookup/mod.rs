//! Asynchronous party lookup correlation
//!
//! The lookup engine:
//! 1. Sends payer-side lookups to the switch (initiator)
//! 2. Hands payee-side lookups to the workflow engine (receiver)
//! 3. Matches uncorrelated callbacks to cached transaction context (correlator)
//! 4. Sends success or error responses back to the switch (dispatcher), for
//!    correlated callbacks and for answers produced by the payee workflow

pub mod correlator;
pub mod dispatcher;
pub mod initiator;
pub mod receiver;
pub mod state;

pub use correlator::{CallbackCorrelator, ChannelOutcomeSink, CorrelationReport};
pub use dispatcher::{DispatchWorker, ResponseDispatcher, ResponseRoute, WorkflowAnswer};
pub use initiator::LookupInitiator;
pub use receiver::LookupReceiver;
pub use state::{LookupStats, LookupTracker};
