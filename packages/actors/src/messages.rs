//! Message types for actor communication.

use ractor::{ActorRef, RpcReplyPort};

use crate::counters::ConsumerStats;

/// Messages for the ConsumerActor.
#[derive(Debug)]
pub enum ConsumerMessage {
    /// Run one consumer iteration, then schedule the next.
    Poll,

    /// Get the consumer's counters.
    GetStats { reply: RpcReplyPort<ConsumerStats> },

    /// Stop after the job in progress, if any.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Get the current consumer and how often it was restarted.
    GetStatus { reply: RpcReplyPort<SupervisorStatus> },

    /// Stop the consumer, then the supervisor.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub consumer: Option<ActorRef<ConsumerMessage>>,
    pub restarts: u32,
}
