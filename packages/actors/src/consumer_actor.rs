//! Consumer actor driving the queue loop.

use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::ConsumerMessage;
use crate::processor::{JobProcessor, PollOutcome};

/// State for the consumer actor.
pub struct ConsumerState {
    processor: JobProcessor,
    /// Pause between iterations.
    poll_interval: Duration,
    /// Whether the consumer should keep polling.
    running: bool,
}

/// Consumer actor arguments.
#[derive(Clone)]
pub struct ConsumerArgs {
    pub processor: JobProcessor,
    pub poll_interval: Duration,
}

/// Single sequential consumer. Jobs run inside `handle`, so one job finishes
/// before the next message is received and control messages wait their turn.
pub struct ConsumerActor;

fn schedule_poll(myself: &ActorRef<ConsumerMessage>, delay: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = myself.send_message(ConsumerMessage::Poll);
    });
}

impl Actor for ConsumerActor {
    type Msg = ConsumerMessage;
    type State = ConsumerState;
    type Arguments = ConsumerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue consumer");
        myself.send_message(ConsumerMessage::Poll)?;
        Ok(ConsumerState {
            processor: args.processor,
            poll_interval: args.poll_interval,
            running: true,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConsumerMessage::Poll => {
                if !state.running {
                    return Ok(());
                }

                match state.processor.poll_once().await {
                    PollOutcome::Finished(report) => {
                        tracing::info!(
                            font_id = %report.font_id,
                            job_id = %report.job_id,
                            deleted = report.deleted,
                            "Job finished as {}",
                            report.state
                        );
                    }
                    PollOutcome::Empty
                    | PollOutcome::QueueUnavailable(_)
                    | PollOutcome::Malformed { .. }
                    | PollOutcome::DeadLettered { .. } => {}
                }

                schedule_poll(&myself, state.poll_interval);
            }

            ConsumerMessage::GetStats { reply } => {
                let _ = reply.send(state.processor.stats());
            }

            ConsumerMessage::Shutdown => {
                tracing::info!("Shutting down queue consumer");
                state.running = false;
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }
}
