//! Supervisor actor keeping the consumer alive.

use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};

use crate::consumer_actor::{ConsumerActor, ConsumerArgs};
use crate::messages::{ConsumerMessage, SupervisorMessage, SupervisorStatus};

/// State for the supervisor actor.
pub struct SupervisorState {
    /// Used to spawn the consumer again after a crash.
    args: ConsumerArgs,
    consumer: Option<ActorRef<ConsumerMessage>>,
    restarts: u32,
    shutting_down: bool,
}

async fn spawn_consumer(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let (actor, _handle) = Actor::spawn_linked(
        None,
        ConsumerActor,
        state.args.clone(),
        myself.get_cell(),
    )
    .await
    .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn consumer: {}", e)))?;

    state.consumer = Some(actor);
    Ok(())
}

/// Supervisor actor that owns the consumer.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = ConsumerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting font worker supervisor");

        let mut state = SupervisorState {
            args,
            consumer: None,
            restarts: 0,
            shutting_down: false,
        };
        spawn_consumer(&myself, &mut state).await?;
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::GetStatus { reply } => {
                let _ = reply.send(SupervisorStatus {
                    consumer: state.consumer.clone(),
                    restarts: state.restarts,
                });
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.shutting_down = true;
                match &state.consumer {
                    // The supervisor stops once the consumer has terminated.
                    Some(consumer) => consumer.send_message(ConsumerMessage::Shutdown)?,
                    None => myself.stop(None),
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::error!("Consumer {} failed: {}", cell.get_id(), err);
                state.consumer = None;
                if state.shutting_down {
                    myself.stop(None);
                    return Ok(());
                }

                tokio::time::sleep(state.args.poll_interval).await;
                state.restarts += 1;
                tracing::warn!("Restarting consumer (restart #{})", state.restarts);
                spawn_consumer(&myself, state).await?;
            }

            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::info!("Consumer {} stopped: {:?}", cell.get_id(), reason);
                state.consumer = None;
                myself.stop(None);
            }

            _ => {}
        }
        Ok(())
    }
}

/// Start the supervisor and, through it, the consumer.
///
/// Actors are left unnamed so several workers can share one process.
pub async fn start_supervisor(
    args: ConsumerArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(None, Supervisor, args).await?;

    Ok((actor, handle))
}
