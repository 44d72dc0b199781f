use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{ActiveCommand, HoldOutcome, Robot, RobotEvent};
use crate::commands::{Command, CommandPlanner, CommandSequence};
use crate::errors::SequenceError;

/// Text shown on the LCD while a query is being planned.
pub const THINKING_LINE: &str = "Thinking...";

/// The coordinator's record of the sequence currently playing.
pub(super) struct SequenceSlot {
    pub(super) cancel: Arc<watch::Sender<bool>>,
    /// Closes when the sequence task ends
    finished: watch::Receiver<()>,
}

/// Handle to a sequence playing in the background.
///
/// Dropping the handle does not stop the sequence.
pub struct SequenceHandle {
    cancel: Arc<watch::Sender<bool>>,
    task: JoinHandle<Result<(), SequenceError>>,
}

impl SequenceHandle {
    /// Asks the sequence to stop after its current send. The final stop
    /// is still sent.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the sequence to end, final stop included.
    pub async fn join(self) -> Result<(), SequenceError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "sequence task failed");
                Err(SequenceError::Cancelled)
            }
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> Robot<W> {
    /// Plans `query` and plays the resulting sequence.
    ///
    /// "Thinking..." goes to the LCD before planning starts. A planning
    /// failure is reported to observers as well as returned.
    pub async fn handle_query<P: CommandPlanner>(
        &self,
        planner: &P,
        query: &str,
    ) -> Result<SequenceHandle, SequenceError> {
        self.send_lcd(THINKING_LINE, "").await?;

        let sequence = match planner.plan(query).await {
            Ok(sequence) => sequence,
            Err(e) => {
                warn!(error = %e, "could not plan query");
                self.inner
                    .sink
                    .notify(RobotEvent::ActiveCommand(ActiveCommand::Failed(e.to_string())));
                return Err(e);
            }
        };

        Ok(self.run_sequence(sequence))
    }

    /// Starts playing `sequence`, cancelling the one already playing.
    ///
    /// The new sequence sends nothing until the previous one has sent its
    /// final stop.
    pub fn run_sequence(&self, sequence: CommandSequence) -> SequenceHandle {
        let (cancel, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel);
        let (finished_tx, finished) = watch::channel(());

        let previous = self.inner.active_sequence.lock().replace(SequenceSlot {
            cancel: Arc::clone(&cancel),
            finished,
        });
        if let Some(previous) = &previous {
            info!("cancelling previous sequence");
            previous.cancel.send_replace(true);
        }

        let robot = self.clone();
        let slot = Arc::clone(&cancel);
        let task = tokio::spawn(async move {
            if let Some(mut previous) = previous {
                // Resolves once the previous task drops its sender
                while previous.finished.changed().await.is_ok() {}
            }
            let result = robot.execute_sequence(sequence, slot, cancel_rx).await;
            drop(finished_tx);
            result
        });

        SequenceHandle { cancel, task }
    }

    async fn execute_sequence(
        &self,
        sequence: CommandSequence,
        slot: Arc<watch::Sender<bool>>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), SequenceError> {
        info!(steps = sequence.len(), "running command sequence");

        let result = self.play_steps(&sequence, &mut cancel).await;

        // Always stop, however the sequence ended
        let stopped = self.send_gated(&Command::Stop, Duration::ZERO).await;

        let result = match (result, stopped) {
            (Ok(()), Ok(_)) => Ok(()),
            (Err(e), Ok(_)) => Err(e),
            (Ok(()), Err(e)) => Err(SequenceError::Send(e)),
            (Err(e), Err(stop_err)) => {
                error!(error = %stop_err, "failed to send final stop");
                Err(e)
            }
        };

        match &result {
            Ok(()) => {
                info!("command sequence complete");
                self.inner
                    .sink
                    .notify(RobotEvent::ActiveCommand(ActiveCommand::Cleared));
            }
            Err(e) => {
                error!(error = %e, "command sequence failed");
                self.inner
                    .sink
                    .notify(RobotEvent::ActiveCommand(ActiveCommand::Failed(e.to_string())));
            }
        }

        // Only clear the slot if it is still ours
        let mut active = self.inner.active_sequence.lock();
        if active.as_ref().map_or(false, |a| Arc::ptr_eq(&a.cancel, &slot)) {
            active.take();
        }

        result
    }

    async fn play_steps(
        &self,
        sequence: &CommandSequence,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), SequenceError> {
        // A stop anywhere from here on ends the sequence
        let mut preempt = self.inner.preempt.subscribe();

        for step in &sequence.commands {
            if *cancel.borrow() {
                return Err(SequenceError::Cancelled);
            }

            info!(id = %step.id, command = step.command.name(), "sequence step");
            self.inner
                .sink
                .notify(RobotEvent::ActiveCommand(ActiveCommand::Step(step.clone())));

            let outcome = self
                .send_and_hold(&step.command, step.duration, &mut preempt, Some(&mut *cancel))
                .await?;
            check_outcome(outcome)?;

            if step.pauses_after() {
                let outcome = self
                    .send_and_hold(
                        &Command::Stop,
                        step.pause_duration,
                        &mut preempt,
                        Some(&mut *cancel),
                    )
                    .await?;
                check_outcome(outcome)?;
            }
        }

        Ok(())
    }
}

fn check_outcome(outcome: HoldOutcome) -> Result<(), SequenceError> {
    match outcome {
        HoldOutcome::Completed => Ok(()),
        HoldOutcome::Preempted => Err(SequenceError::Preempted),
        HoldOutcome::Cancelled => Err(SequenceError::Cancelled),
    }
}
