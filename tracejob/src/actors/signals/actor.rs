use super::messages::Message;
use super::{Escalation, Signal};

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<Message>,
    signals: BoxStream<'static, Signal>,
    root: CancellationToken,
    escalation: Option<Escalation>,
    received: usize,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<Message>,
        signals: BoxStream<'static, Signal>,
        root: CancellationToken,
        escalation: Escalation,
    ) {
        let actor = Actor {
            inbox,
            signals,
            root,
            escalation: Some(escalation),
            received: 0,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    match maybe_msg {
                        Some(Message::Uninstall { response }) => {
                            // stop delivery before acknowledging
                            self.signals = stream::empty().boxed();
                            let _ = response.send(());
                            return;
                        }
                        // handle dropped
                        None => return,
                    }
                }
                maybe_signal = self.signals.next() => {
                    match maybe_signal {
                        Some(signal) => {
                            if self.on_signal(signal) {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Returns true once there is nothing left to propagate.
    fn on_signal(&mut self, signal: Signal) -> bool {
        self.received += 1;
        if self.received == 1 {
            tracing::info!(?signal, "signal received, cancelling");
            self.root.cancel();
            return false;
        }
        tracing::warn!(?signal, "second signal received, exiting without cleanup");
        if let Some(escalate) = self.escalation.take() {
            escalate();
        }
        true
    }
}
