mod actor;
mod messages;

use actor::Actor;
use messages::Message;

use futures::stream::BoxStream;
use std::io;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Exit status used when a second signal cuts the graceful unwind short.
pub const ESCALATION_EXIT_CODE: i32 = 130;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

/// Runs when a second signal arrives before the caller finished unwinding.
pub type Escalation = Box<dyn FnOnce() + Send>;

/// Turns OS signals into cancellation of one root token.
///
/// The first signal cancels the root, so every token derived from it unwinds
/// cooperatively. The second one runs the escalation, which by default exits
/// the process immediately.
///
/// This struct is an actor handle. Listening happens in the actor spawned by
/// [`SignalPropagatorHandle::spawn`], which stops on [`uninstall`] or when the
/// handle is dropped.
///
/// [`uninstall`]: SignalPropagatorHandle::uninstall
pub struct SignalPropagatorHandle {
    sender: mpsc::UnboundedSender<Message>,
    root: CancellationToken,
}

impl SignalPropagatorHandle {
    /// Listen for SIGINT and SIGTERM.
    #[cfg(unix)]
    pub fn install(root: CancellationToken) -> io::Result<Self> {
        let escalation: Escalation = Box::new(|| std::process::exit(ESCALATION_EXIT_CODE));
        Ok(Self::spawn(root, os_signals()?, escalation))
    }

    pub fn spawn(
        root: CancellationToken,
        signals: BoxStream<'static, Signal>,
        escalation: Escalation,
    ) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(inbox, signals, root.clone(), escalation);
        Self { sender, root }
    }

    /// A token cancelled by the first signal.
    pub fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Stop listening and wait for the actor to exit.
    pub async fn uninstall(self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Message::Uninstall { response: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

#[cfg(unix)]
fn os_signals() -> io::Result<BoxStream<'static, Signal>> {
    use futures::{stream, StreamExt};
    use tokio::signal::unix::{signal, SignalKind};
    use tokio_stream::wrappers::SignalStream;

    let interrupt =
        SignalStream::new(signal(SignalKind::interrupt())?).map(|_| Signal::Interrupt);
    let terminate =
        SignalStream::new(signal(SignalKind::terminate())?).map(|_| Signal::Terminate);
    Ok(stream::select(interrupt, terminate).boxed())
}
