use std::fmt::Debug;

use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use super::StoreState;

/// A command the run loop applies to the store state.
pub(super) trait Command: Send + Debug + 'static {
    fn apply(self: Box<Self>, state: &mut StoreState, mailbox: &Mailbox);
}

/// A weak address of the run loop, held by the state and its network
/// tasks. It doesn't keep the loop alive.
#[derive(Clone)]
pub(super) struct Mailbox {
    tx: mpsc::WeakUnboundedSender<Box<dyn Command>>,
}

impl Mailbox {
    /// Posts a command, returns `false` if the loop has terminated.
    #[inline]
    pub(super) fn post<C: Command>(&self, cmd: C) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        tx.send(Box::new(cmd)).is_ok()
    }
}

/// The owning side of a run loop. The loop stops when this is dropped or
/// killed.
pub(super) struct Handle {
    tx: mpsc::UnboundedSender<Box<dyn Command>>,
    kill_tx: watch::Sender<bool>,
}

impl Handle {
    #[inline]
    pub(super) fn send<C: Command>(&self, cmd: C) -> bool {
        self.tx.send(Box::new(cmd)).is_ok()
    }

    #[inline]
    pub(super) fn kill(&self) {
        self.kill_tx.send(true).ok();
    }
}

pub(super) fn spawn(state: StoreState) -> Handle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = watch::channel(false);
    let mailbox = Mailbox { tx: tx.downgrade() };
    tokio::spawn(
        run(state, mailbox, rx, kill_rx)
            .instrument(trace_span!("conversation store")),
    );
    Handle { tx, kill_tx }
}

async fn run(
    mut state: StoreState,
    mailbox: Mailbox,
    mut rx: mpsc::UnboundedReceiver<Box<dyn Command>>,
    mut kill_rx: watch::Receiver<bool>,
) {
    debug!("started");
    loop {
        let cmd = select! {
            biased;

            _ = kill_rx.changed() => {
                break;
            }
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                cmd
            }
        };
        trace!("received command: {cmd:?}");

        let apply_span = trace_span!("apply cmd");
        apply_span.in_scope(|| {
            cmd.apply(&mut state, &mailbox);
            trace!("finished");
        });
    }
    // Dropping the state aborts the network tasks and fails every pending
    // reply with `Closed`.
    debug!("will terminate");
}
