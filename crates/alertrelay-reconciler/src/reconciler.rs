//! The channel reconciler.
//!
//! One worker task owns the [`ChannelTable`]. Session events, retry timer
//! firings and shutdown signals all arrive through a single `select!`, so
//! every transition is serialized without locks.
//!
//! ```text
//!  session events ──┐
//!  retry firings  ──┼──> worker ──> ChannelTable ──> actions ──> session / timers
//!  shutdown       ──┘                  │
//!                                      └──> MembershipView (watch)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use alertrelay_core::{ChannelName, ChannelSnapshot, ChannelStatus, ReconcilerConfig};
use alertrelay_session::{Session, SessionEvent};

use crate::clock::Clock;
use crate::delay::{Canceller, Delayer};
use crate::error::{ReconcilerError, Result};
use crate::membership::{Action, ChannelTable, RetryToken};

/// Keeps the desired channels joined for as long as it runs.
pub struct ChannelReconciler {
    session: Arc<dyn Session>,
    delayer: Arc<dyn Delayer>,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
    membership: watch::Receiver<Vec<ChannelSnapshot>>,
    lifecycle: Mutex<Lifecycle>,
}

enum Lifecycle {
    Idle {
        table: ChannelTable,
        publisher: watch::Sender<Vec<ChannelSnapshot>>,
    },
    Running {
        stop: watch::Sender<bool>,
        worker: JoinHandle<()>,
    },
    Stopped,
}

impl ChannelReconciler {
    /// Create a reconciler for the channels in `config`.
    ///
    /// The session is shared, not owned: starting or stopping the
    /// reconciler never connects or disconnects it.
    pub fn new(
        config: ReconcilerConfig,
        session: Arc<dyn Session>,
        delayer: Arc<dyn Delayer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let table = ChannelTable::new(&config.channels);
        let (publisher, membership) = watch::channel(table.snapshot());

        Ok(Self {
            session,
            delayer,
            clock,
            retry_delay: config.retry_delay,
            membership,
            lifecycle: Mutex::new(Lifecycle::Idle { table, publisher }),
        })
    }

    /// Start the worker.
    ///
    /// The worker exits when [`stop`](Self::stop) is called or `shutdown`
    /// turns `true`. A `shutdown` whose sender is dropped never fires.
    /// Can only be called once per reconciler.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let (table, publisher) = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle { table, publisher } => (table, publisher),
            other => {
                *lifecycle = other;
                return Err(ReconcilerError::AlreadyStarted);
            }
        };

        // Subscribe before the worker queries the connection state, so a
        // connect racing with start is seen at least once.
        let events = self.session.subscribe();
        let (stop, stop_rx) = watch::channel(false);
        let (retry_tx, retries) = mpsc::unbounded_channel();

        tracing::info!(
            channels = table.len(),
            retry_delay = ?self.retry_delay,
            "starting channel reconciler"
        );

        let worker = Worker {
            table,
            session: Arc::clone(&self.session),
            delayer: Arc::clone(&self.delayer),
            clock: Arc::clone(&self.clock),
            retry_delay: self.retry_delay,
            timers: HashMap::new(),
            retry_tx,
            publisher,
        };
        let signals = Signals {
            stop: stop_rx,
            shutdown,
        };
        let worker = tokio::spawn(worker.run(events, retries, signals));

        *lifecycle = Lifecycle::Running { stop, worker };
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Pending retry timers are cancelled before this returns.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running { stop, worker } => {
                // The worker may have exited on shutdown already.
                let _ = stop.send(true);
                worker
                    .await
                    .map_err(|e| ReconcilerError::WorkerFailed(e.to_string()))
            }
            Lifecycle::Stopped => Err(ReconcilerError::AlreadyStopped),
            idle @ Lifecycle::Idle { .. } => {
                *lifecycle = idle;
                Err(ReconcilerError::NotStarted)
            }
        }
    }

    /// A live view of channel membership.
    pub fn membership(&self) -> MembershipView {
        MembershipView {
            rx: self.membership.clone(),
        }
    }
}

/// Read-only, continuously updated view of the reconciler's channels.
#[derive(Clone)]
pub struct MembershipView {
    rx: watch::Receiver<Vec<ChannelSnapshot>>,
}

impl MembershipView {
    /// The latest snapshot of every channel.
    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        self.rx.borrow().clone()
    }

    /// Status of `name`, or `None` if it is not a desired channel.
    pub fn status(&self, name: &ChannelName) -> Option<ChannelStatus> {
        self.rx
            .borrow()
            .iter()
            .find(|c| &c.name == name)
            .map(|c| c.status)
    }

    /// Channels currently joined.
    pub fn joined(&self) -> Vec<ChannelName> {
        self.rx
            .borrow()
            .iter()
            .filter(|c| c.status.is_joined())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Wait until `name` reaches `status`.
    pub async fn wait_for_status(&mut self, name: &ChannelName, status: ChannelStatus) -> Result<()> {
        if self.status(name).is_none() {
            return Err(ReconcilerError::UnknownChannel(name.to_string()));
        }
        let reached = self
            .rx
            .wait_for(|channels| {
                channels
                    .iter()
                    .any(|c| &c.name == name && c.status == status)
            })
            .await
            .is_ok();
        if reached {
            Ok(())
        } else {
            Err(ReconcilerError::NotRunning)
        }
    }

    /// Wait until `name` is joined.
    pub async fn wait_joined(&mut self, name: &ChannelName) -> Result<()> {
        self.wait_for_status(name, ChannelStatus::Joined).await
    }
}

struct RetryDue {
    channel: usize,
    token: RetryToken,
}

struct ArmedRetry {
    token: RetryToken,
    task: JoinHandle<()>,
    canceller: Canceller,
}

impl ArmedRetry {
    fn cancel(self) {
        self.task.abort();
        self.canceller.cancel();
    }
}

struct Signals {
    stop: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl Signals {
    /// Resolves once either signal asks the worker to exit.
    async fn cancelled(&mut self) {
        let Signals { stop, shutdown } = self;
        // A dropped stop sender means the reconciler itself was dropped.
        let stopped = async {
            let _ = stop.wait_for(|stop| *stop).await;
        };
        let shut_down = async {
            let closed = shutdown.wait_for(|stop| *stop).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = stopped => {}
            _ = shut_down => {}
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.stop.borrow() || *self.shutdown.borrow()
    }
}

enum Input {
    Event(std::result::Result<SessionEvent, RecvError>),
    Retry(RetryDue),
    Shutdown,
}

struct Worker {
    table: ChannelTable,
    session: Arc<dyn Session>,
    delayer: Arc<dyn Delayer>,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
    timers: HashMap<usize, ArmedRetry>,
    retry_tx: mpsc::UnboundedSender<RetryDue>,
    publisher: watch::Sender<Vec<ChannelSnapshot>>,
}

impl Worker {
    async fn run(
        mut self,
        mut events: broadcast::Receiver<SessionEvent>,
        mut retries: mpsc::UnboundedReceiver<RetryDue>,
        mut signals: Signals,
    ) {
        if self.session.is_connected() {
            tracing::debug!("session already connected at start");
            let actions = self.table.on_connected(self.clock.now());
            self.apply(actions, &signals).await;
            self.publish();
        }

        let mut events_open = true;
        loop {
            let input = tokio::select! {
                biased;
                _ = signals.cancelled() => Input::Shutdown,
                event = events.recv(), if events_open => Input::Event(event),
                Some(due) = retries.recv() => Input::Retry(due),
            };

            let actions = match input {
                Input::Shutdown => break,
                Input::Event(Ok(event)) => self.on_event(event),
                Input::Event(Err(RecvError::Lagged(missed))) => {
                    tracing::warn!(missed, "session events lagged, resynchronizing");
                    self.resync()
                }
                Input::Event(Err(RecvError::Closed)) => {
                    tracing::warn!("session event stream closed");
                    events_open = false;
                    self.table.on_disconnected()
                }
                Input::Retry(due) => self.on_retry_due(due),
            };

            self.apply(actions, &signals).await;
            self.publish();
        }

        for (_, armed) in self.timers.drain() {
            armed.cancel();
        }
        tracing::info!("channel reconciler stopped");
    }

    fn on_event(&mut self, event: SessionEvent) -> Vec<Action> {
        let now = self.clock.now();
        match event {
            SessionEvent::Connected => {
                tracing::info!("session connected, joining channels");
                self.table.on_connected(now)
            }
            SessionEvent::Disconnected => {
                tracing::info!("session disconnected");
                self.table.on_disconnected()
            }
            SessionEvent::JoinConfirmed { channel } => self.table.on_join_confirmed(&channel, now),
            SessionEvent::Kicked { channel, target } => {
                let own = self.session.nickname();
                self.table.on_kicked(&channel, &target, &own, now)
            }
        }
    }

    fn on_retry_due(&mut self, due: RetryDue) -> Vec<Action> {
        if self
            .timers
            .get(&due.channel)
            .is_some_and(|armed| armed.token == due.token)
        {
            self.timers.remove(&due.channel);
        }
        self.table
            .on_retry_due(due.channel, due.token, self.clock.now())
    }

    /// Rebuild membership after missing events.
    ///
    /// The lost events may have spanned a reconnect, so no membership from
    /// before the gap is trusted.
    fn resync(&mut self) -> Vec<Action> {
        let mut actions = self.table.on_disconnected();
        if self.session.is_connected() {
            actions.extend(self.table.on_connected(self.clock.now()));
        }
        actions
    }

    async fn apply(&mut self, actions: Vec<Action>, signals: &Signals) {
        for action in actions {
            match action {
                Action::ArmRetry { channel, token } => self.arm(channel, token),
                Action::CancelRetry { channel, token } => {
                    if self
                        .timers
                        .get(&channel)
                        .is_some_and(|armed| armed.token == token)
                    {
                        if let Some(armed) = self.timers.remove(&channel) {
                            armed.cancel();
                        }
                    }
                }
                Action::Join { channel } => {
                    if signals.is_cancelled() {
                        continue;
                    }
                    self.send_join(channel).await;
                }
            }
        }
    }

    fn arm(&mut self, channel: usize, token: RetryToken) {
        let (fired, canceller) = self.delayer.delay(self.retry_delay).into_parts();
        let tx = self.retry_tx.clone();
        let task = tokio::spawn(async move {
            fired.await;
            // The worker is gone if this fails; nothing left to retry.
            let _ = tx.send(RetryDue { channel, token });
        });

        let armed = ArmedRetry {
            token,
            task,
            canceller,
        };
        if let Some(previous) = self.timers.insert(channel, armed) {
            previous.cancel();
        }
    }

    async fn send_join(&self, channel: usize) {
        let Some(spec) = self.table.spec(channel) else {
            return;
        };
        match self.session.send_join(&spec.name, spec.key()).await {
            Ok(()) => tracing::debug!(channel = %spec.name, "join sent"),
            Err(e) => tracing::warn!(
                channel = %spec.name,
                error = %e,
                retry_in = ?self.retry_delay,
                "failed to send join"
            ),
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.table.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delay::ManualDelayer;
    use alertrelay_core::ChannelSpec;
    use alertrelay_session::{MemorySession, SessionCommand};

    type Commands = tokio::sync::mpsc::UnboundedReceiver<SessionCommand>;

    fn reconciler(names: &[&str]) -> (ChannelReconciler, Arc<MemorySession>, ManualDelayer, Commands) {
        let (session, commands) = MemorySession::new("relay");
        let delayer = ManualDelayer::new();
        let config = ReconcilerConfig::new(names.iter().map(|n| ChannelSpec::new(*n)).collect());
        let reconciler = ChannelReconciler::new(
            config,
            session.clone(),
            Arc::new(delayer.clone()),
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        (reconciler, session, delayer, commands)
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (session, _commands) = MemorySession::new("relay");
        let result = ChannelReconciler::new(
            ReconcilerConfig::default(),
            session,
            Arc::new(ManualDelayer::new()),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(ReconcilerError::Config(_))));
    }

    #[tokio::test]
    async fn test_double_start_is_an_error() {
        let (reconciler, _session, _delayer, _commands) = reconciler(&["#foo"]);
        reconciler.start(no_shutdown()).await.unwrap();

        let err = reconciler.start(no_shutdown()).await.unwrap_err();
        assert!(matches!(err, ReconcilerError::AlreadyStarted));

        reconciler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_an_error() {
        let (reconciler, _session, _delayer, _commands) = reconciler(&["#foo"]);
        let err = reconciler.stop().await.unwrap_err();
        assert!(matches!(err, ReconcilerError::NotStarted));

        // Still startable afterwards.
        reconciler.start(no_shutdown()).await.unwrap();
        reconciler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_twice_and_restart_are_errors() {
        let (reconciler, _session, _delayer, _commands) = reconciler(&["#foo"]);
        reconciler.start(no_shutdown()).await.unwrap();
        reconciler.stop().await.unwrap();

        assert!(matches!(
            reconciler.stop().await.unwrap_err(),
            ReconcilerError::AlreadyStopped
        ));
        assert!(matches!(
            reconciler.start(no_shutdown()).await.unwrap_err(),
            ReconcilerError::AlreadyStarted
        ));
    }

    #[tokio::test]
    async fn test_session_connected_before_start_is_joined() {
        let (session, mut commands) = MemorySession::new("relay");
        session.connect().await.unwrap();
        assert_eq!(commands.recv().await, Some(SessionCommand::Connect));

        let reconciler = ChannelReconciler::new(
            ReconcilerConfig::new(vec![ChannelSpec::with_key("#foo", "k")]),
            session.clone(),
            Arc::new(ManualDelayer::new()),
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        reconciler.start(no_shutdown()).await.unwrap();

        assert_eq!(
            commands.recv().await,
            Some(SessionCommand::Join {
                channel: ChannelName::new("#foo"),
                key: Some("k".to_string()),
            })
        );
        reconciler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_timers() {
        let (reconciler, session, delayer, _commands) = reconciler(&["#foo", "#bar"]);
        let mut membership = reconciler.membership();
        reconciler.start(no_shutdown()).await.unwrap();

        session.connect().await.unwrap();
        membership
            .wait_for_status(&"#bar".into(), ChannelStatus::JoinPending)
            .await
            .unwrap();
        assert_eq!(delayer.pending(), 2);

        reconciler.stop().await.unwrap();

        assert_eq!(delayer.pending(), 0);
        assert_eq!(delayer.cancelled(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_signal_ends_worker() {
        let (reconciler, session, delayer, _commands) = reconciler(&["#foo"]);
        let mut membership = reconciler.membership();
        let (shutdown_tx, shutdown) = watch::channel(false);
        reconciler.start(shutdown).await.unwrap();

        session.connect().await.unwrap();
        membership
            .wait_for_status(&"#foo".into(), ChannelStatus::JoinPending)
            .await
            .unwrap();

        shutdown_tx.send(true).unwrap();
        let err = membership.wait_joined(&"#foo".into()).await.unwrap_err();
        assert!(matches!(err, ReconcilerError::NotRunning));
        assert_eq!(delayer.pending(), 0);

        reconciler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_unknown_channel_is_an_error() {
        let (reconciler, _session, _delayer, _commands) = reconciler(&["#foo"]);
        let mut membership = reconciler.membership();
        let err = membership.wait_joined(&"#bar".into()).await.unwrap_err();
        assert!(matches!(err, ReconcilerError::UnknownChannel(_)));
    }
}
