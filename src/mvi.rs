//! Unidirectional screen runtime.
//!
//! A [`Store`] owns one screen's state. Intents are handed to the screen's
//! [`Screen::handle`], which may run concurrently with other intents and emits
//! partial changes through a [`ChangeSink`]. A single fold task applies the
//! changes one at a time, publishes the new state and queues any one-shot
//! effects derived from each change.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info};

pub const DEFAULT_EFFECT_BUFFER: usize = 64;

const TRACE_TARGET: &str = "notekeeper::mvi";

/// A named state transition. `reduce` must be total: it is applied on the
/// fold task and a panic there ends the screen's state stream.
pub trait PartialChange<S>: Debug + Send + 'static {
    fn reduce(self, state: &S) -> S;
}

#[async_trait]
pub trait Screen: Send + Sync + 'static {
    const NAME: &'static str;

    type Intent: Debug + Send + 'static;
    type State: Debug + Clone + Send + Sync + 'static;
    type Change: PartialChange<Self::State>;
    type Effect: Debug + Send + 'static;

    /// Expands one intent into zero or more changes. Failures must be turned
    /// into changes here; nothing returned from this call reaches the fold.
    async fn handle(
        &self,
        intent: Self::Intent,
        state: StateView<Self::State>,
        changes: ChangeSink<Self::Change>,
    );

    fn side_effects(&self, change: &Self::Change) -> Vec<Self::Effect>;
}

/// Read access to the latest folded state from inside an intent expansion.
pub struct StateView<S> {
    rx: watch::Receiver<S>,
}

impl<S: Clone> StateView<S> {
    pub fn current(&self) -> S {
        self.rx.borrow().clone()
    }
}

pub struct ChangeSink<C> {
    tx: mpsc::UnboundedSender<C>,
}

impl<C> ChangeSink<C> {
    /// Returns `false` once the store has shut down and the change was dropped.
    pub fn emit(&self, change: C) -> bool {
        self.tx.send(change).is_ok()
    }

}

/// Hook called at each pipeline stage.
pub trait Observer<S: Screen>: Send + Sync {
    fn intent(&self, _intent: &S::Intent) {}
    fn change(&self, _change: &S::Change) {}
    fn state(&self, _state: &S::State) {}
    fn effect(&self, _effect: &S::Effect) {}
}

pub struct TracingObserver;

impl<S: Screen> Observer<S> for TracingObserver {
    fn intent(&self, intent: &S::Intent) {
        debug!(target: TRACE_TARGET, screen = S::NAME, ?intent, "intent");
    }

    fn change(&self, change: &S::Change) {
        debug!(target: TRACE_TARGET, screen = S::NAME, ?change, "partial change");
    }

    fn state(&self, state: &S::State) {
        debug!(target: TRACE_TARGET, screen = S::NAME, ?state, "updated state");
    }

    fn effect(&self, effect: &S::Effect) {
        debug!(target: TRACE_TARGET, screen = S::NAME, ?effect, "side effect");
    }
}

pub struct StoreOptions<S: Screen> {
    effect_buffer: usize,
    observers: Vec<Box<dyn Observer<S>>>,
}

impl<S: Screen> Default for StoreOptions<S> {
    fn default() -> Self {
        Self {
            effect_buffer: DEFAULT_EFFECT_BUFFER,
            observers: vec![Box::new(TracingObserver)],
        }
    }
}

impl<S: Screen> StoreOptions<S> {
    /// Number of effects held while nobody drains them. A full buffer
    /// suspends the fold until the subscriber catches up.
    pub fn effect_buffer(mut self, capacity: usize) -> Self {
        self.effect_buffer = capacity.max(1);
        self
    }

    pub fn observer(mut self, observer: impl Observer<S> + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }
}

type Observers<S> = Arc<[Box<dyn Observer<S>>]>;

pub struct Store<S: Screen> {
    intents: mpsc::UnboundedSender<S::Intent>,
    state: watch::Receiver<S::State>,
    effects: Mutex<mpsc::Receiver<S::Effect>>,
    tasks: [JoinHandle<()>; 2],
}

impl<S: Screen> Store<S> {
    /// Starts the pipeline on the current tokio runtime.
    pub fn new(screen: S, initial: S::State) -> Self {
        Self::with_options(screen, initial, StoreOptions::default())
    }

    pub fn with_options(screen: S, initial: S::State, options: StoreOptions<S>) -> Self {
        let screen = Arc::new(screen);
        let observers: Observers<S> = options.observers.into();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let (effect_tx, effect_rx) = mpsc::channel(options.effect_buffer);

        let intake = tokio::spawn(expand_intents(
            Arc::clone(&screen),
            Arc::clone(&observers),
            intent_rx,
            state_rx.clone(),
            change_tx,
        ));
        let fold = tokio::spawn(fold_changes(
            screen, observers, change_rx, state_tx, effect_tx,
        ));

        info!(screen = S::NAME, "Screen store started");
        Self {
            intents: intent_tx,
            state: state_rx,
            effects: Mutex::new(effect_rx),
            tasks: [intake, fold],
        }
    }

    /// Hands the intent to the pipeline and returns immediately. Ignored once
    /// the store has shut down.
    pub fn process_intent(&self, intent: S::Intent) {
        if let Err(rejected) = self.intents.send(intent) {
            debug!(screen = S::NAME, intent = ?rejected.0, "Store shut down, intent ignored");
        }
    }

    pub fn state(&self) -> S::State {
        self.state.borrow().clone()
    }

    /// A receiver that starts at the current state and sees every later one.
    pub fn subscribe(&self) -> watch::Receiver<S::State> {
        self.state.clone()
    }

    /// Next queued effect, in emission order. Each effect is handed out once.
    pub async fn next_effect(&self) -> Option<S::Effect> {
        self.effects.lock().await.recv().await
    }

    pub fn try_next_effect(&self) -> Option<S::Effect> {
        self.effects.try_lock().ok()?.try_recv().ok()
    }

    /// Cancels in-flight expansions and the fold. No state or effect is
    /// produced afterwards.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.intents.is_closed()
    }
}

impl<S: Screen> Drop for Store<S> {
    fn drop(&mut self) {
        self.shutdown();
        debug!(screen = S::NAME, "Screen store dropped");
    }
}

/// Folds `changes` onto `initial` in order, the same way the store does.
pub fn replay<S, C>(initial: S, changes: impl IntoIterator<Item = C>) -> S
where
    C: PartialChange<S>,
{
    changes
        .into_iter()
        .fold(initial, |state, change| change.reduce(&state))
}

async fn expand_intents<S: Screen>(
    screen: Arc<S>,
    observers: Observers<S>,
    mut intents: mpsc::UnboundedReceiver<S::Intent>,
    state: watch::Receiver<S::State>,
    changes: mpsc::UnboundedSender<S::Change>,
) {
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            intent = intents.recv() => {
                let Some(intent) = intent else {
                    break;
                };
                for observer in observers.iter() {
                    observer.intent(&intent);
                }
                let screen = Arc::clone(&screen);
                let view = StateView { rx: state.clone() };
                let sink = ChangeSink { tx: changes.clone() };
                in_flight.spawn(async move { screen.handle(intent, view, sink).await });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                report_expansion::<S>(joined);
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        report_expansion::<S>(joined);
    }
}

fn report_expansion<S: Screen>(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!(screen = S::NAME, error = %err, "Intent expansion panicked");
        }
    }
}

async fn fold_changes<S: Screen>(
    screen: Arc<S>,
    observers: Observers<S>,
    mut changes: mpsc::UnboundedReceiver<S::Change>,
    state: watch::Sender<S::State>,
    effects: mpsc::Sender<S::Effect>,
) {
    while let Some(change) = changes.recv().await {
        for observer in observers.iter() {
            observer.change(&change);
        }
        let derived = screen.side_effects(&change);

        state.send_modify(|current| {
            let next = change.reduce(current);
            *current = next;
        });
        {
            let current = state.borrow();
            for observer in observers.iter() {
                observer.state(&current);
            }
        }

        for effect in derived {
            for observer in observers.iter() {
                observer.effect(&effect);
            }
            if effects.send(effect).await.is_err() {
                debug!(screen = S::NAME, "Effect receiver gone");
            }
        }
    }
}
