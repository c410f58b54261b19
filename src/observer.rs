//! Output notification - callback and channel subscribers

use crossbeam::channel::{unbounded, Receiver, Sender};

pub type SubscriptionId = u64;

enum Listener {
    Callback(Box<dyn FnMut(f64) + Send>),
    Channel(Sender<f64>),
}

/// Registry of subscribers to the controller's "output" notifications.
///
/// Callbacks run synchronously inside the tick, with the controller's lock
/// held when a loop driver is ticking it. They must not lock the shared
/// controller. Subscribers doing slow work, or feeding the output back into
/// the controller, should take a channel and consume it elsewhere.
#[derive(Default)]
pub struct OutputBus {
    next_id: SubscriptionId,
    listeners: Vec<(SubscriptionId, Listener)>,
}

impl OutputBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.register(Listener::Callback(Box::new(callback)))
    }

    /// Subscribes through an unbounded channel. Sending never blocks the tick.
    pub fn subscribe_channel(&mut self) -> (SubscriptionId, Receiver<f64>) {
        let (tx, rx) = unbounded();
        (self.register(Listener::Channel(tx)), rx)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn emit(&mut self, output: f64) {
        // Channels whose receiver is gone are dropped here
        self.listeners.retain_mut(|(_, listener)| match listener {
            Listener::Callback(callback) => {
                callback(output);
                true
            }
            Listener::Channel(tx) => tx.send(output).is_ok(),
        });
    }

    fn register(&mut self, listener: Listener) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }
}

impl std::fmt::Debug for OutputBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBus")
            .field("subscribers", &self.listeners.len())
            .finish()
    }
}
