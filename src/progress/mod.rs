//! Progress event bus
//!
//! One bounded channel per execution id. The executing pipeline publishes a
//! step label when it enters each node and a terminal event when it finishes;
//! a single subscriber drains the channel as a stream.
//!
//! Cleanup is lease-based: a claimed channel is removed by its subscription
//! when the stream ends or is dropped; an unclaimed channel is removed by the
//! execution's [`ExecutionGuard`] once the subscription horizon has passed.

use async_stream::stream;
use dashmap::DashMap;
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::ProgressConfig;

/// Label carried by the terminal event
pub const DONE_LABEL: &str = "done";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub execution_id: String,
    pub step_label: String,
    pub terminal: bool,
}

impl ProgressEvent {
    pub fn step(execution_id: impl Into<String>, step_label: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_label: step_label.into(),
            terminal: false,
        }
    }

    pub fn terminal(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_label: DONE_LABEL.to_string(),
            terminal: true,
        }
    }
}

struct Channel {
    sender: mpsc::Sender<ProgressEvent>,
    /// Taken by the first subscriber
    receiver: Mutex<Option<mpsc::Receiver<ProgressEvent>>>,
}

impl Channel {
    fn new(capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Arc::new(Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    fn is_claimed(&self) -> bool {
        self.receiver.lock().is_none()
    }
}

type Registry = Arc<DashMap<String, Arc<Channel>>>;

/// Registry of per-execution progress channels
#[derive(Clone)]
pub struct ProgressEventBus {
    channels: Registry,
    capacity: usize,
    poll_interval: Duration,
    max_empty_polls: u32,
}

impl ProgressEventBus {
    pub fn new(capacity: usize, poll_interval: Duration, max_empty_polls: u32) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
            poll_interval,
            max_empty_polls: max_empty_polls.max(1),
        }
    }

    pub fn from_config(config: &ProgressConfig) -> Self {
        Self::new(
            config.channel_capacity,
            config.poll_interval(),
            config.max_empty_polls,
        )
    }

    /// Create the channel for `execution_id`; false if it already exists
    pub fn create(&self, execution_id: &str) -> bool {
        match self.channels.entry(execution_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Channel::new(self.capacity));
                true
            }
        }
    }

    /// Non-blocking publish; dropped when there is no channel or it is full
    pub fn publish(&self, execution_id: &str, event: ProgressEvent) {
        let Some(channel) = self.channels.get(execution_id).map(|c| Arc::clone(&c)) else {
            tracing::trace!("No progress channel for {}, dropping event", execution_id);
            return;
        };

        if let Err(e) = channel.sender.try_send(event) {
            tracing::debug!("Progress event for {} dropped: {}", execution_id, e);
        }
    }

    /// Stream the events of `execution_id`, always ending with one terminal event
    ///
    /// Creates the channel when absent so an execution started later with the
    /// same id is observed. Each poll waits up to the poll interval; after
    /// `max_empty_polls` consecutive empty polls the stream ends.
    pub fn subscribe(&self, execution_id: &str) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let channel = Arc::clone(
            self.channels
                .entry(execution_id.to_string())
                .or_insert_with(|| Channel::new(self.capacity))
                .value(),
        );
        let receiver = channel.receiver.lock().take();

        let lease = receiver.as_ref().map(|_| SubscriptionLease {
            channels: Arc::clone(&self.channels),
            execution_id: execution_id.to_string(),
            channel: Arc::clone(&channel),
        });

        let execution_id = execution_id.to_string();
        let poll_interval = self.poll_interval;
        let max_empty_polls = self.max_empty_polls;

        stream! {
            let _lease = lease;

            let Some(mut receiver) = receiver else {
                tracing::warn!("Progress channel {} already has a subscriber", execution_id);
                yield ProgressEvent::terminal(execution_id.clone());
                return;
            };

            let mut empty_polls = 0u32;
            loop {
                match tokio::time::timeout(poll_interval, receiver.recv()).await {
                    Ok(Some(event)) if event.terminal => {
                        yield event;
                        break;
                    }
                    Ok(Some(event)) => {
                        empty_polls = 0;
                        yield event;
                    }
                    Ok(None) => {
                        yield ProgressEvent::terminal(execution_id.clone());
                        break;
                    }
                    Err(_) => {
                        empty_polls += 1;
                        if empty_polls >= max_empty_polls {
                            tracing::debug!(
                                "Progress subscription {} timed out after {} empty polls",
                                execution_id,
                                empty_polls
                            );
                            yield ProgressEvent::terminal(execution_id.clone());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Start publishing for an execution; the guard emits the terminal event on drop
    pub fn begin(&self, execution_id: &str) -> ExecutionGuard {
        self.create(execution_id);
        ExecutionGuard {
            bus: self.clone(),
            execution_id: execution_id.to_string(),
        }
    }

    pub fn has_channel(&self, execution_id: &str) -> bool {
        self.channels.contains_key(execution_id)
    }

    pub fn active_channels(&self) -> usize {
        self.channels.len()
    }

    /// How long a subscriber may wait on an idle channel
    pub fn subscription_horizon(&self) -> Duration {
        self.poll_interval * self.max_empty_polls
    }
}

/// Removes a claimed channel when its subscription stream ends or is dropped
struct SubscriptionLease {
    channels: Registry,
    execution_id: String,
    channel: Arc<Channel>,
}

impl Drop for SubscriptionLease {
    fn drop(&mut self) {
        self.channels
            .remove_if(&self.execution_id, |_, current| Arc::ptr_eq(current, &self.channel));
    }
}

/// Held by an execution; publishes the terminal event on every exit path
pub struct ExecutionGuard {
    bus: ProgressEventBus,
    execution_id: String,
}

impl ExecutionGuard {
    pub fn publish_step(&self, step_label: &str) {
        self.bus
            .publish(&self.execution_id, ProgressEvent::step(&self.execution_id, step_label));
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.bus
            .publish(&self.execution_id, ProgressEvent::terminal(&self.execution_id));

        let Some(channel) = self
            .bus
            .channels
            .get(&self.execution_id)
            .map(|c| Arc::clone(&c))
        else {
            return;
        };
        if channel.is_claimed() {
            return;
        }

        // Unclaimed: give a late subscriber the usual horizon to pick up the
        // buffered events, then drop the channel if nobody did
        let channels = Arc::clone(&self.bus.channels);
        let execution_id = self.execution_id.clone();
        let remove = move || {
            channels.remove_if(&execution_id, |_, current| {
                Arc::ptr_eq(current, &channel) && !current.is_claimed()
            });
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let horizon = self.bus.subscription_horizon();
                handle.spawn(async move {
                    tokio::time::sleep(horizon).await;
                    remove();
                });
            }
            Err(_) => remove(),
        }
    }
}
