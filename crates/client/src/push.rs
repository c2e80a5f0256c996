//! Push queue and retry scheduler.
//!
//! Every accepted push gets a dispatch ref and lives in exactly one of two
//! maps until it is resolved:
//!
//! - `queued`: waiting for the socket or channel, or sent and awaiting a reply.
//! - `timeouts`: the channel reported a timeout and the push is waiting out
//!   its retry delay.
//!
//! Retry delays are counted in ticks. The runtime only ticks while
//! `timeouts` is non-empty.

use std::collections::BTreeMap;

use switchboard_shared::{Command, Push, RetryStrategy, Topic};
use tracing::debug;

use crate::model::Model;
use crate::socket::SocketState;

/// A push as tracked by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedPush {
    push: Push,
    dispatch_ref: u64,
    retry_strategy: RetryStrategy,
    timeout_tick: u64,
}

impl QueuedPush {
    fn new(push: Push, dispatch_ref: u64) -> Self {
        let retry_strategy = push.retry_strategy.clone();
        Self {
            push,
            dispatch_ref,
            retry_strategy,
            timeout_tick: 0,
        }
    }

    pub fn push(&self) -> &Push {
        &self.push
    }

    pub fn dispatch_ref(&self) -> u64 {
        self.dispatch_ref
    }

    /// Remaining strategy; `Backoff` loses a delay each time one is used.
    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    /// Ticks elapsed since the last timeout or retry.
    pub fn timeout_tick(&self) -> u64 {
        self.timeout_tick
    }

    fn is_due(&self) -> bool {
        self.retry_strategy
            .delay()
            .is_some_and(|delay| self.timeout_tick >= delay)
    }

    fn command(&self) -> Command {
        Command::Push {
            topic: self.push.topic.clone(),
            event: self.push.event.clone(),
            payload: self.push.payload.clone(),
            timeout: self.push.timeout,
            dispatch_ref: self.dispatch_ref,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PushQueue {
    push_count: u64,
    queued: BTreeMap<u64, QueuedPush>,
    timeouts: BTreeMap<u64, QueuedPush>,
}

impl PushQueue {
    /// Assign the next dispatch ref and queue the push.
    fn admit(&mut self, push: Push) -> u64 {
        self.push_count += 1;
        let dispatch_ref = self.push_count;
        self.queued
            .insert(dispatch_ref, QueuedPush::new(push, dispatch_ref));
        dispatch_ref
    }

    fn resolve(&mut self, dispatch_ref: u64) -> Option<QueuedPush> {
        self.queued.remove(&dispatch_ref)
    }

    fn park(&mut self, mut record: QueuedPush) {
        record.timeout_tick = 0;
        self.timeouts.insert(record.dispatch_ref, record);
    }

    fn refs_for_topic(&self, topic: &Topic) -> Vec<u64> {
        self.queued
            .values()
            .filter(|record| &record.push.topic == topic)
            .map(|record| record.dispatch_ref)
            .collect()
    }

    /// Advance every waiting push by one tick and move the due ones back
    /// into the queue. Returns their refs in ascending order.
    fn tick(&mut self) -> Vec<u64> {
        for record in self.timeouts.values_mut() {
            record.timeout_tick += 1;
        }

        let due: Vec<u64> = self
            .timeouts
            .values()
            .filter(|record| record.is_due())
            .map(|record| record.dispatch_ref)
            .collect();

        for dispatch_ref in &due {
            if let Some(mut record) = self.timeouts.remove(dispatch_ref) {
                record.retry_strategy.advance();
                record.timeout_tick = 0;
                self.queued.insert(*dispatch_ref, record);
            }
        }
        due
    }

    pub(crate) fn push_count(&self) -> u64 {
        self.push_count
    }

    pub(crate) fn queued(&self) -> impl Iterator<Item = &QueuedPush> {
        self.queued.values()
    }

    pub(crate) fn timeouts(&self) -> impl Iterator<Item = &QueuedPush> {
        self.timeouts.values()
    }

    pub(crate) fn queued_push(&self, dispatch_ref: u64) -> Option<&QueuedPush> {
        self.queued.get(&dispatch_ref)
    }

    pub(crate) fn timeout_push(&self, dispatch_ref: u64) -> Option<&QueuedPush> {
        self.timeouts.get(&dispatch_ref)
    }

    pub(crate) fn retry_pending(&self) -> bool {
        !self.timeouts.is_empty()
    }
}

impl Model {
    /// Queue a push and send it as soon as its channel allows.
    pub fn push(&mut self, push: Push) -> Vec<Command> {
        let dispatch_ref = self.pushes.admit(push);
        self.dispatch_if_connected(dispatch_ref)
    }

    /// Queue every push before dispatching any of them.
    ///
    /// Dispatch refs follow the order of `pushes`.
    pub fn push_all(&mut self, pushes: impl IntoIterator<Item = Push>) -> Vec<Command> {
        let refs: Vec<u64> = pushes
            .into_iter()
            .map(|push| self.pushes.admit(push))
            .collect();

        let mut commands = Vec::new();
        for dispatch_ref in refs {
            commands.extend(self.dispatch_if_connected(dispatch_ref));
        }
        commands
    }

    /// True while some push is waiting out a retry delay.
    pub fn retry_timer_active(&self) -> bool {
        self.pushes.retry_pending()
    }

    fn dispatch_if_connected(&mut self, dispatch_ref: u64) -> Vec<Command> {
        let Some(record) = self.pushes.queued_push(dispatch_ref) else {
            return Vec::new();
        };
        let topic = record.push.topic.clone();

        match self.socket.state {
            SocketState::Open if self.channels.is_joined(topic.as_str()) => {
                debug!(%topic, dispatch_ref, "sending push");
                vec![record.command()]
            }
            SocketState::Open if self.channels.is_being_joined(topic.as_str()) => Vec::new(),
            SocketState::Open => self.join(topic),
            SocketState::Opening => {
                self.channels.begin_joining(&topic);
                Vec::new()
            }
            SocketState::Disconnected => {
                self.channels.begin_joining(&topic);
                vec![self.open_socket()]
            }
        }
    }

    /// Send every queued push for `topic`, oldest first.
    pub(crate) fn send_queued_pushes_by_topic(&mut self, topic: &Topic) -> Vec<Command> {
        let mut commands = Vec::new();
        for dispatch_ref in self.pushes.refs_for_topic(topic) {
            commands.extend(self.dispatch_if_connected(dispatch_ref));
        }
        commands
    }

    /// Resolve a push on `PushOk` / `PushError`. Returns the application ref.
    pub(crate) fn on_push_reply(&mut self, dispatch_ref: u64) -> Option<String> {
        self.pushes
            .resolve(dispatch_ref)
            .and_then(|record| record.push.r#ref)
    }

    /// Resolve a push on `PushTimeout` and park it for retry unless its
    /// strategy is `Drop`. Returns the application ref.
    pub(crate) fn on_push_timeout(&mut self, dispatch_ref: u64) -> Option<String> {
        let record = self.pushes.resolve(dispatch_ref)?;
        let app_ref = record.push.r#ref.clone();

        if record.retry_strategy.is_drop() {
            debug!(dispatch_ref, "push timed out, dropping");
        } else {
            debug!(
                dispatch_ref,
                strategy = ?record.retry_strategy,
                "push timed out, scheduling retry"
            );
            self.pushes.park(record);
        }
        app_ref
    }

    pub(crate) fn on_retry_tick(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        for dispatch_ref in self.pushes.tick() {
            debug!(dispatch_ref, "retrying push");
            commands.extend(self.dispatch_if_connected(dispatch_ref));
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use switchboard_shared::InboundEvent;

    use crate::reconciler::Msg;

    fn joined_model(topic: &str) -> Model {
        let mut model = Model::default();
        model.join(topic);
        model.update(Msg::Gateway(InboundEvent::socket("Opened", Value::Null)));
        model.update(Msg::Gateway(InboundEvent::channel(topic, "JoinOk", json!({}))));
        model
    }

    fn timeout(model: &mut Model, topic: &str, dispatch_ref: u64) {
        model.update(Msg::Gateway(InboundEvent::channel(
            topic,
            "PushTimeout",
            json!({ "event": "msg", "payload": {}, "ref": dispatch_ref }),
        )));
    }

    fn push_refs(commands: &[Command]) -> Vec<u64> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Push { dispatch_ref, .. } => Some(*dispatch_ref),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn dispatch_refs_increase() {
        let mut model = Model::default();
        model.push(Push::new("room:1", "a"));
        model.push_all([Push::new("room:2", "b"), Push::new("room:1", "c")]);
        model.push(Push::new("room:3", "d"));

        let refs: Vec<u64> = model.queued_pushes().map(QueuedPush::dispatch_ref).collect();
        assert_eq!(refs, vec![1, 2, 3, 4]);
        assert_eq!(model.push_count(), 4);
    }

    #[test]
    fn push_to_joined_channel_is_sent_and_stays_queued() {
        let mut model = joined_model("room:1");
        let commands = model.push(Push::new("room:1", "msg").with_timeout(3_000));

        assert_eq!(
            commands,
            vec![Command::Push {
                topic: Topic::from("room:1"),
                event: "msg".into(),
                payload: json!({}),
                timeout: Some(3_000),
                dispatch_ref: 1,
            }]
        );
        assert!(model.queued_push(1).is_some());
    }

    #[test]
    fn push_to_unknown_channel_while_open_joins() {
        let mut model = joined_model("room:1");
        let commands = model.push(Push::new("room:2", "msg"));
        assert!(matches!(commands.as_slice(), [Command::Join { topic, .. }] if topic.as_str() == "room:2"));
        assert!(model.is_being_joined("room:2"));

        assert!(model.push(Push::new("room:2", "msg")).is_empty());
    }

    #[test]
    fn push_all_connects_once() {
        let mut model = Model::default();
        let commands = model.push_all([
            Push::new("room:1", "a"),
            Push::new("room:1", "b"),
            Push::new("room:2", "c"),
        ]);

        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Command::Connect { .. }));
        assert!(model.is_being_joined("room:1"));
        assert!(model.is_being_joined("room:2"));
        assert_eq!(model.queued_pushes().count(), 3);
    }

    #[test]
    fn push_ok_resolves_with_application_ref() {
        let mut model = joined_model("room:1");
        model.push(Push::new("room:1", "msg").with_ref("client-9"));

        assert_eq!(model.on_push_reply(1), Some("client-9".into()));
        assert!(model.queued_push(1).is_none());
        assert_eq!(model.on_push_reply(1), None);
    }

    #[test]
    fn drop_strategy_never_retries() {
        let mut model = joined_model("room:1");
        model.push(Push::new("room:1", "msg"));
        timeout(&mut model, "room:1", 1);

        assert!(model.queued_push(1).is_none());
        assert!(model.timeout_push(1).is_none());
        assert!(!model.retry_timer_active());
        for _ in 0..10 {
            assert!(model.update(Msg::RetryTick).is_empty());
        }
    }

    #[test]
    fn every_strategy_retries_on_schedule() {
        let mut model = joined_model("room:1");
        model.push(Push::new("room:1", "msg").with_retry_strategy(RetryStrategy::Every(2)));

        for _ in 0..3 {
            timeout(&mut model, "room:1", 1);
            assert!(model.retry_timer_active());
            assert!(model.update(Msg::RetryTick).is_empty());
            assert_eq!(model.timeout_push(1).map(QueuedPush::timeout_tick), Some(1));
            assert_eq!(push_refs(&model.update(Msg::RetryTick)), vec![1]);
            assert!(!model.retry_timer_active());
            assert!(model.queued_push(1).is_some());
        }
    }

    #[test]
    fn backoff_strategy_uses_delays_then_max() {
        let mut model = joined_model("room:1");
        model.push(Push::new("room:1", "msg").with_retry_strategy(RetryStrategy::Backoff {
            delays: vec![1, 3],
            max: 10,
        }));

        let mut waits = Vec::new();
        for _ in 0..4 {
            timeout(&mut model, "room:1", 1);
            let mut ticks = 0;
            loop {
                ticks += 1;
                if !push_refs(&model.update(Msg::RetryTick)).is_empty() {
                    break;
                }
            }
            waits.push(ticks);
        }
        assert_eq!(waits, vec![1, 3, 10, 10]);
    }

    #[test]
    fn zero_delay_retries_on_first_tick() {
        let mut model = joined_model("room:1");
        model.push(Push::new("room:1", "msg").with_retry_strategy(RetryStrategy::Every(0)));
        timeout(&mut model, "room:1", 1);
        assert_eq!(push_refs(&model.update(Msg::RetryTick)), vec![1]);
    }

    #[test]
    fn retry_after_channel_left_rejoins() {
        let mut model = joined_model("room:1");
        model.push(Push::new("room:1", "msg").with_retry_strategy(RetryStrategy::Every(1)));
        timeout(&mut model, "room:1", 1);
        model.update(Msg::Gateway(InboundEvent::channel("room:1", "LeaveOk", Value::Null)));

        let commands = model.update(Msg::RetryTick);
        assert!(matches!(commands.as_slice(), [Command::Join { .. }]));
        assert!(model.queued_push(1).is_some());

        let commands = model.update(Msg::Gateway(InboundEvent::channel("room:1", "JoinOk", json!({}))));
        assert_eq!(push_refs(&commands), vec![1]);
    }

    #[test]
    fn retry_while_disconnected_reconnects() {
        let mut model = joined_model("room:1");
        model.leave("room:1");
        model.update(Msg::Gateway(InboundEvent::channel("room:1", "LeaveOk", Value::Null)));
        model.push(Push::new("room:1", "msg").with_retry_strategy(RetryStrategy::Every(1)));
        timeout(&mut model, "room:1", 1);
        model.update(Msg::Gateway(InboundEvent::socket("Closed", Value::Null)));

        let commands = model.update(Msg::RetryTick);
        assert!(matches!(commands.as_slice(), [Command::Connect { .. }]));
        assert_eq!(model.socket_state(), SocketState::Opening);
        assert!(model.is_being_joined("room:1"));
    }
}
