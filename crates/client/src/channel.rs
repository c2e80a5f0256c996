//! Channel membership: which topics are being joined, which are joined, and
//! the configuration used to join each one.

use std::collections::{BTreeSet, HashMap};

use switchboard_shared::{Command, JoinConfig, Topic};
use tracing::debug;

use crate::model::Model;
use crate::socket::SocketState;

/// Two disjoint topic sets plus join configurations keyed by topic.
#[derive(Debug, Clone, Default)]
pub(crate) struct Membership {
    being_joined: BTreeSet<Topic>,
    joined: BTreeSet<Topic>,
    configs: HashMap<Topic, JoinConfig>,
}

impl Membership {
    pub(crate) fn being_joined(&self) -> impl Iterator<Item = &Topic> {
        self.being_joined.iter()
    }

    pub(crate) fn joined(&self) -> impl Iterator<Item = &Topic> {
        self.joined.iter()
    }

    pub(crate) fn is_joined(&self, topic: &str) -> bool {
        self.joined.contains(topic)
    }

    pub(crate) fn is_being_joined(&self, topic: &str) -> bool {
        self.being_joined.contains(topic)
    }

    /// Mark `topic` as pending. A joined topic moves back to pending and
    /// stays there until the next `JoinOk`.
    pub(crate) fn begin_joining(&mut self, topic: &Topic) {
        self.joined.remove(topic);
        self.being_joined.insert(topic.clone());
    }

    pub(crate) fn mark_joined(&mut self, topic: &Topic) {
        self.being_joined.remove(topic);
        self.joined.insert(topic.clone());
    }

    pub(crate) fn mark_left(&mut self, topic: &Topic) -> bool {
        self.joined.remove(topic)
    }

    pub(crate) fn config(&self, topic: &str) -> Option<&JoinConfig> {
        self.configs.get(topic)
    }

    pub(crate) fn insert_config(&mut self, config: JoinConfig) {
        self.configs.insert(config.topic.clone(), config);
    }

    /// Stored config for `topic`, creating an empty one on first use.
    pub(crate) fn config_or_default(&mut self, topic: &Topic) -> &JoinConfig {
        self.configs
            .entry(topic.clone())
            .or_insert_with(|| JoinConfig::new(topic.clone()))
    }
}

impl Model {
    /// Register how `config.topic` should be joined. Last write wins.
    pub fn add_join_config(&mut self, config: JoinConfig) {
        debug!(topic = %config.topic, "join config stored");
        self.channels.insert_config(config);
    }

    /// Join a topic, connecting first if needed. Joining a topic that is
    /// already joined sends the join again.
    pub fn join(&mut self, topic: impl Into<Topic>) -> Vec<Command> {
        let topic = topic.into();
        self.channels.begin_joining(&topic);
        match self.socket.state {
            SocketState::Open => self.join_command(&topic),
            SocketState::Opening => Vec::new(),
            SocketState::Disconnected => self.connect(),
        }
    }

    /// Leave a topic. Queued and retrying pushes for it are kept.
    pub fn leave(&mut self, topic: impl Into<Topic>) -> Vec<Command> {
        let topic = topic.into();
        debug!(%topic, "leaving channel");
        vec![Command::Leave { topic }]
    }

    pub fn on(&mut self, topic: impl Into<Topic>, event: impl Into<String>) -> Vec<Command> {
        vec![Command::On {
            topic: topic.into(),
            event: event.into(),
        }]
    }

    pub fn all_on<I, S>(&mut self, topic: impl Into<Topic>, events: I) -> Vec<Command>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        vec![Command::AllOn {
            topic: topic.into(),
            events: events.into_iter().map(Into::into).collect(),
        }]
    }

    pub fn off(&mut self, topic: impl Into<Topic>, event: impl Into<String>) -> Vec<Command> {
        vec![Command::Off {
            topic: topic.into(),
            event: event.into(),
        }]
    }

    pub fn all_off<I, S>(&mut self, topic: impl Into<Topic>, events: I) -> Vec<Command>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        vec![Command::AllOff {
            topic: topic.into(),
            events: events.into_iter().map(Into::into).collect(),
        }]
    }

    pub(crate) fn join_command(&mut self, topic: &Topic) -> Vec<Command> {
        let config = self.channels.config_or_default(topic);
        debug!(%topic, "joining channel");

        let mut commands = vec![Command::Join {
            topic: topic.clone(),
            payload: config.payload.clone(),
            timeout: config.timeout,
        }];
        if !config.events.is_empty() {
            commands.push(Command::AllOn {
                topic: topic.clone(),
                events: config.events.clone(),
            });
        }
        commands
    }

    pub(crate) fn on_join_ok(&mut self, topic: &Topic) -> Vec<Command> {
        debug!(%topic, "joined channel");
        self.channels.mark_joined(topic);
        self.send_queued_pushes_by_topic(topic)
    }

    pub(crate) fn on_leave_ok(&mut self, topic: &Topic) {
        if self.channels.mark_left(topic) {
            debug!(%topic, "left channel");
        }
    }
}
