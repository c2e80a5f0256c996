//! Async runtime around a [`Model`].
//!
//! One tokio task owns the model and serialises everything that touches it:
//! gateway events, application requests and retry ticks. Commands produced by
//! the model are wrapped in an [`Envelope`] and handed to the transport; every
//! classified gateway event is broadcast to subscribers.

use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use serde_json::Value;
use switchboard_shared::{
    Command, ConnectOption, Envelope, InboundEvent, JoinConfig, OutboundMessage, Push, Topic,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event::ClientEvent;
use crate::model::Model;
use crate::reconciler::Msg;

/// Broadcast stream of classified gateway events.
pub type EventStream = broadcast::Receiver<ClientEvent>;

/// Socket diagnostics the application can ask the transport for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoRequest {
    ConnectionState,
    EndPointUrl,
    HasLogger,
    IsConnected,
    MakeRef,
    Protocol,
    Info,
}

#[derive(Debug)]
enum Request {
    Connect,
    Disconnect(Option<u16>),
    SetConnectOptions(Vec<ConnectOption>),
    AddConnectOptions(Vec<ConnectOption>),
    SetConnectParams(Value),
    AddJoinConfig(JoinConfig),
    Join(Topic),
    Leave(Topic),
    On { topic: Topic, event: String },
    AllOn { topic: Topic, events: Vec<String> },
    Off { topic: Topic, event: String },
    AllOff { topic: Topic, events: Vec<String> },
    Push(Push),
    PushAll(Vec<Push>),
    Info(InfoRequest),
    Snapshot(oneshot::Sender<Model>),
    Shutdown,
}

/// The engine's side of the gateway.
pub struct GatewayBindings {
    inbound: UnboundedReceiver<InboundEvent>,
    outbound: UnboundedSender<Envelope<OutboundMessage>>,
}

impl GatewayBindings {
    pub fn new(
        inbound: UnboundedReceiver<InboundEvent>,
        outbound: UnboundedSender<Envelope<OutboundMessage>>,
    ) -> Self {
        Self { inbound, outbound }
    }

    /// Create connected bindings: the engine side and the transport side.
    pub fn pair() -> (Self, GatewayPeer) {
        let (event_tx, event_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        (
            Self::new(event_rx, command_tx),
            GatewayPeer {
                events: event_tx,
                commands: command_rx,
            },
        )
    }
}

/// The transport's side of the gateway.
pub struct GatewayPeer {
    events: UnboundedSender<InboundEvent>,
    commands: UnboundedReceiver<Envelope<OutboundMessage>>,
}

impl GatewayPeer {
    /// Deliver an event to the engine.
    pub fn send(&self, event: InboundEvent) -> Result<()> {
        self.events
            .unbounded_send(event)
            .map_err(|_| ClientError::RuntimeStopped)
    }

    /// Next command for the transport to execute; `None` once the runtime has stopped.
    pub async fn next_command(&mut self) -> Option<Envelope<OutboundMessage>> {
        self.commands.next().await
    }

    /// Close the inbound side, which stops the runtime.
    pub fn close(&self) {
        self.events.close_channel();
    }
}

/// Cloneable handle for talking to a running client.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientHandle {
    /// Subscribe to classified gateway events.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    pub async fn connect(&self) -> Result<()> {
        self.send(Request::Connect).await
    }

    pub async fn disconnect(&self, code: Option<u16>) -> Result<()> {
        self.send(Request::Disconnect(code)).await
    }

    pub async fn set_connect_options(&self, options: Vec<ConnectOption>) -> Result<()> {
        self.send(Request::SetConnectOptions(options)).await
    }

    pub async fn add_connect_options(&self, options: Vec<ConnectOption>) -> Result<()> {
        self.send(Request::AddConnectOptions(options)).await
    }

    pub async fn set_connect_params(&self, params: Value) -> Result<()> {
        self.send(Request::SetConnectParams(params)).await
    }

    pub async fn add_join_config(&self, config: JoinConfig) -> Result<()> {
        self.send(Request::AddJoinConfig(config)).await
    }

    pub async fn join(&self, topic: impl Into<Topic>) -> Result<()> {
        self.send(Request::Join(topic.into())).await
    }

    pub async fn leave(&self, topic: impl Into<Topic>) -> Result<()> {
        self.send(Request::Leave(topic.into())).await
    }

    pub async fn on(&self, topic: impl Into<Topic>, event: impl Into<String>) -> Result<()> {
        self.send(Request::On {
            topic: topic.into(),
            event: event.into(),
        })
        .await
    }

    pub async fn all_on(&self, topic: impl Into<Topic>, events: Vec<String>) -> Result<()> {
        self.send(Request::AllOn {
            topic: topic.into(),
            events,
        })
        .await
    }

    pub async fn off(&self, topic: impl Into<Topic>, event: impl Into<String>) -> Result<()> {
        self.send(Request::Off {
            topic: topic.into(),
            event: event.into(),
        })
        .await
    }

    pub async fn all_off(&self, topic: impl Into<Topic>, events: Vec<String>) -> Result<()> {
        self.send(Request::AllOff {
            topic: topic.into(),
            events,
        })
        .await
    }

    pub async fn push(&self, push: Push) -> Result<()> {
        self.send(Request::Push(push)).await
    }

    pub async fn push_all(&self, pushes: Vec<Push>) -> Result<()> {
        self.send(Request::PushAll(pushes)).await
    }

    pub async fn request_info(&self, request: InfoRequest) -> Result<()> {
        self.send(Request::Info(request)).await
    }

    /// Copy of the model as of the moment the runtime handles this request.
    pub async fn snapshot(&self) -> Result<Model> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Request::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| ClientError::RuntimeStopped)
    }

    /// Ask the runtime to stop. The join handle resolves to the final model.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Request::Shutdown).await
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ClientError::RuntimeStopped)
    }
}

/// Start the runtime on the current tokio runtime.
///
/// The task ends on [`ClientHandle::shutdown`], when every handle is dropped
/// or when the gateway's inbound side closes.
pub fn spawn(
    model: Model,
    bindings: GatewayBindings,
    config: &ClientConfig,
) -> (ClientHandle, JoinHandle<Model>) {
    let (request_tx, request_rx) = mpsc::channel(config.request_buffer.max(1));
    let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));

    let task = tokio::spawn(run(
        model,
        bindings,
        request_rx,
        event_tx.clone(),
        config.tick_interval,
    ));

    (
        ClientHandle {
            requests: request_tx,
            events: event_tx,
        },
        task,
    )
}

async fn run(
    mut model: Model,
    bindings: GatewayBindings,
    mut requests: mpsc::Receiver<Request>,
    events: broadcast::Sender<ClientEvent>,
    tick_interval: Duration,
) -> Model {
    let GatewayBindings {
        mut inbound,
        outbound,
    } = bindings;
    let mut ticker = retry_ticker(tick_interval);
    let mut ticking = false;

    info!("client runtime started");
    loop {
        let active = model.retry_timer_active();
        if active && !ticking {
            ticker.reset();
        }
        ticking = active;

        tokio::select! {
            event = inbound.next() => match event {
                Some(event) => {
                    let commands = model.update(Msg::Gateway(event));
                    forward(&outbound, commands);
                    if let Some(classified) = model.last_message() {
                        let _ = events.send(classified.clone());
                    }
                }
                None => {
                    info!("gateway closed");
                    break;
                }
            },
            request = requests.recv() => match request {
                Some(Request::Shutdown) | None => {
                    info!("shutdown requested");
                    break;
                }
                Some(request) => {
                    let commands = handle_request(&mut model, request);
                    forward(&outbound, commands);
                }
            },
            _ = ticker.tick(), if ticking => {
                let commands = model.update(Msg::RetryTick);
                forward(&outbound, commands);
            }
        }
    }
    info!("client runtime stopped");
    model
}

/// First tick lands one full period after the last reset.
fn retry_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn handle_request(model: &mut Model, request: Request) -> Vec<Command> {
    match request {
        Request::Connect => model.connect(),
        Request::Disconnect(code) => model.disconnect(code),
        Request::SetConnectOptions(options) => {
            model.set_connect_options(options);
            Vec::new()
        }
        Request::AddConnectOptions(options) => {
            model.add_connect_options(options);
            Vec::new()
        }
        Request::SetConnectParams(params) => {
            model.set_connect_params(params);
            Vec::new()
        }
        Request::AddJoinConfig(config) => {
            model.add_join_config(config);
            Vec::new()
        }
        Request::Join(topic) => model.join(topic),
        Request::Leave(topic) => model.leave(topic),
        Request::On { topic, event } => model.on(topic, event),
        Request::AllOn { topic, events } => model.all_on(topic, events),
        Request::Off { topic, event } => model.off(topic, event),
        Request::AllOff { topic, events } => model.all_off(topic, events),
        Request::Push(push) => model.push(push),
        Request::PushAll(pushes) => model.push_all(pushes),
        Request::Info(request) => match request {
            InfoRequest::ConnectionState => model.request_connection_state(),
            InfoRequest::EndPointUrl => model.request_end_point_url(),
            InfoRequest::HasLogger => model.request_has_logger(),
            InfoRequest::IsConnected => model.request_is_connected(),
            InfoRequest::MakeRef => model.request_make_ref(),
            InfoRequest::Protocol => model.request_protocol(),
            InfoRequest::Info => model.request_socket_info(),
        },
        Request::Snapshot(reply) => {
            let _ = reply.send(model.clone());
            Vec::new()
        }
        // Handled by the loop.
        Request::Shutdown => Vec::new(),
    }
}

fn forward(outbound: &UnboundedSender<Envelope<OutboundMessage>>, commands: Vec<Command>) {
    for command in commands {
        debug!(command = command.name(), topic = ?command.topic(), "sending command");
        if outbound
            .unbounded_send(Envelope::for_command(&command))
            .is_err()
        {
            warn!(command = command.name(), "transport is gone, command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_shared::RetryStrategy;

    use crate::event::{ChannelResponse, SocketEvent};

    fn config() -> ClientConfig {
        ClientConfig {
            tick_interval: Duration::from_millis(100),
            ..ClientConfig::default()
        }
    }

    async fn expect_command(peer: &mut GatewayPeer, name: &str) -> Envelope<OutboundMessage> {
        let envelope = peer.next_command().await.expect("runtime should emit a command");
        assert_eq!(envelope.payload.command, name);
        envelope
    }

    #[tokio::test(start_paused = true)]
    async fn push_connects_joins_and_sends() {
        let (bindings, mut peer) = GatewayBindings::pair();
        let (handle, _task) = spawn(Model::default(), bindings, &config());

        handle
            .push(Push::new("room:lobby", "shout").with_payload(json!({ "body": "hi" })))
            .await
            .expect("runtime is running");
        expect_command(&mut peer, "connect").await;

        peer.send(InboundEvent::socket("Opened", Value::Null))
            .expect("runtime is running");
        let join = expect_command(&mut peer, "join").await;
        assert_eq!(join.payload.topic, Some(Topic::from("room:lobby")));

        peer.send(InboundEvent::channel("room:lobby", "JoinOk", json!({})))
            .expect("runtime is running");
        let push = expect_command(&mut peer, "push").await;
        assert_eq!(push.correlation_id.as_deref(), Some("1"));
        assert_eq!(push.payload.payload["event"], "shout");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_fires_after_delay() {
        let (bindings, mut peer) = GatewayBindings::pair();
        let (handle, _task) = spawn(Model::default(), bindings, &config());

        handle.connect().await.expect("runtime is running");
        expect_command(&mut peer, "connect").await;
        peer.send(InboundEvent::socket("Opened", Value::Null))
            .expect("runtime is running");
        handle.join("room:1").await.expect("runtime is running");
        expect_command(&mut peer, "join").await;
        peer.send(InboundEvent::channel("room:1", "JoinOk", json!({})))
            .expect("runtime is running");

        handle
            .push(Push::new("room:1", "ping").with_retry_strategy(RetryStrategy::Every(2)))
            .await
            .expect("runtime is running");
        expect_command(&mut peer, "push").await;

        let started = Instant::now();
        peer.send(InboundEvent::channel(
            "room:1",
            "PushTimeout",
            json!({ "event": "ping", "payload": {}, "ref": 1 }),
        ))
        .expect("runtime is running");

        let retry = expect_command(&mut peer, "push").await;
        assert_eq!(retry.correlation_id.as_deref(), Some("1"));
        assert!(started.elapsed() >= Duration::from_millis(200));

        let model = handle.snapshot().await.expect("runtime is running");
        assert!(model.queued_push(1).is_some());
        assert!(!model.retry_timer_active());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_classified_events() {
        let (bindings, peer) = GatewayBindings::pair();
        let (handle, _task) = spawn(Model::default(), bindings, &config());
        let mut events = handle.subscribe();

        peer.send(InboundEvent::socket("Protocol", json!("wss")))
            .expect("runtime is running");
        peer.send(InboundEvent::channel("room:1", "Closed", Value::Null))
            .expect("runtime is running");

        assert_eq!(
            events.recv().await.expect("event"),
            ClientEvent::Socket(SocketEvent::Protocol("wss".into()))
        );
        assert_eq!(
            events.recv().await.expect("event"),
            ClientEvent::Channel(ChannelResponse::Closed {
                topic: Topic::from("room:1")
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_final_model() {
        let (bindings, _peer) = GatewayBindings::pair();
        let (handle, task) = spawn(Model::default(), bindings, &config());

        handle
            .add_join_config(JoinConfig::new("room:1").with_timeout(10))
            .await
            .expect("runtime is running");
        handle.shutdown().await.expect("runtime is running");

        let model = task.await.expect("runtime task should not panic");
        assert_eq!(model.join_config("room:1").and_then(|c| c.timeout), Some(10));

        assert!(matches!(
            handle.connect().await,
            Err(ClientError::RuntimeStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_gateway_stops_the_runtime() {
        let (bindings, peer) = GatewayBindings::pair();
        let (handle, task) = spawn(Model::default(), bindings, &config());

        peer.close();
        task.await.expect("runtime task should not panic");
        assert!(handle.snapshot().await.is_err());
    }
}
