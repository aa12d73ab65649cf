//! Signaling channel adapter
//!
//! Wraps the persistent websocket to the relay. A background link task owns
//! the socket and reconnects with backoff; the [`SignalingChannel`] itself is
//! a plain owned value that turns link traffic into [`ChannelEvent`]s and
//! routes signals to the single active [`Subscription`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::ChannelError;
use crate::model::{ClientMessage, ServerMessage, SignalEnvelope};

/// What the link task reports about the relay connection.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Up,
    Down,
    Message(ServerMessage),
}

/// Token for the pairing that currently receives signals. A new subscription
/// silences every earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Events delivered to the lifecycle controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Waiting,
    Paired,
    PartnerLeft,
    Signal(Subscription, SignalEnvelope),
    /// The relay connection dropped. Reported once per outage.
    Lost,
    /// The relay connection is back; interest must be registered again.
    Reconnected,
}

/// Best-effort envelope delivery towards the partner.
pub trait SignalSink {
    fn send(&self, envelope: SignalEnvelope) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed connection attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

pub struct SignalingChannel {
    outgoing: UnboundedSender<ClientMessage>,
    incoming: UnboundedReceiver<LinkEvent>,
    subscription: Option<Subscription>,
    next_subscription: u64,
    link_down: bool,
}

impl SignalingChannel {
    /// Spawns the websocket link task for `url` on the current runtime.
    pub fn connect(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_link(url.into(), policy, out_rx, in_tx));

        Self::from_parts(out_tx, in_rx)
    }

    /// Builds the adapter over an arbitrary link, e.g. an in-memory relay.
    pub fn from_parts(
        outgoing: UnboundedSender<ClientMessage>,
        incoming: UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            subscription: None,
            next_subscription: 0,
            link_down: false,
        }
    }

    /// Asks the relay to put this client in the matchmaking pool.
    pub fn register(&self) -> Result<(), ChannelError> {
        self.push(ClientMessage::Ready)
    }

    pub fn leave(&self) -> Result<(), ChannelError> {
        self.push(ClientMessage::Leave)
    }

    /// Starts routing signals to a fresh subscription, replacing any previous one.
    pub fn subscribe(&mut self) -> Subscription {
        self.next_subscription += 1;
        let subscription = Subscription(self.next_subscription);
        self.subscription = Some(subscription);
        subscription
    }

    /// Stops routing signals; anything arriving afterwards is dropped.
    pub fn unsubscribe(&mut self) {
        self.subscription = None;
    }

    pub fn is_link_down(&self) -> bool {
        self.link_down
    }

    /// Next event from the relay, or `None` once the link has given up.
    ///
    /// Cancel-safe: an event is either returned or still queued.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.incoming.recv().await? {
                LinkEvent::Up => {
                    if !std::mem::take(&mut self.link_down) {
                        continue;
                    }
                    ChannelEvent::Reconnected
                }
                LinkEvent::Down => {
                    if self.link_down {
                        continue;
                    }
                    self.link_down = true;
                    ChannelEvent::Lost
                }
                LinkEvent::Message(ServerMessage::Waiting) => ChannelEvent::Waiting,
                LinkEvent::Message(ServerMessage::Paired) => ChannelEvent::Paired,
                LinkEvent::Message(ServerMessage::PartnerLeft) => ChannelEvent::PartnerLeft,
                LinkEvent::Message(ServerMessage::Signal { data }) => match self.subscription {
                    Some(subscription) => ChannelEvent::Signal(subscription, data),
                    None => {
                        debug!(kind = ?data.kind, "Dropping signal outside of a pairing");
                        continue;
                    }
                },
            };
            return Some(event);
        }
    }

    fn push(&self, message: ClientMessage) -> Result<(), ChannelError> {
        self.outgoing.send(message).map_err(|_| ChannelError)
    }
}

impl SignalSink for SignalingChannel {
    fn send(&self, envelope: SignalEnvelope) -> Result<(), ChannelError> {
        self.push(ClientMessage::Signal { data: envelope })
    }
}

enum PumpEnd {
    /// The socket closed or failed.
    Dropped,
    /// The adapter was dropped; nothing left to serve.
    AdapterGone,
}

async fn run_link(
    url: String,
    policy: ReconnectPolicy,
    mut outgoing: UnboundedReceiver<ClientMessage>,
    incoming: UnboundedSender<LinkEvent>,
) {
    let mut failures = 0u32;
    let mut delay = policy.initial_delay;
    let mut outage = false;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!("🔗 Connected to relay at {}", url);

                if std::mem::take(&mut outage) {
                    // Queued messages belong to a relay session that no longer exists.
                    let mut stale = 0usize;
                    while outgoing.try_recv().is_ok() {
                        stale += 1;
                    }
                    if stale > 0 {
                        debug!(stale, "Discarded messages queued while disconnected");
                    }
                }

                failures = 0;
                delay = policy.initial_delay;

                if incoming.send(LinkEvent::Up).is_err() {
                    return;
                }

                match pump(stream, &mut outgoing, &incoming).await {
                    PumpEnd::AdapterGone => return,
                    PumpEnd::Dropped => {
                        warn!("Relay connection dropped");
                        outage = true;
                        if incoming.send(LinkEvent::Down).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Relay connection to {} failed: {}", url, e);
                outage = true;
                if incoming.send(LinkEvent::Down).is_err() {
                    return;
                }

                failures += 1;
                if failures >= policy.max_attempts {
                    error!(attempts = failures, "Giving up on the relay");
                    return;
                }

                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outgoing: &mut UnboundedReceiver<ClientMessage>,
    incoming: &UnboundedSender<LinkEvent>,
) -> PumpEnd {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            message = outgoing.recv() => {
                let Some(message) = message else {
                    let _ = write.close().await;
                    return PumpEnd::AdapterGone;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode relay message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    debug!("Relay write failed: {}", e);
                    return PumpEnd::Dropped;
                }
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Ignoring non UTF-8 relay frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => return PumpEnd::Dropped,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Relay read failed: {}", e);
                        return PumpEnd::Dropped;
                    }
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => {
                        if incoming.send(LinkEvent::Message(message)).is_err() {
                            return PumpEnd::AdapterGone;
                        }
                    }
                    Err(e) => warn!("Failed to parse relay message: {}", e),
                }
            }
        }
    }
}
