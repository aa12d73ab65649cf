//! Pairing lifecycle controller
//!
//! [`PairingController`] owns everything one client needs: the relay channel,
//! the capture and render collaborators, the traversal resolver and the
//! transport factory. Its [`run`](PairingController::run) loop is the single
//! serial context in which relay events, transport events and local commands
//! are applied, one at a time.
//!
//! A client pairs at most once. Whatever ends the pairing (partner left, a
//! failed negotiation, a local hang-up) also ends the client with a terminal
//! [`Status`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{NegotiationError, TransportError};
use crate::media::{MediaCapture, MediaRenderer};
use crate::model::{Lifecycle, LocalMedia, SignalEnvelope, Status};
use crate::negotiation::{Negotiation, Progress};
use crate::signaling::{ChannelEvent, SignalingChannel, Subscription};
use crate::transport::{Connectivity, MediaTransport, TransportEvent, TransportFactory};
use crate::traversal::ResolveTraversal;

type SetupResult<T> = (Subscription, Result<T, TransportError>);
type SetupFuture<T> = Pin<Box<dyn Future<Output = SetupResult<T>> + Send>>;

#[derive(Debug)]
enum Command {
    HangUp,
}

/// Cloneable remote control for a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: UnboundedSender<Command>,
}

impl ControllerHandle {
    /// Leaves the call. Ignored once the controller has stopped.
    pub fn hang_up(&self) {
        let _ = self.commands.send(Command::HangUp);
    }
}

pub struct PairingController<F: TransportFactory> {
    capture: Arc<dyn MediaCapture>,
    renderer: Arc<dyn MediaRenderer>,
    resolver: Arc<dyn ResolveTraversal>,
    factory: Arc<F>,
    channel: SignalingChannel,
    commands_tx: UnboundedSender<Command>,
    commands: UnboundedReceiver<Command>,
    status: watch::Sender<Status>,
    lifecycle: Lifecycle,
    local_media: Option<LocalMedia>,
    /// Subscription of the current pairing
    pairing: Option<Subscription>,
    /// Traversal resolution and transport construction for the current pairing
    setup: Option<SetupFuture<F::Transport>>,
    negotiation: Option<Negotiation<F::Transport>>,
    /// Signals that arrived before the negotiation existed
    early_signals: VecDeque<SignalEnvelope>,
}

impl<F: TransportFactory> PairingController<F> {
    pub fn new(
        capture: Arc<dyn MediaCapture>,
        renderer: Arc<dyn MediaRenderer>,
        resolver: Arc<dyn ResolveTraversal>,
        factory: Arc<F>,
        channel: SignalingChannel,
    ) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(Status::Connecting);

        Self {
            capture,
            renderer,
            resolver,
            factory,
            channel,
            commands_tx,
            commands,
            status,
            lifecycle: Lifecycle::Idle,
            local_media: None,
            pairing: None,
            setup: None,
            negotiation: None,
            early_signals: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Receives every status change, starting with the current one.
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Drives the client until it reaches a terminal status and returns it.
    pub async fn run(mut self) -> Status {
        let media = match self.capture.acquire().await {
            Ok(media) => media,
            Err(e) => {
                error!("Failed to acquire local media: {}", e);
                self.finish(Status::MediaAccessError);
                return Status::MediaAccessError;
            }
        };
        self.renderer.on_local_media(&media);
        self.local_media = Some(media);

        if self.channel.register().is_err() {
            error!("Relay link is gone before registration");
            self.finish(Status::NegotiationError);
            return Status::NegotiationError;
        }
        self.lifecycle = Lifecycle::Waiting;
        info!("⏳ Registered with the relay");

        while self.lifecycle != Lifecycle::Ended {
            let wants_offer = self
                .negotiation
                .as_ref()
                .is_some_and(|negotiation| negotiation.wants_offer());

            // The local offer only goes out when nothing else is queued, so a
            // partner's offer that already arrived takes precedence.
            tokio::select! {
                biased;

                Some(command) = self.commands.recv() => self.on_command(command),
                event = self.channel.recv() => self.on_channel_event(event),
                (subscription, result) = setup_done(&mut self.setup) => {
                    self.setup = None;
                    self.on_setup_done(subscription, result);
                }
                _ = std::future::ready(()), if wants_offer => self.dispatch_offer(),
                event = transport_event(&mut self.negotiation) => self.on_transport_event(event),
            }
        }

        let status = *self.status.borrow();
        status
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::HangUp => {
                info!("📴 Hanging up");
                if self.channel.leave().is_err() {
                    debug!("Relay link already gone, leaving silently");
                }
                self.finish(Status::CallEnded);
            }
        }
    }

    fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        let Some(event) = event else {
            error!("Relay link gave up");
            self.finish(Status::NegotiationError);
            return;
        };

        match event {
            ChannelEvent::Waiting => {
                if self.lifecycle == Lifecycle::Waiting {
                    self.set_status(Status::WaitingForPartner);
                }
            }
            ChannelEvent::Paired => {
                if self.lifecycle != Lifecycle::Waiting {
                    warn!(lifecycle = ?self.lifecycle, "Ignoring paired notification");
                    return;
                }
                self.begin_pairing();
            }
            ChannelEvent::PartnerLeft => {
                if self.lifecycle != Lifecycle::Paired {
                    debug!(lifecycle = ?self.lifecycle, "Ignoring partner-left outside of a pairing");
                    return;
                }
                info!("👋 Partner left");
                self.finish(Status::PartnerDisconnected);
            }
            ChannelEvent::Signal(subscription, envelope) => {
                if self.pairing != Some(subscription) {
                    debug!(kind = ?envelope.kind, "Dropping signal for a stale pairing");
                    return;
                }
                self.apply_signal(envelope);
            }
            ChannelEvent::Lost => self.on_channel_lost(),
            ChannelEvent::Reconnected => {
                info!("Relay connection restored");
                if self.lifecycle == Lifecycle::Waiting && self.channel.register().is_err() {
                    self.finish(Status::NegotiationError);
                }
            }
        }
    }

    fn on_channel_lost(&mut self) {
        match self.lifecycle {
            Lifecycle::Waiting => {
                warn!("Relay connection lost while waiting, reconnecting");
                self.set_status(Status::Connecting);
            }
            Lifecycle::Paired => {
                let result = match self.negotiation.as_mut() {
                    Some(negotiation) => negotiation.handle_channel_loss(),
                    None => Err(NegotiationError::ChannelLoss),
                };
                if let Err(e) = result {
                    self.fail(e);
                }
            }
            Lifecycle::Idle | Lifecycle::Ended => {}
        }
    }

    fn begin_pairing(&mut self) {
        let subscription = self.channel.subscribe();
        self.pairing = Some(subscription);
        self.lifecycle = Lifecycle::Paired;
        self.early_signals.clear();
        info!("🤝 Paired with a partner");
        self.set_status(Status::Connecting);

        // Credentials expire, so every pairing resolves afresh.
        let resolver = Arc::clone(&self.resolver);
        let factory = Arc::clone(&self.factory);
        self.setup = Some(Box::pin(async move {
            let config = resolver.resolve().await;
            (subscription, factory.open(&config).await)
        }));
    }

    fn on_setup_done(
        &mut self,
        subscription: Subscription,
        result: Result<F::Transport, TransportError>,
    ) {
        if self.lifecycle != Lifecycle::Paired || self.pairing != Some(subscription) {
            if let Ok(mut transport) = result {
                transport.close();
            }
            debug!(?subscription, "Discarding transport of a stale pairing");
            return;
        }

        let transport = match result {
            Ok(transport) => transport,
            Err(e) => return self.fail(e.into()),
        };
        let Some(media) = self.local_media.as_ref() else {
            return self.fail(TransportError::Setup("no local media".into()).into());
        };

        match Negotiation::new(subscription, transport, media) {
            Ok(negotiation) => self.negotiation = Some(negotiation),
            Err(e) => return self.fail(e),
        }

        let early = std::mem::take(&mut self.early_signals);
        if !early.is_empty() {
            debug!(count = early.len(), "Replaying signals received during setup");
        }
        for envelope in early {
            if self.lifecycle == Lifecycle::Ended {
                break;
            }
            self.apply_signal(envelope);
        }
    }

    fn apply_signal(&mut self, envelope: SignalEnvelope) {
        let Some(negotiation) = self.negotiation.as_mut() else {
            self.early_signals.push_back(envelope);
            return;
        };
        if let Err(e) = negotiation.handle_signal(envelope, &self.channel) {
            self.fail(e);
        }
    }

    fn dispatch_offer(&mut self) {
        let Some(negotiation) = self.negotiation.as_mut() else {
            return;
        };
        if let Err(e) = negotiation.dispatch_offer(&self.channel) {
            self.fail(e);
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        let Some(negotiation) = self.negotiation.as_mut() else {
            return;
        };
        // A transport that stops producing events is dead.
        let event = event.unwrap_or(TransportEvent::Connectivity(Connectivity::Failed));

        match negotiation.handle_transport_event(event, &self.channel) {
            Ok(Progress::None) => {}
            Ok(Progress::RemoteMedia(media)) => self.renderer.on_remote_media(media),
            Ok(Progress::Connected) => self.set_status(Status::Connected),
            Ok(Progress::Interrupted) => self.set_status(Status::Connecting),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: NegotiationError) {
        error!("Negotiation failed: {}", e);
        self.finish(Status::NegotiationError);
    }

    /// Tears the pairing down and publishes the terminal status.
    fn finish(&mut self, status: Status) {
        debug_assert!(status.is_terminal(), "{status:?} does not end the client");
        if let Some(mut negotiation) = self.negotiation.take() {
            negotiation.close();
        }
        self.setup = None;
        self.early_signals.clear();
        self.channel.unsubscribe();
        self.pairing = None;
        self.lifecycle = Lifecycle::Ended;
        self.set_status(status);
    }

    fn set_status(&self, status: Status) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!("Status: {}", status);
        }
    }
}

async fn setup_done<T>(setup: &mut Option<SetupFuture<T>>) -> SetupResult<T> {
    match setup.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn transport_event<T: MediaTransport>(
    negotiation: &mut Option<Negotiation<T>>,
) -> Option<TransportEvent> {
    match negotiation.as_mut() {
        Some(negotiation) => negotiation.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticCapture;
    use crate::model::{
        ClientMessage, MediaKind, RemoteMedia, ServerMessage, SignalKind, TraversalConfig,
    };
    use crate::signaling::LinkEvent;
    use crate::transport::fake::{FakeFactory, FakeTransport};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct StaticResolver;

    #[async_trait]
    impl ResolveTraversal for StaticResolver {
        async fn resolve(&self) -> TraversalConfig {
            TraversalConfig::public_default()
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        local: Mutex<usize>,
        remote: Mutex<Vec<RemoteMedia>>,
    }

    impl MediaRenderer for RecordingRenderer {
        fn on_local_media(&self, _media: &LocalMedia) {
            *self.local.lock().unwrap() += 1;
        }

        fn on_remote_media(&self, media: RemoteMedia) {
            self.remote.lock().unwrap().push(media);
        }
    }

    struct Client {
        controller: PairingController<FakeFactory>,
        factory: Arc<FakeFactory>,
        renderer: Arc<RecordingRenderer>,
        link: UnboundedSender<LinkEvent>,
        out: UnboundedReceiver<ClientMessage>,
    }

    fn client(label: &str, auto_connect: bool) -> Client {
        client_with(label, auto_connect, true)
    }

    fn client_with(label: &str, auto_connect: bool, has_media: bool) -> Client {
        client_from(FakeFactory::new(label, auto_connect), has_media)
    }

    fn client_from(factory: FakeFactory, has_media: bool) -> Client {
        let (out_tx, out) = mpsc::unbounded_channel();
        let (link, in_rx) = mpsc::unbounded_channel();
        let factory = Arc::new(factory);
        let renderer = Arc::new(RecordingRenderer::default());

        let controller = PairingController::new(
            Arc::new(SyntheticCapture {
                audio: has_media,
                video: has_media,
            }),
            renderer.clone(),
            Arc::new(StaticResolver),
            factory.clone(),
            SignalingChannel::from_parts(out_tx, in_rx),
        );

        Client {
            controller,
            factory,
            renderer,
            link,
            out,
        }
    }

    fn server(message: ServerMessage) -> LinkEvent {
        LinkEvent::Message(message)
    }

    async fn wait_status(status: &mut watch::Receiver<Status>, expected: Status) {
        timeout(WAIT, status.wait_for(|s| *s == expected))
            .await
            .expect("status not reached in time")
            .expect("controller dropped");
    }

    async fn next_offer(out: &mut UnboundedReceiver<ClientMessage>) -> Vec<ClientMessage> {
        let mut seen = vec![];
        loop {
            let message = timeout(WAIT, out.recv()).await.unwrap().unwrap();
            let is_offer = matches!(
                &message,
                ClientMessage::Signal { data } if data.kind == SignalKind::Offer
            );
            seen.push(message);
            if is_offer {
                return seen;
            }
        }
    }

    /// Relays between two clients the way the pairing server does. `b` is
    /// only paired once `a` has sent its offer, so `a` always originates.
    struct Relay {
        /// Every forwarded envelope, tagged with its sender
        log: UnboundedReceiver<(char, SignalKind)>,
    }

    fn relay(
        mut a_out: UnboundedReceiver<ClientMessage>,
        a_link: UnboundedSender<LinkEvent>,
        mut b_out: UnboundedReceiver<ClientMessage>,
        b_link: UnboundedSender<LinkEvent>,
    ) -> Relay {
        let (log_tx, log) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut ready = 0;
            let mut a_open = true;
            let mut b_open = true;
            let mut b_paired = false;

            while a_open || b_open {
                tokio::select! {
                    message = a_out.recv(), if a_open => match message {
                        Some(ClientMessage::Ready) => {
                            let _ = a_link.send(server(ServerMessage::Waiting));
                            ready += 1;
                            if ready == 2 {
                                let _ = a_link.send(server(ServerMessage::Paired));
                            }
                        }
                        Some(ClientMessage::Signal { data }) => {
                            if !b_paired {
                                b_paired = true;
                                let _ = b_link.send(server(ServerMessage::Paired));
                            }
                            let kind = data.kind.clone();
                            let _ = b_link.send(server(ServerMessage::Signal { data }));
                            let _ = log_tx.send(('a', kind));
                        }
                        Some(ClientMessage::Leave) | None => {
                            a_open = false;
                            let _ = b_link.send(server(ServerMessage::PartnerLeft));
                        }
                    },
                    message = b_out.recv(), if b_open => match message {
                        Some(ClientMessage::Ready) => {
                            let _ = b_link.send(server(ServerMessage::Waiting));
                            ready += 1;
                            if ready == 2 {
                                let _ = a_link.send(server(ServerMessage::Paired));
                            }
                        }
                        Some(ClientMessage::Signal { data }) => {
                            let kind = data.kind.clone();
                            let _ = a_link.send(server(ServerMessage::Signal { data }));
                            let _ = log_tx.send(('b', kind));
                        }
                        Some(ClientMessage::Leave) | None => {
                            b_open = false;
                            let _ = a_link.send(server(ServerMessage::PartnerLeft));
                        }
                    },
                }
            }
        });

        Relay { log }
    }

    #[tokio::test]
    async fn paired_clients_connect_and_hang_up() {
        let a = client("a", true);
        let b = client("b", true);
        let mut a_status = a.controller.subscribe_status();
        let mut b_status = b.controller.subscribe_status();
        let hang_up = a.controller.handle();
        let _relay = relay(a.out, a.link, b.out, b.link);

        let a_run = tokio::spawn(a.controller.run());
        let b_run = tokio::spawn(b.controller.run());

        wait_status(&mut a_status, Status::Connected).await;
        wait_status(&mut b_status, Status::Connected).await;
        assert_eq!(*a.renderer.local.lock().unwrap(), 1);
        assert_eq!(a.renderer.remote.lock().unwrap()[0].kind, MediaKind::Audio);
        assert!(!b.renderer.remote.lock().unwrap().is_empty());

        hang_up.hang_up();

        assert_eq!(timeout(WAIT, a_run).await.unwrap().unwrap(), Status::CallEnded);
        assert_eq!(
            timeout(WAIT, b_run).await.unwrap().unwrap(),
            Status::PartnerDisconnected
        );

        for factory in [&a.factory, &b.factory] {
            assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
            let probes = factory.probes.lock().unwrap();
            assert_eq!(probes[0].closes.load(Ordering::SeqCst), 1);
            assert_eq!(probes[0].attached.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn channel_loss_mid_handshake_ends_both_sides() {
        let a = client("a", false);
        let b = client("b", false);
        let a_link = a.link.clone();
        let mut relay = relay(a.out, a.link, b.out, b.link);

        let a_run = tokio::spawn(a.controller.run());
        let b_run = tokio::spawn(b.controller.run());

        // Wait until the answer is on its way back to `a`.
        loop {
            let (from, kind) = timeout(WAIT, relay.log.recv()).await.unwrap().unwrap();
            if from == 'b' && kind == SignalKind::Answer {
                break;
            }
        }
        a_link.send(LinkEvent::Down).unwrap();

        assert_eq!(
            timeout(WAIT, a_run).await.unwrap().unwrap(),
            Status::NegotiationError
        );
        assert_eq!(
            timeout(WAIT, b_run).await.unwrap().unwrap(),
            Status::PartnerDisconnected
        );
    }

    fn slow_client() -> Client {
        let mut factory = FakeFactory::new("slow", true);
        factory.delay = Some(Duration::from_secs(60));
        client_from(factory, true)
    }

    /// Runs the controller until it is paired and its transport is still
    /// being built.
    async fn pair_with_pending_setup(
        controller: PairingController<FakeFactory>,
        link: &UnboundedSender<LinkEvent>,
        out: &mut UnboundedReceiver<ClientMessage>,
    ) -> tokio::task::JoinHandle<Status> {
        let mut status = controller.subscribe_status();
        let run = tokio::spawn(controller.run());

        assert_eq!(timeout(WAIT, out.recv()).await.unwrap(), Some(ClientMessage::Ready));
        link.send(server(ServerMessage::Waiting)).unwrap();
        wait_status(&mut status, Status::WaitingForPartner).await;
        link.send(server(ServerMessage::Paired)).unwrap();
        wait_status(&mut status, Status::Connecting).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        run
    }

    fn assert_setup_abandoned(
        factory: &FakeFactory,
        renderer: &RecordingRenderer,
        out: &mut UnboundedReceiver<ClientMessage>,
    ) {
        assert_eq!(factory.opened.load(Ordering::SeqCst), 0);
        assert!(factory.probes.lock().unwrap().is_empty());
        assert!(renderer.remote.lock().unwrap().is_empty());

        while let Ok(message) = out.try_recv() {
            assert!(
                !matches!(message, ClientMessage::Signal { .. }),
                "sent {message:?} without a transport"
            );
        }
    }

    #[tokio::test]
    async fn partner_leaving_during_setup_ends_the_pairing() {
        let Client {
            controller,
            factory,
            renderer,
            link,
            mut out,
        } = slow_client();
        let run = pair_with_pending_setup(controller, &link, &mut out).await;

        link.send(server(ServerMessage::PartnerLeft)).unwrap();

        let result = timeout(WAIT, run).await.unwrap().unwrap();
        assert_eq!(result, Status::PartnerDisconnected);
        assert!(result.is_terminal());
        assert_setup_abandoned(&factory, &renderer, &mut out);
    }

    #[tokio::test]
    async fn hang_up_during_setup_ends_the_call() {
        let Client {
            controller,
            factory,
            renderer,
            link,
            mut out,
        } = slow_client();
        let handle = controller.handle();
        let run = pair_with_pending_setup(controller, &link, &mut out).await;

        handle.hang_up();

        let result = timeout(WAIT, run).await.unwrap().unwrap();
        assert_eq!(result, Status::CallEnded);
        assert!(result.is_terminal());
        assert_eq!(out.try_recv(), Ok(ClientMessage::Leave));
        assert_setup_abandoned(&factory, &renderer, &mut out);
    }

    #[tokio::test]
    async fn second_paired_notification_is_ignored() {
        let mut c = client("a", true);
        c.link.send(server(ServerMessage::Paired)).unwrap();
        c.link.send(server(ServerMessage::Paired)).unwrap();
        let handle = c.controller.handle();
        let run = tokio::spawn(c.controller.run());

        let mut sent = next_offer(&mut c.out).await;
        handle.hang_up();
        assert_eq!(timeout(WAIT, run).await.unwrap().unwrap(), Status::CallEnded);
        while let Ok(message) = c.out.try_recv() {
            sent.push(message);
        }

        let offers = sent
            .iter()
            .filter(|m| matches!(m, ClientMessage::Signal { data } if data.kind == SignalKind::Offer))
            .count();
        assert_eq!(offers, 1);
        assert_eq!(sent.first(), Some(&ClientMessage::Ready));
        assert_eq!(sent.last(), Some(&ClientMessage::Leave));
        assert_eq!(c.factory.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn media_failure_is_terminal() {
        let mut c = client_with("a", true, false);
        let status = c.controller.subscribe_status();

        let result = c.controller.run().await;

        assert_eq!(result, Status::MediaAccessError);
        assert!(result.is_terminal());
        assert_eq!(*status.borrow(), Status::MediaAccessError);
        assert!(c.out.try_recv().is_err());
        assert_eq!(*c.renderer.local.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn reregisters_after_reconnect_while_waiting() {
        let mut c = client("a", true);
        let mut status = c.controller.subscribe_status();
        let handle = c.controller.handle();
        let run = tokio::spawn(c.controller.run());

        assert_eq!(timeout(WAIT, c.out.recv()).await.unwrap(), Some(ClientMessage::Ready));
        c.link.send(server(ServerMessage::Waiting)).unwrap();
        wait_status(&mut status, Status::WaitingForPartner).await;

        c.link.send(LinkEvent::Down).unwrap();
        wait_status(&mut status, Status::Connecting).await;
        c.link.send(LinkEvent::Up).unwrap();
        assert_eq!(timeout(WAIT, c.out.recv()).await.unwrap(), Some(ClientMessage::Ready));

        c.link.send(server(ServerMessage::Waiting)).unwrap();
        wait_status(&mut status, Status::WaitingForPartner).await;

        handle.hang_up();
        assert_eq!(timeout(WAIT, run).await.unwrap().unwrap(), Status::CallEnded);
    }

    #[tokio::test]
    async fn link_giving_up_is_a_negotiation_error() {
        let c = client("a", true);
        drop(c.link);

        assert_eq!(c.controller.run().await, Status::NegotiationError);
    }

    #[tokio::test]
    async fn stale_setup_result_is_closed() {
        let mut c = client("a", true);
        let stale = c.controller.channel.subscribe();
        c.controller.lifecycle = Lifecycle::Paired;
        c.controller.local_media = Some(
            SyntheticCapture {
                audio: true,
                video: true,
            }
            .acquire()
            .await
            .unwrap(),
        );
        c.controller.pairing = Some(c.controller.channel.subscribe());

        let transport = FakeTransport::new("late", true);
        let probe = transport.probe();
        c.controller.on_setup_done(stale, Ok(transport));

        assert!(c.controller.negotiation.is_none());
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
        assert_eq!(c.controller.lifecycle(), Lifecycle::Paired);
    }

    #[tokio::test]
    async fn failed_setup_ends_with_negotiation_error() {
        let mut c = client("a", true);
        c.controller.lifecycle = Lifecycle::Paired;
        let current = c.controller.channel.subscribe();
        c.controller.pairing = Some(current);

        c.controller
            .on_setup_done(current, Err(TransportError::Setup("no socket".into())));

        assert_eq!(c.controller.lifecycle(), Lifecycle::Ended);
        assert_eq!(*c.controller.subscribe_status().borrow(), Status::NegotiationError);
    }
}
