//! Offload channel: runs scene generation and rasterization on a background
//! context that owns the surface.
//!
//! The two sides share no memory. Requests travel as `Envelope`s over an
//! ordered channel and each carries a fresh `CorrelationToken`; the caller
//! registers a one-shot waiter under that token before sending, and a
//! dispatcher thread hands every `Reply` to the waiter with the same token.
//! Replies with unknown tokens are dropped.
//!
//! The surface moves to the background context once, on first use. After
//! that the caller can only resize it by forwarding a request. A lost
//! background context (disconnect, or no answer to a request or liveness
//! ping within the timeout) is fatal for the channel:
//! the surface cannot be transferred again, so callers build a new channel
//! around a new surface.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::coordinator::{RenderCoordinator, RenderOutcome};
use crate::rendering::{Surface, SurfaceRenderer, SurfaceSlot};
use crate::{Error, RenderConfig, RenderRequest, Result};

/// Identifies one request and its reply. Never reused within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(u64);

impl From<u64> for CorrelationToken {
    fn from(value: u64) -> Self {
        CorrelationToken(value)
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Requests understood by the background context.
#[derive(Debug)]
pub enum Command {
    Init,
    TransferSurface(Surface),
    Resize { width: u32, height: u32 },
    Render(RenderRequest),
    Snapshot,
    /// Liveness check, answered between tiles while renders run
    Ping,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::TransferSurface(_) => "transfer-surface",
            Command::Resize { .. } => "resize",
            Command::Render(_) => "render",
            Command::Snapshot => "snapshot",
            Command::Ping => "ping",
        }
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub token: CorrelationToken,
    pub command: Command,
}

/// Successful replies from the background context.
#[derive(Debug)]
pub enum Ack {
    Initialized,
    SurfaceReceived,
    Resized,
    RenderComplete(RenderOutcome),
    Snapshot(Surface),
    Pong,
}

impl Ack {
    pub fn message(&self) -> &'static str {
        match self {
            Ack::Initialized => "initialized",
            Ack::SurfaceReceived => "surface received",
            Ack::Resized => "resized",
            Ack::RenderComplete(_) => "render complete",
            Ack::Snapshot(_) => "snapshot",
            Ack::Pong => "pong",
        }
    }
}

#[derive(Debug)]
pub struct Reply {
    pub token: CorrelationToken,
    pub result: Result<Ack>,
}

type Waiter = oneshot::Sender<Result<Ack>>;

/// One-shot waiters keyed by correlation token.
#[derive(Debug, Default)]
pub struct PendingReplies {
    waiters: Mutex<HashMap<CorrelationToken, Waiter>>,
    closed: AtomicBool,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `token`. Fails once the registry is closed.
    pub fn register(&self, token: CorrelationToken) -> Result<oneshot::Receiver<Result<Ack>>> {
        let mut waiters = self.lock()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::OffloadLost("offload channel is closed".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(token, tx);
        Ok(rx)
    }

    /// Hand `reply` to its waiter. Returns false when no waiter holds the
    /// token (unknown, already answered or abandoned).
    pub fn resolve(&self, reply: Reply) -> bool {
        let waiter = match self.lock() {
            Ok(mut waiters) => waiters.remove(&reply.token),
            Err(_) => None,
        };
        match waiter {
            // the receiver may have given up already
            Some(tx) => tx.send(reply.result).is_ok(),
            None => false,
        }
    }

    pub fn forget(&self, token: CorrelationToken) {
        if let Ok(mut waiters) = self.lock() {
            waiters.remove(&token);
        }
    }

    /// Refuse new waiters and drop the outstanding ones. Returns how many
    /// were dropped.
    pub fn close(&self) -> usize {
        match self.lock() {
            Ok(mut waiters) => {
                self.closed.store(true, Ordering::SeqCst);
                let abandoned = waiters.len();
                waiters.clear();
                abandoned
            }
            Err(_) => {
                self.closed.store(true, Ordering::SeqCst);
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CorrelationToken, Waiter>>> {
        self.waiters
            .lock()
            .map_err(|_| Error::OffloadLost("waiter registry poisoned".to_string()))
    }
}

/// Caller side of the offload protocol, bound to at most one surface.
pub struct OffloadChannel {
    outbound: mpsc::UnboundedSender<Envelope>,
    pending: Arc<PendingReplies>,
    lost: Arc<AtomicBool>,
    next_token: AtomicU64,
    slot: Mutex<Option<SurfaceSlot>>,
    timeout: Duration,
    dispatcher: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl OffloadChannel {
    /// Start a background worker thread and connect to it.
    pub fn spawn_worker<R>(renderer: Arc<R>, config: &RenderConfig) -> Result<Self>
    where
        R: SurfaceRenderer + ?Sized + 'static,
    {
        let (outbound, commands) = mpsc::unbounded_channel::<Envelope>();
        let (replies, inbound) = std_mpsc::channel::<Reply>();
        let worker_config = config.clone();

        let handle = thread::Builder::new()
            .name("offload-worker".to_string())
            .spawn(move || {
                if let Err(e) = run_worker(commands, replies, renderer, worker_config) {
                    log::error!("offload worker stopped: {}", e);
                }
            })
            .map_err(|e| Error::OffloadLost(format!("failed to start offload worker: {}", e)))?;

        let mut channel = Self::connect(
            outbound,
            inbound,
            Duration::from_millis(config.offload_timeout_ms),
        )?;
        channel.worker = Some(handle);
        Ok(channel)
    }

    /// Connect to a background context reachable through `outbound` (requests)
    /// and `inbound` (replies).
    pub fn connect(
        outbound: mpsc::UnboundedSender<Envelope>,
        inbound: std_mpsc::Receiver<Reply>,
        timeout: Duration,
    ) -> Result<Self> {
        let pending = Arc::new(PendingReplies::new());
        let lost = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let pending = Arc::clone(&pending);
            let lost = Arc::clone(&lost);
            thread::Builder::new()
                .name("offload-dispatch".to_string())
                .spawn(move || dispatch_replies(inbound, &pending, &lost))
                .map_err(|e| {
                    Error::OffloadLost(format!("failed to start reply dispatcher: {}", e))
                })?
        };

        Ok(Self {
            outbound,
            pending,
            lost,
            next_token: AtomicU64::new(1),
            slot: Mutex::new(None),
            timeout,
            dispatcher: Some(dispatcher),
            worker: None,
        })
    }

    /// Round-trip an `Init` message.
    pub async fn init(&self) -> Result<()> {
        match self.request(Command::Init).await? {
            Ack::Initialized => Ok(()),
            other => Err(unexpected("init", other)),
        }
    }

    /// Bind the surface this channel will render to. It stays in the
    /// caller's hands until the first render. A channel holds one surface
    /// for its whole life; if one is already bound, `surface` is handed back.
    pub fn bind(&self, surface: Surface) -> std::result::Result<(), Surface> {
        let Ok(mut slot) = self.slot.lock() else {
            return Err(surface);
        };
        if slot.is_some() {
            return Err(surface);
        }
        *slot = Some(SurfaceSlot::new(surface));
        Ok(())
    }

    pub fn is_transferred(&self) -> bool {
        self.lock_slot()
            .map(|s| s.as_ref().is_some_and(SurfaceSlot::is_transferred))
            .unwrap_or(false)
    }

    /// Hand the bound surface to the background context. Succeeds once per
    /// channel; later calls fail with `SurfaceTransferred`.
    pub async fn transfer_surface(&self) -> Result<()> {
        let (token, rx) = {
            let mut guard = self.lock_slot()?;
            let slot = guard.as_mut().ok_or_else(unbound)?;
            let surface = slot.transfer()?;
            log::info!(
                "transferring {}x{} surface to the offload context",
                surface.width(),
                surface.height()
            );
            // sent under the slot lock so later requests queue behind it
            self.dispatch(Command::TransferSurface(surface))?
        };
        match self.await_reply(token, rx).await? {
            Ack::SurfaceReceived => Ok(()),
            other => Err(unexpected("transfer-surface", other)),
        }
    }

    /// Resize the surface: locally while it is still ours, otherwise by
    /// forwarding the request to its owner.
    pub async fn resize(&self, width: u32, height: u32) -> Result<()> {
        let forwarded = {
            let mut guard = self.lock_slot()?;
            let slot = guard.as_mut().ok_or_else(unbound)?;
            let transferred = slot.is_transferred();
            slot.set_dimensions(width, height)?;
            if transferred {
                Some(self.dispatch(Command::Resize { width, height })?)
            } else {
                None
            }
        };
        let Some((token, rx)) = forwarded else {
            return Ok(());
        };
        match self.await_reply(token, rx).await? {
            Ack::Resized => Ok(()),
            other => Err(unexpected("resize", other)),
        }
    }

    /// Render on the background context, transferring the surface first if
    /// this is its first use.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        request.validate()?;
        self.ensure_transferred().await?;
        let (token, rx) = {
            let mut guard = self.lock_slot()?;
            let slot = guard.as_mut().ok_or_else(unbound)?;
            slot.set_dimensions(request.width, request.height)?;
            self.dispatch(Command::Render(request.clone()))?
        };
        match self.await_render(token, rx).await? {
            Ack::RenderComplete(outcome) => Ok(outcome),
            other => Err(unexpected("render", other)),
        }
    }

    /// A copy of the surface, wherever it currently lives.
    pub async fn snapshot(&self) -> Result<Surface> {
        {
            let mut guard = self.lock_slot()?;
            let slot = guard.as_mut().ok_or_else(unbound)?;
            if !slot.is_transferred() {
                return Ok(slot.get_mut()?.clone());
            }
        }
        match self.request(Command::Snapshot).await? {
            Ack::Snapshot(surface) => Ok(surface),
            other => Err(unexpected("snapshot", other)),
        }
    }

    /// Last known surface dimensions.
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let guard = self.lock_slot()?;
        guard.as_ref().map(SurfaceSlot::dimensions).ok_or_else(unbound)
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Stop the background context and wait for both threads to exit.
    ///
    /// The joins run on the blocking pool. To walk away from a context that
    /// may be hung, drop the channel instead: that detaches its threads.
    pub async fn close(self) {
        let OffloadChannel {
            outbound,
            dispatcher,
            worker,
            ..
        } = self;
        drop(outbound);
        let joined = tokio::task::spawn_blocking(move || {
            for handle in [worker, dispatcher].into_iter().flatten() {
                let _ = handle.join();
            }
        })
        .await;
        if let Err(e) = joined {
            log::warn!("offload threads did not shut down cleanly: {}", e);
        }
    }

    /// Send `command` and wait for its reply.
    pub async fn request(&self, command: Command) -> Result<Ack> {
        let (token, rx) = self.dispatch(command)?;
        self.await_reply(token, rx).await
    }

    async fn ensure_transferred(&self) -> Result<()> {
        if self.is_transferred() {
            return Ok(());
        }
        match self.transfer_surface().await {
            // a concurrent request got there first; its message is already queued
            Err(Error::SurfaceTransferred) => Ok(()),
            other => other,
        }
    }

    fn dispatch(
        &self,
        command: Command,
    ) -> Result<(CorrelationToken, oneshot::Receiver<Result<Ack>>)> {
        if self.is_lost() {
            return Err(Error::OffloadLost("offload context is gone".to_string()));
        }
        let token = CorrelationToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let rx = self.pending.register(token)?;
        log::debug!("sending {} as {}", command.name(), token);
        if self.outbound.send(Envelope { token, command }).is_err() {
            self.pending.forget(token);
            self.mark_lost();
            return Err(Error::OffloadLost(format!(
                "offload context stopped accepting requests ({})",
                token
            )));
        }
        Ok((token, rx))
    }

    async fn await_reply(
        &self,
        token: CorrelationToken,
        rx: oneshot::Receiver<Result<Ack>>,
    ) -> Result<Ack> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::OffloadLost(format!(
                "offload context went away before answering {}",
                token
            ))),
            Err(_) => {
                self.pending.forget(token);
                self.mark_lost();
                log::warn!(
                    "no reply to {} within {}ms; treating offload context as lost",
                    token,
                    self.timeout.as_millis()
                );
                Err(Error::OffloadLost(format!(
                    "no reply to {} within {}ms",
                    token,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Wait for a render reply for as long as the context stays responsive.
    ///
    /// Renders may legitimately outlast the timeout, so each time it elapses
    /// the context is pinged instead; the render is abandoned only when the
    /// ping goes unanswered too.
    async fn await_render(
        &self,
        token: CorrelationToken,
        mut rx: oneshot::Receiver<Result<Ack>>,
    ) -> Result<Ack> {
        loop {
            match tokio::time::timeout(self.timeout, &mut rx).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => {
                    return Err(Error::OffloadLost(format!(
                        "offload context went away before answering {}",
                        token
                    )))
                }
                Err(_) => {
                    log::debug!(
                        "{} still running after {}ms; pinging the offload context",
                        token,
                        self.timeout.as_millis()
                    );
                    match self.request(Command::Ping).await {
                        Ok(Ack::Pong) => continue,
                        Ok(other) => {
                            self.pending.forget(token);
                            return Err(unexpected("ping", other));
                        }
                        Err(e) => {
                            self.pending.forget(token);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
        self.pending.close();
    }

    fn lock_slot(&self) -> Result<std::sync::MutexGuard<'_, Option<SurfaceSlot>>> {
        self.slot
            .lock()
            .map_err(|_| Error::SurfaceUnavailable("surface slot poisoned".to_string()))
    }
}

fn unbound() -> Error {
    Error::SurfaceUnavailable("no surface is bound to the offload channel".to_string())
}

fn unexpected(request: &str, ack: Ack) -> Error {
    Error::OffloadLost(format!(
        "unexpected reply {:?} to {} request",
        ack.message(),
        request
    ))
}

fn dispatch_replies(inbound: std_mpsc::Receiver<Reply>, pending: &PendingReplies, lost: &AtomicBool) {
    while let Ok(reply) = inbound.recv() {
        let token = reply.token;
        if !pending.resolve(reply) {
            log::warn!("dropping reply {} with no waiter", token);
        }
    }
    lost.store(true, Ordering::SeqCst);
    let abandoned = pending.close();
    if abandoned > 0 {
        log::warn!(
            "offload context disconnected with {} requests outstanding",
            abandoned
        );
    } else {
        log::info!("offload context disconnected");
    }
}

/// Background side: owns the surface after transfer and serves requests
/// until the request channel closes.
fn run_worker<R>(
    mut commands: mpsc::UnboundedReceiver<Envelope>,
    replies: std_mpsc::Sender<Reply>,
    renderer: Arc<R>,
    config: RenderConfig,
) -> Result<()>
where
    R: SurfaceRenderer + ?Sized + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| Error::OffloadLost(format!("failed to build worker runtime: {}", e)))?;

    runtime.block_on(async move {
        let mut worker = Worker {
            coordinator: None,
            renderer,
            config,
            replies,
        };
        log::info!("offload worker started");
        while let Some(envelope) = commands.recv().await {
            worker.handle(envelope);
        }
    });
    log::info!("offload worker exiting");
    Ok(())
}

struct Worker<R: SurfaceRenderer + ?Sized> {
    coordinator: Option<Arc<RenderCoordinator<R>>>,
    renderer: Arc<R>,
    config: RenderConfig,
    replies: std_mpsc::Sender<Reply>,
}

impl<R: SurfaceRenderer + ?Sized + 'static> Worker<R> {
    fn handle(&mut self, envelope: Envelope) {
        let Envelope { token, command } = envelope;
        log::debug!("offload worker received {} ({})", command.name(), token);

        match command {
            Command::Init => self.reply(token, Ok(Ack::Initialized)),
            Command::Ping => self.reply(token, Ok(Ack::Pong)),
            Command::TransferSurface(surface) => {
                let result = if self.coordinator.is_some() {
                    Err(Error::SurfaceTransferred)
                } else {
                    self.coordinator = Some(Arc::new(RenderCoordinator::new(
                        surface,
                        Arc::clone(&self.renderer),
                        &self.config,
                    )));
                    Ok(Ack::SurfaceReceived)
                };
                self.reply(token, result);
            }
            Command::Resize { width, height } => {
                let result = self
                    .coordinator()
                    .and_then(|c| c.resize(width, height))
                    .map(|()| Ack::Resized);
                self.reply(token, result);
            }
            Command::Render(request) => match self.coordinator() {
                // renders run as tasks so the next message can supersede them
                Ok(coordinator) => {
                    let task = tokio::spawn(async move { coordinator.render(&request).await });
                    let replies = self.replies.clone();
                    tokio::spawn(async move {
                        let result = match task.await {
                            Ok(result) => result.map(Ack::RenderComplete),
                            Err(e) => Err(Error::OffloadLost(format!("render task aborted: {}", e))),
                        };
                        let _ = replies.send(Reply { token, result });
                    });
                }
                Err(e) => self.reply(token, Err(e)),
            },
            Command::Snapshot => {
                let result = self
                    .coordinator()
                    .and_then(|c| c.snapshot())
                    .map(Ack::Snapshot);
                self.reply(token, result);
            }
        }
    }

    fn coordinator(&self) -> Result<Arc<RenderCoordinator<R>>> {
        self.coordinator.clone().ok_or_else(|| {
            Error::SurfaceUnavailable("no surface has been transferred yet".to_string())
        })
    }

    fn reply(&self, token: CorrelationToken, result: Result<Ack>) {
        if self.replies.send(Reply { token, result }).is_err() {
            log::warn!("reply {} dropped: caller side is gone", token);
        }
    }
}
