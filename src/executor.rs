//! Execution strategy: render in-process or on a background context.
//!
//! `Executor::probe` picks the strategy once at startup. Both variants
//! expose the same operations to the UI layer.

use std::sync::Arc;

use crate::coordinator::{RenderCoordinator, RenderOutcome};
use crate::offload::OffloadChannel;
use crate::rendering::{DisplayLayout, Surface, SurfaceRenderer};
use crate::{RenderConfig, RenderRequest, Result, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    InProcess,
    Offload,
}

/// Renders synchronously in the caller's context, without any messaging.
pub struct InProcessExecutor {
    coordinator: Arc<RenderCoordinator<dyn SurfaceRenderer>>,
    viewport: Viewport,
}

impl InProcessExecutor {
    pub fn new(surface: Surface, renderer: Arc<dyn SurfaceRenderer>, config: &RenderConfig) -> Self {
        Self {
            coordinator: Arc::new(RenderCoordinator::new(surface, renderer, config)),
            viewport: config.viewport,
        }
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        self.coordinator.render(request).await
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<DisplayLayout> {
        self.coordinator.resize(width, height)?;
        Ok(DisplayLayout::fit(width, height, self.viewport))
    }

    pub fn snapshot(&self) -> Result<Surface> {
        self.coordinator.snapshot()
    }

    pub fn coordinator(&self) -> &Arc<RenderCoordinator<dyn SurfaceRenderer>> {
        &self.coordinator
    }
}

/// Renders on a background context over an `OffloadChannel`.
pub struct OffloadExecutor {
    channel: OffloadChannel,
    viewport: Viewport,
}

impl OffloadExecutor {
    pub fn new(channel: OffloadChannel, viewport: Viewport) -> Self {
        Self { channel, viewport }
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        self.channel.render(request).await
    }

    pub async fn resize(&self, width: u32, height: u32) -> Result<DisplayLayout> {
        self.channel.resize(width, height).await?;
        Ok(DisplayLayout::fit(width, height, self.viewport))
    }

    pub async fn snapshot(&self) -> Result<Surface> {
        self.channel.snapshot().await
    }

    pub fn channel(&self) -> &OffloadChannel {
        &self.channel
    }
}

pub enum Executor {
    InProcess(InProcessExecutor),
    Offload(OffloadExecutor),
}

impl Executor {
    /// Choose a strategy for `surface`.
    ///
    /// When `config.offload` is set, a background worker is started and must
    /// answer an `Init` round-trip; otherwise, or if that fails, rendering
    /// falls back to the in-process executor with the same surface.
    pub async fn probe(
        surface: Surface,
        renderer: Arc<dyn SurfaceRenderer>,
        config: &RenderConfig,
    ) -> Self {
        if !config.offload {
            log::info!("offload disabled; rendering in-process");
            return Self::in_process(surface, renderer, config);
        }

        let channel = match OffloadChannel::spawn_worker(Arc::clone(&renderer), config) {
            Ok(channel) => channel,
            Err(e) => {
                log::warn!("no background context available ({}); rendering in-process", e);
                return Self::in_process(surface, renderer, config);
            }
        };
        if let Err(e) = channel.init().await {
            log::warn!("offload handshake failed ({}); rendering in-process", e);
            // detach rather than join: the worker may be hung
            drop(channel);
            return Self::in_process(surface, renderer, config);
        }
        match channel.bind(surface) {
            Ok(()) => {
                log::info!("rendering on the offload context");
                Executor::Offload(OffloadExecutor::new(channel, config.viewport))
            }
            Err(surface) => {
                log::warn!("offload channel refused the surface; rendering in-process");
                drop(channel);
                Self::in_process(surface, renderer, config)
            }
        }
    }

    pub fn in_process(
        surface: Surface,
        renderer: Arc<dyn SurfaceRenderer>,
        config: &RenderConfig,
    ) -> Self {
        Executor::InProcess(InProcessExecutor::new(surface, renderer, config))
    }

    pub fn kind(&self) -> ExecutorKind {
        match self {
            Executor::InProcess(_) => ExecutorKind::InProcess,
            Executor::Offload(_) => ExecutorKind::Offload,
        }
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        match self {
            Executor::InProcess(local) => local.render(request).await,
            Executor::Offload(remote) => remote.render(request).await,
        }
    }

    /// Resize the surface and compute how it is displayed in the viewport.
    /// Does not start a render.
    pub async fn resize(&self, width: u32, height: u32) -> Result<DisplayLayout> {
        match self {
            Executor::InProcess(local) => local.resize(width, height),
            Executor::Offload(remote) => remote.resize(width, height).await,
        }
    }

    pub async fn snapshot(&self) -> Result<Surface> {
        match self {
            Executor::InProcess(local) => local.snapshot(),
            Executor::Offload(remote) => remote.snapshot().await,
        }
    }

    /// Release the executor, stopping the background context if there is one.
    pub async fn close(self) {
        if let Executor::Offload(remote) = self {
            remote.channel.close().await;
        }
    }
}
