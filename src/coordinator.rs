//! Single-flight render coordination over one owned surface.
//!
//! A new `render` call always supersedes the session in flight: it flips the
//! old session's cancel signal and starts immediately, without waiting for
//! the old session to notice. The old session stops at its next tile check
//! and reports `RenderOutcome::Superseded`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::rendering::raster::lock;
use crate::rendering::{CancelSignal, ChunkedRasterizer, Surface, SurfaceRenderer};
use crate::{scene, Error, RenderConfig, RenderRequest, Result};

/// Lifecycle of a render session.
///
/// `Completed`, `Superseded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Superseded,
    Failed,
}

/// How a render call ended. Supersession is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed { tiles: usize },
    Superseded { tiles: usize },
}

impl RenderOutcome {
    pub fn tiles(&self) -> usize {
        match self {
            RenderOutcome::Completed { tiles } | RenderOutcome::Superseded { tiles } => *tiles,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, RenderOutcome::Superseded { .. })
    }
}

/// One render attempt.
#[derive(Debug)]
pub struct RenderSession {
    id: u64,
    cancel: CancelSignal,
    state: Mutex<SessionState>,
}

impl RenderSession {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancel: CancelSignal::new(),
            state: Mutex::new(SessionState::Created),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Failed)
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }
}

/// Clears the current-session slot when the session it guards ends, however
/// it ends (completion, supersession, error or the render future being
/// dropped). A newer session in the slot is left alone.
struct SessionGuard<'a> {
    slot: &'a Mutex<Option<Arc<RenderSession>>>,
    session: Arc<RenderSession>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.slot.lock() {
            if current
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, &self.session))
            {
                *current = None;
            }
        }
    }
}

/// Owns a surface and the render session currently drawing onto it.
pub struct RenderCoordinator<R: SurfaceRenderer + ?Sized> {
    surface: Mutex<Surface>,
    renderer: Arc<R>,
    chunk_size: u32,
    current: Mutex<Option<Arc<RenderSession>>>,
    next_session: AtomicU64,
}

impl<R: SurfaceRenderer + ?Sized> RenderCoordinator<R> {
    pub fn new(surface: Surface, renderer: Arc<R>, config: &RenderConfig) -> Self {
        Self {
            surface: Mutex::new(surface),
            renderer,
            chunk_size: config.chunk_size,
            current: Mutex::new(None),
            next_session: AtomicU64::new(1),
        }
    }

    /// Render `request` onto the surface, superseding any render in flight.
    ///
    /// The surface is resized first when the request's dimensions differ
    /// from it, then cleared and drawn tile by tile.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        request.validate()?;

        let session = self.begin_session()?;
        let _guard = SessionGuard {
            slot: &self.current,
            session: Arc::clone(&session),
        };

        {
            let mut surface = lock(&self.surface)?;
            if (surface.width(), surface.height()) != (request.width, request.height) {
                surface.resize(request.width, request.height)?;
            }
        }

        let scene = scene::generate(&request.seed, request.width, request.height)?;
        session.set_state(SessionState::Running);
        log::debug!(
            "session {}: rendering seed {:?} at {}x{} ({} stars)",
            session.id,
            request.seed,
            request.width,
            request.height,
            scene.stars.len()
        );

        let raster = ChunkedRasterizer::new(
            &scene,
            &*self.renderer,
            &self.surface,
            session.cancel.clone(),
            self.chunk_size,
        )?;

        match raster.run().await {
            Ok(summary) if summary.cancelled => {
                session.set_state(SessionState::Superseded);
                log::debug!("session {} stopped after {} tiles", session.id, summary.drawn);
                Ok(RenderOutcome::Superseded {
                    tiles: summary.drawn,
                })
            }
            Ok(summary) => {
                session.set_state(SessionState::Completed);
                log::debug!("session {} completed ({} tiles)", session.id, summary.drawn);
                Ok(RenderOutcome::Completed {
                    tiles: summary.drawn,
                })
            }
            Err(e) => {
                session.set_state(SessionState::Failed);
                log::error!("session {} failed: {}", session.id, e);
                Err(e)
            }
        }
    }

    /// Change the surface dimensions. Does not start a render.
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        lock(&self.surface)?.resize(width, height)?;
        log::debug!("surface resized to {}x{}", width, height);
        Ok(())
    }

    /// A copy of the surface as it is right now.
    pub fn snapshot(&self) -> Result<Surface> {
        Ok(lock(&self.surface)?.clone())
    }

    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let surface = lock(&self.surface)?;
        Ok((surface.width(), surface.height()))
    }

    /// The session in flight, if any.
    pub fn current_session(&self) -> Option<Arc<RenderSession>> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn begin_session(&self) -> Result<Arc<RenderSession>> {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(RenderSession::new(id));
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::SurfaceUnavailable("session slot poisoned".to_string()))?;
        if let Some(previous) = current.replace(Arc::clone(&session)) {
            previous.cancel.cancel();
            log::info!("render session {} superseded by session {}", previous.id, id);
        }
        Ok(session)
    }
}
