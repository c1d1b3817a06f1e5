//! Render dispatcher: the serialized owner of the page engine.
//!
//! Many concurrent handlers submit jobs through a cheap, non-blocking
//! channel send; a single worker thread owns the engine (which is stateful
//! and not reentrant) and executes jobs strictly one at a time, publishing
//! exactly one completion per job into the registry. Submission never
//! blocks on rendering; callers only wait on their own result.

use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::engine::{PageEngine, Surface, Viewport};
use crate::error::{Error, Result};
use crate::params::{RenderJob, DEF_HEIGHT, MAX_DOCUMENT_HEIGHT};
use crate::registry::{Completion, CompletionRegistry, RenderFailure};

/// Cloneable submission handle to the render worker.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<RenderJob>,
}

impl Dispatcher {
    /// Spawn the worker thread and construct the engine on it, so the engine
    /// never has to cross a thread boundary. Resolves once the engine is up
    /// or failed to initialize.
    pub async fn spawn<E, F>(make_engine: F, registry: CompletionRegistry) -> Result<Self>
    where
        E: PageEngine + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<RenderJob>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("render-worker".to_string())
            .spawn(move || {
                let mut engine = match make_engine() {
                    Ok(engine) => engine,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));

                while let Some(job) = rx.blocking_recv() {
                    let id = job.id.clone();
                    debug!(id = %id, url = %job.url, "render job started");
                    let completion = run_job(&mut engine, job);
                    if let Completion::Failed(failure) = &completion {
                        warn!(id = %id, tag = failure.tag(), "render job failed");
                    }
                    registry.publish(&id, completion);
                }
            })
            .map_err(|e| Error::Initialization(format!("failed to spawn render worker: {}", e)))?;

        init_rx
            .await
            .map_err(|_| Error::Initialization("render worker exited during init".to_string()))??;

        Ok(Self { tx })
    }

    /// Queue a job for the worker. Non-blocking and thread-safe; fails only
    /// when the worker is gone.
    pub fn submit(&self, job: RenderJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|e| Error::Dispatch(e.to_string()))
    }
}

// Execute one job to a completion. Every early return publishes a failure
// tag; success returns the encoded bytes. Only this function mutates the
// envelope, and only to resolve the full-page height.
fn run_job<E: PageEngine>(engine: &mut E, mut job: RenderJob) -> Completion {
    // The true height is unknown until the page is loaded, so load with a
    // square viewport first.
    engine.set_viewport(Viewport {
        width: job.width,
        height: job.width,
    });
    if let Err(err) = engine.load_page(&job) {
        debug!(id = %job.id, error = %err, "page load failed");
        return Completion::Failed(RenderFailure::Load);
    }
    settle(job.delay);

    if job.full {
        let measured = match engine.measure_height() {
            Ok(h) => h,
            Err(err) => {
                debug!(id = %job.id, error = %err, "height measurement failed");
                return Completion::Failed(RenderFailure::Load);
            }
        };
        job.height = if measured == 0 {
            DEF_HEIGHT
        } else {
            measured.min(MAX_DOCUMENT_HEIGHT)
        };
        engine.set_viewport(Viewport {
            width: job.width,
            height: job.height,
        });
        settle(job.delay);
    } else {
        engine.set_viewport(Viewport {
            width: job.width,
            height: job.height,
        });
    }

    let mut surface = match Surface::allocate(job.width, job.height) {
        Ok(surface) => surface,
        Err(_) => return Completion::Failed(RenderFailure::Surface),
    };
    {
        let mut painter = match surface.painter() {
            Ok(painter) => painter,
            Err(_) => return Completion::Failed(RenderFailure::Context),
        };
        if engine.paint(&mut painter).is_err() {
            return Completion::Failed(RenderFailure::Load);
        }
    }

    let bytes = match surface.encode(job.format, job.quality) {
        Ok(bytes) => bytes,
        Err(_) => return Completion::Failed(RenderFailure::Encode),
    };
    if bytes.is_empty() {
        return Completion::Failed(RenderFailure::Buffer);
    }
    Completion::Image(bytes)
}

// Let in-page async rendering settle before capture. Sleeping here suspends
// only the engine's serialized turn, never HTTP handling.
fn settle(delay_ms: u64) {
    if delay_ms > 0 {
        thread::sleep(Duration::from_millis(delay_ms));
    }
}
