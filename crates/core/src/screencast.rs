//! Screencast driver: attaches to a remote page and streams its frames.
//!
//! Given an open debugging connection, the driver locates (or creates) the
//! active page target, pins the viewport to the canonical size, starts a
//! screencast and routes incoming frames to a [`FrameSink`]. Every frame
//! is acknowledged after its draw has been attempted; an unacknowledged
//! stream stalls once the remote's in-flight window fills.
//!
//! # Phase machine
//!
//! ```text
//! Idle -> Connecting -> Streaming <-> Reattaching
//!                          |
//!                          v
//!                        Closed        (teardown or url cleared)
//! ```
//!
//! `Closed` is final for this driver instance; a new endpoint url means a
//! new driver. The connection and its attached page session are owned by
//! exactly one driver at a time, and a target hand-off is strictly
//! stop-old-then-start-new, never two concurrent streams.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use visor_protocol::{
    ScreencastFormat, ScreencastFrameAck, ScreencastFrameParams, StartScreencastParams,
};

use crate::connection::{CdpConnection, CdpEvent};
use crate::error::{Error, Result};
use crate::input::{InputForwarder, SurfaceGeometry};

/// Canonical remote viewport, fixed before the screencast starts.
pub const CANONICAL_VIEWPORT: (u32, u32) = (1280, 720);

/// JPEG quality used for the stream.
pub const DEFAULT_QUALITY: u8 = 80;

/// Timeout for best-effort teardown commands; the remote side may already
/// be gone.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Renderer phase for one driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    Idle,
    Connecting,
    Streaming,
    Reattaching,
    Closed,
}

/// One decoded screencast frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub device_width: f64,
    pub device_height: f64,
}

/// Where decoded frames go. Implementations draw into whatever surface
/// the host provides (a canvas, a file, a test recorder).
pub trait FrameSink: Send + 'static {
    fn draw(&mut self, frame: &Frame) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct ScreencastConfig {
    pub viewport: (u32, u32),
    pub quality: u8,
}

impl Default for ScreencastConfig {
    fn default() -> Self {
        Self {
            viewport: CANONICAL_VIEWPORT,
            quality: DEFAULT_QUALITY,
        }
    }
}

#[derive(Debug, Clone)]
struct PageHandle {
    target_id: String,
    session_id: String,
}

/// Drives a screencast over an existing debugging connection.
pub struct ScreencastDriver {
    connection: Arc<CdpConnection>,
    page: Arc<Mutex<Option<PageHandle>>>,
    phase: Arc<Mutex<ViewerPhase>>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ScreencastDriver {
    /// Attach to the active page and start streaming frames into `sink`.
    ///
    /// Returns the driver handle and a stream of runtime errors (failed
    /// re-attachments after a target change). Errors during initial setup
    /// are returned directly.
    pub async fn start<S: FrameSink>(
        connection: Arc<CdpConnection>,
        events: mpsc::UnboundedReceiver<CdpEvent>,
        sink: S,
        config: ScreencastConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Error>)> {
        let phase = Arc::new(Mutex::new(ViewerPhase::Connecting));

        // Discover targets up front so hand-offs arrive as events later.
        connection
            .send_command("Target.setDiscoverTargets", json!({"discover": true}), None)
            .await?;

        let target_id = find_or_create_page(&connection).await?;
        let session_id = attach_page(&connection, &target_id).await?;
        setup_session(&connection, &session_id, &config).await?;

        let page = Arc::new(Mutex::new(Some(PageHandle {
            target_id,
            session_id,
        })));
        *phase.lock() = ViewerPhase::Streaming;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(event_loop(
            Arc::clone(&connection),
            events,
            sink,
            Arc::clone(&page),
            Arc::clone(&phase),
            shutdown_rx,
            config,
            error_tx,
        ));

        Ok((
            Self {
                connection,
                page,
                phase,
                shutdown_tx,
                task,
            },
            error_rx,
        ))
    }

    pub fn phase(&self) -> ViewerPhase {
        *self.phase.lock()
    }

    /// Build an input forwarder for the currently attached page.
    ///
    /// Returns `None` when no page is attached (mid hand-off or closed).
    pub fn forwarder(&self, geometry: SurfaceGeometry) -> Option<InputForwarder> {
        let page = self.page.lock();
        page.as_ref().map(|p| {
            InputForwarder::new(
                Arc::clone(&self.connection),
                p.session_id.clone(),
                geometry,
            )
        })
    }

    /// Redirect open pages to a safe default without tearing down the
    /// connection. Used when an upstream error leaves the remote pages in
    /// an unusable state.
    pub async fn recover(&self) {
        let current = self.page.lock().clone();
        let targets = match self
            .connection
            .send_command("Target.getTargets", json!({}), None)
            .await
        {
            Ok(result) => page_targets(&result),
            Err(e) => {
                debug!(target = "visor.screencast", error = %e, "recover: target listing failed");
                return;
            }
        };

        for target_id in targets {
            let session = match &current {
                Some(p) if p.target_id == target_id => Some(p.session_id.clone()),
                _ => None,
            };
            match session {
                Some(session_id) => {
                    let _ = self
                        .connection
                        .send_command(
                            "Page.navigate",
                            json!({"url": "about:blank"}),
                            Some(&session_id),
                        )
                        .await;
                }
                None => {
                    // Attach transiently to redirect a page we are not
                    // streaming from.
                    let Ok(session_id) = attach_page(&self.connection, &target_id).await else {
                        continue;
                    };
                    let _ = self
                        .connection
                        .send_command(
                            "Page.navigate",
                            json!({"url": "about:blank"}),
                            Some(&session_id),
                        )
                        .await;
                    let _ = self
                        .connection
                        .send_command(
                            "Target.detachFromTarget",
                            json!({"sessionId": session_id}),
                            None,
                        )
                        .await;
                }
            }
        }
    }

    /// Tear the stream down: stop the screencast, close the page and stop
    /// routing frames. All network calls are best-effort; the remote side
    /// may already be gone.
    pub async fn close(&self) {
        *self.phase.lock() = ViewerPhase::Closed;
        let _ = self.shutdown_tx.send(true);

        let page = self.page.lock().take();
        let Some(page) = page else { return };

        let _ = self
            .connection
            .send_command_with_timeout(
                "Page.stopScreencast",
                json!({}),
                Some(&page.session_id),
                TEARDOWN_TIMEOUT,
            )
            .await;
        let _ = self
            .connection
            .send_command_with_timeout(
                "Target.closeTarget",
                json!({"targetId": page.target_id}),
                None,
                TEARDOWN_TIMEOUT,
            )
            .await;
        let _ = self
            .connection
            .send_command_with_timeout(
                "Target.detachFromTarget",
                json!({"sessionId": page.session_id}),
                None,
                TEARDOWN_TIMEOUT,
            )
            .await;
    }
}

impl Drop for ScreencastDriver {
    fn drop(&mut self) {
        // Frame routing must stop synchronously on unmount; the network
        // teardown in close() is best-effort and may not have run.
        let _ = self.shutdown_tx.send(true);
        self.task.abort();
    }
}

/// Locate the first page target, creating one when the browser has none.
async fn find_or_create_page(connection: &CdpConnection) -> Result<String> {
    let result = connection
        .send_command("Target.getTargets", json!({}), None)
        .await?;
    if let Some(target_id) = page_targets(&result).into_iter().next() {
        return Ok(target_id);
    }

    debug!(target = "visor.screencast", "no page target, creating one");
    let created = connection
        .send_command("Target.createTarget", json!({"url": "about:blank"}), None)
        .await?;
    created["targetId"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::NoPageTarget("createTarget returned no targetId".into()))
}

fn page_targets(get_targets_result: &Value) -> Vec<String> {
    get_targets_result["targetInfos"]
        .as_array()
        .map(|infos| {
            infos
                .iter()
                .filter(|info| info["type"] == "page")
                .filter_map(|info| info["targetId"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

async fn attach_page(connection: &CdpConnection, target_id: &str) -> Result<String> {
    let attached = connection
        .send_command(
            "Target.attachToTarget",
            json!({"targetId": target_id, "flatten": true}),
            None,
        )
        .await?;
    attached["sessionId"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol("attachToTarget returned no sessionId".into()))
}

/// Pin the viewport and start the screencast on an attached session.
async fn setup_session(
    connection: &CdpConnection,
    session_id: &str,
    config: &ScreencastConfig,
) -> Result<()> {
    let (width, height) = config.viewport;
    connection
        .send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
            Some(session_id),
        )
        .await?;
    connection
        .send_command("Page.enable", json!({}), Some(session_id))
        .await?;

    let params = StartScreencastParams {
        format: ScreencastFormat::Jpeg,
        quality: config.quality,
        every_nth_frame: 1,
        max_width: None,
        max_height: None,
    };
    connection
        .send_command(
            "Page.startScreencast",
            serde_json::to_value(&params)?,
            Some(session_id),
        )
        .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn event_loop<S: FrameSink>(
    connection: Arc<CdpConnection>,
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    mut sink: S,
    page: Arc<Mutex<Option<PageHandle>>>,
    phase: Arc<Mutex<ViewerPhase>>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: ScreencastConfig,
    error_tx: mpsc::UnboundedSender<Error>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown_rx.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event.method.as_str() {
            "Page.screencastFrame" => {
                let current = page.lock().clone();
                let Some(current) = current else { continue };
                // Frames from a superseded session can still be in flight
                // right after a hand-off; they belong to a stopped stream.
                if event.session_id.as_deref() != Some(current.session_id.as_str()) {
                    continue;
                }
                handle_frame(&connection, &mut sink, &current.session_id, event.params).await;
            }
            "Target.targetCreated" | "Target.targetInfoChanged" => {
                let info = &event.params["targetInfo"];
                if info["type"] != "page" {
                    continue;
                }
                let Some(new_target) = info["targetId"].as_str() else {
                    continue;
                };
                let is_current = page
                    .lock()
                    .as_ref()
                    .is_some_and(|p| p.target_id == new_target);
                if is_current {
                    continue;
                }
                if let Err(e) =
                    reattach(&connection, &page, &phase, &config, new_target).await
                {
                    warn!(target = "visor.screencast", error = %e, "re-attach failed");
                    let _ = error_tx.send(e);
                }
            }
            _ => {}
        }
    }

    let mut phase = phase.lock();
    if *phase != ViewerPhase::Closed {
        *phase = ViewerPhase::Closed;
    }
    debug!(target = "visor.screencast", "frame routing stopped");
}

/// Decode and draw one frame, then acknowledge it.
///
/// The ack goes out regardless of decode/draw failure; every received
/// frame is acknowledged exactly once or the stream stalls.
async fn handle_frame<S: FrameSink>(
    connection: &CdpConnection,
    sink: &mut S,
    page_session: &str,
    params: Value,
) {
    let frame_params: ScreencastFrameParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => {
            // Without a frame sessionId there is nothing to acknowledge.
            warn!(target = "visor.screencast", error = %e, "malformed screencast frame");
            return;
        }
    };

    match decode_frame(&frame_params) {
        Ok(frame) => {
            if let Err(e) = sink.draw(&frame) {
                warn!(target = "visor.screencast", error = %e, "frame draw failed");
            }
        }
        Err(e) => {
            warn!(target = "visor.screencast", error = %e, "frame decode failed");
        }
    }

    let ack = ScreencastFrameAck {
        session_id: frame_params.session_id,
    };
    if let Err(e) = ack_frame(connection, page_session, &ack).await {
        // Non-fatal: the stream continues as long as later acks land.
        debug!(target = "visor.screencast", error = %e, "frame ack failed");
    }
}

fn decode_frame(params: &ScreencastFrameParams) -> Result<Frame> {
    let data = BASE64
        .decode(params.data.as_bytes())
        .map_err(|e| Error::FrameDecode(e.to_string()))?;
    Ok(Frame {
        data,
        device_width: params.metadata.device_width,
        device_height: params.metadata.device_height,
    })
}

async fn ack_frame(
    connection: &CdpConnection,
    page_session: &str,
    ack: &ScreencastFrameAck,
) -> Result<()> {
    connection
        .send_command(
            "Page.screencastFrameAck",
            serde_json::to_value(ack)?,
            Some(page_session),
        )
        .await?;
    Ok(())
}

/// Strict hand-off to a new page target: stop the old stream before the
/// new one starts, so exactly one screencast is live at any time.
async fn reattach(
    connection: &CdpConnection,
    page: &Arc<Mutex<Option<PageHandle>>>,
    phase: &Arc<Mutex<ViewerPhase>>,
    config: &ScreencastConfig,
    new_target: &str,
) -> Result<()> {
    *phase.lock() = ViewerPhase::Reattaching;
    debug!(target = "visor.screencast", target_id = new_target, "page target changed, reattaching");

    let old = page.lock().take();
    if let Some(old) = old {
        let _ = connection
            .send_command_with_timeout(
                "Page.stopScreencast",
                json!({}),
                Some(&old.session_id),
                TEARDOWN_TIMEOUT,
            )
            .await;
        let _ = connection
            .send_command_with_timeout(
                "Target.detachFromTarget",
                json!({"sessionId": old.session_id}),
                None,
                TEARDOWN_TIMEOUT,
            )
            .await;
    }

    let session_id = attach_page(connection, new_target).await?;
    setup_session(connection, &session_id, config).await?;

    *page.lock() = Some(PageHandle {
        target_id: new_target.to_string(),
        session_id,
    });
    *phase.lock() = ViewerPhase::Streaming;
    Ok(())
}
