use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::sync::{Notify, mpsc};
use tracing::{error, info, warn};
use visor::screencast::{Frame, FrameSink, ScreencastConfig, ScreencastDriver};
use visor::transport::connect_ws;
use visor::{CdpConnection, Error};

/// Hands each frame to the writer task as a numbered JPEG path.
///
/// `draw` runs on the frame routing task, so the actual disk write
/// happens elsewhere; a slow disk must not hold up frame acks.
struct FileSink {
    dir: PathBuf,
    frame_tx: mpsc::UnboundedSender<(PathBuf, Vec<u8>)>,
    count: Arc<AtomicU64>,
    max_frames: Option<u64>,
    done: Arc<Notify>,
}

impl FrameSink for FileSink {
    fn draw(&mut self, frame: &Frame) -> visor::Result<()> {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("frame-{n:06}.jpg"));
        self.frame_tx
            .send((path, frame.data.clone()))
            .map_err(|_| Error::FrameSink("frame writer stopped".into()))?;
        if self.max_frames.is_some_and(|max| n + 1 >= max) {
            self.done.notify_one();
        }
        Ok(())
    }
}

async fn write_frames(mut frame_rx: mpsc::UnboundedReceiver<(PathBuf, Vec<u8>)>) {
    while let Some((path, data)) = frame_rx.recv().await {
        if let Err(e) = tokio::fs::write(&path, &data).await {
            warn!("failed to write {}: {e}", path.display());
        }
    }
}

pub async fn execute(
    ws_url: &str,
    output: &Path,
    max_frames: Option<u64>,
    quality: u8,
) -> Result<()> {
    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("creating output directory {}", output.display()))?;

    let parts = connect_ws(ws_url).await?;
    let (connection, events) = CdpConnection::new(parts);
    let connection = Arc::new(connection);
    let pump = Arc::clone(&connection);
    tokio::spawn(async move { pump.run().await });

    let count = Arc::new(AtomicU64::new(0));
    let done = Arc::new(Notify::new());
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(frame_rx));
    let sink = FileSink {
        dir: output.to_path_buf(),
        frame_tx,
        count: Arc::clone(&count),
        max_frames,
        done: Arc::clone(&done),
    };

    let config = ScreencastConfig {
        quality,
        ..ScreencastConfig::default()
    };
    let (driver, mut error_rx) = ScreencastDriver::start(connection, events, sink, config).await?;
    info!("streaming to {}", output.display());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
        _ = done.notified() => {
            info!("frame limit reached");
        }
        err = error_rx.recv() => {
            if let Some(err) = err {
                if err.is_disconnect() {
                    info!("stream ended: {err}");
                } else {
                    error!("screencast failed: {err}");
                }
            }
        }
    }

    driver.close().await;
    // Dropping the driver drops the sink; the writer drains what is
    // queued and exits.
    drop(driver);
    let _ = writer.await;

    println!("{} frames written to {}", count.load(Ordering::SeqCst), output.display());
    Ok(())
}
