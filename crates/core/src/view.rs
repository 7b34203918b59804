//! View model for the VNC (server-composited) frame embed.
//!
//! The remote desktop arrives pre-rendered; all this side does is decide
//! whether to show the stream or a status placeholder, and at what scale.
//! Scale is recomputed on window resize, throttled so a drag-resize does
//! not recompute per pixel.

use std::time::{Duration, Instant};

use crate::lifecycle::ResourceStatus;

/// Minimum spacing between resize recomputations.
pub const RESIZE_THROTTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Fixed chrome around the embed that does not belong to the frame:
/// session sidebar, horizontal padding and the tab bar.
#[derive(Debug, Clone, Copy)]
pub struct ChromeInsets {
    pub sidebar: f64,
    pub horizontal_padding: f64,
    pub tab_bar: f64,
}

impl Default for ChromeInsets {
    fn default() -> Self {
        Self {
            sidebar: 260.0,
            horizontal_padding: 48.0,
            tab_bar: 40.0,
        }
    }
}

impl ChromeInsets {
    /// Space left for the frame after subtracting fixed chrome.
    pub fn available(&self, window: Size) -> Size {
        Size {
            width: (window.width - self.sidebar - self.horizontal_padding).max(0.0),
            height: (window.height - self.tab_bar).max(0.0),
        }
    }
}

/// What the embed should render.
#[derive(Debug, Clone, PartialEq)]
pub enum VncView {
    /// Not connected; show the current status instead of a frame.
    Placeholder(ResourceStatus),
    /// Render the remote frame at `scale`; `display` is the scaled size.
    Frame { scale: f64, display: Size },
}

/// Scale factor fitting `viewport` into `available` space.
pub fn scale_for(viewport: Size, available: Size) -> f64 {
    if viewport.width <= 0.0 || viewport.height <= 0.0 {
        return 1.0;
    }
    (available.width / viewport.width).min(available.height / viewport.height)
}

/// Decide the render state for the VNC embed.
///
/// A frame is only rendered when the status is exactly `Connected` and a
/// non-empty url is present; every other combination is a placeholder.
pub fn vnc_view(
    status: ResourceStatus,
    url: Option<&str>,
    viewport: Size,
    window: Size,
    insets: &ChromeInsets,
) -> VncView {
    let usable = matches!(status, ResourceStatus::Connected)
        && url.is_some_and(|u| !u.is_empty());
    if !usable {
        return VncView::Placeholder(status);
    }

    let scale = scale_for(viewport, insets.available(window));
    VncView::Frame {
        scale,
        display: Size {
            width: viewport.width * scale,
            height: viewport.height * scale,
        },
    }
}

/// Rectangle placing a frame inside a container: scaled to preserve
/// aspect ratio and centered. Used by sinks that letterbox the stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub fn fit_centered(frame: Size, container: Size) -> FitRect {
    let scale = scale_for(frame, container);
    let width = frame.width * scale;
    let height = frame.height * scale;
    FitRect {
        x: (container.width - width) / 2.0,
        y: (container.height - height) / 2.0,
        width,
        height,
    }
}

/// Monotonic-clock gate for resize recomputation.
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// True when enough time has passed since the last accepted call.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(RESIZE_THROTTLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: Size = Size {
        width: 1280.0,
        height: 720.0,
    };

    #[test]
    fn scale_is_min_of_axis_ratios() {
        let scale = scale_for(VIEWPORT, Size::new(640.0, 720.0));
        assert_eq!(scale, 0.5);

        let scale = scale_for(VIEWPORT, Size::new(1280.0, 360.0));
        assert_eq!(scale, 0.5);
    }

    #[test]
    fn display_size_is_viewport_times_scale() {
        let insets = ChromeInsets {
            sidebar: 0.0,
            horizontal_padding: 0.0,
            tab_bar: 0.0,
        };
        let view = vnc_view(
            ResourceStatus::Connected,
            Some("wss://sandbox/vnc"),
            VIEWPORT,
            Size::new(640.0, 720.0),
            &insets,
        );
        match view {
            VncView::Frame { scale, display } => {
                assert_eq!(scale, 0.5);
                assert_eq!(display, Size::new(640.0, 360.0));
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn insets_reduce_available_space() {
        let insets = ChromeInsets {
            sidebar: 200.0,
            horizontal_padding: 40.0,
            tab_bar: 60.0,
        };
        let avail = insets.available(Size::new(1520.0, 780.0));
        assert_eq!(avail, Size::new(1280.0, 720.0));

        // Window smaller than chrome clamps to zero instead of negative.
        let avail = insets.available(Size::new(100.0, 30.0));
        assert_eq!(avail, Size::new(0.0, 0.0));
    }

    #[test]
    fn placeholder_unless_connected_with_url() {
        let insets = ChromeInsets::default();
        let window = Size::new(1920.0, 1080.0);

        for status in [
            ResourceStatus::Init,
            ResourceStatus::Unavailable,
            ResourceStatus::Queuing,
            ResourceStatus::Connecting,
            ResourceStatus::Expired,
            ResourceStatus::Error,
        ] {
            assert_eq!(
                vnc_view(status, Some("wss://sandbox/vnc"), VIEWPORT, window, &insets),
                VncView::Placeholder(status),
            );
        }

        // Connected with a missing or empty url is still a placeholder.
        assert_eq!(
            vnc_view(ResourceStatus::Connected, None, VIEWPORT, window, &insets),
            VncView::Placeholder(ResourceStatus::Connected),
        );
        assert_eq!(
            vnc_view(ResourceStatus::Connected, Some(""), VIEWPORT, window, &insets),
            VncView::Placeholder(ResourceStatus::Connected),
        );

        assert!(matches!(
            vnc_view(
                ResourceStatus::Connected,
                Some("wss://sandbox/vnc"),
                VIEWPORT,
                window,
                &insets
            ),
            VncView::Frame { .. }
        ));
    }

    #[test]
    fn fit_centers_and_letterboxes() {
        let rect = fit_centered(VIEWPORT, Size::new(1280.0, 1440.0));
        assert_eq!(rect.width, 1280.0);
        assert_eq!(rect.height, 720.0);
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.y, 360.0);
    }

    #[test]
    fn throttle_gates_rapid_calls() {
        let mut throttle = Throttle::new(Duration::from_millis(50));
        assert!(throttle.ready());
        assert!(!throttle.ready());

        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }
}
