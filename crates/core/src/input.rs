//! Local input translation for the live frame renderer.
//!
//! Pointer and keyboard events arrive in the display surface's CSS
//! coordinate space; the remote page expects them in its own viewport
//! pixels. The mapping scales by the ratio of the surface's backing
//! resolution to its displayed size. Keyboard events are only forwarded
//! while the surface holds input focus.

use std::sync::Arc;
use visor_protocol::{KeyEvent, KeyEventType, MouseButton, MouseEvent, MouseEventType};

use crate::connection::CdpConnection;
use crate::error::Result;

/// Geometry of the display surface: how it is shown (CSS) versus the
/// resolution it is backed by.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceGeometry {
    pub css_width: f64,
    pub css_height: f64,
    pub backing_width: f64,
    pub backing_height: f64,
}

impl SurfaceGeometry {
    /// Map a point from displayed coordinates to remote viewport
    /// coordinates.
    pub fn to_remote(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.backing_width / self.css_width,
            y * self.backing_height / self.css_height,
        )
    }
}

/// A local pointer action on the surface.
#[derive(Debug, Clone, Copy)]
pub enum PointerAction {
    Down,
    Up,
    Move,
    Wheel { delta_x: f64, delta_y: f64 },
}

/// A local pointer event, in CSS coordinates.
#[derive(Debug, Clone, Copy)]
pub struct PointerInput {
    pub action: PointerAction,
    pub x: f64,
    pub y: f64,
    pub button: MouseButton,
    pub modifiers: u32,
    pub click_count: u32,
}

/// A local keyboard action.
#[derive(Debug, Clone)]
pub struct KeyInput {
    pub kind: KeyEventType,
    pub key: String,
    pub code: String,
    pub windows_virtual_key_code: u32,
    pub text: Option<String>,
    pub modifiers: u32,
}

/// Translate a pointer event into the remote dispatch shape.
pub fn translate_pointer(input: &PointerInput, geometry: &SurfaceGeometry) -> MouseEvent {
    let (x, y) = geometry.to_remote(input.x, input.y);
    let (kind, delta_x, delta_y) = match input.action {
        PointerAction::Down => (MouseEventType::MousePressed, None, None),
        PointerAction::Up => (MouseEventType::MouseReleased, None, None),
        PointerAction::Move => (MouseEventType::MouseMoved, None, None),
        PointerAction::Wheel { delta_x, delta_y } => {
            (MouseEventType::MouseWheel, Some(delta_x), Some(delta_y))
        }
    };
    MouseEvent {
        kind,
        x,
        y,
        button: input.button,
        modifiers: input.modifiers,
        click_count: input.click_count,
        delta_x,
        delta_y,
    }
}

/// Translate a keyboard event into the remote dispatch shape.
///
/// Returns `None` when the surface is not focused; unfocused surfaces
/// must not capture typing meant for the rest of the application.
pub fn translate_key(input: &KeyInput, focused: bool) -> Option<KeyEvent> {
    if !focused {
        return None;
    }
    Some(KeyEvent {
        kind: input.kind,
        key: input.key.clone(),
        code: input.code.clone(),
        windows_virtual_key_code: input.windows_virtual_key_code,
        text: input.text.clone(),
        modifiers: input.modifiers,
    })
}

/// Forwards translated input over an attached page session.
pub struct InputForwarder {
    connection: Arc<CdpConnection>,
    session_id: String,
    geometry: SurfaceGeometry,
    focused: bool,
}

impl InputForwarder {
    pub fn new(connection: Arc<CdpConnection>, session_id: String, geometry: SurfaceGeometry) -> Self {
        Self {
            connection,
            session_id,
            geometry,
            focused: false,
        }
    }

    /// Update the surface geometry after a resize.
    pub fn set_geometry(&mut self, geometry: SurfaceGeometry) {
        self.geometry = geometry;
    }

    pub fn set_focus(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    /// Dispatch a pointer event to the remote page.
    pub async fn pointer(&self, input: &PointerInput) -> Result<()> {
        let event = translate_pointer(input, &self.geometry);
        self.connection
            .send_command(
                "Input.dispatchMouseEvent",
                serde_json::to_value(&event)?,
                Some(&self.session_id),
            )
            .await?;
        Ok(())
    }

    /// Dispatch a keyboard event to the remote page. Silently dropped
    /// while the surface is unfocused.
    pub async fn key(&self, input: &KeyInput) -> Result<()> {
        let Some(event) = translate_key(input, self.focused) else {
            return Ok(());
        };
        self.connection
            .send_command(
                "Input.dispatchKeyEvent",
                serde_json::to_value(&event)?,
                Some(&self.session_id),
            )
            .await?;
        Ok(())
    }

    /// Convenience: press and release at a point.
    pub async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<()> {
        let base = PointerInput {
            action: PointerAction::Down,
            x,
            y,
            button,
            modifiers: 0,
            click_count: 1,
        };
        self.pointer(&base).await?;
        self.pointer(&PointerInput {
            action: PointerAction::Up,
            ..base
        })
        .await
    }

    /// The page session this forwarder dispatches into.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_transport::FakeTransportBuilder;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn coordinates_scale_by_backing_ratio() {
        let geometry = SurfaceGeometry {
            css_width: 640.0,
            css_height: 360.0,
            backing_width: 1280.0,
            backing_height: 720.0,
        };
        assert_eq!(geometry.to_remote(320.0, 90.0), (640.0, 180.0));
    }

    #[test]
    fn non_uniform_scaling_uses_each_axis() {
        let geometry = SurfaceGeometry {
            css_width: 400.0,
            css_height: 300.0,
            backing_width: 1200.0,
            backing_height: 600.0,
        };
        let (x, y) = geometry.to_remote(100.0, 150.0);
        assert_eq!(x, 300.0);
        assert_eq!(y, 300.0);
    }

    #[test]
    fn pointer_down_translates_to_mouse_pressed() {
        let geometry = SurfaceGeometry {
            css_width: 640.0,
            css_height: 360.0,
            backing_width: 1280.0,
            backing_height: 720.0,
        };
        let event = translate_pointer(
            &PointerInput {
                action: PointerAction::Down,
                x: 10.0,
                y: 20.0,
                button: MouseButton::Left,
                modifiers: 0,
                click_count: 1,
            },
            &geometry,
        );
        assert_eq!(event.kind, MouseEventType::MousePressed);
        assert_eq!(event.x, 20.0);
        assert_eq!(event.y, 40.0);
        assert_eq!(event.button, MouseButton::Left);
    }

    #[test]
    fn wheel_translates_with_deltas() {
        let geometry = SurfaceGeometry {
            css_width: 100.0,
            css_height: 100.0,
            backing_width: 100.0,
            backing_height: 100.0,
        };
        let event = translate_pointer(
            &PointerInput {
                action: PointerAction::Wheel {
                    delta_x: 0.0,
                    delta_y: -53.0,
                },
                x: 5.0,
                y: 5.0,
                button: MouseButton::None,
                modifiers: 0,
                click_count: 0,
            },
            &geometry,
        );
        assert_eq!(event.kind, MouseEventType::MouseWheel);
        assert_eq!(event.delta_y, Some(-53.0));
    }

    #[test]
    fn keys_require_focus() {
        let input = KeyInput {
            kind: KeyEventType::KeyDown,
            key: "a".into(),
            code: "KeyA".into(),
            windows_virtual_key_code: 65,
            text: None,
            modifiers: 0,
        };
        assert!(translate_key(&input, false).is_none());
        let event = translate_key(&input, true).unwrap();
        assert_eq!(event.key, "a");
    }

    #[tokio::test]
    async fn forwarder_dispatches_scaled_mouse_event_on_session() {
        let (parts, controller) = FakeTransportBuilder::new().build();
        let (connection, _events) = crate::connection::CdpConnection::new(parts);
        let connection = Arc::new(connection);
        let conn = Arc::clone(&connection);
        tokio::spawn(async move { conn.run().await });
        controller.stub("Input.dispatchMouseEvent", json!({}));

        let forwarder = InputForwarder::new(
            connection,
            "s1".into(),
            SurfaceGeometry {
                css_width: 640.0,
                css_height: 360.0,
                backing_width: 1280.0,
                backing_height: 720.0,
            },
        );
        forwarder.click(320.0, 180.0, MouseButton::Left).await.unwrap();

        let sent = controller.sent_with_method("Input.dispatchMouseEvent");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["sessionId"], "s1");
        assert_eq!(sent[0]["params"]["type"], "mousePressed");
        assert_eq!(sent[0]["params"]["x"], 640.0);
        assert_eq!(sent[0]["params"]["y"], 360.0);
        assert_eq!(sent[1]["params"]["type"], "mouseReleased");
    }

    #[tokio::test]
    async fn unfocused_key_event_sends_nothing() {
        let (parts, controller) = FakeTransportBuilder::new().build();
        let (connection, _events) = crate::connection::CdpConnection::new(parts);
        let connection = Arc::new(connection);
        let conn = Arc::clone(&connection);
        tokio::spawn(async move { conn.run().await });
        controller.stub("Input.dispatchKeyEvent", json!({}));

        let mut forwarder = InputForwarder::new(
            connection,
            "s1".into(),
            SurfaceGeometry {
                css_width: 100.0,
                css_height: 100.0,
                backing_width: 100.0,
                backing_height: 100.0,
            },
        );

        let input = KeyInput {
            kind: KeyEventType::KeyDown,
            key: "a".into(),
            code: "KeyA".into(),
            windows_virtual_key_code: 65,
            text: None,
            modifiers: 0,
        };
        forwarder.key(&input).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(controller.sent_with_method("Input.dispatchKeyEvent").is_empty());

        forwarder.set_focus(true);
        forwarder.key(&input).await.unwrap();
        let sent = controller.sent_with_method("Input.dispatchKeyEvent");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["params"]["type"], "keyDown");
    }
}
