// visor-core: remote sandbox lifecycle and live frame streaming.
//
// Two cooperating pieces: the resource lifecycle controller turns a
// session's intent to use a remote sandbox into a managed allocation, and
// the frame renderer consumes the granted endpoint to stream live frames
// and forward local input.

pub mod connection;
pub mod error;
pub mod fake_transport;
pub mod input;
pub mod lifecycle;
pub mod screencast;
pub mod transport;
pub mod view;

pub use connection::{CdpConnection, CdpEvent, DEFAULT_COMMAND_TIMEOUT};
pub use error::{Error, Result};
pub use input::{InputForwarder, KeyInput, PointerAction, PointerInput, SurfaceGeometry};
pub use lifecycle::{
    AllocationApi, GrantedEndpoint, OperatorKind, POLL_INTERVAL, ResourceController,
    ResourceRequest, ResourceStatus, SessionOrigin,
};
pub use screencast::{
    CANONICAL_VIEWPORT, Frame, FrameSink, ScreencastConfig, ScreencastDriver, ViewerPhase,
};
pub use transport::{Transport, TransportParts, TransportReceiver, connect_ws};
pub use view::{ChromeInsets, Size, Throttle, VncView, fit_centered, scale_for, vnc_view};
