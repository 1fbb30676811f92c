pub mod bus;
pub mod runtime;
pub mod session;

pub use bus::NotificationSink;
pub use runtime::{allow_all, deny_all, Agent, SafetyAcknowledger};
pub use session::{
    LocalSurfaceFactory, Provisioned, RemoteSurfaceFactory, Session, SessionRegistry, SurfaceFactory,
};
