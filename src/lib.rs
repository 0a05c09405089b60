pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod models;
pub mod permissions;
pub mod registry;
pub mod store;
pub mod system;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::GateError;
pub use events::{Event, EventBus, EventTopic, Subscription};
pub use handler::ActionHandler;
pub use models::{
    ActionRequest, ActionResult, ActionStatus, Expiration, Params, PermissionDef, PermissionGrant,
    RequiredPermission, Scope,
};
pub use permissions::PermissionManager;
pub use registry::HandlerRegistry;
pub use store::{Store, MEMORY_PATH};
pub use system::ActionSystem;
