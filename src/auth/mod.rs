pub mod backend;
pub mod orchestrator;
pub mod service;

pub use backend::{AuthBackend, ExecBackend, SUCCESS_MARKER};
pub use orchestrator::{AuthConfig, AuthOrchestrator, AuthState};
pub use service::ServiceType;
