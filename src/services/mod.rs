pub mod core_api;
pub mod draw_service;
pub mod event_router;
pub mod period_service;
pub mod settings_service;
pub mod ticket_service;
pub mod watchtime_service;

pub use core_api::*;
pub use draw_service::*;
pub use event_router::*;
pub use period_service::*;
pub use settings_service::*;
pub use ticket_service::*;
pub use watchtime_service::*;
