pub mod handlers;
pub mod push;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod types;
pub mod websocket;

pub use push::{push_snapshot, spawn_event_forwarder, spawn_snapshot_refresher};
pub use routes::create_router;
pub use sessions::SessionRegistry;
pub use state::AppState;
