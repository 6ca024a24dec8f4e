pub mod routes;
pub mod runtime;

pub use routes::{AppState, create_router};
pub use runtime::{build_storage, shutdown_signal, start_server};
