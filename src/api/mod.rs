mod error;
mod server;

pub use server::{router, start_server, AppState};
