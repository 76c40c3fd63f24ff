mod app;
mod middleware;
mod state;

pub use app::create_app;
pub use middleware::{secret_key_auth, AuthContext, SECRET_KEY_HEADER};
pub use state::AppState;
