use std::sync::Arc;

use gather_db::Database;
use gather_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// Maps provider key. Without one, addresses get a plain search link.
    pub maps_api_key: Option<String>,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: String, maps_api_key: Option<String>) -> AppState {
        Arc::new(Self {
            db: Arc::new(db),
            jwt_secret,
            dispatcher: Dispatcher::new(),
            maps_api_key,
        })
    }
}
