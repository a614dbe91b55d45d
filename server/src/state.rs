use std::sync::Arc;

use crate::chat::ChatService;
use crate::config::ChatSettings;
use crate::db::DbPool;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// HS256 secret shared with the identity collaborator
    pub identity_secret: Vec<u8>,
    /// The live connection of each online user
    pub connections: ConnectionRegistry,
    pub chat: ChatService,
    pub settings: Arc<ChatSettings>,
}

impl AppState {
    /// Wire up the chat service over `db`. Spawns background tasks, so it
    /// must run inside the tokio runtime.
    pub fn new(db: DbPool, identity_secret: Vec<u8>, settings: ChatSettings) -> Self {
        let connections = ConnectionRegistry::new();
        let chat = ChatService::new(db.clone(), connections.clone(), &settings);
        Self {
            db,
            identity_secret,
            connections,
            chat,
            settings: Arc::new(settings),
        }
    }
}
