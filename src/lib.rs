pub mod api;
pub mod config;
pub mod core;
pub mod infra;
pub mod models;
pub mod service;

pub mod ax_state {
    use std::sync::Arc;

    use crate::core::entity_index::EntityIndex;
    use crate::models::schema::SchemaRegistry;
    use crate::service::agent::AqiAgent;

    pub struct AppState {
        pub agent: AqiAgent,
        pub schemas: Arc<SchemaRegistry>,
        pub entities: Arc<EntityIndex>,
    }
}
