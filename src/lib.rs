#[cfg(feature = "api")]
pub mod api;
pub mod auth;
#[cfg(feature = "sqlx")]
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
#[cfg(feature = "sqlx")]
pub mod graph;
pub mod models;
pub mod rate_limit;
#[cfg(feature = "render")]
pub mod render;
pub mod validate;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppState, routes};
    pub use crate::auth::{AdminCredentials, SessionService, SessionStore, check_api_key};
    #[cfg(feature = "sqlx")]
    pub use crate::config::ServiceConfig;
    #[cfg(feature = "sqlx")]
    pub use crate::db::create_graph_tables;
    pub use crate::error::{ErrorKind, LibError, Result};
    #[cfg(feature = "sqlx")]
    pub use crate::graph::{
        EdgeConflictPolicy, GraphService, connected_projection, neighbor_ids,
    };
    pub use crate::models::{
        Gender, GraphView, Person, PersonBackground, PersonId, Relation, RelationId,
        UnorderedPair,
    };
    pub use crate::rate_limit::{RateLimiter, RatePolicy, RateStore};
    #[cfg(feature = "render")]
    pub use crate::render::{ChromiumRenderer, GraphRenderer, ImageFormat, RenderStyle};
    pub use crate::validate::{FieldRule, FieldType, Schema, parse_person_id, sanitize_text};
}
