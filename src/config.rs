use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::auth::AdminCredentials;
use crate::graph::EdgeConflictPolicy;

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_MAX_DB_CONNECTIONS: u32 = 10;

/// Service configuration sourced from the environment (a `.env` file
/// is honored by the server binary before this runs).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub bind: SocketAddr,
    /// Shared secret guarding mutating routes. Absent means those
    /// routes answer with a server error, not a client auth failure.
    pub api_key: Option<String>,
    pub admin: Option<AdminCredentials>,
    pub edge_conflict: EdgeConflictPolicy,
    pub max_db_connections: u32,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL is required")?;

        let bind_raw = lookup("RELGRAPH_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw
            .parse()
            .with_context(|| format!("invalid RELGRAPH_BIND '{}'", bind_raw))?;

        let api_key = lookup("RELGRAPH_API_KEY").filter(|value| !value.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!("RELGRAPH_API_KEY is not set; mutating routes will refuse requests");
        }

        let admin_username = lookup("RELGRAPH_ADMIN_USERNAME").filter(|v| !v.trim().is_empty());
        let admin_password = lookup("RELGRAPH_ADMIN_PASSWORD").filter(|v| !v.trim().is_empty());
        let admin = match (admin_username, admin_password) {
            (Some(username), Some(password)) => Some(AdminCredentials { username, password }),
            (None, None) => None,
            _ => anyhow::bail!(
                "RELGRAPH_ADMIN_USERNAME and RELGRAPH_ADMIN_PASSWORD must be set together"
            ),
        };

        let edge_conflict = match lookup("RELGRAPH_EDGE_CONFLICT") {
            Some(raw) => raw
                .parse::<EdgeConflictPolicy>()
                .context("invalid RELGRAPH_EDGE_CONFLICT")?,
            None => EdgeConflictPolicy::default(),
        };

        let max_db_connections = match lookup("RELGRAPH_MAX_DB_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("invalid RELGRAPH_MAX_DB_CONNECTIONS '{}'", raw))?,
            None => DEFAULT_MAX_DB_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            bind,
            api_key,
            admin,
            edge_conflict,
            max_db_connections,
        })
    }
}
