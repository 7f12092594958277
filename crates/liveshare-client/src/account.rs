//! Collaborators owned by the host application

use async_trait::async_trait;
use liveshare_core::{Position, Token};

use crate::error::Result;

/// Live-share fields stored on the user's account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveShareAccount {
    pub token: Option<Token>,
    pub server_url: Option<String>,
}

/// Account store holding the token/server pair between sessions
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn live_share(&self) -> Result<LiveShareAccount>;

    async fn save_live_share(&self, token: &str, server_url: &str) -> Result<()>;
}

/// Maps raw map coordinates to a region name
pub trait RegionLookup: Send + Sync {
    fn region(&self, position: &Position) -> Option<String>;
}
