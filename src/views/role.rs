//! Role of the signed-in user.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::ViewQuery;
use crate::Result;
use crate::backend::RoleProvider;
use crate::cache::RetentionClass;
use crate::client::SyncClient;
use crate::query::QueryKey;
use crate::types::{Fingerprint, Permissions, Role, Table};

async fn fetch_role(roles: Option<Arc<dyn RoleProvider>>) -> Result<Value> {
    let role = match roles {
        Some(roles) => roles.current_user_role().await?,
        None => Role::Viewer,
    };
    Ok(serde_json::to_value(role)?)
}

impl SyncClient {
    pub fn role_view(&self) -> ViewQuery<Role> {
        let key = QueryKey::new(Fingerprint::new("userRole").with(self.user_id.as_str()))
            .reads(Table::UserRoles)
            .class(RetentionClass::Static);
        let roles = self.roles.clone();
        ViewQuery::new(key, move || fetch_role(roles.clone()))
    }

    /// Current role. A failed lookup degrades to [`Role::Viewer`]; the
    /// failure stays on the cache entry so the next call tries again.
    pub async fn role(&self) -> Role {
        match self.load(self.role_view()).await {
            Ok(role) => role,
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "role lookup failed, falling back to viewer");
                Role::Viewer
            }
        }
    }

    /// What the current role may do.
    pub async fn permissions(&self) -> Permissions {
        self.role().await.permissions()
    }
}
