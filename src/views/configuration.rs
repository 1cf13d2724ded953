//! Company configuration.

use std::sync::Arc;

use serde_json::Value;

use super::ViewQuery;
use crate::Result;
use crate::backend::DataService;
use crate::cache::RetentionClass;
use crate::client::SyncClient;
use crate::query::QueryKey;
use crate::types::{Configuration, ConfigurationPatch, Fingerprint, RowId, Scope, Select, Table};

async fn fetch_configuration(data: Arc<dyn DataService>) -> Result<Value> {
    let rows = data
        .select(Table::Configuration, &Select::all().limit(1))
        .await?;
    Ok(rows.into_iter().next().map_or(Value::Null, Value::Object))
}

impl SyncClient {
    /// The single configuration row, `None` until one is created.
    pub fn configuration_view(&self) -> ViewQuery<Option<Configuration>> {
        let key = QueryKey::new(Fingerprint::new("configuration"))
            .reads(Table::Configuration)
            .class(RetentionClass::Static);
        let data = Arc::clone(&self.data);
        ViewQuery::new(key, move || fetch_configuration(Arc::clone(&data)))
    }

    pub async fn configuration(&self) -> Result<Option<Configuration>> {
        self.load(self.configuration_view()).await
    }

    /// Update the configuration row (admin only). Fields left `None` in
    /// `patch` are not touched.
    pub async fn update_configuration(&self, id: &RowId, patch: ConfigurationPatch) -> Result<()> {
        let patch = serde_json::to_value(patch)?;
        let data = &self.data;
        self.perform(
            "update_configuration",
            || data.update(Table::Configuration, id, patch),
            &[Scope::Table(Table::Configuration)],
        )
        .await
    }
}
