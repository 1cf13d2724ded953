//! Construction sites: the list, the form's pickers and the writes.

use std::sync::Arc;

use serde_json::Value;

use super::ViewQuery;
use crate::Result;
use crate::backend::DataService;
use crate::cache::RetentionClass;
use crate::client::SyncClient;
use crate::query::QueryKey;
use crate::types::{
    Chantier, ChantierInput, DevisOption, Filter, Fingerprint, LeadOption, Order, RowId, Scope,
    Select, Table,
};

/// Columns the list's search box matches against.
const SEARCH_COLUMNS: &[&str] = &["nom_client", "type_projet", "statut"];

fn chantiers_select(search: &str) -> Select {
    let select = Select::all()
        .embed(Table::Devis, "devis_id")
        .order(Order::desc("created_at"));
    match search.trim() {
        "" => select,
        term => select.filter(Filter::search(SEARCH_COLUMNS, term)),
    }
}

async fn fetch_chantiers(data: Arc<dyn DataService>, search: String) -> Result<Value> {
    let rows = data
        .select(Table::Chantiers, &chantiers_select(&search))
        .await?;
    Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
}

async fn fetch_lead_options(data: Arc<dyn DataService>) -> Result<Value> {
    let select = Select::columns(&["id", "nom", "prenom", "type_projet"]).order(Order::asc("nom"));
    let rows = data.select(Table::Leads, &select).await?;
    Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
}

async fn fetch_devis_options(data: Arc<dyn DataService>, lead_id: RowId) -> Result<Value> {
    let select = Select::columns(&["id", "numero", "client_nom", "montant_ttc"])
        .filter(Filter::eq("lead_id", lead_id.as_str()))
        .order(Order::desc("created_at"));
    let rows = data.select(Table::Devis, &select).await?;
    Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
}

impl SyncClient {
    /// Chantiers, newest first, optionally filtered by a case-insensitive
    /// search on client name, project type and status.
    pub fn chantiers_view(&self, search: Option<&str>) -> ViewQuery<Vec<Chantier>> {
        let search = search.unwrap_or_default().to_string();
        let key = QueryKey::new(Fingerprint::new("chantiers").with(search.clone()))
            .reads(Table::Chantiers)
            .reads(Table::Devis)
            .class(RetentionClass::Live);
        let data = Arc::clone(&self.data);
        ViewQuery::new(key, move || fetch_chantiers(Arc::clone(&data), search.clone()))
    }

    pub async fn chantiers(&self, search: Option<&str>) -> Result<Vec<Chantier>> {
        self.load(self.chantiers_view(search)).await
    }

    /// Leads offered by the chantier form, by name.
    pub fn leads_for_chantier_view(&self) -> ViewQuery<Vec<LeadOption>> {
        let key = QueryKey::new(Fingerprint::new("leadsForChantier"))
            .reads(Table::Leads)
            .class(RetentionClass::Live);
        let data = Arc::clone(&self.data);
        ViewQuery::new(key, move || fetch_lead_options(Arc::clone(&data)))
    }

    pub async fn leads_for_chantier(&self) -> Result<Vec<LeadOption>> {
        self.load(self.leads_for_chantier_view()).await
    }

    /// Quotes of one lead, newest first.
    pub fn devis_for_lead_view(&self, lead_id: &RowId) -> ViewQuery<Vec<DevisOption>> {
        let key = QueryKey::new(Fingerprint::new("devisForChantier").with(lead_id.as_str()))
            .reads(Table::Devis)
            .class(RetentionClass::Live);
        let data = Arc::clone(&self.data);
        let lead_id = lead_id.clone();
        ViewQuery::new(key, move || {
            fetch_devis_options(Arc::clone(&data), lead_id.clone())
        })
    }

    pub async fn devis_for_lead(&self, lead_id: &RowId) -> Result<Vec<DevisOption>> {
        self.load(self.devis_for_lead_view(lead_id)).await
    }

    /// Insert (`id` is `None`) or update a chantier.
    ///
    /// Returns the chantier's id. Every query reading `chantiers` is
    /// invalidated once the write succeeds.
    pub async fn save_chantier(&self, id: Option<&RowId>, input: ChantierInput) -> Result<RowId> {
        let row = serde_json::to_value(input.normalized())?;
        let data = &self.data;
        let affected = [Scope::Table(Table::Chantiers)];
        match id {
            Some(id) => {
                let write = || async move {
                    data.update(Table::Chantiers, id, row)
                        .await
                        .map(|()| id.clone())
                };
                self.perform("update_chantier", write, &affected).await
            }
            None => {
                self.perform(
                    "create_chantier",
                    || data.insert(Table::Chantiers, row),
                    &affected,
                )
                .await
            }
        }
    }

    /// Delete a chantier (admin only).
    pub async fn delete_chantier(&self, id: &RowId) -> Result<()> {
        let data = &self.data;
        self.perform(
            "delete_chantier",
            || data.delete(Table::Chantiers, id),
            &[Scope::Table(Table::Chantiers)],
        )
        .await
    }
}
