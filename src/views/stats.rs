//! Dashboard statistics.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use futures_util::future::try_join4;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::ViewQuery;
use crate::Result;
use crate::backend::DataService;
use crate::cache::RetentionClass;
use crate::client::SyncClient;
use crate::query::QueryKey;
use crate::types::{Filter, Fingerprint, Row, Select, Table, devis_status};

/// Clients shown by the dashboard's ranking.
pub const DEFAULT_TOP_CLIENTS: usize = 10;

/// Accepted-quote total of one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRevenue {
    pub client_nom: String,
    pub total: f64,
}

/// Paid-quote total of one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub month: String,
    pub total: f64,
}

/// Headline counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub leads: u64,
    pub devis: u64,
    pub chantiers: u64,
    /// Sum of `montant_ttc` over paid quotes.
    pub revenue: f64,
}

fn amount(row: &Row) -> f64 {
    row.get("montant_ttc").and_then(Value::as_f64).unwrap_or(0.0)
}

/// Count leads per `statut`. Rows without a status are not counted.
pub fn group_by_status(rows: &[Row]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for row in rows {
        match row.get("statut").and_then(Value::as_str) {
            Some(status) => *counts.entry(status.to_string()).or_insert(0) += 1,
            None => trace!("lead without status"),
        }
    }
    counts
}

/// Sum `montant_ttc` by `client_nom` and keep the `limit` largest totals.
///
/// Ties are ordered by client name.
pub fn rank_clients(rows: &[Row], limit: usize) -> Vec<ClientRevenue> {
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for row in rows {
        let Some(client) = row.get("client_nom").and_then(Value::as_str) else {
            continue;
        };
        *totals.entry(client).or_insert(0.0) += amount(row);
    }
    let mut ranked: Vec<ClientRevenue> = totals
        .into_iter()
        .map(|(client_nom, total)| ClientRevenue {
            client_nom: client_nom.to_string(),
            total,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then_with(|| a.client_nom.cmp(&b.client_nom))
    });
    ranked.truncate(limit);
    ranked
}

/// `(year, month)` shifted `back` months earlier.
fn months_before(year: i32, month: u32, back: u32) -> (i32, u32) {
    let index = year * 12 + month as i32 - 1 - back as i32;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

/// Calendar month of a `date_creation` value (`2024-03-15` or RFC 3339).
fn month_of(value: &str) -> Option<(i32, u32)> {
    let date = NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()?;
    Some((date.year(), date.month()))
}

/// Sum `montant_ttc` per month of `date_creation` over the `months`
/// calendar months ending with `reference`'s month, oldest first.
///
/// Months without sales are present with a zero total; rows outside the
/// window or without a parseable date are ignored.
pub fn monthly_revenue(rows: &[Row], reference: NaiveDate, months: u32) -> Vec<MonthlyRevenue> {
    let window: Vec<(i32, u32)> = (0..months)
        .rev()
        .map(|back| months_before(reference.year(), reference.month(), back))
        .collect();
    let mut totals = vec![0.0; window.len()];
    for row in rows {
        let Some(month) = row
            .get("date_creation")
            .and_then(Value::as_str)
            .and_then(month_of)
        else {
            continue;
        };
        if let Some(slot) = window.iter().position(|m| *m == month) {
            totals[slot] += amount(row);
        }
    }
    window
        .into_iter()
        .zip(totals)
        .map(|((year, month), total)| MonthlyRevenue {
            month: format!("{year:04}-{month:02}"),
            total,
        })
        .collect()
}

async fn fetch_leads_by_status(data: Arc<dyn DataService>) -> Result<Value> {
    let rows = data
        .select(Table::Leads, &Select::columns(&["statut"]))
        .await?;
    Ok(serde_json::to_value(group_by_status(&rows))?)
}

async fn fetch_top_clients(data: Arc<dyn DataService>, limit: usize) -> Result<Value> {
    let select = Select::columns(&["client_nom", "montant_ttc"])
        .filter(Filter::eq("statut", devis_status::ACCEPTE));
    let rows = data.select(Table::Devis, &select).await?;
    Ok(serde_json::to_value(rank_clients(&rows, limit))?)
}

async fn fetch_revenue(
    data: Arc<dyn DataService>,
    reference: NaiveDate,
    months: u32,
) -> Result<Value> {
    let select = Select::columns(&["date_creation", "montant_ttc"])
        .filter(Filter::eq("statut", devis_status::PAYES));
    let rows = data.select(Table::Devis, &select).await?;
    Ok(serde_json::to_value(monthly_revenue(&rows, reference, months))?)
}

async fn fetch_kpis(data: Arc<dyn DataService>) -> Result<Value> {
    let paid = Select::columns(&["montant_ttc"]).filter(Filter::eq("statut", devis_status::PAYES));
    let (leads, devis, chantiers, paid_rows) = try_join4(
        data.count(Table::Leads, &[]),
        data.count(Table::Devis, &[]),
        data.count(Table::Chantiers, &[]),
        data.select(Table::Devis, &paid),
    )
    .await?;
    let kpis = Kpis {
        leads,
        devis,
        chantiers,
        revenue: paid_rows.iter().map(amount).sum(),
    };
    Ok(serde_json::to_value(kpis)?)
}

impl SyncClient {
    pub fn leads_by_status_view(&self) -> ViewQuery<BTreeMap<String, u64>> {
        let key = QueryKey::new(Fingerprint::new("leadsByStatus"))
            .reads(Table::Leads)
            .class(RetentionClass::Live);
        let data = Arc::clone(&self.data);
        ViewQuery::new(key, move || fetch_leads_by_status(Arc::clone(&data)))
    }

    /// Lead count per status.
    pub async fn leads_by_status(&self) -> Result<BTreeMap<String, u64>> {
        self.load(self.leads_by_status_view()).await
    }

    pub fn top_clients_view(&self, limit: usize) -> ViewQuery<Vec<ClientRevenue>> {
        let key = QueryKey::new(Fingerprint::new("topClients").with(limit.to_string()))
            .reads(Table::Devis)
            .class(RetentionClass::Live);
        let data = Arc::clone(&self.data);
        ViewQuery::new(key, move || fetch_top_clients(Arc::clone(&data), limit))
    }

    /// Clients ranked by accepted-quote total.
    pub async fn top_clients(&self, limit: usize) -> Result<Vec<ClientRevenue>> {
        self.load(self.top_clients_view(limit)).await
    }

    pub fn revenue_by_month_view(
        &self,
        reference: NaiveDate,
        months: u32,
    ) -> ViewQuery<Vec<MonthlyRevenue>> {
        let fingerprint = Fingerprint::new("revenueChart")
            .with(format!("{:04}-{:02}", reference.year(), reference.month()))
            .with(months.to_string());
        let key = QueryKey::new(fingerprint)
            .reads(Table::Devis)
            .class(RetentionClass::Live);
        let data = Arc::clone(&self.data);
        ViewQuery::new(key, move || fetch_revenue(Arc::clone(&data), reference, months))
    }

    /// Paid revenue per month for the `months` months ending at `reference`.
    pub async fn revenue_by_month(
        &self,
        reference: NaiveDate,
        months: u32,
    ) -> Result<Vec<MonthlyRevenue>> {
        self.load(self.revenue_by_month_view(reference, months)).await
    }

    /// Paid revenue over the last twelve months, ending with the current one.
    pub async fn revenue_last_12_months(&self) -> Result<Vec<MonthlyRevenue>> {
        self.revenue_by_month(Utc::now().date_naive(), 12).await
    }

    pub fn kpis_view(&self) -> ViewQuery<Kpis> {
        let key = QueryKey::new(Fingerprint::new("kpis"))
            .reads(Table::Leads)
            .reads(Table::Devis)
            .reads(Table::Chantiers)
            .class(RetentionClass::Live);
        let data = Arc::clone(&self.data);
        ViewQuery::new(key, move || fetch_kpis(Arc::clone(&data)))
    }

    pub async fn kpis(&self) -> Result<Kpis> {
        self.load(self.kpis_view()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn groups_leads_by_status() {
        let leads = rows(vec![
            json!({"statut": "nouveau"}),
            json!({"statut": "qualifie"}),
            json!({"statut": "qualifie"}),
            json!({"statut": null}),
        ]);
        let counts = group_by_status(&leads);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["nouveau"], 1);
        assert_eq!(counts["qualifie"], 2);
    }

    #[test]
    fn ranks_clients_by_total_then_name() {
        let devis = rows(vec![
            json!({"client_nom": "Martin", "montant_ttc": 1000.0}),
            json!({"client_nom": "Durand", "montant_ttc": 500.0}),
            json!({"client_nom": "Martin", "montant_ttc": 250.5}),
            json!({"client_nom": "Bernard", "montant_ttc": 500}),
            json!({"client_nom": "Petit"}),
        ]);
        let ranked = rank_clients(&devis, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].client_nom, "Martin");
        assert_eq!(ranked[0].total, 1250.5);
        assert_eq!(ranked[1].client_nom, "Bernard");
        assert_eq!(ranked[2].client_nom, "Durand");
    }

    #[test]
    fn month_window_crosses_year_boundary() {
        assert_eq!(months_before(2024, 2, 0), (2024, 2));
        assert_eq!(months_before(2024, 2, 2), (2023, 12));
        assert_eq!(months_before(2024, 1, 13), (2022, 12));
    }

    #[test]
    fn monthly_revenue_fills_window_oldest_first() {
        let devis = rows(vec![
            json!({"date_creation": "2024-03-02", "montant_ttc": 100.0}),
            json!({"date_creation": "2024-03-28T10:00:00Z", "montant_ttc": 50.0}),
            json!({"date_creation": "2024-01-15", "montant_ttc": 10.0}),
            json!({"date_creation": "2023-03-15", "montant_ttc": 999.0}),
            json!({"date_creation": "bientôt", "montant_ttc": 999.0}),
        ]);
        let reference = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let revenue = monthly_revenue(&devis, reference, 12);
        assert_eq!(revenue.len(), 12);
        assert_eq!(revenue[0].month, "2023-04");
        assert_eq!(revenue[11].month, "2024-03");
        assert_eq!(revenue[11].total, 150.0);
        assert_eq!(revenue[9].total, 10.0);
        assert_eq!(revenue.iter().map(|m| m.total).sum::<f64>(), 160.0);
    }
}
