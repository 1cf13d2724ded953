//! PostgREST HTTP backend.
//!
//! Talks to the hosted service's REST surface:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | select    | `GET /rest/v1/{table}?select=..&col=eq.v&order=col.desc.nullslast&limit=n` |
//! | count     | `HEAD /rest/v1/{table}` with `Prefer: count=exact`, read from `Content-Range` |
//! | insert    | `POST /rest/v1/{table}` with `Prefer: return=representation` |
//! | update    | `PATCH /rest/v1/{table}?id=eq.{id}` |
//! | delete    | `DELETE /rest/v1/{table}?id=eq.{id}` |
//! | role      | `POST /rest/v1/rpc/get_user_role` |
//!
//! Realtime is a websocket protocol of its own and is not provided here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{DataService, RoleProvider};
use crate::types::{Filter, Role, Row, RowId, Select, Table};
use crate::{FieldError, Result, SyncError};

/// Request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Client for a PostgREST-compatible backend.
#[derive(Clone)]
pub struct RestBackend {
    http: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    user_id: Option<String>,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl RestBackend {
    /// Create a client for the project at `base_url` (e.g. `https://xyz.example.co`,
    /// or a wiremock server URI in tests).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
            user_id: None,
        })
    }

    /// Authenticate requests as a signed-in user instead of the anonymous key.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// User whose role `current_user_role` looks up.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        check_status(response).await
    }
}

/// Map a non-success response to the error taxonomy.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let error: PostgrestError = serde_json::from_str(&body).unwrap_or_default();
    let message = error
        .message
        .clone()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
    debug!(status = status.as_u16(), code = ?error.code, %message, "backend rejected request");

    if error.code.as_deref() == Some("42501") {
        return Err(SyncError::PermissionDenied(message));
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::PermissionDenied(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            let fields = column_in(&message)
                .or_else(|| error.details.as_deref().and_then(column_in))
                .map(|column| vec![FieldError::new(column, message.clone())])
                .unwrap_or_default();
            SyncError::Validation { message, fields }
        }
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited { retry_after },
        _ => SyncError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

/// Column named in a constraint message: `... in column "nom_client" of ...`
/// or `Key (numero)=(D-1) already exists.`
fn column_in(message: &str) -> Option<String> {
    if let Some(rest) = message.split("column \"").nth(1) {
        return rest.split('"').next().map(str::to_string);
    }
    let rest = message.split("Key (").nth(1)?;
    rest.split(')').next().map(str::to_string)
}

/// Encode a filter value as a PostgREST operator expression.
fn eq_expression(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::Bool(b) => format!("is.{b}"),
        Value::String(s) => format!("eq.{s}"),
        other => format!("eq.{other}"),
    }
}

/// Quote a term if it contains characters reserved in `or=(...)` lists.
fn quote_term(term: &str) -> String {
    if term.contains([',', '(', ')', ':', '"']) {
        format!("\"{}\"", term.replace('"', "\\\""))
    } else {
        term.to_string()
    }
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .filter_map(|filter| match filter {
            Filter::Eq { column, value } => Some((column.clone(), eq_expression(value))),
            Filter::Search { columns, term } if !columns.is_empty() => {
                let pattern = quote_term(&format!("*{term}*"));
                let clauses: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{c}.ilike.{pattern}"))
                    .collect();
                Some(("or".to_string(), format!("({})", clauses.join(","))))
            }
            Filter::Search { .. } => None,
        })
        .collect()
}

/// Query string for a select.
fn select_params(query: &Select) -> Vec<(String, String)> {
    let mut select = match &query.columns {
        Some(columns) => columns.join(","),
        None => "*".to_string(),
    };
    for embed in &query.embeds {
        select.push_str(&format!(",{}(*)", embed.table));
    }
    let mut params = vec![("select".to_string(), select)];
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push((
            "order".to_string(),
            format!("{}.{direction}.nullslast", order.column),
        ));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Total from a `Content-Range` header (`0-24/3573` or `*/3573`).
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

fn id_param(id: &RowId) -> (String, String) {
    ("id".to_string(), format!("eq.{id}"))
}

#[async_trait]
impl DataService for RestBackend {
    fn name(&self) -> &str {
        "rest"
    }

    #[instrument(skip(self, query), fields(table = %table))]
    async fn select(&self, table: Table, query: &Select) -> Result<Vec<Row>> {
        let request = self
            .http
            .get(self.url(table.as_str()))
            .query(&select_params(query));
        let rows: Vec<Row> = self.send(request).await?.json().await?;
        debug!(rows = rows.len(), "select complete");
        Ok(rows)
    }

    async fn count(&self, table: Table, filters: &[Filter]) -> Result<u64> {
        let mut params = vec![("select".to_string(), "id".to_string())];
        params.extend(filter_params(filters));
        let request = self
            .http
            .head(self.url(table.as_str()))
            .query(&params)
            .header("Prefer", "count=exact");
        let response = self.send(request).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| SyncError::Api {
                status: response.status().as_u16(),
                message: format!("missing row count for {table}"),
            })
    }

    async fn insert(&self, table: Table, row: Value) -> Result<RowId> {
        let request = self
            .http
            .post(self.url(table.as_str()))
            .header("Prefer", "return=representation")
            .json(&row);
        let rows: Vec<Row> = self.send(request).await?.json().await?;
        rows.first()
            .and_then(|r| r.get("id"))
            .and_then(|id| match id {
                Value::String(s) => Some(RowId::new(s.clone())),
                Value::Number(n) => Some(RowId::new(n.to_string())),
                _ => None,
            })
            .ok_or_else(|| SyncError::Json(format!("insert into {table} returned no id")))
    }

    async fn update(&self, table: Table, id: &RowId, patch: Value) -> Result<()> {
        let request = self
            .http
            .patch(self.url(table.as_str()))
            .query(&[id_param(id)])
            .header("Prefer", "return=representation")
            .json(&patch);
        let rows: Vec<Value> = self.send(request).await?.json().await?;
        if rows.is_empty() {
            return Err(SyncError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, table: Table, id: &RowId) -> Result<()> {
        let request = self
            .http
            .delete(self.url(table.as_str()))
            .query(&[id_param(id)])
            .header("Prefer", "return=representation");
        let rows: Vec<Value> = self.send(request).await?.json().await?;
        if rows.is_empty() {
            return Err(SyncError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RoleProvider for RestBackend {
    async fn current_user_role(&self) -> Result<Role> {
        let body = match &self.user_id {
            Some(user_id) => json!({ "_user_id": user_id }),
            None => json!({}),
        };
        let request = self.http.post(self.url("rpc/get_user_role")).json(&body);
        let role: Option<Role> = self.send(request).await?.json().await?;
        Ok(role.unwrap_or_default())
    }
}
