//! Read models and writes of the back-office screens.
//!
//! Each read is a [`ViewQuery`]: a [`QueryKey`] plus the fetch that
//! produces it. [`SyncClient`](crate::SyncClient) exposes a `*_view`
//! constructor for every read, to hand to
//! [`watch_view`](crate::SyncClient::watch_view), and a shorthand that
//! loads it once.
//!
//! | Read | Fingerprint | Class | Tables |
//! |------|-------------|-------|--------|
//! | `leads_by_status` | `[leadsByStatus]` | live | leads |
//! | `top_clients` | `[topClients, n]` | live | devis |
//! | `revenue_by_month` | `[revenueChart, YYYY-MM, n]` | live | devis |
//! | `kpis` | `[kpis]` | live | leads, devis, chantiers |
//! | `chantiers` | `[chantiers, search]` | live | chantiers, devis |
//! | `leads_for_chantier` | `[leadsForChantier]` | live | leads |
//! | `devis_for_lead` | `[devisForChantier, lead]` | live | devis |
//! | `configuration` | `[configuration]` | static | configuration |
//! | `role` | `[userRole, user]` | static | user_roles |

mod chantiers;
mod configuration;
mod role;
mod stats;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

pub use stats::{
    ClientRevenue, DEFAULT_TOP_CLIENTS, Kpis, MonthlyRevenue, group_by_status, monthly_revenue,
    rank_clients,
};

use crate::Result;
use crate::query::{FetchFn, QueryKey};

/// A typed read: its cache key and how to fetch it.
pub struct ViewQuery<T> {
    pub(crate) key: QueryKey,
    pub(crate) fetch: FetchFn,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ViewQuery<T> {
    pub(crate) fn new<F, Fut>(key: QueryKey, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            key,
            fetch: Arc::new(move || fetch().boxed()),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl<T> fmt::Debug for ViewQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewQuery").field("key", &self.key).finish()
    }
}
