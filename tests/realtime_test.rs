use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tuile::{
    ChannelState, Chantier, DataService, Fingerprint, MemoryBackend, RealtimeConfig, RetryConfig,
    RowId, SyncClient, SyncError, Table, Tuile,
};

// ============================================================================
// Helpers
// ============================================================================

fn fast_reconnect(max_attempts: u32) -> RealtimeConfig {
    RealtimeConfig::new().reconnect(
        RetryConfig::new()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(20))
            .max_delay(Duration::from_millis(200)),
    )
}

fn client(backend: &Arc<MemoryBackend>, realtime: RealtimeConfig) -> SyncClient {
    Tuile::builder()
        .memory(Arc::clone(backend))
        .retry(RetryConfig::disabled())
        .realtime_config(realtime)
        .build()
        .unwrap()
}

/// Poll `condition` until it holds, failing the test after five seconds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn insert_chantier(backend: &MemoryBackend, nom_client: &str) {
    backend
        .insert(Table::Chantiers, json!({ "nom_client": nom_client }))
        .await
        .unwrap();
}

// ============================================================================
// Event propagation
// ============================================================================

#[tokio::test]
async fn remote_insert_refreshes_observed_list() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(&backend, fast_reconnect(3));

    let sub = client.watch_view(client.chantiers_view(None), |_| {});
    assert!(client.chantiers(None).await.unwrap().is_empty());

    let channel = client.realtime(Table::Chantiers).unwrap();
    assert_eq!(
        channel.wait_until(ChannelState::is_connected).await,
        ChannelState::Connected
    );

    // Another session writes directly to the backend.
    insert_chantier(&backend, "Lefebvre").await;

    eventually(|| {
        sub.entry()
            .and_then(|e| e.data_as::<Vec<Chantier>>().ok().flatten())
            .is_some_and(|list| list.len() == 1 && list[0].nom_client == "Lefebvre")
    })
    .await;
    channel.close().await;
}

#[tokio::test]
async fn remote_delete_removes_row_from_observed_list() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .seed(
            Table::Chantiers,
            [
                json!({"id": "c1", "nom_client": "Martin", "created_at": "2024-02-01T09:00:00Z"}),
                json!({"id": "c2", "nom_client": "Durand", "created_at": "2024-03-01T09:00:00Z"}),
            ],
        )
        .unwrap();
    let client = client(&backend, fast_reconnect(3));

    let sub = client.watch_view(client.chantiers_view(None), |_| {});
    assert_eq!(client.chantiers(None).await.unwrap().len(), 2);

    let channel = client.realtime(Table::Chantiers).unwrap();
    channel.wait_until(ChannelState::is_connected).await;

    // Another session deletes a row.
    backend
        .delete(Table::Chantiers, &RowId::new("c1"))
        .await
        .unwrap();

    eventually(|| {
        sub.entry()
            .and_then(|e| e.data_as::<Vec<Chantier>>().ok().flatten())
            .is_some_and(|list| list.len() == 1 && list[0].id == RowId::new("c2"))
    })
    .await;
    channel.close().await;
}

#[tokio::test]
async fn events_only_touch_dependent_entries() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .seed(
            Table::Configuration,
            [json!({"id": "cfg", "nom_entreprise": "Toitures Martin"})],
        )
        .unwrap();
    let client = client(&backend, fast_reconnect(3));

    client.kpis().await.unwrap();
    client.configuration().await.unwrap();

    let channel = client.realtime(Table::Chantiers).unwrap();
    channel.wait_until(ChannelState::is_connected).await;
    insert_chantier(&backend, "Roux").await;

    eventually(|| {
        client
            .store()
            .get(&Fingerprint::new("kpis"))
            .is_some_and(|e| e.invalidated)
    })
    .await;
    let configuration = client
        .store()
        .get(&Fingerprint::new("configuration"))
        .unwrap();
    assert!(!configuration.invalidated);
    channel.close().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn close_releases_the_feed() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(&backend, fast_reconnect(3));

    let channel = client.realtime(Table::Devis).unwrap();
    channel.wait_until(ChannelState::is_connected).await;
    assert_eq!(backend.active_feeds(), 1);

    let states = channel.watch_state();
    channel.close().await;
    assert_eq!(backend.active_feeds(), 0);
    assert_eq!(*states.borrow(), ChannelState::Disconnected);
}

#[tokio::test]
async fn dropping_the_handle_releases_the_feed() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(&backend, fast_reconnect(3));

    let channel = client.realtime(Table::Leads).unwrap();
    channel.wait_until(ChannelState::is_connected).await;
    assert_eq!(backend.active_feeds(), 1);

    drop(channel);
    eventually(|| backend.active_feeds() == 0).await;
}

#[tokio::test]
async fn reconnects_after_transport_drop() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(&backend, fast_reconnect(20));

    let sub = client.watch_view(client.chantiers_view(None), |_| {});
    client.chantiers(None).await.unwrap();
    let channel = client.realtime(Table::Chantiers).unwrap();
    channel.wait_until(ChannelState::is_connected).await;

    backend.set_realtime_available(false);
    backend.drop_realtime_connections();

    let state = channel
        .wait_until(|s| matches!(s, ChannelState::Reconnecting { .. }))
        .await;
    assert!(matches!(state, ChannelState::Reconnecting { attempt } if attempt >= 1));
    // The dropped feed is released before reconnecting.
    eventually(|| backend.active_feeds() == 0).await;

    // The cache keeps serving while disconnected.
    assert!(sub.entry().unwrap().data.is_some());

    backend.set_realtime_available(true);
    channel.wait_until(ChannelState::is_connected).await;
    assert_eq!(backend.active_feeds(), 1);

    insert_chantier(&backend, "Garnier").await;
    eventually(|| {
        sub.entry()
            .and_then(|e| e.data_as::<Vec<Chantier>>().ok().flatten())
            .is_some_and(|list| list.len() == 1)
    })
    .await;
    channel.close().await;
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_realtime_available(false);
    let client = client(&backend, fast_reconnect(3));

    let channel = client.realtime(Table::Chantiers).unwrap();
    let state = channel
        .wait_until(|s| *s == ChannelState::Disconnected)
        .await;
    assert_eq!(state, ChannelState::Disconnected);
    assert_eq!(backend.active_feeds(), 0);

    // Reads still work without realtime.
    assert!(client.chantiers(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn each_reconnect_attempt_goes_through_connecting() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(50)));
    backend.set_realtime_available(false);
    let client = client(&backend, fast_reconnect(3));

    let channel = client.realtime(Table::Chantiers).unwrap();
    let mut states = channel.watch_state();
    assert_eq!(*states.borrow(), ChannelState::Connecting);

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == ChannelState::Disconnected {
                break;
            }
        }
    })
    .await
    .expect("channel did not give up in time");

    assert_eq!(
        seen,
        vec![
            ChannelState::Reconnecting { attempt: 1 },
            ChannelState::Connecting,
            ChannelState::Reconnecting { attempt: 2 },
            ChannelState::Connecting,
            ChannelState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn realtime_requires_a_service() {
    let backend = Arc::new(MemoryBackend::new());
    let client = Tuile::builder()
        .data_service(backend)
        .build()
        .unwrap();

    let err = client.realtime(Table::Chantiers).unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
}
