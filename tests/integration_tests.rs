use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use fleet_live::clock::{ManualClock, SystemClock};
use fleet_live::metrics::{FleetMetrics, LoadFoldOptions, MetricsAggregator, SourceHealth};
use fleet_live::model::{LatLng, LoadRecord};
use fleet_live::motion::{
    PlaybackController, PlaybackState, SimulationConfig, SimulationController, Waypoint,
};
use fleet_live::runtime::{Dashboard, RuntimeOptions, loads_query};
use fleet_live::stream::{CollectionStore, Delivery, MemoryStore};
use serde_json::json;

#[tokio::test]
async fn test_store_snapshots_drive_load_metrics() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap());
    let mut aggregator =
        MetricsAggregator::new(Arc::new(clock.clone()), LoadFoldOptions::default());
    let store = MemoryStore::new();
    store.replace(
        "loads",
        vec![
            json!({ "id": "L-1", "status": "active", "ratePerMile": 3.5, "distance": 200.0,
                    "rate": 500.0, "createdAt": "2024-06-07T09:00:00Z" }),
            json!({ "id": "L-2", "status": "delivered", "rate": 300.0, "fuelEfficiency": 10.0,
                    "createdAt": "2024-06-10T08:00:00Z" }),
            json!({ "status": "pending" }),
        ],
    );

    let mut sub = store.subscribe::<LoadRecord>(loads_query());
    let delivery = sub.next().await.expect("first snapshot");
    let metrics = aggregator.apply_loads(delivery).clone();

    assert_eq!(metrics.loads.status.total, 3);
    assert_eq!(metrics.loads.status.active, 1);
    assert_eq!(metrics.loads.status.delivered, 1);
    assert_eq!(metrics.loads.status.pending, 0);
    assert_eq!(metrics.loads.revenue, 1000.0);
    assert_eq!(metrics.loads.delayed_loads, 1);
    assert_eq!(metrics.health.loads, SourceHealth::Live);

    store.fail("loads", "permission denied");
    let delivery = sub.next().await.expect("error delivery");
    assert_eq!(delivery, Delivery::Error("permission denied".to_string()));
    let degraded = aggregator.apply_loads(delivery).clone();
    assert!(degraded.is_degraded());
    assert_eq!(degraded.loads, metrics.loads);
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn test_dashboard_counts_users_and_tracks_drivers() {
    let store = MemoryStore::new();
    store.replace(
        "drivers",
        vec![
            json!({ "id": "d1", "status": "in_transit", "loadId": "L-1",
                    "position": { "lat": 35.0, "lng": -80.0 } }),
            json!({ "id": "d2", "status": "breakdown" }),
        ],
    );
    store.replace(
        "users",
        vec![
            json!({ "id": "s1", "role": "shipper", "name": "Acme" }),
            json!({ "id": "u2", "role": "admin", "name": "Ops" }),
        ],
    );

    let options = RuntimeOptions {
        tick_interval: Duration::from_millis(10),
        ..RuntimeOptions::default()
    };
    let dashboard = Dashboard::new(store.clone(), Arc::new(SystemClock), options);
    let mut rx = dashboard.metrics();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(dashboard.run(async {
        let _ = stop_rx.await;
    }));

    let metrics: FleetMetrics = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|m| m.drivers.total == 2 && m.shippers.total == 1),
    )
    .await
    .expect("timed out waiting for metrics")
    .expect("dashboard dropped")
    .clone();

    assert_eq!(metrics.total_users(), 3);
    assert_eq!(metrics.drivers.in_transit, 1);
    assert_eq!(metrics.drivers.breakdown, 1);
    assert_eq!(metrics.drivers.on_assignment, 1);

    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[test]
fn test_simulation_batch_runs_to_completion() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap());
    let mut controller = SimulationController::new(Arc::new(clock.clone()));
    let frames = controller.subscribe();

    let configs = vec![
        SimulationConfig {
            entity_id: "truck-1".into(),
            start: LatLng::new(0.0, 0.0),
            end: LatLng::new(10.0, 10.0),
            duration_seconds: 10.0,
        },
        SimulationConfig {
            entity_id: "truck-2".into(),
            start: LatLng::new(5.0, 5.0),
            end: LatLng::new(5.0, 15.0),
            duration_seconds: 20.0,
        },
    ];
    assert_eq!(controller.start(&configs), 2);

    clock.advance(TimeDelta::seconds(5));
    controller.tick();
    assert_eq!(controller.position_of("truck-1"), Some(LatLng::new(5.0, 5.0)));
    assert!(frames.borrow().progress > 0.0);

    clock.advance(TimeDelta::seconds(15));
    let frame = controller.tick();
    assert_eq!(frame.progress, 100.0);
    assert!(controller.is_finished());
    assert_eq!(controller.position_of("truck-2"), Some(LatLng::new(5.0, 15.0)));
}

#[test]
fn test_playback_scrubs_recorded_path() {
    let t0 = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
    let clock = ManualClock::new(t0);
    let mut controller = PlaybackController::new(Arc::new(clock.clone()));

    let path = vec![
        Waypoint { position: LatLng::new(0.0, 0.0), timestamp: t0 },
        Waypoint { position: LatLng::new(0.0, 10.0), timestamp: t0 + TimeDelta::seconds(100) },
    ];
    controller.select("truck-1", path).unwrap();
    controller.set_speed(4).unwrap();
    controller.play().unwrap();

    clock.advance(TimeDelta::seconds(10));
    assert_eq!(controller.advance().unwrap(), 0.4);
    assert_eq!(controller.current_position().unwrap(), LatLng::new(0.0, 4.0));

    clock.advance(TimeDelta::seconds(30));
    assert_eq!(controller.advance().unwrap(), 1.0);
    assert_eq!(controller.state(), PlaybackState::Paused);

    controller.restart().unwrap();
    assert_eq!(controller.position().unwrap(), 0.0);
}
