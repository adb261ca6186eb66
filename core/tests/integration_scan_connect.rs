use bluecentral_core::adapter::LOCAL_NAME_KEY;
use bluecentral_core::{
    AdapterCall, AdapterEvent, AdapterState, Advertisement, AdvertisementValue, CentralManager,
    ConnectionError, Discovery, DiscoveryChange, OperationState, PeripheralId, ScanError,
    ScanFilter, ScanMode, SimulatedAdapter, UnavailabilityReason,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn named(name: &str) -> Advertisement {
    let mut advertisement = Advertisement::new();
    advertisement.insert(
        LOCAL_NAME_KEY.to_string(),
        AdvertisementValue::Text(name.to_string()),
    );
    advertisement
}

fn central() -> (Arc<SimulatedAdapter>, CentralManager) {
    let adapter = Arc::new(SimulatedAdapter::powered_on());
    let central = CentralManager::with_default_settings(adapter.clone());
    (adapter, central)
}

type Outcomes = Arc<Mutex<Vec<(PeripheralId, Result<(), ConnectionError>)>>>;

fn connect(central: &CentralManager, outcomes: &Outcomes, peripheral: PeripheralId, timeout: Duration) {
    let ok = Arc::clone(outcomes);
    let err = Arc::clone(outcomes);
    central.connect(
        timeout,
        peripheral,
        move |p| ok.lock().push((p, Ok(()))),
        move |p, e| err.lock().push((p, Err(e))),
    );
}

#[tokio::test(start_paused = true)]
async fn test_filtered_scan_runs_for_fixed_duration() {
    let (adapter, central) = central();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let result: Arc<Mutex<Option<Vec<Discovery>>>> = Arc::new(Mutex::new(None));

    let progress_sink = Arc::clone(&changes);
    let result_sink = Arc::clone(&result);
    central
        .start_scan(
            ScanMode::FixedDuration(Duration::from_secs(5)),
            ScanFilter::new()
                .with_services(["FFE0"])
                .with_custom_filter(|d: &Discovery| d.local_name().is_some_and(|n| n.starts_with("BC-"))),
            Some(Arc::new(move |change: DiscoveryChange| progress_sink.lock().push(change))),
            Box::new(move |found: Vec<Discovery>| *result_sink.lock() = Some(found)),
        )
        .unwrap();

    assert_eq!(
        adapter.calls(),
        vec![AdapterCall::StartDiscovery {
            service_uuids: vec!["FFE0".to_string()],
            allow_duplicates: false,
        }]
    );
    assert_eq!(central.operation_state(), OperationState::Scanning);

    let lamp = PeripheralId::random();
    let fan = PeripheralId::random();
    let stranger = PeripheralId::random();

    central.handle_event(AdapterEvent::Discovered {
        peripheral: lamp,
        advertisement: named("BC-Lamp"),
        rssi: -70,
    });
    central.handle_event(AdapterEvent::Discovered {
        peripheral: stranger,
        advertisement: named("Headphones"),
        rssi: -40,
    });
    central.handle_event(AdapterEvent::Discovered {
        peripheral: fan,
        advertisement: named("BC-Fan"),
        rssi: -60,
    });
    central.handle_event(AdapterEvent::Discovered {
        peripheral: lamp,
        advertisement: named("BC-Lamp"),
        rssi: -55,
    });

    tokio::time::sleep(Duration::from_millis(4_999)).await;
    assert!(result.lock().is_none());

    tokio::time::sleep(Duration::from_millis(2)).await;
    let found = result.lock().take().unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].peripheral, lamp);
    assert_eq!(found[0].rssi, -55);
    assert_eq!(found[1].peripheral, fan);

    let changes = changes.lock();
    assert_eq!(changes.len(), 3);
    assert!(matches!(changes[0], DiscoveryChange::New(_)));
    assert!(matches!(changes[2], DiscoveryChange::Updated { index: 0, .. }));

    assert_eq!(adapter.count(|c| *c == AdapterCall::StopDiscovery), 1);
    assert_eq!(central.operation_state(), OperationState::Available);

    // The finished session leaves the scanner free for a new one
    assert_eq!(
        central.start_scan(
            ScanMode::Infinitely,
            ScanFilter::new(),
            None,
            Box::new(|_: Vec<Discovery>| {}),
        ),
        Ok(())
    );
    assert!(central.is_scanning());
    assert_eq!(central.operation_state(), OperationState::Scanning);
    assert_eq!(
        adapter.count(|c| matches!(c, AdapterCall::StartDiscovery { .. })),
        2
    );
}

#[tokio::test]
async fn test_scan_while_powered_off_is_rejected() {
    let adapter = Arc::new(SimulatedAdapter::new(AdapterState::PoweredOff));
    let central = CentralManager::with_default_settings(adapter.clone());

    let result = central.start_scan(
        ScanMode::Infinitely,
        ScanFilter::new(),
        None,
        Box::new(|_: Vec<Discovery>| panic!("no session should complete")),
    );

    assert_eq!(
        result,
        Err(ScanError::BluetoothUnavailable(UnavailabilityReason::PoweredOff))
    );
    assert!(adapter.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_ignores_late_connect() {
    let (adapter, central) = central();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    let device = PeripheralId::random();

    connect(&central, &outcomes, device, Duration::from_secs(3));
    assert_eq!(adapter.calls(), vec![AdapterCall::Connect(device)]);

    tokio::time::sleep(Duration::from_millis(3_001)).await;
    assert_eq!(*outcomes.lock(), vec![(device, Err(ConnectionError::Timeout))]);
    assert!(adapter.calls().contains(&AdapterCall::CancelConnection(device)));

    central.handle_event(AdapterEvent::Connected(device));
    assert_eq!(outcomes.lock().len(), 1);
    assert!(central.connected_peripherals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_power_loss_resets_attempts_and_connections() {
    let (adapter, central) = central();
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    let disconnected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&disconnected);
    central.add_disconnect_observer(move |p: &PeripheralId| sink.lock().push(*p));

    let connected: Vec<PeripheralId> = (0..3).map(|_| PeripheralId::random()).collect();
    for device in &connected {
        connect(&central, &outcomes, *device, Duration::from_secs(10));
        central.handle_event(AdapterEvent::Connected(*device));
    }
    let pending: Vec<PeripheralId> = (0..2).map(|_| PeripheralId::random()).collect();
    for device in &pending {
        connect(&central, &outcomes, *device, Duration::from_secs(10));
    }
    outcomes.lock().clear();

    adapter.set_state(AdapterState::PoweredOff);
    central.handle_event(AdapterEvent::StateChanged(AdapterState::PoweredOff));

    let outcomes = outcomes.lock().clone();
    assert_eq!(outcomes.len(), 2);
    for device in &pending {
        assert!(outcomes.contains(&(*device, Err(ConnectionError::Cancelled))));
    }
    assert_eq!(*disconnected.lock(), connected);
    assert!(central.connected_peripherals().is_empty());

    // Cancelled timers stay silent
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(
        adapter.count(|c| matches!(c, AdapterCall::CancelConnection(_))),
        2
    );
}

#[derive(Debug, Clone)]
enum Step {
    Connect(usize),
    Connected(usize),
    Failed(usize),
    Disconnected(usize),
}

fn step() -> impl Strategy<Value = Step> {
    (0..4usize, 0..3usize).prop_map(|(kind, device)| match kind {
        0 => Step::Connect(device),
        1 => Step::Connected(device),
        2 => Step::Failed(device),
        _ => Step::Disconnected(device),
    })
}

proptest! {
    #[test]
    fn test_every_connect_resolves_exactly_once(steps in prop::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let adapter = Arc::new(SimulatedAdapter::powered_on());
            let central = CentralManager::with_default_settings(adapter.clone());
            let devices: Vec<PeripheralId> = (0..3).map(|_| PeripheralId::random()).collect();
            let resolutions: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

            for step in &steps {
                match *step {
                    Step::Connect(i) => {
                        let index = {
                            let mut resolutions = resolutions.lock();
                            resolutions.push(0);
                            resolutions.len() - 1
                        };
                        let ok = Arc::clone(&resolutions);
                        let err = Arc::clone(&resolutions);
                        central.connect(
                            Duration::from_secs(60),
                            devices[i],
                            move |_| ok.lock()[index] += 1,
                            move |_, _| err.lock()[index] += 1,
                        );
                    }
                    Step::Connected(i) => central.handle_event(AdapterEvent::Connected(devices[i])),
                    Step::Failed(i) => central.handle_event(AdapterEvent::ConnectFailed {
                        peripheral: devices[i],
                        error: None,
                    }),
                    Step::Disconnected(i) => central.handle_event(AdapterEvent::Disconnected {
                        peripheral: devices[i],
                        error: None,
                    }),
                }

                let connected = central.connected_peripherals();
                let mut unique = connected.clone();
                unique.sort();
                unique.dedup();
                assert_eq!(unique.len(), connected.len());
                assert!(resolutions.lock().iter().all(|count| *count <= 1));
            }

            central.handle_event(AdapterEvent::StateChanged(AdapterState::PoweredOff));
            assert!(resolutions.lock().iter().all(|count| *count == 1));
        });
    }
}
