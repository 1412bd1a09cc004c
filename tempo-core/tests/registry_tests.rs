//! Registry uniqueness, port-exclusivity and ordering tests.

use std::collections::HashSet;
use std::sync::Arc;

use rstest::rstest;
use tempo_core::{InstanceRegistry, PortRange, RegistryError};

// ---------------------------------------------------------------------------
// 1. Uniqueness
// ---------------------------------------------------------------------------

#[rstest]
#[case(1)]
#[case(10)]
#[case(200)]
fn n_launches_produce_n_distinct_instances(#[case] n: usize) {
    let registry = InstanceRegistry::new();
    let range = PortRange::new(5000, 6000);

    for _ in 0..n {
        let reservation = registry.allocate_port(range).expect("allocate");
        registry
            .register_reserved("10.0.0.7", reservation)
            .expect("register");
    }

    let instances = registry.list();
    let ids: HashSet<_> = instances.iter().map(|i| i.id()).collect();
    assert_eq!(ids.len(), n, "identities must be unique");
    assert_eq!(registry.used_ports().len(), n, "one used port per instance");
    assert!(registry.reserved_ports().is_empty());
}

#[test]
fn duplicate_register_leaves_state_untouched() {
    let registry = InstanceRegistry::new();
    registry.register("node-a", 5100).expect("register");
    let before = registry.list();

    let err = registry.register("node-a", 5100).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateInstance { .. }), "got: {err}");
    assert!(err.to_string().contains("node-a:5100"));
    assert_eq!(registry.list(), before);
}

// ---------------------------------------------------------------------------
// 2. Port exclusivity
// ---------------------------------------------------------------------------

#[test]
fn allocate_never_returns_used_port() {
    let registry = InstanceRegistry::new();
    let range = PortRange::new(5000, 5019);
    for port in 5000..5019 {
        registry.register("h", port).expect("prefill");
    }

    let reservation = registry.allocate_port(range).expect("one port left");
    assert_eq!(reservation.port(), 5019);
}

#[test]
fn full_range_is_exhausted_without_spinning() {
    let registry = InstanceRegistry::new();
    let range = PortRange::new(5000, 5099);
    for port in range.min..=range.max {
        registry.register("h", port).expect("prefill");
    }

    let err = registry.allocate_port(range).unwrap_err();
    assert_eq!(err, RegistryError::PortSpaceExhausted { range });
    assert!(err.to_string().contains("5000-5099"));
}

#[test]
fn concurrent_allocations_never_collide() {
    let registry = Arc::new(InstanceRegistry::new());
    let range = PortRange::new(5000, 5063);

    std::thread::scope(|scope| {
        for t in 0..8 {
            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                for _ in 0..8 {
                    let reservation = registry.allocate_port(range).expect("allocate");
                    registry
                        .register_reserved(format!("host-{t}"), reservation)
                        .expect("register");
                }
            });
        }
    });

    assert_eq!(registry.len(), 64);
    assert_eq!(registry.used_ports().len(), 64);
    assert!(matches!(
        registry.allocate_port(range),
        Err(RegistryError::PortSpaceExhausted { .. })
    ));
}

#[test]
fn released_reservation_does_not_touch_used_set() {
    let registry = InstanceRegistry::new();
    registry.register("h", 5000).expect("register");
    let before = registry.used_ports();

    let reservation = registry
        .allocate_port(PortRange::new(5000, 5010))
        .expect("allocate");
    reservation.release();

    assert_eq!(registry.used_ports(), before);
    assert!(registry.reserved_ports().is_empty());
}

// ---------------------------------------------------------------------------
// 3. Ordering
// ---------------------------------------------------------------------------

#[test]
fn list_is_in_registration_order() {
    let registry = InstanceRegistry::new();
    for port in [5300, 5100, 5200] {
        registry.register("h", port).expect("register");
    }
    let ports: Vec<u16> = registry.list().iter().map(|i| i.port).collect();
    assert_eq!(ports, vec![5300, 5100, 5200]);
}
