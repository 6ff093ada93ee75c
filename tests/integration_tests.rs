//! Integration tests for the swarm server
//!
//! These tests drive the registries, drones and delivery game together
//! through the loopback driver, and exercise the real UDP control plane.

use client::network::ControlClient;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use server::config::{DroneConfig, ServerConfig};
use server::drone::Drone;
use server::error::FleetError;
use server::loopback::{LinkBehavior, LoopbackFactory};
use server::network::Server;
use server::packages::PackageGenerator;
use server::swarm_manager::SwarmManager;
use shared::{
    LinkConfig, Package, Request, Response, Vector3, COORDINATE_POOL, MAX_PENDING_PACKAGES,
    PACKAGE_WEIGHTS, PICKUP_ZONE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::assert_ok;

fn test_config() -> DroneConfig {
    DroneConfig {
        connect_timeout: Duration::from_millis(500),
        ..DroneConfig::default()
    }
    .without_delays()
}

fn results_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("swarmserv-it-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Moves the simulated drone and waits until its telemetry reflects it.
async fn place(factory: &LoopbackFactory, drone: &Drone, position: Vector3) {
    factory.driver(drone.id()).unwrap().set_position(position);
    for _ in 0..100 {
        if drone.flight_position().await == position {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("Drone {} never reported {:?}", drone.id(), position);
}

/// DELIVERY SCENARIO TESTS
mod delivery_scenario_tests {
    use super::*;

    struct Scenario {
        factory: Arc<LoopbackFactory>,
        swarms: SwarmManager,
        packages: PackageGenerator,
    }

    async fn scenario(name: &str) -> Scenario {
        let factory = Arc::new(LoopbackFactory::new(LinkBehavior::Accept));
        let swarms = SwarmManager::new(factory.clone(), test_config());
        let packages = PackageGenerator::new(&results_dir(name));

        swarms.register_swarm("f1", 0).await.unwrap();
        packages.initialize_swarm("f1", 42).await;

        Scenario {
            factory,
            swarms,
            packages,
        }
    }

    /// The first package for seed 42 follows the index, weight, id draw order
    #[tokio::test]
    async fn first_package_is_deterministic() {
        let s = scenario("determinism").await;

        let package = s.packages.get_package("f1").await.unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let index = rng.gen_range(0..COORDINATE_POOL.len());
        let weight = PACKAGE_WEIGHTS[rng.gen_range(0..PACKAGE_WEIGHTS.len())];
        let id = format!("{:032x}", rng.gen::<u128>());

        assert_eq!(package.coordinates, COORDINATE_POOL[index]);
        assert_eq!(package.weight, weight);
        assert_eq!(package.id, id);

        let replay = scenario("determinism-replay").await;
        assert_eq!(replay.packages.get_package("f1").await.unwrap(), package);
    }

    /// Pickup in the zone succeeds, delivery at the target completes it
    #[tokio::test]
    async fn pickup_and_deliver() {
        let s = scenario("pickup").await;
        let drone = s
            .swarms
            .add_drone("f1", "d1", &LinkConfig::default())
            .await
            .unwrap();
        let package = s.packages.get_package("f1").await.unwrap();

        place(&s.factory, &drone, Vector3::new(PICKUP_ZONE.0, PICKUP_ZONE.1, 0.0)).await;
        assert_ok!(s.packages.pickup("f1", &package.id, &drone).await);

        let ledger = s.packages.ledger("f1").await.unwrap();
        assert_eq!(ledger.carry_load("d1").await, package.weight);

        let target = package.coordinates;
        place(&s.factory, &drone, Vector3::new(target.x, target.y, 0.1)).await;
        assert_ok!(s.packages.deliver("f1", &package.id, &drone).await);

        let summary = ledger.summary().await;
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(ledger.carry_load("d1").await, 0.0);
    }

    /// A drone carrying 2.5 cannot take a package of weight 1
    #[tokio::test]
    async fn capacity_rejection_leaves_load_unchanged() {
        let s = scenario("capacity").await;
        let drone = s
            .swarms
            .add_drone("f1", "d1", &LinkConfig::default())
            .await
            .unwrap();
        place(&s.factory, &drone, Vector3::new(PICKUP_ZONE.0, PICKUP_ZONE.1, 0.0)).await;

        let ledger = s.packages.ledger("f1").await.unwrap();
        for (id, weight) in [("a", 1.0), ("b", 1.0), ("c", 0.5), ("heavy", 1.0)] {
            ledger
                .add_package(Package::new(id.to_string(), COORDINATE_POOL[0], weight))
                .await
                .unwrap();
        }
        for id in ["a", "b", "c"] {
            s.packages.pickup("f1", id, &drone).await.unwrap();
        }

        let result = s.packages.pickup("f1", "heavy", &drone).await;

        assert!(matches!(result, Err(FleetError::CapacityExceeded { .. })));
        assert_eq!(ledger.carry_load("d1").await, 2.5);
        assert_eq!(ledger.summary().await.capacity_rejections, 1);
    }

    /// Only the drone that picked a package can deliver it
    #[tokio::test]
    async fn delivery_by_wrong_drone_fails() {
        let s = scenario("wrong-drone").await;
        let carrier = s
            .swarms
            .add_drone("f1", "d1", &LinkConfig::default())
            .await
            .unwrap();
        let other = s
            .swarms
            .add_drone("f1", "d2", &LinkConfig::default())
            .await
            .unwrap();
        let package = s.packages.get_package("f1").await.unwrap();

        place(&s.factory, &carrier, Vector3::new(PICKUP_ZONE.0, PICKUP_ZONE.1, 0.0)).await;
        s.packages.pickup("f1", &package.id, &carrier).await.unwrap();

        let target = package.coordinates;
        place(&s.factory, &other, Vector3::new(target.x, target.y, 0.0)).await;
        let result = s.packages.deliver("f1", &package.id, &other).await;

        assert!(matches!(result, Err(FleetError::NotAssigned { .. })));
        let ledger = s.packages.ledger("f1").await.unwrap();
        assert_eq!(ledger.summary().await.pending, 1);
        assert_eq!(ledger.carry_load("d1").await, package.weight);
    }

    /// The 21st request before any delivery exhausts the pool
    #[tokio::test]
    async fn pending_cap_exhausts_pool() {
        let s = scenario("exhausted").await;

        for _ in 0..MAX_PENDING_PACKAGES {
            s.packages.get_package("f1").await.unwrap();
        }
        let result = s.packages.get_package("f1").await;

        assert!(matches!(result, Err(FleetError::PoolExhausted(_))));
    }

    /// The results file holds the summary line
    #[tokio::test]
    async fn print_deliveries_writes_results_file() {
        let dir = results_dir("print");
        let packages = PackageGenerator::new(&dir);
        packages.initialize_swarm("f7", 1).await;
        packages.get_package("f7").await.unwrap();

        packages.print_deliveries("f7").await.unwrap();

        let contents = std::fs::read_to_string(dir.join("f7_results.txt")).unwrap();
        assert_eq!(
            contents,
            "Swarm f7 has 0 deliveries and 1 still pending and 0 weight exceeds on a drone.\n"
        );
    }
}

/// FLEET LIFECYCLE TESTS
mod fleet_lifecycle_tests {
    use super::*;

    /// A drone whose radio link drops disappears from its swarm
    #[tokio::test]
    async fn lost_link_evicts_drone() {
        let factory = Arc::new(LoopbackFactory::new(LinkBehavior::Accept));
        let swarms = SwarmManager::new(factory.clone(), test_config());
        swarms.register_swarm("f1", 1).await.unwrap();
        swarms
            .add_drone("f1", "d1", &LinkConfig::default())
            .await
            .unwrap();

        factory.driver("d1").unwrap().lose_link("radio timeout");

        let mut evicted = false;
        for _ in 0..100 {
            if swarms.get_drone("f1", "d1").await.is_err() {
                evicted = true;
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(evicted);
    }

    /// A drone that never answers fails to connect instead of hanging
    #[tokio::test]
    async fn silent_link_times_out() {
        let factory = Arc::new(LoopbackFactory::new(LinkBehavior::Silent));
        let swarms = SwarmManager::new(factory, test_config());
        swarms.register_swarm("f1", 0).await.unwrap();

        let result = swarms.add_drone("f1", "d1", &LinkConfig::default()).await;

        assert!(matches!(result, Err(FleetError::ConnectionFailed { .. })));
        assert!(swarms.get_drone("f1", "d1").await.is_err());
    }

    /// Motion targets stay inside every canonical arena
    #[tokio::test]
    async fn go_to_respects_every_arena() {
        let factory = Arc::new(LoopbackFactory::new(LinkBehavior::Accept));
        let swarms = SwarmManager::new(factory, test_config());

        for arena_id in 0..3 {
            let swarm_id = format!("f{}", arena_id);
            swarms.register_swarm(&swarm_id, arena_id).await.unwrap();
            let drone = swarms
                .add_drone(&swarm_id, "d1", &LinkConfig::default())
                .await
                .unwrap();
            let arena = swarms.get_arena(&swarm_id).await.unwrap();

            for (x, y, z) in [(-50.0, 50.0, 9.0), (50.0, -50.0, -1.0), (3.0, 0.0, 0.6)] {
                let result = drone.go_to(x, y, z, 0.0, 0.5, false).await.unwrap();
                let local_x = arena.transform_x_inverse(result.target_x);
                let local_y = arena.transform_y_inverse(result.target_y);

                assert!(local_x >= arena.min_x - 1e-9 && local_x <= arena.max_x + 1e-9);
                assert!(local_y >= arena.min_y - 1e-9 && local_y <= arena.max_y + 1e-9);
                assert!(result.target_z >= arena.min_z && result.target_z <= arena.max_z);
                assert!(result.duration >= 1.0);
            }
        }
    }
}

/// CONTROL PLANE TESTS
mod control_plane_tests {
    use super::*;

    /// Full request cycle over UDP, from registration to delivery summary
    #[tokio::test]
    async fn udp_round_trip() {
        let dir = results_dir("udp");
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            results_dir: dir.clone(),
            drone: test_config(),
        };
        let factory = Arc::new(LoopbackFactory::new(LinkBehavior::Accept));
        let server = Server::new(&config, factory).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut client = ControlClient::new(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();

        let registered = client
            .send_request(Request::RegisterSwarm {
                swarm_id: "f1".to_string(),
                arena_id: 0,
                seed: Some(42),
            })
            .await
            .unwrap();
        assert!(matches!(registered, Response::SwarmRegistered { arena_id: 0, .. }));

        let connected = client
            .send_request(Request::Connect {
                swarm_id: "f1".to_string(),
                drone_id: "d1".to_string(),
                link: LinkConfig::default(),
            })
            .await
            .unwrap();
        assert!(matches!(connected, Response::Connected(ref s) if s.is_connected));

        let package = client
            .send_request(Request::RequestPackage {
                swarm_id: "f1".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(package, Response::Package(_)));

        let missing = client
            .send_request(Request::DroneStatus {
                swarm_id: "f1".to_string(),
                drone_id: "ghost".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(missing, Response::NotFound { .. }));

        let summary = client
            .send_request(Request::PrintDeliveries {
                swarm_id: "f1".to_string(),
            })
            .await
            .unwrap();
        match summary {
            Response::DeliverySummary(summary) => {
                assert_eq!(summary.pending, 1);
                assert_eq!(summary.delivered, 0);
            }
            other => panic!("Expected a delivery summary, got {:?}", other),
        }
        assert!(dir.join("f1_results.txt").exists());
    }
}
