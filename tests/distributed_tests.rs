//! Integration tests for the quorum backend over in-process peers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{FlakyPeer, OfflinePeer, SlowPeer, as_peers, servers};
use namespace_lock::{
    LockArgs, LockEntry, LockError, LockMode, LockPeer, LockServer, LockStatus,
    NamespaceLockManager, ResourceKey,
};
use tokio::time::{Instant, timeout};

fn manager(peers: Vec<Arc<dyn LockPeer>>, owner: &str) -> NamespaceLockManager {
    NamespaceLockManager::builder()
        .distributed(true)
        .peers(peers)
        .owner(owner)
        .acquire_timeout(Duration::from_millis(300))
        .expiry(Duration::from_secs(2))
        .retry_sleep_range(Duration::from_millis(5), Duration::from_millis(20))
        .build()
        .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_write_lock_is_held_on_peers() {
    let servers = servers(3);
    let manager = manager(as_peers(&servers), "node-a");

    let lock = manager.new_lock("bucket", "object").unwrap();
    lock.lock().await.unwrap();
    wait_until(|| {
        servers
            .iter()
            .all(|s| s.writer_owner("bucket/object").as_deref() == Some("node-a"))
    })
    .await;

    lock.unlock().unwrap();
    assert!(manager.table().is_empty());
    wait_until(|| servers.iter().all(|s| s.active_leases() == 0)).await;
}

#[tokio::test]
async fn test_conflicting_writer_times_out_without_leaking() {
    let servers = servers(3);
    let node_a = manager(as_peers(&servers), "node-a");
    let node_b = manager(as_peers(&servers), "node-b");

    let held = node_a.new_lock("bucket", "object").unwrap();
    held.lock().await.unwrap();

    let contender = node_b.new_lock("bucket", "object").unwrap();
    let start = Instant::now();
    let err = contender.lock().await.unwrap_err();
    assert!(matches!(err, LockError::Timeout(_)), "unexpected error: {err}");
    assert!(err.is_retriable());
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(node_b.table().is_empty());

    // Other keys are unaffected.
    let unrelated = node_b.new_lock("bucket", "other").unwrap();
    unrelated.lock().await.unwrap();
    unrelated.unlock().unwrap();

    held.unlock().unwrap();
}

#[tokio::test]
async fn test_blocked_entry_visible_while_waiting() {
    let servers = servers(3);
    let node_a = manager(as_peers(&servers), "node-a");
    let node_b = manager(as_peers(&servers), "node-b");

    let held = node_a.new_lock("bucket", "object").unwrap();
    held.lock().await.unwrap();

    let waiter = {
        let node_b = node_b.clone();
        tokio::spawn(async move {
            let lock = node_b.new_lock("bucket", "object").unwrap();
            lock.lock().await
        })
    };
    wait_until(|| !node_b.list_locks("bucket", "", Duration::ZERO).is_empty()).await;
    let infos = node_b.list_locks("bucket", "", Duration::ZERO);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].status, LockStatus::Blocked);

    assert!(waiter.await.unwrap().is_err());
    assert!(node_b.list_locks("bucket", "", Duration::ZERO).is_empty());
    held.unlock().unwrap();
}

#[tokio::test]
async fn test_lock_passes_to_waiter_after_unlock() {
    let servers = servers(3);
    let node_a = manager(as_peers(&servers), "node-a");
    let node_b = NamespaceLockManager::builder()
        .distributed(true)
        .peers(as_peers(&servers))
        .owner("node-b")
        .acquire_timeout(Duration::from_secs(3))
        .retry_sleep_range(Duration::from_millis(5), Duration::from_millis(20))
        .build()
        .unwrap();

    let held = node_a.new_lock("bucket", "object").unwrap();
    held.lock().await.unwrap();

    let waiter = tokio::spawn(async move {
        let lock = node_b.new_lock("bucket", "object").unwrap();
        lock.lock().await?;
        lock.unlock()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    held.unlock().unwrap();
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_too_few_peers_is_peer_unavailable() {
    let servers = servers(1);
    let mut peers = as_peers(&servers);
    peers.push(Arc::new(OfflinePeer::new("node-1")));
    peers.push(Arc::new(OfflinePeer::new("node-2")));
    let manager = manager(peers, "node-a");

    let lock = manager.new_lock("bucket", "object").unwrap();
    let start = Instant::now();
    match lock.lock().await {
        Err(LockError::PeerUnavailable { reachable, required }) => {
            assert_eq!(reachable, 1);
            assert_eq!(required, 2);
        }
        other => panic!("expected PeerUnavailable, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        lock.try_rlock().await,
        Err(LockError::PeerUnavailable { .. })
    ));
    assert!(manager.table().is_empty());
}

#[tokio::test]
async fn test_slow_peer_does_not_stall_acquisition() {
    let servers = servers(3);
    let peers: Vec<Arc<dyn LockPeer>> = vec![
        servers[0].clone(),
        servers[1].clone(),
        Arc::new(SlowPeer::new(servers[2].clone(), Duration::from_secs(10))),
    ];
    let manager = manager(peers, "node-a");

    let lock = manager.new_lock("bucket", "object").unwrap();
    timeout(Duration::from_secs(1), lock.lock())
        .await
        .expect("slow peer stalled acquisition")
        .unwrap();
    lock.unlock().unwrap();
}

#[tokio::test]
async fn test_hung_peer_does_not_delay_default_acquisition() {
    let servers = servers(3);
    let peers: Vec<Arc<dyn LockPeer>> = vec![
        servers[0].clone(),
        servers[1].clone(),
        Arc::new(SlowPeer::new(servers[2].clone(), Duration::from_secs(60))),
    ];
    let manager = NamespaceLockManager::builder()
        .distributed(true)
        .peers(peers)
        .owner("node-a")
        .build()
        .unwrap();

    // The majority answers at once; the hung peer must not hold up the
    // round for its full call timeout.
    let lock = manager.new_lock("bucket", "object").unwrap();
    timeout(Duration::from_secs(1), lock.lock())
        .await
        .expect("acquisition waited for the hung peer")
        .unwrap();
    let reader = manager.new_lock("bucket", "other").unwrap();
    timeout(Duration::from_secs(1), reader.rlock())
        .await
        .expect("acquisition waited for the hung peer")
        .unwrap();

    lock.unlock().unwrap();
    reader.runlock().unwrap();
}

#[tokio::test]
async fn test_cancelled_acquisition_releases_partial_grants() {
    let servers = servers(3);
    let peers: Vec<Arc<dyn LockPeer>> = vec![
        servers[0].clone(),
        Arc::new(SlowPeer::new(servers[1].clone(), Duration::from_secs(10))),
        Arc::new(SlowPeer::new(servers[2].clone(), Duration::from_secs(10))),
    ];
    let node_a = manager(peers, "node-a");

    let lock = node_a.new_lock("bucket", "object").unwrap();
    let result = lock.lock_until(tokio::time::sleep(Duration::from_millis(50))).await;
    assert!(matches!(result, Err(LockError::Cancelled)), "unexpected result: {result:?}");
    assert!(node_a.table().is_empty());

    // The fast peer granted before the cancel; that lease must not linger
    // until it expires.
    wait_until(|| servers[0].active_leases() == 0).await;
    let node_b = manager(vec![servers[0].clone() as Arc<dyn LockPeer>], "node-b");
    let other = node_b.new_lock("bucket", "object").unwrap();
    other.lock().await.unwrap();
    assert_eq!(servers[0].writer_owner("bucket/object").as_deref(), Some("node-b"));
    other.unlock().unwrap();
}

#[tokio::test]
async fn test_queued_writer_is_not_overtaken_by_later_reader() {
    let servers = servers(3);
    let manager = NamespaceLockManager::builder()
        .distributed(true)
        .peers(as_peers(&servers))
        .owner("node-a")
        .acquire_timeout(Duration::from_secs(3))
        .retry_sleep_range(Duration::from_millis(5), Duration::from_millis(20))
        .build()
        .unwrap();
    let key = ResourceKey::new("bucket", "object").unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = manager.new_lock("bucket", "object").unwrap();
    first.rlock().await.unwrap();

    let writer = {
        let manager = manager.clone();
        let order = order.clone();
        tokio::spawn(async move {
            let lock = manager.new_lock("bucket", "object").unwrap();
            lock.lock().await?;
            order.lock().unwrap().push("writer");
            tokio::time::sleep(Duration::from_millis(50)).await;
            lock.unlock()
        })
    };
    wait_until(|| manager.table().state(&key).is_some_and(|s| s.waiting_writers == 1)).await;

    // Peers only hold read leases, yet the queued writer comes first.
    let late = manager.new_lock("bucket", "object").unwrap();
    assert!(!late.try_rlock().await.unwrap());

    let reader = {
        let manager = manager.clone();
        let order = order.clone();
        tokio::spawn(async move {
            let lock = manager.new_lock("bucket", "object").unwrap();
            lock.rlock().await?;
            order.lock().unwrap().push("reader");
            lock.runlock()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(order.lock().unwrap().is_empty());

    first.runlock().unwrap();
    writer.await.unwrap().unwrap();
    reader.await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["writer", "reader"]);
    assert!(manager.table().is_empty());
}

#[tokio::test]
async fn test_locally_refused_quorum_grant_is_retried() {
    let servers = servers(3);
    let peers: Vec<Arc<dyn LockPeer>> = servers
        .iter()
        .map(|s| Arc::new(SlowPeer::new(s.clone(), Duration::from_millis(100))) as Arc<dyn LockPeer>)
        .collect();
    let manager = NamespaceLockManager::builder()
        .distributed(true)
        .peers(peers)
        .owner("node-a")
        .expiry(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(3))
        .retry_sleep_range(Duration::from_millis(5), Duration::from_millis(20))
        .build()
        .unwrap();
    let key = ResourceKey::new("bucket", "object").unwrap();

    let writer = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let lock = manager.new_lock("bucket", "object").unwrap();
            lock.lock().await?;
            lock.unlock()
        })
    };

    // A reader recorded locally while the writer's round is in flight makes
    // the table refuse the writer's quorum grant.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let table = manager.table();
    table
        .register(&key, LockEntry::blocked("rogue", LockMode::Read, "test"))
        .unwrap();
    table.grant(&key, "rogue").unwrap();

    // The round answers at 100ms; its refused grant is given back to the
    // peers and the writer keeps waiting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    wait_until(|| servers.iter().all(|s| s.active_leases() == 0)).await;
    assert!(!writer.is_finished());
    assert_eq!(table.state(&key).unwrap().waiting_writers, 1);

    table.release(&key, "rogue").unwrap();
    timeout(Duration::from_secs(2), writer)
        .await
        .expect("writer was not granted after the reader left")
        .unwrap()
        .unwrap();
    assert!(manager.table().is_empty());
}

#[tokio::test]
async fn test_flaky_peers_recover() {
    let servers = servers(3);
    let flaky: Vec<Arc<FlakyPeer>> = servers
        .iter()
        .map(|s| Arc::new(FlakyPeer::new(s.clone())))
        .collect();
    let peers: Vec<Arc<dyn LockPeer>> = flaky.iter().map(|p| p.clone() as Arc<dyn LockPeer>).collect();
    let manager = manager(peers, "node-a");
    let lock = manager.new_lock("bucket", "object").unwrap();

    flaky[0].set_failing(true);
    flaky[1].set_failing(true);
    assert!(matches!(
        lock.try_lock().await,
        Err(LockError::PeerUnavailable { reachable: 1, required: 2 })
    ));
    // The partial grant from the failed round is released in the background.
    wait_until(|| servers[2].active_leases() == 0).await;

    // One failure still leaves a majority.
    flaky[1].set_failing(false);
    assert!(lock.try_lock().await.unwrap());
    lock.unlock().unwrap();
}

#[tokio::test]
async fn test_readers_share_across_nodes() {
    let servers = servers(3);
    let node_a = manager(as_peers(&servers), "node-a");
    let node_b = manager(as_peers(&servers), "node-b");

    let reader_a = node_a.new_lock("bucket", "object").unwrap();
    let reader_b = node_b.new_lock("bucket", "object").unwrap();
    reader_a.rlock().await.unwrap();
    reader_b.rlock().await.unwrap();

    let writer = node_b.new_lock("bucket", "object").unwrap();
    assert!(!writer.try_lock().await.unwrap());

    reader_a.runlock().unwrap();
    reader_b.runlock().unwrap();
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let servers = servers(3);
    // A holder that crashed without releasing.
    let ghost = LockArgs {
        uid: "ghost".to_string(),
        resource: "bucket/object".to_string(),
        owner: "node-dead".to_string(),
        source: "crashed".to_string(),
        ttl: Duration::from_millis(150),
    };
    for server in &servers {
        assert!(server.try_lock(&ghost));
    }

    let manager = NamespaceLockManager::builder()
        .distributed(true)
        .peers(as_peers(&servers))
        .owner("node-a")
        .acquire_timeout(Duration::from_secs(2))
        .retry_sleep_range(Duration::from_millis(5), Duration::from_millis(20))
        .build()
        .unwrap();
    let lock = manager.new_lock("bucket", "object").unwrap();
    lock.lock().await.unwrap();
    wait_until(|| servers[0].writer_owner("bucket/object").as_deref() == Some("node-a")).await;
    lock.unlock().unwrap();
}

#[tokio::test]
async fn test_lost_lease_flips_token() {
    let servers = servers(3);
    let manager = NamespaceLockManager::builder()
        .distributed(true)
        .peers(as_peers(&servers))
        .owner("node-a")
        .expiry(Duration::from_millis(600))
        .extension_cadence(Duration::from_millis(50))
        .build()
        .unwrap();

    let lock = manager.new_lock("bucket", "object").unwrap();
    lock.lock().await.unwrap();
    assert!(!lock.is_lost());

    // An operator clears the lease on a majority of peers.
    servers[0].force_release("bucket/object");
    servers[1].force_release("bucket/object");

    wait_until(|| lock.is_lost()).await;
    assert!(matches!(lock.check_held(), Err(LockError::LockLost(_))));
    lock.unlock().unwrap();
    assert!(manager.table().is_empty());
}

#[tokio::test]
async fn test_held_lease_outlives_expiry() {
    let servers = servers(3);
    let node_a = NamespaceLockManager::builder()
        .distributed(true)
        .peers(as_peers(&servers))
        .owner("node-a")
        .expiry(Duration::from_millis(300))
        .extension_cadence(Duration::from_millis(50))
        .build()
        .unwrap();
    let node_b = manager(as_peers(&servers), "node-b");

    let held = node_a.new_lock("bucket", "object").unwrap();
    held.lock().await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;

    // Renewal kept the lease alive past its original expiry.
    assert!(!held.is_lost());
    let contender = node_b.new_lock("bucket", "object").unwrap();
    assert!(!contender.try_lock().await.unwrap());
    held.unlock().unwrap();
}

#[tokio::test]
async fn test_force_unlock_clears_peers() {
    let servers = servers(3);
    let ghost = LockArgs {
        uid: "ghost".to_string(),
        resource: "bucket/object".to_string(),
        owner: "node-dead".to_string(),
        source: "crashed".to_string(),
        ttl: Duration::from_secs(60),
    };
    for server in &servers {
        assert!(server.try_lock(&ghost));
    }

    let manager = manager(as_peers(&servers), "node-a");
    let namespace_lock::Backend::Distributed(backend) = manager.backend() else {
        panic!("expected distributed backend");
    };
    let key = namespace_lock::ResourceKey::new("bucket", "object").unwrap();
    backend.force_unlock(&key).await.unwrap();
    assert!(servers.iter().all(|s| s.active_leases() == 0));

    let lock = manager.new_lock("bucket", "object").unwrap();
    assert!(lock.try_lock().await.unwrap());
    lock.unlock().unwrap();
}

#[test]
fn test_server_is_a_peer() {
    let server: Arc<dyn LockPeer> = Arc::new(LockServer::new("node-0"));
    assert_eq!(server.endpoint(), "node-0");
    assert!(server.is_online());
}
