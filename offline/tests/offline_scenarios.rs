//! End-to-end scenarios through the worker façade.

use std::sync::Arc;

use futures::executor::block_on;

use kpio_offline::cache::{CacheEntry, CacheStorage, MemoryCacheStorage};
use kpio_offline::error::NetworkFault;
use kpio_offline::events::{MessageEvent, SyncEvent};
use kpio_offline::fixtures::{FakeClients, FakeConnectivity, FakeNetwork, FakeSync, ManualClock};
use kpio_offline::queue::{FileRequestStore, MemoryRequestStore, RequestStore};
use kpio_offline::request::Headers;
use kpio_offline::{
    HandoffDecision, HostServices, Method, MessageOutcome, OfflineConfig, OfflineWorker, Request,
    Response, ResponseSource, WorkerState,
};

struct World {
    network: Arc<FakeNetwork>,
    connectivity: Arc<FakeConnectivity>,
    clients: Arc<FakeClients>,
    sync: Arc<FakeSync>,
    clock: Arc<ManualClock>,
    store: Arc<MemoryRequestStore>,
    caches: Arc<MemoryCacheStorage>,
}

impl World {
    fn new() -> Self {
        let network = Arc::new(FakeNetwork::new());
        network.respond("/", Response::ok("<html>home</html>"));
        network.respond("/app.js", Response::ok("console.log(1)"));
        network.respond("/offline.html", Response::ok("<html>offline</html>"));
        Self {
            network,
            connectivity: Arc::new(FakeConnectivity::online()),
            clients: Arc::new(FakeClients::new(1)),
            sync: Arc::new(FakeSync::supported()),
            clock: Arc::new(ManualClock::new(1_700_000_000_000)),
            store: Arc::new(MemoryRequestStore::new()),
            caches: Arc::new(MemoryCacheStorage::new()),
        }
    }

    fn worker(&self, version: &str) -> OfflineWorker {
        let config = OfflineConfig {
            version: String::from(version),
            static_assets: vec![String::from("/"), String::from("/app.js")],
            routes: vec![String::from("/offline.html")],
            ..OfflineConfig::default()
        };
        let host = HostServices::new(
            &config,
            self.network.clone(),
            self.connectivity.clone(),
            self.clients.clone(),
        )
        .with_sync(self.sync.clone())
        .with_clock(self.clock.clone())
        .with_request_store(self.store.clone())
        .with_cache_storage(self.caches.clone());
        OfflineWorker::new(config, host).unwrap()
    }

    fn go_offline(&self) {
        self.connectivity.set_online(false);
        self.network.set_offline(true);
    }

    fn go_online(&self) {
        self.connectivity.set_online(true);
        self.network.set_offline(false);
    }
}

fn installed(world: &World, version: &str) -> OfflineWorker {
    let worker = world.worker(version);
    block_on(worker.install()).unwrap();
    block_on(worker.activate()).unwrap();
    worker
}

#[test]
fn offline_post_is_queued_and_fallback_served() {
    let world = World::new();
    let worker = installed(&world, "v1");
    let fetches_before = world.network.request_count();
    world.go_offline();

    let result = block_on(worker.fetch(
        Request::new(Method::Post, "/submit")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"title":"draft"}"#),
    ));

    assert_eq!(result.source, ResponseSource::Queued);
    assert_eq!(result.response.body, b"<html>offline</html>");
    assert_eq!(world.store.keys().len(), 1);
    assert_eq!(world.network.request_count(), fetches_before);
    assert_eq!(world.sync.registrations(), vec!["retry-requests"]);
}

#[test]
fn queued_requests_replay_through_sync_event() {
    let world = World::new();
    let worker = installed(&world, "v1");
    world.go_offline();
    block_on(worker.fetch(Request::new(Method::Put, "/notes/1").with_body("a")));
    world.clock.advance(5);
    block_on(worker.fetch(Request::new(Method::Delete, "/notes/2")));
    assert_eq!(world.store.keys().len(), 2);

    world.go_online();
    let mut event = SyncEvent::new("retry-requests", false);
    assert!(worker.on_sync(&mut event));
    block_on(event.into_extendable().settle());

    assert!(world.store.keys().is_empty());
    let replayed: Vec<_> = world
        .network
        .requests()
        .into_iter()
        .filter(|r| r.url.starts_with("/notes/"))
        .map(|r| (r.method, r.url))
        .collect();
    assert_eq!(
        replayed,
        vec![
            (Method::Put, String::from("/notes/1")),
            (Method::Delete, String::from("/notes/2")),
        ]
    );
}

#[test]
fn partial_drain_keeps_only_failed_record() {
    let world = World::new();
    let worker = installed(&world, "v1");
    world.go_offline();
    block_on(worker.fetch(Request::new(Method::Post, "/ok")));
    world.clock.advance(1);
    block_on(worker.fetch(Request::new(Method::Post, "/broken")));
    let keys = world.store.keys();

    world.go_online();
    world
        .network
        .fail("/broken", NetworkFault::Unreachable(String::from("reset")));
    let report = block_on(worker.drain());

    assert_eq!(report.replayed, vec![keys[0]]);
    assert_eq!(report.failed, vec![keys[1]]);
    assert_eq!(world.store.keys(), vec![keys[1]]);
}

#[test]
fn replayed_headers_match_original_pairs() {
    let world = World::new();
    let worker = installed(&world, "v1");
    world.go_offline();
    block_on(worker.fetch(
        Request::new(Method::Post, "/submit")
            .with_header("X-Request-Id", "abc")
            .with_header("Accept", "text/html")
            .with_header("accept", "application/json"),
    ));

    world.go_online();
    block_on(worker.drain());
    let sent = world
        .network
        .requests()
        .into_iter()
        .find(|r| r.url == "/submit")
        .unwrap();
    assert_eq!(sent.headers["x-request-id"], "abc");
    assert_eq!(sent.headers["accept"], "text/html, application/json");
    assert_eq!(sent.headers.len(), 2);
}

#[test]
fn two_clients_block_skip_waiting() {
    let world = World::new();
    installed(&world, "v1");
    world.clients.set_count(2);

    let update = world.worker("v2");
    assert_eq!(block_on(update.install()).unwrap(), WorkerState::Waiting);
    let outcome = block_on(update.on_message(&MessageEvent::new(r#"{"type":"SKIP_WAITING"}"#)))
        .unwrap();

    assert_eq!(
        outcome,
        MessageOutcome::Handoff(HandoffDecision::Refused { clients: 2 })
    );
    assert_eq!(update.state(), WorkerState::Waiting);
    assert_eq!(world.clients.skip_waiting_calls(), 0);
}

#[test]
fn skip_waiting_with_single_client_activates() {
    let world = World::new();
    installed(&world, "v1");

    let update = world.worker("v2");
    block_on(update.install()).unwrap();
    block_on(update.on_message(&MessageEvent::new(r#""SKIP_WAITING""#))).unwrap();
    assert_eq!(update.state(), WorkerState::Activating);

    block_on(update.activate()).unwrap();
    assert_eq!(block_on(world.caches.keys()).unwrap(), vec!["kpio-offline-v2"]);
}

#[test]
fn update_window_serves_fresh_content_from_old_snapshot() {
    let world = World::new();
    let old = installed(&world, "v1");

    world.network.respond("/app.js", Response::ok("console.log(2)"));
    let update = world.worker("v2");
    block_on(update.install()).unwrap();

    block_on(update.on_message(&MessageEvent::new(
        r#"{"type":"PREPARE_CACHES_FOR_UPDATE"}"#,
    )))
    .unwrap();

    // The old worker searches its own snapshot first.
    world.go_offline();
    let served = block_on(old.fetch(Request::get("/app.js")));
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"console.log(2)");
}

#[test]
fn migration_copies_forward_and_keeps_extra_entries() {
    let world = World::new();
    let put = |name: &str, url: &str, body: &str| {
        block_on(world.caches.put(
            name,
            CacheEntry::new(url, Headers::new(), Response::ok(body)),
        ))
        .unwrap();
    };
    put("kpio-offline-v1", "/A", "A1");
    put("kpio-offline-v1", "/C", "C1");
    put("kpio-offline-v2", "/A", "A2");
    put("kpio-offline-v2", "/B", "B2");

    let worker = world.worker("v2");
    assert_eq!(block_on(worker.snapshots().migrate_forward()).unwrap(), 2);

    let v1: Vec<(String, Vec<u8>)> = block_on(world.caches.entries("kpio-offline-v1"))
        .unwrap()
        .into_iter()
        .map(|e| (e.url, e.response.body))
        .collect();
    assert_eq!(
        v1,
        vec![
            (String::from("/A"), b"A2".to_vec()),
            (String::from("/C"), b"C1".to_vec()),
            (String::from("/B"), b"B2".to_vec()),
        ]
    );
}

#[test]
fn delete_outdated_is_idempotent() {
    let world = World::new();
    for name in ["kpio-offline-v1", "kpio-offline-v2", "kpio-offline-v3"] {
        block_on(world.caches.put(
            name,
            CacheEntry::new("/", Headers::new(), Response::ok("x")),
        ))
        .unwrap();
    }
    let worker = world.worker("v3");

    let first = block_on(worker.snapshots().delete_outdated()).unwrap();
    let after_first = block_on(world.caches.keys()).unwrap();
    let second = block_on(worker.snapshots().delete_outdated()).unwrap();

    assert_eq!(first, vec!["kpio-offline-v1", "kpio-offline-v2"]);
    assert!(second.is_empty());
    assert_eq!(block_on(world.caches.keys()).unwrap(), after_first);
}

#[test]
fn cached_redirect_is_sanitized() {
    let world = World::new();
    world.network.respond(
        "/",
        Response::ok("<html>home</html>")
            .with_header("X-Served-By", "edge")
            .with_redirected(true),
    );
    let worker = installed(&world, "v1");
    world.go_offline();

    let result = block_on(worker.fetch(Request::get("/")));
    assert_eq!(result.source, ResponseSource::Cache);
    assert!(!result.response.redirected);
    assert_eq!(result.response.body, b"<html>home</html>");
    assert_eq!(result.response.headers.get("x-served-by").as_deref(), Some("edge"));
}

#[test]
fn failed_install_degrades_to_network_only() {
    let world = World::new();
    world.network.respond("/app.js", Response::new(404));
    let worker = world.worker("v1");

    assert_eq!(block_on(worker.install()).unwrap(), WorkerState::Waiting);
    assert!(!worker.diagnostics().is_empty());

    world.network.respond("/app.js", Response::ok("live"));
    let result = block_on(worker.fetch(Request::get("/app.js")));
    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(result.response.body, b"live");
}

#[test]
fn queue_survives_worker_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let config = OfflineConfig {
        version: String::from("v1"),
        store_dir: Some(dir.path().to_path_buf()),
        ..OfflineConfig::default()
    };
    let make = || {
        let host = HostServices::new(
            &config,
            world.network.clone(),
            world.connectivity.clone(),
            world.clients.clone(),
        )
        .with_clock(world.clock.clone());
        OfflineWorker::new(config.clone(), host).unwrap()
    };

    {
        let worker = make();
        block_on(worker.install()).unwrap();
        world.go_offline();
        block_on(worker.fetch(Request::new(Method::Post, "/submit").with_body("payload")));
    }

    world.go_online();
    let restarted = make();
    let report = block_on(restarted.drain());
    assert_eq!(report.replayed.len(), 1);
    assert!(block_on(FileRequestStore::new(dir.path()).get_all())
        .unwrap()
        .is_empty());
}
