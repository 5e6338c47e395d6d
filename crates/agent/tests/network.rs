//! Agent and directory talking over real sockets on loopback.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sharenet_agent::{AgentConfig, PeerAgent, RegistrationState};
use sharenet_directory::DirectoryService;
use sharenet_notify::NotificationHub;
use sharenet_registry::{FileRegistry, PeerRegistry};
use tokio::net::TcpListener;

async fn spawn_directory() -> (Arc<DirectoryService>, SocketAddr) {
    let service = Arc::new(DirectoryService::new(
        PeerRegistry::new(),
        FileRegistry::new(),
        Arc::new(NotificationHub::new(8)),
        50,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = sharenet_directory::build_router(service.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (service, addr)
}

/// Bind first so the advertised port is the one actually served.
async fn spawn_agent(directory: SocketAddr, shared: &Path) -> Arc<PeerAgent> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = AgentConfig {
        port,
        advertise_address: "127.0.0.1".into(),
        directory_address: directory.to_string(),
        shared_directory: shared.to_path_buf(),
        register_delay_ms: 0,
        ..AgentConfig::default()
    };
    let agent = Arc::new(PeerAgent::new(config, Arc::new(NotificationHub::new(8))).unwrap());
    agent.initialize().await.unwrap();

    let app = sharenet_agent::build_router(agent.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    agent
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..50 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn registration_advertises_indexed_files() {
    let (directory, dir_addr) = spawn_directory().await;
    let shared = tempfile::tempdir().unwrap();
    std::fs::write(shared.path().join("a.txt"), b"alpha").unwrap();
    std::fs::write(shared.path().join("b.mp3"), b"beta").unwrap();
    let agent = spawn_agent(dir_addr, shared.path()).await;

    let peer_id = agent.register_until_success().await;
    assert_eq!(
        agent.state(),
        RegistrationState::Registered {
            peer_id: peer_id.clone()
        }
    );

    let peers = directory.list_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, peer_id);
    assert_eq!(peers[0].port, agent.config().port);
    assert_eq!(peers[0].shared_files, 2);

    let files = directory.list_files();
    assert_eq!(files.len(), 2);
    for record in &files {
        assert_eq!(record.owner, peer_id);
        assert_eq!(record.peer_address, agent.config().advertised_endpoint());
    }

    assert!(agent.heartbeat_once().await);
    assert!(agent.last_heartbeat().is_some());
}

#[tokio::test]
async fn download_is_redirected_to_the_owning_agent() {
    let (directory, dir_addr) = spawn_directory().await;
    let shared = tempfile::tempdir().unwrap();
    std::fs::write(shared.path().join("song.mp3"), b"la la la").unwrap();
    let agent = spawn_agent(dir_addr, shared.path()).await;
    agent.register_until_success().await;

    let record = directory.list_files().remove(0);
    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{dir_addr}/api/v1/download/{}", record.id))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.url().port(), Some(agent.config().port));
    assert_eq!(&response.bytes().await.unwrap()[..], b"la la la");

    assert_eq!(directory.list_files()[0].downloads, 1);
    assert_eq!(agent.index().download_stats().total_downloads, 1);
}

#[tokio::test]
async fn files_found_after_registration_are_advertised() {
    let (directory, dir_addr) = spawn_directory().await;
    let shared = tempfile::tempdir().unwrap();
    let agent = spawn_agent(dir_addr, shared.path()).await;
    agent.register_until_success().await;
    assert!(directory.list_files().is_empty());

    std::fs::write(shared.path().join("late.txt"), b"late").unwrap();
    agent.reconcile_once().await.unwrap();
    assert_eq!(directory.list_files().len(), 1);

    // uploads are advertised from a background task
    agent.share("upload.zip", b"PK").await.unwrap();
    wait_for(|| directory.list_files().len() == 2).await;

    let archive = directory
        .list_files()
        .into_iter()
        .find(|record| record.filename == "upload.zip")
        .unwrap();
    assert_eq!(archive.category, "archive");
}

#[tokio::test]
async fn registration_retries_until_directory_appears() {
    // reserve a port, then leave it closed until the agent has failed once
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dir_addr = reserved.local_addr().unwrap();
    drop(reserved);

    let shared = tempfile::tempdir().unwrap();
    let config = AgentConfig {
        directory_address: dir_addr.to_string(),
        shared_directory: shared.path().to_path_buf(),
        registration_retry_secs: 1,
        ..AgentConfig::default()
    };
    let agent = Arc::new(PeerAgent::new(config, Arc::new(NotificationHub::new(8))).unwrap());
    assert!(agent.register_once().await.is_err());
    assert_eq!(agent.state(), RegistrationState::Unregistered);

    let registering = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.register_until_success().await })
    };

    let service = Arc::new(DirectoryService::new(
        PeerRegistry::new(),
        FileRegistry::new(),
        Arc::new(NotificationHub::new(8)),
        50,
    ));
    let listener = TcpListener::bind(dir_addr).await.unwrap();
    let app = sharenet_directory::build_router(service.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let peer_id = tokio::time::timeout(Duration::from_secs(10), registering)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(service.list_peers()[0].id, peer_id);
}
