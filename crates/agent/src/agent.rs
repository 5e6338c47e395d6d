use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sharenet_notify::NotificationHub;
use sharenet_types::{
    categorize, derive_agent_id, derive_shared_file_id, extract_tags, hash_bytes, Event,
    EventKind, PeerRegistration, SharedFile,
};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::DirectoryClient;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::index::{ActiveTransfer, DownloadStats, LocalIndex, UploadStats};
use crate::scanner::{self, Reconciliation};

/// Where this agent stands with the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered { peer_id: String },
}

/// How a download request names its file.
#[derive(Debug, Clone, Copy)]
pub enum DownloadTarget<'a> {
    Id(&'a str),
    Filename(&'a str),
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub id: String,
    pub local_id: String,
    pub address: String,
    pub port: u16,
    pub is_registered: bool,
    pub registration: RegistrationState,
    pub shared_files: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub download_stats: DownloadStats,
    pub upload_stats: UploadStats,
    pub config: AgentConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub peer_id: String,
    pub shared_files: usize,
    pub download_stats: DownloadStats,
    pub upload_stats: UploadStats,
    pub is_registered: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// A peer agent: local index, directory registration and event fan-out.
///
/// Shared file identifiers derive from the agent's local id, which is fixed
/// for the life of the process. The directory-assigned peer id is used for
/// heartbeats and as the owner of advertised files.
pub struct PeerAgent {
    config: AgentConfig,
    local_id: String,
    client: DirectoryClient,
    index: LocalIndex,
    hub: Arc<NotificationHub>,
    state: RwLock<RegistrationState>,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
    /// Unshared without deletion; kept out of the index by rescans.
    withheld: RwLock<HashSet<String>>,
}

impl PeerAgent {
    pub fn new(config: AgentConfig, hub: Arc<NotificationHub>) -> Result<Self> {
        let local_id = derive_agent_id(&config.advertise_address, config.port, Utc::now());
        let client = DirectoryClient::new(config.directory_url(), config.request_timeout())?;
        Ok(Self {
            config,
            local_id,
            client,
            index: LocalIndex::new(),
            hub,
            state: RwLock::new(RegistrationState::Unregistered),
            last_heartbeat: RwLock::new(None),
            withheld: RwLock::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn state(&self) -> RegistrationState {
        self.state.read().clone()
    }

    pub fn peer_id(&self) -> Option<String> {
        match &*self.state.read() {
            RegistrationState::Registered { peer_id } => Some(peer_id.clone()),
            _ => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.peer_id().is_some()
    }

    /// Directory-assigned id once registered, the local id before that.
    pub fn id(&self) -> String {
        self.peer_id().unwrap_or_else(|| self.local_id.clone())
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.read()
    }

    /// Create the shared directory and build the initial index.
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.shared_directory).await?;
        let result = self.reconcile_once().await?;
        info!(
            "Agent {} indexed {} shared file(s) in {}",
            self.local_id,
            result.added.len(),
            self.config.shared_directory.display()
        );
        Ok(())
    }

    fn registration(&self) -> PeerRegistration {
        PeerRegistration {
            address: self.config.advertise_address.clone(),
            port: self.config.port,
            region: self.config.region.clone(),
            shared_files: self.index.len(),
            reputation: 0,
        }
    }

    /// One registration attempt. Leaves the agent `Registered` or `Unregistered`.
    pub async fn register_once(&self) -> Result<String> {
        *self.state.write() = RegistrationState::Registering;

        match self.client.register_peer(&self.registration()).await {
            Ok(peer_id) => {
                *self.state.write() = RegistrationState::Registered {
                    peer_id: peer_id.clone(),
                };
                Ok(peer_id)
            }
            Err(err) => {
                *self.state.write() = RegistrationState::Unregistered;
                Err(err)
            }
        }
    }

    /// Retry registration on a fixed interval until the directory accepts it,
    /// then advertise every indexed file.
    pub async fn register_until_success(&self) -> String {
        loop {
            match self.register_once().await {
                Ok(peer_id) => {
                    info!(
                        "Registered with directory {} as {}",
                        self.client.base_url(),
                        peer_id
                    );
                    self.register_all_files().await;
                    return peer_id;
                }
                Err(err) => {
                    warn!(
                        "Failed to register with directory, retrying in {:?}: {}",
                        self.config.registration_retry(),
                        err
                    );
                    sleep(self.config.registration_retry()).await;
                }
            }
        }
    }

    async fn register_all_files(&self) {
        let mut files: Vec<SharedFile> = self.index.snapshot().into_values().collect();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        self.announce_serially(&files).await;
    }

    /// Advertise files one at a time with the configured gap between calls.
    async fn announce_serially(&self, files: &[SharedFile]) {
        for (i, file) in files.iter().enumerate() {
            if i > 0 {
                sleep(self.config.register_delay()).await;
            }
            if let Err(err) = self.announce(file).await {
                warn!("Failed to register {} with directory: {}", file.filename, err);
            }
        }
    }

    async fn announce(&self, file: &SharedFile) -> Result<String> {
        let peer_id = self.peer_id().ok_or(AgentError::NotRegistered)?;
        let registration = file.registration(&peer_id, &self.config.advertised_endpoint());
        let file_id = self.client.register_file(&registration).await?;
        debug!("Directory recorded {} as {}", file.filename, file_id);
        Ok(file_id)
    }

    fn announce_in_background(&self, file: &SharedFile) {
        let Some(peer_id) = self.peer_id() else {
            return;
        };
        let registration = file.registration(&peer_id, &self.config.advertised_endpoint());
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.register_file(&registration).await {
                warn!(
                    "Failed to register {} with directory: {}",
                    registration.filename, err
                );
            }
        });
    }

    /// Send one heartbeat. Returns whether the directory acknowledged it.
    pub async fn heartbeat_once(&self) -> bool {
        let Some(peer_id) = self.peer_id() else {
            return false;
        };

        match self.client.heartbeat(&peer_id).await {
            Ok(()) => {
                *self.last_heartbeat.write() = Some(Utc::now());
                true
            }
            Err(err) => {
                warn!("Heartbeat failed: {}", err);
                false
            }
        }
    }

    /// Rescan the shared directory and bring the index in line with it.
    pub async fn reconcile_once(&self) -> Result<Reconciliation> {
        let before = self.index.snapshot();
        let dir = self.config.shared_directory.clone();
        let owner = self.local_id.clone();
        let observed =
            tokio::task::spawn_blocking(move || scanner::scan_directory(&dir, &owner))
                .await
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??;

        let result = self.apply_scan(&before, observed);

        if self.is_registered() {
            let mut pending = result.added.clone();
            pending.extend(result.changed.iter().cloned());
            self.announce_serially(&pending).await;
        }

        Ok(result)
    }

    /// Fold a scan into the index. `before` is the index as it stood when the
    /// walk started; entries shared, unshared or counted since then are left
    /// for the next pass. Only applied changes are reported and broadcast.
    fn apply_scan(
        &self,
        before: &HashMap<String, SharedFile>,
        mut observed: Vec<SharedFile>,
    ) -> Reconciliation {
        {
            let withheld = self.withheld.read();
            if !withheld.is_empty() {
                observed.retain(|file| !withheld.contains(&file.id));
            }
        }

        let mut result = scanner::diff(before, observed);
        result
            .added
            .retain(|file| self.index.insert_if_absent(file.clone()));
        result.changed.retain(|file| {
            before
                .get(&file.id)
                .is_some_and(|prev| self.index.replace_if_unchanged(prev, Some(file.clone())))
        });
        result
            .removed
            .retain(|file| self.index.replace_if_unchanged(file, None));

        for file in &result.added {
            self.hub.broadcast(EventKind::FileAdded, file);
            info!("New file detected: {}", file.filename);
        }
        for file in &result.changed {
            self.hub.broadcast(EventKind::FileAdded, file);
            info!("File changed on disk: {}", file.filename);
        }
        for file in &result.removed {
            self.hub.broadcast(EventKind::FileRemoved, file);
            info!("File removed: {}", file.filename);
        }

        result
    }

    /// Store uploaded bytes in the shared directory and start sharing them.
    pub async fn share(&self, filename: &str, data: &[u8]) -> Result<SharedFile> {
        let filename = validate_filename(filename)?;
        let size = data.len() as u64;
        if size > self.config.max_file_size {
            return Err(AgentError::TooLarge {
                size,
                limit: self.config.max_file_size,
            });
        }

        let _active: ActiveTransfer<'_> = self.index.begin_upload();
        tokio::fs::create_dir_all(&self.config.shared_directory).await?;
        let path = self.config.shared_directory.join(&filename);
        tokio::fs::write(&path, data).await?;

        let file = SharedFile {
            id: derive_shared_file_id(&filename, &self.local_id),
            hash: hash_bytes(data),
            size,
            category: categorize(&filename),
            tags: extract_tags(&filename),
            file_path: path,
            filename,
            shared_at: Utc::now(),
            downloads: 0,
            is_available: true,
        };

        self.withheld.write().remove(&file.id);
        self.index.insert(file.clone());
        self.index.record_upload(size);
        self.hub.broadcast(EventKind::FileShared, &file);
        self.announce_in_background(&file);

        info!("File shared: {} ({} bytes)", file.filename, size);
        Ok(file)
    }

    /// Stop sharing a file, optionally deleting it from disk.
    pub async fn unshare(&self, file_id: &str, delete: bool) -> Result<SharedFile> {
        let file = self
            .index
            .remove(file_id)
            .ok_or_else(|| AgentError::FileNotFound(file_id.to_string()))?;

        if delete {
            match tokio::fs::remove_file(&file.file_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to delete {}: {}", file.file_path.display(), err),
            }
        } else {
            self.withheld.write().insert(file.id.clone());
        }

        self.hub.broadcast(EventKind::FileUnshared, &file);
        info!("File unshared: {}", file.filename);
        Ok(file)
    }

    /// Resolve a download request.
    ///
    /// Fails when the file is unknown, unavailable or gone from disk.
    pub async fn prepare_download(&self, target: DownloadTarget<'_>) -> Result<SharedFile> {
        let file = match target {
            DownloadTarget::Id(id) => self.index.get(id),
            DownloadTarget::Filename(name) => self.index.find_by_filename(name),
        };
        let file = match file {
            Some(file) if file.is_available => file,
            _ => {
                let key = match target {
                    DownloadTarget::Id(key) | DownloadTarget::Filename(key) => key,
                };
                return Err(AgentError::FileNotFound(key.to_string()));
            }
        };

        if !path_exists(&file.file_path).await {
            return Err(AgentError::FileUnavailable(file.filename));
        }
        Ok(file)
    }

    /// Count a download that was served in full.
    pub fn complete_download(&self, file_id: &str) -> Result<SharedFile> {
        self.index
            .record_download(file_id)
            .ok_or_else(|| AgentError::FileNotFound(file_id.to_string()))
    }

    pub fn peer_info(&self) -> PeerInfo {
        let registration = self.state();
        PeerInfo {
            id: self.id(),
            local_id: self.local_id.clone(),
            address: self.config.advertise_address.clone(),
            port: self.config.port,
            is_registered: matches!(registration, RegistrationState::Registered { .. }),
            registration,
            shared_files: self.index.len(),
            last_heartbeat: self.last_heartbeat(),
            download_stats: self.index.download_stats(),
            upload_stats: self.index.upload_stats(),
            config: self.config.clone(),
        }
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            peer_id: self.id(),
            shared_files: self.index.len(),
            download_stats: self.index.download_stats(),
            upload_stats: self.index.upload_stats(),
            is_registered: self.is_registered(),
            last_heartbeat: self.last_heartbeat(),
        }
    }

    /// `peer_info` envelope for a newly connected observer.
    pub fn peer_info_event(&self) -> Option<Event> {
        let payload = serde_json::json!({
            "peer_info": self.peer_info(),
            "shared_files": self.index.list_available(),
        });
        match Event::new(EventKind::PeerInfo, &payload) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!("Failed to build peer_info event: {}", err);
                None
            }
        }
    }

    /// Spawn registration, the heartbeat loop and the reconciliation loop.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let registrar = {
            let agent = Arc::clone(self);
            tokio::spawn(async move {
                agent.register_until_success().await;
            })
        };

        let heartbeat = {
            let agent = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = interval(agent.config.heartbeat_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    agent.heartbeat_once().await;
                }
            })
        };

        let reconciler = {
            let agent = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = interval(agent.config.scan_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(err) = agent.reconcile_once().await {
                        warn!("Reconciliation failed: {}", err);
                    }
                }
            })
        };

        vec![registrar, heartbeat, reconciler]
    }
}

/// Accept a bare file name; anything that could escape the shared directory is rejected.
fn validate_filename(raw: &str) -> Result<String> {
    let name = raw.trim();
    let is_bare = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if name.is_empty()
        || !is_bare
        || name.contains(['/', '\\', '\0'])
        || name == "."
        || name == ".."
    {
        return Err(AgentError::InvalidFilename(raw.to_string()));
    }
    Ok(name.to_string())
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_in(dir: &Path) -> PeerAgent {
        let config = AgentConfig {
            shared_directory: dir.to_path_buf(),
            // nothing listens here; registration is not exercised in these tests
            directory_address: "127.0.0.1:1".into(),
            max_file_size: 16,
            ..AgentConfig::default()
        };
        PeerAgent::new(config, Arc::new(NotificationHub::new(16))).unwrap()
    }

    #[test]
    fn filenames_with_path_components_are_rejected() {
        for bad in ["", "  ", "../etc/passwd", "a/b.txt", "a\\b.txt", "..", "."] {
            assert!(validate_filename(bad).is_err(), "{bad:?} accepted");
        }
        assert_eq!(validate_filename(" notes.txt ").unwrap(), "notes.txt");
    }

    #[tokio::test]
    async fn share_writes_indexes_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(dir.path());
        let mut sub = agent.hub().subscribe(None);

        let file = agent.share("hello.txt", b"hi there").await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("hello.txt")).unwrap(), b"hi there");
        assert_eq!(file.hash, hash_bytes(b"hi there"));
        assert_eq!(agent.index().get(&file.id).unwrap(), file);
        assert_eq!(agent.index().upload_stats().total_uploads, 1);
        assert_eq!(agent.index().upload_stats().active_uploads, 0);

        let event: serde_json::Value =
            serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "file_shared");

        // a rescan sees the same file under the same id
        assert!(agent.reconcile_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_share_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(dir.path());
        let err = agent.share("big.bin", &[0u8; 17]).await.unwrap_err();
        assert!(matches!(err, AgentError::TooLarge { size: 17, limit: 16 }));
        assert!(!dir.path().join("big.bin").exists());
        assert!(agent.index().is_empty());
    }

    #[tokio::test]
    async fn unshare_without_delete_survives_rescan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"data").unwrap();
        let agent = agent_in(dir.path());
        agent.initialize().await.unwrap();
        let id = derive_shared_file_id("keep.txt", agent.local_id());

        agent.unshare(&id, false).await.unwrap();
        assert!(dir.path().join("keep.txt").exists());
        assert!(agent.reconcile_once().await.unwrap().is_empty());
        assert!(agent.index().get(&id).is_none());

        assert!(matches!(
            agent.unshare(&id, false).await,
            Err(AgentError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unshare_with_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(dir.path());
        let file = agent.share("gone.txt", b"x").await.unwrap();

        let removed = agent.unshare(&file.id, true).await.unwrap();
        assert_eq!(removed.id, file.id);
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn download_checks_disk_and_counts_when_completed() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(dir.path());
        let file = agent.share("song.mp3", b"la la").await.unwrap();

        let served = agent
            .prepare_download(DownloadTarget::Filename("song.mp3"))
            .await
            .unwrap();
        assert_eq!(served.id, file.id);
        assert_eq!(agent.index().download_stats().total_downloads, 0);

        let counted = agent.complete_download(&served.id).unwrap();
        assert_eq!(counted.downloads, 1);
        assert_eq!(agent.index().download_stats().total_bytes, 5);

        std::fs::remove_file(dir.path().join("song.mp3")).unwrap();
        let err = agent
            .prepare_download(DownloadTarget::Id(&file.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::FileUnavailable(_)));
        assert_eq!(agent.index().download_stats().total_downloads, 1);

        assert!(matches!(
            agent.prepare_download(DownloadTarget::Id("nope")).await,
            Err(AgentError::FileNotFound(_))
        ));
        assert!(matches!(
            agent.complete_download("nope"),
            Err(AgentError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_shared_during_a_scan_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_big.bin"), b"bulk").unwrap();
        let agent = agent_in(dir.path());
        agent.initialize().await.unwrap();

        // the walk has finished but its result is not applied yet
        let before = agent.index().snapshot();
        let observed = scanner::scan_directory(dir.path(), agent.local_id()).unwrap();
        let shared = agent.share("z_new.txt", b"hello").await.unwrap();

        let mut sub = agent.hub().subscribe(None);
        let result = agent.apply_scan(&before, observed);

        assert!(result.is_empty());
        assert_eq!(agent.index().get(&shared.id).unwrap(), shared);
        assert_eq!(agent.index().len(), 2);
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn file_shared_while_walked_is_not_added_twice() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(dir.path());
        agent.initialize().await.unwrap();

        let before = agent.index().snapshot();
        std::fs::write(dir.path().join("late.txt"), b"late").unwrap();
        let observed = scanner::scan_directory(dir.path(), agent.local_id()).unwrap();
        let shared = agent.share("late.txt", b"late").await.unwrap();

        let mut sub = agent.hub().subscribe(None);
        let result = agent.apply_scan(&before, observed);

        assert!(result.added.is_empty());
        assert_eq!(agent.index().get(&shared.id).unwrap(), shared);
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unshare_during_a_scan_is_not_undone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"v1").unwrap();
        let agent = agent_in(dir.path());
        agent.initialize().await.unwrap();
        let id = derive_shared_file_id("keep.txt", agent.local_id());

        std::fs::write(dir.path().join("keep.txt"), b"version two").unwrap();
        let before = agent.index().snapshot();
        let observed = scanner::scan_directory(dir.path(), agent.local_id()).unwrap();
        agent.unshare(&id, false).await.unwrap();

        let mut sub = agent.hub().subscribe(None);
        let result = agent.apply_scan(&before, observed);

        assert!(result.is_empty());
        assert!(agent.index().get(&id).is_none());
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn entry_counted_during_a_scan_is_left_for_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gone.txt"), b"x").unwrap();
        let agent = agent_in(dir.path());
        agent.initialize().await.unwrap();
        let id = derive_shared_file_id("gone.txt", agent.local_id());

        let before = agent.index().snapshot();
        std::fs::remove_file(dir.path().join("gone.txt")).unwrap();
        let observed = scanner::scan_directory(dir.path(), agent.local_id()).unwrap();
        agent.complete_download(&id).unwrap();

        assert!(agent.apply_scan(&before, observed).is_empty());
        assert!(agent.index().get(&id).is_some());

        // the following pass sees a settled index and drops it
        let result = agent.reconcile_once().await.unwrap();
        assert_eq!(result.removed.len(), 1);
        assert!(agent.index().get(&id).is_none());
    }

    #[tokio::test]
    async fn heartbeat_is_a_no_op_while_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(dir.path());
        assert!(!agent.heartbeat_once().await);
        assert_eq!(agent.state(), RegistrationState::Unregistered);
        assert!(agent.last_heartbeat().is_none());
        assert_eq!(agent.id(), agent.local_id());
    }
}
