use std::collections::{
    HashMap,
    HashSet,
};
use std::fs;
use std::sync::{
    Arc,
    Mutex,
};

use kube::api::ListParams;
use pb_api::v1::PodInfo;
use pb_core::cache::PodCache;
use pb_core::config::BackendConfig;
use pb_core::errors::*;
use pb_core::k8s::{
    ClusterClient,
    ManagedPod,
    User,
    delete_ignore_missing,
    deleted,
    watch_for,
};
use pb_core::prelude::*;
use pb_core::signal::{
    ReadySignal,
    combine,
};
use tracing::*;

use crate::creator::PodCreator;
use crate::deleter::PodDeleter;

const CREATING_STATUS: &str = "Creating";
const DELETING_STATUS: &str = "Deleting";

err_impl! {ServiceError,
    #[error("pod is already being deleted: {0}")]
    AlreadyDeleting(String),
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Index {
    Creating,
    Deleting,
    DeletingStorage,
}

/// The in-flight watch indices.  Entries are inserted when a lifecycle is
/// admitted and removed exactly once by a drainer task subscribed to the
/// same signal; watch requests arriving in between re-attach to the
/// parked signal.
#[derive(Default)]
struct WatchIndices {
    creating: HashMap<String, ReadySignal>,
    deleting: HashMap<String, ReadySignal>,
    deleting_storage: HashMap<String, ReadySignal>,
}

impl WatchIndices {
    fn map_mut(&mut self, which: Index) -> &mut HashMap<String, ReadySignal> {
        match which {
            Index::Creating => &mut self.creating,
            Index::Deleting => &mut self.deleting,
            Index::DeletingStorage => &mut self.deleting_storage,
        }
    }
}

/// The front-end service: validates silo requests, drives the creator and
/// deleter, serves the read-only query path, and runs the reconciliation
/// sweep.  It owns no cluster state; everything except the watch indices
/// and the cache directory is re-derived from the cluster on demand.
/// Cheap to clone; all clones share the same indices.
#[derive(Clone)]
pub struct FrontendService(Arc<Inner>);

struct Inner {
    client: ClusterClient,
    config: BackendConfig,
    watches: Mutex<WatchIndices>,
}

impl FrontendService {
    pub fn new(client: ClusterClient, config: BackendConfig) -> FrontendService {
        FrontendService(Arc::new(Inner {
            client,
            config,
            watches: Mutex::new(WatchIndices::default()),
        }))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.0.config
    }

    // Insert an entry and spawn its drainer; the entry outlives the
    // signal by exactly the drainer's wakeup.
    pub(crate) fn park(&self, which: Index, key: &str, signal: ReadySignal) {
        self.0.watches.lock().unwrap().map_mut(which).insert(key.into(), signal.clone());

        let service = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            signal.wait().await;
            service.0.watches.lock().unwrap().map_mut(which).remove(&key);
        });
    }

    pub async fn get_pods(&self, user_id: &str) -> anyhow::Result<Vec<PodInfo>> {
        let user = User::new(user_id)?;
        let mut infos: Vec<PodInfo> = user
            .list_pods(&self.0.client)
            .await?
            .into_iter()
            .filter_map(|pod| ManagedPod::from_pod(pod).ok())
            .map(|mp| mp.pod_info(&self.0.config))
            .collect();

        let watches = self.0.watches.lock().unwrap();
        for info in &mut infos {
            if watches.creating.contains_key(&info.pod_name) {
                info.status = CREATING_STATUS.into();
            } else if watches.deleting.contains_key(&info.pod_name) {
                info.status = DELETING_STATUS.into();
            }
        }

        Ok(infos)
    }

    /// Admit a create: build the target pod, issue the create, park the
    /// outcome under the new pod's name, and return that name
    /// immediately.  The lifecycle continues in the background and is
    /// observable through `watch_create_pod`.
    pub async fn create_pod(
        &self,
        yaml_url: &str,
        user_id: &str,
        silo_ip: &str,
        settings: &HashMap<String, HashMap<String, String>>,
    ) -> anyhow::Result<String> {
        let creator =
            PodCreator::new(yaml_url, user_id, silo_ip, settings, self.0.client.clone(), self.0.config.clone()).await?;

        let finished = ReadySignal::with_timeout(self.0.config.timeout_create);
        let managed = creator.create_pod(finished.clone()).await?;

        let name = managed.name();
        self.park(Index::Creating, &name, finished);
        Ok(name)
    }

    /// Report whether a create became ready.  The default is `false`: an
    /// unknown or foreign pod name gets the same answer as a failed
    /// create, so this endpoint cannot confirm the existence of someone
    /// else's pods.
    pub async fn watch_create_pod(&self, user_id: &str, pod_name: &str) -> anyhow::Result<bool> {
        let user = User::new(user_id)?;

        let parked = self.0.watches.lock().unwrap().creating.get(pod_name).cloned();
        if let Some(signal) = parked
            && !signal.wait().await
        {
            return Ok(false);
        }

        // Either the create succeeded or the entry is long gone (e.g. a
        // process restart dropped it): answer from current cluster state
        let Some(pod) = self.0.client.pods().get_opt(pod_name).await? else {
            return Ok(false);
        };
        Ok(user.owns(&pod))
    }

    /// Admit a delete.  After a successful delete call, if this was the
    /// user's last live pod, their storage cleanup is started as well.
    pub async fn delete_pod(&self, user_id: &str, pod_name: &str) -> EmptyResult {
        let finished = ReadySignal::with_timeout(self.0.config.timeout_delete);
        if self.0.watches.lock().unwrap().deleting.contains_key(pod_name) {
            finished.set(false);
            bail!(ServiceError::already_deleting(pod_name));
        }

        let deleter = PodDeleter::new(pod_name, user_id, self.0.client.clone(), self.0.config.clone()).await?;
        deleter.delete_pod(finished.clone()).await?;
        self.park(Index::Deleting, pod_name, finished);

        self.maybe_clean_storage(deleter.user()).await;
        Ok(())
    }

    // Storage cleanup is best-effort: a failure here leaves the PV/PVC
    // for the next reconciliation sweep.
    async fn maybe_clean_storage(&self, user: &User) -> Option<ReadySignal> {
        let pods = match user.list_pods(&self.0.client).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!("could not list pods of {}, skipping storage cleanup: {err}", user.id());
                return None;
            },
        };

        {
            let watches = self.0.watches.lock().unwrap();
            if watches.deleting_storage.contains_key(user.id()) {
                return watches.deleting_storage.get(user.id()).cloned();
            }
            if pods.iter().any(|p| !watches.deleting.contains_key(&p.name_any())) {
                return None;
            }
        }

        let storage_gone = ReadySignal::with_timeout(self.0.config.timeout_delete);
        match user.clean_storage(&self.0.client, storage_gone.clone(), &self.0.config).await {
            Ok(()) => {
                self.park(Index::DeletingStorage, user.id(), storage_gone.clone());
                Some(storage_gone)
            },
            Err(err) => {
                warn!("could not clean storage of {}: {err}", user.id());
                None
            },
        }
    }

    /// Report whether a delete finished.  The default is `true`: an
    /// unknown pod is indistinguishable from one that is already gone.
    pub async fn watch_delete_pod(&self, user_id: &str, pod_name: &str) -> anyhow::Result<bool> {
        User::new(user_id)?;

        let parked = self.0.watches.lock().unwrap().deleting.get(pod_name).cloned();
        match parked {
            Some(signal) => Ok(signal.wait().await),
            None => Ok(true),
        }
    }

    /// Delete every pod the user owns (skipping ones already deleting),
    /// clean their storage, and combine all the outcomes into `finished`.
    pub async fn delete_all_user_pods(
        &self,
        user_id: &str,
        finished: ReadySignal,
    ) -> EmptyResult {
        let user = User::new(user_id)?;
        let mut pending = vec![];

        for pod in user.list_pods(&self.0.client).await? {
            let name = pod.name_any();
            if self.0.watches.lock().unwrap().deleting.contains_key(&name) {
                continue;
            }

            let deleter = PodDeleter::new(&name, user_id, self.0.client.clone(), self.0.config.clone()).await?;
            let pod_finished = ReadySignal::with_timeout(self.0.config.timeout_delete);
            deleter.delete_pod(pod_finished.clone()).await?;
            self.park(Index::Deleting, &name, pod_finished.clone());
            pending.push(pod_finished);
        }

        if let Some(storage_finished) = self.maybe_clean_storage(&user).await {
            pending.push(storage_finished);
        }

        combine(pending, finished);
        Ok(())
    }

    /// The reconciliation sweep: delete user storage with no owning pods,
    /// child services whose pod is gone, and cache files for pods that no
    /// longer exist.  Combines every deletion watcher into `finished`.
    /// Idempotent; a second run right after finds nothing to do.
    pub async fn clean_all_unused(&self, finished: ReadySignal) -> EmptyResult {
        let pods = self.0.client.pods().list(&Default::default()).await?.items;
        let live_pods: HashSet<String> = pods.iter().map(|p| p.name_any()).collect();
        let live_owners: HashSet<String> = pods
            .iter()
            .filter_map(|p| User::from_pod_labels(p).ok())
            .map(|u| u.id().to_string())
            .collect();

        let mut pending = vec![];

        for user in self.orphaned_storage_owners(&live_owners).await? {
            info!("cleaning unused storage of {}", user.id());
            let storage_gone = ReadySignal::with_timeout(self.0.config.timeout_delete);
            match user.clean_storage(&self.0.client, storage_gone.clone(), &self.0.config).await {
                Ok(()) => {
                    self.park(Index::DeletingStorage, user.id(), storage_gone.clone());
                    pending.push(storage_gone);
                },
                Err(err) => warn!("could not clean storage of {}: {err}", user.id()),
            }
        }

        let labelled = ListParams::default().labels(CREATED_FOR_POD_LABEL_KEY);
        for svc in self.0.client.services().list(&labelled).await?.items {
            let Some(target) = svc.labels().get(CREATED_FOR_POD_LABEL_KEY) else {
                continue;
            };
            if live_pods.contains(target) {
                continue;
            }

            info!("deleting orphaned service {}", svc.name_any());
            let svc_gone = ReadySignal::with_timeout(self.0.config.timeout_delete);
            watch_for(self.0.client.services(), &svc.name_any(), deleted, svc_gone.clone());
            match delete_ignore_missing(&self.0.client.services(), &svc.name_any()).await {
                Ok(()) => pending.push(svc_gone),
                Err(err) => warn!("could not delete service {}: {err}", svc.name_any()),
            }
        }

        for ing in self.0.client.ingresses().list(&labelled).await?.items {
            let Some(target) = ing.labels().get(CREATED_FOR_POD_LABEL_KEY) else {
                continue;
            };
            if !live_pods.contains(target)
                && let Err(err) = delete_ignore_missing(&self.0.client.ingresses(), &ing.name_any()).await
            {
                warn!("could not delete ingress {}: {err}", ing.name_any());
            }
        }

        self.remove_stale_cache_files(&live_pods);

        combine(pending, finished);
        Ok(())
    }

    // Storage is orphaned when its owner labels point at a user with no
    // pods left; unlabelled PVs/PVCs are not ours and are left alone.
    async fn orphaned_storage_owners(&self, live_owners: &HashSet<String>) -> anyhow::Result<Vec<User>> {
        let labelled = ListParams::default().labels(USER_LABEL_KEY);
        let pvs = self.0.client.persistent_volumes().list(&labelled).await?.items;
        let pvcs = self.0.client.persistent_volume_claims().list(&labelled).await?.items;

        let mut orphans: HashMap<String, User> = HashMap::new();
        for labels in pvs.iter().map(|pv| pv.labels()).chain(pvcs.iter().map(|pvc| pvc.labels())) {
            let Ok(user) = User::from_labels(labels) else {
                continue;
            };
            if !live_owners.contains(user.id()) {
                orphans.entry(user.id().to_string()).or_insert(user);
            }
        }

        let already_cleaning = self.0.watches.lock().unwrap();
        Ok(orphans
            .into_values()
            .filter(|u| !already_cleaning.deleting_storage.contains_key(u.id()))
            .collect())
    }

    fn remove_stale_cache_files(&self, live_pods: &HashSet<String>) {
        let entries = match fs::read_dir(&self.0.config.pod_cache_dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("could not read cache dir {}: {err}", self.0.config.pod_cache_dir);
                return;
            },
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if live_pods.contains(&name) {
                continue;
            }

            info!("removing stale cache file {name}");
            if let Err(err) = PodCache::remove(&self.0.config.pod_cache_dir, &name) {
                warn!("could not remove cache file {name}: {err}");
            }
        }
    }

    /// Rebuild missing cache files for live pods, invoked once at process
    /// start.  Pods with a cache file are skipped, so rerunning this is
    /// free.
    pub async fn reload_pod_caches(&self) -> EmptyResult {
        for pod in self.0.client.pods().list(&Default::default()).await?.items {
            let name = pod.name_any();
            if PodCache::exists(&self.0.config.pod_cache_dir, &name) {
                continue;
            }

            let managed = match ManagedPod::from_pod(pod) {
                Ok(managed) => managed,
                Err(err) => {
                    debug!("skipping cache reload for {name}: {err}");
                    continue;
                },
            };

            info!("rebuilding pod cache for {name}");
            if let Err(err) = managed.run_start_jobs(&self.0.client, &self.0.config).await {
                warn!("could not rebuild cache for {name}: {err:#}");
            }
        }
        Ok(())
    }
}
