use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use lazy_static::lazy_static;
use regex::Regex;

use super::*;
use crate::config::BackendConfig;
use crate::prelude::*;
use crate::signal::{
    ReadySignal,
    combine,
};

lazy_static! {
    static ref USER_ID_RE: Regex = Regex::new(r"^[a-z0-9.\-]+(@[a-z0-9.\-]+)?$").unwrap();
}

const STORAGE_CAPACITY: &str = "10Gi";
const READ_WRITE_MANY: &str = "ReadWriteMany";

/// The identity a silo acts on behalf of.  Everything the service creates
/// for a user is labelled with the `name`/`domain` pair so ownership can
/// always be re-derived from cluster state alone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct User {
    id: String,
    name: String,
    domain: String,
}

impl User {
    pub fn new(user_id: &str) -> anyhow::Result<User> {
        if !USER_ID_RE.is_match(user_id) {
            bail!(KubernetesError::invalid_user_id(user_id));
        }
        let (name, domain) = match user_id.split_once('@') {
            Some((name, domain)) => (name, domain),
            None => (user_id, ""),
        };
        Ok(User {
            id: user_id.into(),
            name: name.into(),
            domain: domain.into(),
        })
    }

    pub fn from_pod_labels(pod: &corev1::Pod) -> anyhow::Result<User> {
        User::from_labels(pod.labels()).map_err(|_| KubernetesError::unowned_pod(&pod.name_any()))
    }

    /// Reconstruct the owner from the `user`/`domain` labels this service
    /// stamps on everything it creates.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> anyhow::Result<User> {
        let Some(name) = labels.get(USER_LABEL_KEY) else {
            bail!(KubernetesError::field_not_found(USER_LABEL_KEY));
        };
        match labels.get(DOMAIN_LABEL_KEY) {
            Some(domain) if !domain.is_empty() => User::new(&format!("{name}@{domain}")),
            _ => User::new(name),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn slug(&self) -> String {
        self.id.replace(['@', '.'], "-")
    }

    pub fn storage_name(&self) -> String {
        format!("{USER_STORAGE_PREFIX}-{}", self.slug())
    }

    // An empty domain is matched exactly; `domain=` only selects pods with
    // an empty (or absent) domain label, never someone else's.
    pub fn label_selector(&self) -> String {
        format!("{USER_LABEL_KEY}={},{DOMAIN_LABEL_KEY}={}", self.name, self.domain)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (USER_LABEL_KEY.into(), self.name.clone()),
            (DOMAIN_LABEL_KEY.into(), self.domain.clone()),
        ])
    }

    pub fn owns(&self, pod: &corev1::Pod) -> bool {
        let labels = pod.labels();
        let empty = String::new();
        labels.get(USER_LABEL_KEY) == Some(&self.name)
            && *labels.get(DOMAIN_LABEL_KEY).unwrap_or(&empty) == self.domain
    }

    pub async fn list_pods(&self, client: &ClusterClient) -> anyhow::Result<Vec<corev1::Pod>> {
        client.list_pods(&self.label_selector()).await
    }

    pub fn build_storage_volume(&self, silo_ip: &str, config: &BackendConfig) -> corev1::PersistentVolume {
        corev1::PersistentVolume {
            metadata: metav1::ObjectMeta {
                name: Some(self.storage_name()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeSpec {
                capacity: Some(BTreeMap::from([("storage".to_string(), Quantity(STORAGE_CAPACITY.into()))])),
                access_modes: Some(vec![READ_WRITE_MANY.into()]),
                persistent_volume_reclaim_policy: Some("Retain".into()),
                nfs: Some(corev1::NFSVolumeSource {
                    server: silo_ip.into(),
                    path: format!("{}/{}", config.nfs_storage_root, self.id),
                    read_only: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn build_storage_claim(&self) -> corev1::PersistentVolumeClaim {
        corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some(self.storage_name()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec![READ_WRITE_MANY.into()]),
                resources: Some(corev1::VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), Quantity(STORAGE_CAPACITY.into()))])),
                    ..Default::default()
                }),
                volume_name: Some(self.storage_name()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Create the user's PV and PVC if either is missing, watch each
    /// created resource until it is usable, and combine the watchers into
    /// `ready`.  With both already present, `ready` resolves true
    /// immediately.
    pub async fn create_storage_if_absent(
        &self,
        client: &ClusterClient,
        ready: ReadySignal,
        silo_ip: &str,
        config: &BackendConfig,
    ) -> EmptyResult {
        let name = self.storage_name();
        let mut pending = vec![];

        if client.persistent_volumes().get_opt(&name).await?.is_none() {
            let pv_ready = ReadySignal::with_timeout(config.timeout_create);
            watch_for(client.persistent_volumes(), &name, pv_available, pv_ready.clone());
            client
                .persistent_volumes()
                .create(&Default::default(), &self.build_storage_volume(silo_ip, config))
                .await?;
            pending.push(pv_ready);
        }

        if client.persistent_volume_claims().get_opt(&name).await?.is_none() {
            let pvc_ready = ReadySignal::with_timeout(config.timeout_create);
            watch_for(client.persistent_volume_claims(), &name, pvc_bound, pvc_ready.clone());
            client
                .persistent_volume_claims()
                .create(&Default::default(), &self.build_storage_claim())
                .await?;
            pending.push(pvc_ready);
        }

        combine(pending, ready);
        Ok(())
    }

    /// Delete the user's PVC and PV, combining the deletion watchers into
    /// `ready`.
    pub async fn clean_storage(
        &self,
        client: &ClusterClient,
        ready: ReadySignal,
        config: &BackendConfig,
    ) -> EmptyResult {
        let name = self.storage_name();
        let mut pending = vec![];

        if client.persistent_volume_claims().get_opt(&name).await?.is_some() {
            let pvc_gone = ReadySignal::with_timeout(config.timeout_delete);
            watch_for(client.persistent_volume_claims(), &name, deleted, pvc_gone.clone());
            delete_ignore_missing(&client.persistent_volume_claims(), &name).await?;
            pending.push(pvc_gone);
        }

        if client.persistent_volumes().get_opt(&name).await?.is_some() {
            let pv_gone = ReadySignal::with_timeout(config.timeout_delete);
            watch_for(client.persistent_volumes(), &name, deleted, pv_gone.clone());
            delete_ignore_missing(&client.persistent_volumes(), &name).await?;
            pending.push(pv_gone);
        }

        combine(pending, ready);
        Ok(())
    }
}
