use std::fmt::Debug;

use futures::TryStreamExt;
use kube::api::{
    AttachParams,
    ListParams,
};
use kube::runtime::watcher::{
    Config as WatchConfig,
    Event,
    watcher,
};
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tracing::*;

use crate::errors::*;
use crate::prelude::*;
use crate::signal::ReadySignal;

/// Thin typed adapter around the cluster API.  Everything the service
/// touches lives either in the configured namespace or (for persistent
/// volumes) at cluster scope; the adapter hands out the right `Api` handle
/// for each kind so callers never re-derive scoping.
#[derive(Clone)]
pub struct ClusterClient {
    client: kube::Client,
    namespace: String,
}

impl Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient").field("namespace", &self.namespace).finish_non_exhaustive()
    }
}

impl ClusterClient {
    pub fn new(client: kube::Client, namespace: &str) -> ClusterClient {
        ClusterClient { client, namespace: namespace.into() }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pods(&self) -> kube::Api<corev1::Pod> {
        kube::Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn persistent_volumes(&self) -> kube::Api<corev1::PersistentVolume> {
        kube::Api::all(self.client.clone())
    }

    pub fn persistent_volume_claims(&self) -> kube::Api<corev1::PersistentVolumeClaim> {
        kube::Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn services(&self) -> kube::Api<corev1::Service> {
        kube::Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn ingresses(&self) -> kube::Api<netv1::Ingress> {
        kube::Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub async fn list_pods(&self, label_selector: &str) -> anyhow::Result<Vec<corev1::Pod>> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.pods().list(&lp).await?.items)
    }

    /// Run a command in one container of a pod and collect both output
    /// streams.  Blocks until the command exits.
    pub async fn exec_in_pod(
        &self,
        pod_name: &str,
        container: &str,
        argv: &[&str],
    ) -> anyhow::Result<(String, String)> {
        let ap = AttachParams::default().container(container).stdout(true).stderr(true);
        let mut proc = self.pods().exec(pod_name, argv.to_vec(), &ap).await?;

        let mut stdout = String::new();
        if let Some(mut out) = proc.stdout() {
            out.read_to_string(&mut stdout).await?;
        }
        let mut stderr = String::new();
        if let Some(mut err) = proc.stderr() {
            err.read_to_string(&mut stderr).await?;
        }
        proc.join().await?;

        Ok((stdout, stderr))
    }
}

/// Watch a single named resource and resolve `signal` to `true` on the
/// first event matching `predicate`.  The watch races the signal itself,
/// so it is torn down as soon as the signal resolves by any path (a
/// positive event here, a producer elsewhere, or the signal's own
/// timeout); watchers are never leaked.
pub fn watch_for<K>(
    api: kube::Api<K>,
    name: &str,
    predicate: impl Fn(&Event<K>) -> bool + Send + Sync + 'static,
    signal: ReadySignal,
) where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let watch_config = WatchConfig::default().fields(&format!("metadata.name={name}"));
    let name = name.to_string();
    let done = signal.clone();

    tokio::spawn(async move {
        let events = watcher(api, watch_config);
        tokio::pin!(events);

        let matched = async {
            while let Some(evt) = events.try_next().await? {
                if predicate(&evt) {
                    return anyhow::Ok(true);
                }
            }
            Ok(false)
        };

        tokio::select! {
            res = matched => match res {
                Ok(true) => signal.set(true),
                Ok(false) => debug!("watch stream for {name} ended without a match"),
                Err(err) => warn!("watch for {name} failed: {err}"),
            },
            _ = done.wait() => (),
        }
    });
}

pub async fn delete_ignore_missing<K>(api: &kube::Api<K>, name: &str) -> EmptyResult
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub fn pod_ready(evt: &Event<corev1::Pod>) -> bool {
    let Event::Apply(pod) = evt else {
        return false;
    };
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

pub fn pv_available(evt: &Event<corev1::PersistentVolume>) -> bool {
    let Event::Apply(pv) = evt else {
        return false;
    };
    pv.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Available")
}

pub fn pvc_bound(evt: &Event<corev1::PersistentVolumeClaim>) -> bool {
    let Event::Apply(pvc) = evt else {
        return false;
    };
    pvc.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Bound")
}

pub fn deleted<K>(evt: &Event<K>) -> bool {
    matches!(evt, Event::Delete(_))
}
