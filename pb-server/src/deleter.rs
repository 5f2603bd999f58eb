use pb_core::config::BackendConfig;
use pb_core::errors::*;
use pb_core::k8s::{
    ClusterClient,
    ManagedPod,
    User,
    deleted,
    watch_for,
};
use pb_core::prelude::*;
use pb_core::signal::ReadySignal;
use tracing::*;

err_impl! {DeleterError,
    #[error("no such pod: {0}")]
    PodNotFound(String),

    #[error("pod not owned by the requesting user: {0}")]
    NotPodOwner(String),
}

/// Tears down one pod on behalf of its owner.  Construction performs the
/// ownership check; anyone else's pod name fails before any cluster
/// mutation happens.
pub struct PodDeleter {
    pod: ManagedPod,
    client: ClusterClient,
    config: BackendConfig,
}

impl PodDeleter {
    pub async fn new(
        pod_name: &str,
        user_id: &str,
        client: ClusterClient,
        config: BackendConfig,
    ) -> anyhow::Result<PodDeleter> {
        let user = User::new(user_id)?;
        let Some(pod) = client.pods().get_opt(pod_name).await? else {
            bail!(DeleterError::pod_not_found(pod_name));
        };
        if !user.owns(&pod) {
            bail!(DeleterError::not_pod_owner(pod_name));
        }

        Ok(PodDeleter {
            pod: ManagedPod::new(pod, user),
            client,
            config,
        })
    }

    pub fn user(&self) -> &User {
        self.pod.user()
    }

    pub fn pod_name(&self) -> String {
        self.pod.name()
    }

    /// Issue the delete call; the delete jobs run in the background once
    /// the pod is observed gone and resolve `ready`.  On a failed delete
    /// call `ready` is left untouched for the caller to time out.
    pub async fn delete_pod(&self, ready: ReadySignal) -> EmptyResult {
        let name = self.pod.name();

        // Watch first so the delete event cannot arrive before we listen
        let pod_gone = ReadySignal::with_timeout(self.config.timeout_delete);
        watch_for(self.client.pods(), &name, deleted, pod_gone.clone());

        self.client.pods().delete(&name, &Default::default()).await?;
        info!("deleting pod {name} for user {}", self.user().id());

        tokio::spawn(self.pod.clone().run_delete_jobs_when_ready(
            self.client.clone(),
            self.config.clone(),
            pod_gone,
            ready,
        ));
        Ok(())
    }
}
