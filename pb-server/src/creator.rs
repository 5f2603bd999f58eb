use std::collections::{
    HashMap,
    HashSet,
};

use pb_core::config::BackendConfig;
use pb_core::errors::*;
use pb_core::k8s::{
    ClusterClient,
    ManagedPod,
    User,
    pod_ready,
    watch_for,
};
use pb_core::net::data_net;
use pb_core::prelude::*;
use pb_core::signal::ReadySignal;
use regex::Regex;
use tracing::*;

// The volume names a manifest may reference without declaring; anything
// else is a hard error
const USER_STORAGE_VOLUME: &str = "sciencedata";
const LOCAL_VOLUME: &str = "local";

const NAME_ATTEMPTS: u32 = 10;

err_impl! {CreatorError,
    #[error("manifest url not allowed: {0}")]
    ManifestNotAllowed(String),

    #[error("could not fetch manifest: {0}")]
    ManifestFetchFailed(String),

    #[error("manifest has no name: {0}")]
    UnnamedManifest(String),

    #[error("no free pod name under: {0}")]
    NoFreePodName(String),

    #[error("no volume or claim known for mount: {0}")]
    UnknownVolumeMount(String),
}

/// Builds the target pod for one admitted create request: fetches the
/// whitelisted manifest, rewrites it for the requesting user, and issues
/// the create with its readiness plumbing attached.
#[derive(Debug)]
pub struct PodCreator {
    user: User,
    silo_ip: String,
    target: corev1::Pod,
    client: ClusterClient,
    config: BackendConfig,
}

impl PodCreator {
    pub async fn new(
        yaml_url: &str,
        user_id: &str,
        silo_ip: &str,
        settings: &HashMap<String, HashMap<String, String>>,
        client: ClusterClient,
        config: BackendConfig,
    ) -> anyhow::Result<PodCreator> {
        let user = User::new(user_id)?;

        let whitelist = Regex::new(&config.whitelist_manifest_regex)?;
        if !whitelist.is_match(yaml_url) {
            bail!(CreatorError::manifest_not_allowed(yaml_url));
        }

        let response = reqwest::get(yaml_url).await?;
        if !response.status().is_success() {
            bail!(CreatorError::manifest_fetch_failed(&format!("{yaml_url}: {}", response.status())));
        }
        let mut target: corev1::Pod = serde_yaml::from_str(&response.text().await?)?;

        apply_request_settings(&mut target, settings);
        apply_mandatory_settings(&mut target, &data_net(silo_ip), user.id(), &config);
        apply_registry_rewrite(&mut target, &config);

        let taken: HashSet<String> = user.list_pods(&client).await?.iter().map(|p| p.name_any()).collect();
        assign_unique_name(&mut target, &user, &taken)?;
        complete_volumes(&mut target, &user)?;

        Ok(PodCreator {
            user,
            silo_ip: silo_ip.into(),
            target,
            client,
            config,
        })
    }

    pub fn pod_name(&self) -> String {
        self.target.name_any()
    }

    #[cfg(test)]
    pub(crate) fn target(&self) -> &corev1::Pod {
        &self.target
    }

    fn uses_user_storage(&self) -> bool {
        self.target
            .spec
            .as_ref()
            .and_then(|s| s.volumes.as_ref())
            .is_some_and(|vols| vols.iter().any(|v| v.name == USER_STORAGE_VOLUME))
    }

    /// Issue the create call and wire up the readiness plumbing: the
    /// storage and pod watchers feed the start jobs, which resolve
    /// `ready`.  Returns as soon as the create call is accepted; the rest
    /// of the lifecycle runs in the background.
    pub async fn create_pod(&self, ready: ReadySignal) -> anyhow::Result<ManagedPod> {
        let storage_ready = ReadySignal::with_timeout(self.config.timeout_create);
        if self.uses_user_storage() {
            self.user
                .create_storage_if_absent(&self.client, storage_ready.clone(), &self.silo_ip, &self.config)
                .await?;
        } else {
            storage_ready.set(true);
        }

        // The watcher must be in place before the create call so the
        // ready event cannot slip through between the two
        let name = self.pod_name();
        let pod_up = ReadySignal::with_timeout(self.config.timeout_create);
        watch_for(self.client.pods(), &name, pod_ready, pod_up.clone());

        let pod = self.client.pods().create(&Default::default(), &self.target).await?;
        info!("created pod {name} for user {}", self.user.id());

        let managed = ManagedPod::new(pod, self.user.clone());
        tokio::spawn(managed.clone().run_start_jobs_when_ready(
            self.client.clone(),
            self.config.clone(),
            vec![storage_ready, pod_up],
            ready,
        ));

        Ok(managed)
    }
}

// Request settings may only overwrite env entries the manifest already
// declares; unknown names are dropped so a silo can't smuggle new
// variables into a container.
pub(crate) fn apply_request_settings(pod: &mut corev1::Pod, settings: &HashMap<String, HashMap<String, String>>) {
    let Some(spec) = pod.spec.as_mut() else {
        return;
    };

    for container in &mut spec.containers {
        let Some(overrides) = settings.get(&container.name) else {
            continue;
        };
        for env in container.env.get_or_insert_default() {
            if let Some(value) = overrides.get(&env.name) {
                env.value = Some(value.clone());
                env.value_from = None;
            }
        }
    }
}

pub(crate) fn apply_mandatory_settings(pod: &mut corev1::Pod, home_server: &str, user_id: &str, config: &BackendConfig) {
    let Some(spec) = pod.spec.as_mut() else {
        return;
    };

    if spec.restart_policy.is_none() {
        spec.restart_policy = Some(config.default_restart_policy.clone());
    }

    for container in &mut spec.containers {
        upsert_env(container, HOME_SERVER_ENV_VAR, home_server);
        upsert_env(container, SD_UID_ENV_VAR, user_id);
    }
}

fn upsert_env(container: &mut corev1::Container, name: &str, value: &str) {
    let env = container.env.get_or_insert_default();
    match env.iter_mut().find(|e| e.name == name) {
        Some(entry) => {
            entry.value = Some(value.into());
            entry.value_from = None;
        },
        None => env.push(corev1::EnvVar {
            name: name.into(),
            value: Some(value.into()),
            ..Default::default()
        }),
    }
}

pub(crate) fn apply_registry_rewrite(pod: &mut corev1::Pod, config: &BackendConfig) {
    let Some(spec) = pod.spec.as_mut() else {
        return;
    };

    let mut rewritten = false;
    for container in &mut spec.containers {
        if let Some(image) = container.image.as_mut()
            && image.contains(LOCAL_REGISTRY_PLACEHOLDER)
        {
            *image = image.replace(LOCAL_REGISTRY_PLACEHOLDER, &config.local_registry_url);
            rewritten = true;
        }
    }

    if rewritten && !config.local_registry_secret.is_empty() {
        spec.image_pull_secrets = Some(vec![corev1::LocalObjectReference {
            name: config.local_registry_secret.clone(),
        }]);
    }
}

// Candidate names are <manifest-name>-<slug>, then -1 through -9; if the
// user somehow has all ten, the create is refused.
pub(crate) fn assign_unique_name(pod: &mut corev1::Pod, user: &User, taken: &HashSet<String>) -> EmptyResult {
    let Some(manifest_name) = pod.metadata.name.clone().filter(|n| !n.is_empty()) else {
        bail!(CreatorError::unnamed_manifest(user.id()));
    };

    let base = format!("{manifest_name}-{}", user.slug());
    let name = (0..NAME_ATTEMPTS)
        .map(|i| match i {
            0 => base.clone(),
            _ => format!("{base}-{i}"),
        })
        .find(|candidate| !taken.contains(candidate));

    let Some(name) = name else {
        bail!(CreatorError::no_free_pod_name(&base));
    };

    let labels = pod.metadata.labels.get_or_insert_default();
    labels.insert(USER_LABEL_KEY.into(), user.name().into());
    labels.insert(DOMAIN_LABEL_KEY.into(), user.domain().into());
    labels.insert(POD_NAME_LABEL_KEY.into(), name.clone());
    pod.metadata.name = Some(name);
    Ok(())
}

// Manifests reference well-known volumes by mount name alone; the claims
// are synthesised here so manifests stay portable across silos.
pub(crate) fn complete_volumes(pod: &mut corev1::Pod, user: &User) -> EmptyResult {
    let Some(spec) = pod.spec.as_mut() else {
        return Ok(());
    };

    let declared: HashSet<String> = spec
        .volumes
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|v| v.name.clone())
        .collect();

    let mut synthesised: Vec<corev1::Volume> = vec![];
    for container in &spec.containers {
        for mount in container.volume_mounts.as_deref().unwrap_or_default() {
            if declared.contains(&mount.name) || synthesised.iter().any(|v| v.name == mount.name) {
                continue;
            }

            let claim_name = match mount.name.as_str() {
                USER_STORAGE_VOLUME => user.storage_name(),
                LOCAL_VOLUME => {
                    format!(
                        "{LOCAL_CLAIM_PREFIX}-{}",
                        mount.mount_path.trim_start_matches('/').replace('/', "-")
                    )
                },
                _ => bail!(CreatorError::unknown_volume_mount(&mount.name)),
            };

            synthesised.push(corev1::Volume {
                name: mount.name.clone(),
                persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                    claim_name,
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
    }

    if !synthesised.is_empty() {
        spec.volumes.get_or_insert_default().extend(synthesised);
    }
    Ok(())
}
