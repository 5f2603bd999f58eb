use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ListParams;
use pb_api::v1::PodInfo;
use tokio::time::sleep;
use tracing::*;

use super::*;
use crate::cache::PodCache;
use crate::config::BackendConfig;
use crate::prelude::*;
use crate::signal::ReadySignal;

/// A cluster pod together with its owning user.  The service never keeps
/// these in memory between requests; they are re-derived from cluster
/// state on demand, and only the pod cache file persists.
#[derive(Clone, Debug)]
pub struct ManagedPod {
    pod: corev1::Pod,
    user: User,
}

impl ManagedPod {
    pub fn new(pod: corev1::Pod, user: User) -> ManagedPod {
        ManagedPod { pod, user }
    }

    /// Re-derive ownership from the `user`/`domain` labels on the pod.
    pub fn from_pod(pod: corev1::Pod) -> anyhow::Result<ManagedPod> {
        let user = User::from_pod_labels(&pod)?;
        Ok(ManagedPod { pod, user })
    }

    pub fn name(&self) -> String {
        self.pod.name_any()
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn pod(&self) -> &corev1::Pod {
        &self.pod
    }

    pub fn ssh_service_name(&self) -> String {
        format!("{}-{SSH_SERVICE_SUFFIX}", self.name())
    }

    pub fn http_service_name(&self) -> String {
        format!("{}-{HTTP_SERVICE_SUFFIX}", self.name())
    }

    pub fn url(&self, config: &BackendConfig) -> String {
        if self.pod.declares_port(HTTP_PORT) && !config.ingress_domain.is_empty() {
            format!("https://{}.{}", self.name(), config.ingress_domain)
        } else {
            String::new()
        }
    }

    /// The public description of this pod.  Tokens and service info come
    /// from the on-disk cache; a cache miss yields empty maps, never an
    /// error.
    pub fn pod_info(&self, config: &BackendConfig) -> PodInfo {
        let cache = PodCache::load(&config.pod_cache_dir, &self.name());
        let status = self.pod.status.as_ref();
        let start_time = status.and_then(|s| s.start_time.as_ref()).map(|t| t.0);
        let phase = status.and_then(|s| s.phase.clone()).unwrap_or_default();

        PodInfo {
            pod_name: self.name(),
            container_name: self
                .pod
                .primary_container()
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            image_name: self
                .pod
                .primary_container()
                .ok()
                .and_then(|c| c.image.clone())
                .unwrap_or_default(),
            pod_ip: status.and_then(|s| s.pod_ip.clone()).unwrap_or_default(),
            node_ip: status.and_then(|s| s.host_ip.clone()).unwrap_or_default(),
            owner: self.user.id().into(),
            age: start_time.map(|t| age_since(t, Utc::now())).unwrap_or_default(),
            status: match start_time {
                Some(t) => format!("{phase}:{}", t.to_rfc3339()),
                None => phase,
            },
            url: self.url(config),
            tokens: cache.tokens,
            k8s_pod_info: cache.service_info,
        }
    }

    pub fn build_ssh_service(&self, config: &BackendConfig) -> corev1::Service {
        corev1::Service {
            metadata: metav1::ObjectMeta {
                name: Some(self.ssh_service_name()),
                labels: Some([(CREATED_FOR_POD_LABEL_KEY.to_string(), self.name())].into()),
                ..Default::default()
            },
            spec: Some(corev1::ServiceSpec {
                type_: Some("LoadBalancer".into()),
                external_ips: match config.ssh_public_ip.is_empty() {
                    true => None,
                    false => Some(vec![config.ssh_public_ip.clone()]),
                },
                selector: self.pod.metadata.labels.clone(),
                ports: Some(vec![corev1::ServicePort {
                    name: Some(SSH_SERVICE_SUFFIX.into()),
                    port: SSH_PORT,
                    target_port: Some(IntOrString::Int(SSH_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn build_http_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: metav1::ObjectMeta {
                name: Some(self.http_service_name()),
                labels: Some([(CREATED_FOR_POD_LABEL_KEY.to_string(), self.name())].into()),
                ..Default::default()
            },
            spec: Some(corev1::ServiceSpec {
                selector: self.pod.metadata.labels.clone(),
                ports: Some(vec![corev1::ServicePort {
                    name: Some(HTTP_SERVICE_SUFFIX.into()),
                    port: HTTP_PORT,
                    target_port: Some(IntOrString::Int(HTTP_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn build_ingress(&self, config: &BackendConfig) -> netv1::Ingress {
        let host = format!("{}.{}", self.name(), config.ingress_domain);
        netv1::Ingress {
            metadata: metav1::ObjectMeta {
                name: Some(self.name()),
                labels: Some([(CREATED_FOR_POD_LABEL_KEY.to_string(), self.name())].into()),
                ..Default::default()
            },
            spec: Some(netv1::IngressSpec {
                tls: Some(vec![netv1::IngressTLS {
                    hosts: Some(vec![host.clone()]),
                    secret_name: Some(config.ingress_wild_card_secret.clone()),
                }]),
                rules: Some(vec![netv1::IngressRule {
                    host: Some(host),
                    http: Some(netv1::HTTPIngressRuleValue {
                        paths: vec![netv1::HTTPIngressPath {
                            path: Some("/".into()),
                            path_type: "Prefix".into(),
                            backend: netv1::IngressBackend {
                                service: Some(netv1::IngressServiceBackend {
                                    name: self.http_service_name(),
                                    port: Some(netv1::ServiceBackendPort {
                                        number: Some(HTTP_PORT),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Wait for every prerequisite, then run the start jobs and resolve
    /// `finished` with the outcome.  A failed prerequisite resolves
    /// `finished` false without attempting any cleanup; the reconciliation
    /// sweep collects whatever was partially created.
    pub async fn run_start_jobs_when_ready(
        self,
        client: ClusterClient,
        config: BackendConfig,
        prereqs: Vec<ReadySignal>,
        finished: ReadySignal,
    ) {
        for prereq in &prereqs {
            if !prereq.wait().await {
                info!("prerequisites for pod {} did not come up, abandoning start jobs", self.name());
                finished.set(false);
                return;
            }
        }

        match self.run_start_jobs(&client, &config).await {
            Ok(()) => finished.set(true),
            Err(err) => {
                error!("start jobs for pod {} failed: {err:#}", self.name());
                finished.set(false);
            },
        }
    }

    /// The start jobs proper: child services, token copy, service info,
    /// cache persist.  Also invoked directly at process start to rebuild
    /// missing caches for already-live pods.
    pub async fn run_start_jobs(&self, client: &ClusterClient, config: &BackendConfig) -> EmptyResult {
        if self.pod.declares_port(SSH_PORT) && client.services().get_opt(&self.ssh_service_name()).await?.is_none() {
            debug!("creating ssh service for pod {}", self.name());
            client
                .services()
                .create(&Default::default(), &self.build_ssh_service(config))
                .await?;
        }

        if self.pod.declares_port(HTTP_PORT) && !config.ingress_domain.is_empty() {
            if client.services().get_opt(&self.http_service_name()).await?.is_none() {
                client
                    .services()
                    .create(&Default::default(), &self.build_http_service())
                    .await?;
            }
            if client.ingresses().get_opt(&self.name()).await?.is_none() {
                debug!("creating ingress for pod {}", self.name());
                client.ingresses().create(&Default::default(), &self.build_ingress(config)).await?;
            }
        }

        let mut cache = PodCache::default();
        self.copy_tokens(client, config, &mut cache).await?;
        self.collect_service_info(client, &mut cache).await?;

        cache.save(&config.pod_cache_dir, &self.name())
    }

    /// Wait for the pod to be gone, then clean up its children.  Child
    /// cleanup is best-effort: failures are logged and the sweep picks up
    /// the leftovers.
    pub async fn run_delete_jobs_when_ready(
        self,
        client: ClusterClient,
        config: BackendConfig,
        pod_deleted: ReadySignal,
        finished: ReadySignal,
    ) {
        if !pod_deleted.wait().await {
            info!("pod {} was not observed deleted in time, leaving children in place", self.name());
            finished.set(false);
            return;
        }

        let selector = format!("{CREATED_FOR_POD_LABEL_KEY}={}", self.name());
        match client.services().list(&ListParams::default().labels(&selector)).await {
            Ok(services) => {
                for svc in services.items {
                    if let Err(err) = delete_ignore_missing(&client.services(), &svc.name_any()).await {
                        warn!("could not delete service {} for pod {}: {err}", svc.name_any(), self.name());
                    }
                }
            },
            Err(err) => warn!("could not list services for pod {}: {err}", self.name()),
        }

        if let Err(err) = delete_ignore_missing(&client.ingresses(), &self.name()).await {
            warn!("could not delete ingress for pod {}: {err}", self.name());
        }

        if let Err(err) = PodCache::remove(&config.pod_cache_dir, &self.name()) {
            warn!("could not remove cache file for pod {}: {err}", self.name());
        }

        finished.set(true);
    }

    // Pods advertise which files under /tmp the front end should pick up
    // by annotating the pod with <file-name>: copyForFrontend.  The pod's
    // entrypoint writes those files at startup, so an empty read is
    // retried a few times before being taken at face value.
    async fn copy_tokens(&self, client: &ClusterClient, config: &BackendConfig, cache: &mut PodCache) -> EmptyResult {
        let container = self.pod.primary_container()?.name.clone();
        let token_names: Vec<String> = self
            .pod
            .annotations()
            .iter()
            .filter(|(_, v)| *v == TOKEN_COPY_ANNOTATION_VALUE)
            .map(|(k, _)| k.clone())
            .collect();

        for name in token_names {
            let path = format!("/tmp/{name}");
            let mut value = String::new();
            for attempt in 1..=TOKEN_COPY_ATTEMPTS {
                let (stdout, stderr) = client.exec_in_pod(&self.name(), &container, &["cat", &path]).await?;
                if !stdout.is_empty() {
                    value = stdout;
                    break;
                }
                debug!("token {name} of pod {} empty on attempt {attempt}: {stderr}", self.name());
                if attempt < TOKEN_COPY_ATTEMPTS {
                    sleep(Duration::from_secs(TOKEN_COPY_RETRY_DELAY_SECONDS)).await;
                }
            }
            cache.insert_token(&name, &value, config.token_byte_limit);
        }

        Ok(())
    }

    async fn collect_service_info(&self, client: &ClusterClient, cache: &mut PodCache) -> EmptyResult {
        let Some(svc) = client.services().get_opt(&self.ssh_service_name()).await? else {
            return Ok(());
        };

        let node_port = svc
            .spec
            .and_then(|s| s.ports)
            .unwrap_or_default()
            .iter()
            .find(|p| p.target_port == Some(IntOrString::Int(SSH_PORT)))
            .and_then(|p| p.node_port);
        if let Some(port) = node_port {
            cache.service_info.insert(SSH_PORT_INFO_KEY.into(), port.to_string());
        }

        Ok(())
    }
}

/// Render a pod's age the way the silos display it: whole hours, then
/// minutes and seconds.
pub(super) fn age_since(start: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - start).num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
