use assert_fs::TempDir;
use assertables::*;
use chrono::{
    TimeZone,
    Utc,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::managed_pod::age_since;
use super::*;
use crate::cache::PodCache;
use crate::config::BackendConfig;

#[fixture]
fn config() -> BackendConfig {
    BackendConfig {
        ingress_domain: "pods.sciencedata.dk".into(),
        ingress_wild_card_secret: "wildcard-tls".into(),
        ssh_public_ip: "130.226.137.130".into(),
        ..Default::default()
    }
}

#[rstest]
#[case::zero(0, "0:00:00")]
#[case::just_seconds(59, "0:00:59")]
#[case::minutes(3 * 60 + 7, "0:03:07")]
#[case::hours_unbounded(49 * 3600 + 30 * 60 + 1, "49:30:01")]
fn test_age_rendering(#[case] elapsed: i64, #[case] expected: &str) {
    let start = Utc.timestamp_opt(1_000_000, 0).unwrap();
    let now = Utc.timestamp_opt(1_000_000 + elapsed, 0).unwrap();
    assert_eq!(age_since(start, now), expected);
}

#[rstest]
fn test_age_never_negative() {
    let start = Utc.timestamp_opt(2_000, 0).unwrap();
    let now = Utc.timestamp_opt(1_000, 0).unwrap();
    assert_eq!(age_since(start, now), "0:00:00");
}

#[rstest]
fn test_pod_info_identity_fields(mut test_pod: corev1::Pod, config: BackendConfig) {
    add_running_status(&mut test_pod, 1_000_000);

    let cache_dir = TempDir::new().unwrap();
    let config = BackendConfig {
        pod_cache_dir: cache_dir.path().to_str().unwrap().into(),
        ..config
    };

    let info = ManagedPod::from_pod(test_pod).unwrap().pod_info(&config);
    assert_eq!(info.pod_name, TEST_POD);
    assert_eq!(info.container_name, TEST_CONTAINER);
    assert_eq!(info.image_name, TEST_IMAGE);
    assert_eq!(info.pod_ip, "10.42.0.17");
    assert_eq!(info.node_ip, "10.2.0.4");
    assert_eq!(info.owner, TEST_USER);
    assert_starts_with!(info.status, "Running:");

    // no cache file on disk yet
    assert_is_empty!(info.tokens);
    assert_is_empty!(info.k8s_pod_info);
}

#[rstest]
fn test_pod_info_serves_cached_tokens(mut test_pod: corev1::Pod, config: BackendConfig) {
    add_running_status(&mut test_pod, 1_000_000);

    let cache_dir = TempDir::new().unwrap();
    let config = BackendConfig {
        pod_cache_dir: cache_dir.path().to_str().unwrap().into(),
        ..config
    };

    let mut cache = PodCache::default();
    cache.insert_token("oauth", "sekrit", config.token_byte_limit);
    cache.service_info.insert(SSH_PORT_INFO_KEY.into(), "30022".into());
    cache.save(&config.pod_cache_dir, TEST_POD).unwrap();

    let info = ManagedPod::from_pod(test_pod).unwrap().pod_info(&config);
    assert_eq!(info.tokens["oauth"], "sekrit");
    assert_eq!(info.k8s_pod_info[SSH_PORT_INFO_KEY], "30022");
}

#[rstest]
#[case::with_http_port(true, "https://jupyter-registeredtest7.pods.sciencedata.dk")]
#[case::without_http_port(false, "")]
fn test_pod_url(mut test_pod: corev1::Pod, config: BackendConfig, #[case] http: bool, #[case] expected: &str) {
    if http {
        add_container_port(&mut test_pod, HTTP_PORT);
    }
    let mp = ManagedPod::from_pod(test_pod).unwrap();
    assert_eq!(mp.url(&config), expected);
}

#[rstest]
fn test_ssh_service_definition(mut test_pod: corev1::Pod, config: BackendConfig) {
    add_container_port(&mut test_pod, SSH_PORT);
    let labels = test_pod.metadata.labels.clone();
    let svc = ManagedPod::from_pod(test_pod).unwrap().build_ssh_service(&config);

    assert_eq!(svc.metadata.name.as_deref(), Some("jupyter-registeredtest7-ssh"));
    assert_eq!(
        svc.metadata.labels.unwrap()[CREATED_FOR_POD_LABEL_KEY],
        TEST_POD
    );

    let spec = svc.spec.unwrap();
    assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
    assert_eq!(spec.external_ips, Some(vec!["130.226.137.130".to_string()]));
    assert_eq!(spec.selector, labels);

    let ports = spec.ports.unwrap();
    assert_len_eq_x!(&ports, 1);
    assert_eq!(ports[0].port, SSH_PORT);
    assert_eq!(ports[0].target_port, Some(IntOrString::Int(SSH_PORT)));
}

#[rstest]
fn test_ingress_definition(mut test_pod: corev1::Pod, config: BackendConfig) {
    add_container_port(&mut test_pod, HTTP_PORT);
    let ing = ManagedPod::from_pod(test_pod).unwrap().build_ingress(&config);

    let spec = ing.spec.unwrap();
    let tls = spec.tls.unwrap();
    assert_eq!(tls[0].secret_name.as_deref(), Some("wildcard-tls"));

    let rules = spec.rules.unwrap();
    assert_eq!(rules[0].host.as_deref(), Some("jupyter-registeredtest7.pods.sciencedata.dk"));

    let backend = &rules[0].http.as_ref().unwrap().paths[0].backend;
    assert_eq!(backend.service.as_ref().unwrap().name, "jupyter-registeredtest7-http");
}

#[rstest]
fn test_declares_port(mut test_pod: corev1::Pod) {
    assert!(!test_pod.declares_port(SSH_PORT));
    add_container_port(&mut test_pod, SSH_PORT);
    assert!(test_pod.declares_port(SSH_PORT));
}
