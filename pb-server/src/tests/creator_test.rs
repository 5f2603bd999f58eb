use std::collections::{
    HashMap,
    HashSet,
};

use assertables::*;
use httpmock::Method::*;
use httpmock::MockServer;
use pb_core::config::BackendConfig;
use pb_core::k8s::User;
use pb_core::prelude::*;

use super::*;

const JUPYTER_MANIFEST: &str = "
apiVersion: v1
kind: Pod
metadata:
  name: jupyter
spec:
  containers:
  - name: jupyter
    image: LOCALREGISTRY/jupyter:latest
    env:
    - name: FILE
      value: notebook.ipynb
    - name: WORKING_DIRECTORY
      value: /
    volumeMounts:
    - name: sciencedata
      mountPath: /home/jovyan/work
";

#[fixture]
fn user() -> User {
    User::new(TEST_USER).unwrap()
}

#[fixture]
fn config() -> BackendConfig {
    BackendConfig {
        namespace: TEST_NAMESPACE.into(),
        local_registry_url: "registry.local:5000".into(),
        local_registry_secret: "registry-creds".into(),
        ..Default::default()
    }
}

fn manifest_pod() -> corev1::Pod {
    serde_yaml::from_str(JUPYTER_MANIFEST).unwrap()
}

fn env_of<'a>(pod: &'a corev1::Pod, name: &str) -> Option<&'a str> {
    pod.spec.as_ref().unwrap().containers[0]
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}

#[rstest]
fn test_request_settings_overwrite_existing_only() {
    let mut pod = manifest_pod();
    let settings = HashMap::from([(
        "jupyter".to_string(),
        HashMap::from([
            ("FILE".to_string(), "".to_string()),
            ("WORKING_DIRECTORY".to_string(), "jupyter".to_string()),
            ("INJECTED".to_string(), "nope".to_string()),
        ]),
    )]);

    apply_request_settings(&mut pod, &settings);

    assert_eq!(env_of(&pod, "FILE"), Some(""));
    assert_eq!(env_of(&pod, "WORKING_DIRECTORY"), Some("jupyter"));
    assert_none!(env_of(&pod, "INJECTED"));
}

#[rstest]
fn test_settings_for_unknown_container_ignored() {
    let mut pod = manifest_pod();
    let settings = HashMap::from([(
        "other-container".to_string(),
        HashMap::from([("FILE".to_string(), "x".to_string())]),
    )]);

    apply_request_settings(&mut pod, &settings);
    assert_eq!(env_of(&pod, "FILE"), Some("notebook.ipynb"));
}

#[rstest]
fn test_mandatory_settings(config: BackendConfig) {
    let mut pod = manifest_pod();
    apply_mandatory_settings(&mut pod, "10.2.0.12", TEST_USER, &config);

    assert_eq!(pod.spec.as_ref().unwrap().restart_policy.as_deref(), Some("Never"));
    assert_eq!(env_of(&pod, HOME_SERVER_ENV_VAR), Some("10.2.0.12"));
    assert_eq!(env_of(&pod, SD_UID_ENV_VAR), Some(TEST_USER));
}

#[rstest]
fn test_mandatory_settings_keep_declared_restart_policy(config: BackendConfig) {
    let mut pod = manifest_pod();
    pod.spec.as_mut().unwrap().restart_policy = Some("Always".into());

    apply_mandatory_settings(&mut pod, "10.2.0.12", TEST_USER, &config);
    assert_eq!(pod.spec.as_ref().unwrap().restart_policy.as_deref(), Some("Always"));
}

#[rstest]
fn test_mandatory_settings_overwrite_manifest_values(config: BackendConfig) {
    let mut pod = manifest_pod();
    pod.spec.as_mut().unwrap().containers[0]
        .env
        .as_mut()
        .unwrap()
        .push(corev1::EnvVar {
            name: SD_UID_ENV_VAR.into(),
            value: Some("spoofed".into()),
            ..Default::default()
        });

    apply_mandatory_settings(&mut pod, "10.2.0.12", TEST_USER, &config);
    assert_eq!(env_of(&pod, SD_UID_ENV_VAR), Some(TEST_USER));
}

#[rstest]
fn test_registry_rewrite(config: BackendConfig) {
    let mut pod = manifest_pod();
    apply_registry_rewrite(&mut pod, &config);

    let spec = pod.spec.as_ref().unwrap();
    assert_eq!(spec.containers[0].image.as_deref(), Some("registry.local:5000/jupyter:latest"));
    assert_eq!(spec.image_pull_secrets.as_ref().unwrap()[0].name.as_str(), "registry-creds");
}

#[rstest]
fn test_registry_rewrite_without_placeholder(config: BackendConfig) {
    let mut pod = manifest_pod();
    pod.spec.as_mut().unwrap().containers[0].image = Some("docker.io/library/nginx".into());

    apply_registry_rewrite(&mut pod, &config);
    let spec = pod.spec.as_ref().unwrap();
    assert_eq!(spec.containers[0].image.as_deref(), Some("docker.io/library/nginx"));
    assert_none!(spec.image_pull_secrets.as_ref());
}

#[rstest]
#[case::no_collision(vec![], "jupyter-registeredtest7")]
#[case::one_collision(vec!["jupyter-registeredtest7"], "jupyter-registeredtest7-1")]
#[case::gap_is_reused(
    vec!["jupyter-registeredtest7", "jupyter-registeredtest7-2"],
    "jupyter-registeredtest7-1",
)]
fn test_unique_name_assignment(user: User, #[case] taken: Vec<&str>, #[case] expected: &str) {
    let mut pod = manifest_pod();
    let taken: HashSet<String> = taken.into_iter().map(String::from).collect();

    assign_unique_name(&mut pod, &user, &taken).unwrap();
    assert_eq!(pod.metadata.name.as_deref(), Some(expected));

    let labels = pod.metadata.labels.as_ref().unwrap();
    assert_eq!(labels[USER_LABEL_KEY], TEST_USER);
    assert_eq!(labels[DOMAIN_LABEL_KEY], "");
    assert_eq!(labels[POD_NAME_LABEL_KEY], expected);
}

#[rstest]
fn test_unique_name_candidates_exhausted(user: User) {
    let mut pod = manifest_pod();
    let mut taken = HashSet::from(["jupyter-registeredtest7".to_string()]);
    taken.extend((1..10).map(|i| format!("jupyter-registeredtest7-{i}")));

    assert_err!(assign_unique_name(&mut pod, &user, &taken));
}

#[rstest]
fn test_complete_volumes_user_storage(user: User) {
    let mut pod = manifest_pod();
    complete_volumes(&mut pod, &user).unwrap();

    let volumes = pod.spec.as_ref().unwrap().volumes.as_ref().unwrap();
    assert_len_eq_x!(volumes, 1);
    assert_eq!(volumes[0].name, "sciencedata");
    assert_eq!(
        volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
        "user-storage-registeredtest7"
    );
}

#[rstest]
fn test_complete_volumes_local_claim(user: User) {
    let mut pod = manifest_pod();
    pod.spec.as_mut().unwrap().containers[0]
        .volume_mounts
        .as_mut()
        .unwrap()
        .push(corev1::VolumeMount {
            name: "local".into(),
            mount_path: "/data/sets".into(),
            ..Default::default()
        });

    complete_volumes(&mut pod, &user).unwrap();
    let volumes = pod.spec.as_ref().unwrap().volumes.as_ref().unwrap();
    let local = volumes.iter().find(|v| v.name == "local").unwrap();
    assert_eq!(
        local.persistent_volume_claim.as_ref().unwrap().claim_name,
        "local-claim-data-sets"
    );
}

#[rstest]
fn test_complete_volumes_declared_volume_untouched(user: User) {
    let mut pod = manifest_pod();
    pod.spec.as_mut().unwrap().volumes = Some(vec![corev1::Volume {
        name: "sciencedata".into(),
        empty_dir: Some(Default::default()),
        ..Default::default()
    }]);

    complete_volumes(&mut pod, &user).unwrap();
    let volumes = pod.spec.as_ref().unwrap().volumes.as_ref().unwrap();
    assert_len_eq_x!(volumes, 1);
    assert_some!(volumes[0].empty_dir.as_ref());
}

#[rstest]
fn test_complete_volumes_unknown_mount(user: User) {
    let mut pod = manifest_pod();
    pod.spec.as_mut().unwrap().containers[0]
        .volume_mounts
        .as_mut()
        .unwrap()
        .push(corev1::VolumeMount {
            name: "mystery".into(),
            mount_path: "/mnt".into(),
            ..Default::default()
        });

    assert_err!(complete_volumes(&mut pod, &user));
}

#[rstest(tokio::test)]
async fn test_creator_rejects_non_whitelisted_url(config: BackendConfig) {
    let (_, client) = make_fake_apiserver();
    let client = pb_core::k8s::ClusterClient::new(client, TEST_NAMESPACE);

    let res = PodCreator::new(
        "https://evil.example.com/pod.yaml",
        TEST_USER,
        TEST_SILO_IP,
        &HashMap::new(),
        client,
        config,
    )
    .await;
    assert_err!(res);
}

#[rstest(tokio::test)]
async fn test_creator_builds_target_pod(config: BackendConfig) {
    let manifest_server = MockServer::start();
    manifest_server.mock(|when, then| {
        when.method(GET).path("/pod_manifests/jupyter.yaml");
        then.status(200).body(JUPYTER_MANIFEST);
    });

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle(|when, then| {
        when.method(GET).path(format!("/api/v1/namespaces/{TEST_NAMESPACE}/pods"));
        then.json_body(pod_list(vec![]));
    });
    fake_apiserver.build();
    let client = pb_core::k8s::ClusterClient::new(client, TEST_NAMESPACE);

    let config = BackendConfig {
        whitelist_manifest_regex: r"^http://.*/pod_manifests/.*\.yaml$".into(),
        ..config
    };
    let settings = HashMap::from([(
        "jupyter".to_string(),
        HashMap::from([("WORKING_DIRECTORY".to_string(), "jupyter".to_string())]),
    )]);

    let creator = PodCreator::new(
        &manifest_server.url("/pod_manifests/jupyter.yaml"),
        TEST_USER,
        TEST_SILO_IP,
        &settings,
        client,
        config,
    )
    .await
    .unwrap();

    assert_eq!(creator.pod_name(), TEST_POD);

    let target = creator.target();
    assert_eq!(env_of(target, "WORKING_DIRECTORY"), Some("jupyter"));
    assert_eq!(env_of(target, HOME_SERVER_ENV_VAR), Some("10.2.0.12"));
    assert_eq!(env_of(target, SD_UID_ENV_VAR), Some(TEST_USER));

    let spec = target.spec.as_ref().unwrap();
    assert_eq!(spec.containers[0].image.as_deref(), Some("registry.local:5000/jupyter:latest"));
    assert_eq!(
        spec.volumes.as_ref().unwrap()[0].persistent_volume_claim.as_ref().unwrap().claim_name,
        "user-storage-registeredtest7"
    );
    assert_eq!(target.metadata.labels.as_ref().unwrap()[POD_NAME_LABEL_KEY], TEST_POD);
}

#[rstest(tokio::test)]
async fn test_creator_propagates_fetch_failure(config: BackendConfig) {
    let manifest_server = MockServer::start();
    manifest_server.mock(|when, then| {
        when.method(GET).path("/pod_manifests/gone.yaml");
        then.status(404);
    });

    let (_, client) = make_fake_apiserver();
    let client = pb_core::k8s::ClusterClient::new(client, TEST_NAMESPACE);
    let config = BackendConfig {
        whitelist_manifest_regex: r"^http://.*\.yaml$".into(),
        ..config
    };

    let res = PodCreator::new(
        &manifest_server.url("/pod_manifests/gone.yaml"),
        TEST_USER,
        TEST_SILO_IP,
        &HashMap::new(),
        client,
        config,
    )
    .await;
    assert_err!(res);
}
