use std::collections::BTreeMap;

use chrono::{
    TimeZone,
    Utc,
};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use pb_core::constants::*;
use rstest::fixture;

use crate::constants::*;

pub const TEST_CONTAINER: &str = "jupyter";
pub const TEST_IMAGE: &str = "LOCALREGISTRY/jupyter:latest";

/// A pod owned by [`TEST_USER`], labelled the way the creator labels the
/// pods it admits.
#[fixture]
pub fn test_pod(#[default(TEST_POD.into())] name: String) -> corev1::Pod {
    corev1::Pod {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some(name.clone()),
            labels: Some(BTreeMap::from([
                (USER_LABEL_KEY.to_string(), TEST_USER.to_string()),
                (DOMAIN_LABEL_KEY.to_string(), String::new()),
                (POD_NAME_LABEL_KEY.to_string(), name),
            ])),
            ..Default::default()
        },
        spec: Some(corev1::PodSpec {
            containers: vec![corev1::Container {
                name: TEST_CONTAINER.into(),
                image: Some(TEST_IMAGE.into()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(corev1::PodStatus { ..Default::default() }),
    }
}

pub fn add_container_port(pod: &mut corev1::Pod, port: i32) {
    let container = &mut pod.spec.get_or_insert_default().containers[0];
    container.ports.get_or_insert_default().push(corev1::ContainerPort {
        container_port: port,
        ..Default::default()
    });
}

pub fn add_ready_condition(pod: &mut corev1::Pod) {
    pod.status
        .get_or_insert_default()
        .conditions
        .get_or_insert_default()
        .push(corev1::PodCondition {
            type_: "Ready".into(),
            status: "True".into(),
            ..Default::default()
        });
}

pub fn add_running_status(pod: &mut corev1::Pod, start_ts: i64) {
    let status = pod.status.get_or_insert_default();
    status.phase = Some("Running".into());
    status.pod_ip = Some("10.42.0.17".into());
    status.host_ip = Some("10.2.0.4".into());
    status.start_time = Some(metav1::Time(Utc.timestamp_opt(start_ts, 0).unwrap()));
}

pub fn add_token_annotation(pod: &mut corev1::Pod, token_name: &str) {
    pod.metadata
        .annotations
        .get_or_insert_default()
        .insert(token_name.into(), TOKEN_COPY_ANNOTATION_VALUE.into());
}
