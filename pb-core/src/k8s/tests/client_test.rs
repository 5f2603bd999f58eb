use assertables::*;
use httpmock::Method::*;
use kube::runtime::watcher::Event;

use super::*;

#[rstest(tokio::test)]
async fn test_list_pods_uses_label_selector(test_pod: corev1::Pod) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle(move |when, then| {
        when.method(GET)
            .path(format!("/api/v1/namespaces/{TEST_NAMESPACE}/pods"))
            .query_param("labelSelector", "user=registeredtest7,domain=");
        then.json_body(pod_list(vec![&test_pod]));
    });
    fake_apiserver.build();

    let client = ClusterClient::new(client, TEST_NAMESPACE);
    let pods = client.list_pods("user=registeredtest7,domain=").await.unwrap();
    assert_len_eq_x!(&pods, 1);
    assert_eq!(pods[0].name_any(), TEST_POD);
    fake_apiserver.assert();
}

#[rstest(tokio::test)]
async fn test_delete_ignore_missing_tolerates_404() {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_not_found(format!("/api/v1/namespaces/{TEST_NAMESPACE}/services/nope"));
    fake_apiserver.build();

    let client = ClusterClient::new(client, TEST_NAMESPACE);
    assert_ok!(delete_ignore_missing(&client.services(), "nope").await);
}

#[rstest(tokio::test)]
async fn test_delete_ignore_missing_propagates_other_errors() {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle(|when, then| {
        when.method(DELETE).path(format!("/api/v1/namespaces/{TEST_NAMESPACE}/services/broken"));
        then.status(500).body("boom");
    });
    fake_apiserver.build();

    let client = ClusterClient::new(client, TEST_NAMESPACE);
    assert_err!(delete_ignore_missing(&client.services(), "broken").await);
}

#[rstest]
fn test_pod_ready_predicate(mut test_pod: corev1::Pod) {
    assert!(!pod_ready(&Event::Apply(test_pod.clone())));

    add_ready_condition(&mut test_pod);
    assert!(pod_ready(&Event::Apply(test_pod.clone())));

    // a delete event never counts as ready
    assert!(!pod_ready(&Event::Delete(test_pod)));
}

#[rstest]
#[case::available("Available", true)]
#[case::bound_is_not_available("Bound", false)]
fn test_pv_available_predicate(#[case] phase: &str, #[case] expected: bool) {
    let pv = corev1::PersistentVolume {
        status: Some(corev1::PersistentVolumeStatus {
            phase: Some(phase.into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert_eq!(pv_available(&Event::Apply(pv)), expected);
}

#[rstest]
#[case::bound("Bound", true)]
#[case::pending("Pending", false)]
fn test_pvc_bound_predicate(#[case] phase: &str, #[case] expected: bool) {
    let pvc = corev1::PersistentVolumeClaim {
        status: Some(corev1::PersistentVolumeClaimStatus {
            phase: Some(phase.into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert_eq!(pvc_bound(&Event::Apply(pvc)), expected);
}

#[rstest]
fn test_deleted_predicate(test_pod: corev1::Pod) {
    assert!(!deleted(&Event::Apply(test_pod.clone())));
    assert!(deleted(&Event::Delete(test_pod)));
}
