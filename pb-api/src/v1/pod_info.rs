use std::collections::HashMap;

use serde::{
    Deserialize,
    Serialize,
};

/// The public description of one managed pod, as served by `/get_pods`.
///
/// `age` is rendered as `H:MM:SS` since the pod's start time; `status` is
/// `<phase>:<start-iso>` unless the front end overlays `Creating` or
/// `Deleting` from its watch indices.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PodInfo {
    pub pod_name: String,
    pub container_name: String,
    pub image_name: String,
    pub pod_ip: String,
    pub node_ip: String,
    pub owner: String,
    pub age: String,
    pub status: String,
    pub url: String,
    pub tokens: HashMap<String, String>,
    pub k8s_pod_info: HashMap<String, String>,
}
