use std::collections::HashMap;

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GetPodsRequest {
    pub user_id: String,
}

/// `settings` maps container name -> (env name -> value); only env entries
/// that already exist in the manifest are overwritten.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CreatePodRequest {
    pub yaml_url: String,
    pub user_id: String,
    #[serde(default)]
    pub settings: HashMap<String, HashMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CreatePodResponse {
    pub pod_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WatchCreatePodRequest {
    pub user_id: String,
    pub pod_name: String,
}

// Defaults to false so the endpoint never confirms the existence of a pod
// the caller does not own.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WatchCreatePodResponse {
    pub ready: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeletePodRequest {
    pub user_id: String,
    pub pod_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeletePodResponse {
    pub requested: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WatchDeletePodRequest {
    pub user_id: String,
    pub pod_name: String,
}

/// An unknown pod is reported as already deleted, which keeps this endpoint
/// from acting as an existence oracle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WatchDeletePodResponse {
    pub deleted: bool,
}

impl Default for WatchDeletePodResponse {
    fn default() -> Self {
        WatchDeletePodResponse { deleted: true }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeleteAllUserRequest {
    pub user_id: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeleteAllUserResponse {
    pub deleted: bool,
}
