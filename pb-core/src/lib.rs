pub mod cache;
pub mod config;
pub mod constants;
pub mod errors;
pub mod k8s;
pub mod logging;
pub mod net;
pub mod signal;

pub mod prelude {
    pub use k8s_openapi::api::core::v1 as corev1;
    pub use k8s_openapi::api::networking::v1 as netv1;
    pub use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
    pub use kube::ResourceExt;

    pub use crate::constants::*;
    pub use crate::errors::EmptyResult;
    pub use crate::k8s::PodExt;
}
