mod client;
mod managed_pod;
mod pod_ext;
mod user;

pub use client::{
    ClusterClient,
    delete_ignore_missing,
    deleted,
    pod_ready,
    pv_available,
    pvc_bound,
    watch_for,
};
pub use managed_pod::ManagedPod;
pub use user::User;

use crate::errors::*;
use crate::prelude::*;

err_impl! {KubernetesError,
    #[error("field not found in struct: {0}")]
    FieldNotFound(String),

    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    #[error("pod has no owner labels: {0}")]
    UnownedPod(String),
}

pub trait PodExt {
    fn spec(&self) -> anyhow::Result<&corev1::PodSpec>;
    fn status(&self) -> anyhow::Result<&corev1::PodStatus>;
    fn primary_container(&self) -> anyhow::Result<&corev1::Container>;
    fn declares_port(&self, port: i32) -> bool;
}

#[cfg(test)]
pub mod tests;
