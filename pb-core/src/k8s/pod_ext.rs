use super::*;
use crate::prelude::*;

// Helper functions to get references to a pod's spec and status objects
impl PodExt for corev1::Pod {
    fn spec(&self) -> anyhow::Result<&corev1::PodSpec> {
        match self.spec.as_ref() {
            None => bail!(KubernetesError::field_not_found("pod spec")),
            Some(ps) => Ok(ps),
        }
    }

    fn status(&self) -> anyhow::Result<&corev1::PodStatus> {
        match self.status.as_ref() {
            None => bail!(KubernetesError::field_not_found("pod status")),
            Some(ps) => Ok(ps),
        }
    }

    fn primary_container(&self) -> anyhow::Result<&corev1::Container> {
        match self.spec()?.containers.first() {
            None => bail!(KubernetesError::field_not_found("pod containers")),
            Some(c) => Ok(c),
        }
    }

    fn declares_port(&self, port: i32) -> bool {
        let Ok(spec) = self.spec() else {
            return false;
        };
        spec.containers
            .iter()
            .flat_map(|c| c.ports.as_deref().unwrap_or_default())
            .any(|p| p.container_port == port)
    }
}
