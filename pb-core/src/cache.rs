use std::collections::HashMap;
use std::fs;
use std::io::{
    ErrorKind,
    Write,
};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{
    Path,
    PathBuf,
};

use serde::{
    Deserialize,
    Serialize,
};
use tracing::*;

use crate::errors::*;

/// Per-pod runtime data that is expensive to re-fetch: tokens the pod
/// generated at startup and service-port bindings it obtained.  One
/// MessagePack-encoded file per pod under the configured cache directory,
/// readable only by the service.  A missing or undecodable file is an
/// empty cache, never an error.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PodCache {
    pub tokens: HashMap<String, String>,
    pub service_info: HashMap<String, String>,
}

pub fn cache_file(dir: &str, pod_name: &str) -> PathBuf {
    Path::new(dir).join(pod_name)
}

impl PodCache {
    pub fn load(dir: &str, pod_name: &str) -> PodCache {
        let path = cache_file(dir, pod_name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return PodCache::default(),
            Err(e) => {
                warn!("could not read pod cache {}: {e}", path.display());
                return PodCache::default();
            },
        };

        match rmp_serde::from_slice(&data) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("could not decode pod cache {}: {e}", path.display());
                PodCache::default()
            },
        }
    }

    pub fn exists(dir: &str, pod_name: &str) -> bool {
        cache_file(dir, pod_name).exists()
    }

    // Writers delete-then-write so a reader never sees a partially
    // overwritten file as anything worse than a cache miss.
    pub fn save(&self, dir: &str, pod_name: &str) -> EmptyResult {
        let encoded = rmp_serde::to_vec_named(self)?;

        fs::create_dir_all(dir)?;
        remove_ignore_missing(&cache_file(dir, pod_name))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(cache_file(dir, pod_name))?;
        file.write_all(&encoded)?;
        Ok(())
    }

    pub fn remove(dir: &str, pod_name: &str) -> EmptyResult {
        remove_ignore_missing(&cache_file(dir, pod_name))
    }

    /// Store a token, truncated to at most `limit` bytes on a char boundary.
    pub fn insert_token(&mut self, name: &str, value: &str, limit: usize) {
        let mut end = limit.min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.tokens.insert(name.into(), value[..end].into());
    }
}

fn remove_ignore_missing(path: &Path) -> EmptyResult {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
