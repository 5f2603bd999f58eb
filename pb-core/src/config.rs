use std::env;
use std::fs::File;
use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::*;

/// Frozen service configuration, loaded once at startup from a YAML file.
/// Every key can be overridden by a `BACKEND_<UPPERCASE_KEY>` environment
/// variable, e.g. `BACKEND_TIMEOUTCREATE=90s`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    pub default_restart_policy: String,
    #[serde(with = "duration_str")]
    pub timeout_create: Duration,
    #[serde(with = "duration_str")]
    pub timeout_delete: Duration,
    pub namespace: String,
    pub pod_cache_dir: String,
    pub whitelist_manifest_regex: String,
    pub token_byte_limit: usize,
    pub nfs_storage_root: String,
    pub testing_host: String,
    #[serde(rename = "sshPublicIP")]
    pub ssh_public_ip: String,
    #[serde(rename = "localRegistryURL")]
    pub local_registry_url: String,
    pub local_registry_secret: String,
    pub ingress_domain: String,
    pub ingress_wild_card_secret: String,

    // only read by the end-to-end test harness
    pub test_user: Option<String>,
    pub test_ssh_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            default_restart_policy: "Never".into(),
            timeout_create: Duration::from_secs(300),
            timeout_delete: Duration::from_secs(120),
            namespace: "sciencedata".into(),
            pod_cache_dir: "/var/lib/podbay/pod-cache".into(),
            whitelist_manifest_regex: r"^https://raw\.githubusercontent\.com/.+\.yaml$".into(),
            token_byte_limit: 4096,
            nfs_storage_root: "/tank/storage".into(),
            testing_host: "".into(),
            ssh_public_ip: "".into(),
            local_registry_url: "".into(),
            local_registry_secret: "".into(),
            ingress_domain: "".into(),
            ingress_wild_card_secret: "".into(),
            test_user: None,
            test_ssh_key: None,
        }
    }
}

macro_rules! env_override {
    ($cfg:ident, $lookup:ident, str $field:ident, $key:literal) => {
        if let Some(v) = $lookup(concat!("BACKEND_", $key)) {
            $cfg.$field = v;
        }
    };
    ($cfg:ident, $lookup:ident, duration $field:ident, $key:literal) => {
        if let Some(v) = $lookup(concat!("BACKEND_", $key)) {
            $cfg.$field = humantime::parse_duration(&v)?;
        }
    };
    ($cfg:ident, $lookup:ident, usize $field:ident, $key:literal) => {
        if let Some(v) = $lookup(concat!("BACKEND_", $key)) {
            $cfg.$field = v.parse()?;
        }
    };
}

impl BackendConfig {
    pub fn load(filename: &str) -> anyhow::Result<BackendConfig> {
        let mut config: BackendConfig = serde_yaml::from_reader(File::open(filename)?)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> EmptyResult {
        env_override! {self, lookup, str default_restart_policy, "DEFAULTRESTARTPOLICY"}
        env_override! {self, lookup, duration timeout_create, "TIMEOUTCREATE"}
        env_override! {self, lookup, duration timeout_delete, "TIMEOUTDELETE"}
        env_override! {self, lookup, str namespace, "NAMESPACE"}
        env_override! {self, lookup, str pod_cache_dir, "PODCACHEDIR"}
        env_override! {self, lookup, str whitelist_manifest_regex, "WHITELISTMANIFESTREGEX"}
        env_override! {self, lookup, usize token_byte_limit, "TOKENBYTELIMIT"}
        env_override! {self, lookup, str nfs_storage_root, "NFSSTORAGEROOT"}
        env_override! {self, lookup, str testing_host, "TESTINGHOST"}
        env_override! {self, lookup, str ssh_public_ip, "SSHPUBLICIP"}
        env_override! {self, lookup, str local_registry_url, "LOCALREGISTRYURL"}
        env_override! {self, lookup, str local_registry_secret, "LOCALREGISTRYSECRET"}
        env_override! {self, lookup, str ingress_domain, "INGRESSDOMAIN"}
        env_override! {self, lookup, str ingress_wild_card_secret, "INGRESSWILDCARDSECRET"}
        Ok(())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
    };

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
