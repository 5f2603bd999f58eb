// Labels stamped on every managed pod and its storage
pub const USER_LABEL_KEY: &str = "user";
pub const DOMAIN_LABEL_KEY: &str = "domain";
pub const POD_NAME_LABEL_KEY: &str = "podName";

// Label tying child services (ssh, http) back to their pod
pub const CREATED_FOR_POD_LABEL_KEY: &str = "createdForPod";

// Environment variables injected into every container of a managed pod
pub const HOME_SERVER_ENV_VAR: &str = "HOME_SERVER";
pub const SD_UID_ENV_VAR: &str = "SD_UID";

// Pods opt a file in /tmp into the token copy by setting an annotation
// with this literal value
pub const TOKEN_COPY_ANNOTATION_VALUE: &str = "copyForFrontend";

// Cache key for the NodePort bound to a pod's ssh service
pub const SSH_PORT_INFO_KEY: &str = "sshPort";

// Naming for per-user storage and per-pod child resources
pub const USER_STORAGE_PREFIX: &str = "user-storage";
pub const LOCAL_CLAIM_PREFIX: &str = "local-claim";
pub const SSH_SERVICE_SUFFIX: &str = "ssh";
pub const HTTP_SERVICE_SUFFIX: &str = "http";

// Manifest images containing this placeholder are rewritten to the
// configured local registry
pub const LOCAL_REGISTRY_PLACEHOLDER: &str = "LOCALREGISTRY";

// Config overrides come from BACKEND_<UPPERCASE_KEY> environment variables
pub const CONFIG_ENV_PREFIX: &str = "BACKEND_";

// Token copy races the pod entrypoint, so it retries a fixed number of
// times with a fixed delay
pub const TOKEN_COPY_ATTEMPTS: u32 = 10;
pub const TOKEN_COPY_RETRY_DELAY_SECONDS: u64 = 1;

pub const SSH_PORT: i32 = 22;
pub const HTTP_PORT: i32 = 80;
