pub const TEST_NAMESPACE: &str = "test";
pub const TEST_USER: &str = "registeredtest7";
pub const TEST_USER_WITH_DOMAIN: &str = "registeredtest7@sciencedata.dk";
pub const TEST_OTHER_USER: &str = "mallory";
pub const TEST_POD: &str = "jupyter-registeredtest7";
pub const TEST_SILO_IP: &str = "10.0.0.12";
