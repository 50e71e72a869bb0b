use sentinel_rs_config::{RegistrationConfig, SentinelConfig, StoreConfig, StoreProvider};
use sentinel_rs_protocol::RequestContext;

/// Context for user `u1`, session `s1`.
pub fn context(scope: &str, intent: &str) -> RequestContext {
    RequestContext::new("u1", "s1", scope, intent)
}

/// In-memory config with `u1` registered on `scope` for session `s1`.
pub fn registered_config(scope: &str) -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.store = StoreConfig {
        provider: StoreProvider::Memory,
        path: None,
    };
    config.boundary.registrations.push(RegistrationConfig {
        user_id: "u1".to_string(),
        scope: scope.to_string(),
        sessions: vec!["s1".to_string()],
        active: true,
    });
    config
}
