// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_uri() -> String {
    "mongodb://localhost:27018/?directConnection=true".into()
}

fn default_app_name() -> String {
    "docbatch".into()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MongoStoreConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Bounds both TCP connect and server selection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for MongoStoreConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            app_name: default_app_name(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl MongoStoreConfig {
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }
}
