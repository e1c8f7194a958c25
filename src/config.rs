pub mod settings;

pub use settings::{
    generate_default_config, AuthSettings, ClusterSettings, LibvirtSettings, NodeSettings, PeerSettings,
    RateLimitSettings, ServerSettings, Settings, StorageSettings,
};
