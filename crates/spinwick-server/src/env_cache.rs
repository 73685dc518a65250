use std::collections::HashMap;
use std::sync::Mutex;

use spinwick_core::EnvVarMap;

/// Best-effort, in-memory cache of operator-supplied environment overrides,
/// keyed by repeatable SpinWick ID. Entries live for the lifetime of the
/// PR's environment and are lost on restart.
#[derive(Debug, Default)]
pub struct EnvVarCache {
    maps: Mutex<HashMap<String, EnvVarMap>>,
}

impl EnvVarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, repeatable_id: &str, env: EnvVarMap) {
        self.maps
            .lock()
            .expect("env var cache lock poisoned")
            .insert(repeatable_id.to_owned(), env);
    }

    pub fn get(&self, repeatable_id: &str) -> Option<EnvVarMap> {
        self.maps
            .lock()
            .expect("env var cache lock poisoned")
            .get(repeatable_id)
            .cloned()
    }

    pub fn remove(&self, repeatable_id: &str) {
        self.maps
            .lock()
            .expect("env var cache lock poisoned")
            .remove(repeatable_id);
    }
}
