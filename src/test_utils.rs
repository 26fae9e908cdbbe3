use std::sync::{Mutex, OnceLock};

/// Global lock for process environment modifications in tests.
/// Tests that set `DAEMONCTL_*` or other variables read by the configuration layer, or
/// change the current directory, acquire this lock so parallel tests do not observe
/// each other's values.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
