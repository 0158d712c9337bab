//! Extension pour configurer le coordinateur depuis lmconfig

use crate::{AcquireSettings, Coordinator};
use lmcache::CacheStore;
use lmconfig::Config;
use lmfetch::Fetcher;
use std::sync::Arc;
use std::time::Duration;

pub trait AcquireConfigExt {
    /// Lit la section `acquire` (`max_concurrent_fetches`, `retry_backoff_secs`,
    /// `fetch_timeout_secs`, 0 = pas de limite propre au coordinateur)
    fn get_acquire_settings(&self) -> AcquireSettings;

    /// Crée le coordinateur configuré
    fn create_coordinator(&self, store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>) -> Coordinator;
}

impl AcquireConfigExt for Config {
    fn get_acquire_settings(&self) -> AcquireSettings {
        let defaults = AcquireSettings::default();
        let fetch_timeout = self.get_u64(&["acquire", "fetch_timeout_secs"], 0);

        AcquireSettings {
            max_concurrent_fetches: self.get_u64(
                &["acquire", "max_concurrent_fetches"],
                defaults.max_concurrent_fetches as u64,
            ) as usize,
            retry_backoff: Duration::from_secs(self.get_u64(
                &["acquire", "retry_backoff_secs"],
                defaults.retry_backoff.as_secs(),
            )),
            fetch_timeout: (fetch_timeout > 0).then(|| Duration::from_secs(fetch_timeout)),
        }
    }

    fn create_coordinator(&self, store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>) -> Coordinator {
        Coordinator::new(store, fetcher, self.get_acquire_settings())
    }
}
