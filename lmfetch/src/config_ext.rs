//! Extension pour configurer le Fetcher depuis lmconfig

use crate::command::{CommandFetcher, CommandFetcherSettings};
use anyhow::Result;
use lmconfig::Config;
use std::sync::Arc;
use std::time::Duration;

pub trait FetcherConfigExt {
    /// Lit la section `fetcher` de la configuration
    fn get_fetcher_settings(&self) -> CommandFetcherSettings;

    /// Faut-il lancer `<program> -U` au démarrage ?
    fn get_fetcher_update_on_startup(&self) -> bool;

    /// Crée le fetcher configuré
    fn create_fetcher(&self) -> Result<Arc<CommandFetcher>>;
}

impl FetcherConfigExt for Config {
    fn get_fetcher_settings(&self) -> CommandFetcherSettings {
        let defaults = CommandFetcherSettings::default();

        // `fetcher.args` remplace entièrement le modèle yt-dlp
        let args = match self.get_string_list(&["fetcher", "args"]) {
            args if args.is_empty() => defaults.args,
            args => args,
        };

        CommandFetcherSettings {
            program: self.get_string(&["fetcher", "program"], &defaults.program),
            args,
            extra_args: self.get_string_list(&["fetcher", "extra_args"]),
            audio_format: self.get_string(&["fetcher", "audio_format"], &defaults.audio_format),
            timeout: Duration::from_secs(
                self.get_u64(&["fetcher", "timeout_secs"], defaults.timeout.as_secs()),
            ),
            retries: self.get_u64(&["fetcher", "retries"], defaults.retries as u64) as u32,
        }
    }

    fn get_fetcher_update_on_startup(&self) -> bool {
        self.get_bool(&["fetcher", "update_on_startup"], true)
    }

    fn create_fetcher(&self) -> Result<Arc<CommandFetcher>> {
        let settings = self.get_fetcher_settings();
        if settings.program.trim().is_empty() {
            anyhow::bail!("fetcher.program is empty");
        }
        Ok(Arc::new(CommandFetcher::new(settings)))
    }
}
