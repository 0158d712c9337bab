//! Fetcher basé sur un outil externe (yt-dlp par défaut)

use crate::error::{FetchError, FetchErrorKind};
use crate::fetcher::{content_type_for_extension, FetchedAudio, Fetcher};
use crate::metadata::TrackMetadata;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Arguments par défaut : l'invocation yt-dlp d'extraction audio
pub const DEFAULT_ARGS: &[&str] = &[
    "-f",
    "bestaudio/best",
    "--no-playlist",
    "--no-warnings",
    "-x",
    "--audio-format",
    "{audio_format}",
    "--print-json",
    "-o",
    "{output_stem}.%(ext)s",
    "--",
    "{reference}",
];

/// Extensions des fichiers intermédiaires de l'outil
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "temp", "tmp"];

const STDERR_TAIL_LINES: usize = 5;
const SELF_UPDATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Paramètres d'un [`CommandFetcher`]
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFetcherSettings {
    /// Programme à lancer
    pub program: String,
    /// Modèle d'arguments (`{reference}`, `{output_stem}`, `{audio_format}`)
    pub args: Vec<String>,
    /// Arguments ajoutés avant le modèle (cookies, proxy...)
    pub extra_args: Vec<String>,
    pub audio_format: String,
    pub timeout: Duration,
    /// Nouvelles tentatives après un `ProcessFailure`
    pub retries: u32,
}

impl Default for CommandFetcherSettings {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            extra_args: Vec::new(),
            audio_format: "mp3".to_string(),
            timeout: Duration::from_secs(300),
            retries: 2,
        }
    }
}

/// Échec d'une tentative, avec l'indication qu'une nouvelle tentative a un sens
struct AttemptError {
    error: FetchError,
    retryable: bool,
}

impl AttemptError {
    fn retryable(error: FetchError) -> Self {
        Self { error, retryable: true }
    }

    fn fatal(error: FetchError) -> Self {
        Self { error, retryable: false }
    }
}

/// Lance un outil externe pour télécharger une piste
///
/// Contrat attendu de l'outil : écrire un unique fichier `<stem>.<ext>` et
/// sortir avec le code 0. Tout autre comportement est normalisé en
/// [`FetchError`].
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    settings: CommandFetcherSettings,
}

impl CommandFetcher {
    pub fn new(settings: CommandFetcherSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CommandFetcherSettings {
        &self.settings
    }

    /// Construit la ligne de commande pour une référence et un stem donnés
    pub fn render_args(&self, reference: &str, output_stem: &Path) -> Vec<String> {
        let stem = output_stem.to_string_lossy();
        self.settings
            .extra_args
            .iter()
            .cloned()
            .chain(self.settings.args.iter().map(|arg| {
                arg.replace("{reference}", reference)
                    .replace("{output_stem}", &stem)
                    .replace("{audio_format}", &self.settings.audio_format)
            }))
            .collect()
    }

    /// Met à jour l'outil (`<program> -U`)
    ///
    /// Un échec est seulement journalisé : le serveur fonctionne avec la
    /// version installée.
    pub async fn self_update(&self) {
        let program = &self.settings.program;
        info!(program = %program, "Checking for fetcher updates");

        let child = Command::new(program)
            .arg("-U")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, "Cannot check for fetcher update: {}", e);
                return;
            }
        };

        match tokio::time::timeout(SELF_UPDATE_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                info!(program = %program, "{}", stdout.lines().last().unwrap_or("updated"));
            }
            Ok(Ok(output)) => warn!(
                program = %program,
                status = %output.status,
                "Fetcher update failed: {}",
                stderr_tail(&output.stderr)
            ),
            Ok(Err(e)) => warn!(program = %program, "Fetcher update failed: {}", e),
            Err(_) => warn!(program = %program, "Fetcher update timed out"),
        }
    }

    async fn run_once(&self, reference: &str, output_stem: &Path) -> Result<FetchedAudio, AttemptError> {
        let program = &self.settings.program;
        let args = self.render_args(reference, output_stem);
        debug!(program = %program, ?args, "Spawning fetcher");

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Groupe propre : les sous-processus (ffmpeg) sont tués avec l'outil
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AttemptError::fatal(FetchError::process_failure(format!(
                    "program not found: {}",
                    program
                ))));
            }
            Err(e) => {
                return Err(AttemptError::retryable(FetchError::process_failure(format!(
                    "failed to spawn {}: {}",
                    program, e
                ))));
            }
        };

        // Abandon du futur (timeout, annulation du vol) : tout le groupe est tué.
        let mut group = ProcessGroupGuard::new(child.id());
        let output = match tokio::time::timeout(self.settings.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AttemptError::retryable(FetchError::process_failure(format!(
                    "failed to collect output of {}: {}",
                    program, e
                ))));
            }
            Err(_) => {
                group.kill();
                let removed = remove_outputs(output_stem).await;
                warn!(reference, removed, "Fetcher timed out after {:?}", self.settings.timeout);
                return Err(AttemptError::fatal(FetchError::timeout(format!(
                    "{} did not finish within {}s",
                    program,
                    self.settings.timeout.as_secs_f64()
                ))));
            }
        };

        group.kill();

        if !output.status.success() {
            return Err(AttemptError::retryable(FetchError::process_failure(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr_tail(&output.stderr)
            ))));
        }

        let path = match self.find_output(output_stem).await {
            Some(path) => path,
            None => {
                return Err(AttemptError::fatal(FetchError::empty_output(format!(
                    "{} produced no file for {}",
                    program, reference
                ))));
            }
        };

        let size_bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(AttemptError::fatal(FetchError::empty_output(format!(
                    "{} produced an empty file",
                    program
                ))));
            }
        };

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(FetchedAudio {
            content_type: content_type_for_extension(&ext).to_string(),
            size_bytes,
            metadata: TrackMetadata::from_stdout(&output.stdout),
            path,
        })
    }

    /// Cherche le fichier final produit pour `output_stem`
    ///
    /// Les fichiers intermédiaires sont ignorés ; si plusieurs fichiers
    /// conviennent, celui au format demandé est préféré, sinon le plus gros.
    async fn find_output(&self, output_stem: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<(PathBuf, u64)> = outputs_for(output_stem)
            .await
            .into_iter()
            .filter(|(path, _)| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| !PARTIAL_EXTENSIONS.contains(&e))
                    .unwrap_or(true)
            })
            .collect();

        if let Some(pos) = candidates.iter().position(|(path, _)| {
            path.extension().and_then(|e| e.to_str()) == Some(self.settings.audio_format.as_str())
        }) {
            return Some(candidates.swap_remove(pos).0);
        }

        candidates.sort_by_key(|(_, size)| *size);
        candidates.pop().map(|(path, _)| path)
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    async fn fetch(&self, reference: &str, output_stem: &Path) -> Result<FetchedAudio, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.run_once(reference, output_stem).await {
                Ok(audio) => {
                    info!(
                        reference,
                        attempt,
                        size = audio.size_bytes,
                        content_type = %audio.content_type,
                        "Fetch finished"
                    );
                    return Ok(audio);
                }
                Err(AttemptError { error, retryable })
                    if retryable
                        && error.kind == FetchErrorKind::ProcessFailure
                        && attempt <= self.settings.retries =>
                {
                    warn!(reference, attempt, "Fetch attempt failed, retrying: {}", error);
                    remove_outputs(output_stem).await;
                }
                Err(AttemptError { error, .. }) => {
                    warn!(reference, attempt, "Fetch failed: {}", error);
                    return Err(error);
                }
            }
        }
    }
}

/// Tue le groupe de processus d'une tentative, au plus tard à sa destruction
///
/// yt-dlp lance ffmpeg pour `-x` ; tuer le seul processus fils laisserait
/// ce petit-fils écrire dans le répertoire de staging.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) n'accède à aucune mémoire du processus courant
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        debug!(pgid, "Fetcher process group killed");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Fichiers `<stem>.*` présents, avec leur taille
async fn outputs_for(output_stem: &Path) -> Vec<(PathBuf, u64)> {
    let (Some(dir), Some(name)) = (output_stem.parent(), output_stem.file_name()) else {
        return Vec::new();
    };
    let prefix = format!("{}.", name.to_string_lossy());

    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    found.push((entry.path(), meta.len()));
                }
            }
        }
    }
    found
}

/// Supprime les sorties (partielles ou non) d'une tentative
async fn remove_outputs(output_stem: &Path) -> usize {
    let mut removed = 0;
    for (path, _) in outputs_for(output_stem).await {
        if tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Dernières lignes non vides de stderr
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "no error output".to_string()
    } else {
        tail
    }
}
