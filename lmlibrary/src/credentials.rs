//! Credentials de session pour le catalogue externe
//!
//! Le fichier est fourni une fois pour toutes (flux d'authentification
//! hors de ce serveur). Deux formats sont acceptés :
//!
//! - des lignes `Nom: valeur`, chacune devenant un en-tête HTTP ;
//! - sinon, le contenu entier est la valeur d'un en-tête `Cookie`.
//!
//! Les valeurs ne sont jamais journalisées : `Debug` n'affiche que les noms.

use crate::error::{LibraryError, Result};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Lot de credentials opaque, attaché tel quel aux requêtes du catalogue
#[derive(Clone, Default)]
pub struct SessionCredentials {
    headers: Vec<(String, String)>,
}

impl SessionCredentials {
    /// Credentials vides (catalogue public)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Lit les credentials depuis un fichier
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(LibraryError::io(path))?;
        let credentials = Self::parse(&text)?;
        info!(
            "Loaded session credentials from {} ({} header(s))",
            path.display(),
            credentials.headers.len()
        );
        Ok(credentials)
    }

    /// Interprète le texte d'un fichier de credentials
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();

        if lines.is_empty() {
            return Ok(Self::empty());
        }

        let headers: Option<Vec<(String, String)>> = lines.iter().map(|line| header_line(line)).collect();

        let headers = match headers {
            Some(headers) => headers,
            None => {
                debug!("Credentials file is a raw cookie string");
                vec![("Cookie".to_string(), lines.join("; "))]
            }
        };

        for (name, value) in &headers {
            if value.chars().any(char::is_control) {
                return Err(LibraryError::Credentials(format!(
                    "header {} contains control characters",
                    name
                )));
            }
        }

        Ok(Self { headers })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Noms des en-têtes fournis (sans les valeurs)
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Attache les credentials à une requête
    pub fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("headers", &self.header_names())
            .finish_non_exhaustive()
    }
}

/// `Nom: valeur` avec un nom de jeton HTTP valide
fn header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid_name.then(|| (name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lines() {
        let credentials = SessionCredentials::parse(
            "# session\nCookie: SID=abc; HSID=def\nX-Goog-AuthUser: 0\n",
        )
        .unwrap();
        assert_eq!(credentials.header_names(), vec!["Cookie", "X-Goog-AuthUser"]);
    }

    #[test]
    fn test_raw_cookie_string() {
        let credentials = SessionCredentials::parse("SID=abc; HSID=def; SAPISID=x:y\n").unwrap();
        assert_eq!(credentials.header_names(), vec!["Cookie"]);
        assert_eq!(credentials.headers[0].1, "SID=abc; HSID=def; SAPISID=x:y");
    }

    #[test]
    fn test_empty_file() {
        let credentials = SessionCredentials::parse("\n  \n").unwrap();
        assert!(credentials.is_empty());
    }

    #[test]
    fn test_debug_hides_values() {
        let credentials = SessionCredentials::parse("Cookie: secret-token").unwrap();
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("Cookie"));
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn test_missing_file() {
        let err = SessionCredentials::from_file("/nonexistent/id.txt").unwrap_err();
        assert!(matches!(err, LibraryError::Io { .. }));
    }
}
