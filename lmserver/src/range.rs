//! Interprétation de l'en-tête `Range` (une seule plage d'octets)

/// Plage d'octets inclusive, déjà bornée à la taille de l'artefact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Nombre d'octets de la plage (jamais nul)
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Valeur de `Content-Range` pour une réponse 206
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Ce que la requête demande, une fois confrontée à la taille du fichier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Pas d'en-tête, ou en-tête ignoré (malformé, plusieurs plages)
    Full,
    Partial(ByteRange),
    /// Plage hors du fichier : 416
    Unsatisfiable,
}

/// Interprète un en-tête `Range` pour un fichier de `size` octets
///
/// Formes acceptées : `bytes=a-b`, `bytes=a-`, `bytes=-n`. La fin est
/// ramenée à `size - 1`. Les en-têtes malformés ou multi-plages sont
/// ignorés (réponse complète).
pub fn parse_range(header: Option<&str>, size: u64) -> RangeRequest {
    let Some(header) = header else {
        return RangeRequest::Full;
    };
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    match (first.is_empty(), last.is_empty()) {
        // bytes=-n : les n derniers octets
        (true, false) => {
            let Ok(suffix) = last.parse::<u64>() else {
                return RangeRequest::Full;
            };
            if suffix == 0 || size == 0 {
                return RangeRequest::Unsatisfiable;
            }
            RangeRequest::Partial(ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            })
        }
        // bytes=a- ou bytes=a-b
        (false, _) => {
            let Ok(start) = first.parse::<u64>() else {
                return RangeRequest::Full;
            };
            let end = if last.is_empty() {
                u64::MAX
            } else {
                match last.parse::<u64>() {
                    Ok(end) if end >= start => end,
                    _ => return RangeRequest::Full,
                }
            };
            if start >= size {
                return RangeRequest::Unsatisfiable;
            }
            RangeRequest::Partial(ByteRange {
                start,
                end: end.min(size - 1),
            })
        }
        (true, true) => RangeRequest::Full,
    }
}
