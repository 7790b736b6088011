//! Reversible masking of sensitive substrings.
//!
//! Users mark secrets inline as `$hidden[secret]`. Before text leaves for the
//! AI provider every marked secret is swapped for a random token (the wrapper
//! is kept so the model treats it as opaque); the provider's output is then
//! unmasked with the same session.

use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;

use crate::defaults::MASK_TOKEN_LEN;
use crate::traits::{MaskSession, Masker};

static HIDDEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$hidden\[(.*?)\]").expect("hidden marker regex"));

#[derive(Debug, Clone)]
struct Substitution {
    /// Original marker, e.g. `$hidden[hunter2]`.
    original: String,
    /// Marker as sent to the provider, e.g. `$hidden[a8Fk2LmQ0z]`.
    masked: String,
    token: String,
}

/// Masking session for `$hidden[...]` markers.
#[derive(Debug, Default)]
pub struct HiddenMarkerSession {
    substitutions: Vec<Substitution>,
}

impl HiddenMarkerSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of secrets masked so far.
    pub fn len(&self) -> usize {
        self.substitutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.substitutions.is_empty()
    }

    fn random_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MASK_TOKEN_LEN)
            .map(char::from)
            .collect()
    }
}

impl MaskSession for HiddenMarkerSession {
    fn mask(&mut self, text: &str) -> String {
        let mut out = text.to_string();
        for caps in HIDDEN_RE.captures_iter(text) {
            let (Some(whole), Some(secret)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if secret.as_str().is_empty() {
                continue;
            }
            let token = Self::random_token();
            let masked = format!("$hidden[{}]", token);
            out = out.replacen(whole.as_str(), &masked, 1);
            self.substitutions.push(Substitution {
                original: whole.as_str().to_string(),
                masked,
                token,
            });
        }
        out
    }

    fn unmask(&self, text: &str) -> String {
        let mut out = text.to_string();
        for sub in &self.substitutions {
            out = out.replace(&sub.masked, &sub.original);
            // The model may drop the wrapper and keep only the token.
            out = out.replace(&sub.token, &sub.original);
        }
        out
    }
}

/// Default masker: one [`HiddenMarkerSession`] per attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddenMarkerMasker;

impl Masker for HiddenMarkerMasker {
    fn session(&self) -> Box<dyn MaskSession> {
        Box::new(HiddenMarkerSession::new())
    }
}

/// Pass-through session for deployments that do not mask.
#[derive(Debug, Default)]
pub struct NoopSession;

impl MaskSession for NoopSession {
    fn mask(&mut self, text: &str) -> String {
        text.to_string()
    }

    fn unmask(&self, text: &str) -> String {
        text.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMasker;

impl Masker for NoopMasker {
    fn session(&self) -> Box<dyn MaskSession> {
        Box::new(NoopSession)
    }
}
