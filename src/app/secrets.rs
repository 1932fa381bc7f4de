//! Secret registration for values that must never appear in logs
//!
//! Registering a value emits the runner's `::add-mask::` workflow command so
//! the job log masks it, and records it locally so our own log lines can be
//! redacted before they are emitted.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::{Arc, RwLock};

use tracing::debug;

const MASK: &str = "***";

/// Shared registry of secret values
#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    secrets: Arc<RwLock<BTreeSet<String>>>,
    emit_commands: bool,
}

impl SecretMasker {
    /// Create a masker that emits `::add-mask::` commands on stdout
    pub fn new() -> Self {
        Self {
            secrets: Arc::default(),
            emit_commands: true,
        }
    }

    /// Create a masker that only records secrets (no runner commands)
    pub fn silent() -> Self {
        Self::default()
    }

    /// Register a value as secret
    pub fn register(&self, secret: &str) {
        if secret.is_empty() {
            return;
        }

        let inserted = match self.secrets.write() {
            Ok(mut secrets) => secrets.insert(secret.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(secret.to_string()),
        };

        if inserted && self.emit_commands {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            // Newlines would end the workflow command early
            let escaped = secret.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A");
            let _ = writeln!(handle, "::add-mask::{escaped}");
        }

        debug!("Registered secret ({} total)", self.len());
    }

    /// Whether a value has been registered
    pub fn is_registered(&self, secret: &str) -> bool {
        self.read(|secrets| secrets.contains(secret))
    }

    /// Number of registered secrets
    pub fn len(&self) -> usize {
        self.read(BTreeSet::len)
    }

    /// Whether no secret has been registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace every registered secret in `text` with `***`
    pub fn redact(&self, text: &str) -> String {
        self.read(|secrets| {
            // Longest first so a secret containing another is fully masked
            let mut ordered: Vec<&String> = secrets.iter().collect();
            ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));
            ordered
                .into_iter()
                .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
        })
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeSet<String>) -> T) -> T {
        match self.secrets.read() {
            Ok(secrets) => f(&secrets),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}
