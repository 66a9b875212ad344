//! Configuration hashing for change detection.
//!
//! File digests back the idempotency checks of the file-writing steps; the
//! configuration hash is recorded with every run so the run log shows which
//! configuration a run converged to.

use sha2::{Digest, Sha256};

use super::render::{render_app_config, render_service_unit};
use super::spec::ProvisionConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of everything the run would write or create.
    ///
    /// This hash changes when any rendered file, package, path or custom
    /// step changes. Every field and list is length-prefixed, so moving
    /// bytes across a field boundary changes the hash.
    #[must_use]
    pub fn hash_config(&self, config: &ProvisionConfig) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, render_app_config(config).as_bytes());
        field(&mut hasher, render_service_unit(config).as_bytes());

        // Packages (sorted for determinism)
        let mut packages: Vec<_> = config.packages.system.iter().collect();
        packages.sort();
        list(&mut hasher, &packages);
        field(&mut hasher, config.packages.database.as_bytes());

        field(&mut hasher, config.app.repository.as_bytes());
        field(&mut hasher, config.app.branch.as_bytes());
        field(&mut hasher, config.app.home.as_os_str().as_encoded_bytes());
        field(&mut hasher, config.app.venv_dir.as_os_str().as_encoded_bytes());

        // Custom steps keep declaration order, which is significant
        length(&mut hasher, config.custom_steps.len());
        for step in &config.custom_steps {
            field(&mut hasher, step.id.as_bytes());
            list(&mut hasher, &step.requires);
            list(&mut hasher, &step.check);
            length(&mut hasher, step.apply.len());
            for command in &step.apply {
                list(&mut hasher, command);
            }
            field(&mut hasher, step.run_as.as_deref().unwrap_or_default().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the digest used to compare file contents on the host.
    #[must_use]
    pub fn digest(&self, content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }
}

fn length(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn field(hasher: &mut Sha256, bytes: &[u8]) {
    length(hasher, bytes.len());
    hasher.update(bytes);
}

fn list<S: AsRef<str>>(hasher: &mut Sha256, items: &[S]) {
    length(hasher, items.len());
    for item in items {
        field(hasher, item.as_ref().as_bytes());
    }
}
