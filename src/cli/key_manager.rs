//! CLI key management - reads key files and inputs, writes generated keys

use anyhow::{anyhow, Context, Result};
use pmcrypto::crypto::pgp::{Key, KeyRing};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Handles key files and data streams at the CLI level
pub struct KeyManager;

impl KeyManager {
    /// Load a key file (armored or binary) and make sure it parses
    pub fn load_key_file(path: &Path) -> Result<Vec<u8>> {
        let data = fs::read(path).with_context(|| format!("Failed to read key file {}", path.display()))?;
        let ring = KeyRing::parse(&data).with_context(|| format!("Invalid key file {}", path.display()))?;
        log::debug!("Loaded {} key(s) from {}", ring.len(), path.display());
        Ok(data)
    }

    /// Load a key file and return it as armored text
    pub fn load_armored_key(path: &Path) -> Result<String> {
        let data = Self::load_key_file(path)?;
        String::from_utf8(data).map_err(|_| anyhow!("Key file {} is not armored text", path.display()))
    }

    /// Write an armored private key and its public half next to it (`<path>.pub`)
    pub fn save_keypair(path: &Path, armored_private: &str) -> Result<()> {
        let key = Key::parse(armored_private.as_bytes()).context("Generated key does not parse")?;
        fs::write(path, armored_private).with_context(|| format!("Failed to write {}", path.display()))?;
        restrict_permissions(path)?;

        let public_path = path.with_extension("pub");
        fs::write(&public_path, key.armor_public())
            .with_context(|| format!("Failed to write {}", public_path.display()))?;
        log::info!(
            "Saved key {} to {} and {}",
            key.key_id(),
            path.display(),
            public_path.display()
        );
        Ok(())
    }

    /// Read input from a file, or stdin when no path (or `-`) is given
    pub fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
        match path {
            Some(p) if p != Path::new("-") => {
                fs::read(p).with_context(|| format!("Failed to read input {}", p.display()))
            }
            _ => {
                let mut buf = Vec::new();
                io::stdin().read_to_end(&mut buf).context("Failed to read stdin")?;
                Ok(buf)
            }
        }
    }

    /// Write output to a file, or stdout when no path is given
    pub fn write_output(path: Option<&Path>, data: &[u8]) -> Result<()> {
        match path {
            Some(p) => fs::write(p, data).with_context(|| format!("Failed to write {}", p.display())),
            None => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(data)?;
                stdout.flush()?;
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmcrypto::crypto::PmCrypto;

    #[test]
    fn test_save_and_load_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.asc");
        let armored = PmCrypto::new()
            .generate_key("alice", "example.com", "pw", "x25519", 0)
            .unwrap();

        KeyManager::save_keypair(&path, &armored).unwrap();
        let private = KeyManager::load_armored_key(&path).unwrap();
        assert_eq!(private, armored);

        let public = KeyManager::load_key_file(&path.with_extension("pub")).unwrap();
        assert!(!Key::parse(&public).unwrap().is_private());
    }

    #[test]
    fn test_invalid_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.asc");
        fs::write(&path, b"not a key").unwrap();
        assert!(KeyManager::load_key_file(&path).is_err());
    }

    #[test]
    fn test_read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        fs::write(&path, b"data").unwrap();
        assert_eq!(KeyManager::read_input(Some(&path)).unwrap(), b"data");
    }
}
