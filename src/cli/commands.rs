use crate::cli::KeyManager;
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use log::info;
use pmcrypto::config::EngineConfig;
use pmcrypto::crypto::{derive_key, PmCrypto};
use pmcrypto::models::DecryptSignedVerify;
use pmcrypto::time_cache::TimeCache;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pmcrypto")]
#[command(about = "pmcrypto - OpenPGP keys, messages and signatures for secure mail")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Passphrase or password for the operation
    #[arg(short, long, env = "PMCRYPTO_PASSPHRASE", hide_env_values = true, global = true)]
    pub passphrase: Option<String>,

    /// Print results as JSON where available
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a passphrase-protected key pair
    GenerateKey {
        /// User name for the user id
        name: String,
        /// Mail domain for the user id
        domain: String,
        /// Key type: x25519 or rsa
        #[arg(short = 't', long, default_value = "x25519")]
        key_type: String,
        /// RSA key size (0 = configured default)
        #[arg(short, long, default_value = "0")]
        bits: usize,
        /// Where to write the private key; the public key goes to <out>.pub
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Describe a public key
    CheckKey {
        /// Key file
        key: PathBuf,
    },
    /// Encrypt a message for a public key, or with --password
    Encrypt {
        /// Recipient public key file
        #[arg(short = 'k', long, required_unless_present = "password")]
        public_key: Option<PathBuf>,
        /// Encrypt with the passphrase as a password instead of a key
        #[arg(long)]
        password: bool,
        /// Private key file to sign with
        #[arg(short, long)]
        sign_with: Option<PathBuf>,
        /// Input file (stdin when omitted)
        input: Option<PathBuf>,
    },
    /// Decrypt a message with a private key, or with --password
    Decrypt {
        /// Private key file
        #[arg(short = 'k', long, required_unless_present = "password")]
        private_key: Option<PathBuf>,
        /// Decrypt with the passphrase as a password
        #[arg(long)]
        password: bool,
        /// Public key file to verify an embedded signature with
        #[arg(long)]
        verify_with: Option<PathBuf>,
        /// Verification time as unix seconds (0 skips expiry checks)
        #[arg(long, default_value = "0")]
        time: i64,
        /// Input file (stdin when omitted)
        input: Option<PathBuf>,
    },
    /// Create a detached signature
    Sign {
        /// Private key file
        #[arg(short = 'k', long)]
        private_key: PathBuf,
        /// Sign as canonical text instead of binary
        #[arg(long)]
        text: bool,
        /// Input file (stdin when omitted)
        input: Option<PathBuf>,
    },
    /// Verify a detached signature
    Verify {
        /// Public key file
        #[arg(short = 'k', long)]
        public_key: PathBuf,
        /// Signature file
        #[arg(short, long)]
        signature: PathBuf,
        /// Verify as canonical text instead of binary
        #[arg(long)]
        text: bool,
        /// Verification time as unix seconds (0 skips expiry checks)
        #[arg(long, default_value = "0")]
        time: i64,
        /// Input file (stdin when omitted)
        input: Option<PathBuf>,
    },
    /// Derive a key from the passphrase with scrypt
    DeriveKey {
        /// Salt as hex
        #[arg(short, long)]
        salt: String,
        /// scrypt cost (power of two)
        #[arg(short = 'n', long, default_value = "32768")]
        cost: u64,
    },
    /// Print random bytes as base64
    RandomToken {
        /// Token size in bytes
        #[arg(short, long, default_value = "32")]
        size: usize,
    },
}

pub struct CliApp {
    engine: PmCrypto,
    passphrase: Option<String>,
    json: bool,
}

impl CliApp {
    pub fn new(passphrase: Option<String>, json: bool) -> Self {
        let engine = PmCrypto::with_config(EngineConfig::from_env(), TimeCache::global());
        engine.update_time(chrono::Utc::now().timestamp());
        Self {
            engine,
            passphrase,
            json,
        }
    }

    fn passphrase(&self) -> Result<&str> {
        self.passphrase
            .as_deref()
            .ok_or_else(|| anyhow!("A passphrase is required: use --passphrase or PMCRYPTO_PASSPHRASE"))
    }

    pub fn generate_key(&self, name: &str, domain: &str, key_type: &str, bits: usize, out: &PathBuf) -> Result<()> {
        info!("Generating {} key for {}@{}", key_type, name, domain);
        let armored = self
            .engine
            .generate_key(name, domain, self.passphrase()?, key_type, bits)
            .context("Key generation failed")?;
        KeyManager::save_keypair(out, &armored)?;
        println!("Key written to {}", out.display());
        Ok(())
    }

    pub fn check_key(&self, key: &PathBuf) -> Result<()> {
        let armored = KeyManager::load_armored_key(key)?;
        println!("{}", self.engine.check_key(&armored));
        Ok(())
    }

    pub fn encrypt(
        &self,
        public_key: Option<&PathBuf>,
        password: bool,
        sign_with: Option<&PathBuf>,
        input: Option<&PathBuf>,
    ) -> Result<()> {
        let plain = String::from_utf8(KeyManager::read_input(input.map(PathBuf::as_path))?)
            .context("Input must be UTF-8 text")?;
        let armored = if password {
            self.engine.encrypt_message_with_password(&plain, self.passphrase()?)?
        } else {
            let public_key = public_key.ok_or_else(|| anyhow!("--public-key is required"))?;
            let public = KeyManager::load_key_file(public_key)?;
            let (signer, passphrase) = match sign_with {
                Some(path) => (KeyManager::load_armored_key(path)?, self.passphrase()?.to_string()),
                None => (String::new(), String::new()),
            };
            self.engine
                .encrypt_message_bin_key(&plain, &public, &signer, &passphrase, false)?
        };
        KeyManager::write_output(None, armored.as_bytes())
    }

    pub fn decrypt(
        &self,
        private_key: Option<&PathBuf>,
        password: bool,
        verify_with: Option<&PathBuf>,
        time: i64,
        input: Option<&PathBuf>,
    ) -> Result<()> {
        let encrypted = String::from_utf8(KeyManager::read_input(input.map(PathBuf::as_path))?)
            .context("Encrypted input must be armored text")?;
        if password {
            let plain = self.engine.decrypt_message_with_password(&encrypted, self.passphrase()?)?;
            return KeyManager::write_output(None, plain.as_bytes());
        }

        let private_key = private_key.ok_or_else(|| anyhow!("--private-key is required"))?;
        let private = KeyManager::load_key_file(private_key)?;
        let verifier = match verify_with {
            Some(path) => KeyManager::load_key_file(path)?,
            None => Vec::new(),
        };
        let result: DecryptSignedVerify = self.engine.decrypt_message_verify_bin_key_priv_bin_keys(
            &encrypted,
            &verifier,
            &private,
            self.passphrase()?,
            time,
        )?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            KeyManager::write_output(None, result.plaintext.as_bytes())?;
            if verify_with.is_some() {
                eprintln!("Signature: {}", result.status);
            }
        }
        Ok(())
    }

    pub fn sign(&self, private_key: &PathBuf, text: bool, input: Option<&PathBuf>) -> Result<()> {
        let data = KeyManager::read_input(input.map(PathBuf::as_path))?;
        let key = KeyManager::load_key_file(private_key)?;
        let signature = if text {
            let text = String::from_utf8(data).context("Text input must be UTF-8")?;
            self.engine
                .sign_text_detached_bin_key(&text, &key, self.passphrase()?, true)?
        } else {
            self.engine.sign_bin_detached_bin_key(&data, &key, self.passphrase()?)?
        };
        KeyManager::write_output(None, signature.as_bytes())
    }

    pub fn verify(
        &self,
        public_key: &PathBuf,
        signature: &PathBuf,
        text: bool,
        time: i64,
        input: Option<&PathBuf>,
    ) -> Result<bool> {
        let data = KeyManager::read_input(input.map(PathBuf::as_path))?;
        let key = KeyManager::load_key_file(public_key)?;
        let signature = std::fs::read_to_string(signature)
            .with_context(|| format!("Failed to read signature {}", signature.display()))?;
        let valid = if text {
            let text = String::from_utf8(data).context("Text input must be UTF-8")?;
            self.engine
                .verify_text_sign_detached_bin_key(&signature, &text, &key, time)?
        } else {
            self.engine.verify_bin_sign_detached_bin_key(&signature, &data, &key, time)?
        };
        if self.json {
            println!("{}", serde_json::json!({ "valid": valid }));
        } else {
            println!("{}", if valid { "Signature OK" } else { "Signature INVALID" });
        }
        Ok(valid)
    }

    pub fn derive_key(&self, salt: &str, cost: u64) -> Result<()> {
        let salt = hex::decode(salt).context("Salt must be hex")?;
        let key = derive_key(self.passphrase()?, &salt, cost)?;
        println!("{}", hex::encode(key));
        Ok(())
    }

    pub fn random_token(&self, size: usize) -> Result<()> {
        println!("{}", STANDARD.encode(self.engine.random_token_with(size)?));
        Ok(())
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    let app = CliApp::new(cli.passphrase, cli.json);

    match cli.command {
        Commands::GenerateKey {
            name,
            domain,
            key_type,
            bits,
            out,
        } => {
            app.generate_key(&name, &domain, &key_type, bits, &out)?;
        }

        Commands::CheckKey { key } => {
            app.check_key(&key)?;
        }

        Commands::Encrypt {
            public_key,
            password,
            sign_with,
            input,
        } => {
            app.encrypt(public_key.as_ref(), password, sign_with.as_ref(), input.as_ref())?;
        }

        Commands::Decrypt {
            private_key,
            password,
            verify_with,
            time,
            input,
        } => {
            app.decrypt(private_key.as_ref(), password, verify_with.as_ref(), time, input.as_ref())?;
        }

        Commands::Sign {
            private_key,
            text,
            input,
        } => {
            app.sign(&private_key, text, input.as_ref())?;
        }

        Commands::Verify {
            public_key,
            signature,
            text,
            time,
            input,
        } => {
            if !app.verify(&public_key, &signature, text, time, input.as_ref())? {
                return Err(anyhow!("Signature verification failed"));
            }
        }

        Commands::DeriveKey { salt, cost } => {
            app.derive_key(&salt, cost)?;
        }

        Commands::RandomToken { size } => {
            app.random_token(size)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_encrypt_with_password() {
        let cli = Cli::try_parse_from(["pmcrypto", "encrypt", "--password", "-p", "pw", "msg.txt"]).unwrap();
        match cli.command {
            Commands::Encrypt { password, input, public_key, .. } => {
                assert!(password);
                assert!(public_key.is_none());
                assert_eq!(input, Some(PathBuf::from("msg.txt")));
            }
            _ => panic!("expected encrypt"),
        }
    }

    #[test]
    fn test_encrypt_requires_key_or_password() {
        assert!(Cli::try_parse_from(["pmcrypto", "encrypt", "msg.txt"]).is_err());
    }
}
