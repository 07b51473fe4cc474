//! # Keygen Subcommand
//!
//! Generates an Ed25519 key pair. The seed is printed only on request.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use rwa_ledger::SignerKey;

/// Arguments for the keygen subcommand.
#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Also print the private seed (hex). Handle the output accordingly.
    #[arg(long)]
    pub show_secret: bool,
}

#[derive(Serialize)]
struct KeyOutput {
    public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<String>,
}

/// Generate a key pair and print it.
pub fn run(args: &KeygenArgs, out: &mut dyn std::io::Write) -> Result<()> {
    let key = SignerKey::generate();
    let output = KeyOutput {
        public_key: key.public_key().to_hex(),
        seed: args.show_secret.then(|| key.seed_hex().to_string()),
    };
    crate::emit(out, &output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_json(show_secret: bool) -> serde_json::Value {
        let mut buf = Vec::new();
        run(&KeygenArgs { show_secret }, &mut buf).unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[test]
    fn test_secret_hidden_by_default() {
        let out = run_to_json(false);
        assert_eq!(out["public_key"].as_str().unwrap().len(), 64);
        assert!(out.get("seed").is_none());
    }

    #[test]
    fn test_seed_reproduces_public_key() {
        let out = run_to_json(true);
        let key = SignerKey::from_seed_hex(out["seed"].as_str().unwrap()).unwrap();
        assert_eq!(key.public_key().to_hex(), out["public_key"].as_str().unwrap());
    }
}
