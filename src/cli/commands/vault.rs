//! `converge vault`: manage encrypted files and values

use super::CommandContext;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use converge::vault::{Vault, VaultSecret};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Clone)]
pub struct VaultArgs {
    #[command(subcommand)]
    pub action: VaultAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum VaultAction {
    /// Encrypt a file in place, or into --out-file
    Encrypt(RewriteArgs),

    /// Decrypt a file in place, or into --out-file
    Decrypt(RewriteArgs),

    /// Print a file's plaintext
    View { file: PathBuf },

    /// Encrypt one value as a `!vault` block for a vars file
    EncryptString {
        value: String,

        /// Emit `<name>: !vault |` instead of a bare tag
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RewriteArgs {
    pub file: PathBuf,

    /// Write here and leave the source file untouched
    #[arg(short, long)]
    pub out_file: Option<PathBuf>,
}

impl RewriteArgs {
    fn destination(&self) -> &Path {
        self.out_file.as_deref().unwrap_or(&self.file)
    }
}

impl VaultArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let vault = ctx.vault()?.context(
            "no vault password file: pass --vault-password-file or set vault.password_file",
        )?;

        match &self.action {
            VaultAction::Encrypt(args) => {
                let plaintext = read(&args.file)?;
                if VaultSecret::is_vault(&plaintext) {
                    ctx.output
                        .warning(&format!("{} is already encrypted", args.file.display()));
                    return Ok(0);
                }
                write(args.destination(), &vault.encrypt(&plaintext)?)?;
                ctx.output
                    .info(&format!("Encrypted {}", args.destination().display()));
            }
            VaultAction::Decrypt(args) => {
                let blob = read(&args.file)?;
                if !VaultSecret::is_vault(&blob) {
                    ctx.output
                        .warning(&format!("{} is not encrypted", args.file.display()));
                    return Ok(0);
                }
                write(args.destination(), &vault.decrypt(&blob)?)?;
                ctx.output
                    .info(&format!("Decrypted {}", args.destination().display()));
            }
            VaultAction::View { file } => {
                let content = read(file)?;
                let plaintext = if VaultSecret::is_vault(&content) {
                    vault.decrypt(&content)?
                } else {
                    content
                };
                print!("{}", plaintext);
            }
            VaultAction::EncryptString { value, name } => {
                println!("{}", tagged_block(&vault, value, name.as_deref())?);
            }
        }
        Ok(0)
    }
}

/// A YAML `!vault` literal block holding `value`, optionally keyed
fn tagged_block(vault: &Vault, value: &str, name: Option<&str>) -> Result<String> {
    let blob = vault.encrypt(value)?;
    let mut block = match name {
        Some(name) => format!("{}: !vault |", name),
        None => "!vault |".to_string(),
    };
    for line in blob.lines() {
        block.push_str("\n  ");
        block.push_str(line);
    }
    Ok(block)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn write(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_tagged_block_loads_back() {
        let vault = Vault::new("k");
        let block = tagged_block(&vault, "s3cret", Some("token")).unwrap();
        assert!(block.starts_with("token: !vault |\n  $CONVERGE_VAULT;"));

        let vars: IndexMap<String, serde_yaml::Value> = serde_yaml::from_str(&block).unwrap();
        let serde_yaml::Value::Tagged(tagged) = &vars["token"] else {
            panic!("expected a tagged value, got {:?}", vars["token"]);
        };
        let blob = tagged.value.as_str().unwrap();
        assert_eq!(vault.decrypt(blob).unwrap(), "s3cret");
    }

    #[test]
    fn test_destination_defaults_to_source() {
        let args = RewriteArgs {
            file: PathBuf::from("secrets.yml"),
            out_file: None,
        };
        assert_eq!(args.destination(), Path::new("secrets.yml"));
    }
}
