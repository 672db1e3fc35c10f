use clap::{Args, Subcommand};

use replisync::db::SqliteRepository;
use replisync_core::{
    delete_permanently, delete_softly, AccountEntity, EntityStore, RepositoryError, SyncModel,
};

use super::{confirm, OutputFormat};

#[derive(Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    pub command: AccountSubcommand,
}

#[derive(Subcommand)]
pub enum AccountSubcommand {
    /// Create a new account
    Add {
        /// Account name
        name: String,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Role (can be repeated)
        #[arg(long = "role", value_name = "ROLE")]
        roles: Vec<String>,
    },

    /// List accounts
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include deleted accounts
        #[arg(long)]
        all: bool,
    },

    /// Delete an account
    Delete {
        /// Account sync ID (UUID) or name
        identifier: String,

        /// Remove the row and record a tombstone instead of marking it deleted
        #[arg(long)]
        permanent: bool,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl AccountCommand {
    pub async fn run(&self, repo: &SqliteRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            AccountSubcommand::Add { name, email, roles } => {
                let account = new_account(name, email.as_deref(), roles)?;
                let created = repo.add(account).await?;
                println!("Created account:");
                println!("  {}", created);
                println!("  sync id: {}", created.sync_id());
                Ok(())
            }

            AccountSubcommand::List { format, all } => {
                let accounts = repo.list_accounts(*all).await?;
                if accounts.is_empty() {
                    println!("No accounts found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&accounts)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<24}  EMAIL", "SYNC ID", "NAME");
                        println!("{}", "-".repeat(80));
                        for account in &accounts {
                            let mut name = truncate(&account.name, 24);
                            if account.meta.is_deleted {
                                name = format!("{} (deleted)", name);
                            }
                            println!(
                                "{:<36}  {:<24}  {}",
                                account.sync_id(),
                                name,
                                account.email_address
                            );
                        }
                        println!("\nTotal: {} account(s)", accounts.len());
                    }
                }
                Ok(())
            }

            AccountSubcommand::Delete {
                identifier,
                permanent,
                force,
            } => {
                let account = match repo.find_account(identifier).await? {
                    Some(a) => a,
                    None => return Err(format!("Account not found: {}", identifier).into()),
                };

                if !force && !confirm(&format!("Delete account '{}'?", account.name))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                if *permanent {
                    delete_permanently(repo, &account)
                        .await
                        .map_err(|e| match e {
                            RepositoryError::InUse(_) => format!(
                                "Account '{}' still has addresses; delete them first",
                                account.name
                            ),
                            other => other.to_string(),
                        })?;
                } else {
                    delete_softly(repo, &account).await?;
                }
                println!("Deleted account: {}", account.name);
                Ok(())
            }
        }
    }
}

fn new_account(
    name: &str,
    email: Option<&str>,
    roles: &[String],
) -> Result<AccountEntity, String> {
    if name.trim().is_empty() {
        return Err("Account name cannot be empty".to_string());
    }

    let mut account = AccountEntity::new(name.trim()).with_roles(roles.to_vec());
    if let Some(email) = email {
        account = account.with_email(email.trim());
    }
    Ok(account)
}

pub(super) fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let cut: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        value.to_string()
    }
}
