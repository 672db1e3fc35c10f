use clap::{Args, Subcommand};
use uuid::Uuid;

use replisync::db::SqliteRepository;
use replisync_core::{delete_permanently, delete_softly, AddressEntity, EntityStore, SyncModel};

use super::account::truncate;
use super::{confirm, OutputFormat};

#[derive(Args)]
pub struct AddressCommand {
    #[command(subcommand)]
    pub command: AddressSubcommand,
}

#[derive(Subcommand)]
pub enum AddressSubcommand {
    /// Add an address to an account
    Add {
        /// Account sync ID (UUID) or name
        account: String,

        /// First address line
        line1: String,

        /// Second address line
        #[arg(long)]
        line2: Option<String>,

        #[arg(long)]
        city: Option<String>,

        /// Postal code
        #[arg(long)]
        postal: Option<String>,

        #[arg(long)]
        state: Option<String>,
    },

    /// List addresses
    List {
        /// Only addresses of this account (sync ID or name)
        #[arg(long)]
        account: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include deleted addresses
        #[arg(long)]
        all: bool,
    },

    /// Delete an address
    Delete {
        /// Address sync ID (UUID)
        sync_id: Uuid,

        /// Remove the row and record a tombstone instead of marking it deleted
        #[arg(long)]
        permanent: bool,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl AddressCommand {
    pub async fn run(&self, repo: &SqliteRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            AddressSubcommand::Add {
                account,
                line1,
                line2,
                city,
                postal,
                state,
            } => {
                if line1.trim().is_empty() {
                    return Err("Address line1 cannot be empty".into());
                }
                let owner = match repo.find_account(account).await? {
                    Some(a) if !a.meta.is_deleted => a,
                    _ => return Err(format!("Account not found: {}", account).into()),
                };

                let mut address = AddressEntity::new(owner.sync_id(), line1.trim());
                if let Some(line2) = line2 {
                    address.line2 = line2.clone();
                }
                if let Some(city) = city {
                    address = address.with_city(city);
                }
                if let Some(postal) = postal {
                    address = address.with_postal(postal);
                }
                if let Some(state) = state {
                    address = address.with_state(state);
                }

                let created = repo.add(address).await?;
                println!("Added address for '{}':", owner.name);
                println!("  {}", created);
                println!("  sync id: {}", created.sync_id());
                Ok(())
            }

            AddressSubcommand::List {
                account,
                format,
                all,
            } => {
                let account_sync_id = match account {
                    Some(key) => match repo.find_account(key).await? {
                        Some(a) => Some(a.sync_id()),
                        None => return Err(format!("Account not found: {}", key).into()),
                    },
                    None => None,
                };

                let addresses = repo.list_addresses(account_sync_id, *all).await?;
                if addresses.is_empty() {
                    println!("No addresses found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&addresses)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<30}  CITY", "SYNC ID", "LINE1");
                        println!("{}", "-".repeat(80));
                        for address in &addresses {
                            let mut line1 = truncate(&address.line1, 30);
                            if address.meta.is_deleted {
                                line1 = format!("{} (deleted)", line1);
                            }
                            println!("{:<36}  {:<30}  {}", address.sync_id(), line1, address.city);
                        }
                        println!("\nTotal: {} address(es)", addresses.len());
                    }
                }
                Ok(())
            }

            AddressSubcommand::Delete {
                sync_id,
                permanent,
                force,
            } => {
                let address = match repo.address(*sync_id).await? {
                    Some(a) => a,
                    None => return Err(format!("Address not found: {}", sync_id).into()),
                };

                if !force && !confirm(&format!("Delete address '{}'?", address.line1))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                if *permanent {
                    delete_permanently(repo, &address).await?;
                } else {
                    delete_softly(repo, &address).await?;
                }
                println!("Deleted address: {}", address.line1);
                Ok(())
            }
        }
    }
}
