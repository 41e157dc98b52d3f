use std::path::PathBuf;
use std::sync::Arc;
use clap::{Parser, Subcommand};
use objvault::{token, JsonFilePersister, Keyed, Vault};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(author, version, about = "Inspect and edit a file-backed object vault", long_about = None)]
struct Cli {
    #[arg(short, long, env = "VAULT_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[arg(short, long, env = "VAULT_FILE", default_value = "vault.json")]
    file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    Put {
        name: String,
        #[arg(short, long, default_value_t = 0)]
        rank: i64,
    },
    Get { key: String },
    Find { name: String },
    List,
    Count,
}

#[derive(Serialize, Deserialize, Debug)]
struct Record {
    key: String,
    name: String,
    rank: i64,
}

impl Keyed for Record {
    fn key(&self) -> &str {
        &self.key
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut vault: Vault<Record> = Vault::new();
    vault.register(Arc::new(JsonFilePersister::new(cli.data_dir.join(&cli.file))?));
    vault.load().await?;

    match cli.command {
        Commands::Put { name, rank } => {
            let record = Record { key: token::token(), name, rank };
            let key = record.key.clone();
            vault.put([record]).await?;
            vault.persist().await?;
            println!("{}", key);
        }
        Commands::Get { key } => {
            let record = vault.get(&key).await?;
            println!("{}", serde_json::to_string_pretty(record.as_ref())?);
        }
        Commands::Find { name } => {
            let found = vault.filter(|r| r.name == name).await;
            let records: Vec<&Record> = found.values().map(|r| r.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::List => {
            let mut keys = vault.keys().await;
            keys.sort();
            for key in keys {
                let record = vault.get(&key).await?;
                println!("{}\t{}\t{}", key, record.name, record.rank);
            }
        }
        Commands::Count => {
            println!("{}", vault.size().await);
        }
    }

    Ok(())
}
