use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Command-line client for the tx-relay HTTP API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an intent and wait for its receipt
    Submit {
        /// commit_hash, sponsored_call or reward_claim
        #[arg(long)]
        kind: String,
        #[arg(long)]
        key: String,
        /// Hex payload (0x prefix optional)
        #[arg(long, default_value = "")]
        payload: String,
    },
    /// Issue the reward claim for a won game session
    Claim {
        #[arg(long)]
        session: String,
        #[arg(long)]
        player: String,
        #[arg(long)]
        amount: u64,
    },
    /// Show (and re-check) the receipt for an idempotency key
    Receipt { key: String },
    /// Check relay and ledger health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Submit { kind, key, payload } => {
            client
                .post(format!("{}/v1/intents", base))
                .json(&json!({
                    "kind": kind,
                    "idempotency_key": key,
                    "payload_hex": payload,
                }))
                .send()
                .await?
        }
        Commands::Claim { session, player, amount } => {
            client
                .post(format!("{}/v1/claims/reward", base))
                .json(&json!({
                    "game_session_id": session,
                    "player_address": player,
                    "won": true,
                    "reward_amount": amount,
                }))
                .send()
                .await?
        }
        Commands::Receipt { key } => {
            client
                .get(format!("{}/v1/receipts/{}", base, key))
                .send()
                .await?
        }
        Commands::Health => client.get(format!("{}/health", base)).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }

    if status.is_client_error() || status.is_server_error() {
        eprintln!("Error: relay returned status {}", status);
        std::process::exit(1);
    }
    Ok(())
}
