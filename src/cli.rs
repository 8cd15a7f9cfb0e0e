use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use betduel::config::Settings;
use betduel::gateway::HttpGateway;
use betduel::ledger::TestLedger;
use betduel::market::Market;
use betduel::provider::{SigningProvider, StaticProvider};
use betduel::token::TestToken;
use betduel::types::{
    format_token_amount, parse_token_amount, Address, NewPrediction, Prediction, PredictionId,
    PredictionOption,
};
use betduel::wallet::SIMULATED_ADDRESS;

#[derive(Parser)]
#[command(name = "betduel", about = "1v1 prediction betting against a remote ledger")]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Run against an in-memory ledger with a preloaded identity instead of
    /// the configured gateway.
    #[arg(long)]
    simulated: bool,
    /// Signing address the provider exposes. Required unless --simulated.
    #[arg(short, long)]
    address: Option<Address>,
}

#[derive(Subcommand)]
enum Commands {
    /// List open predictions
    Predictions {
        #[arg(short, long, default_value_t = 0)]
        offset: u64,
    },
    /// List matched predictions awaiting resolution (admin view)
    Matched,
    /// List predictions you take part in
    Mine,
    /// Show one prediction in full
    Show {
        #[arg(short, long)]
        id: PredictionId,
    },
    /// Show the connected identity and its balances
    Balance,
    Create {
        #[arg(short, long)]
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long)]
        option_a: String,
        #[arg(long)]
        option_b: String,
        /// Stake in whole tokens, e.g. "12.5"
        #[arg(long)]
        amount: String,
        /// Side to take: "a" or "b"
        #[arg(short, long)]
        choice: PredictionOption,
        /// Hours until expiry; must be one of the offered durations
        #[arg(short, long, default_value_t = 24)]
        expires_in: i64,
    },
    /// Join an open prediction on the opposite side
    Join {
        #[arg(short, long)]
        id: PredictionId,
    },
    /// Settle a matched prediction (admin only)
    Resolve {
        #[arg(short, long)]
        id: PredictionId,
        /// Winning side: "a" or "b"
        #[arg(short, long)]
        winner: PredictionOption,
    },
    Claim {
        #[arg(short, long)]
        id: PredictionId,
    },
    Cancel {
        #[arg(short, long)]
        id: PredictionId,
    },
    /// Unwind a matched prediction and return both stakes (admin only)
    Refund {
        #[arg(short, long)]
        id: PredictionId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = Settings::load()?;
    let Some(network) = settings.network().cloned() else {
        bail!("network \"{}\" is not configured", settings.network);
    };

    let market = if args.simulated {
        let identity = Address::new(SIMULATED_ADDRESS);
        let ledger = Arc::new(TestLedger::new(identity.clone()));
        let token = Arc::new(TestToken::default());
        token.credit(identity.clone(), 10_000_000_000);
        ledger.impersonate(identity.clone());
        token.impersonate(identity);
        let market = Market::new(settings, None, ledger, token)?;
        market.connect_simulated().await;
        market
    } else {
        let Some(address) = args.address else {
            bail!("--address is required unless --simulated is set");
        };
        let gateway = Arc::new(HttpGateway::new(network.gateway_url.clone()));
        let provider = Arc::new(StaticProvider::new(address)) as Arc<dyn SigningProvider>;
        let market = Market::new(settings, Some(provider), gateway.clone(), gateway)?;
        market.connect_real().await?;
        // Commands below read the privilege flag; wait for it to be current.
        market.session().refresh_balances().await;
        market
    };

    match args.command {
        Commands::Predictions { offset } => {
            market.repository().refresh_open(offset).await?;
            let open = market.repository().open().await;
            if open.is_empty() {
                println!("No open predictions.");
            }
            for prediction in &open {
                print_summary(prediction);
            }
        }
        Commands::Matched => {
            if market.session().is_admin().await {
                market.repository().refresh_matched(0).await?;
                for prediction in &market.repository().matched().await {
                    print_summary(prediction);
                }
            } else {
                println!("The matched view needs the admin identity.");
            }
        }
        Commands::Mine => {
            for prediction in &market.repository().owned().await {
                print_summary(prediction);
            }
        }
        Commands::Show { id } => {
            let prediction = market.get_prediction(id).await?;
            print_full(&prediction);
            println!(
                "Payout after fee: {}",
                format_token_amount(market.net_payout_for(&prediction).await)
            );
        }
        Commands::Balance => {
            let state = market.session().state().await;
            match state.address {
                Some(address) => println!("Connected as {}", address),
                None => println!("Not connected"),
            }
            println!("Native balance: {}", state.native_balance);
            println!("Token balance: {}", format_token_amount(state.token_balance));
            if state.is_admin {
                println!("This identity holds admin privilege.");
            }
        }
        Commands::Create {
            title,
            description,
            option_a,
            option_b,
            amount,
            choice,
            expires_in,
        } => {
            let bet_amount = parse_token_amount(&amount)?;
            let expiry_time = market
                .settings()
                .expiry_from_hours(expires_in, Utc::now().timestamp())?;
            let hash = market
                .create_prediction(NewPrediction {
                    title,
                    description,
                    option_a,
                    option_b,
                    bet_amount,
                    creator_choice: choice,
                    expiry_time,
                })
                .await?;
            println!("Created: {}", network.transaction_url(&hash));
        }
        Commands::Join { id } => {
            let hash = market.join_prediction(id).await?;
            println!("Joined: {}", network.transaction_url(&hash));
        }
        Commands::Resolve { id, winner } => {
            let hash = market.resolve_prediction(id, winner).await?;
            println!("Resolved: {}", network.transaction_url(&hash));
        }
        Commands::Claim { id } => {
            let hash = market.claim_winnings(id).await?;
            println!("Claimed: {}", network.transaction_url(&hash));
        }
        Commands::Cancel { id } => {
            let hash = market.cancel_prediction(id).await?;
            println!("Cancelled: {}", network.transaction_url(&hash));
        }
        Commands::Refund { id } => {
            let hash = market.emergency_refund(id).await?;
            println!("Refunded: {}", network.transaction_url(&hash));
        }
    }
    market.disconnect().await;
    Ok(())
}

fn print_summary(prediction: &Prediction) {
    println!(
        "#{} [{}] {} | {} vs {} | stake {} | by {}",
        prediction.id,
        prediction.status,
        prediction.title,
        prediction.option_a,
        prediction.option_b,
        format_token_amount(prediction.bet_amount),
        prediction.creator.short(),
    );
}

fn print_full(prediction: &Prediction) {
    println!("#{} {}", prediction.id, prediction.title);
    if !prediction.description.is_empty() {
        println!("{}", prediction.description);
    }
    println!("Status: {}", prediction.status);
    println!(
        "A: {} (creator: {})",
        prediction.option_a,
        prediction.creator.short()
    );
    match &prediction.opponent {
        Some(opponent) => println!("B: {} (opponent: {})", prediction.option_b, opponent.short()),
        None => println!("B: {} (unclaimed)", prediction.option_b),
    }
    println!("Creator picked: {}", prediction.creator_choice);
    println!("Stake: {}", format_token_amount(prediction.bet_amount));
    if prediction.winning_option != PredictionOption::None {
        println!("Winning side: {}", prediction.winning_option);
    }
    println!("Expires at: {}", prediction.expiry_time);
}
