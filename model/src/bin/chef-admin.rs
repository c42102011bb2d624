use anyhow::Error;
use chef_model::{init_logging, store};
use clap::{Parser, Subcommand};

/// Administer the AI chef bot's storage.
#[derive(Parser)]
struct Options {
    #[clap(flatten)]
    store: store::Options,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a promo code worth some days of premium access.
    CreatePromo {
        /// The code users type after /promo. Codes are case-insensitive.
        code: String,

        /// Days of premium granted by each activation.
        #[clap(long, default_value = "7")]
        days: i64,

        /// How many times the code can be activated.
        #[clap(long, default_value = "1")]
        limit: i64,
    },
    /// Activate a promo code on behalf of a user.
    Activate { user_id: i64, code: String },
    /// Print usage statistics as JSON.
    Stats,
    /// List the most recently created users.
    Users {
        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
    /// Find users by ID or username.
    Search {
        query: String,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
    /// Clear the conversations of inactive users.
    Cleanup {
        /// Clear sessions not updated in this many days.
        #[clap(long, default_value = "180")]
        days: i64,
    },
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    init_logging();

    let opt = Options::parse();
    let store = opt.store.connect()?;
    match opt.command {
        Command::CreatePromo { code, days, limit } => {
            let promo = store::create_promo_code(&*store, &code, days, limit).await?;
            println!("{}", serde_json::to_string_pretty(&promo)?);
        }
        Command::Activate { user_id, code } => {
            let activation = store::activate_promo(&*store, user_id, &code).await?;
            println!("{activation:?}");
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats().await?)?);
        }
        Command::Users { limit } => {
            let users = store.users(limit).await?;
            println!("{}", serde_json::to_string_pretty(&users)?);
        }
        Command::Search { query, limit } => {
            let users = store.search_users(&query, limit).await?;
            println!("{}", serde_json::to_string_pretty(&users)?);
        }
        Command::Cleanup { days } => store::cleanup_old_data(&*store, days).await?,
    }
    Ok(())
}
