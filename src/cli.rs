use clap::{Parser, Subcommand};

/// faregate — journey lifecycle and fare-settlement engine
#[derive(Parser)]
#[command(name = "faregated", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8090")]
        port: u16,
    },

    /// Manage stored-value cards
    Card {
        #[command(subcommand)]
        command: CardCommands,
    },

    /// Inspect stations
    Station {
        #[command(subcommand)]
        command: StationCommands,
    },
}

#[derive(Subcommand)]
pub enum CardCommands {
    /// Issue a new metro card for a rider
    Create {
        #[arg(long)]
        rider_id: String,
        /// Card class: REGULAR, STUDENT, SENIOR_CITIZEN, DISABLED
        #[arg(long, default_value = "REGULAR")]
        class: String,
    },
    /// List a rider's cards
    List {
        #[arg(long)]
        rider_id: String,
    },
    /// Credit a card directly (operator adjustment, bypasses the gateway)
    Credit {
        #[arg(long)]
        card_id: String,
        #[arg(long)]
        amount: String,
    },
}

#[derive(Subcommand)]
pub enum StationCommands {
    /// List active stations
    List,
}
