use clap::{Parser, Subcommand};

/// guestkey: guest access codes, validation and signed webhooks
#[derive(Parser)]
#[command(name = "guestkey", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the service (health, readiness and metrics endpoints plus
    /// background webhook workers)
    Serve {
        /// Port to bind; defaults to GUESTKEY_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Hash an access code in the stored `pbkdf2$...` format
    HashCode {
        code: String,
        /// Override GUESTKEY_CODE_HASH_ITERATIONS
        #[arg(long)]
        iterations: Option<u32>,
    },

    /// Check an access code against a stored hash
    VerifyCode { code: String, hash: String },

    /// Compute the X-Webhook-Signature for a payload
    Sign {
        #[arg(long, env = "GUESTKEY_WEBHOOK_SECRET")]
        secret: String,
        /// Unix seconds; defaults to now
        #[arg(long)]
        timestamp: Option<i64>,
        /// Raw request body
        #[arg(long)]
        body: String,
    },
}
