//! Bootstrap a bank directly against the ledger store.
//!
//! Run with: cargo run --bin add_bank -- --username central --password <secret> --admin

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use reserva::auth::Argon2Hasher;
use reserva::handlers::{BankHandler, RegisterBankCommand};
use reserva::store::PgLedgerStore;
use reserva::{Config, OperationContext};

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let username = arg_value(&args, "--username").context("--username is required")?;
    let password = match arg_value(&args, "--password") {
        Some(password) => password,
        None => std::env::var("BANK_PASSWORD")
            .context("--password or BANK_PASSWORD is required")?,
    };
    let admin = args.iter().any(|a| a == "--admin");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await?;
    reserva::db::migrate(&pool).await?;

    let handler = BankHandler::new(
        Arc::new(PgLedgerStore::new(pool.clone())),
        Arc::new(Argon2Hasher::new()),
        config.engine_settings(),
    );

    let mut command = RegisterBankCommand::new(username, password);
    if admin {
        command = command.as_admin();
    }

    let bank = handler
        .register_unchecked(command, &OperationContext::new())
        .await?;

    println!(
        "Registered bank '{}'{}",
        bank.username,
        if bank.admin { " (admin)" } else { "" }
    );

    pool.close().await;
    Ok(())
}
