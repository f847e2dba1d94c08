//! Settlement Service Binary
//!
//! Runs the withdrawal settlement service over simulated collaborators.
//!
//! Usage:
//!   settlement run
//!   settlement deposit <owner> <asset> <amount>
//!   settlement request <owner> <asset> <amount>
//!   settlement settle <request_id>
//!   settlement fulfill <owner> <request_id>
//!   settlement status
//!   settlement requests <owner>

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use lrvault::{
    logging, AccessTable, Asset, MemorySettlementStore, SettlementService, SettlementStore,
    SimulatedCustodian, SimulatedRestaking, SimulatedValuation, SqliteSettlementStore,
    StoreBackend, VaultConfig, PRICE_SCALE,
};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "run" => cmd_run().await,
        "deposit" => cmd_deposit(&args[2..]).await,
        "request" => cmd_request(&args[2..]).await,
        "settle" => cmd_settle(&args[2..]).await,
        "fulfill" => cmd_fulfill(&args[2..]).await,
        "status" => cmd_status().await,
        "requests" => cmd_requests(&args[2..]).await,
        "help" | "--help" | "-h" => print_usage(),
        _ => print_usage(),
    }
}

fn print_usage() {
    println!("lrvault Settlement Service - Withdrawal Settlement Processor");
    println!();
    println!("Usage:");
    println!("  settlement run                              Run service loop");
    println!("  settlement deposit <owner> <asset> <amount> Deposit into the liquid pool");
    println!("  settlement request <owner> <asset> <amount> Submit a withdrawal request");
    println!("  settlement settle <request_id>              Settle fully from the liquid pool");
    println!("  settlement fulfill <owner> <request_id>     Pay out a fulfillable request");
    println!("  settlement status                           Show service status");
    println!("  settlement requests <owner>                 List an owner's requests");
    println!();
    println!("Examples:");
    println!("  settlement deposit alice tokA 1000");
    println!("  settlement request alice tokA 250");
    println!();
    println!("Environment:");
    println!("  LRVAULT_OPERATOR              Operator account id (default: operator)");
    println!("  LRVAULT_ASSETS                Comma-separated asset ids (default: tokA)");
    println!("  LRVAULT_WITHDRAWAL_DELAY_SECS Fulfillment delay (default: 14 days)");
    println!("  LRVAULT_STORE                 History store: memory or sqlite");
    println!("  LRVAULT_DB_PATH               SQLite path (required for sqlite)");
}

struct Cli {
    service: SettlementService,
    custodian: SimulatedCustodian,
    operator: String,
}

async fn build() -> Cli {
    let config = match VaultConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }

    let store: Arc<dyn SettlementStore> = match config.store_backend {
        StoreBackend::Memory => Arc::new(MemorySettlementStore::new()),
        StoreBackend::Sqlite => {
            let path = config.db_path.clone().unwrap_or_default();
            match SqliteSettlementStore::new(&path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    eprintln!("Storage error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let operator = env::var("LRVAULT_OPERATOR").unwrap_or_else(|_| "operator".to_string());
    let custodian = SimulatedCustodian::new();
    let staking = SimulatedRestaking::new(custodian.clone());

    let service = SettlementService::new(
        config,
        AccessTable::single_operator(operator.clone()),
        Arc::new(SimulatedValuation::new()),
        Arc::new(staking),
        Arc::new(custodian.clone()),
        store,
    );

    let assets = env::var("LRVAULT_ASSETS").unwrap_or_else(|_| "tokA".to_string());
    for asset in assets.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        if let Err(e) = service
            .register_asset(&operator, Asset::new(asset, 6, PRICE_SCALE, 500))
            .await
        {
            eprintln!("Warning: could not register {}: {}", asset, e);
        }
    }

    Cli { service, custodian, operator }
}

async fn cmd_run() {
    let cli = build().await;

    println!("=== lrvault Settlement Service ===");
    println!();
    println!("Operator: {}", cli.operator);
    for asset in cli.service.assets().await {
        println!("Asset: {} ({} decimals)", asset.id, asset.decimals);
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    cli.service.run().await;
}

async fn cmd_deposit(args: &[String]) {
    if args.len() < 3 {
        println!("Usage: settlement deposit <owner> <asset> <amount>");
        return;
    }

    let (owner, asset) = (&args[0], &args[1]);
    let amount: u64 = match args[2].parse() {
        Ok(a) => a,
        Err(_) => {
            println!("Error: Invalid amount");
            return;
        }
    };

    let cli = build().await;
    cli.custodian.fund_account(owner, asset, amount).await;

    match cli.service.deposit(owner, asset, amount).await {
        Ok(()) => {
            let balances = cli.service.pool_balances(asset).await.unwrap_or_default();
            println!("Deposit accepted!");
            println!("  Owner: {}", owner);
            println!("  Asset: {}", asset);
            println!("  Liquid pool: {}", balances.liquid);
        }
        Err(e) => println!("Error: {}", e),
    }
}

async fn cmd_request(args: &[String]) {
    if args.len() < 3 {
        println!("Usage: settlement request <owner> <asset> <amount>");
        return;
    }

    let (owner, asset) = (&args[0], &args[1]);
    let amount: u64 = match args[2].parse() {
        Ok(a) => a,
        Err(_) => {
            println!("Error: Invalid amount");
            return;
        }
    };

    let cli = build().await;

    match cli
        .service
        .request_withdrawal(owner, vec![asset.clone()], vec![amount], amount)
        .await
    {
        Ok(id) => {
            println!("Withdrawal request submitted!");
            println!("  ID: {}", id);
            println!("  Asset: {} x {}", asset, amount);
            println!();
            println!("Use 'settlement settle {}' to settle it from the liquid pool.", id);
        }
        Err(e) => println!("Error: {}", e),
    }
}

async fn cmd_settle(args: &[String]) {
    if args.is_empty() {
        println!("Usage: settlement settle <request_id>");
        return;
    }

    let id = &args[0];
    let cli = build().await;

    let request = match cli.service.request(id).await {
        Some(request) => request,
        None => {
            println!("Error: Request not found: {}", id);
            return;
        }
    };

    let liquid_draws: HashMap<String, u64> = request
        .assets
        .iter()
        .cloned()
        .zip(request.amounts.iter().copied())
        .collect();

    match cli
        .service
        .settle_withdrawals(&cli.operator, &[id.clone()], liquid_draws, vec![])
        .await
    {
        Ok(None) => {
            println!("Settled fully from the liquid pool.");
            println!("The request is fulfillable once the withdrawal delay elapses.");
        }
        Ok(Some(redemption_id)) => {
            println!("Redemption created: {}", redemption_id);
            println!("Complete it once every external receipt has arrived.");
        }
        Err(e) => println!("Error: {}", e),
    }
}

async fn cmd_fulfill(args: &[String]) {
    if args.len() < 2 {
        println!("Usage: settlement fulfill <owner> <request_id>");
        return;
    }

    let (owner, id) = (&args[0], &args[1]);
    let cli = build().await;

    match cli.service.fulfill_withdrawal(owner, id).await {
        Ok(()) => {
            println!("Withdrawal fulfilled!");
            println!("  Request: {}", id);
            println!("  Owner: {}", owner);
        }
        Err(e) => println!("Error: {}", e),
    }
}

async fn cmd_status() {
    let cli = build().await;

    println!("=== Settlement Service Status ===");
    println!();
    println!("Operator: {}", cli.operator);
    println!();

    let stats = cli.service.stats().await;
    println!("Statistics:");
    println!("  {}", stats);
    println!();

    println!("Pools:");
    for asset in cli.service.assets().await {
        let balances = cli.service.pool_balances(&asset.id).await.unwrap_or_default();
        let staked = cli.service.staked_balance(&asset.id).await.unwrap_or(0);
        println!(
            "  {}: liquid {} | queued {} | staked {}",
            asset.id, balances.liquid, balances.queued, staked
        );
    }
}

async fn cmd_requests(args: &[String]) {
    let cli = build().await;

    let owner = match args.first() {
        Some(owner) => owner,
        None => {
            println!("Usage: settlement requests <owner>");
            return;
        }
    };
    let requests = cli.service.pending_requests(owner).await;

    if requests.is_empty() {
        println!("No withdrawal requests.");
        println!();
        println!("Use 'settlement request ...' to submit one.");
        return;
    }

    println!("=== Withdrawal Requests ({}) ===", requests.len());
    println!();

    for request in requests {
        println!("---");
        println!("ID: {}", request.id);
        println!("Owner: {}", request.owner);
        for (asset, (requested, withdrawable)) in request
            .assets
            .iter()
            .zip(request.amounts.iter().zip(&request.withdrawable))
        {
            println!("  {}: requested {} | withdrawable {}", asset, requested, withdrawable);
        }
        println!("Fulfillable: {}", request.can_fulfill);
        println!();
    }
}
