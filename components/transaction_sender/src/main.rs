use std::process::ExitCode;

use chain_connector::Connection;
use common::utils::format_extra_data;
use common::ChainError;
use config::Config;
use ethers::utils::{format_ether, to_checksum};
use key_resolver::key_pair_from_hex;
use transaction_sender::{
    make_eth_transfer_with_retries, RetryPolicy, TransferContext, TransferRequest,
};

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ChainError>() {
                Some(chain_error) => log::error!("{:?}: {}", chain_error.disposition(), e),
                None => log::error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::new_from_env()?;
    let request = TransferRequest::from_config(&config)?;
    let policy = RetryPolicy::from_config(&config);
    let key_pair = key_pair_from_hex(&config.sender_private_key)?;

    let mut connection = Connection::open(&config.http_rpc_url, config.rpc_timeout()).await?;
    let result =
        make_eth_transfer_with_retries(&connection, &key_pair, &request, policy, report_context)
            .await;
    connection.close();

    let outcome = result?;
    if outcome.submitted {
        println!("Transaction {:?}", outcome.signed.identifier());
    } else {
        println!(
            "Transaction {:?} signed, not submitted (dry run)",
            outcome.signed.identifier()
        );
    }

    Ok(())
}

fn report_context(context: &TransferContext) {
    let block = &context.block;
    println!("Block {}", block.height());
    println!("  hash:         {:?}", block.hash());
    match block.timestamp_utc() {
        Some(utc) => println!("  timestamp:    {} ({})", block.timestamp(), utc.to_rfc3339()),
        None => println!("  timestamp:    {}", block.timestamp()),
    }
    println!("  difficulty:   {}", block.difficulty());
    println!("  extra data:   {}", format_extra_data(block.extra_data()));
    println!("  transactions: {}", block.transaction_count());

    println!("Sender {}", to_checksum(&context.sender, None));
    println!("  balance:      {} ETH", format_ether(context.sender_balance));
}
