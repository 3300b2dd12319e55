use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use block_reader::{get_block, BlockSummary};
use chain_connector::Connection;
use common::utils::{parse_hex_bytes, parse_u256};
use common::{ChainError, ChainId, ChainResult};
use config::Config;
use ethers::providers::JsonRpcClient;
use ethers::types::{Address, Bytes, U256};
use key_resolver::{address_of, KeyPair};
use log::{info, warn};
use transaction::{build_transfer, current_nonce, suggested_gas_price};

use crate::{sign, submit, SignedTransfer};

/// What to send, parsed from configuration.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    /// Block to read and report before transferring.
    pub block_number: u64,
    pub recipient: Address,
    pub value: U256,
    pub gas_limit: U256,
    pub payload: Bytes,
    pub expected_chain_id: Option<ChainId>,
    /// Sign but do not broadcast.
    pub dry_run: bool,
}

impl TransferRequest {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let recipient: Address = config
            .recipient_address
            .trim()
            .parse()
            .context("RECIPIENT_ADDRESS is not a valid address")?;
        let value = parse_u256(&config.transfer_amount_wei)
            .context("TRANSFER_AMOUNT_WEI is not a valid amount")?;
        let payload =
            parse_hex_bytes(&config.transfer_data).context("TRANSFER_DATA is not valid hex")?;

        Ok(Self {
            block_number: config.block_number,
            recipient,
            value,
            gas_limit: U256::from(config.gas_limit),
            payload,
            expected_chain_id: config.expected_chain_id.map(ChainId),
            dry_run: config.dry_run,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

/// Chain state read before the transfer is built.
#[derive(Clone, Debug)]
pub struct TransferContext {
    pub block: BlockSummary,
    pub sender: Address,
    /// Sender balance before the transfer, in wei.
    pub sender_balance: U256,
}

#[derive(Clone, Debug)]
pub struct TransferOutcome {
    pub context: TransferContext,
    pub signed: SignedTransfer,
    pub submitted: bool,
}

/// Checks the network, reads the requested block and the sender's balance.
pub async fn read_chain_state<P>(
    connection: &Connection<P>,
    key_pair: &KeyPair,
    request: &TransferRequest,
) -> ChainResult<TransferContext>
where
    P: JsonRpcClient,
{
    if let Some(expected) = request.expected_chain_id {
        connection.verify_chain_id(expected)?;
    }

    let block = get_block(connection, request.block_number).await?;
    info!(
        "Block {} has {} transactions",
        block.height(),
        block.transaction_count()
    );

    let sender = address_of(key_pair);
    let sender_balance = connection.balance_of(sender).await?;

    Ok(TransferContext {
        block,
        sender,
        sender_balance,
    })
}

/// Quotes nonce and gas price, then builds, checks and signs the transfer. Nothing is broadcast.
pub async fn prepare_transfer<P>(
    connection: &Connection<P>,
    key_pair: &KeyPair,
    request: &TransferRequest,
) -> ChainResult<SignedTransfer>
where
    P: JsonRpcClient,
{
    let sender = address_of(key_pair);
    let nonce = current_nonce(connection, sender).await?;
    let gas_price = suggested_gas_price(connection).await?;

    let transfer = build_transfer(
        nonce,
        request.recipient,
        request.value,
        request.gas_limit,
        gas_price,
        request.payload.clone(),
    );
    transfer.validate()?;

    let chain_id = connection.chain_identifier().await?;
    if chain_id != connection.network_chain_id() {
        return Err(ChainError::ChainMismatch {
            expected: connection.network_chain_id().as_u64(),
            actual: chain_id.as_u64(),
        });
    }

    let signed = sign(&transfer, chain_id, key_pair)?;
    info!(
        "Signed transfer of {} wei from {:?} to {:?} (nonce {}, gas price {})",
        transfer.value(),
        sender,
        transfer.recipient(),
        nonce,
        gas_price
    );

    Ok(signed)
}

/// One attempt of the whole flow. Any failure ends it.
pub async fn make_eth_transfer<P>(
    connection: &Connection<P>,
    key_pair: &KeyPair,
    request: &TransferRequest,
) -> ChainResult<TransferOutcome>
where
    P: JsonRpcClient,
{
    let context = read_chain_state(connection, key_pair, request).await?;
    let signed = prepare_transfer(connection, key_pair, request).await?;

    let submitted = if request.dry_run {
        info!("Dry run, not submitting {:?}", signed.identifier());
        false
    } else {
        submit(connection, &signed).await?;
        true
    };

    Ok(TransferOutcome {
        context,
        signed,
        submitted,
    })
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or the policy runs out.
/// Only for steps that have no effect on the chain.
pub async fn retrying<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut attempt: F,
) -> ChainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChainResult<T>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(e) if e.is_transient() && tries < policy.max_attempts => {
                warn!(
                    "{}: attempt {}/{} failed: {}; retrying in {:?}",
                    what, tries, policy.max_attempts, e, policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                tries += 1;
            }
            result => return result,
        }
    }
}

/// Submits `signed`, resending the same signed bytes after a transport failure. The node may
/// have accepted an attempt whose answer got lost, so the transfer is never rebuilt here: a
/// resend carries the same nonce and hash, and a node that already has it says so.
pub async fn broadcast<P>(
    connection: &Connection<P>,
    signed: &SignedTransfer,
    policy: RetryPolicy,
) -> ChainResult<()>
where
    P: JsonRpcClient,
{
    let mut tries = 1;
    loop {
        match submit(connection, signed).await {
            Ok(()) => return Ok(()),
            Err(ChainError::Submission(message)) if tries > 1 && is_already_known(&message) => {
                info!(
                    "Node already has transaction {:?} from an earlier attempt",
                    signed.identifier()
                );
                return Ok(());
            }
            Err(e) if e.is_transient() && tries < policy.max_attempts => {
                warn!(
                    "Broadcast attempt {}/{} of {:?} failed: {}; resending in {:?}",
                    tries,
                    policy.max_attempts,
                    signed.identifier(),
                    e,
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_lowercase();
    ["already known", "known transaction", "alreadyknown", "already imported"]
        .iter()
        .any(|marker| message.contains(marker))
}

/// The whole flow under `policy`. Reads and signing are retried from scratch (fresh nonce and gas
/// quote); once the transfer is signed only that exact transaction is ever sent. `on_context`
/// sees the block and sender as soon as they are known, before anything can be rejected.
pub async fn make_eth_transfer_with_retries<P, F>(
    connection: &Connection<P>,
    key_pair: &KeyPair,
    request: &TransferRequest,
    policy: RetryPolicy,
    on_context: F,
) -> ChainResult<TransferOutcome>
where
    P: JsonRpcClient,
    F: FnOnce(&TransferContext),
{
    let context = retrying(policy, "read chain state", || {
        read_chain_state(connection, key_pair, request)
    })
    .await?;
    on_context(&context);

    let signed = retrying(policy, "prepare transfer", || {
        prepare_transfer(connection, key_pair, request)
    })
    .await?;

    let submitted = if request.dry_run {
        info!("Dry run, not submitting {:?}", signed.identifier());
        false
    } else {
        broadcast(connection, &signed, policy).await?;
        true
    };

    Ok(TransferOutcome {
        context,
        signed,
        submitted,
    })
}
