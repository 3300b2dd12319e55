use chain_connector::Connection;
use common::{ChainError, ChainId, ChainResult};
use ethers::prelude::{JsonRpcClient, Middleware, TransactionRequest};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, U256};

/// Intrinsic gas of a plain value transfer.
pub const TRANSFER_GAS: u64 = 21000;
const ZERO_BYTE_GAS: u64 = 4;
const NON_ZERO_BYTE_GAS: u64 = 16;

/// A native-currency transfer that has not been signed yet. Built once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransfer {
    nonce: U256,
    recipient: Address,
    value: U256,
    gas_limit: U256,
    gas_price: U256,
    payload: Bytes,
}

/// Assembles a transfer from the given parts as-is. Bounds are checked separately by
/// [`UnsignedTransfer::validate`].
pub fn build_transfer(
    nonce: U256,
    recipient: Address,
    value: U256,
    gas_limit: U256,
    gas_price: U256,
    payload: Bytes,
) -> UnsignedTransfer {
    UnsignedTransfer {
        nonce,
        recipient,
        value,
        gas_limit,
        gas_price,
        payload,
    }
}

impl UnsignedTransfer {
    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn gas_limit(&self) -> U256 {
        self.gas_limit
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Gas charged before any execution: the base transfer cost plus calldata.
    pub fn intrinsic_gas(&self) -> U256 {
        let zero_bytes = self.payload.iter().filter(|b| **b == 0).count() as u64;
        let non_zero_bytes = self.payload.len() as u64 - zero_bytes;

        U256::from(TRANSFER_GAS)
            + U256::from(zero_bytes) * U256::from(ZERO_BYTE_GAS)
            + U256::from(non_zero_bytes) * U256::from(NON_ZERO_BYTE_GAS)
    }

    /// `value + gas_limit * gas_price`, or `None` when it does not fit in 256 bits.
    pub fn max_cost(&self) -> Option<U256> {
        self.gas_limit
            .checked_mul(self.gas_price)?
            .checked_add(self.value)
    }

    pub fn validate(&self) -> ChainResult<()> {
        if self.gas_limit > U256::from(u64::MAX) {
            return Err(ChainError::InvalidTransfer(format!(
                "Gas limit {} does not fit in 64 bits",
                self.gas_limit
            )));
        }

        let intrinsic_gas = self.intrinsic_gas();
        if self.gas_limit < intrinsic_gas {
            return Err(ChainError::InvalidTransfer(format!(
                "Gas limit {} is below the intrinsic gas {}",
                self.gas_limit, intrinsic_gas
            )));
        }

        if self.max_cost().is_none() {
            return Err(ChainError::InvalidTransfer(
                "Value plus gas_limit * gas_price overflows 256 bits".to_string(),
            ));
        }

        Ok(())
    }

    /// Legacy (EIP-155) transaction request bound to `chain_id`.
    pub fn to_request(&self, chain_id: ChainId) -> TypedTransaction {
        let request = TransactionRequest::new()
            .nonce(self.nonce)
            .to(self.recipient)
            .value(self.value)
            .gas(self.gas_limit)
            .gas_price(self.gas_price)
            .data(self.payload.clone())
            .chain_id(chain_id.as_u64());

        TypedTransaction::Legacy(request)
    }
}

/// Next nonce for `address`, counting transactions still in the mempool.
pub async fn current_nonce<P>(connection: &Connection<P>, address: Address) -> ChainResult<U256>
where
    P: JsonRpcClient,
{
    let nonce = connection
        .request(
            "pending nonce",
            connection
                .provider()?
                .get_transaction_count(address, Some(BlockNumber::Pending.into())),
        )
        .await?;

    log::debug!("Pending nonce for {:?}: {}", address, nonce);

    Ok(nonce)
}

pub async fn suggested_gas_price<P>(connection: &Connection<P>) -> ChainResult<U256>
where
    P: JsonRpcClient,
{
    let gas_price = connection
        .request("gas price", connection.provider()?.get_gas_price())
        .await?;

    log::debug!("Suggested gas price: {} wei", gas_price);

    Ok(gas_price)
}
