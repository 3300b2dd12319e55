use chain_connector::Connection;
use chrono::{DateTime, Utc};
use common::{ChainError, ChainResult};
use ethers::providers::{JsonRpcClient, Middleware};
use ethers::types::{Block, BlockNumber, Bytes, TxHash, H256, U256, U64};
use log::debug;

/// Snapshot of a block's metadata as returned by the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    height: u64,
    hash: H256,
    timestamp: u64,
    difficulty: U256,
    extra_data: Bytes,
    transaction_count: usize,
}

impl BlockSummary {
    /// Validates a node's answer for `height`. Pending blocks (no hash) and answers for another
    /// height are malformed.
    pub fn from_block(height: u64, block: Block<TxHash>) -> ChainResult<Self> {
        let number = block
            .number
            .ok_or_else(|| ChainError::Network(format!("Block {} has no number", height)))?;
        if number != U64::from(height) {
            return Err(ChainError::Network(format!(
                "Asked for block {}, node answered with block {}",
                height, number
            )));
        }

        let hash = block
            .hash
            .ok_or_else(|| ChainError::Network(format!("Block {} has no hash", height)))?;

        if block.timestamp > U256::from(u64::MAX) {
            return Err(ChainError::Network(format!(
                "Block {} timestamp {} out of range",
                height, block.timestamp
            )));
        }

        Ok(Self {
            height,
            hash,
            timestamp: block.timestamp.as_u64(),
            difficulty: block.difficulty,
            extra_data: block.extra_data,
            transaction_count: block.transactions.len(),
        })
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.timestamp).ok()?, 0)
    }

    /// Zero on proof-of-stake networks.
    pub fn difficulty(&self) -> U256 {
        self.difficulty
    }

    pub fn extra_data(&self) -> &Bytes {
        &self.extra_data
    }

    pub fn transaction_count(&self) -> usize {
        self.transaction_count
    }
}

/// Fetches the block at `height`. Every call goes to the node; nothing is cached.
pub async fn get_block<P>(connection: &Connection<P>, height: u64) -> ChainResult<BlockSummary>
where
    P: JsonRpcClient,
{
    let block = connection
        .request(
            "block by number",
            connection
                .provider()?
                .get_block(BlockNumber::Number(U64::from(height))),
        )
        .await?
        .ok_or(ChainError::NotFound(height))?;

    let summary = BlockSummary::from_block(height, block)?;

    debug!(
        "Fetched block {} ({:?}, {} transactions)",
        summary.height, summary.hash, summary.transaction_count
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::{format_extra_data, parse_u256};
    use ethers::providers::{MockProvider, Provider};
    use ethers::utils::rlp::RlpStream;
    use ethers::utils::{hex, keccak256};
    use serde::{de, Deserialize, Deserializer};
    use serde_json::Value;
    use std::time::Duration;

    const RECORDED_BLOCK: &str = include_str!("../tests/fixtures/sepolia_block_5671788.json");

    /// Header fields in hashing order, post-Cancun layout.
    const HEADER_FIELDS: [(&str, bool); 20] = [
        ("parentHash", false),
        ("sha3Uncles", false),
        ("miner", false),
        ("stateRoot", false),
        ("transactionsRoot", false),
        ("receiptsRoot", false),
        ("logsBloom", false),
        ("difficulty", true),
        ("number", true),
        ("gasLimit", true),
        ("gasUsed", true),
        ("timestamp", true),
        ("extraData", false),
        ("mixHash", false),
        ("nonce", false),
        ("baseFeePerGas", true),
        ("withdrawalsRoot", false),
        ("blobGasUsed", true),
        ("excessBlobGas", true),
        ("parentBeaconBlockRoot", false),
    ];

    fn deserialize_u256_from_json_number_or_string<'de, D>(
        deserializer: D,
    ) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => parse_u256(&s).map_err(de::Error::custom),
            Value::Number(n) => U256::from_dec_str(&n.to_string()).map_err(de::Error::custom),
            _ => Err(de::Error::custom("Expected string or number")),
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RecordedBlock {
        height: u64,
        hash: H256,
        timestamp: u64,
        #[serde(deserialize_with = "deserialize_u256_from_json_number_or_string")]
        difficulty: U256,
        transaction_count: usize,
        block: Value,
    }

    /// keccak(rlp(header)), the way a node derives the block hash.
    fn header_hash(block: &Value) -> H256 {
        let mut stream = RlpStream::new_list(HEADER_FIELDS.len());
        for (field, is_quantity) in HEADER_FIELDS {
            let text = block[field]
                .as_str()
                .unwrap_or_else(|| panic!("header field {} missing", field));
            if is_quantity {
                stream.append(&parse_u256(text).unwrap());
            } else {
                stream.append(&hex::decode(text.trim_start_matches("0x")).unwrap());
            }
        }
        H256::from(keccak256(stream.out()))
    }

    fn recorded() -> RecordedBlock {
        serde_json::from_str(RECORDED_BLOCK).unwrap()
    }

    async fn connect() -> (Connection<MockProvider>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        mock.push::<U256, _>(U256::from(11155111u64)).unwrap();
        let connection =
            Connection::open_with(provider, "http://localhost:8545", Duration::from_secs(5))
                .await
                .unwrap();
        (connection, mock)
    }

    #[tokio::test]
    async fn it_returns_the_recorded_block() {
        let fixture = recorded();
        let (connection, mock) = connect().await;
        mock.push::<Value, _>(fixture.block.clone()).unwrap();

        let block = get_block(&connection, 5671788).await.unwrap();

        assert_eq!(block.height(), 5671788);
        assert_eq!(block.height(), fixture.height);
        assert_eq!(block.hash(), fixture.hash);
        assert_eq!(
            format!("{:?}", block.hash()),
            "0x30bd779d2c332184421b3b6628d8f3e0b8cb07edb16a796d2fceb461ab935c97"
        );
        assert_eq!(block.timestamp(), fixture.timestamp);
        assert_eq!(block.difficulty(), fixture.difficulty);
        assert_eq!(block.transaction_count(), fixture.transaction_count);
        assert_eq!(
            format_extra_data(block.extra_data()),
            "0xd883010d0e846765746888676f312e32322e32856c696e7578 (geth go1.22.2 linux)"
        );
        assert_eq!(
            block.timestamp_utc().unwrap().to_rfc3339(),
            "2024-05-06T10:32:08+00:00"
        );
    }

    #[test]
    fn the_fixture_hash_commits_to_its_header() {
        let fixture = recorded();

        assert_eq!(header_hash(&fixture.block), fixture.hash);
        let reported: H256 = fixture.block["hash"].as_str().unwrap().parse().unwrap();
        assert_eq!(reported, fixture.hash);

        // any edited header field breaks the commitment
        let mut tampered = fixture.block.clone();
        tampered["gasUsed"] = Value::String("0x1a2b3d".to_string());
        assert_ne!(header_hash(&tampered), fixture.hash);
    }

    #[tokio::test]
    async fn it_queries_the_node_on_every_call() {
        let fixture = recorded();
        let (connection, mock) = connect().await;
        mock.push::<Value, _>(fixture.block.clone()).unwrap();
        mock.push::<Value, _>(fixture.block.clone()).unwrap();

        let first = get_block(&connection, 5671788).await.unwrap();
        let second = get_block(&connection, 5671788).await.unwrap();
        assert_eq!(first, second);

        // both recorded answers consumed, a third call reaches the (now silent) transport
        assert!(matches!(
            get_block(&connection, 5671788).await,
            Err(ChainError::Network(_))
        ));
    }

    #[tokio::test]
    async fn it_reports_missing_blocks() {
        let (connection, mock) = connect().await;
        mock.push::<Value, _>(Value::Null).unwrap();

        let result = get_block(&connection, 999_999_999).await;
        assert!(matches!(result, Err(ChainError::NotFound(999_999_999))));
    }

    #[tokio::test]
    async fn it_rejects_an_answer_for_another_height() {
        let fixture = recorded();
        let (connection, mock) = connect().await;
        mock.push::<Value, _>(fixture.block).unwrap();

        let result = get_block(&connection, 5671789).await;
        assert!(matches!(result, Err(ChainError::Network(_))));
    }

    #[tokio::test]
    async fn it_rejects_blocks_without_a_hash() {
        let mut block = recorded().block;
        block["hash"] = Value::Null;
        let (connection, mock) = connect().await;
        mock.push::<Value, _>(block).unwrap();

        let result = get_block(&connection, 5671788).await;
        assert!(matches!(result, Err(ChainError::Network(msg)) if msg.contains("no hash")));
    }
}
