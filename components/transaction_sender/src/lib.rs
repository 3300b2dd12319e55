pub mod transfer;

use chain_connector::Connection;
use common::{ChainError, ChainId, ChainResult};
use ethers::providers::{JsonRpcClient, Middleware, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, TxHash, H256};
use key_resolver::KeyPair;
use log::{info, warn};
use transaction::UnsignedTransfer;

pub use transfer::{
    broadcast, make_eth_transfer, make_eth_transfer_with_retries, prepare_transfer,
    read_chain_state, retrying, RetryPolicy, TransferContext, TransferOutcome, TransferRequest,
};

/// A transfer signed for one network. Immutable; the identifier is the keccak hash of the signed
/// RLP encoding, i.e. the hash the network will know it by.
#[derive(Clone, Debug)]
pub struct SignedTransfer {
    transfer: UnsignedTransfer,
    chain_id: ChainId,
    signature: Signature,
    raw: Bytes,
    hash: TxHash,
}

impl SignedTransfer {
    pub fn transfer(&self) -> &UnsignedTransfer {
        &self.transfer
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Signed RLP encoding, as broadcast.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn identifier(&self) -> TxHash {
        self.hash
    }

    /// EIP-155 signing hash the signature commits to.
    pub fn sighash(&self) -> H256 {
        self.request().sighash()
    }

    pub fn recover_signer(&self) -> ChainResult<Address> {
        self.signature
            .recover(self.sighash())
            .map_err(|e| ChainError::Signing(e.to_string()))
    }

    /// True when the signature was produced by the key behind `address`.
    pub fn verify(&self, address: Address) -> bool {
        self.signature.verify(self.sighash(), address).is_ok()
    }

    fn request(&self) -> TypedTransaction {
        self.transfer.to_request(self.chain_id)
    }
}

/// Signs `transfer` for `chain_id` (legacy transaction, EIP-155 replay protection).
pub fn sign(
    transfer: &UnsignedTransfer,
    chain_id: ChainId,
    key_pair: &KeyPair,
) -> ChainResult<SignedTransfer> {
    let request = transfer.to_request(chain_id);
    let signature = key_pair.sign_transaction(&request)?;

    let raw = request.rlp_signed(&signature);
    let hash = request.hash(&signature);

    Ok(SignedTransfer {
        transfer: transfer.clone(),
        chain_id,
        signature,
        raw,
        hash,
    })
}

pub fn identifier_of(signed: &SignedTransfer) -> TxHash {
    signed.identifier()
}

/// Broadcasts a signed transfer. Returns once the node has accepted it into its pool; no
/// confirmation is awaited.
pub async fn submit<P>(connection: &Connection<P>, signed: &SignedTransfer) -> ChainResult<()>
where
    P: JsonRpcClient,
{
    if signed.chain_id() != connection.network_chain_id() {
        return Err(ChainError::ChainMismatch {
            expected: connection.network_chain_id().as_u64(),
            actual: signed.chain_id().as_u64(),
        });
    }

    let provider = connection.provider()?;
    let pending = connection
        .with_timeout(
            "send raw transaction",
            provider.send_raw_transaction(signed.raw().clone()),
        )
        .await?
        .map_err(|e| match RpcError::as_error_response(&e) {
            // the node looked at the transaction and said no
            Some(rpc) => ChainError::Submission(format!("{} (code {})", rpc.message, rpc.code)),
            None => ChainError::Network(format!(
                "send raw transaction: {}",
                connection.scrub(&e)
            )),
        })?;

    if pending.tx_hash() != signed.identifier() {
        warn!(
            "Node reported hash {:?} for transaction {:?}",
            pending.tx_hash(),
            signed.identifier()
        );
    }

    info!(
        "Submitted transaction {:?} (nonce {})",
        signed.identifier(),
        signed.transfer().nonce()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{JsonRpcError, MockProvider, MockResponse, Provider};
    use ethers::types::U256;
    use ethers::utils::{hex, keccak256};
    use key_resolver::key_pair_from_hex;
    use std::time::Duration;
    use transaction::build_transfer;

    // Well-known test private key (Anvil's first account)
    const TEST_PRIVATE_KEY: &str =
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn recipient() -> Address {
        "0x4592d8f8d7b001e72cb26a73e4fa1806a51ac79d".parse().unwrap()
    }

    fn one_ether_transfer() -> UnsignedTransfer {
        build_transfer(
            U256::zero(),
            recipient(),
            U256::exp10(18),
            U256::from(21000),
            U256::from(20_000_000_000u64),
            Bytes::default(),
        )
    }

    async fn connect(chain_id: u64) -> (Connection<MockProvider>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        mock.push::<U256, _>(U256::from(chain_id)).unwrap();
        let connection =
            Connection::open_with(provider, "http://localhost:8545", Duration::from_secs(5))
                .await
                .unwrap();
        (connection, mock)
    }

    #[test]
    fn it_signs_deterministically() {
        let key_pair = key_pair_from_hex(TEST_PRIVATE_KEY).unwrap();

        let signed = sign(&one_ether_transfer(), ChainId::SEPOLIA, &key_pair).unwrap();
        assert_eq!(
            format!("{:?}", identifier_of(&signed)),
            "0x3e4e29d43ce684652c7bd66afc7077fa90029c4a5017531bf54bc9c4df09698c"
        );
        assert_eq!(
            hex::encode(signed.raw()),
            "f870808504a817c800825208944592d8f8d7b001e72cb26a73e4fa1806a51ac79d880de0b6b3a7640000808401546d72a0e016de3293ab734ceec4258576ab387a1f44af3a061fe6c3eceac822fbfcf15fa06fdf179d8a140a88f9c92017f12d4b1ffb733e4bd6f7d6bdf7d96e9097ebbefb"
        );
        assert_eq!(signed.signature().v, 22310258);

        let again = sign(&one_ether_transfer(), ChainId::SEPOLIA, &key_pair).unwrap();
        assert_eq!(identifier_of(&again), identifier_of(&signed));
        assert_eq!(again.raw(), signed.raw());
    }

    #[test]
    fn the_chain_id_is_part_of_the_signature() {
        let key_pair = key_pair_from_hex(TEST_PRIVATE_KEY).unwrap();

        let mainnet = sign(&one_ether_transfer(), ChainId::MAINNET, &key_pair).unwrap();
        assert_eq!(
            format!("{:?}", mainnet.identifier()),
            "0x8f4524ccce8c5174789ed8d2a246bd992d06132c173e7a1e5b9ef227f20fb5d7"
        );
        assert_eq!(mainnet.signature().v, 37);

        let sepolia = sign(&one_ether_transfer(), ChainId::SEPOLIA, &key_pair).unwrap();
        assert_ne!(mainnet.identifier(), sepolia.identifier());
    }

    #[test]
    fn it_matches_the_eip155_example() {
        let key_pair = key_pair_from_hex(&"46".repeat(32)).unwrap();
        let transfer = build_transfer(
            U256::from(9),
            Address::from_slice(&[0x35; 20]),
            U256::exp10(18),
            U256::from(21000),
            U256::from(20_000_000_000u64),
            Bytes::default(),
        );

        let signed = sign(&transfer, ChainId::MAINNET, &key_pair).unwrap();

        assert_eq!(
            hex::encode(signed.sighash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
        assert_eq!(
            hex::encode(signed.raw()),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
        assert_eq!(
            format!("{:?}", signed.identifier()),
            "0x33469b22e9f636356c4160a87eb19df52b7412e8eac32a4a55ffe88ea8350788"
        );
        assert_eq!(signed.identifier(), H256::from(keccak256(signed.raw())));
    }

    #[test]
    fn signatures_verify_against_the_signer() {
        let key_pair = key_pair_from_hex(TEST_PRIVATE_KEY).unwrap();
        let other = key_pair_from_hex(&"46".repeat(32)).unwrap();

        let cases = [
            (0u64, Vec::<u8>::new()),
            (5, vec![0xde, 0xad]),
            (1 << 40, vec![0; 64]),
        ];
        for (nonce, payload) in cases {
            let transfer = build_transfer(
                U256::from(nonce),
                recipient(),
                U256::from(12345),
                U256::from(100_000),
                U256::from(7),
                Bytes::from(payload),
            );
            let signed = sign(&transfer, ChainId::SEPOLIA, &key_pair).unwrap();

            assert!(signed.verify(key_pair.address()));
            assert!(!signed.verify(other.address()));
            assert_eq!(signed.recover_signer().unwrap(), key_pair.address());
        }
    }

    #[tokio::test]
    async fn it_submits_to_the_matching_network() {
        let key_pair = key_pair_from_hex(TEST_PRIVATE_KEY).unwrap();
        let signed = sign(&one_ether_transfer(), ChainId::SEPOLIA, &key_pair).unwrap();

        let (connection, mock) = connect(11155111).await;
        mock.push::<H256, _>(signed.identifier()).unwrap();

        submit(&connection, &signed).await.unwrap();
    }

    #[tokio::test]
    async fn it_refuses_to_submit_to_another_network() {
        let key_pair = key_pair_from_hex(TEST_PRIVATE_KEY).unwrap();
        let signed = sign(&one_ether_transfer(), ChainId::MAINNET, &key_pair).unwrap();

        let (connection, _mock) = connect(11155111).await;

        let result = submit(&connection, &signed).await;
        assert!(matches!(
            result,
            Err(ChainError::ChainMismatch {
                expected: 11155111,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn node_rejections_are_submission_errors() {
        let key_pair = key_pair_from_hex(TEST_PRIVATE_KEY).unwrap();
        let signed = sign(&one_ether_transfer(), ChainId::SEPOLIA, &key_pair).unwrap();

        let (connection, mock) = connect(11155111).await;
        mock.push_response(MockResponse::Error(JsonRpcError {
            code: -32000,
            message: "insufficient funds for gas * price + value".to_string(),
            data: None,
        }));

        let result = submit(&connection, &signed).await;
        assert!(matches!(
            result,
            Err(ChainError::Submission(msg)) if msg.contains("insufficient funds")
        ));
    }

    #[tokio::test]
    async fn transport_failures_are_network_errors() {
        let key_pair = key_pair_from_hex(TEST_PRIVATE_KEY).unwrap();
        let signed = sign(&one_ether_transfer(), ChainId::SEPOLIA, &key_pair).unwrap();

        let (mut connection, _mock) = connect(11155111).await;

        // no recorded answer
        assert!(matches!(
            submit(&connection, &signed).await,
            Err(ChainError::Network(_))
        ));

        connection.close();
        assert!(matches!(
            submit(&connection, &signed).await,
            Err(ChainError::Connection(_))
        ));
    }
}
