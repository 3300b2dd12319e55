use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;

/// Network identifier bound into EIP-155 signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const MAINNET: ChainId = ChainId(1);
    pub const SEPOLIA: ChainId = ChainId(11155111);

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl FromStr for ChainId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(ChainId::MAINNET),
            "sepolia" => Ok(ChainId::SEPOLIA),
            other => other
                .parse::<u64>()
                .map(ChainId)
                .map_err(|_| anyhow!("Invalid chain id: {}", s)),
        }
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ChainId::MAINNET => write!(f, "1 (mainnet)"),
            ChainId::SEPOLIA => write!(f, "11155111 (sepolia)"),
            ChainId(id) => write!(f, "{}", id),
        }
    }
}
