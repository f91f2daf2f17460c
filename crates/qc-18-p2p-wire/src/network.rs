//! Network selection by magic bytes.

use std::fmt;
use std::str::FromStr;

use crate::errors::FrameError;

/// The 4-byte prefix identifying which network a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkMagic {
    Mainnet,
    Testnet3,
    Testnet4,
    Scalenet,
    #[default]
    Regtest,
    /// Any other 4-byte prefix, for private networks.
    Custom([u8; 4]),
}

impl NetworkMagic {
    pub fn bytes(&self) -> [u8; 4] {
        match self {
            NetworkMagic::Mainnet => [0xe3, 0xe1, 0xf3, 0xe8],
            NetworkMagic::Testnet3 => [0xf4, 0xe5, 0xf3, 0xf4],
            NetworkMagic::Testnet4 => [0xe2, 0xb7, 0xda, 0xaf],
            NetworkMagic::Scalenet => [0xc3, 0xaf, 0xe1, 0xa2],
            NetworkMagic::Regtest => [0xda, 0xb5, 0xbf, 0xfa],
            NetworkMagic::Custom(bytes) => *bytes,
        }
    }

    pub fn name(&self) -> String {
        match self {
            NetworkMagic::Mainnet => "mainnet".to_string(),
            NetworkMagic::Testnet3 => "testnet3".to_string(),
            NetworkMagic::Testnet4 => "testnet4".to_string(),
            NetworkMagic::Scalenet => "scalenet".to_string(),
            NetworkMagic::Regtest => "regtest".to_string(),
            NetworkMagic::Custom(bytes) => hex::encode(bytes),
        }
    }
}

impl fmt::Display for NetworkMagic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Accepts the network names (`regtest`, `mainnet`, ...) or 8 hex digits.
impl FromStr for NetworkMagic {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(NetworkMagic::Mainnet),
            "testnet3" | "testnet" | "test" => Ok(NetworkMagic::Testnet3),
            "testnet4" => Ok(NetworkMagic::Testnet4),
            "scalenet" => Ok(NetworkMagic::Scalenet),
            "regtest" => Ok(NetworkMagic::Regtest),
            other => {
                let bytes = hex::decode(other)
                    .ok()
                    .and_then(|v| <[u8; 4]>::try_from(v).ok())
                    .ok_or_else(|| FrameError::UnknownNetwork(s.to_string()))?;
                Ok(NetworkMagic::Custom(bytes))
            }
        }
    }
}
