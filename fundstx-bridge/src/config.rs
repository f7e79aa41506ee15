//! Configuration for the USDC / USDCx bridge route.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abi::{hex_bytes, ContractPrincipal};
use crate::address::{stacks_version, AccountReference, AddressFamily};
use crate::amount::{MAX_DECIMALS, USDC_DECIMALS};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{DomainId, TransferDirection};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "FUNDSTX_";

/// Placeholder replaced by the transaction id in explorer templates.
pub const TX_PLACEHOLDER: &str = "{tx}";

/// Default bound on a single confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;

/// Sepolia USDC.
const SEPOLIA_USDC: [u8; 20] = [
    0x1c, 0x7d, 0x4b, 0x19, 0x6c, 0xb0, 0xc7, 0xb0, 0x1d, 0x74, 0x3f, 0xbc, 0x61, 0x16, 0xa9,
    0x02, 0x37, 0x9c, 0x72, 0x38,
];

/// Sepolia xReserve.
const SEPOLIA_XRESERVE: [u8; 20] = [
    0x00, 0x88, 0x88, 0x87, 0x8f, 0x94, 0xc0, 0xd8, 0x7d, 0xef, 0xdf, 0x0b, 0x07, 0xf4, 0x6b,
    0x93, 0xc1, 0x93, 0x44, 0x42,
];

/// Deployer of the testnet USDCx contract (ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM).
const TESTNET_USDCX_DEPLOYER: [u8; 20] = [
    0x6d, 0x78, 0xde, 0x7b, 0x06, 0x25, 0xdf, 0xbf, 0xc1, 0x6c, 0x3a, 0x8a, 0x57, 0x35, 0xf6,
    0xdc, 0x3d, 0xc3, 0xf2, 0xce,
];

const TESTNET_USDCX_NAME: &str = "usdcx-v1";

/// Configuration for the bridge route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// USDC token on the source chain.
    pub usdc_token: AccountReference,
    /// xReserve contract on the source chain. Also the approve spender.
    pub xreserve: AccountReference,
    /// USDCx token contract on the destination chain.
    pub usdcx_contract: ContractPrincipal,
    /// Domain deposits mint on.
    pub stacks_domain: DomainId,
    /// Domain withdrawals release on.
    pub ethereum_domain: DomainId,
    /// Token decimal exponent.
    pub token_decimals: u8,
    /// Bound on each confirmation wait, in seconds.
    pub confirmation_timeout_secs: u64,
    /// Maximum relayer fee passed to `depositToRemote`.
    pub max_fee: u128,
    /// Hook payload passed to `depositToRemote`.
    #[serde(with = "hex_bytes", default)]
    pub hook_data: Vec<u8>,
    /// Explorer link template for source-chain transactions.
    pub ethereum_explorer_tx_url: String,
    /// Explorer link template for destination-chain transactions.
    pub stacks_explorer_tx_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::testnet()
    }
}

impl BridgeConfig {
    /// Sepolia / Stacks testnet configuration.
    pub fn testnet() -> Self {
        Self {
            usdc_token: AccountReference::Raw(SEPOLIA_USDC),
            xreserve: AccountReference::Raw(SEPOLIA_XRESERVE),
            usdcx_contract: ContractPrincipal {
                address: AccountReference::Hashed {
                    version: stacks_version::TESTNET_SINGLE_SIG,
                    hash: TESTNET_USDCX_DEPLOYER,
                },
                name: TESTNET_USDCX_NAME.to_string(),
            },
            stacks_domain: DomainId::STACKS,
            ethereum_domain: DomainId::ETHEREUM,
            token_decimals: USDC_DECIMALS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            max_fee: 0,
            hook_data: Vec::new(),
            ethereum_explorer_tx_url: "https://sepolia.etherscan.io/tx/{tx}".to_string(),
            stacks_explorer_tx_url: "https://explorer.hiro.so/txid/{tx}?chain=testnet"
                .to_string(),
        }
    }

    /// Testnet defaults overlaid with `FUNDSTX_*` environment variables.
    pub fn from_env() -> BridgeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Testnet defaults overlaid with values from `lookup`, keyed by full
    /// variable name.
    pub fn from_lookup<F>(lookup: F) -> BridgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::testnet();

        if let Some(v) = var("USDC_TOKEN") {
            config.usdc_token =
                AccountReference::parse_evm(&v).map_err(|e| field_error("USDC_TOKEN", e))?;
        }
        if let Some(v) = var("XRESERVE") {
            config.xreserve =
                AccountReference::parse_evm(&v).map_err(|e| field_error("XRESERVE", e))?;
        }
        if let Some(v) = var("USDCX_CONTRACT") {
            config.usdcx_contract = v.parse().map_err(|e| field_error("USDCX_CONTRACT", e))?;
        }
        if let Some(v) = var("STACKS_DOMAIN") {
            config.stacks_domain = DomainId(parse_number("STACKS_DOMAIN", &v)?);
        }
        if let Some(v) = var("ETHEREUM_DOMAIN") {
            config.ethereum_domain = DomainId(parse_number("ETHEREUM_DOMAIN", &v)?);
        }
        if let Some(v) = var("TOKEN_DECIMALS") {
            config.token_decimals = parse_number("TOKEN_DECIMALS", &v)?;
        }
        if let Some(v) = var("CONFIRMATION_TIMEOUT_SECS") {
            config.confirmation_timeout_secs = parse_number("CONFIRMATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("MAX_FEE") {
            config.max_fee = parse_number("MAX_FEE", &v)?;
        }
        if let Some(v) = var("HOOK_DATA") {
            config.hook_data = hex::decode(v.strip_prefix("0x").unwrap_or(&v))
                .map_err(|e| BridgeError::Config(format!("{}HOOK_DATA: {}", ENV_PREFIX, e)))?;
        }
        if let Some(v) = var("ETHEREUM_EXPLORER_TX_URL") {
            config.ethereum_explorer_tx_url = v;
        }
        if let Some(v) = var("STACKS_EXPLORER_TX_URL") {
            config.stacks_explorer_tx_url = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.stacks_domain.address_family()? != AddressFamily::Stacks {
            return Err(BridgeError::Config(format!(
                "stacks domain {} does not use Stacks addresses",
                self.stacks_domain
            )));
        }
        if self.ethereum_domain.address_family()? != AddressFamily::Evm {
            return Err(BridgeError::Config(format!(
                "ethereum domain {} does not use EVM addresses",
                self.ethereum_domain
            )));
        }
        for (name, reference) in [("usdc_token", &self.usdc_token), ("xreserve", &self.xreserve)] {
            if reference.family() != AddressFamily::Evm {
                return Err(BridgeError::Config(format!(
                    "{} must be an EVM address, got {}",
                    name, reference
                )));
            }
        }
        if self.token_decimals > MAX_DECIMALS {
            return Err(BridgeError::Config(format!(
                "token_decimals {} exceeds {}",
                self.token_decimals, MAX_DECIMALS
            )));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "confirmation_timeout_secs must be positive".into(),
            ));
        }
        for (name, template) in [
            ("ethereum_explorer_tx_url", &self.ethereum_explorer_tx_url),
            ("stacks_explorer_tx_url", &self.stacks_explorer_tx_url),
        ] {
            if !template.contains(TX_PLACEHOLDER) {
                return Err(BridgeError::Config(format!(
                    "{} has no {} placeholder",
                    name, TX_PLACEHOLDER
                )));
            }
        }
        Ok(())
    }

    /// Confirmation timeout as a duration.
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Domain funds arrive on for a direction.
    pub fn domain_for(&self, direction: TransferDirection) -> DomainId {
        match direction {
            TransferDirection::Deposit => self.stacks_domain,
            TransferDirection::Withdraw => self.ethereum_domain,
        }
    }

    /// Explorer link for a transaction submitted by a transfer in the given
    /// direction. Deposits are submitted on Ethereum, withdrawals on Stacks.
    pub fn explorer_tx_url(&self, direction: TransferDirection, tx: &str) -> String {
        let template = match direction {
            TransferDirection::Deposit => &self.ethereum_explorer_tx_url,
            TransferDirection::Withdraw => &self.stacks_explorer_tx_url,
        };
        template.replace(TX_PLACEHOLDER, tx)
    }
}

fn field_error(name: &str, err: BridgeError) -> BridgeError {
    BridgeError::Config(format!("{}{}: {}", ENV_PREFIX, name, err))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> BridgeResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| BridgeError::Config(format!("{}{}={}: {}", ENV_PREFIX, name, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_testnet_constants() {
        let config = BridgeConfig::testnet();
        assert_eq!(
            config.usdc_token,
            AccountReference::parse_evm("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238").unwrap()
        );
        assert_eq!(
            config.xreserve,
            AccountReference::parse_evm("0x008888878f94C0d87defdf0B07f46B93C1934442").unwrap()
        );
        assert_eq!(
            config.usdcx_contract.to_string(),
            "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM.usdcx-v1"
        );
        assert_eq!(config.stacks_domain, DomainId::STACKS);
        assert_eq!(config.token_decimals, 6);
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("FUNDSTX_CONFIRMATION_TIMEOUT_SECS", "45"),
            ("FUNDSTX_MAX_FEE", "250"),
            ("FUNDSTX_HOOK_DATA", "0xdeadbeef"),
            ("FUNDSTX_TOKEN_DECIMALS", " "),
        ]))
        .unwrap();
        assert_eq!(config.confirmation_timeout_secs, 45);
        assert_eq!(config.max_fee, 250);
        assert_eq!(config.hook_data, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(config.token_decimals, 6);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        for (key, value) in [
            ("FUNDSTX_CONFIRMATION_TIMEOUT_SECS", "soon"),
            ("FUNDSTX_CONFIRMATION_TIMEOUT_SECS", "0"),
            ("FUNDSTX_XRESERVE", "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM"),
            ("FUNDSTX_USDCX_CONTRACT", "usdcx-v1"),
            ("FUNDSTX_STACKS_DOMAIN", "0"),
            ("FUNDSTX_ETHEREUM_DOMAIN", "77"),
            ("FUNDSTX_STACKS_EXPLORER_TX_URL", "https://explorer.hiro.so/"),
        ] {
            let err = BridgeConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(
                matches!(err, BridgeError::Config(_) | BridgeError::UnsupportedDomain(_)),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_explorer_links() {
        let config = BridgeConfig::testnet();
        assert_eq!(
            config.explorer_tx_url(TransferDirection::Deposit, "0xabc"),
            "https://sepolia.etherscan.io/tx/0xabc"
        );
        assert_eq!(
            config.explorer_tx_url(TransferDirection::Withdraw, "0xdef"),
            "https://explorer.hiro.so/txid/0xdef?chain=testnet"
        );
    }

    #[test]
    fn test_domain_routes() {
        let config = BridgeConfig::testnet();
        assert_eq!(config.domain_for(TransferDirection::Deposit), DomainId::STACKS);
        assert_eq!(config.domain_for(TransferDirection::Withdraw), DomainId::ETHEREUM);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = BridgeConfig::testnet();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["xreserve"], "0x008888878f94c0d87defdf0b07f46b93c1934442");
        assert_eq!(json["hook_data"], "0x");
        let back: BridgeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
