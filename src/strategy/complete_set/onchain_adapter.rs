//! Live `OnChainClient` backed by a real Polygon RPC connection.
//!
//! Grounded in `strategy/claimer.rs`'s `alloy::sol!` ERC-1155/CTFExchange
//! binding (balance reads, `redeemPositions`) and `cli/pm/ctf.rs`'s use of
//! `polymarket_client_sdk::ctf::Client` for merge/redeem against a signed
//! provider. `current_gas_price_gwei` reads the provider's gas oracle
//! directly rather than going through either SDK.

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{address, Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::{PloyError, Result};

use super::exchange::{OnChainClient, SettlementReceipt};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface ICTFExchange {
        function redeemPositions(
            bytes32 parentCollectionId,
            bytes32 conditionId,
            uint256[] calldata indexSets
        ) external;

        function balanceOf(address account, uint256 id) external view returns (uint256);

        function isApprovedForAll(address account, address operator) external view returns (bool);

        function setApprovalForAll(address operator, bool approved) external;
    }
}

const CTF_EXCHANGE_POLYGON: Address = address!("4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E");
const NEG_RISK_CTF_EXCHANGE_POLYGON: Address = address!("C5d563A36AE78145C45a50134d48A1215220f80a");
const CTF_POLYGON: Address = address!("4D97DCd97eC945f40cF65F87097ACe5EA0476045");

fn polymarket_usdc_address(chain_id: u64) -> Address {
    match chain_id {
        80002 => address!("9c4e1703476e875070ee25b56a58b008cfb8fa78"),
        _ => address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
    }
}

fn exchange_address(neg_risk: bool) -> Address {
    if neg_risk {
        NEG_RISK_CTF_EXCHANGE_POLYGON
    } else {
        CTF_EXCHANGE_POLYGON
    }
}

fn decimal_to_usdc_u256(amount: Decimal) -> Result<U256> {
    let scaled = (amount * Decimal::from(1_000_000u64)).round();
    let raw: u64 = scaled
        .try_into()
        .map_err(|_| PloyError::Internal(format!("amount {} out of range for USDC U256", amount)))?;
    Ok(U256::from(raw))
}

fn parse_condition_id(condition_id: &str) -> Result<B256> {
    B256::from_str(condition_id)
        .map_err(|e| PloyError::Internal(format!("invalid condition_id {}: {}", condition_id, e)))
}

/// Wraps a signed `alloy` provider connected to Polygon, per
/// `SPEC_FULL.md` §6/§4.7's on-chain surface: ERC-1155 balance reads,
/// approval management, and CTF/NegRisk merge+redeem. Generic over the
/// provider type the same way `cli/pm/ctf.rs`'s `build_signer_provider`
/// leaves it opaque (`impl Provider + Clone`) rather than naming the
/// filler-stack type the builder produces.
pub struct LiveOnChainClient<P> {
    provider: P,
    owner: Address,
    chain_id: u64,
}

/// Connects a signer-backed provider to `rpc_url` for `chain_id`.
pub async fn connect(
    rpc_url: &str,
    private_key: &str,
    chain_id: u64,
) -> Result<LiveOnChainClient<impl Provider + Clone>> {
    let signer: PrivateKeySigner = private_key
        .parse()
        .map_err(|e| PloyError::Wallet(format!("invalid private key: {}", e)))?;
    let owner = signer.address();
    let wallet = EthereumWallet::from(signer);

    let url = rpc_url
        .parse()
        .map_err(|e| PloyError::Internal(format!("invalid rpc_url {}: {}", rpc_url, e)))?;
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

    Ok(LiveOnChainClient {
        provider,
        owner,
        chain_id,
    })
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> OnChainClient for LiveOnChainClient<P> {
    async fn current_gas_price_gwei(&self) -> Result<Decimal> {
        let wei = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| PloyError::Internal(format!("failed to fetch gas price: {}", e)))?;
        Ok(Decimal::from(wei) / Decimal::from(1_000_000_000u64))
    }

    async fn erc1155_balance(&self, token_id: &str) -> Result<Decimal> {
        let id = U256::from_str(token_id)
            .map_err(|e| PloyError::Internal(format!("invalid token_id {}: {}", token_id, e)))?;
        let contract = ICTFExchange::new(CTF_POLYGON, self.provider.clone());
        let raw = contract
            .balanceOf(self.owner, id)
            .call()
            .await
            .map_err(|e| PloyError::Internal(format!("balanceOf failed: {}", e)))?;
        let scaled: u64 = raw
            .try_into()
            .map_err(|_| PloyError::Internal("erc1155 balance overflowed u64".to_string()))?;
        Ok(Decimal::from(scaled) / Decimal::from(1_000_000u64))
    }

    async fn is_approved_for_all(&self, neg_risk: bool) -> Result<bool> {
        let operator = exchange_address(neg_risk);
        let contract = ICTFExchange::new(CTF_POLYGON, self.provider.clone());
        contract
            .isApprovedForAll(self.owner, operator)
            .call()
            .await
            .map_err(|e| PloyError::Internal(format!("isApprovedForAll failed: {}", e)))
    }

    async fn set_approval_for_all(&self, neg_risk: bool) -> Result<SettlementReceipt> {
        let operator = exchange_address(neg_risk);
        let contract = ICTFExchange::new(CTF_POLYGON, self.provider.clone());
        let pending = contract
            .setApprovalForAll(operator, true)
            .send()
            .await
            .map_err(|e| PloyError::OrderSubmission(format!("setApprovalForAll failed: {}", e)))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| PloyError::MissingReceipt(format!("approval tx: {}", e)))?;
        Ok(SettlementReceipt {
            tx_hash: format!("{:?}", receipt.transaction_hash),
            confirmed_at: Utc::now(),
        })
    }

    async fn merge_positions(
        &self,
        condition_id: &str,
        _neg_risk: bool,
        amount: Decimal,
    ) -> Result<SettlementReceipt> {
        // NegRisk markets merge through the same CTF contract as standard
        // ones; the adapter only matters for redemption routing.
        let cond_id = parse_condition_id(condition_id)?;
        let usdc_amount = decimal_to_usdc_u256(amount)?;
        let collateral = polymarket_usdc_address(self.chain_id);

        let ctf = polymarket_client_sdk::ctf::Client::new(self.provider.clone(), self.chain_id)
            .map_err(|e| PloyError::Internal(format!("ctf client init failed: {}", e)))?;
        let req = polymarket_client_sdk::ctf::types::MergePositionsRequest::for_binary_market(
            collateral, cond_id, usdc_amount,
        );
        let resp = ctf
            .merge_positions(&req)
            .await
            .map_err(|e| PloyError::OrderSubmission(format!("merge_positions failed: {}", e)))?;
        Ok(SettlementReceipt {
            tx_hash: format!("{}", resp.transaction_hash),
            confirmed_at: Utc::now(),
        })
    }

    async fn redeem_positions(
        &self,
        condition_id: &str,
        neg_risk: bool,
        _amount: Decimal,
    ) -> Result<SettlementReceipt> {
        let cond_id = parse_condition_id(condition_id)?;

        if neg_risk {
            let ctf = polymarket_client_sdk::ctf::Client::with_neg_risk(self.provider.clone(), self.chain_id)
                .map_err(|e| PloyError::Internal(format!("ctf client init failed: {}", e)))?;
            let req = polymarket_client_sdk::ctf::types::RedeemNegRiskRequest::builder()
                .condition_id(cond_id)
                .amounts(vec![U256::MAX, U256::MAX])
                .build();
            let resp = ctf
                .redeem_neg_risk(&req)
                .await
                .map_err(|e| PloyError::OrderSubmission(format!("redeem_neg_risk failed: {}", e)))?;
            return Ok(SettlementReceipt {
                tx_hash: format!("{}", resp.transaction_hash),
                confirmed_at: Utc::now(),
            });
        }

        let collateral = polymarket_usdc_address(self.chain_id);
        let ctf = polymarket_client_sdk::ctf::Client::new(self.provider.clone(), self.chain_id)
            .map_err(|e| PloyError::Internal(format!("ctf client init failed: {}", e)))?;
        let req = polymarket_client_sdk::ctf::types::RedeemPositionsRequest::for_binary_market(
            collateral, cond_id,
        );
        let resp = ctf
            .redeem_positions(&req)
            .await
            .map_err(|e| PloyError::OrderSubmission(format!("redeem_positions failed: {}", e)))?;
        Ok(SettlementReceipt {
            tx_hash: format!("{}", resp.transaction_hash),
            confirmed_at: Utc::now(),
        })
    }
}
