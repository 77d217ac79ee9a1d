//! Shared fixture: a three-chain local network with one parent vault on
//! chain 1 and optional children on chains 2 and 3.

#![allow(dead_code)]

use std::sync::Arc;

use crossvault_contracts::{CallContext, LocalNetwork, VaultError};
use crossvault_protocol::config::UNIT_PRICE_SCALE;
use crossvault_protocol::integrations::reference::{
    FixedRateSwapExecutor, PositionExecutor, PriceFeedValuer, TransferRedeemer,
};
use crossvault_protocol::integrations::{
    ExecutorKind, Integrations, RedeemerKind, ValuerKind,
};
use crossvault_protocol::ledger::FeeSchedule;
use crossvault_protocol::relay::RelayerFees;
use crossvault_protocol::transport::MessageKind;
use crossvault_protocol::types::RiskProfile;
use crossvault_protocol::{Address, AssetId, ChainId, TokenId, VaultRef};

pub const PARENT: ChainId = 1;
pub const CHAIN_B: ChainId = 2;
pub const CHAIN_C: ChainId = 3;

pub const ONE: u128 = UNIT_PRICE_SCALE;

/// Start the clock well after zero: a cached value stamped at time zero
/// counts as invalidated.
pub const START: u64 = 1_000_000;

const NATIVE: u128 = 1_000_000_000_000_000;
const USDC_POOL: u32 = 1;

pub fn usdc(chain: ChainId) -> AssetId {
    Address::from_label(&format!("usdc-{chain}"))
}

pub fn weth(chain: ChainId) -> AssetId {
    Address::from_label(&format!("weth-{chain}"))
}

pub fn position(chain: ChainId) -> AssetId {
    Address::from_label(&format!("perp-{chain}"))
}

pub struct Harness {
    pub net: LocalNetwork,
    pub prices: Arc<PriceFeedValuer>,
    pub swap: Arc<FixedRateSwapExecutor>,
    pub owner: Address,
    pub treasury: Address,
    pub manager: Address,
    pub investor: Address,
    pub stranger: Address,
    pub vault: Address,
}

impl Harness {
    /// Three chains, one parent vault with zero fees, no children.
    pub fn new() -> Self {
        Self::with_fees(FeeSchedule::new(0, 0))
    }

    pub fn with_fees(fees: FeeSchedule) -> Self {
        let owner = Address::from_label("owner");
        let treasury = Address::from_label("treasury");
        let manager = Address::from_label("manager");
        let investor = Address::from_label("investor");
        let stranger = Address::from_label("stranger");

        // No bridge liquidity fee, so bridged amounts arrive intact.
        let relayer_fees = RelayerFees {
            bridge_fee_bips: 0,
            ..RelayerFees::default()
        };
        let mut net = LocalNetwork::with_fees(owner, treasury, relayer_fees);
        let prices = Arc::new(PriceFeedValuer::new());
        let swap = Arc::new(FixedRateSwapExecutor::new());

        for chain in [PARENT, CHAIN_B, CHAIN_C] {
            let integrations = Integrations::new()
                .with_valuer(ValuerKind::PriceFeed, prices.clone())
                .with_redeemer(RedeemerKind::Transfer, Arc::new(TransferRedeemer))
                .with_executor(ExecutorKind::Swap, swap.clone())
                .with_executor(ExecutorKind::Derivatives, Arc::new(PositionExecutor));
            net.add_chain(chain, integrations).unwrap();

            let c = net.chain_mut(chain).unwrap();
            let registry = c.registry_mut();
            for asset in [usdc(chain), weth(chain), position(chain)] {
                registry
                    .set_asset(owner, asset, ValuerKind::PriceFeed, RedeemerKind::Transfer)
                    .unwrap();
            }
            registry.set_deposit_asset(owner, usdc(chain), true).unwrap();
            registry.set_deposit_asset(owner, weth(chain), true).unwrap();
            registry.set_executor(owner, ExecutorKind::Swap, true).unwrap();
            registry.set_executor(owner, ExecutorKind::Derivatives, true).unwrap();
            for who in [manager, investor, stranger] {
                c.fund_native(who, NATIVE).unwrap();
            }

            prices.set_price(usdc(chain), ONE);
            prices.set_price(weth(chain), 2 * ONE);
            prices.set_price(position(chain), ONE);
        }
        net.register_bridge_pool(
            USDC_POOL,
            &[(PARENT, usdc(PARENT)), (CHAIN_B, usdc(CHAIN_B)), (CHAIN_C, usdc(CHAIN_C))],
        )
        .unwrap();
        net.set_time(START);

        let vault = net
            .chain_mut(PARENT)
            .unwrap()
            .create_parent_vault(CallContext::new(manager), RiskProfile::Medium, fees)
            .unwrap();

        Self {
            net,
            prices,
            swap,
            owner,
            treasury,
            manager,
            investor,
            stranger,
            vault,
        }
    }

    pub fn parent_ref(&self) -> VaultRef {
        VaultRef::new(PARENT, self.vault)
    }

    pub fn quote(&self, from: ChainId, to: ChainId, kind: MessageKind) -> u128 {
        self.net.chain(from).unwrap().transport().quote(to, kind)
    }

    pub fn parent(&self) -> &crossvault_contracts::ParentVault {
        self.net.chain(PARENT).unwrap().parent(&self.vault).unwrap()
    }

    pub fn child(&self, chain: ChainId) -> &crossvault_contracts::ChildVault {
        self.net
            .chain(chain)
            .unwrap()
            .child_of(self.parent_ref())
            .unwrap()
    }

    /// Creates a child on `chain` and delivers the full handshake.
    pub fn create_child(&mut self, chain: ChainId) -> Address {
        let mut fee = self.net.chain(PARENT).unwrap().transport().config().vault_creation_fee()
            + self.quote(PARENT, chain, MessageKind::VaultChildCreationRequest);
        for existing in self.parent().children().keys() {
            fee += self.quote(PARENT, *existing, MessageKind::AddVaultSiblingRequest);
        }
        let (manager, vault) = (self.manager, self.vault);
        self.net
            .chain_mut(PARENT)
            .unwrap()
            .request_create_child(CallContext::with_value(manager, fee), vault, chain, fee)
            .unwrap();
        self.net.deliver_all();
        self.child(chain).address()
    }

    pub fn deposit(&mut self, who: Address, asset: AssetId, amount: u128) -> Result<TokenId, VaultError> {
        let vault = self.vault;
        let parent = self.net.chain_mut(PARENT).unwrap();
        parent.mint_to(who, asset, amount)?;
        parent.deposit(CallContext::new(who), vault, None, asset, amount)
    }

    /// Prepaid fees for one message of `kind` to every active child.
    pub fn fan_out_fees(&self, kind: MessageKind) -> Vec<u128> {
        self.parent()
            .active_children()
            .iter()
            .map(|c| self.quote(PARENT, *c, kind))
            .collect()
    }

    /// Requests a value sync from every active child and delivers replies.
    pub fn sync(&mut self) {
        let fees = self.fan_out_fees(MessageKind::ValueUpdateRequest);
        let total: u128 = fees.iter().sum();
        let (manager, vault) = (self.manager, self.vault);
        self.net
            .chain_mut(PARENT)
            .unwrap()
            .request_value_sync(CallContext::with_value(manager, total), vault, &fees)
            .unwrap();
        self.net.deliver_all();
    }

    /// Bridges `amount` of the parent's USDC to the child on `chain`.
    pub fn bridge_from_parent(&mut self, chain: ChainId, amount: u128) {
        let (manager, vault) = (self.manager, self.vault);
        let fee = self
            .net
            .chain(PARENT)
            .unwrap()
            .transport()
            .quote_bridge(chain, PARENT);
        let parent = self.net.chain_mut(PARENT).unwrap();
        parent
            .request_bridge_approval(CallContext::new(manager), vault, PARENT, chain, 0)
            .unwrap();
        parent
            .bridge_asset(
                CallContext::with_value(manager, fee),
                vault,
                chain,
                usdc(PARENT),
                amount,
                amount,
                fee,
            )
            .unwrap();
        self.net.deliver_all();
    }

    pub fn wallet(&self, chain: ChainId, who: Address, asset: AssetId) -> u128 {
        self.net.chain(chain).unwrap().wallets().balance(&who, &asset)
    }
}
