//! # Scenarios
//!
//! A scenario is a JSON document describing a devnet (chains, assets,
//! prices, bridge pools, the parent vault) and a list of steps to play
//! against it. [`Devnet`] owns the resulting [`LocalNetwork`] and turns each
//! step into calls on the chains.
//!
//! ```text
//!   scenario.json ──parse──► Scenario ──deploy──► Devnet
//!                                                   │
//!                         steps ──apply──► Chain calls ──deliver_all──► relayer
//! ```
//!
//! Amounts, prices and rates are decimal strings with up to 18 fractional
//! digits (`"1000"`, `"0.49"`), so scenario files never go through floats.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crossvault_contracts::{CallContext, LocalNetwork, SyncState};
use crossvault_protocol::config::{BIPS, BRIDGE_MIN_AMOUNT_OUT_BIPS, UNIT_PRICE_SCALE};
use crossvault_protocol::integrations::reference::{
    FixedRateSwapExecutor, PositionExecutor, PriceFeedValuer, TransferRedeemer,
};
use crossvault_protocol::integrations::{
    ExecutorKind, Integrations, RedeemerKind, Trade, ValuerKind,
};
use crossvault_protocol::ledger::FeeSchedule;
use crossvault_protocol::relay::{RelayStats, RelayerFees};
use crossvault_protocol::transport::MessageKind;
use crossvault_protocol::types::RiskProfile;
use crossvault_protocol::{Address, AssetId, ChainId, TokenId, VaultRef};

/// Native balance handed to every actor on every chain.
const NATIVE_FUNDING: u128 = 1_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Scenario file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Unix seconds the network clock starts at.
    pub start_time: u64,
    #[serde(default)]
    pub relayer: Option<RelayerFees>,
    pub parent_chain: ChainId,
    pub chains: Vec<ChainSpec>,
    #[serde(default)]
    pub swap_rates: Vec<SwapRate>,
    pub vault: VaultSpec,
    /// Investors and other callers. The manager is funded automatically.
    #[serde(default)]
    pub actors: Vec<String>,
    /// Drain the relayer after every step.
    #[serde(default = "default_true")]
    pub auto_deliver: bool,
    pub steps: Vec<Step>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainSpec {
    pub id: ChainId,
    pub assets: Vec<AssetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetSpec {
    pub symbol: String,
    /// USD price per unit.
    pub price: String,
    #[serde(default)]
    pub depositable: bool,
    /// Assets sharing a pool id are bridgeable into each other.
    #[serde(default)]
    pub bridge_pool: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapRate {
    pub chain: ChainId,
    pub sell: String,
    pub buy: String,
    /// Units of `buy` received per unit of `sell`.
    pub rate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultSpec {
    pub manager: String,
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub streaming_fee_bips: u32,
    #[serde(default)]
    pub performance_fee_bips: u32,
}

/// One scripted action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Advance {
        seconds: u64,
    },
    SetPrice {
        chain: ChainId,
        asset: String,
        price: String,
    },
    SetSwapRate {
        chain: ChainId,
        sell: String,
        buy: String,
        rate: String,
    },
    CreateChild {
        chain: ChainId,
    },
    /// Tops the investor up from the faucet, then deposits on the parent
    /// chain into their holding (opened on first deposit).
    Deposit {
        investor: String,
        asset: String,
        amount: String,
    },
    Withdraw {
        investor: String,
        /// Portion of the holding's shares, in bips.
        portion_bips: u32,
    },
    Sync,
    Bridge {
        from: ChainId,
        to: ChainId,
        asset: String,
        amount: String,
        /// Defaults to the tightest floor the bridge accepts.
        #[serde(default)]
        min_out: Option<String>,
    },
    Trade {
        chain: ChainId,
        sell: String,
        buy: String,
        amount: String,
        #[serde(default)]
        min_out: Option<String>,
        #[serde(default = "default_executor")]
        executor: ExecutorKind,
    },
    AnnounceFees {
        streaming_fee_bips: u32,
        performance_fee_bips: u32,
    },
    CommitFees,
    Levy {
        investors: Vec<String>,
    },
    ChangeManager {
        new_manager: String,
    },
    Deliver,
    RetryStored {
        #[serde(default)]
        gas_limit: Option<u64>,
    },
    RetryBridges,
}

fn default_executor() -> ExecutorKind {
    ExecutorKind::Swap
}

impl Step {
    /// Metric label.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Advance { .. } => "advance",
            Step::SetPrice { .. } => "set_price",
            Step::SetSwapRate { .. } => "set_swap_rate",
            Step::CreateChild { .. } => "create_child",
            Step::Deposit { .. } => "deposit",
            Step::Withdraw { .. } => "withdraw",
            Step::Sync => "sync",
            Step::Bridge { .. } => "bridge",
            Step::Trade { .. } => "trade",
            Step::AnnounceFees { .. } => "announce_fees",
            Step::CommitFees => "commit_fees",
            Step::Levy { .. } => "levy",
            Step::ChangeManager { .. } => "change_manager",
            Step::Deliver => "deliver",
            Step::RetryStored { .. } => "retry_stored",
            Step::RetryBridges => "retry_bridges",
        }
    }
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(text).context("invalid scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        if !self.chains.iter().any(|c| c.id == self.parent_chain) {
            bail!("parent chain {} is not declared", self.parent_chain);
        }
        let mut seen = std::collections::BTreeSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id) {
                bail!("chain {} declared twice", chain.id);
            }
            for asset in &chain.assets {
                parse_units(&asset.price)
                    .with_context(|| format!("price of {} on chain {}", asset.symbol, chain.id))?;
            }
        }
        Ok(())
    }

    /// Three chains, USDC bridgeable everywhere, one child trade and a
    /// round trip of fees.
    pub fn sample() -> Self {
        let chain = |id: ChainId| ChainSpec {
            id,
            assets: vec![
                AssetSpec {
                    symbol: "usdc".into(),
                    price: "1".into(),
                    depositable: true,
                    bridge_pool: Some(1),
                },
                AssetSpec {
                    symbol: "weth".into(),
                    price: "2000".into(),
                    depositable: false,
                    bridge_pool: None,
                },
            ],
        };
        Scenario {
            start_time: 1_767_225_600,
            relayer: None,
            parent_chain: 1,
            chains: vec![chain(1), chain(2), chain(3)],
            swap_rates: vec![SwapRate {
                chain: 2,
                sell: "usdc".into(),
                buy: "weth".into(),
                rate: "0.000499".into(),
            }],
            vault: VaultSpec {
                manager: "manager".into(),
                risk_profile: RiskProfile::Medium,
                streaming_fee_bips: 200,
                performance_fee_bips: 1_000,
            },
            actors: vec!["alice".into(), "bob".into()],
            auto_deliver: true,
            steps: vec![
                Step::CreateChild { chain: 2 },
                Step::CreateChild { chain: 3 },
                Step::Deposit {
                    investor: "alice".into(),
                    asset: "usdc".into(),
                    amount: "10000".into(),
                },
                Step::Bridge {
                    from: 1,
                    to: 2,
                    asset: "usdc".into(),
                    amount: "4000".into(),
                    min_out: None,
                },
                Step::Sync,
                Step::Deposit {
                    investor: "bob".into(),
                    asset: "usdc".into(),
                    amount: "2500".into(),
                },
                Step::Trade {
                    chain: 2,
                    sell: "usdc".into(),
                    buy: "weth".into(),
                    amount: "1000".into(),
                    min_out: None,
                    executor: ExecutorKind::Swap,
                },
                Step::Advance { seconds: 30 * 86_400 },
                Step::Sync,
                Step::Levy {
                    investors: vec!["alice".into(), "bob".into()],
                },
                Step::Withdraw {
                    investor: "bob".into(),
                    portion_bips: 5_000,
                },
            ],
        }
    }
}

/// Parses a non-negative decimal into 18-decimal fixed point.
pub fn parse_units(text: &str) -> Result<u128> {
    let text = text.trim();
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() {
        bail!("empty amount");
    }
    if frac.len() > 18 {
        bail!("`{text}` has more than 18 fractional digits");
    }
    let digits = |s: &str| -> Result<u128> {
        if s.is_empty() {
            return Ok(0);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            bail!("`{text}` is not a decimal number");
        }
        s.parse::<u128>().with_context(|| format!("`{text}` is out of range"))
    };
    let scale = 10u128.pow(18 - frac.len() as u32);
    let whole = digits(whole)?;
    let frac = digits(frac)?;
    whole
        .checked_mul(UNIT_PRICE_SCALE)
        .and_then(|w| w.checked_add(frac * scale))
        .ok_or_else(|| anyhow!("`{text}` is out of range"))
}

fn actor(name: &str) -> Address {
    Address::from_label(name)
}

fn asset_id(chain: ChainId, symbol: &str) -> AssetId {
    Address::from_label(&format!("{symbol}-{chain}"))
}

// ---------------------------------------------------------------------------
// Devnet
// ---------------------------------------------------------------------------

/// A deployed scenario.
pub struct Devnet {
    net: LocalNetwork,
    prices: Arc<PriceFeedValuer>,
    swap: Arc<FixedRateSwapExecutor>,
    parent_chain: ChainId,
    manager: Address,
    vault: Address,
    auto_deliver: bool,
    holdings: BTreeMap<String, TokenId>,
}

/// End-of-run snapshot printed to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub now: u64,
    pub vault: String,
    pub manager: String,
    pub sync_state: String,
    pub total_shares: u128,
    /// Only present when the vault is in sync.
    pub total_value_max: Option<u128>,
    pub unit_price: Option<u128>,
    pub active_children: Vec<ChainId>,
    pub holdings: BTreeMap<String, u128>,
    pub relay: RelayStats,
    pub stored_payloads: usize,
    pub stored_transfers: usize,
}

impl Devnet {
    /// Builds the network, lists assets, wires bridge pools and creates
    /// the parent vault.
    pub fn deploy(scenario: &Scenario) -> Result<Self> {
        let owner = actor("owner");
        let treasury = actor("treasury");
        let manager = actor(&scenario.vault.manager);
        let mut net = LocalNetwork::with_fees(owner, treasury, scenario.relayer.unwrap_or_default());
        net.set_time(scenario.start_time);

        let prices = Arc::new(PriceFeedValuer::new());
        let swap = Arc::new(FixedRateSwapExecutor::new());
        let mut pools: BTreeMap<u32, Vec<(ChainId, AssetId)>> = BTreeMap::new();

        for spec in &scenario.chains {
            let integrations = Integrations::new()
                .with_valuer(ValuerKind::PriceFeed, prices.clone())
                .with_redeemer(RedeemerKind::Transfer, Arc::new(TransferRedeemer))
                .with_executor(ExecutorKind::Swap, swap.clone())
                .with_executor(ExecutorKind::Derivatives, Arc::new(PositionExecutor));
            net.add_chain(spec.id, integrations)?;

            let chain = net.chain_mut(spec.id)?;
            let registry = chain.registry_mut();
            registry.set_executor(owner, ExecutorKind::Swap, true)?;
            registry.set_executor(owner, ExecutorKind::Derivatives, true)?;
            for asset in &spec.assets {
                let id = asset_id(spec.id, &asset.symbol);
                registry.set_asset(owner, id, ValuerKind::PriceFeed, RedeemerKind::Transfer)?;
                registry.set_deposit_asset(owner, id, asset.depositable)?;
                prices.set_price(id, parse_units(&asset.price)?);
                if let Some(pool) = asset.bridge_pool {
                    pools.entry(pool).or_default().push((spec.id, id));
                }
            }
            for name in scenario.actors.iter().chain(std::iter::once(&scenario.vault.manager)) {
                chain.fund_native(actor(name), NATIVE_FUNDING)?;
            }
        }
        for (pool, assets) in &pools {
            net.register_bridge_pool(*pool, assets)?;
        }
        for rate in &scenario.swap_rates {
            swap.set_rate(
                asset_id(rate.chain, &rate.sell),
                asset_id(rate.chain, &rate.buy),
                parse_units(&rate.rate)?,
            );
        }

        let fees = FeeSchedule::new(scenario.vault.streaming_fee_bips, scenario.vault.performance_fee_bips);
        let vault = net
            .chain_mut(scenario.parent_chain)?
            .create_parent_vault(CallContext::new(manager), scenario.vault.risk_profile, fees)?;

        tracing::info!(
            chains = scenario.chains.len(),
            pools = pools.len(),
            vault = %vault,
            "devnet deployed"
        );

        Ok(Self {
            net,
            prices,
            swap,
            parent_chain: scenario.parent_chain,
            manager,
            vault,
            auto_deliver: scenario.auto_deliver,
            holdings: BTreeMap::new(),
        })
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.net
    }

    /// Holding opened by `investor`, if any.
    pub fn holding_of(&self, investor: &str) -> Option<TokenId> {
        self.holdings.get(investor).copied()
    }

    fn parent_ref(&self) -> VaultRef {
        VaultRef::new(self.parent_chain, self.vault)
    }

    fn quote(&self, from: ChainId, to: ChainId, kind: MessageKind) -> Result<u128> {
        Ok(self.net.chain(from)?.transport().quote(to, kind))
    }

    /// One prepaid fee per child, in chain order. `active_only` limits the
    /// fan-out to children that hold funds.
    fn fan_out(&self, kind: MessageKind, active_only: bool) -> Result<Vec<u128>> {
        let chain = self.net.chain(self.parent_chain)?;
        let parent = chain
            .parent(&self.vault)
            .ok_or_else(|| anyhow!("parent vault missing"))?;
        let targets: Vec<ChainId> = if active_only {
            parent.active_children()
        } else {
            parent.children().keys().copied().collect()
        };
        targets
            .iter()
            .map(|c| self.quote(self.parent_chain, *c, kind))
            .collect()
    }

    /// Applies one step. Vault and transport failures come back as errors
    /// and leave the network unchanged.
    pub fn apply(&mut self, step: &Step) -> Result<()> {
        let parent_chain = self.parent_chain;
        let (manager, vault) = (self.manager, self.vault);

        match step {
            Step::Advance { seconds } => self.net.advance_time(*seconds),
            Step::SetPrice { chain, asset, price } => {
                self.prices.set_price(asset_id(*chain, asset), parse_units(price)?);
            }
            Step::SetSwapRate { chain, sell, buy, rate } => {
                self.swap
                    .set_rate(asset_id(*chain, sell), asset_id(*chain, buy), parse_units(rate)?);
            }
            Step::CreateChild { chain } => {
                let mut fee = self
                    .net
                    .chain(parent_chain)?
                    .transport()
                    .config()
                    .vault_creation_fee()
                    + self.quote(parent_chain, *chain, MessageKind::VaultChildCreationRequest)?;
                fee += self
                    .fan_out(MessageKind::AddVaultSiblingRequest, false)?
                    .iter()
                    .sum::<u128>();
                self.net.chain_mut(parent_chain)?.request_create_child(
                    CallContext::with_value(manager, fee),
                    vault,
                    *chain,
                    fee,
                )?;
            }
            Step::Deposit { investor, asset, amount } => {
                let who = actor(investor);
                let amount = parse_units(amount)?;
                let asset = asset_id(parent_chain, asset);
                let existing = self.holding_of(investor);
                let chain = self.net.chain_mut(parent_chain)?;
                chain.mint_to(who, asset, amount)?;
                let token = chain.deposit(CallContext::new(who), vault, existing, asset, amount)?;
                self.holdings.insert(investor.clone(), token);
            }
            Step::Withdraw { investor, portion_bips } => {
                let token = self
                    .holding_of(investor)
                    .ok_or_else(|| anyhow!("{investor} has no holding"))?;
                let held = self
                    .net
                    .chain(parent_chain)?
                    .parent(&vault)
                    .ok_or_else(|| anyhow!("parent vault missing"))?
                    .holding(token)?
                    .total_shares;
                let shares = held * u128::from(*portion_bips) / BIPS;
                let fees = self.fan_out(MessageKind::WithdrawRequest, true)?;
                let value = fees.iter().sum();
                let payouts = self.net.chain_mut(parent_chain)?.withdraw(
                    CallContext::with_value(actor(investor), value),
                    vault,
                    token,
                    shares,
                    &fees,
                )?;
                tracing::info!(%investor, token, shares, local_payouts = payouts.len(), "withdraw submitted");
            }
            Step::Sync => {
                let fees = self.fan_out(MessageKind::ValueUpdateRequest, true)?;
                let value = fees.iter().sum();
                self.net.chain_mut(parent_chain)?.request_value_sync(
                    CallContext::with_value(manager, value),
                    vault,
                    &fees,
                )?;
            }
            Step::Bridge { from, to, asset, amount, min_out } => {
                let amount = parse_units(amount)?;
                let min_out = match min_out {
                    Some(m) => parse_units(m)?,
                    None => amount * BRIDGE_MIN_AMOUNT_OUT_BIPS / BIPS,
                };
                self.bridge(*from, *to, asset, amount, min_out)?;
            }
            Step::Trade { chain, sell, buy, amount, min_out, executor } => {
                let trade = Trade {
                    sell: asset_id(*chain, sell),
                    amount: parse_units(amount)?,
                    buy: asset_id(*chain, buy),
                    min_amount_out: min_out.as_deref().map(parse_units).transpose()?.unwrap_or(0),
                };
                let target = self.vault_on(*chain)?;
                let impact = self.net.chain_mut(*chain)?.execute_trade(
                    CallContext::new(manager),
                    target,
                    *executor,
                    trade,
                )?;
                tracing::info!(chain, impact_bips = impact, "trade executed");
            }
            Step::AnnounceFees { streaming_fee_bips, performance_fee_bips } => {
                self.net.chain_mut(parent_chain)?.announce_fee_increase(
                    CallContext::new(manager),
                    vault,
                    FeeSchedule::new(*streaming_fee_bips, *performance_fee_bips),
                )?;
            }
            Step::CommitFees => {
                let fees = self
                    .net
                    .chain_mut(parent_chain)?
                    .commit_fee_increase(CallContext::new(manager), vault)?;
                tracing::info!(
                    streaming = fees.streaming_fee_bips,
                    performance = fees.performance_fee_bips,
                    "fee increase committed"
                );
            }
            Step::Levy { investors } => {
                let ids = investors
                    .iter()
                    .map(|i| self.holding_of(i).ok_or_else(|| anyhow!("{i} has no holding")))
                    .collect::<Result<Vec<_>>>()?;
                let levies = self.net.chain_mut(parent_chain)?.levy_fees_on_holdings(
                    CallContext::new(manager),
                    vault,
                    &ids,
                )?;
                let charged: u128 = levies.iter().map(|l| l.total()).sum();
                tracing::info!(holdings = ids.len(), charged, "fees levied");
            }
            Step::ChangeManager { new_manager } => {
                let fees = self.fan_out(MessageKind::ChangeManagerRequest, false)?;
                let value = fees.iter().sum();
                let next = actor(new_manager);
                self.net.chain_mut(parent_chain)?.change_manager(
                    CallContext::with_value(manager, value),
                    vault,
                    next,
                    &fees,
                )?;
                self.manager = next;
            }
            Step::Deliver => {
                self.net.deliver_all();
            }
            Step::RetryStored { gas_limit } => {
                let paths: Vec<_> = self
                    .net
                    .relayer()
                    .stored_payloads()
                    .iter()
                    .map(|stored| stored.packet.path())
                    .collect();
                for path in paths {
                    let outcome = self.net.retry_stored(&path, *gas_limit);
                    tracing::info!(?path, ?outcome, "stored payload retried");
                }
            }
            Step::RetryBridges => {
                let ids: Vec<_> = self
                    .net
                    .relayer()
                    .stored_transfers()
                    .iter()
                    .map(|stored| stored.transfer.delivery.id)
                    .collect();
                for id in ids {
                    let outcome = self.net.retry_bridge(&id);
                    tracing::info!(%id, ?outcome, "stored bridge transfer retried");
                }
            }
        }

        if self.auto_deliver && !matches!(step, Step::Deliver) {
            self.net.deliver_all();
        }
        Ok(())
    }

    /// Address of the vault instance living on `chain`.
    fn vault_on(&self, chain: ChainId) -> Result<Address> {
        if chain == self.parent_chain {
            return Ok(self.vault);
        }
        self.net
            .chain(chain)?
            .child_of(self.parent_ref())
            .map(|c| c.address())
            .ok_or_else(|| anyhow!("no child vault on chain {chain}"))
    }

    /// Approves the hop, delivers the approval when it has to travel, then
    /// sends the tokens.
    fn bridge(&mut self, from: ChainId, to: ChainId, symbol: &str, amount: u128, min_out: u128) -> Result<()> {
        let parent_chain = self.parent_chain;
        let (manager, vault) = (self.manager, self.vault);

        let approval_fee = if from == parent_chain {
            0
        } else {
            self.quote(parent_chain, from, MessageKind::BridgeApprovalRequest)?
        };
        self.net.chain_mut(parent_chain)?.request_bridge_approval(
            CallContext::with_value(manager, approval_fee),
            vault,
            from,
            to,
            approval_fee,
        )?;
        if from != parent_chain {
            self.net.deliver_all();
        }

        let source = self.vault_on(from)?;
        let fee = self.net.chain(from)?.transport().quote_bridge(to, parent_chain);
        self.net.chain_mut(from)?.bridge_asset(
            CallContext::with_value(manager, fee),
            source,
            to,
            asset_id(from, symbol),
            amount,
            min_out,
            fee,
        )?;
        Ok(())
    }

    /// Snapshot of the parent vault and the relayer.
    pub fn report(&self) -> Result<Report> {
        let chain = self.net.chain(self.parent_chain)?;
        let parent = chain
            .parent(&self.vault)
            .ok_or_else(|| anyhow!("parent vault missing"))?;
        let sync_state = chain.sync_state(&self.vault)?;
        let (total_value_max, unit_price) = if sync_state == SyncState::Synced {
            let value = chain.total_value(&self.vault)?;
            (Some(value.max), Some(parent.unit_price(value.max)?))
        } else {
            (None, None)
        };
        let holdings = self
            .holdings
            .iter()
            .map(|(name, id)| Ok((name.clone(), parent.holding(*id)?.total_shares)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Report {
            now: self.net.now(),
            vault: self.vault.to_string(),
            manager: parent.manager().to_string(),
            sync_state: sync_state.to_string(),
            total_shares: parent.ledger().total_shares(),
            total_value_max,
            unit_price,
            active_children: parent.active_children(),
            holdings,
            relay: self.net.stats(),
            stored_payloads: self.net.relayer().stored_payloads().len(),
            stored_transfers: self.net.relayer().stored_transfers().len(),
        })
    }
}
