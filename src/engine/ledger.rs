//! Bet Ledger
//!
//! Owns every account balance and the bets of the live round. All balance
//! changes go through here: debit on placement, credit on cashout or refund.
//! The ledger never reads the clock; the scheduler hands it a
//! [`RoundContext`] describing the round at the instant of the request.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::price::Currency;
use crate::engine::state::{Phase, PlayerId, RoundId};

/// Account units (the currency balances are kept in).
pub type Amount = f64;

// =============================================================================
// TYPES
// =============================================================================

/// Bet status. Transitions only leave `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    /// Exposed to the crash.
    Active,
    /// Exited before the crash.
    CashedOut,
    /// Still active when the round crashed.
    Lost,
    /// Round aborted; wager returned.
    Refunded,
}

/// A wager on one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    /// Stable identity from placement through settlement.
    pub id: Uuid,
    /// Owner.
    pub player_id: PlayerId,
    /// Round the bet belongs to.
    pub round_id: RoundId,
    /// Wager in account units.
    pub wager: Amount,
    /// Currency the player chose.
    pub currency: Currency,
    /// Wager converted at placement price.
    pub crypto_amount: f64,
    /// Current status.
    pub status: BetStatus,
    /// Multiplier locked in at cashout.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cashout_multiplier: Option<f64>,
    /// Amount credited back (cashout or refund).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payout: Option<Amount>,
}

impl Bet {
    /// Whether the bet is still exposed.
    pub fn is_active(&self) -> bool {
        self.status == BetStatus::Active
    }
}

/// A player's balance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Owner.
    pub player_id: PlayerId,
    /// Balance in account units, never negative.
    pub balance: Amount,
}

/// Why a bet or cashout was refused. Never affects the round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Amount is not a positive finite number.
    #[error("bet amount must be positive")]
    InvalidAmount,
    /// Balance does not cover the wager.
    #[error("insufficient balance")]
    InsufficientBalance,
    /// Bets are only accepted while waiting.
    #[error("betting window is closed")]
    BetWindowClosed,
    /// Player already has a bet this round.
    #[error("already placed a bet this round")]
    DuplicateBet,
    /// Player has no bet this round.
    #[error("no active bet")]
    NoActiveBet,
    /// Bet was already cashed out, lost or refunded.
    #[error("bet already resolved")]
    AlreadyResolved,
    /// Cashouts are only accepted while running.
    #[error("round is not running")]
    RoundNotRunning,
    /// No price for the requested currency.
    #[error("unsupported currency")]
    UnsupportedCurrency,
}

/// No room for another account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("account limit of {0} reached")]
pub struct AccountLimitReached(pub usize);

/// The round as seen by the ledger at the instant of a request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoundContext {
    /// Live round.
    pub round_id: RoundId,
    /// Phase after all due transitions were applied.
    pub phase: Phase,
    /// Multiplier at the request instant.
    pub multiplier: f64,
}

/// Result of an accepted cashout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Bet that was cashed out.
    pub bet_id: Uuid,
    /// Owner.
    pub player_id: PlayerId,
    /// Round.
    pub round_id: RoundId,
    /// Original wager.
    pub wager: Amount,
    /// Amount credited (`wager * multiplier`).
    pub amount: Amount,
    /// Multiplier locked in.
    pub multiplier: f64,
    /// Balance after the credit.
    pub balance: Amount,
}

/// Public roster entry, derived from active bets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Player (UUID string).
    pub player_id: String,
    /// Wager in account units.
    pub wager: Amount,
    /// Chosen currency.
    pub currency: Currency,
}

// =============================================================================
// LEDGER
// =============================================================================

/// Accounts plus the live round's bets.
#[derive(Debug, Clone)]
pub struct BetLedger {
    accounts: BTreeMap<PlayerId, Account>,
    round_id: RoundId,
    bets: BTreeMap<PlayerId, Bet>,
    previous: Vec<Bet>,
    round_debits: Amount,
    max_accounts: usize,
}

impl BetLedger {
    /// Create an empty ledger tracking `round_id`.
    pub fn new(round_id: RoundId) -> Self {
        Self {
            accounts: BTreeMap::new(),
            round_id,
            bets: BTreeMap::new(),
            previous: Vec::new(),
            round_debits: 0.0,
            max_accounts: usize::MAX,
        }
    }

    /// Cap the number of accounts the ledger will hold.
    pub fn with_max_accounts(mut self, max_accounts: usize) -> Self {
        self.max_accounts = max_accounts;
        self
    }

    /// Open an account with `initial` balance. Existing accounts are untouched
    /// and can always be reopened, even at the limit.
    ///
    /// Returns the current balance.
    pub fn open_account(&mut self, player_id: PlayerId, initial: Amount) -> Result<Amount, AccountLimitReached> {
        if let Some(account) = self.accounts.get(&player_id) {
            return Ok(account.balance);
        }
        if self.accounts.len() >= self.max_accounts {
            return Err(AccountLimitReached(self.max_accounts));
        }

        let initial = if initial.is_finite() { initial.max(0.0) } else { 0.0 };
        info!("Opened account {} with {:.2}", player_id.short(), initial);
        self.accounts.insert(player_id, Account { player_id, balance: initial });
        Ok(initial)
    }

    /// Number of open accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Balance for a player.
    pub fn balance(&self, player_id: &PlayerId) -> Option<Amount> {
        self.accounts.get(player_id).map(|a| a.balance)
    }

    /// Round the ledger is tracking.
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Switch to a new round, archiving the previous round's bets.
    ///
    /// Any bet still active is refunded first so nothing is left stranded.
    pub fn begin_round(&mut self, round_id: RoundId) {
        let stranded = self.refund_round(self.round_id);
        debug_assert!(stranded.is_empty(), "bets left active at round change");

        self.round_id = round_id;
        self.previous = std::mem::take(&mut self.bets).into_values().collect();
        self.round_debits = 0.0;
    }

    /// Place a bet.
    ///
    /// `price` is the currency price read from the price source; `None` means
    /// the currency is unsupported.
    pub fn place_bet(
        &mut self,
        ctx: RoundContext,
        player_id: PlayerId,
        amount: Amount,
        currency: Currency,
        price: Option<f64>,
    ) -> Result<Bet, Rejection> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Rejection::InvalidAmount);
        }
        if ctx.phase != Phase::Waiting || ctx.round_id != self.round_id {
            return Err(Rejection::BetWindowClosed);
        }
        if self.bets.contains_key(&player_id) {
            return Err(Rejection::DuplicateBet);
        }
        let price = price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or(Rejection::UnsupportedCurrency)?;

        let account = self
            .accounts
            .get_mut(&player_id)
            .ok_or(Rejection::InsufficientBalance)?;
        if account.balance < amount {
            return Err(Rejection::InsufficientBalance);
        }

        account.balance -= amount;
        self.round_debits += amount;

        let bet = Bet {
            id: Uuid::new_v4(),
            player_id,
            round_id: self.round_id,
            wager: amount,
            crypto_amount: amount / price,
            currency,
            status: BetStatus::Active,
            cashout_multiplier: None,
            payout: None,
        };
        self.bets.insert(player_id, bet.clone());

        debug!(
            "Bet {} placed by {} in round {}: {:.2} ({:.8} {})",
            bet.id, player_id.short(), bet.round_id, amount, bet.crypto_amount, bet.currency
        );
        Ok(bet)
    }

    /// Cash out a player's active bet at `ctx.multiplier`.
    pub fn cash_out(&mut self, ctx: RoundContext, player_id: PlayerId) -> Result<Settlement, Rejection> {
        if ctx.phase != Phase::Running || ctx.round_id != self.round_id {
            return Err(Rejection::RoundNotRunning);
        }

        let bet = self.bets.get_mut(&player_id).ok_or(Rejection::NoActiveBet)?;
        if !bet.is_active() {
            return Err(Rejection::AlreadyResolved);
        }
        let account = self
            .accounts
            .get_mut(&player_id)
            .ok_or(Rejection::NoActiveBet)?;

        let amount = bet.wager * ctx.multiplier;
        bet.status = BetStatus::CashedOut;
        bet.cashout_multiplier = Some(ctx.multiplier);
        bet.payout = Some(amount);
        account.balance += amount;

        debug!(
            "Bet {} cashed out by {} at {:.2}x for {:.2}",
            bet.id, player_id.short(), ctx.multiplier, amount
        );

        Ok(Settlement {
            bet_id: bet.id,
            player_id,
            round_id: bet.round_id,
            wager: bet.wager,
            amount,
            multiplier: ctx.multiplier,
            balance: account.balance,
        })
    }

    /// Mark every active bet of `round_id` as lost. Balances are untouched;
    /// wagers were debited at placement.
    pub fn settle_round(&mut self, round_id: RoundId, crash_point: f64) -> Vec<Bet> {
        if round_id != self.round_id {
            return Vec::new();
        }

        let lost: Vec<Bet> = self
            .bets
            .values_mut()
            .filter(|bet| bet.is_active())
            .map(|bet| {
                bet.status = BetStatus::Lost;
                bet.clone()
            })
            .collect();

        debug!("Round {} settled at {:.2}x: {} bets lost", round_id, crash_point, lost.len());
        lost
    }

    /// Refund every active bet of `round_id`, crediting the wager back.
    pub fn refund_round(&mut self, round_id: RoundId) -> Vec<Bet> {
        if round_id != self.round_id {
            return Vec::new();
        }

        let mut refunded = Vec::new();
        for bet in self.bets.values_mut().filter(|bet| bet.is_active()) {
            bet.status = BetStatus::Refunded;
            bet.payout = Some(bet.wager);
            if let Some(account) = self.accounts.get_mut(&bet.player_id) {
                account.balance += bet.wager;
            }
            refunded.push(bet.clone());
        }
        refunded
    }

    /// A player's bet in the live round.
    pub fn bet_for(&self, player_id: &PlayerId) -> Option<&Bet> {
        self.bets.get(player_id)
    }

    /// All bets of the live round, ordered by player.
    pub fn bets(&self) -> impl Iterator<Item = &Bet> {
        self.bets.values()
    }

    /// Final state of the previous round's bets.
    pub fn previous_round(&self) -> &[Bet] {
        &self.previous
    }

    /// Sum of wagers debited this round.
    pub fn round_debits(&self) -> Amount {
        self.round_debits
    }

    /// Players still exposed in the live round.
    pub fn active_players(&self) -> Vec<RosterEntry> {
        self.bets
            .values()
            .filter(|bet| bet.is_active())
            .map(|bet| RosterEntry {
                player_id: bet.player_id.to_uuid_string(),
                wager: bet.wager,
                currency: bet.currency.clone(),
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND: RoundId = RoundId(1);

    fn waiting() -> RoundContext {
        RoundContext { round_id: ROUND, phase: Phase::Waiting, multiplier: 1.0 }
    }

    fn running(multiplier: f64) -> RoundContext {
        RoundContext { round_id: ROUND, phase: Phase::Running, multiplier }
    }

    fn btc() -> Currency {
        Currency::new("BTC")
    }

    fn ledger_with(player: PlayerId, balance: Amount) -> BetLedger {
        let mut ledger = BetLedger::new(ROUND);
        ledger.open_account(player, balance).unwrap();
        ledger
    }

    #[test]
    fn test_place_bet_debits() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = ledger_with(player, 100.0);

        let bet = ledger.place_bet(waiting(), player, 10.0, btc(), Some(60_000.0)).unwrap();
        assert_eq!(bet.status, BetStatus::Active);
        assert_eq!(bet.round_id, ROUND);
        assert!((bet.crypto_amount - 10.0 / 60_000.0).abs() < 1e-15);
        assert_eq!(ledger.balance(&player), Some(90.0));
        assert_eq!(ledger.round_debits(), 10.0);
    }

    #[test]
    fn test_rejections_leave_balance() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = ledger_with(player, 5.0);

        assert_eq!(
            ledger.place_bet(waiting(), player, 0.0, btc(), Some(1.0)),
            Err(Rejection::InvalidAmount)
        );
        assert_eq!(
            ledger.place_bet(waiting(), player, f64::NAN, btc(), Some(1.0)),
            Err(Rejection::InvalidAmount)
        );
        assert_eq!(
            ledger.place_bet(running(1.0), player, 1.0, btc(), Some(1.0)),
            Err(Rejection::BetWindowClosed)
        );
        assert_eq!(
            ledger.place_bet(waiting(), player, 10.0, btc(), Some(1.0)),
            Err(Rejection::InsufficientBalance)
        );
        assert_eq!(
            ledger.place_bet(waiting(), player, 1.0, btc(), None),
            Err(Rejection::UnsupportedCurrency)
        );
        assert_eq!(ledger.balance(&player), Some(5.0));
    }

    #[test]
    fn test_unknown_account_has_no_balance() {
        let mut ledger = BetLedger::new(ROUND);
        let result = ledger.place_bet(waiting(), PlayerId::new([3; 16]), 1.0, btc(), Some(1.0));
        assert_eq!(result, Err(Rejection::InsufficientBalance));
    }

    #[test]
    fn test_duplicate_bet_rejected() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = ledger_with(player, 100.0);

        ledger.place_bet(waiting(), player, 5.0, btc(), Some(1.0)).unwrap();
        let second = ledger.place_bet(waiting(), player, 5.0, btc(), Some(1.0));

        assert_eq!(second, Err(Rejection::DuplicateBet));
        assert_eq!(ledger.balance(&player), Some(95.0));
        assert_eq!(ledger.bets().count(), 1);
    }

    #[test]
    fn test_cash_out_credits() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = ledger_with(player, 100.0);
        ledger.place_bet(waiting(), player, 10.0, btc(), Some(1.0)).unwrap();

        let settlement = ledger.cash_out(running(2.0), player).unwrap();
        assert_eq!(settlement.amount, 20.0);
        assert_eq!(settlement.balance, 110.0);

        let bet = ledger.bet_for(&player).unwrap();
        assert_eq!(bet.status, BetStatus::CashedOut);
        assert_eq!(bet.cashout_multiplier, Some(2.0));
    }

    #[test]
    fn test_cash_out_rejections() {
        let player = PlayerId::new([1; 16]);
        let other = PlayerId::new([2; 16]);
        let mut ledger = ledger_with(player, 100.0);
        ledger.place_bet(waiting(), player, 10.0, btc(), Some(1.0)).unwrap();

        assert_eq!(ledger.cash_out(waiting(), player), Err(Rejection::RoundNotRunning));
        assert_eq!(ledger.cash_out(running(1.5), other), Err(Rejection::NoActiveBet));

        ledger.cash_out(running(1.5), player).unwrap();
        assert_eq!(ledger.cash_out(running(1.6), player), Err(Rejection::AlreadyResolved));
        assert_eq!(ledger.balance(&player), Some(105.0));
    }

    #[test]
    fn test_settle_marks_lost_without_credit() {
        let winner = PlayerId::new([1; 16]);
        let loser = PlayerId::new([2; 16]);
        let mut ledger = BetLedger::new(ROUND);
        ledger.open_account(winner, 50.0).unwrap();
        ledger.open_account(loser, 50.0).unwrap();
        ledger.place_bet(waiting(), winner, 10.0, btc(), Some(1.0)).unwrap();
        ledger.place_bet(waiting(), loser, 10.0, btc(), Some(1.0)).unwrap();
        ledger.cash_out(running(1.5), winner).unwrap();

        let lost = ledger.settle_round(ROUND, 1.8);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].player_id, loser);
        assert_eq!(ledger.bet_for(&loser).unwrap().status, BetStatus::Lost);
        assert_eq!(ledger.bet_for(&winner).unwrap().status, BetStatus::CashedOut);
        assert_eq!(ledger.balance(&loser), Some(40.0));

        // Terminal bets stay terminal
        assert_eq!(ledger.cash_out(running(1.9), loser), Err(Rejection::AlreadyResolved));
    }

    #[test]
    fn test_refund_restores_balance() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = ledger_with(player, 30.0);
        ledger.place_bet(waiting(), player, 10.0, btc(), Some(1.0)).unwrap();

        let refunded = ledger.refund_round(ROUND);
        assert_eq!(refunded.len(), 1);
        assert_eq!(refunded[0].status, BetStatus::Refunded);
        assert_eq!(ledger.balance(&player), Some(30.0));
    }

    #[test]
    fn test_settle_other_round_is_noop() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = ledger_with(player, 30.0);
        ledger.place_bet(waiting(), player, 10.0, btc(), Some(1.0)).unwrap();

        assert!(ledger.settle_round(RoundId(99), 2.0).is_empty());
        assert!(ledger.bet_for(&player).unwrap().is_active());
    }

    #[test]
    fn test_begin_round_clears_bets() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = ledger_with(player, 30.0);
        ledger.place_bet(waiting(), player, 10.0, btc(), Some(1.0)).unwrap();
        ledger.settle_round(ROUND, 1.2);

        ledger.begin_round(RoundId(2));
        assert_eq!(ledger.round_id(), RoundId(2));
        assert!(ledger.bet_for(&player).is_none());
        assert_eq!(ledger.round_debits(), 0.0);
        assert_eq!(ledger.previous_round().len(), 1);
        assert_eq!(ledger.previous_round()[0].status, BetStatus::Lost);
    }

    #[test]
    fn test_open_account_idempotent() {
        let player = PlayerId::new([1; 16]);
        let mut ledger = BetLedger::new(ROUND);
        assert_eq!(ledger.open_account(player, 1000.0), Ok(1000.0));
        ledger.place_bet(waiting(), player, 100.0, btc(), Some(1.0)).unwrap();
        assert_eq!(ledger.open_account(player, 1000.0), Ok(900.0));
    }

    #[test]
    fn test_account_limit() {
        let mut ledger = BetLedger::new(ROUND).with_max_accounts(2);
        let a = PlayerId::new([1; 16]);
        let b = PlayerId::new([2; 16]);
        let c = PlayerId::new([3; 16]);

        ledger.open_account(a, 100.0).unwrap();
        ledger.open_account(b, 100.0).unwrap();
        assert_eq!(ledger.open_account(c, 100.0), Err(AccountLimitReached(2)));
        assert_eq!(ledger.account_count(), 2);
        assert_eq!(ledger.balance(&c), None);

        // Known players still get back in
        assert_eq!(ledger.open_account(a, 100.0), Ok(100.0));
    }

    #[test]
    fn test_roster_tracks_active_bets() {
        let a = PlayerId::new([1; 16]);
        let b = PlayerId::new([2; 16]);
        let mut ledger = BetLedger::new(ROUND);
        ledger.open_account(a, 50.0).unwrap();
        ledger.open_account(b, 50.0).unwrap();
        ledger.place_bet(waiting(), a, 10.0, btc(), Some(1.0)).unwrap();
        ledger.place_bet(waiting(), b, 20.0, Currency::new("eth"), Some(1.0)).unwrap();
        assert_eq!(ledger.active_players().len(), 2);

        ledger.cash_out(running(1.1), a).unwrap();
        let roster = ledger.active_players();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].player_id, b.to_uuid_string());
        assert_eq!(roster[0].currency.as_str(), "ETH");
    }
}
