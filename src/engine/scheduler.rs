//! Round Scheduler
//!
//! The authoritative state machine:
//!
//! ```text
//!   ┌──────────┐ countdown ┌──────────┐  m(t) >= crash  ┌──────────┐
//!   │ WAITING  │──────────▶│ RUNNING  │────────────────▶│ CRASHED  │
//!   └──────────┘           └──────────┘                 └──────────┘
//!        ▲  ▲                                                │
//!        │  └─────── abort (generator failed, bets refunded) │
//!        └──────────────────── cooldown ─────────────────────┘
//! ```
//!
//! The scheduler is synchronous and never reads the clock itself: every entry
//! point takes `now`. Each call first applies every transition that became due
//! up to `now`, anchored at the instant it was scheduled for, then acts. Callers
//! hold one write lock around each call, so ticks, bets and cashouts form a
//! single total order and a cashout either precedes the crash commit or sees
//! the round as crashed.

use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::clock::MultiplierClock;
use crate::engine::config::EngineConfig;
use crate::engine::crash_point::{validate_crash_point, CrashPointGenerator, GeneratorError};
use crate::engine::events::{EngineEvent, EventBroadcaster};
use crate::engine::history::{HistoryRecord, HistoryStore};
use crate::engine::ledger::{AccountLimitReached, Amount, Bet, BetLedger, Rejection, RosterEntry, RoundContext, Settlement};
use crate::engine::price::Currency;
use crate::engine::state::{wall_clock_at, Phase, PlayerId, Round, RoundId, RoundSnapshot};
use crate::proof::commitment::FairnessProof;

/// Upper bound on transitions applied by one catch-up.
///
/// Only reachable with zero-length phases; keeps a single call bounded.
const MAX_TRANSITIONS_PER_CALL: usize = 64;

/// Round state machine plus the ledger and history it drives.
pub struct RoundScheduler {
    config: EngineConfig,
    clock: MultiplierClock,
    generator: Box<dyn CrashPointGenerator>,
    round: Round,
    ledger: BetLedger,
    history: HistoryStore,
    events: EventBroadcaster,
}

impl RoundScheduler {
    /// Create a scheduler whose first round opens at `now`.
    pub fn new(config: EngineConfig, mut generator: Box<dyn CrashPointGenerator>, now: Instant) -> Self {
        let first = RoundId(1);
        let commitment = generator.commit(first);
        let events = EventBroadcaster::new(config.event_capacity);

        info!(
            "Round scheduler up: generator={}, waiting={:?}, cooldown={:?}, k={}",
            generator.name(), config.waiting_duration, config.cooldown_duration, config.growth_constant
        );

        let scheduler = Self {
            clock: MultiplierClock::new(config.growth_constant),
            history: HistoryStore::new(config.history_capacity),
            ledger: BetLedger::new(first).with_max_accounts(config.max_accounts),
            round: Round::new(first, now, commitment),
            generator,
            events,
            config,
        };
        scheduler.announce_waiting(now);
        scheduler
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    /// Register an event listener.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Handle to the broadcaster (for publishing alongside the scheduler).
    pub fn broadcaster(&self) -> EventBroadcaster {
        self.events.clone()
    }

    /// Snapshot of the live round as of `now`.
    ///
    /// Does not apply due transitions; the multiplier is the one committed by
    /// the most recent call.
    pub fn current_state(&self, now: Instant) -> RoundSnapshot {
        let since_phase = now.saturating_duration_since(self.round.phase_started_at);
        let (remaining, elapsed) = match self.round.phase {
            Phase::Waiting => (self.config.waiting_duration.saturating_sub(since_phase), Duration::ZERO),
            Phase::Running => (Duration::ZERO, since_phase),
            Phase::Crashed => (self.config.cooldown_duration.saturating_sub(since_phase), Duration::ZERO),
        };

        RoundSnapshot {
            round_id: self.round.id,
            phase: self.round.phase,
            multiplier: self.round.multiplier,
            remaining_ms: remaining.as_millis() as u64,
            elapsed_ms: elapsed.as_millis() as u64,
            commitment: self.round.commitment.map(hex::encode),
            crash_point: self.round.revealed_crash_point(),
        }
    }

    /// The live round.
    pub fn round(&self) -> &Round {
        &self.round
    }

    /// Ledger (read-only).
    pub fn ledger(&self) -> &BetLedger {
        &self.ledger
    }

    /// Finished rounds, most recent first.
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Players exposed in the live round.
    pub fn active_players(&self) -> Vec<RosterEntry> {
        self.ledger.active_players()
    }

    /// Balance for a player.
    pub fn balance(&self, player_id: &PlayerId) -> Option<Amount> {
        self.ledger.balance(player_id)
    }

    /// Fairness proof for a round, only once that round has crashed.
    pub fn reveal_proof_for(&self, round_id: RoundId) -> Option<FairnessProof> {
        let live_and_uncrashed = round_id == self.round.id && self.round.phase != Phase::Crashed;
        if round_id > self.round.id || live_and_uncrashed {
            return None;
        }
        self.generator.reveal_proof_for(round_id)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Open an account with the configured starting balance (no-op if open).
    pub fn open_account(&mut self, player_id: PlayerId) -> Result<Amount, AccountLimitReached> {
        self.ledger.open_account(player_id, self.config.starting_balance)
    }

    /// Apply due transitions and publish the multiplier. Called once per tick.
    pub fn advance(&mut self, now: Instant) -> Phase {
        self.catch_up(now);

        if self.round.phase == Phase::Running {
            let elapsed = now.saturating_duration_since(self.round.phase_started_at);
            self.events.publish(EngineEvent::MultiplierUpdate {
                round_id: self.round.id,
                value: self.round.multiplier,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        self.round.phase
    }

    /// Place a bet on the live round.
    ///
    /// `price` comes from the price source, read outside the lock.
    pub fn place_bet(
        &mut self,
        now: Instant,
        player_id: PlayerId,
        amount: Amount,
        currency: Currency,
        price: Option<f64>,
    ) -> Result<Bet, Rejection> {
        self.catch_up(now);

        match self.ledger.place_bet(self.context(), player_id, amount, currency, price) {
            Ok(bet) => {
                self.events.publish(EngineEvent::BetPlaced { bet: bet.clone() });
                self.publish_roster();
                Ok(bet)
            }
            Err(rejection) => {
                debug!("Bet from {} rejected: {}", player_id.short(), rejection);
                Err(rejection)
            }
        }
    }

    /// Cash out at the multiplier in force at `now`.
    pub fn cash_out(&mut self, now: Instant, player_id: PlayerId) -> Result<Settlement, Rejection> {
        self.catch_up(now);

        match self.ledger.cash_out(self.context(), player_id) {
            Ok(settlement) => {
                self.events.publish(EngineEvent::CashedOut { settlement: settlement.clone() });
                self.publish_roster();
                Ok(settlement)
            }
            Err(rejection) => {
                debug!("Cashout from {} rejected: {}", player_id.short(), rejection);
                Err(rejection)
            }
        }
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    fn context(&self) -> RoundContext {
        RoundContext {
            round_id: self.round.id,
            phase: self.round.phase,
            multiplier: self.round.multiplier,
        }
    }

    /// Apply every transition due at or before `now`.
    fn catch_up(&mut self, now: Instant) {
        for _ in 0..MAX_TRANSITIONS_PER_CALL {
            match self.round.phase {
                Phase::Waiting => {
                    let deadline = self.round.phase_started_at + self.config.waiting_duration;
                    if now < deadline {
                        return;
                    }
                    self.start_round(deadline, now);
                }
                Phase::Running => {
                    let crash_point = self.round.crash_point().unwrap_or(1.0);
                    let elapsed = now.saturating_duration_since(self.round.phase_started_at);
                    let multiplier = self.clock.multiplier_at(elapsed.as_secs_f64());
                    if multiplier < crash_point {
                        self.round.multiplier = multiplier;
                        return;
                    }
                    let crash_instant = self.scheduled_crash_instant(crash_point).min(now);
                    self.crash(crash_instant, now);
                }
                Phase::Crashed => {
                    let deadline = self.round.phase_started_at + self.config.cooldown_duration;
                    if now < deadline {
                        return;
                    }
                    self.finish_cooldown(deadline, now);
                }
            }
        }
        warn!("Catch-up hit {} transitions; resuming on next call", MAX_TRANSITIONS_PER_CALL);
    }

    fn scheduled_crash_instant(&self, crash_point: f64) -> Instant {
        let start = self.round.phase_started_at;
        Duration::try_from_secs_f64(self.clock.elapsed_for(crash_point))
            .ok()
            .and_then(|offset| start.checked_add(offset))
            .unwrap_or(start)
    }

    /// Waiting → Running. Requests the crash point; aborts the round on failure.
    fn start_round(&mut self, at: Instant, now: Instant) {
        let round_id = self.round.id;

        match self.generator.generate(round_id).and_then(validate_crash_point) {
            Ok(crash_point) => {
                debug!("Round {} armed at {:.2}x", round_id, crash_point);
                self.round.begin_running(crash_point, at);
                info!("Round {} started with {} bets", round_id, self.ledger.bets().count());
                self.events.publish(EngineEvent::RoundStarted { round_id });
            }
            Err(e) => self.abort_round(e, at, now),
        }
    }

    /// Running → Crashed. Bets are settled before the phase flips.
    fn crash(&mut self, at: Instant, now: Instant) {
        let round_id = self.round.id;
        let crash_point = self.round.crash_point().unwrap_or(1.0);

        let lost = self.ledger.settle_round(round_id, crash_point);
        self.round.mark_crashed(at, now);

        info!("Round {} crashed at {:.2}x ({} bets lost)", round_id, crash_point, lost.len());

        self.events.publish(EngineEvent::RoundCrashed {
            round_id,
            crash_point,
            proof: self.generator.reveal_proof_for(round_id),
        });
        self.events.publish(EngineEvent::BetsSettled { round_id, lost: lost.len() });
        self.publish_roster();
    }

    /// Crashed → Waiting. Archives the round and opens the next one.
    fn finish_cooldown(&mut self, at: Instant, now: Instant) {
        let record = HistoryRecord {
            round_id: self.round.id,
            crash_point: self.round.multiplier,
            ended_at: self.round.crashed_at.unwrap_or_else(|| wall_clock_at(at, now)),
        };
        self.history.append(record.clone());
        self.events.publish(EngineEvent::HistoryAppended { record });

        self.open_round(self.round.id.next(), at, now);
    }

    /// Abort the live round: refund every bet, skip history, open the next.
    fn abort_round(&mut self, error: GeneratorError, at: Instant, now: Instant) {
        let round_id = self.round.id;
        let refunded = self.ledger.refund_round(round_id);

        warn!("Round {} aborted ({}); refunded {} bets", round_id, error, refunded.len());

        self.events.publish(EngineEvent::RoundAborted {
            round_id,
            reason: error.to_string(),
            refunded: refunded.len(),
        });
        self.publish_roster();

        self.open_round(round_id.next(), at, now);
    }

    fn open_round(&mut self, round_id: RoundId, at: Instant, now: Instant) {
        let commitment = self.generator.commit(round_id);
        self.round = Round::new(round_id, at, commitment);
        self.ledger.begin_round(round_id);
        self.announce_waiting(now);
    }

    fn announce_waiting(&self, now: Instant) {
        let deadline = self.round.phase_started_at + self.config.waiting_duration;
        let countdown = deadline.saturating_duration_since(now);

        debug!("Round {} open for bets ({:?})", self.round.id, countdown);

        self.events.publish(EngineEvent::RoundWaiting {
            round_id: self.round.id,
            countdown_ms: countdown.as_millis() as u64,
            commitment: self.round.commitment.map(hex::encode),
        });
    }

    fn publish_roster(&self) {
        self.events.publish(EngineEvent::PlayersChanged {
            players: self.ledger.active_players(),
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================
