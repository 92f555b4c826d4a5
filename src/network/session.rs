//! Client Sessions
//!
//! Per-connection state and request handling. Transport-agnostic: the server
//! feeds parsed [`ClientMessage`]s in and writes the replies out, so all of the
//! game-facing behavior can be exercised without a socket.

use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::engine::events::EngineEvent;
use crate::engine::price::{Currency, PriceSource};
use crate::engine::scheduler::RoundScheduler;
use crate::engine::state::PlayerId;
use crate::network::auth::{authenticate, AuthConfig, Identity};
use crate::network::driver::SharedScheduler;
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, MultiplierFrame, ServerError, ServerMessage,
};

/// Handles every connection shares.
#[derive(Clone)]
pub struct GameContext {
    /// The round engine.
    pub scheduler: SharedScheduler,
    /// Currency prices (read without the scheduler lock).
    pub prices: Arc<dyn PriceSource>,
    /// Token validation settings.
    pub auth: Arc<AuthConfig>,
    /// Server version reported on auth.
    pub version: String,
}

impl GameContext {
    /// Wrap a scheduler for sharing.
    pub fn new(scheduler: RoundScheduler, prices: Arc<dyn PriceSource>, auth: AuthConfig) -> Self {
        Self {
            scheduler: Arc::new(tokio::sync::RwLock::new(scheduler)),
            prices,
            auth: Arc::new(auth),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Something to write to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON text frame.
    Message(ServerMessage),
    /// Binary multiplier tick.
    Frame(MultiplierFrame),
}

/// State of one connection.
pub struct ClientSession {
    ctx: GameContext,
    identity: Option<Identity>,
    binary_ticks: bool,
}

impl ClientSession {
    /// New, unauthenticated session.
    pub fn new(ctx: GameContext) -> Self {
        Self {
            ctx,
            identity: None,
            binary_ticks: false,
        }
    }

    /// Account this connection acts for, once authenticated.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.identity.as_ref().map(|i| i.player_id)
    }

    /// Handle one client message, returning the direct replies.
    #[instrument(skip_all)]
    pub async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Auth(req) => self.handle_auth(req).await,
            ClientMessage::PlaceBet { amount, currency } => self.handle_place_bet(amount, &currency).await,
            ClientMessage::CashOut => self.handle_cash_out().await,
            ClientMessage::SyncRequest => self.sync().await,
            ClientMessage::HistoryRequest => {
                let records = self.ctx.scheduler.read().await.history().recent();
                vec![ServerMessage::HistorySnapshot { records }]
            }
            ClientMessage::ProofRequest { round_id } => {
                let proof = self.ctx.scheduler.read().await.reveal_proof_for(round_id);
                vec![ServerMessage::FairnessProof { round_id, proof }]
            }
            ClientMessage::Ping { timestamp } => vec![ServerMessage::Pong {
                timestamp,
                server_time: Utc::now().timestamp_millis().max(0) as u64,
            }],
        }
    }

    /// What this client should receive for an engine event.
    pub fn translate(&self, event: &EngineEvent) -> Option<Outbound> {
        if self.binary_ticks {
            if let Some(frame) = MultiplierFrame::from_event(event) {
                return Some(Outbound::Frame(frame));
            }
        }
        ServerMessage::from_event(event).map(Outbound::Message)
    }

    /// Full picture of the game: snapshot, roster, history, and the caller's
    /// balance when authenticated.
    pub async fn sync(&self) -> Vec<ServerMessage> {
        let scheduler = self.ctx.scheduler.read().await;

        let mut replies = vec![
            ServerMessage::State(scheduler.current_state(Instant::now())),
            ServerMessage::Players { players: scheduler.active_players() },
            ServerMessage::HistorySnapshot { records: scheduler.history().recent() },
        ];
        if let Some(balance) = self.player_id().and_then(|id| scheduler.balance(&id)) {
            replies.push(ServerMessage::Balance { balance });
        }
        replies
    }

    async fn handle_auth(&mut self, req: AuthRequest) -> Vec<ServerMessage> {
        let identity = match authenticate(&req.token, &self.ctx.auth) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Authentication failed: {}", e);
                return self.auth_failure(e.code(), e.to_string());
            }
        };

        let opened = self.ctx.scheduler.write().await.open_account(identity.player_id);
        let balance = match opened {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Refusing player {}: {}", identity.player_id.short(), e);
                return self.auth_failure(ErrorCode::AccountLimitReached, e.to_string());
            }
        };
        info!(
            "Player {} authenticated ({})",
            identity.player_id.short(),
            if identity.guest { "guest" } else { identity.subject.as_str() }
        );

        let result = ServerMessage::AuthResult(AuthResult {
            success: true,
            player_id: Some(identity.player_id.to_uuid_string()),
            balance: Some(balance),
            guest: identity.guest,
            error: None,
            server_version: self.ctx.version.clone(),
        });
        self.identity = Some(identity);
        self.binary_ticks = req.binary_ticks;

        let mut replies = vec![result];
        replies.extend(self.sync().await);
        replies
    }

    fn auth_failure(&self, code: ErrorCode, reason: String) -> Vec<ServerMessage> {
        vec![
            ServerMessage::AuthResult(AuthResult {
                success: false,
                player_id: None,
                balance: None,
                guest: false,
                error: Some(reason.clone()),
                server_version: self.ctx.version.clone(),
            }),
            ServerMessage::Error(ServerError::new(code, reason)),
        ]
    }

    async fn handle_place_bet(&mut self, amount: f64, currency: &str) -> Vec<ServerMessage> {
        let Some(player_id) = self.player_id() else {
            return vec![not_authenticated()];
        };

        let currency = Currency::new(currency);
        let price = self.ctx.prices.price_of(&currency);

        let mut scheduler = self.ctx.scheduler.write().await;
        match scheduler.place_bet(Instant::now(), player_id, amount, currency, price) {
            Ok(bet) => {
                let balance = scheduler.balance(&player_id).unwrap_or_default();
                vec![ServerMessage::BetAccepted { bet }, ServerMessage::Balance { balance }]
            }
            Err(reason) => vec![ServerMessage::BetRejected { reason }],
        }
    }

    async fn handle_cash_out(&mut self) -> Vec<ServerMessage> {
        let Some(player_id) = self.player_id() else {
            return vec![not_authenticated()];
        };

        let result = self.ctx.scheduler.write().await.cash_out(Instant::now(), player_id);
        match result {
            Ok(settlement) => {
                debug!("Player {} cashed out at {:.2}x", player_id.short(), settlement.multiplier);
                vec![ServerMessage::CashoutResult {
                    amount: settlement.amount,
                    multiplier: settlement.multiplier,
                    balance: settlement.balance,
                }]
            }
            Err(reason) => vec![ServerMessage::CashoutRejected { reason }],
        }
    }
}

fn not_authenticated() -> ServerMessage {
    ServerMessage::Error(ServerError::new(ErrorCode::NotAuthenticated, "Must authenticate first"))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::crash_point::testing::ScriptedGenerator;
    use crate::engine::ledger::{BetStatus, Rejection};
    use crate::engine::price::StaticPriceSource;
    use crate::engine::state::{Phase, RoundId};

    fn context(waiting: Duration, crash_point: f64) -> GameContext {
        context_with(EngineConfig { waiting_duration: waiting, ..Default::default() }, crash_point)
    }

    fn context_with(config: EngineConfig, crash_point: f64) -> GameContext {
        let scheduler = RoundScheduler::new(
            config,
            Box::new(ScriptedGenerator::constant(crash_point)),
            Instant::now(),
        );
        GameContext::new(scheduler, Arc::new(StaticPriceSource::with_defaults()), AuthConfig::default())
    }

    async fn guest(ctx: &GameContext, token: &str) -> ClientSession {
        let mut session = ClientSession::new(ctx.clone());
        session
            .handle(ClientMessage::Auth(AuthRequest { token: token.into(), binary_ticks: false }))
            .await;
        session
    }

    fn place(amount: f64, currency: &str) -> ClientMessage {
        ClientMessage::PlaceBet { amount, currency: currency.into() }
    }

    #[tokio::test]
    async fn test_auth_opens_account_and_syncs() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = ClientSession::new(ctx);

        let replies = session
            .handle(ClientMessage::Auth(AuthRequest { token: "alice".into(), binary_ticks: false }))
            .await;

        match &replies[0] {
            ServerMessage::AuthResult(result) => {
                assert!(result.success);
                assert!(result.guest);
                assert_eq!(result.balance, Some(1000.0));
            }
            other => panic!("expected auth result, got {:?}", other),
        }
        assert!(matches!(replies[1], ServerMessage::State(_)));
        assert!(replies.contains(&ServerMessage::Balance { balance: 1000.0 }));
        assert!(session.player_id().is_some());
    }

    #[tokio::test]
    async fn test_new_accounts_capped() {
        let ctx = context_with(EngineConfig { max_accounts: 3, ..Default::default() }, 2.0);
        let mut session = ClientSession::new(ctx.clone());

        let mut refused = 0;
        for i in 0..50 {
            let replies = session
                .handle(ClientMessage::Auth(AuthRequest { token: format!("t{}", i), binary_ticks: false }))
                .await;
            if let [ServerMessage::AuthResult(result), ServerMessage::Error(error)] = &replies[..] {
                assert!(!result.success);
                assert_eq!(error.code, ErrorCode::AccountLimitReached);
                refused += 1;
            }
        }
        assert_eq!(refused, 47);

        let scheduler = ctx.scheduler.read().await;
        assert_eq!(scheduler.ledger().account_count(), 3);
        drop(scheduler);

        // An existing player still gets back in at the limit
        let replies = session
            .handle(ClientMessage::Auth(AuthRequest { token: "t0".into(), binary_ticks: false }))
            .await;
        assert!(matches!(&replies[0], ServerMessage::AuthResult(r) if r.success));
    }

    #[tokio::test]
    async fn test_rejected_token_codes() {
        let auth = AuthConfig { allow_guests: false, ..Default::default() };
        let scheduler = RoundScheduler::new(
            EngineConfig::default(),
            Box::new(ScriptedGenerator::constant(2.0)),
            Instant::now(),
        );
        let ctx = GameContext::new(scheduler, Arc::new(StaticPriceSource::with_defaults()), auth);
        let mut session = ClientSession::new(ctx);

        let replies = session
            .handle(ClientMessage::Auth(AuthRequest { token: "alice".into(), binary_ticks: false }))
            .await;
        assert!(matches!(
            &replies[..],
            [ServerMessage::AuthResult(AuthResult { success: false, .. }),
             ServerMessage::Error(ServerError { code: ErrorCode::AuthFailed, .. })]
        ));
        assert!(session.player_id().is_none());
    }

    #[tokio::test]
    async fn test_requires_auth() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = ClientSession::new(ctx);

        for msg in [place(10.0, "BTC"), ClientMessage::CashOut] {
            let replies = session.handle(msg).await;
            assert!(matches!(
                &replies[..],
                [ServerMessage::Error(ServerError { code: ErrorCode::NotAuthenticated, .. })]
            ));
        }
    }

    #[tokio::test]
    async fn test_place_bet_replies() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = guest(&ctx, "alice").await;

        let replies = session.handle(place(10.0, "btc")).await;
        match &replies[..] {
            [ServerMessage::BetAccepted { bet }, ServerMessage::Balance { balance }] => {
                assert_eq!(bet.status, BetStatus::Active);
                assert_eq!(bet.currency.as_str(), "BTC");
                assert!((bet.crypto_amount - 10.0 / 60_000.0).abs() < 1e-15);
                assert_eq!(*balance, 990.0);
            }
            other => panic!("unexpected replies {:?}", other),
        }

        let replies = session.handle(place(10.0, "BTC")).await;
        assert_eq!(replies, vec![ServerMessage::BetRejected { reason: Rejection::DuplicateBet }]);
    }

    #[tokio::test]
    async fn test_unsupported_currency() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = guest(&ctx, "alice").await;

        let replies = session.handle(place(10.0, "DOGE")).await;
        assert_eq!(replies, vec![ServerMessage::BetRejected { reason: Rejection::UnsupportedCurrency }]);
    }

    #[tokio::test]
    async fn test_cash_out_while_waiting_rejected() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = guest(&ctx, "alice").await;
        session.handle(place(10.0, "ETH")).await;

        let replies = session.handle(ClientMessage::CashOut).await;
        assert_eq!(replies, vec![ServerMessage::CashoutRejected { reason: Rejection::RoundNotRunning }]);
    }

    #[tokio::test]
    async fn test_cash_out_once_running() {
        let ctx = context(Duration::from_millis(40), 100.0);
        let mut session = guest(&ctx, "alice").await;
        session.handle(place(10.0, "BTC")).await;

        tokio::time::sleep(Duration::from_millis(80)).await;

        let replies = session.handle(ClientMessage::CashOut).await;
        match &replies[..] {
            [ServerMessage::CashoutResult { amount, multiplier, balance }] => {
                assert!(*multiplier >= 1.0);
                assert_eq!(*amount, 10.0 * multiplier);
                assert_eq!(*balance, 990.0 + amount);
            }
            other => panic!("unexpected replies {:?}", other),
        }
        assert_eq!(ctx.scheduler.read().await.round().phase, Phase::Running);

        let replies = session.handle(ClientMessage::CashOut).await;
        assert_eq!(replies, vec![ServerMessage::CashoutRejected { reason: Rejection::AlreadyResolved }]);
    }

    #[tokio::test]
    async fn test_sessions_share_one_round() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut alice = guest(&ctx, "alice").await;
        let mut bob = guest(&ctx, "bob").await;

        alice.handle(place(10.0, "BTC")).await;
        bob.handle(place(20.0, "ETH")).await;

        let replies = alice.sync().await;
        let players = replies
            .iter()
            .find_map(|m| match m {
                ServerMessage::Players { players } => Some(players.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(players, 2);
    }

    #[tokio::test]
    async fn test_proof_withheld_for_live_round() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = ClientSession::new(ctx);

        let replies = session.handle(ClientMessage::ProofRequest { round_id: RoundId(1) }).await;
        assert_eq!(replies, vec![ServerMessage::FairnessProof { round_id: RoundId(1), proof: None }]);
    }

    #[tokio::test]
    async fn test_ping_and_history() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = ClientSession::new(ctx);

        let replies = session.handle(ClientMessage::Ping { timestamp: 42 }).await;
        assert!(matches!(replies[..], [ServerMessage::Pong { timestamp: 42, .. }]));

        let replies = session.handle(ClientMessage::HistoryRequest).await;
        assert_eq!(replies, vec![ServerMessage::HistorySnapshot { records: Vec::new() }]);
    }

    #[tokio::test]
    async fn test_binary_tick_translation() {
        let ctx = context(Duration::from_secs(10), 2.0);
        let mut session = ClientSession::new(ctx);
        let tick = EngineEvent::MultiplierUpdate { round_id: RoundId(1), value: 1.5, elapsed_ms: 6758 };

        assert!(matches!(session.translate(&tick), Some(Outbound::Message(_))));

        session
            .handle(ClientMessage::Auth(AuthRequest { token: "bot".into(), binary_ticks: true }))
            .await;
        assert!(matches!(session.translate(&tick), Some(Outbound::Frame(_))));

        let started = EngineEvent::RoundStarted { round_id: RoundId(1) };
        assert!(matches!(session.translate(&started), Some(Outbound::Message(_))));
    }
}
