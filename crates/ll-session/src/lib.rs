//! Wallet connection lifecycle.
//!
//! [`SessionManager`] is the only writer of the [`Session`] snapshot. Readers
//! take clones through [`SessionManager::session`] or follow changes through
//! [`SessionManager::watch`]; nobody holds a mutable reference to it.

use ll_api_types::{ChainId, ConnectionState, LifelineConfig, Session, WalletAddress};
use ll_chain_client::{ChainRpc, ClientError, ClientResult, WalletEvent, WalletProvider, with_timeout};
use ll_contract::LifelineContract;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct SessionManager {
    wallet: Option<Arc<dyn WalletProvider>>,
    rpc: Arc<dyn ChainRpc>,
    config: LifelineConfig,
    state: Arc<watch::Sender<Session>>,
    /// Bumped by every connect attempt, every disconnect and every empty
    /// account notification so a slow connect or silent reconnect cannot
    /// resurrect a session the user already left.
    epoch: Arc<AtomicU64>,
    listener: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// `wallet` is `None` when no wallet is installed. Must be called inside a
    /// Tokio runtime for change notifications to be tracked.
    pub fn new(
        config: LifelineConfig,
        rpc: Arc<dyn ChainRpc>,
        wallet: Option<Arc<dyn WalletProvider>>,
    ) -> Self {
        let (sender, _) = watch::channel(Session::disconnected());
        let state = Arc::new(sender);
        let epoch = Arc::new(AtomicU64::new(0));
        let listener = wallet.as_ref().and_then(|wallet| {
            spawn_listener(wallet.subscribe(), Arc::clone(&state), Arc::clone(&epoch))
        });

        Self {
            wallet,
            rpc,
            config,
            state,
            epoch,
            listener,
        }
    }

    pub fn config(&self) -> &LifelineConfig {
        &self.config
    }

    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Prompts the wallet for account access and binds the first account.
    pub async fn connect(&self) -> ClientResult<Session> {
        let Some(wallet) = self.wallet.clone() else {
            warn!("connect requested but no wallet is installed");
            return Err(ClientError::WalletUnavailable);
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(Session::connecting());
        debug!("requesting wallet accounts");

        let outcome = self.resolve(wallet.as_ref(), true).await.and_then(|found| {
            // An approved prompt that hands back no accounts is a refusal.
            found.ok_or(ClientError::UserRejected)
        });

        match outcome {
            Ok((account, chain_id)) => self.commit(epoch, Session::connected(account, chain_id)),
            Err(err) => {
                self.state.send_if_modified(|session| {
                    let stale = self.epoch.load(Ordering::SeqCst) != epoch
                        || session.state != ConnectionState::Connecting;
                    if !stale {
                        *session = Session::disconnected();
                    }
                    !stale
                });
                warn!("wallet connect failed: {}", err);
                Err(err)
            }
        }
    }

    /// Startup reconnect without a permission prompt. Absence of an
    /// authorized account is the normal disconnected state, not an error.
    pub async fn check_existing_connection(&self) -> Session {
        let Some(wallet) = self.wallet.clone() else {
            return self.session();
        };
        let epoch = self.epoch.load(Ordering::SeqCst);

        match self.resolve(wallet.as_ref(), false).await {
            Ok(Some((account, chain_id))) => {
                let restored = Session::connected(account, chain_id);
                let applied = self.state.send_if_modified(|session| {
                    let fresh = self.epoch.load(Ordering::SeqCst) == epoch
                        && session.state == ConnectionState::Disconnected;
                    if fresh {
                        *session = restored.clone();
                    }
                    fresh
                });
                if let (true, Some(account)) = (applied, &restored.account) {
                    info!("restored wallet session for {}", account);
                }
            }
            Ok(None) => debug!("no previously authorized wallet account"),
            Err(err) => debug!("silent reconnect skipped: {}", err),
        }
        self.session()
    }

    /// Local only; browser wallets have no programmatic disconnect.
    pub fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(Session::disconnected());
        info!("wallet session disconnected");
    }

    /// Facade bound to the current account.
    pub fn contract(&self) -> ClientResult<LifelineContract> {
        self.contract_for(&self.session())
    }

    /// Facade bound to the account of a given snapshot. Callers re-derive it
    /// from the snapshot they act on instead of caching one. A snapshot whose
    /// account is no longer the live one cannot sign.
    pub fn contract_for(&self, session: &Session) -> ClientResult<LifelineContract> {
        let (Some(account), Some(wallet)) = (session.account(), self.wallet.as_ref()) else {
            return Err(ClientError::NotConnected);
        };
        if self.state.borrow().account() != Some(account) {
            debug!("refusing to sign for stale session of {}", account);
            return Err(ClientError::NotConnected);
        }
        Ok(self.reader().with_signer(Arc::clone(wallet), account.clone()))
    }

    /// Read-only facade; works without a connected wallet.
    pub fn reader(&self) -> LifelineContract {
        LifelineContract::from_config(&self.config, Arc::clone(&self.rpc))
    }

    async fn resolve(
        &self,
        wallet: &dyn WalletProvider,
        prompt: bool,
    ) -> ClientResult<Option<(WalletAddress, ChainId)>> {
        let accounts = if prompt {
            // The user may take a while to answer the prompt.
            with_timeout(self.config.confirmation_timeout, wallet.request_accounts()).await?
        } else {
            with_timeout(self.config.call_timeout, wallet.accounts()).await?
        };
        let Some(account) = accounts.into_iter().next() else {
            return Ok(None);
        };
        let chain_id = with_timeout(self.config.call_timeout, wallet.chain_id()).await?;
        Ok(Some((account, chain_id.normalized())))
    }

    fn commit(&self, epoch: u64, next: Session) -> ClientResult<Session> {
        let applied = self.state.send_if_modified(|session| {
            let current = self.epoch.load(Ordering::SeqCst) == epoch
                && session.state == ConnectionState::Connecting;
            if current {
                *session = next.clone();
            }
            current
        });
        if !applied {
            debug!("connect finished after the session moved on; discarding");
            return Err(ClientError::NotConnected);
        }

        if let (Some(account), Some(chain_id)) = (&next.account, &next.chain_id) {
            info!("wallet connected: {} on chain {}", account, chain_id);
            if *chain_id != self.config.network.chain_id.normalized() {
                warn!(
                    "wallet is on chain {} but {} expects {}",
                    chain_id, self.config.network.chain_name, self.config.network.chain_id
                );
            }
        }
        Ok(next)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Next snapshot after a wallet notification.
///
/// An empty account set always disconnects. A non-empty set only rebinds an
/// existing connection; it never connects on its own. A chain change touches
/// nothing but the chain id.
pub fn apply_event(session: &Session, event: &WalletEvent) -> Session {
    match event {
        WalletEvent::AccountsChanged(accounts) => match accounts.first() {
            None => Session::disconnected(),
            Some(first) if session.is_connected() => Session {
                account: Some(first.clone()),
                ..session.clone()
            },
            Some(_) => session.clone(),
        },
        WalletEvent::ChainChanged(chain_id) => Session {
            chain_id: Some(chain_id.normalized()),
            ..session.clone()
        },
    }
}

fn spawn_listener(
    events: broadcast::Receiver<WalletEvent>,
    state: Arc<watch::Sender<Session>>,
    epoch: Arc<AtomicU64>,
) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => Some(runtime.spawn(listen(events, state, epoch))),
        Err(_) => {
            warn!("no async runtime; wallet notifications will not be tracked");
            None
        }
    }
}

async fn listen(
    mut events: broadcast::Receiver<WalletEvent>,
    state: Arc<watch::Sender<Session>>,
    epoch: Arc<AtomicU64>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if matches!(&event, WalletEvent::AccountsChanged(accounts) if accounts.is_empty()) {
                    // Invalidates any connect or silent reconnect still in flight.
                    epoch.fetch_add(1, Ordering::SeqCst);
                }
                let changed = state.send_if_modified(|session| {
                    let next = apply_event(session, &event);
                    let changed = next != *session;
                    *session = next;
                    changed
                });
                if changed {
                    match &event {
                        WalletEvent::AccountsChanged(accounts) if accounts.is_empty() => {
                            info!("wallet reported no accounts; session disconnected")
                        }
                        WalletEvent::AccountsChanged(_) => info!("active wallet account changed"),
                        WalletEvent::ChainChanged(chain_id) => info!("wallet switched to chain {}", chain_id),
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("missed {} wallet notifications", skipped),
            Err(RecvError::Closed) => {
                debug!("wallet notification stream closed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ll_api_types::NetworkConfig;
    use ll_chain_client::{TxHash, TxRequest};
    use ll_contract::testing::{SimulatedLifeline, test_address};
    use std::time::Duration;
    use tokio::sync::Notify;

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> LifelineConfig {
        LifelineConfig::new(NetworkConfig::blockdag_testnet(), SimulatedLifeline::contract_address())
    }

    fn manager(sim: &Arc<SimulatedLifeline>) -> SessionManager {
        SessionManager::new(config(), sim.clone(), Some(sim.clone()))
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<Session>, predicate: F) -> anyhow::Result<Session>
    where
        F: FnMut(&Session) -> bool,
    {
        let session = tokio::time::timeout(WAIT, rx.wait_for(predicate)).await??;
        Ok(session.clone())
    }

    #[tokio::test]
    async fn connect_binds_first_account_and_chain() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.set_accounts(vec![test_address(1), test_address(2)]).await;
        let manager = manager(&sim);

        let session = manager.connect().await?;
        assert_eq!(session.state, ConnectionState::Connected);
        assert_eq!(session.account, Some(test_address(1)));
        assert_eq!(session.chain_id, Some(ChainId::from_u64(1000)));

        let contract = manager.contract()?;
        assert_eq!(contract.account(), Some(&test_address(1)));
        Ok(())
    }

    #[tokio::test]
    async fn missing_wallet_is_unavailable() {
        let sim = Arc::new(SimulatedLifeline::new());
        let manager = SessionManager::new(config(), sim.clone(), None);

        assert_eq!(manager.connect().await, Err(ClientError::WalletUnavailable));
        assert_eq!(manager.session(), Session::disconnected());
        assert_eq!(manager.check_existing_connection().await, Session::disconnected());
    }

    #[tokio::test]
    async fn failing_wallet_is_unavailable() {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.authorize().await;
        sim.set_wallet_missing(true).await;
        let manager = manager(&sim);

        assert_eq!(manager.connect().await, Err(ClientError::WalletUnavailable));
        assert_eq!(manager.session(), Session::disconnected());
        assert_eq!(manager.check_existing_connection().await, Session::disconnected());

        sim.set_wallet_missing(false).await;
        assert!(manager.check_existing_connection().await.is_connected());
    }

    #[tokio::test]
    async fn declined_prompt_returns_to_disconnected() {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.set_reject_prompts(true).await;
        let manager = manager(&sim);

        let err = manager.connect().await.unwrap_err();
        assert_eq!(err, ClientError::UserRejected);
        assert!(err.requires_user_action());
        assert_eq!(manager.session().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn empty_approval_is_a_rejection() {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.set_accounts(Vec::new()).await;
        let manager = manager(&sim);

        assert_eq!(manager.connect().await, Err(ClientError::UserRejected));
        assert!(!manager.session().is_connected());
    }

    #[tokio::test]
    async fn silent_check_without_authorization_stays_disconnected() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let manager = manager(&sim);
        assert_eq!(manager.check_existing_connection().await, Session::disconnected());

        sim.authorize().await;
        let restored = manager.check_existing_connection().await;
        assert!(restored.is_connected());
        assert_eq!(restored.account, Some(test_address(1)));
        Ok(())
    }

    #[tokio::test]
    async fn empty_account_notification_disconnects() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let manager = manager(&sim);
        manager.connect().await?;
        let mut rx = manager.watch();

        sim.switch_accounts(Vec::new()).await;
        let session = wait_for(&mut rx, |s| s.state == ConnectionState::Disconnected).await?;
        assert_eq!(session, Session::disconnected());
        assert_eq!(manager.contract().err(), Some(ClientError::NotConnected));
        Ok(())
    }

    #[tokio::test]
    async fn chain_change_only_touches_chain() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let manager = manager(&sim);
        let before = manager.connect().await?;
        let mut rx = manager.watch();

        sim.switch_chain(ChainId("0xAA36A7".to_owned())).await;
        let after = wait_for(&mut rx, |s| s.chain_id != before.chain_id).await?;
        assert_eq!(after.chain_id, Some(ChainId("0xaa36a7".to_owned())));
        assert_eq!(after.account, before.account);
        assert_eq!(after.state, ConnectionState::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn account_switch_rebinds_in_place() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let manager = manager(&sim);
        let before = manager.connect().await?;
        let mut rx = manager.watch();

        sim.switch_accounts(vec![test_address(9)]).await;
        let after = wait_for(&mut rx, |s| s.account == Some(test_address(9))).await?;
        assert_eq!(after.chain_id, before.chain_id);
        assert_eq!(manager.contract()?.account(), Some(&test_address(9)));
        Ok(())
    }

    #[tokio::test]
    async fn superseded_snapshot_cannot_sign() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.set_accounts(vec![test_address(1), test_address(2)]).await;
        let manager = manager(&sim);
        let first = manager.connect().await?;
        assert!(manager.contract_for(&first).is_ok());
        let mut rx = manager.watch();

        sim.switch_accounts(vec![test_address(2)]).await;
        let second = wait_for(&mut rx, |s| s.account == Some(test_address(2))).await?;
        assert_eq!(manager.contract_for(&first).err(), Some(ClientError::NotConnected));
        assert_eq!(manager.contract_for(&second)?.account(), Some(&test_address(2)));

        manager.disconnect();
        assert_eq!(manager.contract_for(&second).err(), Some(ClientError::NotConnected));
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_is_local() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let manager = manager(&sim);
        manager.connect().await?;
        let calls = sim.request_count();

        manager.disconnect();
        assert_eq!(manager.session(), Session::disconnected());
        assert_eq!(sim.request_count(), calls);
        Ok(())
    }

    #[tokio::test]
    async fn dropping_manager_releases_subscription() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        for _ in 0..3 {
            let manager = manager(&sim);
            assert_eq!(sim.subscriber_count(), 1);
            drop(manager);
            for _ in 0..100 {
                if sim.subscriber_count() == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            assert_eq!(sim.subscriber_count(), 0);
        }
        Ok(())
    }

    /// Holds account answers back until released, as a slow wallet would.
    struct GatedWallet {
        inner: Arc<SimulatedLifeline>,
        gate: Notify,
    }

    #[async_trait]
    impl WalletProvider for GatedWallet {
        async fn request_accounts(&self) -> ClientResult<Vec<WalletAddress>> {
            let accounts = self.inner.request_accounts().await;
            self.gate.notified().await;
            accounts
        }

        async fn accounts(&self) -> ClientResult<Vec<WalletAddress>> {
            let accounts = self.inner.accounts().await;
            self.gate.notified().await;
            accounts
        }

        async fn chain_id(&self) -> ClientResult<ChainId> {
            self.inner.chain_id().await
        }

        async fn send_transaction(&self, tx: TxRequest) -> ClientResult<TxHash> {
            self.inner.send_transaction(tx).await
        }

        fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn connect_finishing_after_disconnect_is_discarded() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let wallet = Arc::new(GatedWallet {
            inner: sim.clone(),
            gate: Notify::new(),
        });
        let manager = SessionManager::new(config(), sim.clone(), Some(wallet.clone()));
        let mut rx = manager.watch();

        let interrupt = async {
            wait_for(&mut rx, |s| s.state == ConnectionState::Connecting).await?;
            manager.disconnect();
            wallet.gate.notify_one();
            anyhow::Ok(())
        };
        let (connected, interrupted) = tokio::join!(manager.connect(), interrupt);
        interrupted?;

        assert_eq!(connected, Err(ClientError::NotConnected));
        assert_eq!(manager.session(), Session::disconnected());
        Ok(())
    }

    #[tokio::test]
    async fn logout_during_silent_reconnect_wins() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.authorize().await;
        let wallet = Arc::new(GatedWallet {
            inner: sim.clone(),
            gate: Notify::new(),
        });
        let manager = SessionManager::new(config(), sim.clone(), Some(wallet.clone()));
        let before = manager.epoch.load(Ordering::SeqCst);

        let logout = async {
            sim.switch_accounts(Vec::new()).await;
            for _ in 0..500 {
                if manager.epoch.load(Ordering::SeqCst) != before {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            wallet.gate.notify_one();
        };
        let (restored, ()) = tokio::join!(manager.check_existing_connection(), logout);

        assert_ne!(manager.epoch.load(Ordering::SeqCst), before);
        assert_eq!(restored, Session::disconnected());
        assert_eq!(manager.session(), Session::disconnected());
        Ok(())
    }

    #[test]
    fn events_apply_to_snapshots() {
        let connected = Session::connected(test_address(1), ChainId::from_u64(1000));

        let cleared = apply_event(&connected, &WalletEvent::AccountsChanged(Vec::new()));
        assert_eq!(cleared, Session::disconnected());
        let cleared = apply_event(&Session::connecting(), &WalletEvent::AccountsChanged(Vec::new()));
        assert_eq!(cleared, Session::disconnected());

        let ignored = apply_event(
            &Session::disconnected(),
            &WalletEvent::AccountsChanged(vec![test_address(2)]),
        );
        assert_eq!(ignored, Session::disconnected());

        let moved = apply_event(&connected, &WalletEvent::ChainChanged(ChainId("0x01".to_owned())));
        assert_eq!(moved.chain_id, Some(ChainId("0x1".to_owned())));
        assert_eq!(moved.account, connected.account);
        assert!(moved.is_connected());
    }
}
