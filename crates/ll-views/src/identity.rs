use ll_api_types::{Identity, Session, WalletAddress};
use ll_chain_client::{ClientResult, TxReceipt};
use ll_contract::RegisterIdentity;
use ll_session::SessionManager;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentitySnapshot {
    pub account: Option<WalletAddress>,
    /// `None` means "not registered" for `account`.
    pub identity: Option<Identity>,
}

impl IdentitySnapshot {
    pub fn is_registered(&self) -> bool {
        self.identity.is_some()
    }
}

pub struct IdentityView {
    sessions: Arc<SessionManager>,
    current: IdentitySnapshot,
    loaded: bool,
}

impl IdentityView {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            current: IdentitySnapshot::default(),
            loaded: false,
        }
    }

    pub fn current(&self) -> &IdentitySnapshot {
        &self.current
    }

    /// Refetches only when `session` names a different account than the one
    /// last loaded.
    pub async fn sync(&mut self, session: &Session) -> ClientResult<&IdentitySnapshot> {
        if self.loaded && session.account() == self.current.account.as_ref() {
            return Ok(&self.current);
        }
        self.refresh(session).await
    }

    pub async fn refresh(&mut self, session: &Session) -> ClientResult<&IdentitySnapshot> {
        let Some(account) = session.account().cloned() else {
            self.current = IdentitySnapshot::default();
            self.loaded = true;
            return Ok(&self.current);
        };

        let identity = self.sessions.reader().get_identity(&account).await?;
        debug!("identity for {}: registered={}", account, identity.is_some());
        self.current = IdentitySnapshot {
            account: Some(account),
            identity,
        };
        self.loaded = true;
        Ok(&self.current)
    }

    /// Registers the snapshot's account, then reloads it so the new record
    /// is visible. Once the write is confirmed its receipt is returned even
    /// if the reload fails.
    pub async fn register(&mut self, session: &Session, request: &RegisterIdentity) -> ClientResult<TxReceipt> {
        let contract = self.sessions.contract_for(session)?;
        let receipt = contract.register_identity(request).await?;
        if let Err(err) = self.refresh(session).await {
            warn!("registration {} confirmed but identity reload failed: {}", receipt.tx_hash.0, err);
        }
        Ok(receipt)
    }
}
