use ll_api_types::{Session, WalletAddress};
use ll_chain_client::ClientResult;
use ll_format::{format_address, network_name};
use ll_session::SessionManager;
use serde::Serialize;
use std::sync::Arc;

/// Overview numbers for the landing screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSnapshot {
    pub network: String,
    pub account: Option<WalletAddress>,
    /// Shortened form of `account` for display.
    pub account_label: Option<String>,
    pub registered: bool,
    pub verified: bool,
    pub crisis_count: u64,
    pub emergency_mode: bool,
}

pub struct DashboardView {
    sessions: Arc<SessionManager>,
}

impl DashboardView {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub async fn load(&self, session: &Session) -> ClientResult<DashboardSnapshot> {
        let contract = self.sessions.reader();
        let chain_id = session
            .chain_id
            .clone()
            .unwrap_or_else(|| self.sessions.config().network.chain_id.clone());

        let identity = match session.account() {
            Some(account) => contract.get_identity(account).await?,
            None => None,
        };

        Ok(DashboardSnapshot {
            network: network_name(&chain_id),
            account: session.account().cloned(),
            account_label: session.account().map(|a| format_address(a.as_str())),
            registered: identity.is_some(),
            verified: identity.as_ref().is_some_and(|i| i.verified),
            crisis_count: contract.get_crisis_count().await?,
            emergency_mode: contract.is_emergency_mode().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use ll_api_types::{ChainId, EmergencyType, Identity, Sector};
    use ll_contract::testing::{SimulatedLifeline, test_address};

    #[tokio::test]
    async fn summarises_connected_account() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.seed_identity(Identity {
            wallet: test_address(1),
            did: "did:lifeline:medic".to_owned(),
            sector: Sector::Healthcare,
            metadata_uri: None,
            verified: true,
            registration_date: 1_700_000_000,
            last_verified: 1_700_000_100,
        })
        .await;
        sim.seed_crisis(EmergencyType::NaturalDisaster, "Hills", 1, test_address(4))
            .await;
        let (sessions, session) = fixtures::connected(&sim).await?;

        let snapshot = DashboardView::new(sessions).load(&session).await?;
        assert_eq!(snapshot.network, "BlockDAG Testnet");
        assert_eq!(snapshot.account_label.as_deref(), Some("0xa000...0001"));
        assert!(snapshot.registered);
        assert!(snapshot.verified);
        assert_eq!(snapshot.crisis_count, 1);
        assert!(!snapshot.emergency_mode);
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_uses_configured_network() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let view = DashboardView::new(fixtures::sessions(&sim));

        let snapshot = view.load(&Session::disconnected()).await?;
        assert_eq!(snapshot.network, "BlockDAG Testnet");
        assert_eq!(snapshot.account, None);
        assert!(!snapshot.registered);

        let elsewhere = Session {
            chain_id: Some(ChainId::from_u64(31_337)),
            ..Session::disconnected()
        };
        assert_eq!(view.load(&elsewhere).await?.network, "Chain 0x7a69");
        Ok(())
    }
}
