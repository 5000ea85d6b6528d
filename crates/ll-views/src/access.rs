use ll_api_types::Session;
use ll_chain_client::{ClientResult, TxReceipt};
use ll_contract::BreakGlassAcknowledgement;
use ll_session::SessionManager;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Only the oldest crises are checked; each check is one contract read.
pub const ACCESS_CHECK_LIMIT: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessSnapshot {
    pub emergency_mode: bool,
    /// Crisis ids the account may open. Denied ids are simply absent.
    pub accessible: Vec<u64>,
}

pub struct AccessView {
    sessions: Arc<SessionManager>,
    current: AccessSnapshot,
}

impl AccessView {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            current: AccessSnapshot::default(),
        }
    }

    pub fn current(&self) -> &AccessSnapshot {
        &self.current
    }

    pub async fn refresh(&mut self, session: &Session) -> ClientResult<&AccessSnapshot> {
        let contract = self.sessions.reader();
        let emergency_mode = contract.is_emergency_mode().await?;

        let mut accessible = Vec::new();
        if let Some(account) = session.account() {
            let count = contract.get_crisis_count().await?;
            for crisis_id in 0..count.min(ACCESS_CHECK_LIMIT) {
                match contract.can_access_crisis(crisis_id, account).await {
                    Ok(true) => accessible.push(crisis_id),
                    Ok(false) => {}
                    Err(err) => debug!("access check for crisis {} failed: {}", crisis_id, err),
                }
            }
        }

        self.current = AccessSnapshot {
            emergency_mode,
            accessible,
        };
        Ok(&self.current)
    }

    /// Break-glass request for the snapshot's account, then a reload. A
    /// failed reload is logged; the confirmed receipt is still returned.
    pub async fn request_access(
        &mut self,
        session: &Session,
        crisis_id: u64,
        acknowledgement: &BreakGlassAcknowledgement,
    ) -> ClientResult<TxReceipt> {
        let contract = self.sessions.contract_for(session)?;
        let receipt = contract
            .request_emergency_access(crisis_id, acknowledgement)
            .await?;
        if let Err(err) = self.refresh(session).await {
            warn!("break-glass {} confirmed but access reload failed: {}", receipt.tx_hash.0, err);
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use ll_api_types::EmergencyType;
    use ll_contract::testing::{SimulatedLifeline, test_address};

    #[tokio::test]
    async fn only_granted_crises_in_the_first_ten_are_listed() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        for i in 0..12 {
            sim.seed_crisis(EmergencyType::MedicalEmergency, "Clinic", 10 + i, test_address(4))
                .await;
        }
        let (sessions, session) = fixtures::connected(&sim).await?;
        let account = test_address(1);
        for id in [2, 7, 11] {
            sim.grant_access(id, account.clone()).await;
        }
        sim.set_emergency_mode(true).await;

        let mut view = AccessView::new(sessions);
        let snapshot = view.refresh(&session).await?;
        assert!(snapshot.emergency_mode);
        assert_eq!(snapshot.accessible, vec![2, 7]);
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_snapshot_lists_nothing() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.seed_crisis(EmergencyType::NaturalDisaster, "Coast", 5, test_address(4))
            .await;
        let mut view = AccessView::new(fixtures::sessions(&sim));

        let snapshot = view.refresh(&Session::disconnected()).await?;
        assert_eq!(snapshot, &AccessSnapshot::default());
        Ok(())
    }

    #[tokio::test]
    async fn break_glass_adds_the_crisis() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        sim.seed_crisis(EmergencyType::EnvironmentalHazard, "Plant", 5, test_address(4))
            .await;
        let (sessions, session) = fixtures::connected(&sim).await?;
        let mut view = AccessView::new(sessions);
        assert!(view.refresh(&session).await?.accessible.is_empty());

        let ack = BreakGlassAcknowledgement::confirm("chemical exposure, responders on site")?;
        view.request_access(&session, 0, &ack).await?;
        assert_eq!(view.current().accessible, vec![0]);
        assert_eq!(sim.break_glass_log().await, vec![(0, test_address(1))]);
        Ok(())
    }
}
