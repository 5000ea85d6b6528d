use ll_api_types::{Crisis, Session};
use ll_chain_client::{ClientResult, TxReceipt};
use ll_contract::DeclareEmergency;
use ll_session::SessionManager;
use std::sync::Arc;
use tracing::{debug, warn};

/// All crises, newest first.
pub struct CrisisListView {
    sessions: Arc<SessionManager>,
    crises: Vec<Crisis>,
    skipped: Vec<u64>,
}

impl CrisisListView {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            crises: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn crises(&self) -> &[Crisis] {
        &self.crises
    }

    /// Indices whose read failed during the last refresh.
    pub fn skipped(&self) -> &[u64] {
        &self.skipped
    }

    /// Reads every index one after another. A failed index is logged and
    /// left out; only a failed count aborts the refresh.
    pub async fn refresh(&mut self) -> ClientResult<&[Crisis]> {
        let contract = self.sessions.reader();
        let count = contract.get_crisis_count().await?;

        let mut crises = Vec::with_capacity(usize::try_from(count).unwrap_or_default());
        let mut skipped = Vec::new();
        for index in 0..count {
            match contract.get_crisis(index).await {
                Ok(crisis) => crises.push(crisis),
                Err(err) => {
                    warn!("skipping crisis {}: {}", index, err);
                    skipped.push(index);
                }
            }
        }
        // Stable: equal timestamps keep fetch order.
        crises.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        debug!("loaded {} of {} crises", crises.len(), count);

        self.crises = crises;
        self.skipped = skipped;
        Ok(&self.crises)
    }

    /// A confirmed declaration returns its receipt even when the reload
    /// fails; the list then stays as it was.
    pub async fn declare(&mut self, session: &Session, request: &DeclareEmergency) -> ClientResult<TxReceipt> {
        let contract = self.sessions.contract_for(session)?;
        let receipt = contract.declare_emergency(request).await?;
        self.reload_after(&receipt).await;
        Ok(receipt)
    }

    pub async fn verify(&mut self, session: &Session, crisis_id: u64, signatures: &[String]) -> ClientResult<TxReceipt> {
        let contract = self.sessions.contract_for(session)?;
        let receipt = contract.verify_crisis(crisis_id, signatures).await?;
        self.reload_after(&receipt).await;
        Ok(receipt)
    }

    async fn reload_after(&mut self, receipt: &TxReceipt) {
        if let Err(err) = self.refresh().await {
            warn!("{} confirmed but crisis reload failed: {}", receipt.tx_hash.0, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use ll_api_types::EmergencyType;
    use ll_chain_client::ClientError;
    use ll_contract::testing::{SimulatedLifeline, test_address};

    #[tokio::test]
    async fn newest_crisis_comes_first() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        for (location, timestamp) in [("North", 300), ("East", 100), ("South", 500), ("West", 300)] {
            sim.seed_crisis(EmergencyType::NaturalDisaster, location, timestamp, test_address(4))
                .await;
        }
        let mut view = CrisisListView::new(fixtures::sessions(&sim));

        let listed = view.refresh().await?;
        let order: Vec<&str> = listed.iter().map(|c| c.location.as_str()).collect();
        assert_eq!(order, vec!["South", "North", "West", "East"]);
        assert!(listed.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
        Ok(())
    }

    #[tokio::test]
    async fn one_failed_index_does_not_sink_the_list() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        for i in 0..10 {
            sim.seed_crisis(EmergencyType::SecurityThreat, &format!("Site {i}"), 1_000 + i, test_address(4))
                .await;
        }
        sim.fail_crisis(3).await;
        let mut view = CrisisListView::new(fixtures::sessions(&sim));

        let listed = view.refresh().await?;
        assert_eq!(listed.len(), 9);
        assert!(listed.iter().all(|c| c.id != 3));
        assert!(listed.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
        assert_eq!(view.skipped(), &[3]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_contract_lists_nothing() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let mut view = CrisisListView::new(fixtures::sessions(&sim));
        assert!(view.refresh().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn declaring_refreshes_the_list() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let (sessions, session) = fixtures::connected(&sim).await?;
        let mut view = CrisisListView::new(sessions);

        let request = DeclareEmergency {
            emergency_type: EmergencyType::InfrastructureFailure,
            location: "Bridge 12".to_owned(),
            encrypted_data: "sealed".to_owned(),
            data_hash: None,
            initial_responders: vec![test_address(6).to_string()],
        };
        view.declare(&session, &request).await?;
        assert_eq!(view.crises().len(), 1);
        assert_eq!(view.crises()[0].declared_by, test_address(1));

        view.verify(&session, 0, &["0xbeef".to_owned()]).await?;
        assert!(view.crises()[0].verified);
        Ok(())
    }

    #[tokio::test]
    async fn confirmed_declaration_survives_failed_reload() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedLifeline::new());
        let (sessions, session) = fixtures::connected(&sim).await?;
        let mut view = CrisisListView::new(sessions);
        sim.set_anonymous_reads_failing(true).await;

        let request = DeclareEmergency {
            emergency_type: EmergencyType::MedicalEmergency,
            location: "Stadium".to_owned(),
            encrypted_data: "sealed".to_owned(),
            data_hash: None,
            initial_responders: vec![test_address(2).to_string()],
        };
        let receipt = view.declare(&session, &request).await?;
        assert!(receipt.succeeded());
        assert!(view.crises().is_empty());
        assert_eq!(sim.last_declared_responders().await, vec![test_address(2)]);

        sim.set_anonymous_reads_failing(false).await;
        assert_eq!(view.refresh().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn writes_need_a_connected_snapshot() {
        let sim = Arc::new(SimulatedLifeline::new());
        let mut view = CrisisListView::new(fixtures::sessions(&sim));
        let err = view
            .verify(&Session::disconnected(), 0, &["0x01".to_owned()])
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::NotConnected);
    }
}
