use anyhow::bail;
use ll_api_types::{Crisis, Identity, Session, WalletAddress};
use ll_chain_client::{ClientError, TxReceipt};
use ll_contract::{BreakGlassAcknowledgement, DeclareEmergency, RegisterIdentity};
use ll_format::{emergency_type_label, format_address, format_timestamp, parse_responders, sector_label};
use ll_session::SessionManager;
use ll_views::{AccessView, CrisisListView, DashboardView, IdentityView};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use crate::Command;

pub(crate) async fn run(command: Command, sessions: Arc<SessionManager>) -> anyhow::Result<Value> {
    match command {
        Command::Status => {
            let session = sessions.check_existing_connection().await;
            let snapshot = DashboardView::new(sessions).load(&session).await?;
            Ok(serde_json::to_value(snapshot)?)
        }
        Command::Identity { address } => {
            let identity = match address {
                Some(raw) => {
                    let wallet = WalletAddress::parse(&raw)?;
                    sessions.reader().get_identity(&wallet).await?
                }
                None => {
                    let session = connect(&sessions).await?;
                    let mut view = IdentityView::new(sessions);
                    view.refresh(&session).await?.identity.clone()
                }
            };
            Ok(identity.as_ref().map(render_identity).unwrap_or_else(|| json!({ "registered": false })))
        }
        Command::Register {
            did,
            sector,
            metadata_uri,
        } => {
            let session = connect(&sessions).await?;
            let mut view = IdentityView::new(sessions);
            let request = RegisterIdentity {
                did,
                sector,
                metadata_uri,
            };
            let receipt = view
                .register(&session, &request)
                .await
                .map_err(|err| explain("registration", err))?;
            Ok(json!({
                "receipt": render_receipt(&receipt),
                "identity": view.current().identity.as_ref().map(render_identity),
            }))
        }
        Command::Crises => {
            let mut view = CrisisListView::new(sessions);
            let crises: Vec<Value> = view.refresh().await?.iter().map(render_crisis).collect();
            Ok(json!({ "crises": crises, "skipped": view.skipped() }))
        }
        Command::Declare {
            emergency_type,
            location,
            data,
            hash,
            responders,
        } => {
            let session = connect(&sessions).await?;
            let mut view = CrisisListView::new(sessions);
            let request = DeclareEmergency {
                emergency_type,
                location,
                encrypted_data: data,
                data_hash: hash,
                initial_responders: parse_responders(&responders)
                    .into_iter()
                    .map(String::from)
                    .collect(),
            };
            let receipt = view
                .declare(&session, &request)
                .await
                .map_err(|err| explain("declaration", err))?;
            Ok(json!({
                "receipt": render_receipt(&receipt),
                "crisis_count": view.crises().len(),
            }))
        }
        Command::Verify {
            crisis_id,
            signatures,
        } => {
            let session = connect(&sessions).await?;
            let mut view = CrisisListView::new(sessions);
            let receipt = view
                .verify(&session, crisis_id, &signatures)
                .await
                .map_err(|err| explain("verification", err))?;
            let crisis = view.crises().iter().find(|c| c.id == crisis_id).map(render_crisis);
            Ok(json!({ "receipt": render_receipt(&receipt), "crisis": crisis }))
        }
        Command::Access => {
            let session = connect(&sessions).await?;
            let mut view = AccessView::new(sessions);
            Ok(serde_json::to_value(view.refresh(&session).await?)?)
        }
        Command::BreakGlass {
            crisis_id,
            reason,
            acknowledge,
        } => {
            if !acknowledge {
                bail!(
                    "break-glass access is permanently recorded on-chain and attributed to your account; \
                     re-run with --acknowledge to proceed"
                );
            }
            let acknowledgement = BreakGlassAcknowledgement::confirm(reason)?;
            let session = connect(&sessions).await?;
            warn!("submitting break-glass request for crisis {}", crisis_id);
            let mut view = AccessView::new(sessions);
            let receipt = view
                .request_access(&session, crisis_id, &acknowledgement)
                .await
                .map_err(|err| explain("break-glass request", err))?;
            Ok(json!({
                "receipt": render_receipt(&receipt),
                "access": view.current(),
            }))
        }
    }
}

/// Silent reconnect first; prompt only when nothing is authorized yet.
async fn connect(sessions: &SessionManager) -> anyhow::Result<Session> {
    let session = sessions.check_existing_connection().await;
    if session.is_connected() {
        return Ok(session);
    }
    sessions
        .connect()
        .await
        .map_err(|err| explain("wallet connection", err))
}

fn explain(action: &str, err: ClientError) -> anyhow::Error {
    let hint = match &err {
        ClientError::WalletUnavailable => Some("start a wallet endpoint or pass --wallet-url"),
        ClientError::UserRejected => Some("approve the request in your wallet and retry"),
        ClientError::Timeout(_) => Some("the network did not answer in time; retry later"),
        _ => None,
    };
    let err = anyhow::Error::new(err).context(format!("{action} failed"));
    match hint {
        Some(hint) => err.context(hint),
        None => err,
    }
}

fn render_identity(identity: &Identity) -> Value {
    json!({
        "registered": true,
        "wallet": identity.wallet,
        "did": identity.did,
        "sector": sector_label(identity.sector),
        "metadata_uri": identity.metadata_uri,
        "verified": identity.verified,
        "registered_at": format_timestamp(identity.registration_date),
        "last_verified": format_timestamp(identity.last_verified),
    })
}

fn render_crisis(crisis: &Crisis) -> Value {
    json!({
        "id": crisis.id,
        "type": emergency_type_label(crisis.emergency_type),
        "location": crisis.location,
        "declared_by": format_address(crisis.declared_by.as_str()),
        "declared_at": format_timestamp(crisis.timestamp),
        "verified": crisis.verified,
        "verification_count": crisis.verification_count,
        "data_hash": crisis.data_hash,
    })
}

fn render_receipt(receipt: &TxReceipt) -> Value {
    json!({
        "tx_hash": receipt.tx_hash.0,
        "block_number": receipt.block_number,
        "succeeded": receipt.succeeded(),
    })
}
