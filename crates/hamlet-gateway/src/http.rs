//! [`Gateway`] implementation over HTTP + JSON using `reqwest`.
//!
//! Sends `Authorization: Bearer {token}` on every call and maps status codes
//! through [`wire::error_from_status`]. Connection failures and timeouts are
//! reported as [`GatewayError::Transport`].

use hamlet_types::{
    AccrualClaimRequest, Building, BuildingId, CompletionReceipt, DonationRequest, JobId,
    MoveBuildingRequest, Population, ResourceAmounts, ResourceLedger, SessionCredential,
    StartTrainingRequest, TrainingJob, TrainingReceipt, UnitTotals,
};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{Gateway, GatewayResult};
use crate::wire::{self, ErrorBody};

/// Gateway talking to the authority over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    api_url: String,
}

impl HttpGateway {
    /// Create a gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialise).
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }

    /// Base URL this gateway talks to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Issue one request and decode the JSON response.
    async fn call<B, T>(
        &self,
        method: Method,
        token: Option<&str>,
        path: &str,
        body: Option<&B>,
    ) -> GatewayResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.api_url);
        debug!(%method, path, "gateway request");

        let mut request = self.client.request(method, &url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<ErrorBody>().await.ok();
            return Err(wire::error_from_status(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Protocol(format!("response from {path} undecodable: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &str, path: &str) -> GatewayResult<T> {
        self.call::<(), T>(Method::GET, Some(token), path, None)
            .await
    }

    /// Seed a development village. Only the development server answers this.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the server refuses or is unreachable.
    pub async fn seed_dev_village(&self) -> GatewayResult<hamlet_types::VillageSeed> {
        self.call::<(), _>(Method::POST, None, wire::DEV_VILLAGES, None)
            .await
    }
}

impl Gateway for HttpGateway {
    async fn get_ledger(&self, token: &str) -> GatewayResult<ResourceLedger> {
        self.get_json(token, wire::LEDGER).await
    }

    async fn get_population(&self, token: &str) -> GatewayResult<Population> {
        self.get_json(token, wire::POPULATION).await
    }

    async fn get_units(&self, token: &str) -> GatewayResult<UnitTotals> {
        self.get_json(token, wire::UNITS).await
    }

    async fn get_buildings(&self, token: &str) -> GatewayResult<Vec<Building>> {
        self.get_json(token, wire::BUILDINGS).await
    }

    async fn preview_offline_accrual(
        &self,
        token: &str,
        elapsed_minutes: u64,
    ) -> GatewayResult<ResourceAmounts> {
        let path = format!("{}?elapsed_minutes={elapsed_minutes}", wire::OFFLINE_ACCRUAL);
        self.get_json(token, &path).await
    }

    async fn commit_offline_accrual(
        &self,
        token: &str,
        elapsed_minutes: u64,
    ) -> GatewayResult<ResourceLedger> {
        let body = AccrualClaimRequest { elapsed_minutes };
        self.call(
            Method::POST,
            Some(token),
            wire::OFFLINE_ACCRUAL_CLAIM,
            Some(&body),
        )
        .await
    }

    async fn get_training_queue(&self, token: &str) -> GatewayResult<Vec<TrainingJob>> {
        self.get_json(token, wire::TRAINING).await
    }

    async fn start_training(
        &self,
        token: &str,
        request: &StartTrainingRequest,
    ) -> GatewayResult<TrainingReceipt> {
        self.call(Method::POST, Some(token), wire::TRAINING, Some(request))
            .await
    }

    async fn complete_training(
        &self,
        token: &str,
        job_id: JobId,
    ) -> GatewayResult<CompletionReceipt> {
        let path = wire::training_complete(job_id);
        self.call::<(), _>(Method::POST, Some(token), &path, None)
            .await
    }

    async fn donate(
        &self,
        token: &str,
        request: &DonationRequest,
    ) -> GatewayResult<ResourceLedger> {
        self.call(Method::POST, Some(token), wire::DONATIONS, Some(request))
            .await
    }

    async fn move_building(
        &self,
        token: &str,
        building_id: BuildingId,
        request: MoveBuildingRequest,
    ) -> GatewayResult<ResourceLedger> {
        let path = wire::building_move(building_id);
        self.call(Method::POST, Some(token), &path, Some(&request))
            .await
    }

    async fn delete_building(
        &self,
        token: &str,
        building_id: BuildingId,
    ) -> GatewayResult<ResourceLedger> {
        let path = wire::building(building_id);
        self.call::<(), _>(Method::DELETE, Some(token), &path, None)
            .await
    }

    async fn refresh_credential(&self, token: &str) -> GatewayResult<SessionCredential> {
        self.call::<(), _>(Method::POST, Some(token), wire::SESSION_REFRESH, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn gateway_keeps_configured_url() {
        let config = GatewayConfig::new("http://127.0.0.1:9/");
        let gateway = HttpGateway::new(&config);
        assert!(gateway.is_ok());
        assert_eq!(
            gateway.map(|g| g.api_url().to_owned()).unwrap_or_default(),
            "http://127.0.0.1:9"
        );
    }

    #[tokio::test]
    async fn unreachable_authority_is_transient() {
        // Port 9 (discard) is closed on test machines; connect fails fast.
        let mut config = GatewayConfig::new("http://127.0.0.1:9");
        config.request_timeout = Duration::from_secs(2);
        let Ok(gateway) = HttpGateway::new(&config) else {
            return;
        };
        let result = gateway.get_ledger("token").await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
    }
}
