use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::catalog::{CatalogKind, CatalogRow};
use crate::config::GatewayConfig;
use crate::error::SyncError;
use crate::gateway::RemoteGateway;
use crate::pending::{PendingKind, SubmitResponse, Submission};
use crate::session::Session;

/// [`RemoteGateway`] over HTTP/JSON.
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        session: &Session,
    ) -> Result<SubmitResponse, SyncError> {
        let res = self
            .client
            .post(url)
            .bearer_auth(&session.token)
            .json(body)
            .send()
            .await?;
        let res = check_status(res).await?;
        Ok(res.json::<SubmitResponse>().await?)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_catalog(
        &self,
        kind: CatalogKind,
        session: &Session,
    ) -> Result<Vec<CatalogRow>, SyncError> {
        let url = self.config.catalog_url(kind);
        debug!(catalog = kind.slug(), %url, "fetching catalog");
        let res = self
            .client
            .get(&url)
            .bearer_auth(&session.token)
            .send()
            .await?;
        let values: Vec<Value> = check_status(res).await?.json().await?;
        values
            .into_iter()
            .map(|v| CatalogRow::from_value(v, &self.config.catalog_id_field))
            .collect()
    }

    async fn submit(
        &self,
        submission: &Submission,
        session: &Session,
    ) -> Result<SubmitResponse, SyncError> {
        let url = self.config.submit_url(submission.kind);
        self.post(&url, submission, session).await
    }

    async fn submit_batch(
        &self,
        kind: PendingKind,
        submissions: &[Submission],
        session: &Session,
    ) -> Result<SubmitResponse, SyncError> {
        let url = self.config.batch_url(kind);
        self.post(&url, submissions, session).await
    }
}

async fn check_status(res: Response) -> Result<Response, SyncError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let message = res.text().await.unwrap_or_default();
    Err(SyncError::Api { status, message })
}
