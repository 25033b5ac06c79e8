use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::ledger::OrderStatus;

/// What the accrual service said about one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// 200 with a decodable body. Accrual is meaningful only for PROCESSED.
    Settled {
        status: OrderStatus,
        accrual: Option<Decimal>,
    },
    /// 204: the service has never heard of the order
    Unknown,
    /// 429, with the parsed `Retry-After` if one was sent
    RateLimited { retry_after: Option<Duration> },
    /// 5xx, transport errors, bad bodies and anything unexpected
    TransientFailure,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualClient: Send + Sync {
    /// One lookup against the accrual service. Never fails: every condition
    /// is folded into an `AccrualOutcome`.
    async fn lookup(&self, number: &str) -> AccrualOutcome;
}

#[derive(Debug, Deserialize)]
struct AccrualResponse {
    status: OrderStatus,
    #[serde(default)]
    accrual: Option<Decimal>,
}

/// reqwest-backed client for `GET {base}/api/orders/{number}`
pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn order_url(&self, number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn lookup(&self, number: &str) -> AccrualOutcome {
        let response = match self
            .client
            .get(self.order_url(number))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(order = %number, error = %e, "Accrual request failed");
                return AccrualOutcome::TransientFailure;
            }
        };

        match response.status() {
            StatusCode::OK => match response.json::<AccrualResponse>().await {
                Ok(body) => {
                    debug!(order = %number, status = %body.status, "Accrual status received");
                    AccrualOutcome::Settled {
                        status: body.status,
                        accrual: body.accrual,
                    }
                }
                Err(e) => {
                    warn!(order = %number, error = %e, "Undecodable accrual response");
                    AccrualOutcome::TransientFailure
                }
            },
            StatusCode::NO_CONTENT => AccrualOutcome::Unknown,
            StatusCode::TOO_MANY_REQUESTS => AccrualOutcome::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            },
            status => {
                warn!(order = %number, %status, "Unexpected accrual response status");
                AccrualOutcome::TransientFailure
            }
        }
    }
}

fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpAccrualClient {
        HttpAccrualClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_processed_order_is_settled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders/79927398713"))
            .and(header_eq("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order": "79927398713",
                "status": "PROCESSED",
                "accrual": 500
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server).await.lookup("79927398713").await;
        assert_eq!(
            outcome,
            AccrualOutcome::Settled {
                status: OrderStatus::Processed,
                accrual: Some(dec!(500)),
            }
        );
    }

    #[tokio::test]
    async fn test_intermediate_status_has_no_accrual() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders/79927398713"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order": "79927398713",
                "status": "PROCESSING"
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server).await.lookup("79927398713").await;
        assert_eq!(
            outcome,
            AccrualOutcome::Settled {
                status: OrderStatus::Processing,
                accrual: None,
            }
        );
    }

    #[tokio::test]
    async fn test_no_content_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let outcome = client_for(&server).await.lookup("79927398713").await;
        assert_eq!(outcome, AccrualOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders/1"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/orders/2"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "soon"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(
            client.lookup("1").await,
            AccrualOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(60))
            }
        );
        assert_eq!(
            client.lookup("2").await,
            AccrualOutcome::RateLimited { retry_after: None }
        );
    }

    #[tokio::test]
    async fn test_server_errors_and_bad_bodies_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders/1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/orders/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/orders/3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.lookup("1").await, AccrualOutcome::TransientFailure);
        assert_eq!(client.lookup("2").await, AccrualOutcome::TransientFailure);
        assert_eq!(client.lookup("3").await, AccrualOutcome::TransientFailure);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let client =
            HttpAccrualClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        assert_eq!(client.lookup("79927398713").await, AccrualOutcome::TransientFailure);
    }
}
