//! HTTP Transport
//!
//! Executes exactly one HTTP exchange per invocation and classifies the
//! raw result for the retry coordinator. Retries, rate-limit waits, and
//! queueing all live in the scheduler, never here.

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::route::Verb;
use crate::transport::payload::Payload;
use crate::transport::response::{
    resolve_retry_after, Outcome, RateLimitBody, RateLimitInfo, Response, ResponseBody,
};

/// One HTTP exchange, ready for a transport to execute.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub verb: Verb,
    pub path: String,
    pub payload: Payload,
}

/// Executes a single exchange and classifies the raw outcome.
///
/// Implementations must not retry internally; the scheduler owns retry and
/// rate-limit policy. The trait is the seam that lets tests script
/// outcomes under a simulated clock.
pub trait Transport: Send + Sync {
    fn execute(&self, request: TransportRequest) -> BoxFuture<'_, Outcome>;
}

impl From<Verb> for Method {
    fn from(verb: Verb) -> Method {
        match verb {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Patch => Method::PATCH,
            Verb::Delete => Method::DELETE,
        }
    }
}

/// Production transport backed by reqwest.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: Option<HeaderValue>,
}

impl HttpTransport {
    pub fn new(config: &DispatcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| DispatchError::Config(format!("invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| DispatchError::Config(format!("failed to build HTTP client: {}", e)))?;

        let auth = match &config.token {
            Some(token) => Some(
                HeaderValue::from_str(token)
                    .map_err(|e| DispatchError::Config(format!("invalid credential: {}", e)))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    async fn exchange(&self, request: TransportRequest) -> Outcome {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(Method::from(request.verb), &url);

        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }

        builder = match request.payload {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(&value),
            Payload::Multipart(multipart) => {
                let mut form = Form::new();
                if let Some(json) = &multipart.json {
                    form = form.text("payload_json", json.to_string());
                }
                for file in multipart.files {
                    // Bytes pass through untouched; only the filename is
                    // attached.
                    form = form.part(
                        file.name,
                        Part::bytes(file.data.to_vec()).file_name(file.filename),
                    );
                }
                builder.multipart(form)
            }
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return Outcome::Network(err.into()),
        };

        classify(response).await
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: TransportRequest) -> BoxFuture<'_, Outcome> {
        Box::pin(self.exchange(request))
    }
}

async fn classify(response: reqwest::Response) -> Outcome {
    let status = response.status();
    let rate = RateLimitInfo::from_headers(response.headers());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if status == StatusCode::TOO_MANY_REQUESTS {
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Outcome::Network(err.into()),
        };
        let parsed: Option<RateLimitBody> = serde_json::from_slice(&bytes).ok();
        if let Some(message) = parsed.as_ref().and_then(|body| body.message.as_deref()) {
            debug!(message, "remote rate limit message");
        }
        let global = rate.global || parsed.as_ref().map(|body| body.global).unwrap_or(false);
        let retry_after = resolve_retry_after(parsed.as_ref(), &rate);
        return Outcome::RateLimited {
            retry_after,
            global,
            rate,
        };
    }

    if status.is_server_error() {
        return Outcome::ServerError {
            status: status.as_u16(),
        };
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return Outcome::Network(err.into()),
    };
    let body = ResponseBody::decode(content_type.as_deref(), bytes);

    if status.is_client_error() {
        return Outcome::ClientError {
            status: status.as_u16(),
            body,
        };
    }

    Outcome::Success {
        response: Response {
            status: status.as_u16(),
            body,
        },
        rate,
    }
}
