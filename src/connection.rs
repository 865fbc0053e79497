//! The request executor.
//!
//! A [`Connection`] runs one call at a time through
//! `Idle -> Building -> Sent -> Processed -> Done`, ending in `Error` when a
//! step fails. It keeps the last request and response for the accessor
//! methods.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, warn};
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, Proxy, redirect};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{ConnectionConfig, Credentials};
use crate::error::{Error, Result};
use crate::hooks::{DefaultHooks, VerbHooks};
use crate::parallel::{Parallel, PendingRequest};
use crate::request::{Call, RequestBody, RequestContext, add_prefix};
use crate::response::Response;
use crate::token::TokenManager;
use crate::xml::Node;

/// Value of the `User-Agent` header.
pub const SDK_USER_AGENT: &str = concat!("ebay-connect/", env!("CARGO_PKG_VERSION"));

pub const REQUEST_ID_HEADER: &str = "X-EBAY-SDK-REQUEST-ID";
pub const TOKEN_HEADER: &str = "X-EBAY-API-IAF-TOKEN";

/// Form field that carries the textual payload when attachments are sent.
pub const XML_PAYLOAD_FIELD: &str = "XMLPayload";

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Building,
    Sent,
    Processed,
    Error,
    Done,
}

#[derive(Clone)]
pub struct Connection {
    config: ConnectionConfig,
    client: Client,
    token_manager: Arc<TokenManager>,
    hooks: Arc<dyn VerbHooks>,
    base_list_nodes: Vec<String>,
    parallel: Option<Parallel>,
    state: CallState,
    request: Option<RequestContext>,
    response: Option<Response>,
}

impl Connection {
    /// Creates a connection; fails before any network activity when a
    /// credential is missing.
    pub fn new(config: ConnectionConfig, credentials: Credentials) -> Result<Self> {
        credentials.validate()?;

        let mut builder = Client::builder()
            .timeout(config.timeout())
            .redirect(redirect::Policy::limited(MAX_REDIRECTS));

        if let Some(proxy_url) = config.proxy_url() {
            debug!("Routing requests through proxy {}", proxy_url);
            let proxy = Proxy::all(&proxy_url)
                .map_err(|e| Error::Configuration(format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;

        let token_manager = Arc::new(TokenManager::new(
            credentials,
            client.clone(),
            config.token_url.clone(),
        ));

        Ok(Self {
            config,
            client,
            token_manager,
            hooks: Arc::new(DefaultHooks),
            base_list_nodes: Vec::new(),
            parallel: None,
            state: CallState::Idle,
            request: None,
            response: None,
        })
    }

    /// Replaces the hooks that shape requests and extract payload errors.
    pub fn with_hooks(mut self, hooks: Arc<dyn VerbHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Shares a token manager (and its cached token) with other connections.
    pub fn with_token_manager(mut self, token_manager: Arc<TokenManager>) -> Self {
        self.token_manager = token_manager;
        self
    }

    /// List-node paths applied to every call, used exactly as given.
    pub fn with_base_list_nodes(mut self, nodes: Vec<String>) -> Self {
        self.base_list_nodes = nodes;
        self
    }

    /// Queues calls into `parallel` instead of sending them.
    pub fn with_parallel(mut self, parallel: Parallel) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// The configuration this connection was created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Token manager used to authenticate calls.
    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.token_manager
    }

    /// State of the current or last call.
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Executes a call.
    ///
    /// Returns `Ok(None)` when the call was queued into a [`Parallel`] batch.
    /// Aggregated transport and payload errors fail the call with
    /// [`Error::Response`] when `config.errors` is set, and are otherwise left
    /// on the returned response.
    #[tracing::instrument(skip(self, call), fields(verb = %call.verb))]
    pub async fn execute(&mut self, call: Call) -> Result<Option<Response>> {
        let started = Instant::now();
        let result = self.run(call).await;
        if result.is_err() {
            self.state = CallState::Error;
        }
        debug!("total time={:?}", started.elapsed());
        result
    }

    async fn run(&mut self, call: Call) -> Result<Option<Response>> {
        debug!("execute: verb={} data={}", call.verb, call.payload);
        self.reset();

        self.state = CallState::Building;
        let request = self.build_request(&call).await?;
        log_request(&request);
        self.request = Some(request.clone());

        if let Some(parallel) = &self.parallel {
            parallel
                .add_request(PendingRequest {
                    request,
                    client: self.client.clone(),
                    hooks: self.hooks.clone(),
                    errors: self.config.errors,
                })
                .await;
            self.state = CallState::Sent;
            return Ok(None);
        }

        let http_response = send(&self.client, &request).await?;
        self.state = CallState::Sent;

        let response = process_response(self.hooks.as_ref(), &request, http_response).await?;
        self.state = CallState::Processed;
        self.response = Some(response.clone());

        let response = error_check(response, self.config.errors)?;
        self.state = CallState::Done;
        Ok(Some(response))
    }

    fn reset(&mut self) {
        self.state = CallState::Idle;
        self.request = None;
        self.response = None;
    }

    /// The call's list-node paths, prefixed, followed by the base paths.
    fn list_nodes_for(&self, call: &Call) -> Vec<String> {
        let mut nodes = call.list_nodes.clone();
        add_prefix(&mut nodes, &call.verb);
        nodes.extend(self.base_list_nodes.iter().cloned());
        nodes
    }

    /// Endpoint URL for a verb: `scheme://domain{uri}`.
    pub fn build_request_url(&self, _verb: &str) -> String {
        format!(
            "{}://{}{}",
            self.config.scheme(),
            self.config.domain,
            self.config.uri
        )
    }

    /// Builds the request for a call without sending it.
    pub async fn build_request(&self, call: &Call) -> Result<RequestContext> {
        let request_id = Uuid::new_v4();
        let url = self.build_request_url(&call.verb);

        let method = Method::from_bytes(self.config.method.to_uppercase().as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid method {}: {}", self.config.method, e)))?;

        let mut headers = self.hooks.build_headers(&call.verb)?;
        headers.insert(USER_AGENT, HeaderValue::from_static(SDK_USER_AGENT));
        headers.insert(
            HeaderName::from_static("x-ebay-sdk-request-id"),
            HeaderValue::from_str(&request_id.to_string())
                .map_err(|e| Error::Configuration(e.to_string()))?,
        );

        let token = self.token_manager.get_token().await?;
        let mut token_value = HeaderValue::from_str(&token)
            .map_err(|e| Error::Credential(format!("token is not a valid header value: {}", e)))?;
        token_value.set_sensitive(true);
        headers.insert(HeaderName::from_static("x-ebay-api-iaf-token"), token_value);

        let data = self
            .hooks
            .build_body(&call.verb, &call.payload, &call.verb_attrs)?;

        // Multipart needs the transport to set its own content type.
        let body = if call.attachments.is_empty() {
            RequestBody::Text(data)
        } else {
            headers.remove(CONTENT_TYPE);
            RequestBody::Multipart {
                fields: vec![(XML_PAYLOAD_FIELD.to_string(), data)],
                attachments: call.attachments.clone(),
            }
        };

        Ok(RequestContext {
            verb: call.verb.clone(),
            request_id,
            payload: call.payload.clone(),
            method,
            url,
            headers,
            body,
            list_nodes: self.list_nodes_for(call),
        })
    }

    /// Request built for the last call.
    pub fn request(&self) -> Option<&RequestContext> {
        self.request.as_ref()
    }

    /// Response of the last call sent directly.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Aggregated error message of the last response.
    pub fn error(&self) -> Option<String> {
        self.response.as_ref().and_then(Response::error)
    }

    /// Error codes the verb hooks found in the last response.
    pub fn response_codes(&self) -> &[String] {
        self.response
            .as_ref()
            .map(|r| r.body_errors().codes.as_slice())
            .unwrap_or_default()
    }

    /// HTTP reason phrase of the last response.
    pub fn response_status(&self) -> Option<&str> {
        self.response.as_ref().map(Response::reason)
    }

    /// HTTP status code of the last response.
    pub fn response_code(&self) -> Option<u16> {
        self.response.as_ref().map(Response::status_code)
    }

    /// Raw body of the last response.
    pub fn response_content(&self) -> Option<&[u8]> {
        self.response.as_ref().map(Response::content)
    }

    /// Looks up a value by key path in the last response.
    pub fn value(&self, path: &[&str]) -> Option<Value> {
        self.response.as_ref().and_then(|r| r.value(path))
    }

    /// Documentation URL from the configuration.
    pub fn doc_url(&self) -> &str {
        &self.config.doc_url
    }

    fn last_response(&self) -> Result<&Response> {
        self.response
            .as_ref()
            .ok_or_else(|| Error::Parse("no response available".to_string()))
    }

    #[deprecated(note = "use response().reply() instead")]
    pub fn response_dict(&self) -> Result<Value> {
        warn!("response_dict() DEPRECATED, use response().dict() or response().reply() instead");
        self.last_response()?.reply()
    }

    #[deprecated(note = "use response().json() instead")]
    pub fn response_json(&self) -> Result<String> {
        warn!("response_json() DEPRECATED, use response().json() instead");
        self.last_response()?.json()
    }

    #[deprecated(note = "use response().dom() instead")]
    pub fn response_dom(&self) -> Result<&Node> {
        warn!("response_dom() DEPRECATED, use response().dom() instead");
        self.last_response()?.dom()
    }

    #[deprecated(note = "use response().soup() instead")]
    pub fn response_soup(&self) -> Result<&Node> {
        warn!("response_soup() DEPRECATED, use response().soup() instead");
        self.last_response()?.soup()
    }

    #[deprecated(note = "use response().reply() instead")]
    pub fn response_obj(&self) -> Result<Value> {
        warn!("response_obj() DEPRECATED, use response().reply() instead");
        self.last_response()?.reply()
    }
}

fn log_request(request: &RequestContext) {
    debug!(
        "REQUEST ({}): {} {}",
        request.request_id, request.method, request.url
    );
    debug!("headers={:?}", request.headers);
    match &request.body {
        RequestBody::Text(text) => debug!("body={}", text),
        RequestBody::Multipart {
            fields,
            attachments,
        } => debug!(
            "body=multipart fields={:?} attachments={}",
            fields.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            attachments.len()
        ),
    }
}

/// Sends a built request; TLS verification stays on and redirects are followed.
pub(crate) async fn send(client: &Client, request: &RequestContext) -> Result<reqwest::Response> {
    let started = Instant::now();
    let response = request.to_builder(client)?.send().await.map_err(|e| {
        Error::Transport(format!(
            "{} {} ({}): {}",
            request.method, request.url, request.request_id, e
        ))
    })?;

    debug!("RESPONSE ({}):", request.request_id);
    debug!("elapsed time={:?}", started.elapsed());
    debug!("status code={}", response.status());
    debug!("headers={:?}", response.headers());

    Ok(response)
}

/// Wraps the transport response and records the payload errors the hooks find.
pub(crate) async fn process_response(
    hooks: &dyn VerbHooks,
    request: &RequestContext,
    http_response: reqwest::Response,
) -> Result<Response> {
    let mut response =
        Response::from_http(&request.verb, request.list_nodes.clone(), http_response).await?;
    debug!("content={}", response.text());

    let body_errors = hooks.extract_payload_errors(&request.verb, &response);
    for warning in &body_errors.warnings {
        warn!("{}: {}", request.verb, warning);
    }
    response.set_body_errors(body_errors);

    Ok(response)
}

/// Fails with [`Error::Response`] when the response carries errors and
/// `errors` is set.
pub(crate) fn error_check(response: Response, errors: bool) -> Result<Response> {
    match response.error() {
        Some(message) if errors => {
            error!("{}", message);
            Err(Error::Response {
                message,
                response: Box::new(response),
            })
        }
        Some(message) => {
            debug!("error reporting disabled, keeping: {}", message);
            Ok(response)
        }
        None => Ok(response),
    }
}
