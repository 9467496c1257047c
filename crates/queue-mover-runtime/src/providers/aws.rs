//! Amazon SQS over the HTTP query API.
//!
//! Requests are signed with Signature V4 and sent with `reqwest`; responses
//! are read with `quick-xml`. Talking HTTP directly lets the provider run
//! against LocalStack, VPC endpoints and a mock server alike.
//!
//! Bodies are relayed verbatim. SQS only carries text, so a body that is not
//! UTF-8 is refused before any request goes out.

use crate::client::QueueProvider;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{
    Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, GROUP_ID_ATTRIBUTE,
};
use crate::provider::{AwsSqsConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client as HttpClient, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// SQS refuses long-poll waits beyond this
const MAX_WAIT_SECONDS: u64 = 20;

/// Message group used for FIFO destinations when the source message had none
const DEFAULT_GROUP_ID: &str = "queue-mover";

const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

// ============================================================================
// Request Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Static credentials for one account
#[derive(Clone)]
struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    fn from_config(config: &AwsSqsConfig) -> Option<Self> {
        Some(Self {
            access_key_id: config.access_key_id.clone()?,
            secret_access_key: config.secret_access_key.clone()?,
            session_token: config.session_token.clone(),
        })
    }
}

/// Signature V4 for the `sqs` service in one region.
///
/// Only `host`, `x-amz-date` and, with temporary credentials,
/// `x-amz-security-token` are signed. Parameters travel in the query string
/// and the body is always empty.
#[derive(Clone)]
struct RequestSigner {
    credentials: Credentials,
    region: String,
}

impl RequestSigner {
    const ALGORITHM: &'static str = "AWS4-HMAC-SHA256";
    const SERVICE: &'static str = "sqs";

    fn new(credentials: Credentials, region: String) -> Self {
        Self {
            credentials,
            region,
        }
    }

    /// Headers that authenticate a `POST` with the given query
    fn sign(
        &self,
        host: &str,
        path: &str,
        query: &BTreeMap<String, String>,
        at: &DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!(
            "{}/{}/{}/aws4_request",
            at.format("%Y%m%d"),
            self.region,
            Self::SERVICE
        );

        let mut headers = vec![("host", host.to_string()), ("x-amz-date", amz_date.clone())];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token", token.clone()));
        }

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "POST\n{}\n{}\n{}\n{}\n{}",
            path,
            canonical_query(query),
            canonical_headers,
            signed_headers,
            sha256_hex(b"")
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            Self::ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signature = hex::encode(hmac(&self.signing_key(at), string_to_sign.as_bytes()));

        headers.push((
            "Authorization",
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                Self::ALGORITHM,
                self.credentials.access_key_id,
                scope,
                signed_headers,
                signature
            ),
        ));
        headers
    }

    fn signing_key(&self, at: &DateTime<Utc>) -> Vec<u8> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        [
            at.format("%Y%m%d").to_string().as_bytes(),
            self.region.as_bytes(),
            Self::SERVICE.as_bytes(),
            b"aws4_request".as_slice(),
        ]
        .iter()
        .fold(secret.into_bytes(), |key, part| hmac(&key, part))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// FIFO deduplication id: a digest of the message's own identity, or of its
/// body when it has none. Hex keeps it within SQS's 128-character alphabet.
fn deduplication_id(message: &Message, body: &str) -> String {
    match message.deduplication_id.as_deref() {
        Some(id) => sha256_hex(id.as_bytes()),
        None => sha256_hex(body.as_bytes()),
    }
}

/// Sorted, RFC 3986 encoded `key=value` pairs
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// Query API Requests
// ============================================================================

/// One query API call
struct SqsRequest {
    action: &'static str,
    params: BTreeMap<String, String>,
}

impl SqsRequest {
    fn new(action: &'static str) -> Self {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), API_VERSION.to_string());
        Self { action, params }
    }

    fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Queue provider for Amazon SQS and SQS-compatible endpoints.
///
/// Bare queue names are resolved to URLs with `GetQueueUrl` once and cached.
pub struct AwsSqsProvider {
    http: HttpClient,
    signer: Option<RequestSigner>,
    endpoint: url::Url,
    request_timeout: Duration,
    queue_urls: RwLock<HashMap<QueueName, String>>,
}

impl AwsSqsProvider {
    /// Build a provider for the configured region or endpoint.
    ///
    /// Missing credentials are not an error here; every request fails with
    /// [`QueueError::AuthenticationFailed`] instead.
    pub async fn new(config: AwsSqsConfig) -> Result<Self, QueueError> {
        if config.region.trim().is_empty() {
            return Err(ConfigurationError::new("region", "must not be empty").into());
        }

        let endpoint = match &config.endpoint_url {
            Some(url) => url.clone(),
            None => format!("https://sqs.{}.amazonaws.com", config.region),
        };
        let endpoint = url::Url::parse(&endpoint)
            .map_err(|e| ConfigurationError::new("endpoint_url", format!("'{}': {}", endpoint, e)))?;

        let request_timeout = Duration::from_secs(config.request_timeout_seconds);
        let http = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("cannot build HTTP client: {}", e),
            })?;

        let signer = Credentials::from_config(&config)
            .map(|credentials| RequestSigner::new(credentials, config.region.clone()));
        if signer.is_none() {
            warn!(region = %config.region, "No AWS credentials configured");
        }

        Ok(Self {
            http,
            signer,
            endpoint,
            request_timeout,
            queue_urls: RwLock::new(HashMap::new()),
        })
    }

    /// `host[:port]` as signed and sent
    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    async fn queue_url(&self, queue: &QueueName) -> Result<String, QueueError> {
        if queue.is_url() {
            return Ok(queue.as_str().to_string());
        }
        if let Some(url) = self.queue_urls.read().await.get(queue) {
            return Ok(url.clone());
        }

        let request = SqsRequest::new("GetQueueUrl").param("QueueName", queue.as_str());
        let response = self.call(request, queue).await?;
        let url = required_text(&response, "QueueUrl")?;

        debug!(queue = %queue, url = %url, "Resolved queue URL");
        self.queue_urls
            .write()
            .await
            .insert(queue.clone(), url.clone());
        Ok(url)
    }

    /// Send a signed request and return the response body of a 2xx reply
    async fn call(&self, request: SqsRequest, queue: &QueueName) -> Result<String, QueueError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| QueueError::AuthenticationFailed {
                message: "no AWS credentials configured".to_string(),
            })?;

        let headers = signer.sign(
            &self.host(),
            self.endpoint.path(),
            &request.params,
            &Utc::now(),
        );

        let mut url = self.endpoint.clone();
        url.set_query(Some(&canonical_query(&request.params)));

        let mut builder = self.http.post(url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            Ok(body)
        } else {
            debug!(action = request.action, status = %status, "SQS request failed");
            Err(classify_error(status, &body, queue, request.action))
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> QueueError {
        if error.is_timeout() {
            QueueError::Timeout {
                duration: self.request_timeout,
            }
        } else {
            QueueError::ConnectionFailed {
                message: error.to_string(),
            }
        }
    }

    /// Call an action that only identifies a message by its receipt
    async fn call_with_receipt(
        &self,
        action: &'static str,
        receipt: &ReceiptHandle,
        extra: Option<(&str, &str)>,
    ) -> Result<(), QueueError> {
        let queue = receipt.queue();
        let mut request = SqsRequest::new(action)
            .param("QueueUrl", self.queue_url(queue).await?)
            .param("ReceiptHandle", receipt.handle());
        if let Some((name, value)) = extra {
            request = request.param(name, value);
        }
        self.call(request, queue).await.map(|_| ())
    }
}

impl fmt::Debug for AwsSqsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsProvider")
            .field("endpoint", &self.endpoint.as_str())
            .field("signed", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueProvider for AwsSqsProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let body = message.body_text()?;
        let limit = ProviderType::AwsSqs.max_message_size();
        if body.len() > limit {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                limit,
            });
        }

        let mut request = SqsRequest::new("SendMessage")
            .param("QueueUrl", self.queue_url(queue).await?)
            .param("MessageBody", body);

        if queue.is_fifo() {
            let group = message.group_id.as_deref().unwrap_or(DEFAULT_GROUP_ID);
            request = request
                .param(GROUP_ID_ATTRIBUTE, group)
                .param("MessageDeduplicationId", deduplication_id(message, body));
        }

        let response = self.call(request, queue).await?;
        let id = required_text(&response, "MessageId")?;
        Ok(MessageId::from_str(&id)?)
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let request = SqsRequest::new("ReceiveMessage")
            .param("QueueUrl", self.queue_url(queue).await?)
            .param(
                "MaxNumberOfMessages",
                max_messages.min(self.max_batch_size()).to_string(),
            )
            .param(
                "WaitTimeSeconds",
                wait.as_secs().min(MAX_WAIT_SECONDS).to_string(),
            )
            .param("AttributeName.1", RECEIVE_COUNT_ATTRIBUTE)
            .param("AttributeName.2", GROUP_ID_ATTRIBUTE);

        let response = self.call(request, queue).await?;
        Ok(parse_messages(&response, queue)?)
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.call_with_receipt("DeleteMessage", receipt, None).await
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        // Visible again immediately
        self.call_with_receipt(
            "ChangeMessageVisibility",
            receipt,
            Some(("VisibilityTimeout", "0")),
        )
        .await
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }

    fn max_batch_size(&self) -> u32 {
        ProviderType::AwsSqs.max_receive_batch()
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Map an error reply onto [`QueueError`] by its SQS error code, falling back
/// to the HTTP status when the code is unknown or missing.
fn classify_error(status: StatusCode, body: &str, queue: &QueueName, action: &str) -> QueueError {
    let code = first_text(body, "Code")
        .ok()
        .flatten()
        .unwrap_or_else(|| status.as_str().to_string());
    let message = first_text(body, "Message")
        .ok()
        .flatten()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no reason given").to_string());

    match code.as_str() {
        "Throttling" | "ThrottlingException" | "RequestThrottled" => {
            QueueError::Throttled { retry_after: None }
        }
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            QueueError::QueueNotFound {
                queue: queue.to_string(),
            }
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => QueueError::ReceiptInvalid {
            receipt: message,
        },
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch"
        | "ExpiredToken" | "MissingAuthenticationToken" => QueueError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        "AccessDenied" | "AccessDeniedException" => QueueError::PermissionDenied {
            operation: action.to_string(),
        },
        _ => match status {
            StatusCode::UNAUTHORIZED => QueueError::AuthenticationFailed {
                message: format!("{}: {}", code, message),
            },
            StatusCode::FORBIDDEN => QueueError::PermissionDenied {
                operation: action.to_string(),
            },
            StatusCode::TOO_MANY_REQUESTS => QueueError::Throttled { retry_after: None },
            s if s.is_server_error() => QueueError::Service {
                provider: ProviderType::AwsSqs,
                code,
                message,
            },
            _ => QueueError::Rejected {
                provider: ProviderType::AwsSqs,
                code,
                message,
            },
        },
    }
}

fn malformed(detail: impl fmt::Display) -> SerializationError {
    SerializationError::MalformedResponse {
        detail: detail.to_string(),
    }
}

/// Text of the first `element` anywhere in the document
fn first_text(xml: &str, element: &str) -> Result<Option<String>, SerializationError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut inside = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Start(e) if e.name().as_ref() == element.as_bytes() => inside = true,
            Event::Text(e) if inside => {
                return e.unescape().map(|t| Some(t.into_owned())).map_err(malformed);
            }
            Event::End(e) if inside && e.name().as_ref() == element.as_bytes() => {
                return Ok(Some(String::new()));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn required_text(xml: &str, element: &str) -> Result<String, SerializationError> {
    first_text(xml, element)?.ok_or_else(|| malformed(format!("no {} in response", element)))
}

/// Fields of one `<Message>` element
#[derive(Default)]
struct MessageFields {
    id: Option<String>,
    receipt: Option<String>,
    body: String,
    attributes: HashMap<String, String>,
}

impl MessageFields {
    fn into_received(self, queue: &QueueName) -> Result<ReceivedMessage, SerializationError> {
        let receipt = self
            .receipt
            .ok_or_else(|| malformed("message without a ReceiptHandle"))?;
        let message_id = self
            .id
            .and_then(|id| MessageId::from_str(&id).ok())
            .unwrap_or_default();
        let delivery_count = self
            .attributes
            .get(RECEIVE_COUNT_ATTRIBUTE)
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Ok(ReceivedMessage {
            message_id,
            body: Bytes::from(self.body),
            attributes: self.attributes,
            receipt_handle: ReceiptHandle::new(receipt, queue.clone(), ProviderType::AwsSqs),
            delivery_count,
            received_at: Utc::now(),
        })
    }
}

/// Messages in a `ReceiveMessage` reply.
///
/// Text is read untrimmed so bodies keep their surrounding whitespace.
fn parse_messages(xml: &str, queue: &QueueName) -> Result<Vec<ReceivedMessage>, SerializationError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    let mut buf = Vec::new();

    let mut messages = Vec::new();
    let mut current: Option<MessageFields> = None;
    let mut open: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut attribute: (Option<String>, Option<String>) = (None, None);

    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "Message" {
                    current = Some(MessageFields::default());
                }
                open.push(name);
                text.clear();
            }
            Event::Text(e) => text.push_str(&e.unescape().map_err(malformed)?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) => {
                let name = open.pop().unwrap_or_default();
                let parent = open.last().map(String::as_str);
                let value = std::mem::take(&mut text);

                if name == "Message" {
                    if let Some(fields) = current.take() {
                        messages.push(fields.into_received(queue)?);
                    }
                } else if let Some(fields) = current.as_mut() {
                    match (name.as_str(), parent) {
                        ("MessageId", Some("Message")) => fields.id = Some(value),
                        ("ReceiptHandle", Some("Message")) => fields.receipt = Some(value),
                        ("Body", Some("Message")) => fields.body = value,
                        ("Name", Some("Attribute")) => attribute.0 = Some(value),
                        ("Value", Some("Attribute")) => attribute.1 = Some(value),
                        ("Attribute", _) => {
                            if let (Some(key), Some(val)) = (attribute.0.take(), attribute.1.take())
                            {
                                fields.attributes.insert(key, val);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}
