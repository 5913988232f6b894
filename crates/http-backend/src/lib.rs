//! A backend for the SophiaAI HTTP API.

#[macro_use]
extern crate tracing;

mod config;
mod proto;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sophia_backend::{
    Attachment, Backend, BackendError, ConversationId, ConversationSummary,
    ErrorKind, GuestPromptRequest, GuestReply, Identity, LoginOutcome,
    LoginRequest, MessageRecord, OtpRequest, PromptReply, PromptRequest,
};

pub use config::{DEFAULT_BASE_URL, HttpConfig, HttpConfigBuilder};
use proto::{
    AiResponse, AuthResponse, ConvertError, ListResponse, WireConversation,
    WireMessage,
};

/// Error type for [`HttpBackend`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    status: Option<StatusCode>,
    payload: Option<Value>,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            status: None,
            payload: None,
        }
    }

    fn transport(err: reqwest::Error) -> Self {
        Self::new(format!("{err}"), ErrorKind::Transport)
    }

    fn invalid(err: impl Display, payload: Option<Value>) -> Self {
        Self {
            payload,
            ..Self::new(format!("{err}"), ErrorKind::InvalidResponse)
        }
    }

    fn convert(err: ConvertError, payload: Value) -> Self {
        let (message, kind) = match err {
            ConvertError::Status(status) => {
                let message = format!("server reported status {status:?}");
                (message, ErrorKind::Server)
            }
            ConvertError::Missing(field) => (
                format!("field `{field}` is missing"),
                ErrorKind::InvalidResponse,
            ),
        };
        Self {
            payload: Some(payload),
            ..Self::new(message, kind)
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status, if a response was received.
    #[inline]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl BackendError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

/// The SophiaAI HTTP API.
///
/// Clones share the underlying connection pool, cookie store and bearer
/// credential.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    config: Arc<HttpConfig>,
    credential: Arc<RwLock<Option<String>>>,
}

impl HttpBackend {
    /// Creates a new `HttpBackend` with the given configuration.
    pub fn new(config: HttpConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .cookie_store(config.cookies)
            .build()
            .map_err(Error::transport)?;
        Ok(Self {
            client,
            config: Arc::new(config),
            credential: Default::default(),
        })
    }

    /// Returns the configuration of this backend.
    #[inline]
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn credential(&self) -> Option<String> {
        match self.credential.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        trace!("preparing {method} {path}");
        self.authorize(self.client.request(method, self.config.url(path)))
    }

    /// Prepares a request for `collection/{id}`, with the id encoded as a
    /// single path segment.
    fn resource_request(
        &self,
        method: Method,
        collection: &str,
        id: &ConversationId,
    ) -> Result<RequestBuilder, Error> {
        let id = id.as_str();
        if matches!(id, "" | "." | "..") {
            return Err(Error::new(
                format!("invalid conversation id {id:?}"),
                ErrorKind::Transport,
            ));
        }
        let mut url = Url::parse(&self.config.url(collection)).map_err(|err| {
            Error::new(format!("{err}"), ErrorKind::Transport)
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                Error::new("base url cannot hold a path", ErrorKind::Transport)
            })?
            .pop_if_empty()
            .push(id);
        trace!("preparing {method} {url}");
        Ok(self.authorize(self.client.request(method, url)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credential() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn prompt_request(
        &self,
        req: &PromptRequest,
    ) -> Result<RequestBuilder, Error> {
        let mut form = Form::new()
            .text("prompt", req.prompt.clone())
            .text("conversation_id", req.conversation_id.to_string());
        for attachment in &req.attachments {
            form = form.part("file", file_part(attachment)?);
        }
        Ok(self
            .request(Method::POST, "/ai/logged_in_user")
            .multipart(form))
    }

    fn guest_request(
        &self,
        req: &GuestPromptRequest,
    ) -> Result<RequestBuilder, Error> {
        let history = proto::history(&req.history);
        let builder = self.request(Method::POST, "/guest/ai");
        if req.attachments.is_empty() {
            return Ok(builder.json(&proto::GuestBody {
                prompt: &req.prompt,
                history,
            }));
        }

        // With files the history travels as a JSON-encoded form field.
        let history = serde_json::to_string(&history)
            .map_err(|err| Error::invalid(err, None))?;
        let mut form = Form::new()
            .text("prompt", req.prompt.clone())
            .text("history", history);
        for attachment in &req.attachments {
            form = form.part("file", file_part(attachment)?);
        }
        Ok(builder.multipart(form))
    }
}

impl Backend for HttpBackend {
    type Error = Error;

    fn set_credential(&self, token: Option<&str>) {
        let token = token.map(ToOwned::to_owned);
        match self.credential.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn login(
        &self,
        req: &LoginRequest,
    ) -> impl Future<Output = Result<LoginOutcome, Self::Error>> + Send + 'static
    {
        let builder = self.request(Method::POST, "/login").json(
            &proto::LoginBody {
                email: &req.email,
                password: &req.password,
            },
        );
        async move {
            let value = send_json(builder).await?;
            let resp: AuthResponse = decode(&value)?;
            proto::login_outcome(resp).map_err(|err| Error::convert(err, value))
        }
    }

    fn verify_otp(
        &self,
        req: &OtpRequest,
    ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + 'static
    {
        let builder = self.request(Method::POST, "/verify-otp").json(
            &proto::OtpBody {
                email: &req.email,
                otp: &req.otp,
            },
        );
        async move {
            let value = send_json(builder).await?;
            let resp: AuthResponse = decode(&value)?;
            proto::identity(resp).map_err(|err| Error::convert(err, value))
        }
    }

    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, Self::Error>>
    + Send
    + 'static {
        let builder = self.request(Method::GET, "/get_all_users_conversations");
        async move {
            let value = send_json(builder).await?;
            let resp: ListResponse<WireConversation> = decode(&value)?;
            proto::conversations(resp).map_err(|err| Error::convert(err, value))
        }
    }

    fn conversation_messages(
        &self,
        id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, Self::Error>>
    + Send
    + 'static {
        let builder = self.resource_request(
            Method::GET,
            "/get_all_conversation_messages",
            id,
        );
        async move {
            let value = send_json(builder?).await?;
            let resp: ListResponse<WireMessage> = decode(&value)?;
            proto::messages(resp).map_err(|err| Error::convert(err, value))
        }
    }

    fn delete_conversation(
        &self,
        id: &ConversationId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let builder =
            self.resource_request(Method::DELETE, "/delete_conversation", id);
        async move {
            // The body of a successful delete carries nothing we need.
            send(builder?).await?;
            Ok(())
        }
    }

    fn send_prompt(
        &self,
        req: &PromptRequest,
    ) -> impl Future<Output = Result<PromptReply, Self::Error>> + Send + 'static
    {
        let builder = self.prompt_request(req);
        async move {
            let value = send_json(builder?).await?;
            let resp: AiResponse = decode(&value)?;
            Ok(proto::prompt_reply(resp))
        }
    }

    fn send_guest_prompt(
        &self,
        req: &GuestPromptRequest,
    ) -> impl Future<Output = Result<GuestReply, Self::Error>> + Send + 'static
    {
        let builder = self.guest_request(req);
        async move {
            let value = send_json(builder?).await?;
            let resp: AiResponse = decode(&value)?;
            Ok(proto::guest_reply(resp))
        }
    }
}

fn file_part(attachment: &Attachment) -> Result<Part, Error> {
    Part::bytes(attachment.data.to_vec())
        .file_name(attachment.file_name.clone())
        .mime_str(attachment.mime.as_ref())
        .map_err(|err| Error::invalid(err, None))
}

/// Sends the request and returns the body of a 2xx response. Any other
/// status becomes a server error carrying the JSON body, if it has one.
async fn send(builder: RequestBuilder) -> Result<Bytes, Error> {
    let resp = builder.send().await.map_err(|err| {
        error!("request failed: {err}");
        Error::transport(err)
    })?;
    let status = resp.status();
    let body = resp.bytes().await.map_err(Error::transport)?;
    trace!("got {status} with {} bytes", body.len());

    if !status.is_success() {
        error!("server answered {status}");
        let payload = serde_json::from_slice::<Value>(&body).ok();
        return Err(Error {
            status: Some(status),
            payload,
            ..Error::new(format!("server answered {status}"), ErrorKind::Server)
        });
    }
    Ok(body)
}

async fn send_json(builder: RequestBuilder) -> Result<Value, Error> {
    let body = send(builder).await?;
    serde_json::from_slice(&body).map_err(|err| Error::invalid(err, None))
}

#[inline]
fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, Error> {
    T::deserialize(value)
        .map_err(|err| Error::invalid(err, Some(value.clone())))
}

#[cfg(test)]
mod tests {
    use sophia_backend::{HistoryTurn, Role};

    use super::*;

    fn backend() -> HttpBackend {
        let config = HttpConfigBuilder::new()
            .with_base_url("http://localhost:5000")
            .build();
        HttpBackend::new(config).unwrap()
    }

    #[test]
    fn test_bearer_header() {
        let backend = backend();
        let req = backend
            .request(Method::GET, "/get_all_users_conversations")
            .build()
            .unwrap();
        assert!(req.headers().get("authorization").is_none());
        assert_eq!(
            req.url().as_str(),
            "http://localhost:5000/get_all_users_conversations"
        );

        backend.set_credential(Some("t0k3n"));
        let req = backend
            .request(Method::GET, "/get_all_users_conversations")
            .build()
            .unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer t0k3n");

        backend.set_credential(None);
        let req = backend.request(Method::GET, "/").build().unwrap();
        assert!(req.headers().get("authorization").is_none());
    }

    #[test]
    fn test_conversation_id_is_one_segment() {
        let backend = backend();
        let url = |id: &str| {
            backend
                .resource_request(
                    Method::DELETE,
                    "/delete_conversation",
                    &ConversationId::new(id),
                )
                .unwrap()
                .build()
                .unwrap()
                .url()
                .to_string()
        };
        assert_eq!(url("42"), "http://localhost:5000/delete_conversation/42");
        assert_eq!(
            url("../login"),
            "http://localhost:5000/delete_conversation/..%2Flogin"
        );
        assert_eq!(
            url("a?b"),
            "http://localhost:5000/delete_conversation/a%3Fb"
        );
        assert_eq!(
            url("a#b"),
            "http://localhost:5000/delete_conversation/a%23b"
        );

        for id in ["", ".", ".."] {
            let err = backend
                .resource_request(
                    Method::GET,
                    "/get_all_conversation_messages",
                    &ConversationId::new(id),
                )
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transport);
        }
    }

    #[test]
    fn test_guest_request_content_type() {
        let backend = backend();
        let mut req = GuestPromptRequest {
            prompt: "hi".to_owned(),
            history: vec![HistoryTurn {
                role: Role::User,
                content: "hi".to_owned(),
            }],
            attachments: vec![],
        };
        let json = backend.guest_request(&req).unwrap().build().unwrap();
        assert_eq!(json.headers()["content-type"], "application/json");

        req.attachments
            .push(
                Attachment::new("notes.txt", "hello")
                    .with_mime(mime::TEXT_PLAIN),
            );
        let multipart = backend.guest_request(&req).unwrap().build().unwrap();
        let content_type =
            multipart.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Nothing listens on the discard port.
        let config = HttpConfigBuilder::new()
            .with_base_url("http://127.0.0.1:9")
            .build();
        let backend = HttpBackend::new(config).unwrap();
        let err = backend.list_conversations().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.payload().is_none());
    }
}
