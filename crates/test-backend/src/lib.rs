//! A local scripted backend for testing purpose.

mod endpoint;

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Value, json};
use sophia_backend::{
    AuthBundle, Backend, BackendError, ConversationId, ConversationSummary,
    ErrorKind, GuestPromptRequest, GuestReply, Identity, LoginOutcome,
    LoginRequest, MessageRecord, OtpChallenge, OtpRequest, PromptReply,
    PromptRequest, Role, User,
};
use tokio::time::sleep;

pub use endpoint::Endpoint;

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    payload: Option<Value>,
}

impl Error {
    /// Creates an error of the given kind without payload.
    #[inline]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            payload: None,
        }
    }

    /// Attaches a server payload.
    #[inline]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
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

#[derive(Clone)]
struct Account {
    password: String,
    otp: Option<String>,
    user: User,
}

#[derive(Default)]
struct Script {
    credential: Option<String>,
    accounts: HashMap<String, Account>,
    conversations: Vec<ConversationSummary>,
    messages: HashMap<ConversationId, Vec<MessageRecord>>,
    prompt_replies: VecDeque<PromptReply>,
    failures: HashMap<Endpoint, Error>,
    delays: HashMap<Endpoint, Duration>,
    calls: HashMap<Endpoint, usize>,
    prompts: Vec<PromptRequest>,
    guest_prompts: Vec<GuestPromptRequest>,
    next_message_id: u64,
}

impl Script {
    /// Counts the call and returns the injected failure, if any.
    fn enter(&mut self, endpoint: Endpoint) -> Result<(), Error> {
        *self.calls.entry(endpoint).or_default() += 1;
        match self.failures.get(&endpoint) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn authorized(&self) -> Result<(), Error> {
        if self.credential.is_some() {
            return Ok(());
        }
        Err(Error::new(ErrorKind::Server)
            .with_payload(json!({ "error": "Unauthorized" })))
    }

    fn issue_identity(&self, email: &str) -> Identity {
        let user = self
            .accounts
            .get(email)
            .map(|account| account.user.clone())
            .unwrap_or_default();
        Identity {
            user,
            auth: AuthBundle::new(format!("token:{email}")),
        }
    }

    fn record_turn(&mut self, id: &ConversationId, role: Role, content: &str) {
        self.next_message_id += 1;
        let record = MessageRecord {
            id: Some(self.next_message_id.to_string()),
            role,
            content: content.to_owned(),
        };
        self.messages.entry(id.clone()).or_default().push(record);
    }
}

/// A local fake of the SophiaAI service.
///
/// Clones share the same script, so a test can hand one clone to the code
/// under test and keep another to set up data, inject failures and inspect
/// call counters afterwards.
///
/// Conversation endpoints require a credential, like the real service.
/// Prompts are answered with `"You said {prompt}"` unless a reply has been
/// queued, and both turns are recorded in the conversation history.
///
/// # Note
///
/// This type is not optimized for production use, every call takes a lock
/// and clones data. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestBackend {
    script: Arc<Mutex<Script>>,
}

impl TestBackend {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an account. With `otp` set, logins answer with a challenge
    /// that this code completes.
    pub fn add_account(&self, email: &str, password: &str, otp: Option<&str>) {
        let account = Account {
            password: password.to_owned(),
            otp: otp.map(ToOwned::to_owned),
            user: User {
                username: email.split('@').next().map(ToOwned::to_owned),
                email: Some(email.to_owned()),
                ..Default::default()
            },
        };
        self.script().accounts.insert(email.to_owned(), account);
    }

    /// Adds a conversation at the end of the server list.
    pub fn add_conversation(
        &self,
        id: &str,
        name: Option<&str>,
        kind: Option<&str>,
    ) {
        let id = ConversationId::new(id);
        let mut script = self.script();
        script.messages.entry(id.clone()).or_default();
        script.conversations.push(ConversationSummary {
            id,
            name: name.map(ToOwned::to_owned),
            kind: kind.map(ToOwned::to_owned),
        });
    }

    /// Appends a stored message to a conversation.
    pub fn add_message(&self, id: &str, role: Role, content: &str) {
        self.script().record_turn(&ConversationId::new(id), role, content);
    }

    /// Queues the reply for the next prompt.
    pub fn push_prompt_reply(&self, reply: PromptReply) {
        self.script().prompt_replies.push_back(reply);
    }

    /// Makes every call to `endpoint` fail with `error` until
    /// [`TestBackend::recover`] is called.
    pub fn fail(&self, endpoint: Endpoint, error: Error) {
        self.script().failures.insert(endpoint, error);
    }

    /// Removes an injected failure.
    pub fn recover(&self, endpoint: Endpoint) {
        self.script().failures.remove(&endpoint);
    }

    /// Delays every answer of `endpoint`.
    pub fn set_delay(&self, endpoint: Endpoint, delay: Duration) {
        self.script().delays.insert(endpoint, delay);
    }

    /// Returns how many times `endpoint` has been called.
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.script().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Returns the total number of calls across all endpoints.
    pub fn total_calls(&self) -> usize {
        self.script().calls.values().sum()
    }

    /// Returns the credential currently installed.
    pub fn credential(&self) -> Option<String> {
        self.script().credential.clone()
    }

    /// Returns every prompt received so far.
    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.script().prompts.clone()
    }

    /// Returns every guest prompt received so far.
    pub fn guest_prompts(&self) -> Vec<GuestPromptRequest> {
        self.script().guest_prompts.clone()
    }

    /// Returns the stored history of a conversation.
    pub fn stored_messages(&self, id: &str) -> Vec<MessageRecord> {
        self.script()
            .messages
            .get(&ConversationId::new(id))
            .cloned()
            .unwrap_or_default()
    }

    fn answer<T: Send + 'static>(
        &self,
        endpoint: Endpoint,
        f: impl FnOnce(&mut Script) -> Result<T, Error>,
    ) -> impl Future<Output = Result<T, Error>> + Send + 'static {
        let (result, delay) = {
            let mut script = self.script();
            let result = script.enter(endpoint).and_then(|_| f(&mut script));
            (result, script.delays.get(&endpoint).copied())
        };
        async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            result
        }
    }
}

impl Backend for TestBackend {
    type Error = crate::Error;

    fn set_credential(&self, token: Option<&str>) {
        self.script().credential = token.map(ToOwned::to_owned);
    }

    fn login(
        &self,
        req: &LoginRequest,
    ) -> impl Future<Output = Result<LoginOutcome, Self::Error>> + Send + 'static
    {
        let req = req.clone();
        self.answer(Endpoint::Login, move |script| {
            let Some(account) = script
                .accounts
                .get(&req.email)
                .filter(|account| account.password == req.password)
            else {
                return Err(Error::new(ErrorKind::Server)
                    .with_payload(json!({ "error": "Invalid credentials" })));
            };
            if account.otp.is_some() {
                return Ok(LoginOutcome::OtpRequired(OtpChallenge {
                    email: req.email,
                }));
            }
            Ok(LoginOutcome::Authenticated(script.issue_identity(&req.email)))
        })
    }

    fn verify_otp(
        &self,
        req: &OtpRequest,
    ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + 'static
    {
        let req = req.clone();
        self.answer(Endpoint::VerifyOtp, move |script| {
            let matches = script
                .accounts
                .get(&req.email)
                .and_then(|account| account.otp.as_deref())
                == Some(req.otp.as_str());
            if !matches {
                return Err(Error::new(ErrorKind::Server)
                    .with_payload(json!({ "error": "Invalid OTP" })));
            }
            Ok(script.issue_identity(&req.email))
        })
    }

    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, Self::Error>>
    + Send
    + 'static {
        self.answer(Endpoint::ListConversations, |script| {
            script.authorized()?;
            Ok(script.conversations.clone())
        })
    }

    fn conversation_messages(
        &self,
        id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, Self::Error>>
    + Send
    + 'static {
        let id = id.clone();
        self.answer(Endpoint::ConversationMessages, move |script| {
            script.authorized()?;
            script.messages.get(&id).cloned().ok_or_else(|| {
                Error::new(ErrorKind::Server)
                    .with_payload(json!({ "error": "Conversation not found" }))
            })
        })
    }

    fn delete_conversation(
        &self,
        id: &ConversationId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let id = id.clone();
        self.answer(Endpoint::DeleteConversation, move |script| {
            script.authorized()?;
            script.conversations.retain(|c| c.id != id);
            script.messages.remove(&id);
            Ok(())
        })
    }

    fn send_prompt(
        &self,
        req: &PromptRequest,
    ) -> impl Future<Output = Result<PromptReply, Self::Error>> + Send + 'static
    {
        let req = req.clone();
        self.answer(Endpoint::SendPrompt, move |script| {
            script.authorized()?;
            let reply = script.prompt_replies.pop_front().unwrap_or_else(|| {
                PromptReply {
                    response: Some(format!("You said {}", req.prompt)),
                    ..Default::default()
                }
            });
            let id = req.conversation_id.clone();
            script.record_turn(&id, Role::User, &req.prompt);
            if let Some(response) = &reply.response {
                script.record_turn(&id, Role::Assistant, response);
            }
            if let Some(name) = &reply.conversation_name {
                let conversation =
                    script.conversations.iter_mut().find(|c| c.id == id);
                if let Some(c) = conversation {
                    c.name = Some(name.clone());
                }
            }
            script.prompts.push(req);
            Ok(reply)
        })
    }

    fn send_guest_prompt(
        &self,
        req: &GuestPromptRequest,
    ) -> impl Future<Output = Result<GuestReply, Self::Error>> + Send + 'static
    {
        let req = req.clone();
        self.answer(Endpoint::SendGuestPrompt, move |script| {
            let response = Some(format!("<p>You said {}</p>", req.prompt));
            script.guest_prompts.push(req);
            Ok(GuestReply { response })
        })
    }
}
