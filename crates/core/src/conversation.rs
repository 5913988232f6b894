//! Conversation-related types.

use std::fmt::{self, Display};

use mime::Mime;
use sophia_backend::{
    Attachment, ConversationId, ConversationSummary, MessageRecord, Role,
};

/// The title shown for conversations the server has not named yet.
pub const DEFAULT_TITLE: &str = "New Chat";

/// The category of a conversation, which selects the feature view that
/// presents it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    /// Plain chat.
    #[default]
    Chat,
    /// Document summarizer.
    Summarize,
    /// Creative generator.
    Creative,
    /// Any other tag the server uses.
    Other(String),
}

impl ConversationKind {
    /// Maps a server tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "chat" => ConversationKind::Chat,
            "summarize" => ConversationKind::Summarize,
            "creative" => ConversationKind::Creative,
            other => ConversationKind::Other(other.to_owned()),
        }
    }

    /// Returns the server tag.
    pub fn as_str(&self) -> &str {
        match self {
            ConversationKind::Chat => "chat",
            ConversationKind::Summarize => "summarize",
            ConversationKind::Creative => "creative",
            ConversationKind::Other(tag) => tag,
        }
    }
}

impl Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the content of a message should be presented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderHint {
    /// Plain or markdown text.
    #[default]
    PlainText,
    /// Pre-rendered markup.
    Html,
}

/// Describes a file that was attached to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentInfo {
    /// The file name.
    pub file_name: String,
    /// The content type.
    pub mime: Mime,
    /// Size of the content in bytes.
    pub size: usize,
}

impl From<&Attachment> for AttachmentInfo {
    #[inline]
    fn from(attachment: &Attachment) -> Self {
        Self {
            file_name: attachment.file_name.clone(),
            mime: attachment.mime.clone(),
            size: attachment.data.len(),
        }
    }
}

/// A message of a conversation. Messages never change once appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub(crate) id: Option<String>,
    pub(crate) role: Role,
    pub(crate) content: String,
    pub(crate) attachments: Vec<AttachmentInfo>,
    pub(crate) hint: RenderHint,
}

impl Message {
    /// Creates a user message. Without text, the first file name stands in
    /// as the content.
    pub(crate) fn user(text: &str, attachments: &[Attachment]) -> Self {
        let content = match attachments.first() {
            Some(first) if text.trim().is_empty() => first.file_name.clone(),
            _ => text.to_owned(),
        };
        Self {
            id: None,
            role: Role::User,
            content,
            attachments: attachments.iter().map(AttachmentInfo::from).collect(),
            hint: RenderHint::PlainText,
        }
    }

    pub(crate) fn assistant<S: Into<String>>(
        content: S,
        hint: RenderHint,
    ) -> Self {
        Self {
            id: None,
            role: Role::Assistant,
            content: content.into(),
            attachments: vec![],
            hint,
        }
    }

    /// Returns the server-side identifier, known only for fetched messages.
    #[inline]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns who produced the message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the message text.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the files attached to the message.
    #[inline]
    pub fn attachments(&self) -> &[AttachmentInfo] {
        &self.attachments
    }

    /// Returns how the content should be presented.
    #[inline]
    pub fn hint(&self) -> RenderHint {
        self.hint
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            role: record.role,
            content: record.content,
            attachments: vec![],
            hint: RenderHint::PlainText,
        }
    }
}

/// Represents a conversation.
///
/// A conversation without an identifier is the draft, which exists only
/// locally. A conversation with an identifier starts as a shell whose
/// messages are fetched on first activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    pub(crate) id: Option<ConversationId>,
    pub(crate) title: String,
    pub(crate) kind: ConversationKind,
    pub(crate) messages: Vec<Message>,
    pub(crate) loaded: bool,
}

impl Conversation {
    pub(crate) fn draft(kind: ConversationKind) -> Self {
        Self {
            id: None,
            title: DEFAULT_TITLE.to_owned(),
            kind,
            messages: vec![],
            // Drafts have nothing on the server to fetch.
            loaded: true,
        }
    }

    pub(crate) fn shell(summary: ConversationSummary) -> Self {
        Self {
            id: Some(summary.id),
            title: summary.name.unwrap_or_else(|| DEFAULT_TITLE.to_owned()),
            kind: summary
                .kind
                .as_deref()
                .map(ConversationKind::from_tag)
                .unwrap_or_default(),
            messages: vec![],
            loaded: false,
        }
    }

    /// Returns the server-assigned identifier, `None` for the draft.
    #[inline]
    pub fn id(&self) -> Option<&ConversationId> {
        self.id.as_ref()
    }

    /// Returns the display title.
    #[inline]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the category.
    #[inline]
    pub fn kind(&self) -> &ConversationKind {
        &self.kind
    }

    /// Returns the messages in display order.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns whether the messages have been fetched from the server.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Returns whether this is the local-only draft.
    #[inline]
    pub fn is_draft(&self) -> bool {
        self.id.is_none()
    }
}
