use sophia_backend::{Attachment, GuestPromptRequest, HistoryTurn};

use crate::conversation::{Message, RenderHint};
use crate::{Error, Gateway};

const EMPTY_REPLY: &str = "AI returned no content";

/// An unauthenticated chat whose history lives only in memory.
///
/// The whole history is sent with every prompt, since the server keeps
/// nothing for guests.
#[derive(Debug)]
pub struct GuestChat {
    gateway: Gateway,
    messages: Vec<Message>,
}

impl GuestChat {
    /// Creates an empty guest chat.
    #[inline]
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            messages: vec![],
        }
    }

    /// Sends a message and returns the reply.
    ///
    /// Blank input without files does nothing and returns `Ok(None)`. On
    /// failure the history is left untouched.
    pub async fn send(
        &mut self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<&Message>, Error> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Ok(None);
        }

        let user_msg = Message::user(text, &attachments);
        let history = self
            .messages
            .iter()
            .chain([&user_msg])
            .map(|msg| HistoryTurn {
                role: msg.role(),
                content: strip_markup(msg.content()),
            })
            .collect();
        let req = GuestPromptRequest {
            prompt: text.to_owned(),
            history,
            attachments,
        };
        let reply = self
            .gateway
            .send_guest_prompt(&req)
            .await
            .map_err(|err| {
                err.with_fallback("Failed to get response from AI")
            })?;

        let content = reply
            .response
            .filter(|response| !response.is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_owned());
        self.messages.push(user_msg);
        self.messages.push(Message::assistant(content, RenderHint::Html));
        Ok(self.messages.last())
    }

    /// Returns the messages in display order.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Forgets the history.
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Removes markup tags from `s`, leaving the text between them.
///
/// An unterminated tag swallows the rest of the string.
pub fn strip_markup(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match (in_tag, c) {
            (false, '<') => in_tag = true,
            (false, c) => out.push(c),
            (true, '>') => in_tag = false,
            (true, _) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sophia_backend::{ErrorKind as BackendErrorKind, Role};
    use sophia_test_backend::{Endpoint, Error as TestError, TestBackend};

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<p>Hello <b>you</b></p>"), "Hello you");
        assert_eq!(strip_markup("1 < 2"), "1 ");
        assert_eq!(strip_markup("a > b"), "a > b");
        assert_eq!(strip_markup(""), "");
    }

    #[tokio::test]
    async fn test_history_is_sent_stripped() {
        let backend = TestBackend::default();
        let mut chat = GuestChat::new(Gateway::new(backend.clone()));

        let reply = chat.send("Hi", vec![]).await.unwrap().unwrap();
        assert_eq!(reply.content(), "<p>You said Hi</p>");
        assert_eq!(reply.hint(), RenderHint::Html);

        chat.send("Again", vec![]).await.unwrap();
        let prompts = backend.guest_prompts();
        let history = &prompts[1].history;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "You said Hi");
        assert_eq!(history[2].content, "Again");
        assert_eq!(chat.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_blank_input_is_noop() {
        let backend = TestBackend::default();
        let mut chat = GuestChat::new(Gateway::new(backend.clone()));
        assert!(chat.send("   ", vec![]).await.unwrap().is_none());
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_file_only_prompt() {
        let backend = TestBackend::default();
        let mut chat = GuestChat::new(Gateway::new(backend.clone()));
        chat.send("", vec![Attachment::new("notes.txt", "abc")])
            .await
            .unwrap();
        assert_eq!(chat.messages()[0].content(), "notes.txt");
        let prompts = backend.guest_prompts();
        assert_eq!(prompts[0].prompt, "");
        assert_eq!(prompts[0].history[0].content, "notes.txt");
        assert_eq!(prompts[0].attachments.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_appends_nothing() {
        let backend = TestBackend::default();
        backend.set_delay(Endpoint::SendGuestPrompt, Duration::from_secs(1));
        backend.fail(
            Endpoint::SendGuestPrompt,
            TestError::new(BackendErrorKind::Transport),
        );
        let mut chat = GuestChat::new(Gateway::new(backend));

        let err = chat.send("Hi", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.display_message(), "Failed to get response from AI");
        assert!(chat.messages().is_empty());
    }
}
