use std::collections::HashSet;
use std::fmt::{self, Debug};

use sophia_backend::{
    Attachment, ConversationId, ConversationSummary, MessageRecord,
    PromptReply, PromptRequest,
};

use super::mailbox::{Command, Mailbox};
use super::{Reply, StoreSnapshot, StoreState};
use crate::Error;
use crate::conversation::{
    Conversation, ConversationKind, Message, RenderHint,
};

const DRAFT_REPLY: &str = "AI response will appear here";
const EMPTY_REPLY: &str = "No response from AI";

/// A message fetch in flight, with the callers waiting for it.
#[derive(Debug)]
pub(super) struct PendingFetch {
    task_id: u64,
    waiters: Vec<Reply<Result<(), Error>>>,
}

/// A send waiting for its turn, bound to the conversation that was active
/// when it was issued.
#[derive(Debug)]
pub(super) struct PendingSend {
    target: ConversationId,
    text: String,
    attachments: Vec<Attachment>,
    reply: Reply<Result<Option<Message>, Error>>,
}

/// The send being processed.
#[derive(Debug)]
pub(super) struct InFlightSend {
    target: ConversationId,
    /// Whether the history of the target was loaded after the prompt went
    /// out. Such a history may already contain the new turn.
    reloaded: bool,
}

impl StoreState {
    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            conversations: self.conversations.clone(),
            active: self.active.clone(),
            processing: self.processing,
        }
    }

    fn notify_changed(&self) {
        if let Some(on_change) = &self.on_change {
            on_change(&self.snapshot());
        }
    }

    /// Reports a failure that no caller is waiting for.
    fn report(&self, err: &Error) {
        warn!("unobserved failure: {err}");
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }

    fn settle<T>(
        &self,
        reply: Reply<Result<T, Error>>,
        result: Result<T, Error>,
    ) {
        if let Err(Err(err)) = reply.send(result) {
            self.report(&err);
        }
    }

    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id() == Some(id))
    }

    fn find_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id() == Some(id))
    }

    /// Resolves the active pointer. A pointer to a missing conversation
    /// resolves to nothing.
    fn active_index(&self) -> Option<usize> {
        match &self.active {
            Some(id) => self.position(id),
            None => self.conversations.iter().position(Conversation::is_draft),
        }
    }

    fn spawn_task<F, Fut>(&mut self, f: F, mailbox: &Mailbox) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let mailbox = mailbox.clone();
        let fut = f(task_id);
        let task = tokio::spawn(async move {
            fut.await;
            mailbox.post(TaskEnded(task_id));
        });
        self.running_tasks.insert(task_id, task);
        task_id
    }

    fn abort_task(&mut self, task_id: u64) {
        if let Some(task) = self.running_tasks.remove(&task_id) {
            trace!("aborting task {task_id}");
            task.abort();
        }
    }

    fn start_refresh(
        &mut self,
        reply: Option<Reply<Result<(), Error>>>,
        mailbox: &Mailbox,
    ) {
        self.list_generation += 1;
        let generation = self.list_generation;
        let fut = self.gateway.list_conversations();
        let mailbox_clone = mailbox.clone();
        self.spawn_task(
            |_| async move {
                let result = fut.await;
                mailbox_clone.post(RefreshFinished {
                    generation,
                    result,
                    reply,
                });
            },
            mailbox,
        );
    }

    fn apply_list(
        &mut self,
        generation: u64,
        list: Vec<ConversationSummary>,
        mailbox: &Mailbox,
    ) {
        if generation <= self.applied_generation {
            warn!("discarding stale conversation list #{generation}");
            return;
        }
        self.applied_generation = generation;

        let ids: Vec<_> = self.fetches.keys().cloned().collect();
        for id in ids {
            self.cancel_fetch(&id);
        }

        let mut seen = HashSet::new();
        self.conversations = list
            .into_iter()
            .filter(|summary| seen.insert(summary.id.clone()))
            .map(Conversation::shell)
            .collect();
        debug!("applied {} conversations", self.conversations.len());

        if let Some(id) = self.active.clone() {
            if self.position(&id).is_none() {
                debug!("active conversation {id} vanished");
                self.active = None;
            } else {
                self.ensure_loaded(&id, None, mailbox);
            }
        }
        self.notify_changed();
    }

    fn start_fetch(
        &mut self,
        id: ConversationId,
        waiters: Vec<Reply<Result<(), Error>>>,
        mailbox: &Mailbox,
    ) {
        let fut = self.gateway.conversation_messages(&id);
        let mailbox_clone = mailbox.clone();
        let fetch_id = id.clone();
        let task_id = self.spawn_task(
            |task_id| async move {
                let result = fut.await;
                mailbox_clone.post(FetchFinished {
                    id: fetch_id,
                    task_id,
                    result,
                });
            },
            mailbox,
        );
        debug!("fetching messages of {id} in task {task_id}");
        self.fetches.insert(id, PendingFetch { task_id, waiters });
    }

    fn cancel_fetch(&mut self, id: &ConversationId) {
        let Some(fetch) = self.fetches.remove(id) else {
            return;
        };
        self.abort_task(fetch.task_id);
        for waiter in fetch.waiters {
            waiter.send(Err(Error::cancelled())).ok();
        }
    }

    /// Starts or joins the fetch of an unloaded conversation. Resolves the
    /// waiter right away if there is nothing to fetch.
    fn ensure_loaded(
        &mut self,
        id: &ConversationId,
        waiter: Option<Reply<Result<(), Error>>>,
        mailbox: &Mailbox,
    ) {
        let needs_fetch = self
            .position(id)
            .is_some_and(|idx| !self.conversations[idx].is_loaded());
        if !needs_fetch {
            if let Some(waiter) = waiter {
                waiter.send(Ok(())).ok();
            }
            return;
        }
        if let Some(fetch) = self.fetches.get_mut(id) {
            trace!("joining the fetch of {id}");
            fetch.waiters.extend(waiter);
            return;
        }
        self.start_fetch(id.clone(), waiter.into_iter().collect(), mailbox);
    }

    fn apply_messages(
        &mut self,
        id: ConversationId,
        task_id: u64,
        result: Result<Vec<MessageRecord>, Error>,
    ) {
        if self.fetches.get(&id).map(|fetch| fetch.task_id) != Some(task_id) {
            warn!("discarding stale messages of {id} from task {task_id}");
            return;
        }
        let Some(fetch) = self.fetches.remove(&id) else {
            return;
        };

        match result {
            Ok(records) => {
                if let Some(conversation) = self.find_mut(&id) {
                    conversation.messages =
                        records.into_iter().map(Message::from).collect();
                    conversation.loaded = true;
                }
                if let Some(send) = &mut self.in_flight {
                    if send.target == id {
                        send.reloaded = true;
                    }
                }
                for waiter in fetch.waiters {
                    waiter.send(Ok(())).ok();
                }
                self.notify_changed();
            }
            Err(err) => {
                if fetch.waiters.is_empty() {
                    self.report(&err);
                }
                for waiter in fetch.waiters {
                    self.settle(waiter, Err(err.clone()));
                }
            }
        }
    }

    fn send_message(
        &mut self,
        text: String,
        attachments: Vec<Attachment>,
        reply: Reply<Result<Option<Message>, Error>>,
        mailbox: &Mailbox,
    ) {
        if text.trim().is_empty() && attachments.is_empty() {
            reply.send(Ok(None)).ok();
            return;
        }
        let Some(idx) = self.active_index() else {
            self.settle(reply, Err(Error::no_active_conversation()));
            return;
        };

        let conversation = &mut self.conversations[idx];
        let Some(target) = conversation.id.clone() else {
            // The draft answers locally and never reaches the server.
            let assistant =
                Message::assistant(DRAFT_REPLY, RenderHint::PlainText);
            conversation.messages.push(Message::user(&text, &attachments));
            conversation.messages.push(assistant.clone());
            self.notify_changed();
            reply.send(Ok(Some(assistant))).ok();
            return;
        };

        self.pending_sends.push_back(PendingSend {
            target,
            text,
            attachments,
            reply,
        });
        self.process_next_send(mailbox);
    }

    fn process_next_send(&mut self, mailbox: &Mailbox) {
        if self.processing {
            trace!("{} send(s) queued", self.pending_sends.len());
            return;
        }
        let Some(send) = self.pending_sends.pop_front() else {
            return;
        };
        let PendingSend {
            target,
            text,
            attachments,
            reply,
        } = send;

        self.processing = true;
        self.in_flight = Some(InFlightSend {
            target: target.clone(),
            reloaded: false,
        });
        self.notify_changed();

        let user_msg = Message::user(&text, &attachments);
        let req = PromptRequest {
            conversation_id: target.clone(),
            prompt: text,
            attachments,
        };
        let fut = self.gateway.send_prompt(&req);
        let mailbox_clone = mailbox.clone();
        self.spawn_task(
            |_| async move {
                let result = fut.await;
                mailbox_clone.post(SendFinished {
                    target,
                    user_msg,
                    result,
                    reply,
                });
            },
            mailbox,
        );
    }

    fn apply_reply(
        &mut self,
        target: ConversationId,
        user_msg: Message,
        result: Result<PromptReply, Error>,
        reply: Reply<Result<Option<Message>, Error>>,
        mailbox: &Mailbox,
    ) {
        self.processing = false;
        let reloaded = self.in_flight.take().is_some_and(|send| send.reloaded);
        match result {
            Ok(prompt_reply) => {
                let content = prompt_reply
                    .response
                    .filter(|response| !response.is_empty())
                    .unwrap_or_else(|| EMPTY_REPLY.to_owned());
                let assistant =
                    Message::assistant(content, RenderHint::PlainText);
                // A fetch in flight replaces the messages when it lands. A
                // history loaded during the send may already hold the turn,
                // so it is reloaded instead of appended to.
                let restart = self.fetches.remove(&target);
                let append = restart.is_some() || !reloaded;
                match self.find_mut(&target) {
                    Some(conversation) => {
                        if append {
                            conversation.messages.push(user_msg);
                            conversation.messages.push(assistant.clone());
                        }
                        if let Some(name) = prompt_reply
                            .conversation_name
                            .filter(|name| !name.is_empty())
                        {
                            conversation.title = name;
                        }
                        if let Some(tag) = prompt_reply
                            .conversation_type
                            .filter(|tag| !tag.is_empty())
                        {
                            conversation.kind =
                                ConversationKind::from_tag(&tag);
                        }
                    }
                    None => warn!("conversation {target} vanished"),
                }

                match restart {
                    Some(fetch) => {
                        debug!("restarting the fetch of {target}");
                        self.abort_task(fetch.task_id);
                        self.start_fetch(target, fetch.waiters, mailbox);
                    }
                    None if reloaded && self.position(&target).is_some() => {
                        debug!("reloading the history of {target}");
                        self.start_fetch(target, vec![], mailbox);
                    }
                    None => {}
                }
                self.settle(reply, Ok(Some(assistant)));
            }
            Err(err) => self.settle(reply, Err(err)),
        }
        self.notify_changed();
        self.process_next_send(mailbox);
    }
}

impl Drop for StoreState {
    fn drop(&mut self) {
        for (_, task) in self.running_tasks.drain() {
            task.abort();
        }
    }
}

#[derive(Debug)]
pub(super) struct Refresh {
    pub reply: Option<Reply<Result<(), Error>>>,
}

impl Command for Refresh {
    fn apply(self: Box<Self>, state: &mut StoreState, mailbox: &Mailbox) {
        state.start_refresh(self.reply, mailbox);
    }
}

#[derive(Debug)]
struct RefreshFinished {
    generation: u64,
    result: Result<Vec<ConversationSummary>, Error>,
    reply: Option<Reply<Result<(), Error>>>,
}

impl Command for RefreshFinished {
    fn apply(self: Box<Self>, state: &mut StoreState, mailbox: &Mailbox) {
        let RefreshFinished {
            generation,
            result,
            reply,
        } = *self;
        let result =
            result.map(|list| state.apply_list(generation, list, mailbox));
        match reply {
            Some(reply) => state.settle(reply, result),
            None => {
                if let Err(err) = result {
                    state.report(&err);
                }
            }
        }
    }
}

#[derive(Debug)]
pub(super) struct CreateDraft(pub ConversationKind);

impl Command for CreateDraft {
    fn apply(self: Box<Self>, state: &mut StoreState, _mailbox: &Mailbox) {
        state.conversations.retain(|c| !c.is_draft());
        state.conversations.insert(0, Conversation::draft(self.0));
        state.active = None;
        state.notify_changed();
    }
}

#[derive(Debug)]
pub(super) struct Activate {
    pub id: Option<ConversationId>,
    pub waiter: Option<Reply<Result<(), Error>>>,
}

impl Command for Activate {
    fn apply(self: Box<Self>, state: &mut StoreState, mailbox: &Mailbox) {
        let Activate { id, waiter } = *self;
        state.active = id.clone();
        match id {
            Some(id) => state.ensure_loaded(&id, waiter, mailbox),
            None => {
                if let Some(waiter) = waiter {
                    waiter.send(Ok(())).ok();
                }
            }
        }
        state.notify_changed();
    }
}

#[derive(Debug)]
struct FetchFinished {
    id: ConversationId,
    task_id: u64,
    result: Result<Vec<MessageRecord>, Error>,
}

impl Command for FetchFinished {
    #[inline]
    fn apply(self: Box<Self>, state: &mut StoreState, _mailbox: &Mailbox) {
        let FetchFinished {
            id,
            task_id,
            result,
        } = *self;
        state.apply_messages(id, task_id, result);
    }
}

#[derive(Debug)]
pub(super) struct Delete {
    pub id: Option<ConversationId>,
    pub reply: Reply<Result<(), Error>>,
}

impl Command for Delete {
    fn apply(self: Box<Self>, state: &mut StoreState, mailbox: &Mailbox) {
        let Delete { id, reply } = *self;
        let Some(id) = id else {
            state.conversations.retain(|c| !c.is_draft());
            state.notify_changed();
            reply.send(Ok(())).ok();
            return;
        };

        let fut = state.gateway.delete_conversation(&id);
        let mailbox_clone = mailbox.clone();
        state.spawn_task(
            |_| async move {
                let result = fut.await;
                mailbox_clone.post(DeleteFinished { id, result, reply });
            },
            mailbox,
        );
    }
}

#[derive(Debug)]
struct DeleteFinished {
    id: ConversationId,
    result: Result<(), Error>,
    reply: Reply<Result<(), Error>>,
}

impl Command for DeleteFinished {
    fn apply(self: Box<Self>, state: &mut StoreState, _mailbox: &Mailbox) {
        let DeleteFinished { id, result, reply } = *self;
        if result.is_ok() {
            state.conversations.retain(|c| c.id() != Some(&id));
            state.cancel_fetch(&id);
            if state.active.as_ref() == Some(&id) {
                state.active = None;
            }
            state.notify_changed();
        }
        state.settle(reply, result);
    }
}

#[derive(Debug)]
pub(super) struct SendMessage {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub reply: Reply<Result<Option<Message>, Error>>,
}

impl Command for SendMessage {
    #[inline]
    fn apply(self: Box<Self>, state: &mut StoreState, mailbox: &Mailbox) {
        let SendMessage {
            text,
            attachments,
            reply,
        } = *self;
        state.send_message(text, attachments, reply, mailbox);
    }
}

struct SendFinished {
    target: ConversationId,
    user_msg: Message,
    result: Result<PromptReply, Error>,
    reply: Reply<Result<Option<Message>, Error>>,
}

impl Debug for SendFinished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFinished")
            .field("target", &self.target)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl Command for SendFinished {
    fn apply(self: Box<Self>, state: &mut StoreState, mailbox: &Mailbox) {
        let SendFinished {
            target,
            user_msg,
            result,
            reply,
        } = *self;
        state.apply_reply(target, user_msg, result, reply, mailbox);
    }
}

#[derive(Debug)]
pub(super) struct Snapshot(pub Reply<StoreSnapshot>);

impl Command for Snapshot {
    #[inline]
    fn apply(self: Box<Self>, state: &mut StoreState, _mailbox: &Mailbox) {
        self.0.send(state.snapshot()).ok();
    }
}

#[derive(Debug)]
struct TaskEnded(u64);

impl Command for TaskEnded {
    #[inline]
    fn apply(self: Box<Self>, state: &mut StoreState, _mailbox: &Mailbox) {
        // Aborted tasks have been removed already.
        state.running_tasks.remove(&self.0);
    }
}
