//! Fan-out of chat traffic from an authenticated connection.
//!
//! Chat messages are written to the store before anything is forwarded, so a
//! recipient who is offline finds them in their history later. Forwarding is
//! best effort: offline users are skipped and nothing is queued for them.

use tracing::{debug, error, warn};

use parley_shared::protocol::{Envelope, Kind};
use parley_shared::types::{GroupId, GroupMember, UserId};
use parley_store::NewMessage;

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::Identity;

pub struct Router<'a> {
    ctx: &'a ServerContext,
}

impl<'a> Router<'a> {
    pub fn new(ctx: &'a ServerContext) -> Self {
        Self { ctx }
    }

    /// Persist and forward a chat message or receipt sent by `sender`.
    ///
    /// Returns a reply for the sender when the message was refused.
    pub async fn deliver(&self, sender: &Identity, envelope: Envelope) -> Option<Envelope> {
        match envelope.kind {
            Kind::TextMessage | Kind::FileMessage => self.deliver_chat(sender, envelope).await,
            Kind::MessageDelivered | Kind::UpdateMessageStatus => {
                self.deliver_receipt(sender, envelope).await;
                None
            }
            other => {
                debug!(user = %sender.id, kind = ?other, "Not a routable kind");
                None
            }
        }
    }

    async fn deliver_chat(&self, sender: &Identity, envelope: Envelope) -> Option<Envelope> {
        let target = match (envelope.receiver_user(), envelope.receiver_group()) {
            (Some(user), _) => Target::User(user),
            (_, Some(group)) => Target::Group(group),
            _ => return Some(refuse("message has no receiver")),
        };

        // Resolve recipients before writing anything.
        let members = match target {
            Target::User(user) => match self.ctx.store.get_user(user).await {
                Ok(Some(_)) => Vec::new(),
                Ok(None) => return Some(refuse("no such user")),
                Err(e) => {
                    error!(user = %sender.id, error = %e, "Recipient lookup failed");
                    return Some(refuse("message could not be delivered"));
                }
            },
            Target::Group(group) => match self.ctx.store.get_group_members(group).await {
                Ok(members) if members.iter().any(|m| m.user_id == sender.id) => members,
                Ok(_) => return Some(refuse("not a member of this group")),
                Err(e) => {
                    error!(user = %sender.id, group = %group, error = %e, "Member lookup failed");
                    return Some(refuse("message could not be delivered"));
                }
            },
        };

        let (record, outbound) = match self.prepare(sender, &target, &envelope).await {
            Ok(prepared) => prepared,
            Err(reason) => return Some(refuse(reason)),
        };

        let id = match self.ctx.store.save_message(record).await {
            Ok(id) => id,
            Err(e) => {
                error!(user = %sender.id, error = %e, "Failed to persist message");
                return Some(refuse("message could not be saved"));
            }
        };
        let outbound = outbound.with_message_id(id);

        match target {
            Target::User(user) => match self.ctx.registry.lookup(user).await {
                Some(session) => {
                    session.send(outbound);
                    debug!(from = %sender.id, to = %user, message = %id, "Message forwarded");
                }
                None => {
                    debug!(from = %sender.id, to = %user, message = %id, "Recipient offline, stored only");
                }
            },
            Target::Group(group) => {
                let sent = self
                    .ctx
                    .registry
                    .broadcast_except(sender.id, &outbound, |h| {
                        members.iter().any(|m| m.user_id == h.user_id())
                    })
                    .await;
                debug!(from = %sender.id, group = %group, message = %id, online = sent, "Group message forwarded");
            }
        }

        None
    }

    /// Build the message record and the envelope recipients will see.
    async fn prepare(
        &self,
        sender: &Identity,
        target: &Target,
        envelope: &Envelope,
    ) -> Result<(NewMessage, Envelope), &'static str> {
        let (receiver_id, is_group) = target.raw();
        let base = Envelope::new(envelope.kind).with_sender(sender.id, &sender.username);
        let mut outbound = match *target {
            Target::User(user) => base.for_user(user),
            Target::Group(group) => base.for_group(group),
        };
        if let Some(name) = &envelope.receiver_name {
            outbound = outbound.with_receiver_name(name);
        }

        if envelope.kind == Kind::TextMessage {
            if envelope.text().is_none() {
                return Err("empty message");
            }
            let content = envelope.content.as_deref().unwrap_or_default();
            let record = NewMessage::text(sender.id, receiver_id, is_group, content);
            return Ok((record, outbound.with_content(content)));
        }

        let (Some(name), Some(data)) = (envelope.file_name.as_deref(), envelope.file_data.as_deref())
        else {
            return Err("file message without data");
        };
        let handle = match self.ctx.files.store(data, name).await {
            Ok(handle) => handle,
            Err(ServerError::FileTooLarge { .. }) => return Err("file too large"),
            Err(ServerError::BadRequest(_)) => return Err("invalid file"),
            Err(e) => {
                error!(user = %sender.id, error = %e, "Failed to store attachment");
                return Err("file could not be stored");
            }
        };
        let record = NewMessage::file(sender.id, receiver_id, is_group, name, handle);
        Ok((record, outbound.with_file_handle(name, handle)))
    }

    /// Record delivery/read flags and tell the message's author, if online.
    async fn deliver_receipt(&self, sender: &Identity, envelope: Envelope) {
        let Some(id) = envelope.message_id else {
            debug!(user = %sender.id, "Receipt without message id");
            return;
        };

        let message = match self.ctx.store.get_message(id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(user = %sender.id, message = %id, "Receipt for unknown message");
                return;
            }
            Err(e) => {
                error!(user = %sender.id, message = %id, error = %e, "Message lookup failed");
                return;
            }
        };

        let addressed = if message.is_group {
            match self.ctx.store.get_group_members(GroupId(message.receiver_id)).await {
                Ok(members) => members.iter().any(|m| m.user_id == sender.id),
                Err(e) => {
                    error!(user = %sender.id, error = %e, "Member lookup failed");
                    return;
                }
            }
        } else {
            message.receiver_id == sender.id.0
        };
        if !addressed || message.sender_id == sender.id {
            warn!(user = %sender.id, message = %id, "Receipt from a non-recipient ignored");
            return;
        }

        let read = envelope.read;
        let delivered = envelope.delivered || read;
        if let Err(e) = self.ctx.store.update_message_status(id, delivered, read).await {
            error!(message = %id, error = %e, "Failed to update message status");
            return;
        }

        let receipt = Envelope::new(envelope.kind)
            .with_sender(sender.id, &sender.username)
            .for_user(message.sender_id)
            .with_message_id(id)
            .with_flags(delivered, read);
        if let Some(author) = self.ctx.registry.lookup(message.sender_id).await {
            author.send(receipt);
        }
    }

    /// Send a one-off frame to `user` if they are online.
    pub async fn notify_user(&self, user: UserId, envelope: Envelope) -> bool {
        match self.ctx.registry.lookup(user).await {
            Some(session) => session.send(envelope),
            None => false,
        }
    }

    /// Tell online `members` (plus `also`, if given) about a membership
    /// change made by `actor`. The actor is never notified.
    pub async fn notify_group(
        &self,
        actor: UserId,
        group: GroupId,
        members: &[GroupMember],
        also: Option<UserId>,
        text: &str,
    ) -> usize {
        let envelope = Envelope::new(Kind::GroupNotification)
            .for_group(group)
            .with_content(text);
        self.ctx
            .registry
            .broadcast_except(actor, &envelope, |h| {
                Some(h.user_id()) == also || members.iter().any(|m| m.user_id == h.user_id())
            })
            .await
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    User(UserId),
    Group(GroupId),
}

impl Target {
    fn raw(&self) -> (i64, bool) {
        match self {
            Target::User(id) => (id.0, false),
            Target::Group(id) => (id.0, true),
        }
    }
}

fn refuse(reason: &str) -> Envelope {
    Envelope::error_notice(reason)
}
