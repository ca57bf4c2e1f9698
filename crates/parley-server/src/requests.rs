//! Request/response handlers for authenticated connections.
//!
//! Each handler answers the requester directly. The only side traffic is
//! NEW_CHAT_REQUEST after ADD_CONTACT and GROUP_NOTIFICATION after a
//! membership change, both sent through the [`Router`].

use tracing::{debug, error, info};

use parley_shared::constants::{HISTORY_LIMIT, MAX_GROUP_MEMBERS, SEARCH_LIMIT};
use parley_shared::protocol::{Envelope, Kind, ListPayload};
use parley_shared::types::{
    FileHandle, GroupId, GroupMember, GroupSummary, UserId, UserStatus, UserSummary,
};
use parley_store::{StoreError, User};

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::registry::Identity;
use crate::router::Router;

const MAX_GROUP_NAME: usize = 64;

/// Answer one request from `me`. `None` means the frame is not a request
/// and was dropped.
pub async fn handle(ctx: &ServerContext, me: &Identity, request: Envelope) -> Option<Envelope> {
    let reply = match request.kind {
        Kind::GetContacts => get_contacts(ctx, me).await,
        Kind::AddContact => add_contact(ctx, me, &request).await,
        Kind::RemoveContact => remove_contact(ctx, me, &request).await,
        Kind::SearchUsers => search_users(ctx, me, &request).await,
        Kind::GetHistory => get_history(ctx, me, &request).await,
        Kind::GetGroups => get_groups(ctx, me).await,
        Kind::GetGroupMembers => get_group_members(ctx, me, &request).await,
        Kind::CreateGroup => create_group(ctx, me, &request).await,
        Kind::AddGroupMember => add_group_member(ctx, me, &request).await,
        Kind::RemoveGroupMember => remove_group_member(ctx, me, &request).await,
        Kind::LeaveGroup => leave_group(ctx, me, &request).await,
        Kind::DownloadFile => download_file(ctx, me, &request).await,
        other => {
            debug!(user = %me.id, kind = ?other, "Dropping unexpected frame");
            return None;
        }
    };
    Some(reply)
}

/// Log a store failure and turn it into a generic failure reply.
fn unavailable(kind: Kind, me: &Identity, err: StoreError) -> Envelope {
    error!(user = %me.id, reply = ?kind, error = %err, "Store request failed");
    Envelope::failure(kind, "request failed, try again later")
}

async fn summarize(ctx: &ServerContext, users: Vec<User>) -> Vec<UserSummary> {
    let mut out = Vec::with_capacity(users.len());
    for user in users {
        let status = if ctx.registry.is_online(user.id).await {
            UserStatus::Online
        } else {
            UserStatus::Offline
        };
        out.push(UserSummary {
            id: user.id,
            username: user.username,
            status,
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Contacts and search
// ---------------------------------------------------------------------------

async fn get_contacts(ctx: &ServerContext, me: &Identity) -> Envelope {
    match ctx.store.get_contacts(me.id).await {
        Ok(users) => Envelope::new(Kind::ListContacts)
            .with_payload(ListPayload::Users(summarize(ctx, users).await)),
        Err(e) => unavailable(Kind::ListContactsFail, me, e),
    }
}

/// Resolve the username carried in `content`, refusing `me`.
async fn resolve_other(
    ctx: &ServerContext,
    me: &Identity,
    request: &Envelope,
    fail: Kind,
) -> Result<User, Envelope> {
    let Some(name) = request.text() else {
        return Err(Envelope::failure(fail, "username required"));
    };
    match ctx.store.find_user_by_name(name).await {
        Ok(Some(user)) if user.id == me.id => Err(Envelope::failure(fail, "that is you")),
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(Envelope::failure(fail, format!("no user named '{name}'"))),
        Err(e) => Err(unavailable(fail, me, e)),
    }
}

async fn add_contact(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    let contact = match resolve_other(ctx, me, request, Kind::AddContactFail).await {
        Ok(user) => user,
        Err(reply) => return reply,
    };

    match ctx.store.add_contact(me.id, contact.id).await {
        Ok(true) => {}
        Ok(false) => return Envelope::failure(Kind::AddContactFail, "already a contact"),
        Err(e) => return unavailable(Kind::AddContactFail, me, e),
    }
    info!(user = %me.id, contact = %contact.id, "Contact added");

    let request_notice = Envelope::new(Kind::NewChatRequest)
        .with_sender(me.id, &me.username)
        .for_user(contact.id);
    Router::new(ctx).notify_user(contact.id, request_notice).await;

    let summary = summarize(ctx, vec![contact]).await;
    let mut reply = Envelope::new(Kind::AddContactOk);
    if let Some(first) = summary.first() {
        reply = reply
            .for_user(first.id)
            .with_receiver_name(&first.username);
    }
    reply.with_payload(ListPayload::Users(summary))
}

async fn remove_contact(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    let contact = match resolve_other(ctx, me, request, Kind::RemoveContactFail).await {
        Ok(user) => user,
        Err(reply) => return reply,
    };

    match ctx.store.remove_contact(me.id, contact.id).await {
        Ok(true) => {
            info!(user = %me.id, contact = %contact.id, "Contact removed");
            Envelope::new(Kind::RemoveContactOk)
                .for_user(contact.id)
                .with_receiver_name(contact.username)
        }
        Ok(false) => Envelope::failure(Kind::RemoveContactFail, "not a contact"),
        Err(e) => unavailable(Kind::RemoveContactFail, me, e),
    }
}

async fn search_users(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    let Some(query) = request.text() else {
        return Envelope::failure(Kind::SearchFail, "empty query");
    };
    match ctx.store.search_users(query, SEARCH_LIMIT).await {
        Ok(users) => {
            let users: Vec<User> = users.into_iter().filter(|u| u.id != me.id).collect();
            Envelope::new(Kind::SearchResults)
                .with_content(query)
                .with_payload(ListPayload::Users(summarize(ctx, users).await))
        }
        Err(e) => unavailable(Kind::SearchFail, me, e),
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn get_history(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    let history = if let Some(group) = request.receiver_group() {
        match members_of(ctx, me, group, Kind::HistoryFail).await {
            Ok(_) => ctx.store.get_group_history(group, HISTORY_LIMIT).await,
            Err(reply) => return reply,
        }
    } else if let Some(other) = request.receiver_user() {
        ctx.store.get_private_history(me.id, other, HISTORY_LIMIT).await
    } else {
        return Envelope::failure(Kind::HistoryFail, "no conversation selected");
    };

    match history {
        Ok(entries) => {
            let mut reply = Envelope::new(Kind::HistoryResponse);
            reply.receiver_id = request.receiver_id;
            reply.is_group = request.is_group;
            reply.with_payload(ListPayload::History(entries))
        }
        Err(e) => unavailable(Kind::HistoryFail, me, e),
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// Members of `group`, provided `me` is one of them.
async fn members_of(
    ctx: &ServerContext,
    me: &Identity,
    group: GroupId,
    fail: Kind,
) -> Result<Vec<GroupMember>, Envelope> {
    match ctx.store.get_group_members(group).await {
        Ok(members) if members.is_empty() => Err(Envelope::failure(fail, "no such group")),
        Ok(members) if members.iter().any(|m| m.user_id == me.id) => Ok(members),
        Ok(_) => Err(Envelope::failure(fail, "not a member of this group")),
        Err(e) => Err(unavailable(fail, me, e)),
    }
}

fn is_admin(members: &[GroupMember], user: UserId) -> bool {
    members.iter().any(|m| m.user_id == user && m.is_admin)
}

/// Whether `user` leaving would strand the group without an admin.
fn is_last_admin(members: &[GroupMember], user: UserId) -> bool {
    is_admin(members, user) && members.len() > 1 && members.iter().filter(|m| m.is_admin).count() == 1
}

async fn group_name(ctx: &ServerContext, group: GroupId) -> String {
    match ctx.store.get_group(group).await {
        Ok(g) => g.name,
        Err(_) => format!("group {group}"),
    }
}

async fn get_groups(ctx: &ServerContext, me: &Identity) -> Envelope {
    match ctx.store.get_groups_by_user(me.id).await {
        Ok(groups) => Envelope::new(Kind::ListGroups).with_payload(ListPayload::Groups(groups)),
        Err(e) => unavailable(Kind::ListGroupsFail, me, e),
    }
}

async fn get_group_members(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    let Some(group) = request.receiver_group() else {
        return Envelope::failure(Kind::ListGroupMembersFail, "no group selected");
    };
    match members_of(ctx, me, group, Kind::ListGroupMembersFail).await {
        Ok(members) => Envelope::new(Kind::ListGroupMembers)
            .for_group(group)
            .with_payload(ListPayload::Members(members)),
        Err(reply) => reply,
    }
}

async fn create_group(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    let Some(name) = request.text() else {
        return Envelope::failure(Kind::CreateGroupFail, "group name required");
    };
    if name.chars().count() > MAX_GROUP_NAME {
        return Envelope::failure(Kind::CreateGroupFail, "group name too long");
    }

    match ctx.store.create_group(name, me.id).await {
        Ok(group) => {
            info!(user = %me.id, group = %group.id, "Group created");
            let summary = GroupSummary {
                id: group.id,
                name: group.name.clone(),
                member_count: 1,
            };
            Envelope::new(Kind::CreateGroupOk)
                .for_group(group.id)
                .with_receiver_name(group.name)
                .with_payload(ListPayload::Groups(vec![summary]))
        }
        Err(e) => unavailable(Kind::CreateGroupFail, me, e),
    }
}

async fn add_group_member(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    const FAIL: Kind = Kind::AddGroupMemberFail;

    let Some(group) = request.receiver_group() else {
        return Envelope::failure(FAIL, "no group selected");
    };
    let members = match members_of(ctx, me, group, FAIL).await {
        Ok(members) => members,
        Err(reply) => return reply,
    };
    if !is_admin(&members, me.id) {
        return Envelope::failure(FAIL, "only admins can add members");
    }
    let user = match resolve_other(ctx, me, request, FAIL).await {
        Ok(user) => user,
        Err(reply) => return reply,
    };
    if members.iter().any(|m| m.user_id == user.id) {
        return Envelope::failure(FAIL, "already a member");
    }
    if members.len() >= MAX_GROUP_MEMBERS {
        return Envelope::failure(FAIL, format!("group is full ({MAX_GROUP_MEMBERS} members)"));
    }

    match ctx.store.add_group_member(group, user.id, false).await {
        Ok(()) => {}
        Err(StoreError::Duplicate(_)) => return Envelope::failure(FAIL, "already a member"),
        Err(StoreError::GroupFull) => {
            return Envelope::failure(FAIL, format!("group is full ({MAX_GROUP_MEMBERS} members)"))
        }
        Err(e) => return unavailable(FAIL, me, e),
    }
    info!(user = %me.id, group = %group, member = %user.id, "Group member added");

    let name = group_name(ctx, group).await;
    let mut members = members;
    members.push(GroupMember {
        user_id: user.id,
        username: user.username.clone(),
        is_admin: false,
    });
    Router::new(ctx)
        .notify_group(
            me.id,
            group,
            &members,
            None,
            &format!("{} added {} to {}", me.username, user.username, name),
        )
        .await;

    Envelope::new(Kind::AddGroupMemberOk)
        .for_group(group)
        .with_content(user.username)
}

async fn remove_group_member(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    const FAIL: Kind = Kind::RemoveGroupMemberFail;

    let Some(group) = request.receiver_group() else {
        return Envelope::failure(FAIL, "no group selected");
    };
    let members = match members_of(ctx, me, group, FAIL).await {
        Ok(members) => members,
        Err(reply) => return reply,
    };
    if !is_admin(&members, me.id) {
        return Envelope::failure(FAIL, "only admins can remove members");
    }
    let Some(name) = request.text() else {
        return Envelope::failure(FAIL, "username required");
    };
    let Some(target) = members
        .iter()
        .find(|m| m.username.eq_ignore_ascii_case(name))
        .cloned()
    else {
        return Envelope::failure(FAIL, format!("'{name}' is not a member"));
    };
    if is_last_admin(&members, target.user_id) {
        return Envelope::failure(FAIL, "last admin cannot leave");
    }

    match ctx.store.remove_group_member(group, target.user_id).await {
        Ok(true) => {}
        Ok(false) => return Envelope::failure(FAIL, format!("'{name}' is not a member")),
        Err(e) => return unavailable(FAIL, me, e),
    }
    info!(user = %me.id, group = %group, member = %target.user_id, "Group member removed");

    let title = group_name(ctx, group).await;
    let remaining: Vec<GroupMember> = members
        .into_iter()
        .filter(|m| m.user_id != target.user_id)
        .collect();
    Router::new(ctx)
        .notify_group(
            me.id,
            group,
            &remaining,
            Some(target.user_id),
            &format!("{} removed {} from {}", me.username, target.username, title),
        )
        .await;

    Envelope::new(Kind::RemoveGroupMemberOk)
        .for_group(group)
        .with_content(target.username)
}

async fn leave_group(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    const FAIL: Kind = Kind::LeaveGroupFail;

    let Some(group) = request.receiver_group() else {
        return Envelope::failure(FAIL, "no group selected");
    };
    let members = match members_of(ctx, me, group, FAIL).await {
        Ok(members) => members,
        Err(reply) => return reply,
    };
    if is_last_admin(&members, me.id) {
        return Envelope::failure(FAIL, "last admin cannot leave");
    }

    match ctx.store.remove_group_member(group, me.id).await {
        Ok(_) => {}
        Err(e) => return unavailable(FAIL, me, e),
    }
    info!(user = %me.id, group = %group, "Left group");

    let title = group_name(ctx, group).await;
    let remaining: Vec<GroupMember> = members.into_iter().filter(|m| m.user_id != me.id).collect();
    Router::new(ctx)
        .notify_group(
            me.id,
            group,
            &remaining,
            None,
            &format!("{} left {}", me.username, title),
        )
        .await;

    Envelope::new(Kind::LeaveGroupOk).for_group(group)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

async fn download_file(ctx: &ServerContext, me: &Identity, request: &Envelope) -> Envelope {
    const FAIL: Kind = Kind::DownloadFileFail;

    let handle = match (request.file_handle, request.text()) {
        (Some(handle), _) => handle,
        (None, Some(raw)) => match FileHandle::parse(raw) {
            Ok(handle) => handle,
            Err(_) => return Envelope::failure(FAIL, "invalid file handle"),
        },
        (None, None) => return Envelope::failure(FAIL, "file handle required"),
    };

    match ctx.files.load(handle).await {
        Ok(data) => {
            debug!(user = %me.id, handle = %handle, size = data.len(), "File downloaded");
            let name = request
                .file_name
                .clone()
                .unwrap_or_else(|| handle.to_string());
            let mut reply = Envelope::new(Kind::FileData).with_file(name, data);
            reply.file_handle = Some(handle);
            reply
        }
        Err(ServerError::FileNotFound(_)) => Envelope::failure(FAIL, "file not found"),
        Err(e) => {
            error!(user = %me.id, handle = %handle, error = %e, "File download failed");
            Envelope::failure(FAIL, "file could not be read")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::testing::{FlakyStore, Harness};
    use std::sync::Arc;
    use std::time::Duration;

    fn identity(user: &User) -> Identity {
        Identity {
            id: user.id,
            username: user.username.clone(),
        }
    }

    fn named(kind: Kind, name: &str) -> Envelope {
        Envelope::new(kind).with_content(name)
    }

    async fn ask(harness: &Harness, me: &User, request: Envelope) -> Envelope {
        handle(&harness.ctx, &identity(me), request).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_contact_notifies_target() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        let bob = harness.add_user("bob").await;
        let mut bob_rx = harness.attach(&bob).await;

        let reply = ask(&harness, &alice, named(Kind::AddContact, "bob")).await;
        assert_eq!(reply.kind, Kind::AddContactOk);
        match reply.payload {
            Some(ListPayload::Users(users)) => {
                assert_eq!(users[0].username, "bob");
                assert_eq!(users[0].status, UserStatus::Online);
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        let notice = bob_rx.try_recv().unwrap();
        assert_eq!(notice.kind, Kind::NewChatRequest);
        assert_eq!(notice.sender_name.as_deref(), Some("alice"));

        let again = ask(&harness, &alice, named(Kind::AddContact, "bob")).await;
        assert_eq!(again.kind, Kind::AddContactFail);
    }

    #[tokio::test]
    async fn test_contact_failures() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;

        for (request, fail) in [
            (named(Kind::AddContact, "nobody"), Kind::AddContactFail),
            (named(Kind::AddContact, "alice"), Kind::AddContactFail),
            (Envelope::new(Kind::AddContact), Kind::AddContactFail),
            (named(Kind::RemoveContact, "nobody"), Kind::RemoveContactFail),
        ] {
            let reply = ask(&harness, &alice, request).await;
            assert_eq!(reply.kind, fail);
            assert!(reply.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_contacts_list_and_remove() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        harness.add_user("bob").await;

        ask(&harness, &alice, named(Kind::AddContact, "bob")).await;
        let list = ask(&harness, &alice, Envelope::new(Kind::GetContacts)).await;
        assert_eq!(list.kind, Kind::ListContacts);
        assert_eq!(list.payload.map(|p| p.len()), Some(1));

        let removed = ask(&harness, &alice, named(Kind::RemoveContact, "bob")).await;
        assert_eq!(removed.kind, Kind::RemoveContactOk);
        let again = ask(&harness, &alice, named(Kind::RemoveContact, "bob")).await;
        assert_eq!(again.kind, Kind::RemoveContactFail);
    }

    #[tokio::test]
    async fn test_search_excludes_self() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        harness.add_user("alicia").await;

        let reply = ask(&harness, &alice, named(Kind::SearchUsers, "ali")).await;
        assert_eq!(reply.kind, Kind::SearchResults);
        match reply.payload {
            Some(ListPayload::Users(users)) => {
                let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
                assert_eq!(names, vec!["alicia"]);
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        let empty = ask(&harness, &alice, named(Kind::SearchUsers, " ")).await;
        assert_eq!(empty.kind, Kind::SearchFail);
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        let bob = harness.add_user("bob").await;
        let mut bob_rx = harness.attach(&bob).await;

        let created = ask(&harness, &alice, named(Kind::CreateGroup, "team")).await;
        assert_eq!(created.kind, Kind::CreateGroupOk);
        let group = created.receiver_group().unwrap();

        let added = ask(
            &harness,
            &alice,
            named(Kind::AddGroupMember, "bob").for_group(group),
        )
        .await;
        assert_eq!(added.kind, Kind::AddGroupMemberOk);
        let notice = bob_rx.try_recv().unwrap();
        assert_eq!(notice.kind, Kind::GroupNotification);
        assert_eq!(notice.receiver_group(), Some(group));

        // bob is not an admin
        let denied = ask(
            &harness,
            &bob,
            named(Kind::RemoveGroupMember, "alice").for_group(group),
        )
        .await;
        assert_eq!(denied.kind, Kind::RemoveGroupMemberFail);

        // alice is the only admin and bob is still there
        let stuck = ask(&harness, &alice, Envelope::new(Kind::LeaveGroup).for_group(group)).await;
        assert_eq!(stuck.kind, Kind::LeaveGroupFail);
        assert_eq!(stuck.error.as_deref(), Some("last admin cannot leave"));

        let left = ask(&harness, &bob, Envelope::new(Kind::LeaveGroup).for_group(group)).await;
        assert_eq!(left.kind, Kind::LeaveGroupOk);

        let members = ask(
            &harness,
            &alice,
            Envelope::new(Kind::GetGroupMembers).for_group(group),
        )
        .await;
        assert_eq!(members.payload.map(|p| p.len()), Some(1));

        let alone = ask(&harness, &alice, Envelope::new(Kind::LeaveGroup).for_group(group)).await;
        assert_eq!(alone.kind, Kind::LeaveGroupOk);
    }

    #[tokio::test]
    async fn test_full_group_rejects_member() {
        let harness = Harness::new().await;
        let admin = harness.add_user("admin").await;
        let group = harness.ctx.store.create_group("full", admin.id).await.unwrap();
        for i in 1..MAX_GROUP_MEMBERS {
            let user = harness.add_user(&format!("member{i}")).await;
            harness
                .ctx
                .store
                .add_group_member(group.id, user.id, false)
                .await
                .unwrap();
        }
        harness.add_user("latecomer").await;

        let reply = ask(
            &harness,
            &admin,
            named(Kind::AddGroupMember, "latecomer").for_group(group.id),
        )
        .await;
        assert_eq!(reply.kind, Kind::AddGroupMemberFail);

        let members = harness.ctx.store.get_group_members(group.id).await.unwrap();
        assert_eq!(members.len(), MAX_GROUP_MEMBERS);
    }

    #[tokio::test]
    async fn test_concurrent_adds_cannot_overfill_group() {
        let store = Arc::new(FlakyStore::with_lookup_delay(Duration::from_millis(30)));
        let harness = Harness::with_store(ServerConfig::default(), store).await;
        let first_admin = harness.add_user("first").await;
        let second_admin = harness.add_user("second").await;
        let group = harness.ctx.store.create_group("almost full", first_admin.id).await.unwrap();
        harness
            .ctx
            .store
            .add_group_member(group.id, second_admin.id, true)
            .await
            .unwrap();
        for i in 2..MAX_GROUP_MEMBERS - 1 {
            let user = harness.add_user(&format!("member{i}")).await;
            harness
                .ctx
                .store
                .add_group_member(group.id, user.id, false)
                .await
                .unwrap();
        }
        assert_eq!(
            harness.ctx.store.get_group_members(group.id).await.unwrap().len(),
            MAX_GROUP_MEMBERS - 1
        );
        harness.add_user("carol").await;
        harness.add_user("dave").await;

        let (a, b) = tokio::join!(
            ask(
                &harness,
                &first_admin,
                named(Kind::AddGroupMember, "carol").for_group(group.id),
            ),
            ask(
                &harness,
                &second_admin,
                named(Kind::AddGroupMember, "dave").for_group(group.id),
            ),
        );

        let mut kinds = vec![a.kind, b.kind];
        kinds.sort_by_key(|k| *k == Kind::AddGroupMemberFail);
        assert_eq!(kinds, vec![Kind::AddGroupMemberOk, Kind::AddGroupMemberFail]);
        let refused = if a.kind == Kind::AddGroupMemberFail { a } else { b };
        assert!(refused.error.unwrap().contains("full"));

        let members = harness.ctx.store.get_group_members(group.id).await.unwrap();
        assert_eq!(members.len(), MAX_GROUP_MEMBERS);
    }

    #[tokio::test]
    async fn test_store_outage_yields_failure_replies() {
        let store = Arc::new(FlakyStore::default());
        let harness = Harness::with_store(ServerConfig::default(), store.clone()).await;
        let alice = harness.add_user("alice").await;
        harness.add_user("bob").await;

        store.set_broken(true);
        let contacts = ask(&harness, &alice, Envelope::new(Kind::GetContacts)).await;
        assert_eq!(contacts.kind, Kind::ListContactsFail);
        assert!(contacts.error.is_some());

        let added = ask(&harness, &alice, named(Kind::AddContact, "bob")).await;
        assert_eq!(added.kind, Kind::AddContactFail);
        assert_eq!(added.error.as_deref(), Some("request failed, try again later"));

        store.set_broken(false);
        let contacts = ask(&harness, &alice, Envelope::new(Kind::GetContacts)).await;
        assert_eq!(contacts.kind, Kind::ListContacts);
    }

    #[tokio::test]
    async fn test_remove_member_notifies_removed_user() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        let bob = harness.add_user("bob").await;
        let group = harness.ctx.store.create_group("team", alice.id).await.unwrap();
        harness
            .ctx
            .store
            .add_group_member(group.id, bob.id, false)
            .await
            .unwrap();
        let mut bob_rx = harness.attach(&bob).await;

        let reply = ask(
            &harness,
            &alice,
            named(Kind::RemoveGroupMember, "bob").for_group(group.id),
        )
        .await;
        assert_eq!(reply.kind, Kind::RemoveGroupMemberOk);
        assert_eq!(bob_rx.try_recv().unwrap().kind, Kind::GroupNotification);

        let outsider = ask(
            &harness,
            &bob,
            Envelope::new(Kind::GetHistory).for_group(group.id),
        )
        .await;
        assert_eq!(outsider.kind, Kind::HistoryFail);
    }

    #[tokio::test]
    async fn test_history_requires_conversation() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        let bob = harness.add_user("bob").await;

        let none = ask(&harness, &alice, Envelope::new(Kind::GetHistory)).await;
        assert_eq!(none.kind, Kind::HistoryFail);

        let direct = ask(&harness, &alice, Envelope::new(Kind::GetHistory).for_user(bob.id)).await;
        assert_eq!(direct.kind, Kind::HistoryResponse);
        assert_eq!(direct.receiver_user(), Some(bob.id));
        assert_eq!(direct.payload.map(|p| p.is_empty()), Some(true));
    }

    #[tokio::test]
    async fn test_download_file() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        let handle = harness.ctx.files.store(b"%PDF-1.7", "paper.pdf").await.unwrap();

        let mut request = Envelope::new(Kind::DownloadFile);
        request.file_handle = Some(handle);
        request.file_name = Some("paper.pdf".into());
        let reply = ask(&harness, &alice, request).await;
        assert_eq!(reply.kind, Kind::FileData);
        assert_eq!(reply.file_data.as_deref(), Some(&b"%PDF-1.7"[..]));
        assert_eq!(reply.file_name.as_deref(), Some("paper.pdf"));

        let missing = ask(
            &harness,
            &alice,
            named(Kind::DownloadFile, &FileHandle::new().to_string()),
        )
        .await;
        assert_eq!(missing.kind, Kind::DownloadFileFail);

        let garbage = ask(&harness, &alice, named(Kind::DownloadFile, "not-a-handle")).await;
        assert_eq!(garbage.kind, Kind::DownloadFileFail);
    }

    #[tokio::test]
    async fn test_server_kinds_are_dropped() {
        let harness = Harness::new().await;
        let alice = harness.add_user("alice").await;
        let me = identity(&alice);

        assert!(handle(&harness.ctx, &me, Envelope::new(Kind::LoginOk)).await.is_none());
        assert!(handle(&harness.ctx, &me, Envelope::new(Kind::ListGroups)).await.is_none());
    }
}
