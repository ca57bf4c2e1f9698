use serde::{Deserialize, Serialize};

use crate::types::{
    FileHandle, GroupMember, GroupSummary, HistoryEntry, MessageId, UserId, UserSummary,
};

/// Every operation that can travel over a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    // Authentication
    Login,
    Register,
    Verify2fa,
    Require2fa,
    LoginOk,
    LoginFail,
    RegisterFail,
    Logout,

    // Chat
    TextMessage,
    FileMessage,
    MessageDelivered,
    UpdateMessageStatus,
    NewChatRequest,
    DownloadFile,
    FileData,
    DownloadFileFail,

    // Contacts and search
    GetContacts,
    ListContacts,
    ListContactsFail,
    AddContact,
    AddContactOk,
    AddContactFail,
    RemoveContact,
    RemoveContactOk,
    RemoveContactFail,
    SearchUsers,
    SearchResults,
    SearchFail,

    // History
    GetHistory,
    HistoryResponse,
    HistoryFail,

    // Groups
    GetGroups,
    ListGroups,
    ListGroupsFail,
    GetGroupMembers,
    ListGroupMembers,
    ListGroupMembersFail,
    CreateGroup,
    CreateGroupOk,
    CreateGroupFail,
    AddGroupMember,
    AddGroupMemberOk,
    AddGroupMemberFail,
    RemoveGroupMember,
    RemoveGroupMemberOk,
    RemoveGroupMemberFail,
    LeaveGroup,
    LeaveGroupOk,
    LeaveGroupFail,
    GroupNotification,

    Error,
}

impl Kind {
    /// Kinds a connection accepts before it has completed 2FA.
    pub fn is_pre_auth(self) -> bool {
        matches!(self, Kind::Login | Kind::Register | Kind::Verify2fa)
    }

    /// Chat kinds that are persisted and routed to other connections.
    pub fn is_chat(self) -> bool {
        matches!(self, Kind::TextMessage | Kind::FileMessage)
    }

    pub fn is_receipt(self) -> bool {
        matches!(self, Kind::MessageDelivered | Kind::UpdateMessageStatus)
    }
}

/// List-shaped payloads carried by response envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListPayload {
    Users(Vec<UserSummary>),
    History(Vec<HistoryEntry>),
    Groups(Vec<GroupSummary>),
    Members(Vec<GroupMember>),
}

impl ListPayload {
    pub fn len(&self) -> usize {
        match self {
            ListPayload::Users(v) => v.len(),
            ListPayload::History(v) => v.len(),
            ListPayload::Groups(v) => v.len(),
            ListPayload::Members(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One protocol frame.
///
/// Only `kind` is mandatory. Which of the optional fields are meaningful is
/// determined by the kind: text content, a file reference, or a list payload,
/// never more than one of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: Kind,
    pub sender_id: Option<UserId>,
    pub sender_name: Option<String>,
    /// User id for direct traffic, group id when `is_group` is set.
    pub receiver_id: Option<i64>,
    pub receiver_name: Option<String>,
    pub is_group: bool,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub file_data: Option<Vec<u8>>,
    pub file_handle: Option<FileHandle>,
    pub message_id: Option<MessageId>,
    pub delivered: bool,
    pub read: bool,
    pub payload: Option<ListPayload>,
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            sender_id: None,
            sender_name: None,
            receiver_id: None,
            receiver_name: None,
            is_group: false,
            content: None,
            file_name: None,
            file_data: None,
            file_handle: None,
            message_id: None,
            delivered: false,
            read: false,
            payload: None,
            error: None,
        }
    }

    /// A failure reply carrying a human-readable reason.
    pub fn failure(kind: Kind, reason: impl Into<String>) -> Self {
        Self::new(kind).with_error(reason)
    }

    /// An `ERROR` frame. The reason travels as both content and error text.
    pub fn error_notice(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(Kind::Error).with_content(reason.clone()).with_error(reason)
    }

    pub fn with_sender(mut self, id: UserId, name: impl Into<String>) -> Self {
        self.sender_id = Some(id);
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn for_user(mut self, id: UserId) -> Self {
        self.receiver_id = Some(id.0);
        self.is_group = false;
        self
    }

    pub fn for_group(mut self, id: crate::types::GroupId) -> Self {
        self.receiver_id = Some(id.0);
        self.is_group = true;
        self
    }

    pub fn with_receiver_name(mut self, name: impl Into<String>) -> Self {
        self.receiver_name = Some(name.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.file_name = Some(name.into());
        self.file_data = Some(data);
        self
    }

    pub fn with_file_handle(mut self, name: impl Into<String>, handle: FileHandle) -> Self {
        self.file_name = Some(name.into());
        self.file_handle = Some(handle);
        self
    }

    pub fn with_message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn with_flags(mut self, delivered: bool, read: bool) -> Self {
        self.delivered = delivered;
        self.read = read;
        self
    }

    pub fn with_payload(mut self, payload: ListPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error = Some(reason.into());
        self
    }

    /// Receiver as a user id, for direct traffic.
    pub fn receiver_user(&self) -> Option<UserId> {
        match (self.receiver_id, self.is_group) {
            (Some(id), false) => Some(UserId(id)),
            _ => None,
        }
    }

    /// Receiver as a group id, for group traffic.
    pub fn receiver_group(&self) -> Option<crate::types::GroupId> {
        match (self.receiver_id, self.is_group) {
            (Some(id), true) => Some(crate::types::GroupId(id)),
            _ => None,
        }
    }

    /// Trimmed, non-empty text content.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
