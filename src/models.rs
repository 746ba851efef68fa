//! Data models for DAO Comms.
//!
//! This module defines messages, their stored JSON form, file attachments
//! and the compose draft.

use serde::{Deserialize, Serialize};

use crate::codec::{truncate_chars, Codec};
use crate::types::{DaoCommsError, Result};

/// Characters of encrypted content shown in a list preview.
pub const LIST_PREVIEW_CHARS: usize = 50;

/// Characters shown in the compose encryption preview.
pub const COMPOSE_PREVIEW_CHARS: usize = 100;

/// Metadata of an attached file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type.
    #[serde(rename = "type")]
    pub mime_type: String,
}

impl FileInfo {
    /// Creates file metadata.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }

    /// Size in kilobytes with two decimals, e.g. `"1.50 KB"`.
    pub fn size_label(&self) -> String {
        format!("{:.2} KB", self.size as f64 / 1024.0)
    }
}

/// A message body as stored under `message_<id>` on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Codec output.
    pub content: String,
    /// Unix seconds.
    pub timestamp: u64,
    /// Sender account.
    pub sender: String,
    /// Target DAO label.
    pub dao_name: String,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
}

/// A DAO message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Key under which the message is indexed.
    pub id: String,
    /// Encoded content, opaque until revealed.
    pub encrypted_content: String,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Sender's account address.
    pub sender: String,
    /// Free-text DAO label.
    pub dao_name: String,
    /// Whether the message carries a file.
    pub is_file: bool,
    /// Attachment metadata, for file messages.
    pub file_info: Option<FileInfo>,
}

impl Message {
    /// Creates a text message.
    pub fn new(
        id: impl Into<String>,
        encrypted_content: impl Into<String>,
        timestamp: u64,
        sender: impl Into<String>,
        dao_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            encrypted_content: encrypted_content.into(),
            timestamp,
            sender: sender.into(),
            dao_name: dao_name.into(),
            is_file: false,
            file_info: None,
        }
    }

    /// Attaches file metadata, marking the message as a file message.
    pub fn with_file(mut self, file_info: FileInfo) -> Self {
        self.is_file = true;
        self.file_info = Some(file_info);
        self
    }

    /// Builds a message from its stored record.
    pub fn from_record(id: impl Into<String>, record: MessageRecord) -> Self {
        Self {
            id: id.into(),
            encrypted_content: record.content,
            timestamp: record.timestamp,
            sender: record.sender,
            dao_name: record.dao_name,
            is_file: record.is_file,
            file_info: record.file_info,
        }
    }

    /// The stored form of this message (without its id).
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            content: self.encrypted_content.clone(),
            timestamp: self.timestamp,
            sender: self.sender.clone(),
            dao_name: self.dao_name.clone(),
            is_file: self.is_file,
            file_info: self.file_info.clone(),
        }
    }

    /// Sender shortened for display, e.g. `0x1234...abcd`.
    pub fn short_sender(&self) -> String {
        let chars: Vec<char> = self.sender.chars().collect();
        if chars.len() <= 10 {
            return self.sender.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }

    /// One-line preview for message lists.
    pub fn preview(&self) -> String {
        if self.is_file {
            return self.file_name().to_string();
        }
        format!(
            "{}...",
            truncate_chars(&self.encrypted_content, LIST_PREVIEW_CHARS)
        )
    }

    /// Attached file name, or a placeholder.
    pub fn file_name(&self) -> &str {
        self.file_info
            .as_ref()
            .map(|f| f.name.as_str())
            .unwrap_or("Encrypted File")
    }
}

/// Preview of how compose content will be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionPreview {
    /// Leading plaintext.
    pub original: String,
    /// Leading encoded token.
    pub encrypted: String,
}

/// A message being composed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeDraft {
    /// Target DAO label.
    pub dao_name: String,
    /// Text content (or the file label for attachments).
    pub content: String,
    /// Attached file, if any.
    pub attachment: Option<FileInfo>,
}

impl ComposeDraft {
    /// Creates a text draft.
    pub fn new(dao_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            dao_name: dao_name.into(),
            content: content.into(),
            attachment: None,
        }
    }

    /// Attaches a file. The content becomes a label describing it.
    pub fn attach_file(&mut self, file: FileInfo) {
        self.content = format!("File: {} ({})", file.name, file.size_label());
        self.attachment = Some(file);
    }

    /// Whether a file is attached.
    pub fn is_file(&self) -> bool {
        self.attachment.is_some()
    }

    /// Checks the fields required for submission.
    pub fn validate(&self) -> Result<()> {
        if self.dao_name.trim().is_empty() {
            return Err(DaoCommsError::Validation("DAO name is required".to_string()));
        }
        if self.content.is_empty() && !self.is_file() {
            return Err(DaoCommsError::Validation(
                "Message content or a file is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Shows the leading plaintext next to its encoded form.
    pub fn preview(&self, codec: &dyn Codec) -> Option<EncryptionPreview> {
        if self.content.is_empty() {
            return None;
        }
        let encrypted = codec.encode(&self.content);
        Some(EncryptionPreview {
            original: truncate_chars(&self.content, COMPOSE_PREVIEW_CHARS).to_string(),
            encrypted: format!("{}...", truncate_chars(&encrypted, COMPOSE_PREVIEW_CHARS)),
        })
    }

    /// Builds the message to append, encoding the content.
    pub fn to_message(&self, codec: &dyn Codec, sender: &str, timestamp: u64) -> Message {
        let message = Message::new(
            String::new(),
            codec.encode(&self.content),
            timestamp,
            sender,
            self.dao_name.clone(),
        );
        match &self.attachment {
            Some(file) => message.with_file(file.clone()),
            None => message,
        }
    }
}
