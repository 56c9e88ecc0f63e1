//! The unit of work handed from an adapter to the reconciler.

use crate::models::{Artifact, Attachment, Conversation, FileEdit, Message, ToolCall};

/// Every canonical record produced by one adapter invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationResult {
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub attachments: Vec<Attachment>,
    pub artifacts: Vec<Artifact>,
    pub file_edits: Vec<FileEdit>,
}

/// Record counts for one result, used in sync reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub conversations: usize,
    pub messages: usize,
    pub tool_calls: usize,
    pub attachments: usize,
    pub artifacts: usize,
    pub file_edits: usize,
}

impl RecordCounts {
    pub fn total(&self) -> usize {
        self.conversations
            + self.messages
            + self.tool_calls
            + self.attachments
            + self.artifacts
            + self.file_edits
    }

    pub fn add(&mut self, other: &RecordCounts) {
        self.conversations += other.conversations;
        self.messages += other.messages;
        self.tool_calls += other.tool_calls;
        self.attachments += other.attachments;
        self.artifacts += other.artifacts;
        self.file_edits += other.file_edits;
    }
}

impl std::fmt::Display for RecordCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} convs, {} msgs, {} tools, {} attachs, {} artifacts, {} edits",
            self.conversations,
            self.messages,
            self.tool_calls,
            self.attachments,
            self.artifacts,
            self.file_edits
        )
    }
}

impl NormalizationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    pub fn counts(&self) -> RecordCounts {
        RecordCounts {
            conversations: self.conversations.len(),
            messages: self.messages.len(),
            tool_calls: self.tool_calls.len(),
            attachments: self.attachments.len(),
            artifacts: self.artifacts.len(),
            file_edits: self.file_edits.len(),
        }
    }

    /// Append another result, e.g. several sessions from one directory.
    pub fn extend(&mut self, other: NormalizationResult) {
        self.conversations.extend(other.conversations);
        self.messages.extend(other.messages);
        self.tool_calls.extend(other.tool_calls);
        self.attachments.extend(other.attachments);
        self.artifacts.extend(other.artifacts);
        self.file_edits.extend(other.file_edits);
    }
}
