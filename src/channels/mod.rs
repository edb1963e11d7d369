//! Mail I/O seams: where messages come from and how they leave.

pub mod email_types;
pub mod imap;
pub mod smtp;

use async_trait::async_trait;

use crate::error::{MailboxError, SendError};

pub use email_types::{MessageFingerprint, PdfPart, RawMessage};
pub use imap::{ImapConfig, ImapMailbox};
pub use smtp::{SmtpConfig, SmtpMailTransport};

/// Source of unread messages.
#[async_trait]
pub trait Mailbox: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch every unseen message in one batch and mark them seen.
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, MailboxError>;
}

/// Outbound submission of a fully composed message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: lettre::Message) -> Result<(), SendError>;
}
