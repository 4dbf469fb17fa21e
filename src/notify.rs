use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use ulid::Ulid;

/// One outgoing reminder: recipient, subject and plain-text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub appointment_id: Ulid,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
pub enum NotifyError {
    Address(String),
    Build(String),
    Transport(String),
    Io(std::io::Error),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Address(e) => write!(f, "invalid email address: {e}"),
            NotifyError::Build(e) => write!(f, "could not build message: {e}"),
            NotifyError::Transport(e) => write!(f, "SMTP transport error: {e}"),
            NotifyError::Io(e) => write!(f, "outbox write failed: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<std::io::Error> for NotifyError {
    fn from(e: std::io::Error) -> Self {
        NotifyError::Io(e)
    }
}

/// Delivery channel for reminders. Transport details stay behind this trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), NotifyError>;
}

// ── SMTP ─────────────────────────────────────────────────────────

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_FROM_ADDRESS: &str = "noreply@slotwise.local";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Sends reminders as plain-text mail over a STARTTLS relay.
pub struct EmailNotifier {
    config: SmtpConfig,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        use lettre::message::header::ContentType;
        use lettre::message::Mailbox;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Address(e.to_string()))?;
        let to: Mailbox = reminder
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Address(e.to_string()))?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(reminder.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(reminder.body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .port(self.config.port);
        if let (Some(user), Some(pass)) = (&self.config.user, &self.config.password) {
            transport = transport.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport
            .build()
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        tracing::debug!("reminder for {} mailed to {}", reminder.appointment_id, reminder.to);
        Ok(())
    }
}

// ── Outbox file ──────────────────────────────────────────────────

/// Appends each reminder as one JSON line. Used when no SMTP relay is
/// configured; an external mailer can tail the file.
pub struct OutboxNotifier {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OutboxNotifier {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        let mut line = serde_json::to_string(reminder)
            .map_err(|e| NotifyError::Build(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(to: &str) -> Reminder {
        Reminder {
            appointment_id: Ulid::new(),
            to: to.into(),
            subject: "Appointment Reminder - Monday, January 1, 2024".into(),
            body: "Hello".into(),
        }
    }

    #[tokio::test]
    async fn outbox_appends_json_lines() {
        let dir = std::env::temp_dir().join("slotwise_test_notify");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("outbox_{}.jsonl", Ulid::new()));
        let outbox = OutboxNotifier::new(path.clone());

        let first = reminder("alice@example.com");
        let second = reminder("bob@example.com");
        outbox.deliver(&first).await.unwrap();
        outbox.deliver(&second).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Reminder> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![first, second]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn outbox_in_missing_directory_fails() {
        let path = std::env::temp_dir()
            .join(format!("slotwise_missing_{}", Ulid::new()))
            .join("outbox.jsonl");
        let err = OutboxNotifier::new(path)
            .deliver(&reminder("alice@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Io(_)));
    }

    #[tokio::test]
    async fn email_rejects_bad_recipient_before_connecting() {
        let notifier = EmailNotifier::new(SmtpConfig {
            host: "localhost".into(),
            port: DEFAULT_SMTP_PORT,
            from: DEFAULT_FROM_ADDRESS.into(),
            user: None,
            password: None,
        });
        let err = notifier.deliver(&reminder("not-an-email")).await.unwrap_err();
        assert!(matches!(err, NotifyError::Address(_)));
        assert!(err.to_string().contains("invalid email address"));
    }
}
