use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Email delivery failed: {0}")]
    Delivery(String),
    #[error("Invalid message: {0}")]
    Message(String),
}

/// Outbound delivery seam for onboarding secrets. Failures here never
/// roll back a state transition that already committed; callers log and
/// move on, and the retry path is a resend.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver the email-verification link for a fresh invite.
    async fn send_verification_link(
        &self,
        to_email: &str,
        token: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), NotifyError>;

    /// Deliver a one-time sign-in code.
    async fn send_two_factor_code(
        &self,
        to_email: &str,
        code: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
    base_url: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig, base_url: &str) -> Result<Self, NotifyError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| NotifyError::Message(e.to_string()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| NotifyError::Message(e.to_string()))?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| NotifyError::Message(e.to_string()))?;

        // Send on the blocking pool to keep the async runtime free.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        match result {
            Ok(_) => {
                tracing::info!(
                    to = %to_email,
                    subject = %subject,
                    "Email sent successfully"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e.to_string(),
                    to = %to_email,
                    "Failed to send email"
                );
                Err(NotifyError::Delivery(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for SmtpNotifier {
    async fn send_verification_link(
        &self,
        to_email: &str,
        token: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let verification_link = format!("{}/verify-email?token={}", self.base_url, token);
        let expires = expires_utc.format("%Y-%m-%d %H:%M UTC");

        let html_body = format!(
            r###"            <html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>You have been invited</h2>
                    <p>An administrator invited you to the workspace. Click the link below to verify your email address and choose a password:</p>
                    <p>
                        <a href="{}" style="background-color: #4CAF50; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                            Verify Email
                        </a>
                    </p>
                    <p style="color: #666; font-size: 12px;">
                        This link expires on {}. If you weren't expecting this invitation, please ignore this email.
                    </p>
                </body>
            </html>
            "###,
            verification_link, expires
        );

        let plain_body = format!(
            "You have been invited\n\n            An administrator invited you to the workspace. Please visit the following link to verify your email address and choose a password:\n\n            {}

            This link expires on {}. If you weren't expecting this invitation, please ignore this email.",
            verification_link, expires
        );

        self.send_email(to_email, "You're invited - verify your email", &plain_body, &html_body)
            .await
    }

    async fn send_two_factor_code(
        &self,
        to_email: &str,
        code: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let expires = expires_utc.format("%H:%M UTC");

        let html_body = format!(
            r###"            <html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>Your sign-in code</h2>
                    <p style="font-size: 28px; letter-spacing: 6px; font-weight: bold;">{}</p>
                    <p style="color: #666; font-size: 12px;">
                        This code expires at {} and can be used once. If you didn't request it, please ignore this email.
                    </p>
                </body>
            </html>
            "###,
            code, expires
        );

        let plain_body = format!(
            "Your sign-in code: {}

            This code expires at {} and can be used once. If you didn't request it, please ignore this email.",
            code, expires
        );

        self.send_email(to_email, "Your sign-in code", &plain_body, &html_body)
            .await
    }
}

/// What a dispatcher was asked to deliver. Carries the plaintext secret
/// so tests can drive the flow end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    VerificationLink { email: String, token: String },
    TwoFactorCode { email: String, code: String },
}

/// Captures notifications instead of delivering them. Backs the test
/// suite and SMTP-less local development.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        RecordingNotifier::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier lock poisoned").clone()
    }

    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.sent()
            .iter()
            .rev()
            .find_map(|notification| match notification {
                Notification::VerificationLink { email: to, token } if to == email => {
                    Some(token.clone())
                }
                _ => None,
            })
    }

    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent()
            .iter()
            .rev()
            .find_map(|notification| match notification {
                Notification::TwoFactorCode { email: to, code } if to == email => Some(code.clone()),
                _ => None,
            })
    }

    fn record(&self, notification: Notification) {
        self.sent
            .lock()
            .expect("notifier lock poisoned")
            .push(notification);
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send_verification_link(
        &self,
        to_email: &str,
        token: &str,
        _expires_utc: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.record(Notification::VerificationLink {
            email: to_email.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }

    async fn send_two_factor_code(
        &self,
        to_email: &str,
        code: &str,
        _expires_utc: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.record(Notification::TwoFactorCode {
            email: to_email.to_string(),
            code: code.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_notifier_creation() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "notifier@example.com".to_string(),
            password: "app_password".to_string(),
            from_email: "no-reply@example.com".to_string(),
        };

        let notifier = SmtpNotifier::new(&config, "https://backoffice.example.com/");
        assert!(notifier.is_ok());
        assert_eq!(notifier.unwrap().base_url, "https://backoffice.example.com");
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_latest_per_email() {
        let notifier = RecordingNotifier::new();
        notifier
            .send_two_factor_code("bob@x.com", "111111", Utc::now())
            .await
            .unwrap();
        notifier
            .send_two_factor_code("bob@x.com", "222222", Utc::now())
            .await
            .unwrap();
        notifier
            .send_verification_link("carol@x.com", "tok", Utc::now())
            .await
            .unwrap();

        assert_eq!(notifier.last_code_for("bob@x.com").as_deref(), Some("222222"));
        assert_eq!(notifier.last_token_for("carol@x.com").as_deref(), Some("tok"));
        assert_eq!(notifier.last_token_for("bob@x.com"), None);
        assert_eq!(notifier.sent().len(), 3);
    }
}
