//! Outbound alert mail.
//!
//! Each drained alert is rendered into an HTML message and delivered over
//! SMTP with at most five attempts, pausing five seconds between them.
//! Delivery runs in detached tasks so a slow mail server never blocks a
//! refresh. When no mailer host is configured the whole path is a no-op.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::RwLock;
use tracing::error;

use crate::alerts::Alert;
use crate::config::MailerConfig;
use crate::error::{ArgusError, ArgusResult};

/// Maximum delivery attempts per alert.
const MAX_ATTEMPTS: usize = 5;
/// Pause between attempts.
const RETRY_PAUSE: Duration = Duration::from_secs(5);

const DEFAULT_TEMPLATE: &str = include_str!("../templates/alert.html");

/// Transport seam; the SMTP implementation is swapped for a counting stub in
/// tests.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, to: &[String], subject: &str, html_body: String) -> ArgusResult<()>;
}

struct SmtpTransport {
    settings: MailerConfig,
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, to: &[String], subject: &str, html_body: String) -> ArgusResult<()> {
        let mut builder = Message::builder()
            .from(self.settings.from.parse().map_err(|err| ArgusError::Mail {
                message: format!("invalid from address '{}': {}", self.settings.from, err),
            })?)
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for recipient in to {
            builder = builder.to(recipient.parse().map_err(|err| ArgusError::Mail {
                message: format!("invalid recipient '{}': {}", recipient, err),
            })?);
        }
        let message = builder.body(html_body).map_err(|err| ArgusError::Mail {
            message: format!("failed to build message: {}", err),
        })?;

        let mut transport =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.settings.host).map_err(|err| {
                ArgusError::Mail {
                    message: format!("invalid mail host '{}': {}", self.settings.host, err),
                }
            })?;
        transport = transport.port(self.settings.port);
        if !self.settings.user.is_empty() {
            transport = transport.credentials(Credentials::new(
                self.settings.user.clone(),
                self.settings.password.clone(),
            ));
        }
        if self.settings.accept_invalid_cert {
            let tls = TlsParameters::builder(self.settings.host.clone())
                .dangerous_accept_invalid_certs(true)
                .build()
                .map_err(|err| ArgusError::Mail {
                    message: format!("tls setup failed: {}", err),
                })?;
            transport = transport.tls(Tls::Required(tls));
        }

        transport
            .build()
            .send(message)
            .await
            .map(|_| ())
            .map_err(|err| ArgusError::Mail {
                message: err.to_string(),
            })
    }
}

/// Renders alert messages and delivers them with bounded retry.
pub struct Mailer {
    settings: MailerConfig,
    recipients: RwLock<Vec<String>>,
    transport: Arc<dyn MailTransport>,
}

impl Mailer {
    pub fn new(settings: MailerConfig) -> Arc<Mailer> {
        let transport = Arc::new(SmtpTransport {
            settings: settings.clone(),
        });
        Self::with_transport(settings, transport)
    }

    pub fn with_transport(settings: MailerConfig, transport: Arc<dyn MailTransport>) -> Arc<Mailer> {
        Arc::new(Mailer {
            recipients: RwLock::new(settings.send_to.clone()),
            settings,
            transport,
        })
    }

    /// Mail is only sent when a host is configured.
    pub fn is_configured(&self) -> bool {
        !self.settings.host.is_empty()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.recipients.read().clone()
    }

    pub fn add_recipients(&self, addresses: Vec<String>) {
        let mut recipients = self.recipients.write();
        for address in addresses {
            if !recipients.contains(&address) {
                recipients.push(address);
            }
        }
    }

    pub fn remove_recipients(&self, addresses: &[String]) {
        self.recipients
            .write()
            .retain(|existing| !addresses.contains(existing));
    }

    /// Render and deliver one alert. At most [`MAX_ATTEMPTS`] tries; returns
    /// after the first success.
    pub async fn send_alert(&self, cluster_name: &str, alert: &Alert) -> ArgusResult<()> {
        if !self.is_configured() {
            return Ok(());
        }
        let recipients = self.recipients();
        if recipients.is_empty() {
            return Ok(());
        }

        let subject = format!("Alert: {}", alert.desc);
        let body = self.render(cluster_name, alert);

        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .transport
                .deliver(&recipients, &subject, body.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => {
                    error!(attempt, error = %err, "failed to send notification mail");
                    last_err = Some(err);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ArgusError::Mail {
            message: "delivery failed".into(),
        }))
    }

    fn render(&self, cluster_name: &str, alert: &Alert) -> String {
        let template = if self.settings.template_path.is_empty() {
            DEFAULT_TEMPLATE.to_owned()
        } else {
            std::fs::read_to_string(&self.settings.template_path)
                .unwrap_or_else(|_| DEFAULT_TEMPLATE.to_owned())
        };

        let status_markup = format!(
            "<font color='{}'><strong>{}</strong></font>",
            alert.status.as_str(),
            alert.status.as_str().to_uppercase()
        );

        template
            .replace("{{Title}}", "Alert")
            .replace("{{Cluster}}", cluster_name)
            .replace("{{Node}}", &alert.node_address)
            .replace("{{Status}}", &status_markup)
            .replace("{{Message}}", &alert.desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertStatus;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyTransport {
        calls: AtomicUsize,
        succeed_on: usize,
    }

    #[async_trait]
    impl MailTransport for FlakyTransport {
        async fn deliver(&self, _to: &[String], _subject: &str, _body: String) -> ArgusResult<()> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= self.succeed_on {
                Ok(())
            } else {
                Err(ArgusError::Mail {
                    message: "connection reset".into(),
                })
            }
        }
    }

    fn alert() -> Alert {
        Alert {
            id: 1,
            at: Utc::now(),
            cluster_id: "c1".into(),
            node_address: "10.0.0.1:3000".into(),
            status: AlertStatus::Red,
            desc: "Node 10.0.0.1:3000 is down".into(),
        }
    }

    fn settings() -> MailerConfig {
        MailerConfig {
            host: "smtp.example.com".into(),
            send_to: vec!["oncall@example.com".into()],
            ..MailerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_first_success() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicUsize::new(0),
            succeed_on: 3,
        });
        let mailer = Mailer::with_transport(settings(), transport.clone());

        mailer.send_alert("prod", &alert()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_attempts() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicUsize::new(0),
            succeed_on: usize::MAX,
        });
        let mailer = Mailer::with_transport(settings(), transport.clone());

        assert!(mailer.send_alert("prod", &alert()).await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unconfigured_mailer_is_a_noop() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicUsize::new(0),
            succeed_on: 1,
        });
        let mailer = Mailer::with_transport(MailerConfig::default(), transport.clone());

        mailer.send_alert("prod", &alert()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn render_substitutes_fields() {
        let mailer = Mailer::with_transport(
            settings(),
            Arc::new(FlakyTransport {
                calls: AtomicUsize::new(0),
                succeed_on: 1,
            }),
        );
        let body = mailer.render("prod", &alert());
        assert!(body.contains("prod"));
        assert!(body.contains("10.0.0.1:3000"));
        assert!(body.contains("RED"));
        assert!(!body.contains("{{"));
    }
}
