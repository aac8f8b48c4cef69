use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_sesv2::{
    config::Region,
    types::{Body, Content, Destination, EmailContent, Message},
    Client,
};
use tracing::debug;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letter {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Outbound mail. Synchronous from the caller's view and never retried here.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, letter: &Letter) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SesMailer {
    client: Client,
    from: String,
}

impl SesMailer {
    pub async fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let mut loader =
            defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        Ok(Self {
            client: Client::new(&shared),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, letter: &Letter) -> anyhow::Result<()> {
        if letter.to.is_empty() {
            anyhow::bail!("must specify at least one recipient");
        }

        let subject = Content::builder()
            .data(&letter.subject)
            .charset("UTF-8")
            .build()
            .context("build mail subject")?;
        let text = Content::builder()
            .data(&letter.body)
            .charset("UTF-8")
            .build()
            .context("build mail body")?;
        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().text(text).build())
            .build();

        let output = self
            .client
            .send_email()
            .from_email_address(&self.from)
            .destination(
                Destination::builder()
                    .set_to_addresses(Some(letter.to.clone()))
                    .build(),
            )
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .context("ses send_email")?;

        debug!(
            from = %self.from,
            to = %letter.to.join(","),
            message_id = ?output.message_id(),
            "sent email"
        );
        Ok(())
    }
}
