//! Multi-recipient delivery over one transport session per batch.
//!
//! Recipients are prepared concurrently (bounded by `concurrency`) while sends
//! on the shared session go through a mutex, one at a time. Results come back in
//! recipient order. Per-recipient problems become `Failed` results; only
//! session-level failures abort the batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt, stream};
use tokio::sync::Mutex;

use crate::config::{Credentials, SmtpConfig};
use crate::error::{DeliveryFailure, DispatchError, TransportError};
use crate::gateway::{Carrier, GatewayDirectory};
use crate::message::{format_for_email, format_for_sms, truncate_sms};
use crate::model::{BatchReport, Channel, DeliveryOutcome, DeliveryResult, Recipient};
use crate::recipients::{is_email_address, normalize_phone};
use crate::transport::{Endpoint, Session, SmtpTransportFactory, TransportFactory};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub send_timeout: Duration,
    pub concurrency: usize,
    pub sms_max_chars: Option<usize>,
}

impl DispatchSettings {
    pub fn from_config(smtp: &SmtpConfig, credentials: Credentials) -> Self {
        Self {
            endpoint: smtp.endpoint(),
            credentials,
            send_timeout: smtp.send_timeout(),
            concurrency: smtp.concurrency,
            sms_max_chars: smtp.sms_max_chars,
        }
    }
}

/// Report text plus the subject used for email recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedReport {
    pub subject: String,
    pub body: String,
}

pub struct DeliveryDispatcher<F> {
    factory: F,
    gateways: Arc<GatewayDirectory>,
    settings: DispatchSettings,
}

impl DeliveryDispatcher<SmtpTransportFactory> {
    /// Dispatcher sending through the configured SMTP relay.
    pub fn smtp(gateways: Arc<GatewayDirectory>, settings: DispatchSettings) -> Self {
        let factory = SmtpTransportFactory {
            timeout: settings.send_timeout,
        };
        Self::new(factory, gateways, settings)
    }
}

impl<F: TransportFactory> DeliveryDispatcher<F> {
    pub fn new(factory: F, gateways: Arc<GatewayDirectory>, settings: DispatchSettings) -> Self {
        Self {
            factory,
            gateways,
            settings,
        }
    }

    pub fn gateways(&self) -> &GatewayDirectory {
        &self.gateways
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn resolve_sms_address(
        &self,
        phone_digits: &str,
        carrier: &Carrier,
    ) -> Result<String, DeliveryFailure> {
        self.gateways.resolve_sms_address(phone_digits, carrier)
    }

    /// Sends one email in its own session.
    pub async fn dispatch_email(
        &self,
        sender: &str,
        recipient: &Recipient,
        subject: &str,
        body: &str,
    ) -> Result<DeliveryResult, DispatchError> {
        let report = ComposedReport {
            subject: subject.to_string(),
            body: body.to_string(),
        };
        let batch = self
            .deliver([recipient], sender, &report, Some(Channel::Email))
            .await?;
        batch
            .results
            .into_iter()
            .next()
            .ok_or_else(|| {
                DispatchError::InvalidSessionState("email batch produced no result".into())
            })
    }

    /// Texts every recipient through one authenticated session.
    pub async fn dispatch_batch_sms(
        &self,
        sender: &str,
        recipients: &BTreeMap<String, Recipient>,
        body: &str,
    ) -> Result<BatchReport, DispatchError> {
        let report = ComposedReport {
            subject: String::new(),
            body: body.to_string(),
        };
        self.deliver(recipients.values(), sender, &report, Some(Channel::Sms))
            .await
    }

    /// Sends to every recipient on its own channel.
    pub async fn dispatch_to_all<'a, I>(
        &self,
        sender: &str,
        recipients: I,
        report: &ComposedReport,
    ) -> Result<BatchReport, DispatchError>
    where
        I: IntoIterator<Item = &'a Recipient>,
    {
        self.deliver(recipients, sender, report, None).await
    }

    async fn deliver<'a, I>(
        &self,
        recipients: I,
        sender: &str,
        report: &ComposedReport,
        only: Option<Channel>,
    ) -> Result<BatchReport, DispatchError>
    where
        I: IntoIterator<Item = &'a Recipient>,
    {
        let recipients: Vec<&Recipient> = recipients.into_iter().collect();
        if recipients.is_empty() {
            return Ok(BatchReport::default());
        }

        tracing::info!(
            recipients = recipients.len(),
            host = %self.settings.endpoint.host,
            "dispatching batch"
        );

        let session = Session::open(
            self.factory.create(),
            &self.settings.endpoint,
            &self.settings.credentials,
        )
        .await
        .map_err(|err| {
            tracing::error!(%err, "could not open transport session");
            DispatchError::from(err)
        })?;
        let session = Mutex::new(session);

        let outcome: Result<Vec<DeliveryResult>, DispatchError> = stream::iter(recipients)
            .map(|recipient| self.deliver_one(&session, sender, recipient, report, only))
            .buffered(self.settings.concurrency.max(1))
            .try_collect()
            .await;

        let mut session = session.into_inner();
        if let Err(err) = session.close().await {
            tracing::warn!(%err, "failed to close transport session");
        }

        let batch = BatchReport { results: outcome? };
        tracing::info!(
            sent = batch.sent().count(),
            failed = batch.failed().count(),
            "batch finished"
        );
        Ok(batch)
    }

    async fn deliver_one(
        &self,
        session: &Mutex<Session<F::Transport>>,
        sender: &str,
        recipient: &Recipient,
        report: &ComposedReport,
        only: Option<Channel>,
    ) -> Result<DeliveryResult, DispatchError> {
        let result = |address: Option<String>, outcome| DeliveryResult {
            recipient: recipient.name.clone(),
            channel: recipient.channel,
            address,
            outcome,
        };

        let (address, raw) = match self.prepare(sender, recipient, report, only) {
            Ok(prepared) => prepared,
            Err(failure) => {
                tracing::warn!(recipient = %recipient.name, %failure, "recipient skipped");
                return Ok(result(None, DeliveryOutcome::Failed(failure)));
            }
        };

        let sent = {
            let mut session = session.lock().await;
            let sent = tokio::time::timeout(
                self.settings.send_timeout,
                session.send(sender, &address, &raw),
            )
            .await;
            if sent.is_err() {
                // The cancelled send may have left the connection mid-message.
                tracing::debug!(recipient = %recipient.name, "reopening session after timeout");
                session
                    .reopen(&self.settings.endpoint, &self.settings.credentials)
                    .await?;
            }
            sent
        };

        let outcome = match sent {
            Ok(Ok(())) => {
                tracing::debug!(recipient = %recipient.name, %address, "sent");
                DeliveryOutcome::Sent
            }
            Ok(Err(TransportError::Rejected(reason))) => {
                tracing::warn!(recipient = %recipient.name, %address, %reason, "send rejected");
                DeliveryOutcome::Failed(DeliveryFailure::Rejected(reason))
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                tracing::warn!(recipient = %recipient.name, %address, "send timed out");
                DeliveryOutcome::Failed(DeliveryFailure::Timeout(self.settings.send_timeout))
            }
        };

        Ok(result(Some(address), outcome))
    }

    /// Destination address and wire payload for one recipient.
    fn prepare(
        &self,
        sender: &str,
        recipient: &Recipient,
        report: &ComposedReport,
        only: Option<Channel>,
    ) -> Result<(String, String), DeliveryFailure> {
        if let Some(expected) = only.filter(|c| *c != recipient.channel) {
            return Err(DeliveryFailure::Invalid(format!(
                "'{}' is an {} recipient, expected {expected}",
                recipient.name, recipient.channel
            )));
        }

        match recipient.channel {
            Channel::Email => {
                let address = recipient.address.trim();
                if !is_email_address(address) {
                    return Err(DeliveryFailure::Invalid(format!(
                        "'{address}' is not an email address"
                    )));
                }
                let envelope = format_for_email(sender, address, &report.subject, &report.body);
                Ok((address.to_string(), envelope.to_raw()))
            }
            Channel::Sms => {
                let carrier = recipient
                    .carrier
                    .as_ref()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        DeliveryFailure::Invalid("SMS recipient has no carrier".into())
                    })?;
                let phone = normalize_phone(&recipient.address).ok_or_else(|| {
                    let address = &recipient.address;
                    DeliveryFailure::Invalid(format!("'{address}' is not a phone number"))
                })?;
                let address = self.resolve_sms_address(&phone, carrier)?;

                // Gateway length cap.
                let body = format_for_sms(&report.body);
                let body = match self.settings.sms_max_chars {
                    Some(max) => truncate_sms(&body, max),
                    None => body,
                };
                Ok((address, body))
            }
        }
    }
}
