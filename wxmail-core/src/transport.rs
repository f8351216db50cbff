//! Mail transport seam and the session state machine around it.
//!
//! A [`Session`] walks `Unauthenticated → Authenticated → Closed`; `Closed` is
//! terminal and any operation outside its state is `InvalidSessionState`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use lettre::address::Envelope as SmtpEnvelope;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config::Credentials;
use crate::error::TransportError;

/// SMTP-capable relay.
#[async_trait]
pub trait MailTransport: Send {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    async fn authenticate(&mut self, user: &str, secret: &str) -> Result<(), TransportError>;

    async fn send(&mut self, from: &str, to: &str, raw_message: &str) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Builds a fresh transport for each batch.
pub trait TransportFactory: Send + Sync {
    type Transport: MailTransport;

    fn create(&self) -> Self::Transport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        })
    }
}

/// Relay host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// One authenticated conversation with the relay.
#[derive(Debug)]
pub struct Session<T> {
    transport: T,
    state: SessionState,
}

impl<T: MailTransport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::Unauthenticated,
        }
    }

    /// Connects and logs in.
    pub async fn open(
        transport: T,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Self, TransportError> {
        let mut session = Self::new(transport);
        session.login(endpoint, credentials).await?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn login(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        self.expect_state("authenticate", SessionState::Unauthenticated)?;
        self.transport.connect(&endpoint.host, endpoint.port).await?;
        self.transport
            .authenticate(credentials.account(), credentials.secret())
            .await?;
        self.state = SessionState::Authenticated;
        tracing::debug!(
            host = %endpoint.host,
            port = endpoint.port,
            "transport session authenticated"
        );
        Ok(())
    }

    pub async fn send(
        &mut self,
        from: &str,
        to: &str,
        raw_message: &str,
    ) -> Result<(), TransportError> {
        self.expect_state("send", SessionState::Authenticated)?;
        self.transport.send(from, to, raw_message).await
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.state == SessionState::Closed {
            return Err(TransportError::InvalidSessionState {
                op: "close",
                state: self.state,
            });
        }
        self.state = SessionState::Closed;
        self.transport.close().await
    }

    /// Drops the connection and logs in again. Used after a cancelled send, which can leave the
    /// relay mid-message.
    pub async fn reopen(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        if self.state == SessionState::Closed {
            return Err(TransportError::InvalidSessionState {
                op: "reopen",
                state: self.state,
            });
        }
        if let Err(err) = self.transport.close().await {
            tracing::debug!(%err, "error dropping interrupted connection");
        }
        self.state = SessionState::Unauthenticated;
        self.login(endpoint, credentials).await
    }

    fn expect_state(&self, op: &'static str, expected: SessionState) -> Result<(), TransportError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransportError::InvalidSessionState {
                op,
                state: self.state,
            })
        }
    }
}

/// STARTTLS relay backed by lettre's pooled async transport.
///
/// The pool keeps the authenticated connection open between sends.
pub struct SmtpTransport {
    timeout: Duration,
    endpoint: Option<Endpoint>,
    inner: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            endpoint: None,
            inner: None,
        }
    }
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("timeout", &self.timeout)
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.inner.is_some())
            .finish()
    }
}

/// Hands out [`SmtpTransport`]s sharing one connection timeout.
#[derive(Debug, Clone, Copy)]
pub struct SmtpTransportFactory {
    pub timeout: Duration,
}

impl TransportFactory for SmtpTransportFactory {
    type Transport = SmtpTransport;

    fn create(&self) -> SmtpTransport {
        SmtpTransport::new(self.timeout)
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.endpoint = Some(Endpoint {
            host: host.to_string(),
            port,
        });
        Ok(())
    }

    async fn authenticate(&mut self, user: &str, secret: &str) -> Result<(), TransportError> {
        let endpoint = self.endpoint.clone().ok_or(TransportError::InvalidSessionState {
            op: "authenticate",
            state: SessionState::Unauthenticated,
        })?;
        let connect_err = |reason: String| TransportError::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
            reason,
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
            .map_err(|e| connect_err(e.to_string()))?
            .port(endpoint.port)
            .credentials(SmtpCredentials::new(user.to_string(), secret.to_string()))
            .timeout(Some(self.timeout))
            .build();

        // Opening a connection performs EHLO, STARTTLS and AUTH.
        match transport.test_connection().await {
            Ok(true) => {
                self.inner = Some(transport);
                Ok(())
            }
            Ok(false) => Err(connect_err("relay closed the connection".to_string())),
            Err(e) if e.is_permanent() => Err(TransportError::AuthRejected(e.to_string())),
            Err(e) => Err(connect_err(e.to_string())),
        }
    }

    async fn send(
        &mut self,
        from: &str,
        to: &str,
        raw_message: &str,
    ) -> Result<(), TransportError> {
        let transport = self.inner.as_ref().ok_or(TransportError::InvalidSessionState {
            op: "send",
            state: SessionState::Unauthenticated,
        })?;

        let from: Address = from
            .parse()
            .map_err(|e| TransportError::Rejected(format!("sender '{from}': {e}")))?;
        let to: Address = to
            .parse()
            .map_err(|e| TransportError::Rejected(format!("recipient '{to}': {e}")))?;
        let envelope = SmtpEnvelope::new(Some(from), vec![to])
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        transport
            .send_raw(&envelope, raw_message.as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the transport drops its pool, including a connection a cancelled send left
        // mid-message. A later login builds a fresh pool.
        self.inner = None;
        self.endpoint = None;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport that records what it was asked to send.

    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{MailTransport, TransportFactory};
    use crate::error::TransportError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMessage {
        pub from: String,
        pub to: String,
        pub raw: String,
    }

    #[derive(Debug, Default)]
    pub struct Journal {
        pub connects: usize,
        pub logins: usize,
        pub closes: usize,
        pub sent: Vec<SentMessage>,
        /// A send on the current connection never finished.
        pub interrupted: bool,
    }

    #[derive(Debug, Clone, Default)]
    pub struct RecordingTransport {
        pub journal: Arc<Mutex<Journal>>,
        pub reject_auth: bool,
        pub reject_to: HashSet<String>,
        pub slow_to: HashSet<String>,
        pub delay: Duration,
    }

    /// Every batch shares the same journal.
    impl TransportFactory for RecordingTransport {
        type Transport = RecordingTransport;

        fn create(&self) -> RecordingTransport {
            self.clone()
        }
    }

    impl RecordingTransport {
        pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
            self.journal.lock().expect("journal lock")
        }
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn connect(&mut self, _host: &str, _port: u16) -> Result<(), TransportError> {
            let mut journal = self.journal();
            journal.connects += 1;
            journal.interrupted = false;
            Ok(())
        }

        async fn authenticate(&mut self, _user: &str, _secret: &str) -> Result<(), TransportError> {
            if self.reject_auth {
                return Err(TransportError::AuthRejected("535 5.7.8 bad credentials".into()));
            }
            self.journal().logins += 1;
            Ok(())
        }

        async fn send(&mut self, from: &str, to: &str, raw: &str) -> Result<(), TransportError> {
            if self.journal().interrupted {
                // The relay is still reading the previous message.
                return Err(TransportError::Rejected("503 5.5.1 bad sequence of commands".into()));
            }
            if self.slow_to.contains(to) {
                self.journal().interrupted = true;
                tokio::time::sleep(self.delay).await;
                self.journal().interrupted = false;
            }
            if self.reject_to.contains(to) {
                return Err(TransportError::Rejected(format!("550 no such user {to}")));
            }
            self.journal().sent.push(SentMessage {
                from: from.to_string(),
                to: to.to_string(),
                raw: raw.to_string(),
            });
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            let mut journal = self.journal();
            journal.closes += 1;
            journal.interrupted = false;
            Ok(())
        }
    }
}
