//! The ChipGateway protocol state machine
//!
//! A run starts with `HelloRequest`, then requests commands with `GetCommand` and answers
//! every command until the server sends `Terminate`:
//!
//! ```text
//! Init -> HelloSent -> AwaitingCommand <-> Dispatching
//!                            |
//!                            v
//!                        Terminated
//! ```
//!
//! Cleanup runs whatever the outcome: cached PINs are cleared, the connection is closed,
//! every slot connected during the run is disconnected and pending notices are shown.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::card::CardService;
use crate::challenge::{Challenge, ChallengeValidator, TrustStore};
use crate::codec;
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::handlers::{HandlerContext, Stopped};
use crate::messages::{
    Command, GetCommand, HelloRequest, HelloResponse, Reply, ResultCode, SlotHandle, Terminate,
};
use crate::pin::PinUnwrapper;
use crate::session::{Endpoint, ResultMinor, Session};
use crate::transport::{Transport, TransportError};
use crate::ui::{Notice, UserInterface};

/// Upper bound for telling the server about a stopped run
pub const STOP_NOTICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum EngineState {
    /// Nothing sent yet
    #[display("init")]
    Init,
    /// Hello request sent
    #[display("hello-sent")]
    HelloSent,
    /// Waiting for the next command
    #[display("awaiting-command")]
    AwaitingCommand,
    /// A command is being handled
    #[display("dispatching")]
    Dispatching,
    /// The run is over
    #[display("terminated")]
    Terminated,
}

/// Runs one ChipGateway session over a transport
pub struct ProtocolEngine<T: Transport> {
    session: Session,
    transport: T,
    card: Arc<dyn CardService>,
    ui: Arc<dyn UserInterface>,
    config: GatewayConfig,
    handlers: HandlerContext,
    validator: Option<ChallengeValidator>,
    cancel: CancellationToken,
    state: EngineState,
    connected: BTreeSet<SlotHandle>,
    notices: Vec<Notice>,
    stop_sent: bool,
}

impl<T: Transport> ProtocolEngine<T> {
    /// Create an engine for `session`
    ///
    /// Challenge signatures are checked against the trust store named in `config`, or the
    /// bundled one, unless [`Self::with_trust_store`] supplies a store.
    pub fn new(
        session: Session,
        transport: T,
        card: Arc<dyn CardService>,
        ui: Arc<dyn UserInterface>,
        config: GatewayConfig,
    ) -> Self {
        let pins = PinUnwrapper::new(config.remote_pin_allowed, session.pin_key().cloned());
        let handlers = HandlerContext::new(session.id(), card.clone(), pins);
        Self {
            session,
            transport,
            card,
            ui,
            config,
            handlers,
            validator: None,
            cancel: CancellationToken::new(),
            state: EngineState::Init,
            connected: BTreeSet::new(),
            notices: Vec::new(),
            stop_sent: false,
        }
    }

    /// Check challenge signatures against `store`
    pub fn with_trust_store(mut self, store: TrustStore) -> Self {
        self.validator = Some(ChallengeValidator::new(store));
        self
    }

    /// Stop the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token stopping the run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current protocol state
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Run the session to its end
    ///
    /// Returns the server's `Terminate` message. Cleanup has finished when this returns,
    /// only slot disconnects may still be in flight.
    pub async fn run(mut self) -> Result<Terminate> {
        let result = self.execute().await;
        match &result {
            Ok(terminate) => info!(result = %terminate.result, "ChipGateway session finished"),
            Err(e) if e.is_cancelled() => info!("ChipGateway session stopped"),
            Err(e) => error!(error = %e, kind = %e.kind(), "ChipGateway session failed"),
        }
        self.cleanup().await;
        result
    }

    fn transition(&mut self, state: EngineState) {
        debug!(from = %self.state, to = %state, "Engine state transition");
        self.state = state;
    }

    async fn execute(&mut self) -> Result<Terminate> {
        self.hello().await?;

        self.transition(EngineState::AwaitingCommand);
        let request = GetCommand::new(self.session.id());
        let mut command: Command = self.exchange(Endpoint::GetCommand, &request).await?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.stop().await);
            }
            debug!(command = command.name(), "Received command");

            self.transition(EngineState::Dispatching);
            let reply = match command {
                Command::Terminate(terminate) => {
                    self.transition(EngineState::Terminated);
                    return Ok(terminate);
                }
                Command::ListTokens(request) => self
                    .handlers
                    .list_tokens(request, &mut self.connected, &self.cancel)
                    .await
                    .map(Reply::ListTokens),
                Command::ListCertificates(request) => self
                    .handlers
                    .list_certificates(request, &self.cancel)
                    .await
                    .map(Reply::ListCertificates),
                Command::Sign(request) => self
                    .handlers
                    .sign(request, &self.cancel)
                    .await
                    .map(Reply::Sign),
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(Stopped) => return Err(self.stop().await),
            };
            debug!(result = %reply.result(), "Sending reply");

            self.transition(EngineState::AwaitingCommand);
            command = self.exchange(reply.endpoint(), &reply).await?;
        }
    }

    async fn hello(&mut self) -> Result<()> {
        let challenge = Challenge::random();
        let request = HelloRequest::new(self.session.id(), crate::client_version(), &challenge);

        self.transition(EngineState::HelloSent);
        let response: HelloResponse = self.exchange(Endpoint::HelloRequest, &request).await?;
        if !response.result.is_hello_accepted() {
            let code = response.result;
            return Err(self.session.fail(ResultMinor::ServerError, |redirect| {
                Error::ServerRejected { code, redirect }
            }));
        }

        if self.config.validate_challenge_response {
            let validator = match self.validator.take() {
                Some(validator) => validator,
                None => ChallengeValidator::load(self.config.trust_store.as_deref())?,
            };
            // The challenge echoed in the response is never used.
            let signature = response.signature.as_deref().unwrap_or_default();
            let verified = validator.validate(&challenge, signature).is_ok();
            self.validator = Some(validator);
            if !verified {
                return Err(self
                    .session
                    .fail(ResultMinor::CommunicationError, |redirect| Error::SignatureInvalid {
                        redirect,
                    }));
            }
        } else {
            warn!("Challenge response validation is disabled");
        }

        let mandatory = response.result == ResultCode::UpdateRequired;
        if let Some(address) = response
            .download_address
            .as_deref()
            .filter(|address| !address.trim().is_empty())
        {
            self.schedule_update_notice(address, mandatory)?;
        }
        if mandatory {
            return Err(self
                .session
                .fail(ResultMinor::ClientError, |redirect| Error::VersionTooOld {
                    redirect,
                }));
        }
        Ok(())
    }

    fn schedule_update_notice(&mut self, address: &str, mandatory: bool) -> Result<()> {
        match self.config.update_policy().check(address) {
            Ok(url) => {
                debug!(%url, mandatory, "Scheduling update notice");
                self.notices.push(Notice::Update { url, mandatory });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, address, "Server sent an unusable download address");
                self.notices.push(Notice::Error(format!(
                    "The ChipGateway server is misconfigured: {e}"
                )));
                Err(self
                    .session
                    .fail(ResultMinor::ServerError, |redirect| Error::UnexpectedMessage {
                        reason: e.to_string(),
                        redirect,
                    }))
            }
        }
    }

    async fn exchange<Req, Resp>(&mut self, endpoint: Endpoint, message: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        if self.cancel.is_cancelled() {
            return Err(self.stop().await);
        }
        let body = codec::encode(message, &self.session)?;
        let resource = self.session.resource(endpoint);

        let answer = match self.transport.send(&resource, body, &self.cancel).await {
            Ok(answer) => answer,
            Err(TransportError::Cancelled) => return Err(self.stop().await),
            Err(e) => return Err(self.session.connection_error(e)),
        };
        codec::decode(&answer, &self.session)
    }

    /// Tell the server the run was stopped, once, and end the run
    async fn stop(&mut self) -> Error {
        if !self.stop_sent {
            self.stop_sent = true;
            let terminate = Terminate::new(self.session.id(), ResultCode::Stopped);
            match codec::encode(&terminate, &self.session) {
                Ok(body) => {
                    let resource = self.session.resource(Endpoint::Terminate);
                    // The run token is already cancelled.
                    let token = CancellationToken::new();
                    let notice = self.transport.send(&resource, body, &token);
                    match tokio::time::timeout(STOP_NOTICE_TIMEOUT, notice).await {
                        Ok(Ok(_)) => debug!("Server notified of the stopped run"),
                        Ok(Err(e)) => debug!(error = %e, "Failed to notify server of the stopped run"),
                        Err(_) => debug!("Timed out notifying server of the stopped run"),
                    }
                }
                Err(e) => debug!(error = %e, "Failed to encode stop notice"),
            }
        }
        self.transition(EngineState::Terminated);
        Error::Cancelled
    }

    async fn cleanup(&mut self) {
        self.card.clear_cached_pins();

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close the connection");
        }

        for slot in std::mem::take(&mut self.connected) {
            let card = self.card.clone();
            tokio::spawn(async move {
                if let Err(e) = card.disconnect(&slot).await {
                    debug!(error = %e, %slot, "Failed to disconnect slot");
                }
            });
        }

        for notice in self.notices.drain(..) {
            notice.present(self.ui.as_ref());
        }
        if self.state != EngineState::Terminated {
            self.transition(EngineState::Terminated);
        }
    }
}
