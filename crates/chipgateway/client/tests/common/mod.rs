//! Common test utilities: a scripted gateway server, a virtual card and a recording UI

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use k256::ecdsa::{Signature, SigningKey, signature::Signer};
use serde_json::{Value, json};
use url::Url;

use chipgateway_client::messages::{CertificateFilter, CertificateInfo, TokenInfo};
use chipgateway_client::{
    Bytes, CancellationToken, CardError, CardService, GatewayConfig, Pin, ProtocolEngine, Session,
    SlotHandle, TokenSearch, Transport, TransportError, TrustStore, UserInterface,
};

pub const SESSION_ID: &str = "session-42";
pub const BASE: &str = "https://gateway.test/cg";

type Responder = Box<dyn FnOnce(&Value) -> Result<Value, TransportError> + Send>;

/// A request the engine posted
#[derive(Debug, Clone)]
pub struct Recorded {
    pub resource: String,
    pub body: Value,
}

impl Recorded {
    pub fn endpoint(&self) -> &str {
        self.resource.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Default)]
struct ServerState {
    responders: VecDeque<Responder>,
    requests: Vec<Recorded>,
    closed: bool,
}

/// Transport answering requests from a script, playing the gateway server
#[derive(Clone, Default)]
pub struct ScriptedServer {
    state: Arc<Mutex<ServerState>>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer computed from the request body
    pub fn respond(
        &self,
        responder: impl FnOnce(&Value) -> Result<Value, TransportError> + Send + 'static,
    ) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responders
            .push_back(Box::new(responder));
        self
    }

    /// Queue a fixed answer
    pub fn reply(&self, body: Value) -> &Self {
        self.respond(move |_| Ok(body))
    }

    /// Queue a command answer
    pub fn command(&self, member: &str, request: Value) -> &Self {
        self.reply(json!({ member: request }))
    }

    /// Queue the terminate command
    pub fn terminate(&self) -> &Self {
        self.command(
            "Terminate",
            json!({"SessionIdentifier": SESSION_ID, "Result": "OK"}),
        )
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.endpoint().to_owned())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl Transport for ScriptedServer {
    async fn send(
        &mut self,
        resource: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let body: Value = serde_json::from_slice(&body).unwrap();
        let responder = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(Recorded {
                resource: resource.to_owned(),
                body: body.clone(),
            });
            state.responders.pop_front()
        };
        match responder {
            Some(responder) => Ok(Bytes::from(serde_json::to_vec(&responder(&body)?).unwrap())),
            None => Ok(Bytes::from_static(b"{}")),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Key the test gateway signs hello challenges with
pub struct GatewayKey {
    key: SigningKey,
}

impl GatewayKey {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut rand_v8::rngs::OsRng),
        }
    }

    pub fn trust_store(&self) -> TrustStore {
        TrustStore::from_keys(vec![*self.key.verifying_key()]).unwrap()
    }

    /// DER signature over `challenge`, base64 encoded
    pub fn sign(&self, challenge: &[u8]) -> String {
        let signature: Signature = self.key.sign(challenge);
        STANDARD.encode(signature.to_der().as_bytes())
    }

    /// Hello answer signing the challenge of the request
    pub fn hello(
        &self,
        result: &'static str,
        download: Option<&'static str>,
    ) -> impl FnOnce(&Value) -> Result<Value, TransportError> + Send + 'static {
        let key = self.key.clone();
        move |request| {
            let challenge = STANDARD
                .decode(request["Challenge"].as_str().unwrap())
                .unwrap();
            let signature: Signature = key.sign(&challenge);
            let mut response = json!({
                "SessionIdentifier": SESSION_ID,
                "Result": result,
                "Signature": STANDARD.encode(signature.to_der().as_bytes()),
            });
            if let Some(download) = download {
                response["DownloadAddress"] = json!(download);
            }
            Ok(response)
        }
    }
}

/// Virtual card layer
#[derive(Default)]
pub struct VirtualCard {
    pub tokens: Vec<TokenInfo>,
    /// Slots every search connects in addition to the present tokens
    pub touched: BTreeSet<SlotHandle>,
    pub certificates: Vec<CertificateInfo>,
    /// Operations on tokens never finish
    pub hang: bool,
    pub searches: Mutex<usize>,
    pub pins: Mutex<Vec<Option<String>>>,
    /// Called with every PIN the card receives
    pub on_pin: Option<fn(&Pin)>,
    pub disconnected: Mutex<Vec<SlotHandle>>,
    pub pins_cleared: AtomicBool,
}

impl VirtualCard {
    pub fn slot() -> SlotHandle {
        SlotHandle::new([0x01, 0x02])
    }

    pub fn with_token() -> Self {
        Self {
            tokens: vec![TokenInfo {
                slot_handle: Some(Self::slot()),
                ifd_name: Some("Virtual Reader 0".into()),
                card_type: Some("http://bsi.bund.de/cif/npa.xml".into()),
                algorithm_info: vec!["ES256".into()],
                has_certificates: Some(true),
            }],
            certificates: vec![CertificateInfo {
                certificate: vec![vec![0x30, 0x82, 0x01, 0x0a]],
                did_name: "SIG".into(),
                algorithm: Some("ES256".into()),
                unique_ssn: None,
            }],
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::with_token()
        }
    }

    fn known(&self, slot: &SlotHandle) -> Result<(), CardError> {
        if self
            .tokens
            .iter()
            .any(|token| token.slot_handle.as_ref() == Some(slot))
        {
            Ok(())
        } else {
            Err(CardError::UnknownSlot(slot.clone()))
        }
    }

    fn record_pin(&self, pin: Option<&Pin>) {
        if let (Some(hook), Some(pin)) = (self.on_pin, pin) {
            hook(pin);
        }
        self.pins
            .lock()
            .unwrap()
            .push(pin.map(|pin| pin.expose().to_string()));
    }

    pub fn disconnected(&self) -> Vec<SlotHandle> {
        self.disconnected.lock().unwrap().clone()
    }

    pub fn searches(&self) -> usize {
        *self.searches.lock().unwrap()
    }
}

#[async_trait]
impl CardService for VirtualCard {
    async fn find_tokens(&self, filters: &[TokenInfo]) -> Result<TokenSearch, CardError> {
        *self.searches.lock().unwrap() += 1;
        let matched = self
            .tokens
            .iter()
            .filter(|token| filters.is_empty() || filters.iter().any(|f| token.matches(f)))
            .cloned()
            .collect();
        let mut connected_slots = self.touched.clone();
        connected_slots.extend(self.tokens.iter().filter_map(|t| t.slot_handle.clone()));
        Ok(TokenSearch {
            matched,
            connected_slots,
        })
    }

    async fn list_certificates(
        &self,
        slot: &SlotHandle,
        _filters: &[CertificateFilter],
        pin: Option<&Pin>,
    ) -> Result<Vec<CertificateInfo>, CardError> {
        self.record_pin(pin);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.known(slot)?;
        Ok(self.certificates.clone())
    }

    async fn sign(
        &self,
        slot: &SlotHandle,
        did_name: &str,
        pin: Option<&Pin>,
        message: &[u8],
    ) -> Result<Vec<u8>, CardError> {
        self.record_pin(pin);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.known(slot)?;
        if did_name != "SIG" {
            return Err(CardError::UnknownDid(did_name.to_owned()));
        }
        Ok(message.iter().rev().copied().collect())
    }

    async fn disconnect(&self, slot: &SlotHandle) -> Result<(), CardError> {
        self.disconnected.lock().unwrap().push(slot.clone());
        Ok(())
    }

    fn clear_cached_pins(&self) {
        self.pins_cleared.store(true, Ordering::SeqCst);
    }
}

/// UI remembering every notice
#[derive(Default)]
pub struct RecordingUi {
    pub updates: Mutex<Vec<(Url, bool)>>,
    pub errors: Mutex<Vec<String>>,
}

impl UserInterface for RecordingUi {
    fn show_update_notice(&self, url: &Url, mandatory: bool) {
        self.updates.lock().unwrap().push((url.clone(), mandatory));
    }

    fn show_error_message(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_owned());
    }
}

pub fn session() -> Session {
    Session::new(SESSION_ID, Url::parse(BASE).unwrap())
}

/// Engine against the scripted server trusting `key`
pub fn engine(
    server: &ScriptedServer,
    key: &GatewayKey,
    card: Arc<VirtualCard>,
    ui: Arc<RecordingUi>,
) -> ProtocolEngine<ScriptedServer> {
    engine_with(session(), GatewayConfig::default(), server, key, card, ui)
}

pub fn engine_with(
    session: Session,
    config: GatewayConfig,
    server: &ScriptedServer,
    key: &GatewayKey,
    card: Arc<VirtualCard>,
    ui: Arc<RecordingUi>,
) -> ProtocolEngine<ScriptedServer> {
    ProtocolEngine::new(session, server.clone(), card, ui, config).with_trust_store(key.trust_store())
}

/// Let spawned cleanup tasks run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
