//! Shared doubles for the identity integration tests.
//!
//! - `MemoryLedger` keeps accounts and permissions in memory and checks the
//!   signature on every permission update against the account's `owner` or
//!   `active` key, the way a chain would.
//! - `LoopbackRelay` is an in-process relay: it verifies login credentials,
//!   allows one connection per DID and forwards messages to the recipient's
//!   inbox.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use veritas_core::{KeyValueStore, MemoryStore, SdkConfig};
use veritas_crypto::{sha256, sha256_hex, KdfParams, KeyManager, PublicKey, StorageKeyManager};
use veritas_identity::ledger::ActionTrace;
use veritas_identity::{
    Communication, CreateAccountRequest, Credential, DidResolver, IdentityController,
    LedgerAccount, LedgerAccountStatus, LedgerClient, LedgerError, LedgerResult, Permission,
    PermissionUpdate, RelayError, RelayEvent, RelayResult, RelayTransport, TransactionSigner,
    TransactionTrace,
};

pub const PASSWORD: &str = "Str0ngPassphrase!";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct LedgerEntry {
    account: LedgerAccount,
    permissions: Vec<Permission>,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, LedgerEntry>,
    transactions: u64,
}

pub struct MemoryLedger {
    chain_id: String,
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_chain_id(sha256_hex(b"veritas-test-chain"))
    }

    pub fn with_chain_id(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn permissions(&self, account_name: &str) -> Vec<Permission> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(account_name)
            .map(|entry| entry.permissions.clone())
            .unwrap_or_default()
    }

    pub fn deactivate(&self, account_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.accounts.get_mut(account_name) {
            entry.account.status = LedgerAccountStatus::Deactivated;
        }
    }

    pub fn transaction_count(&self) -> u64 {
        self.state.lock().unwrap().transactions
    }

    fn next_transaction_id(state: &mut LedgerState) -> String {
        state.transactions += 1;
        sha256_hex(&state.transactions.to_be_bytes())
    }
}

fn upsert_permission(permissions: &mut Vec<Permission>, name: &str, parent: &str, key: String) {
    match permissions.iter_mut().find(|p| p.perm_name == name) {
        Some(permission) => permission.required_keys = vec![key],
        None => permissions.push(Permission {
            perm_name: name.to_string(),
            parent: parent.to_string(),
            required_keys: vec![key],
        }),
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_account_by_name(&self, account_name: &str) -> LedgerResult<LedgerAccount> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(account_name)
            .map(|entry| entry.account.clone())
            .ok_or_else(|| LedgerError::AccountNotFound(account_name.to_string()))
    }

    async fn get_account_by_username_hash(
        &self,
        username_hash: &str,
    ) -> LedgerResult<LedgerAccount> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .values()
            .find(|entry| entry.account.username_hash == username_hash)
            .map(|entry| entry.account.clone())
            .ok_or_else(|| LedgerError::UsernameNotFound(username_hash.to_string()))
    }

    async fn get_permissions(&self, account_name: &str) -> LedgerResult<Vec<Permission>> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(account_name)
            .map(|entry| entry.permissions.clone())
            .ok_or_else(|| LedgerError::AccountNotFound(account_name.to_string()))
    }

    async fn create_account(&self, request: CreateAccountRequest) -> LedgerResult<TransactionTrace> {
        let mut state = self.state.lock().unwrap();
        if state
            .accounts
            .values()
            .any(|entry| entry.account.username_hash == request.username_hash)
        {
            return Err(LedgerError::UsernameHashExists(request.username_hash));
        }

        let account_name = format!("p{}", state.accounts.len() + 1);
        let key = request.password_key.to_string();
        let mut permissions = Vec::new();
        upsert_permission(&mut permissions, "owner", "", key.clone());
        upsert_permission(&mut permissions, "active", "owner", key);

        state.accounts.insert(
            account_name.clone(),
            LedgerEntry {
                account: LedgerAccount {
                    account_name: account_name.clone(),
                    status: LedgerAccountStatus::Creating,
                    username_hash: request.username_hash,
                    password_salt: request.password_salt,
                    version: 1,
                },
                permissions,
            },
        );

        Ok(TransactionTrace {
            transaction_id: Self::next_transaction_id(&mut state),
            action_traces: vec![ActionTrace {
                action: "newaccount".to_string(),
                new_account: Some(account_name),
            }],
        })
    }

    async fn update_permissions(
        &self,
        account_name: &str,
        updates: Vec<PermissionUpdate>,
        signer: &dyn TransactionSigner,
    ) -> LedgerResult<TransactionTrace> {
        let authority: Vec<String> = {
            let state = self.state.lock().unwrap();
            let entry = state
                .accounts
                .get(account_name)
                .ok_or_else(|| LedgerError::AccountNotFound(account_name.to_string()))?;
            entry
                .permissions
                .iter()
                .filter(|p| p.perm_name == "owner" || p.perm_name == "active")
                .flat_map(|p| p.required_keys.clone())
                .collect()
        };

        let payload = serde_json::to_vec(&(account_name, &updates))
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let digest = sha256(&payload);
        let signature = signer.sign(&digest).await.map_err(LedgerError::Signer)?;

        let authorized = authority.iter().any(|key| {
            key.parse::<PublicKey>()
                .map(|public_key| signature.verify(&public_key, &digest))
                .unwrap_or(false)
        });
        if !authorized {
            return Err(LedgerError::Rejected(format!(
                "missing authority of {}@active",
                account_name
            )));
        }

        let mut state = self.state.lock().unwrap();
        let entry = state
            .accounts
            .get_mut(account_name)
            .ok_or_else(|| LedgerError::AccountNotFound(account_name.to_string()))?;
        for update in updates {
            upsert_permission(
                &mut entry.permissions,
                &update.permission,
                &update.parent,
                update.key.to_string(),
            );
        }
        entry.account.status = LedgerAccountStatus::Ready;
        entry.account.version += 1;

        Ok(TransactionTrace {
            transaction_id: Self::next_transaction_id(&mut state),
            action_traces: vec![ActionTrace {
                action: "updatekeys".to_string(),
                new_account: None,
            }],
        })
    }

    async fn get_chain_id(&self) -> LedgerResult<String> {
        Ok(self.chain_id.clone())
    }
}

struct Connection {
    did: Option<String>,
    inbox: UnboundedSender<String>,
}

#[derive(Default)]
struct RelayState {
    next_connection: u64,
    connections: HashMap<u64, Connection>,
}

/// In-process relay server.
pub struct LoopbackRelay {
    resolver: DidResolver,
    state: Mutex<RelayState>,
}

impl LoopbackRelay {
    pub fn new(resolver: DidResolver) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            state: Mutex::new(RelayState::default()),
        })
    }

    /// A transport for one client plus the receiving end of its inbox.
    pub fn transport(self: &Arc<Self>) -> (Arc<LoopbackTransport>, UnboundedReceiver<String>) {
        let (inbox, receiver) = unbounded_channel();
        let connection_id = {
            let mut state = self.state.lock().unwrap();
            state.next_connection += 1;
            state.next_connection
        };
        let transport = Arc::new(LoopbackTransport {
            relay: self.clone(),
            connection_id,
            connected: AtomicBool::new(false),
            inbox,
        });
        (transport, receiver)
    }

    async fn login(&self, connection_id: u64, jwt: &str) -> RelayResult<()> {
        let credential =
            Credential::from_jwt(jwt).map_err(|e| RelayError::Rejected(e.to_string()))?;
        if !credential.verify(&self.resolver).await {
            return Err(RelayError::Rejected("login credential did not verify".into()));
        }

        let did = credential.sender().to_string();
        let mut state = self.state.lock().unwrap();
        if state
            .connections
            .iter()
            .any(|(id, c)| *id != connection_id && c.did.as_deref() == Some(did.as_str()))
        {
            return Err(RelayError::Rejected(format!("{} is already logged in", did)));
        }
        let connection = state
            .connections
            .get_mut(&connection_id)
            .ok_or(RelayError::NotConnected)?;
        connection.did = Some(did);
        Ok(())
    }

    fn relay(&self, connection_id: u64, jwt: &str) -> RelayResult<()> {
        let credential =
            Credential::from_jwt(jwt).map_err(|e| RelayError::Rejected(e.to_string()))?;
        let state = self.state.lock().unwrap();

        let sender = state
            .connections
            .get(&connection_id)
            .and_then(|c| c.did.as_deref());
        if sender != Some(credential.sender()) {
            return Err(RelayError::Rejected("not logged in as sender".into()));
        }

        let recipient = credential
            .recipient()
            .ok_or_else(|| RelayError::Rejected("message has no recipient".into()))?;
        let connection = state
            .connections
            .values()
            .find(|c| c.did.as_deref() == Some(recipient))
            .ok_or_else(|| RelayError::Rejected("recipient not found".into()))?;
        connection
            .inbox
            .send(jwt.to_string())
            .map_err(|_| RelayError::Rejected("recipient not found".into()))
    }
}

pub struct LoopbackTransport {
    relay: Arc<LoopbackRelay>,
    connection_id: u64,
    connected: AtomicBool,
    inbox: UnboundedSender<String>,
}

#[async_trait]
impl RelayTransport for LoopbackTransport {
    async fn connect(&self) -> RelayResult<()> {
        let mut state = self.relay.state.lock().unwrap();
        state.connections.insert(
            self.connection_id,
            Connection {
                did: None,
                inbox: self.inbox.clone(),
            },
        );
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.relay
            .state
            .lock()
            .unwrap()
            .connections
            .remove(&self.connection_id);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: RelayEvent, jwt: &str) -> RelayResult<()> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        match event {
            RelayEvent::Login => self.relay.login(self.connection_id, jwt).await,
            RelayEvent::Message => self.relay.relay(self.connection_id, jwt),
        }
    }
}

/// One device: a controller over its own storage, plus its relay inbox.
pub struct Device {
    pub controller: IdentityController,
    pub store: Arc<MemoryStore>,
    pub key_manager: Arc<dyn KeyManager>,
    pub inbox: UnboundedReceiver<String>,
}

impl Device {
    pub fn new(ledger: Arc<MemoryLedger>, relay: &Arc<LoopbackRelay>) -> Self {
        Self::with_store(ledger, relay, Arc::new(MemoryStore::new()))
    }

    /// A device over existing storage, as after an app restart.
    pub fn with_store(
        ledger: Arc<MemoryLedger>,
        relay: &Arc<LoopbackRelay>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let config = SdkConfig::default_config();
        let backend: Arc<dyn KeyValueStore> = store.clone();
        let key_manager: Arc<dyn KeyManager> = Arc::new(
            StorageKeyManager::new(backend.clone()).with_kdf_params(KdfParams::INSECURE_TESTING),
        );
        let (transport, inbox) = relay.transport();
        let communication = Communication::new(transport, &config.relay);
        let controller =
            IdentityController::new(config, key_manager.clone(), ledger, backend, communication);
        Self {
            controller,
            store,
            key_manager,
            inbox,
        }
    }

    /// Hands everything waiting in the inbox to the controller's subscribers.
    pub async fn pump_inbox(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(jwt) = self.inbox.try_recv() {
            self.controller.communication().deliver(&jwt).await;
            delivered += 1;
        }
        delivered
    }
}

pub struct Network {
    pub ledger: Arc<MemoryLedger>,
    pub relay: Arc<LoopbackRelay>,
}

impl Network {
    pub fn new() -> Self {
        init_tracing();
        let ledger = Arc::new(MemoryLedger::new());
        let relay = LoopbackRelay::new(DidResolver::new(ledger.clone()));
        Self { ledger, relay }
    }

    pub fn device(&self) -> Device {
        Device::new(self.ledger.clone(), &self.relay)
    }

    pub fn resolver(&self) -> DidResolver {
        DidResolver::new(self.ledger.clone())
    }
}

/// Username, password, account creation and key push, in that order.
pub async fn register(device: &Device, name: &str) -> String {
    let controller = &device.controller;
    controller.save_username(name).await.unwrap();
    controller.save_password(PASSWORD, None).await.unwrap();
    let account_name = controller.create_person().await.unwrap();
    controller.update_keys(PASSWORD).await.unwrap();
    account_name
}

/// Registers with every device key present.
pub async fn register_with_all_keys(device: &Device, name: &str) -> String {
    let controller = &device.controller;
    controller.save_username(name).await.unwrap();
    controller.save_password(PASSWORD, None).await.unwrap();
    controller.save_pin("4321").await.unwrap();
    controller.save_biometric().await.unwrap();
    controller.save_local().await.unwrap();
    let account_name = controller.create_person().await.unwrap();
    controller.update_keys(PASSWORD).await.unwrap();
    account_name
}
