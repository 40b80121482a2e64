use std::sync::Arc;

use futures::FutureExt;
use url::Url;

use crate::auth::identity::IdentityBridge;
use crate::auth::store::AuthStore;
use crate::auth::supervisor::{ActivityHub, ExpiryHandler, SessionSupervisor};
use crate::auth::token_store::TokenStore;
use crate::config::{AuthFlow, Config};
use crate::error::Result;
use crate::services::api::{ApiClient, BearerSource};
use crate::services::provider::{LogoutOptions, ProviderClient};
use crate::storage::Storage;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// The authoritative session store.
    pub store: Arc<AuthStore<ApiClient>>,
    /// The identity provider adapter.
    pub provider: Arc<ProviderClient>,
    /// Keeps the store in step with the provider.
    pub bridge: Arc<IdentityBridge<ApiClient>>,
    /// Ends idle sessions.
    pub supervisor: SessionSupervisor,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    /// * `storage` - Durable storage for the persisted session subset.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`, with the previous run's session
    /// already rehydrated.
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        let tokens = TokenStore::load(storage.clone())?;
        tracing::info!("✅ Token store initialized");

        let provider = Arc::new(ProviderClient::new(config.provider.clone(), storage.clone())?);

        // Backend calls carry the credential of whichever flow is live.
        let bearer: Arc<dyn BearerSource> = match config.auth_flow {
            AuthFlow::Credentials => Arc::new(tokens.clone()),
            AuthFlow::Provider => provider.clone(),
        };
        let api = ApiClient::new(&config.api_base_url, bearer);

        let store = Arc::new(AuthStore::new(api, tokens, storage, config.auth_flow));
        store.rehydrate()?;
        tracing::info!("✅ Auth store initialized ({:?} flow)", config.auth_flow);

        let bridge = Arc::new(IdentityBridge::new(store.clone(), config.claim_namespace.clone()));
        let supervisor = SessionSupervisor::new(config.idle_timeout, ActivityHub::new());

        Ok(AppState {
            config: Arc::new(config),
            store,
            provider,
            bridge,
            supervisor,
        })
    }

    pub fn activity(&self) -> &ActivityHub {
        self.supervisor.hub()
    }

    /// Starts the background work: provider sync (or session verification
    /// under the credentials flow) and idle supervision of signed-in
    /// sessions.
    pub fn start(&self) {
        match self.config.auth_flow {
            AuthFlow::Provider => {
                self.provider.restore();
                tokio::spawn(self.bridge.clone().run(self.provider.subscribe()));
            }
            AuthFlow::Credentials => {
                let store = self.store.clone();
                tokio::spawn(async move {
                    store.check_auth().await;
                });
            }
        }

        let mut sessions = self.store.subscribe();
        let store = Arc::downgrade(&self.store);
        let supervisor = self.supervisor.clone();
        let on_expire = self.expiry_handler();
        tokio::spawn(async move {
            // Sign-in count the running supervision belongs to.
            let mut supervised: Option<u64> = None;
            loop {
                let Some(store) = store.upgrade() else {
                    supervisor.teardown();
                    break;
                };
                let (authenticated, sign_ins) = {
                    let session = sessions.borrow_and_update();
                    (session.is_authenticated(), store.sign_ins())
                };
                drop(store);
                match (authenticated, supervised) {
                    (true, current) if current != Some(sign_ins) => {
                        supervisor.initialize(on_expire.clone());
                        supervised = Some(sign_ins);
                    }
                    (false, Some(_)) => {
                        supervisor.teardown();
                        supervised = None;
                    }
                    _ => {}
                }
                if sessions.changed().await.is_err() {
                    supervisor.teardown();
                    break;
                }
            }
        });
    }

    /// Ends the session everywhere it lives.
    ///
    /// Returns the provider's logout URL under the provider flow.
    pub async fn end_session(&self) -> Result<Option<Url>> {
        end_session(&self.store, &self.provider, &self.config).await
    }

    /// Where an unauthenticated navigation is sent.
    pub fn login_redirect(&self) -> Result<String> {
        match self.config.auth_flow {
            AuthFlow::Provider => Ok(self.provider.navigation_redirect()?.into()),
            AuthFlow::Credentials => Ok("/login".to_string()),
        }
    }

    fn expiry_handler(&self) -> ExpiryHandler {
        let store = Arc::downgrade(&self.store);
        let provider = Arc::downgrade(&self.provider);
        let config = self.config.clone();
        Arc::new(move || {
            let store = store.upgrade();
            let provider = provider.upgrade();
            let config = config.clone();
            async move {
                let (Some(store), Some(provider)) = (store, provider) else {
                    return;
                };
                if let Err(e) = end_session(&store, &provider, &config).await {
                    tracing::warn!("Idle logout incomplete: {}", e);
                }
            }
            .boxed()
        })
    }
}

async fn end_session(
    store: &AuthStore<ApiClient>,
    provider: &ProviderClient,
    config: &Config,
) -> Result<Option<Url>> {
    store.logout().await;
    match config.auth_flow {
        AuthFlow::Provider => {
            let return_to = config.app_origin.join("/login").ok();
            provider.logout(&LogoutOptions { return_to }).map(Some)
        }
        AuthFlow::Credentials => Ok(None),
    }
}
