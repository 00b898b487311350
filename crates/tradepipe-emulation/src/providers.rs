//! Security and portfolio lookup collaborators.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tradepipe_core::{Portfolio, Security, SecurityId};

/// Resolves security identifiers to entities.
pub trait SecurityProvider: Send + Sync {
    fn lookup_by_id(&self, id: &SecurityId) -> Option<Security>;

    fn securities(&self) -> Vec<Security>;
}

/// Provider over a fixed collection.
#[derive(Debug, Default)]
pub struct CollectionSecurityProvider {
    securities: RwLock<HashMap<SecurityId, Security>>,
}

impl CollectionSecurityProvider {
    pub fn new(securities: impl IntoIterator<Item = Security>) -> Self {
        Self {
            securities: RwLock::new(securities.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }

    pub fn add(&self, security: Security) {
        self.securities.write().insert(security.id.clone(), security);
    }
}

impl SecurityProvider for CollectionSecurityProvider {
    fn lookup_by_id(&self, id: &SecurityId) -> Option<Security> {
        self.securities.read().get(id).cloned()
    }

    fn securities(&self) -> Vec<Security> {
        let mut all: Vec<Security> = self.securities.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

/// Creates entities for identifiers seen in messages.
///
/// Securities come from the provider, portfolios from the initial set
/// (matched case-insensitively). Unknown identifiers get default entities.
pub struct EntityFactory {
    securities: Arc<dyn SecurityProvider>,
    portfolios: RwLock<HashMap<String, Portfolio>>,
}

impl EntityFactory {
    pub fn new(
        securities: Arc<dyn SecurityProvider>,
        portfolios: impl IntoIterator<Item = Portfolio>,
    ) -> Self {
        Self {
            securities,
            portfolios: RwLock::new(
                portfolios
                    .into_iter()
                    .map(|p| (p.name.to_lowercase(), p))
                    .collect(),
            ),
        }
    }

    pub fn create_security(&self, id: &SecurityId) -> Security {
        self.securities
            .lookup_by_id(id)
            .unwrap_or_else(|| Security::new(id.clone()))
    }

    pub fn create_portfolio(&self, name: &str) -> Portfolio {
        self.portfolios
            .read()
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| Portfolio::new(name, Default::default()))
    }

    /// Register a portfolio. Returns `false` if one with the same name
    /// (ignoring case) already exists.
    pub fn add_portfolio(&self, portfolio: Portfolio) -> bool {
        let mut portfolios = self.portfolios.write();
        let key = portfolio.name.to_lowercase();
        if portfolios.contains_key(&key) {
            return false;
        }
        portfolios.insert(key, portfolio);
        true
    }

    pub fn security_provider(&self) -> &Arc<dyn SecurityProvider> {
        &self.securities
    }
}
