//! The consulting services a user can pick from the menu.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub code: String,
    pub title: String,
}

impl Service {
    pub fn new(code: &str, title: &str) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
        }
    }
}

/// Ordered list of offered services. Menu order follows list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCatalog {
    services: Vec<Service>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    pub fn get(&self, code: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.code == code)
    }

    /// Human title for a code, falling back to the code itself.
    pub fn title_of<'a>(&'a self, code: &'a str) -> &'a str {
        self.get(code).map(|s| s.title.as_str()).unwrap_or(code)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new(default_services())
    }
}

pub fn default_services() -> Vec<Service> {
    vec![
        Service::new("venture_capital", "Venture Capital"),
        Service::new("hnwi", "HNWI Services"),
        Service::new("real_estate", "Real Estate"),
        Service::new("crypto", "Crypto Assets"),
        Service::new("ma", "Mergers & Acquisitions"),
        Service::new("private_equity", "Private Equity"),
        Service::new("relocation", "Relocation"),
        Service::new("bank_cards", "Bank Cards"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_lookup() {
        let catalog = ServiceCatalog::default();
        assert_eq!(catalog.services().len(), 8);
        assert_eq!(catalog.title_of("venture_capital"), "Venture Capital");
        assert_eq!(catalog.title_of("unknown"), "unknown");
        assert!(catalog.get("ma").is_some());
    }
}
