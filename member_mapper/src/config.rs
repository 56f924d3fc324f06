use std::sync::Arc;

use crate::convert::Conversions;
use crate::ShapeId;

/// Decides whether a runtime type is a generated proxy which should be mapped as its base value.
///
/// Only consulted for types which name a base through `#[mapper(proxy_of)]`.
pub trait ProxyStrategy: Send + Sync {
    fn is_proxy(&self, shape: ShapeId) -> bool;
}

impl<F> ProxyStrategy for F
where
    F: Fn(ShapeId) -> bool + Send + Sync,
{
    fn is_proxy(&self, shape: ShapeId) -> bool {
        self(shape)
    }
}

/// Treats every type declared inside one of the given module paths as a proxy.
///
/// `NamespaceProxies::new(["lazy_proxies"])` matches `my_app::lazy_proxies::OrderProxy` as well as
/// `lazy_proxies::OrderProxy`.
#[derive(Clone, Debug, Default)]
pub struct NamespaceProxies {
    namespaces: Vec<String>,
}

impl NamespaceProxies {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NamespaceProxies {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }
}

impl ProxyStrategy for NamespaceProxies {
    fn is_proxy(&self, shape: ShapeId) -> bool {
        // Generic arguments may mention other paths; only the type's own path counts.
        let name = shape.name();
        let path = name.split('<').next().unwrap_or(name);
        let mut segments: Vec<&str> = path.split("::").collect();
        // The last segment is the type itself.
        segments.pop();
        self.namespaces.iter().any(|ns| {
            let wanted: Vec<&str> = ns.split("::").collect();
            !wanted.is_empty() && segments.windows(wanted.len()).any(|w| w == wanted.as_slice())
        })
    }
}

/// Settings for a [crate::Mapper].
#[derive(Clone)]
pub struct MapperConfig {
    proxies: Option<Arc<dyn ProxyStrategy>>,
    conversions: Conversions,
}

impl MapperConfig {
    /// No proxy detection, standard conversions.
    pub fn new() -> Self {
        MapperConfig {
            proxies: None,
            conversions: Conversions::standard(),
        }
    }

    pub fn with_proxy_strategy<P: ProxyStrategy + 'static>(mut self, strategy: P) -> Self {
        self.proxies = Some(Arc::new(strategy));
        self
    }

    pub fn with_conversions(mut self, conversions: Conversions) -> Self {
        self.conversions = conversions;
        self
    }

    pub fn proxy_strategy(&self) -> Option<&dyn ProxyStrategy> {
        self.proxies.as_deref()
    }

    pub fn conversions(&self) -> &Conversions {
        &self.conversions
    }

    pub fn conversions_mut(&mut self) -> &mut Conversions {
        &mut self.conversions
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MapperConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperConfig")
            .field("proxies", &self.proxies.is_some())
            .field("conversions", &self.conversions)
            .finish()
    }
}
