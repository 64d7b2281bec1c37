//! Target registry: the allow-list of types the dispatcher may construct.
//!
//! Names arriving in a call envelope are never turned into code directly.
//! They are looked up here, optionally through a [`TargetLoader`] hook, and
//! location hints only select among types that were registered with a
//! source location.

use crate::target::{default_factory, RemoteTarget, TargetFactory};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Extension hook consulted when a name is not registered.
///
/// Whatever it returns is cached in the registry under the requested name.
pub trait TargetLoader: Send + Sync {
    fn load(&self, type_name: &str) -> Option<TargetFactory>;
}

/// How a target was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    /// Registered under the requested name.
    Name,
    /// Produced by the [`TargetLoader`].
    Loader,
    /// Conventional path derived from the name matched a registered location.
    ConventionalPath,
    /// The caller's location hint matched a registered location.
    LocationHint,
}

impl fmt::Display for ResolvedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedVia::Name => write!(f, "name"),
            ResolvedVia::Loader => write!(f, "loader"),
            ResolvedVia::ConventionalPath => write!(f, "conventional_path"),
            ResolvedVia::LocationHint => write!(f, "location_hint"),
        }
    }
}

/// A resolved target ready to be instantiated.
#[derive(Clone)]
pub struct Resolution {
    /// Registered name of the resolved type.
    pub name: String,
    pub via: ResolvedVia,
    pub factory: TargetFactory,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("name", &self.name)
            .field("via", &self.via)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct TargetEntry {
    location: Option<String>,
    factory: TargetFactory,
}

/// Thread-safe registry of constructible targets.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    entries: Arc<RwLock<HashMap<String, TargetEntry>>>,
    loader: Option<Arc<dyn TargetLoader>>,
}

impl fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.names())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

impl TargetRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a loader consulted for unregistered names.
    pub fn with_loader(mut self, loader: Arc<dyn TargetLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Register a `Default` type under `name`.
    pub fn register<T>(&self, name: &str) -> &Self
    where
        T: RemoteTarget + Default + 'static,
    {
        self.register_factory(name, None, default_factory::<T>())
    }

    /// Register a `Default` type under `name` with its source location.
    pub fn register_at<T>(&self, name: &str, location: &str) -> &Self
    where
        T: RemoteTarget + Default + 'static,
    {
        self.register_factory(name, Some(location), default_factory::<T>())
    }

    pub fn register_factory(
        &self,
        name: &str,
        location: Option<&str>,
        factory: TargetFactory,
    ) -> &Self {
        let location_key = location.map(normalize_location);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(loc) = &location_key {
            if let Some(other) = entries
                .iter()
                .filter(|(other, entry)| {
                    other.as_str() != name && entry.location.as_ref() == Some(loc)
                })
                .map(|(other, _)| other)
                .min()
            {
                warn!(
                    target_type = name,
                    location = %loc,
                    shared_with = %other,
                    "Location already registered; lookups by location pick the smallest name"
                );
            }
        }
        entries.insert(
            name.to_string(),
            TargetEntry {
                location: location_key,
                factory,
            },
        );
        info!(target_type = name, location = ?location, "Registered target");
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a requested type name. First match wins: registered name,
    /// loader, conventional path, location hint.
    pub fn resolve(&self, type_name: &str, location_hint: Option<&str>) -> Option<Resolution> {
        if let Some(entry) = self.lookup_name(type_name) {
            return Some(Resolution {
                name: type_name.to_string(),
                via: ResolvedVia::Name,
                factory: entry.factory,
            });
        }

        if let Some(loader) = &self.loader {
            if let Some(factory) = loader.load(type_name) {
                debug!(target_type = type_name, "Loader supplied target");
                self.register_factory(type_name, None, Arc::clone(&factory));
                return Some(Resolution {
                    name: type_name.to_string(),
                    via: ResolvedVia::Loader,
                    factory,
                });
            }
        }

        let conventional = conventional_path(type_name);
        if let Some((name, entry)) = self.lookup_location(&conventional) {
            return Some(Resolution {
                name,
                via: ResolvedVia::ConventionalPath,
                factory: entry.factory,
            });
        }

        let hint = location_hint.filter(|h| !h.trim().is_empty())?;
        let (name, entry) = self.lookup_location(&normalize_location(hint))?;
        Some(Resolution {
            name,
            via: ResolvedVia::LocationHint,
            factory: entry.factory,
        })
    }

    fn lookup_name(&self, name: &str) -> Option<TargetEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).cloned()
    }

    fn lookup_location(&self, location: &str) -> Option<(String, TargetEntry)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(_, entry)| entry.location.as_deref() == Some(location))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(name, entry)| (name.clone(), entry.clone()))
    }
}

/// Derive the conventional source path of a hierarchical type name:
/// `Billing\Invoice` and `billing::Invoice` become `Billing/Invoice.rs`
/// and `billing/Invoice.rs`.
pub fn conventional_path(type_name: &str) -> String {
    let trimmed = type_name.trim().trim_start_matches('\\').trim_start_matches("::");
    let path = trimmed.replace("::", "/").replace('\\', "/");
    format!("{path}.rs")
}

fn normalize_location(location: &str) -> String {
    let mut loc = location.trim().replace('\\', "/");
    while let Some(rest) = loc.strip_prefix("./") {
        loc = rest.to_string();
    }
    loc
}
