//! Wiring a [`CustosConfig`] into a ready PEP and PIP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use custos_authz::enforcer::DECISION_CACHE;
use custos_authz::resolver::ATTRIBUTE_CACHE;
use custos_authz::{
    AttributeResolver, AttributeValue, AuthzError, AuthzResult, CacheConfig, CacheStore, Clock,
    DecisionCache, DecisionQueryTransport, Enforcement, EnforcerConfig, FileStore,
    LocalPolicyEvaluator, LocalPolicyFilter, MappingLoader, MemoryStore, PolicyEnforcer,
    QueryTemplate, ResolverConfig, SystemClock,
};
use custos_config::{CustosConfig, QueryConfig};
use tracing::info;

use crate::error::{GatewayError, GatewayResult};

/// A policy enforcement point with an optional attribute resolver, built
/// from configuration.
///
/// # Example
///
/// ```rust,ignore
/// use custos::{ConfigLoader, Gateway};
///
/// let config = ConfigLoader::new()
///     .with_file("custos.toml")?
///     .with_env_prefix("CUSTOS")
///     .load()?;
///
/// let gateway = Gateway::builder(config)
///     .transport(soap_transport)
///     .build()?;
///
/// let enforcement = gateway.authorize(&subject, &path).await;
/// // ...
/// gateway.shutdown();
/// ```
#[derive(Debug)]
pub struct Gateway {
    config: CustosConfig,
    enforcer: PolicyEnforcer,
    resolver: Option<AttributeResolver>,
}

impl Gateway {
    /// Start building a gateway from `config`.
    pub fn builder(config: CustosConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Decide whether `subject` may access `resource`.
    pub async fn authorize(&self, subject: &str, resource: &str) -> Enforcement {
        self.enforcer.authorize(subject, resource).await
    }

    /// Resolve an attribute for `subject`.
    ///
    /// Fails with [`AuthzError::Config`] when attribute resolution is not
    /// enabled.
    pub async fn resolve(
        &self,
        subject: &str,
        attribute_id: &str,
        attribute_format: &str,
    ) -> AuthzResult<Vec<AttributeValue>> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| AuthzError::config("attribute resolution is not enabled"))?;
        resolver.resolve(subject, attribute_id, attribute_format).await
    }

    /// Re-read the attribute mapping file and swap it in.
    ///
    /// The previous mapping stays active if the file cannot be loaded.
    pub fn reload_mapping(&self) -> AuthzResult<()> {
        let (Some(resolver), Some(path)) = (&self.resolver, self.config.pip.mapping_file.as_deref())
        else {
            return Err(AuthzError::config("attribute resolution is not enabled"));
        };
        resolver.reload_mapping(MappingLoader::from_file(path)?);
        Ok(())
    }

    /// The enforcer.
    pub fn enforcer(&self) -> &PolicyEnforcer {
        &self.enforcer
    }

    /// The resolver, when attribute resolution is enabled.
    pub fn resolver(&self) -> Option<&AttributeResolver> {
        self.resolver.as_ref()
    }

    /// The configuration this gateway was built from.
    pub fn config(&self) -> &CustosConfig {
        &self.config
    }

    /// Prune and persist both caches.
    pub fn flush(&self) {
        self.enforcer.cache().flush();
        if let Some(resolver) = &self.resolver {
            resolver.cache().flush();
        }
    }

    /// Flush caches and drop the gateway.
    pub fn shutdown(self) {
        self.flush();
        info!("gateway shut down");
    }
}

/// Builder for [`Gateway`].
#[derive(Debug)]
pub struct GatewayBuilder {
    config: CustosConfig,
    transport: Option<Arc<dyn DecisionQueryTransport>>,
    attribute_transport: Option<Arc<dyn DecisionQueryTransport>>,
    evaluator: Option<Arc<dyn LocalPolicyEvaluator>>,
    clock: Arc<dyn Clock>,
}

impl GatewayBuilder {
    fn new(config: CustosConfig) -> Self {
        Self {
            config,
            transport: None,
            attribute_transport: None,
            evaluator: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Transport for decision queries. Also used for attribute queries
    /// unless [`attribute_transport`](Self::attribute_transport) is set.
    pub fn transport(mut self, transport: Arc<dyn DecisionQueryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Transport for attribute queries.
    pub fn attribute_transport(mut self, transport: Arc<dyn DecisionQueryTransport>) -> Self {
        self.attribute_transport = Some(transport);
        self
    }

    /// Local policy evaluator. Mutually exclusive with ignore patterns.
    pub fn evaluator(mut self, evaluator: Arc<dyn LocalPolicyEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Clock used by both caches.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the gateway.
    ///
    /// Reads the attribute mapping file and opens the cache directory when
    /// attribute resolution is enabled.
    pub fn build(self) -> GatewayResult<Gateway> {
        self.config.validate()?;

        let transport = self.transport.ok_or(GatewayError::MissingTransport)?;
        let pep = &self.config.pep;

        let filter = LocalPolicyFilter::from_parts(&pep.ignore_patterns, self.evaluator)?;

        let cache_config = if pep.cache_decisions {
            CacheConfig::default().with_clock_skew(pep.binding.clock_skew())
        } else {
            CacheConfig::disabled()
        };
        let decision_cache = Arc::new(DecisionCache::with_parts(
            DECISION_CACHE,
            cache_config,
            Arc::new(MemoryStore),
            Arc::clone(&self.clock),
        ));

        let enforcer_config = EnforcerConfig::new(pep.authz_service_uri.clone())
            .with_cache_denies(pep.cache_denies)
            .with_query(query_template(&pep.query))
            .with_timeout(pep.binding.timeout());
        let enforcer = PolicyEnforcer::with_cache(
            enforcer_config,
            filter,
            Arc::clone(&transport),
            decision_cache,
        );

        let resolver = if self.config.pip.enabled {
            let transport = self.attribute_transport.unwrap_or(transport);
            Some(build_resolver(&self.config, transport, self.clock)?)
        } else {
            None
        };

        info!(
            authz_service = %self.config.pep.authz_service_uri,
            cache_decisions = self.config.pep.cache_decisions,
            attribute_resolution = resolver.is_some(),
            "gateway ready"
        );

        Ok(Gateway {
            config: self.config,
            enforcer,
            resolver,
        })
    }
}

fn build_resolver(
    config: &CustosConfig,
    transport: Arc<dyn DecisionQueryTransport>,
    clock: Arc<dyn Clock>,
) -> GatewayResult<AttributeResolver> {
    let pip = &config.pip;

    let mapping_file = pip
        .mapping_file
        .as_deref()
        .ok_or_else(|| AuthzError::config("attribute resolution needs a mapping file"))?;
    let mapping = MappingLoader::from_file(mapping_file)?;

    let cache_config = if pip.cache_sessions {
        CacheConfig::default()
            .with_clock_skew(pip.binding.clock_skew())
            .with_entry_timeout(pip.cache_timeout_secs.map(Duration::from_secs))
    } else {
        CacheConfig::disabled()
    };

    let store: Arc<dyn CacheStore> = match pip.cache_data_dir.as_deref() {
        Some(dir) if pip.cache_sessions => Arc::new(FileStore::open(Path::new(dir))?),
        _ => Arc::new(MemoryStore),
    };

    let cache = Arc::new(DecisionCache::with_parts(
        ATTRIBUTE_CACHE,
        cache_config.clone(),
        store,
        clock,
    ));

    let resolver_config = ResolverConfig::default()
        .with_query(query_template(&pip.query))
        .with_timeout(pip.binding.timeout())
        .with_cache(cache_config);

    Ok(AttributeResolver::with_cache(
        resolver_config,
        mapping,
        transport,
        cache,
    ))
}

fn query_template(query: &QueryConfig) -> QueryTemplate {
    QueryTemplate::default()
        .with_issuer(query.issuer_name.clone(), query.issuer_format.clone())
        .with_subject_id_format(query.subject_id_format.clone())
        .with_action(query.action.clone())
}
