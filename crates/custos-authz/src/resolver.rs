//! Attribute resolution (PIP).
//!
//! Resolves one attribute for one subject by routing the request to the
//! Attribute Authority mapped for the attribute ID, answering from the
//! per-subject cache when a fresh assertion already holds the attribute.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::assertion::{Assertion, AttributeValue};
use crate::cache::DecisionCache;
use crate::config::{QueryTemplate, ResolverConfig};
use crate::error::{AuthzError, AuthzResult, TransportError};
use crate::mapping::AttributeAuthorityMap;
use crate::transport::{DecisionQueryTransport, QueryClient, QueryMessage};

/// Label of the attribute cache in logs and metrics.
pub const ATTRIBUTE_CACHE: &str = "attribute";

/// Policy Information Point backed by remote Attribute Authorities.
#[derive(Debug)]
pub struct AttributeResolver {
    mapping: RwLock<Arc<AttributeAuthorityMap>>,
    client: QueryClient,
    cache: Arc<DecisionCache>,
    query: QueryTemplate,
}

impl AttributeResolver {
    /// Create a resolver with an in-memory attribute cache.
    pub fn new(
        config: ResolverConfig,
        mapping: AttributeAuthorityMap,
        transport: Arc<dyn DecisionQueryTransport>,
    ) -> Self {
        let cache = Arc::new(DecisionCache::new(ATTRIBUTE_CACHE, config.cache.clone()));
        Self::with_cache(config, mapping, transport, cache)
    }

    /// Create a resolver sharing an existing cache.
    ///
    /// The cache's own configuration decides whether caching is enabled.
    pub fn with_cache(
        config: ResolverConfig,
        mapping: AttributeAuthorityMap,
        transport: Arc<dyn DecisionQueryTransport>,
        cache: Arc<DecisionCache>,
    ) -> Self {
        Self {
            mapping: RwLock::new(Arc::new(mapping)),
            client: QueryClient::new(transport, config.timeout),
            cache,
            query: config.query,
        }
    }

    /// The current mapping table.
    pub fn mapping(&self) -> Arc<AttributeAuthorityMap> {
        Arc::clone(&self.mapping.read())
    }

    /// Replace the mapping table. In-flight resolutions keep the table they
    /// started with.
    pub fn reload_mapping(&self, mapping: AttributeAuthorityMap) {
        let attributes = mapping.len();
        *self.mapping.write() = Arc::new(mapping);
        debug!(attributes, "reloaded attribute authority mapping");
    }

    /// The attribute cache.
    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    /// Resolve `attribute_id` in `attribute_format` for `subject`.
    ///
    /// Returns [`AuthzError::NoMappingFound`] when no authority answers the
    /// attribute, and the transport error unchanged when the query fails.
    /// An anonymous (empty) subject resolves to no values.
    #[instrument(skip(self), fields(endpoint = tracing::field::Empty))]
    pub async fn resolve(
        &self,
        subject: &str,
        attribute_id: &str,
        attribute_format: &str,
    ) -> AuthzResult<Vec<AttributeValue>> {
        let mapping = self.mapping();
        if mapping.is_empty() {
            return Err(AuthzError::config(
                "attribute authority mapping is empty",
            ));
        }

        let endpoint = mapping
            .endpoint_for(attribute_id)
            .ok_or_else(|| AuthzError::no_mapping(attribute_id))?
            .to_string();
        tracing::Span::current().record("endpoint", endpoint.as_str());

        if subject.is_empty() {
            debug!("anonymous subject, no attributes to resolve");
            return Ok(Vec::new());
        }

        // A hit needs a statement for this exact name and format. Other
        // attributes cached under the same authority do not count.
        if let Some(cached) = self.cache.lookup(subject, &endpoint) {
            if cached
                .iter()
                .any(|a| a.has_attribute(attribute_id, attribute_format))
            {
                debug!("attribute served from cache");
                return Ok(collect_values(&cached, attribute_id, attribute_format));
            }
        }

        let query = QueryMessage::attribute_query(&self.query, subject, attribute_id, attribute_format);
        let assertions = self.query_and_store(query, subject, endpoint).await?;

        let values = collect_values(&assertions, attribute_id, attribute_format);
        debug!(
            assertions = assertions.len(),
            values = values.len(),
            "attribute query answered"
        );
        Ok(values)
    }

    /// Send the query and cache its result on a separate task, so a caller
    /// dropped mid-query still leaves the answer cached.
    async fn query_and_store(
        &self,
        query: QueryMessage,
        subject: &str,
        endpoint: String,
    ) -> AuthzResult<Vec<Assertion>> {
        let client = self.client.clone();
        let cache = Arc::clone(&self.cache);
        let subject = subject.to_string();
        let task_endpoint = endpoint.clone();

        let task = tokio::spawn(async move {
            let response = client.send(&query, &task_endpoint).await?;
            cache.store(&subject, &task_endpoint, &response.assertions);
            cache.commit(&subject);
            Ok::<_, TransportError>(response.assertions)
        });

        match task.await {
            Ok(result) => result.map_err(AuthzError::from),
            Err(e) => Err(TransportError::connection(endpoint, format!("query task failed: {e}")).into()),
        }
    }
}

fn collect_values(
    assertions: &[Assertion],
    attribute_id: &str,
    attribute_format: &str,
) -> Vec<AttributeValue> {
    assertions
        .iter()
        .flat_map(|a| a.attribute_values(attribute_id, attribute_format))
        .cloned()
        .collect()
}
