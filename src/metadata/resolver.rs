//! Per-field metadata recovery waterfall.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::tiers::{
    container_alias_keys, first_value, layer_alias_keys, scan_metadata, split_columns, AliasTier,
    DomainTier, KeyMatcher, TierError, DOMAIN_MARKERS, FIELD_ALIAS_KEYS, PRIMARY_KEY_MARKERS,
};
use super::LayerMetadata;
use crate::catalog::{load_catalog, normalize_code, CatalogLocator, CatalogParser, CodeMap};
use crate::catalog::{DomainCatalog, RegexCatalogParser};
use crate::config::{LocatorConfig, MetadataOptions};
use crate::source::{FieldDefinition, LayerSchema, MetadataMap, SourceContainer};

/// Rows read by the data sampling tier.
pub const DEFAULT_SAMPLE_LIMIT: usize = 10_000;

/// Primary key reported when a layer declares none.
pub const DEFAULT_PRIMARY_KEY: &str = "ogc_fid";

/// Recovers aliases, domain values and keys for the layers of one container.
///
/// Owns the container's domain catalog, loaded on first use and kept for
/// the lifetime of the resolver.
pub struct MetadataResolver {
    source: Arc<dyn SourceContainer>,
    locator: CatalogLocator,
    parser: Box<dyn CatalogParser>,
    catalog: OnceCell<DomainCatalog>,
    sample_limit: usize,
    tier_calls: [AtomicUsize; 5],
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn SourceContainer>) -> Self {
        Self {
            source,
            locator: CatalogLocator::default(),
            parser: Box::new(RegexCatalogParser::new()),
            catalog: OnceCell::new(),
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            tier_calls: Default::default(),
        }
    }

    pub fn with_locator_config(mut self, config: LocatorConfig) -> Self {
        self.locator = CatalogLocator::new(config);
        self
    }

    pub fn with_parser(mut self, parser: Box<dyn CatalogParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Number of times `tier` has been attempted.
    pub fn tier_calls(&self, tier: DomainTier) -> usize {
        self.tier_calls[tier.index()].load(Ordering::Relaxed)
    }

    /// Domain catalog of the container, loaded once.
    pub async fn catalog(&self) -> &DomainCatalog {
        self.catalog
            .get_or_init(|| load_catalog(&self.locator, self.parser.as_ref(), self.source.path()))
            .await
    }

    /// Extract the enabled metadata categories of `layer`.
    pub async fn extract(&self, layer: &str, options: MetadataOptions) -> LayerMetadata {
        let Some(schema) = self.schema(layer).await else {
            return LayerMetadata::default();
        };

        let mut metadata = LayerMetadata::default();
        if options.aliases {
            metadata.field_aliases = self.aliases_for(&schema).await;
        }
        if options.domains {
            metadata.domain_values = self.domains_for(&schema).await;
        }
        if options.primary_keys {
            metadata.primary_keys = primary_keys_for(&schema);
        }
        if options.triggers {
            metadata.triggers = self.triggers(layer);
        }
        metadata
    }

    /// Field name to alias. Aliases equal to the field name are omitted.
    pub async fn field_aliases(&self, layer: &str) -> BTreeMap<String, String> {
        match self.schema(layer).await {
            Some(schema) => self.aliases_for(&schema).await,
            None => BTreeMap::new(),
        }
    }

    /// Field name to recovered code map, for domain-bound fields.
    pub async fn domain_values(&self, layer: &str) -> BTreeMap<String, CodeMap> {
        match self.schema(layer).await {
            Some(schema) => self.domains_for(&schema).await,
            None => BTreeMap::new(),
        }
    }

    /// Primary key columns: the native row identifier plus any declared in
    /// layer metadata, or the synthetic default when there are none.
    pub async fn primary_keys(&self, layer: &str) -> Vec<String> {
        match self.schema(layer).await {
            Some(schema) => primary_keys_for(&schema),
            None => Vec::new(),
        }
    }

    /// Trigger definitions. Not recoverable from the source; always empty.
    pub fn triggers(&self, layer: &str) -> Vec<String> {
        debug!(layer, "Trigger extraction is not supported");
        Vec::new()
    }

    async fn schema(&self, layer: &str) -> Option<LayerSchema> {
        match self.source.layer(layer).await {
            Ok(Some(schema)) => Some(schema),
            Ok(None) => {
                debug!(layer, "Layer not found in source, no metadata");
                None
            }
            Err(e) => {
                debug!(layer, error = %e, "Failed to read layer schema");
                None
            }
        }
    }

    async fn container_metadata(&self) -> Result<MetadataMap, TierError> {
        Ok(self.source.metadata().await?)
    }

    // Aliases

    async fn aliases_for(&self, schema: &LayerSchema) -> BTreeMap<String, String> {
        let mut aliases = BTreeMap::new();
        for (index, field) in schema.fields.iter().enumerate() {
            if let Some((tier, alias)) = self.resolve_alias(schema, field, index).await {
                debug!(field = %field.name, alias = %alias, ?tier, "Alias found");
                aliases.insert(field.name.clone(), alias);
            }
        }
        aliases
    }

    async fn resolve_alias(
        &self,
        schema: &LayerSchema,
        field: &FieldDefinition,
        index: usize,
    ) -> Option<(AliasTier, String)> {
        for tier in AliasTier::ALL {
            let found = match tier {
                AliasTier::Native => Ok(field.alias.clone()),
                AliasTier::LayerMetadata => Ok(first_value(
                    &schema.metadata,
                    &layer_alias_keys(&field.name, index),
                )),
                AliasTier::ContainerMetadata => self.container_metadata().await.map(|metadata| {
                    first_value(
                        &metadata,
                        &container_alias_keys(schema.name(), &field.name, index),
                    )
                }),
                AliasTier::FieldMetadata => Ok(first_value(&field.metadata, FIELD_ALIAS_KEYS)),
            };

            match found {
                Ok(Some(alias)) if !alias.is_empty() && alias != field.name => {
                    return Some((tier, alias))
                }
                Ok(_) => {}
                Err(e) => debug!(field = %field.name, ?tier, error = %e, "Alias tier failed"),
            }
        }
        None
    }

    // Domains

    async fn domains_for(&self, schema: &LayerSchema) -> BTreeMap<String, CodeMap> {
        let mut domains = BTreeMap::new();
        for field in &schema.fields {
            let Some(domain) = field.domain_name.as_deref() else {
                continue;
            };
            if let Some((tier, values)) = self.resolve_domain(schema, field, domain).await {
                info!(
                    layer = %schema.name(),
                    field = %field.name,
                    values = values.len(),
                    %tier,
                    "Domain values recovered"
                );
                domains.insert(field.name.clone(), values);
            }
        }
        domains
    }

    /// Run the tiers in order until one yields a non-empty code map.
    async fn resolve_domain(
        &self,
        schema: &LayerSchema,
        field: &FieldDefinition,
        domain: &str,
    ) -> Option<(DomainTier, CodeMap)> {
        for tier in DomainTier::ALL {
            self.tier_calls[tier.index()].fetch_add(1, Ordering::Relaxed);
            match self.domain_tier(tier, schema, field, domain).await {
                Ok(values) if !values.is_empty() => return Some((tier, values)),
                Ok(_) => {}
                Err(e) => {
                    debug!(field = %field.name, domain, %tier, error = %e, "Domain tier failed")
                }
            }
        }
        None
    }

    async fn domain_tier(
        &self,
        tier: DomainTier,
        schema: &LayerSchema,
        field: &FieldDefinition,
        domain: &str,
    ) -> Result<CodeMap, TierError> {
        match tier {
            DomainTier::Catalog => Ok(self.catalog().await.get(domain).cloned().unwrap_or_default()),
            DomainTier::LayerMetadata => scan_metadata(
                &schema.metadata,
                &KeyMatcher::new([field.name.as_str(), domain], DOMAIN_MARKERS),
            ),
            DomainTier::ContainerMetadata => scan_metadata(
                &self.container_metadata().await?,
                &KeyMatcher::new([schema.name(), field.name.as_str(), domain], DOMAIN_MARKERS),
            ),
            DomainTier::FieldMetadata => {
                scan_metadata(&field.metadata, &KeyMatcher::markers(DOMAIN_MARKERS))
            }
            DomainTier::DataSampling => self.sample_values(schema.name(), &field.name).await,
        }
    }

    /// Distinct values of `field` in the first rows of `layer`, turned into
    /// codes without real descriptions.
    async fn sample_values(&self, layer: &str, field: &str) -> Result<CodeMap, TierError> {
        let rows = self.source.read_rows(layer, self.sample_limit).await?;
        let distinct: BTreeSet<&str> = rows
            .iter()
            .filter_map(|row| row.get(field))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .collect();

        if !distinct.is_empty() {
            debug!(layer, field, distinct = distinct.len(), "Sampled codes without descriptions");
        }
        Ok(distinct.into_iter().map(sampled_entry).collect())
    }
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("source", &self.source.path())
            .field("catalog_loaded", &self.catalog.initialized())
            .field("sample_limit", &self.sample_limit)
            .finish()
    }
}

/// Code and placeholder description for one sampled value.
fn sampled_entry(value: &str) -> (i64, String) {
    let description = if value.parse::<i64>().is_ok() {
        format!("Value {value}")
    } else {
        value.to_string()
    };
    (normalize_code(value), description)
}

fn primary_keys_for(schema: &LayerSchema) -> Vec<String> {
    let mut keys: Vec<String> = schema.fid_column.iter().cloned().collect();

    let matcher = KeyMatcher::markers(PRIMARY_KEY_MARKERS);
    let declared = schema
        .metadata
        .iter()
        .filter(|(key, _)| matcher.matches(key))
        .flat_map(|(_, value)| split_columns(value));

    for column in declared {
        if !keys.iter().any(|k| k == column) {
            keys.push(column.to_string());
        }
    }

    if keys.is_empty() {
        keys.push(DEFAULT_PRIMARY_KEY.to_string());
    }
    keys
}
