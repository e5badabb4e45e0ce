use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::bucketing::murmur_hash;
use crate::config::ProjectConfig;
use crate::decision::{DecideOption, DecideOptions};
use crate::{Attributes, Error, Result, UserContext};

use super::{CmabCache, CmabCacheEntry, CmabClient, InMemoryCmabCache};

/// A variation chosen by the CMAB model, with the id of that decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmabDecision {
    pub variation_id: String,
    pub cmab_uuid: Uuid,
}

/// Serves CMAB decisions, caching them per user and rule for as long as the user's relevant
/// attributes don't change.
pub struct CmabService {
    cache: Arc<dyn CmabCache>,
    client: Arc<dyn CmabClient>,
}

impl CmabService {
    pub fn new(cache: Arc<dyn CmabCache>, client: Arc<dyn CmabClient>) -> CmabService {
        CmabService { cache, client }
    }

    /// Service backed by an [`InMemoryCmabCache`].
    pub fn with_client(client: Arc<dyn CmabClient>) -> CmabService {
        CmabService::new(Arc::new(InMemoryCmabCache::new()), client)
    }

    pub fn cache(&self) -> &Arc<dyn CmabCache> {
        &self.cache
    }

    /// Get the CMAB decision for `user` on rule `rule_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CmabFetchFailed`] (or whatever the client returned) when the remote call
    /// fails. Nothing is cached in that case.
    pub async fn get_decision(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        rule_id: &str,
        options: &DecideOptions,
    ) -> Result<CmabDecision> {
        let user_id = user.user_id();
        let attributes = filter_attributes(config, user, rule_id);

        if options.contains(DecideOption::IgnoreCmabCache) {
            return self.fetch(rule_id, user_id, &attributes).await;
        }

        if options.contains(DecideOption::ResetCmabCache) {
            self.cache.reset();
        }

        let key = cache_key(user_id, rule_id);

        if options.contains(DecideOption::InvalidateUserCmabCache) {
            self.cache.remove(&key);
        }

        let attributes_hash = hash_attributes(rule_id, &attributes)?;

        if let Some(entry) = self.cache.lookup(&key) {
            if entry.attributes_hash == attributes_hash {
                log::debug!(target: "decision_engine", rule_id, user_id; "using cached CMAB decision");
                return Ok(CmabDecision {
                    variation_id: entry.variation_id,
                    cmab_uuid: entry.cmab_uuid,
                });
            }
            self.cache.remove(&key);
        }

        let decision = self.fetch(rule_id, user_id, &attributes).await?;
        self.cache.save(
            &key,
            CmabCacheEntry {
                attributes_hash,
                variation_id: decision.variation_id.clone(),
                cmab_uuid: decision.cmab_uuid,
            },
        );
        Ok(decision)
    }

    async fn fetch(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<CmabDecision> {
        let cmab_uuid = uuid::Builder::from_random_bytes(rand::random()).into_uuid();
        let variation_id = self
            .client
            .fetch_decision(rule_id, user_id, attributes, cmab_uuid)
            .await?;
        Ok(CmabDecision {
            variation_id,
            cmab_uuid,
        })
    }
}

impl std::fmt::Debug for CmabService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmabService").finish_non_exhaustive()
    }
}

/// User attributes restricted to the ones the rule's model consumes.
fn filter_attributes(config: &ProjectConfig, user: &UserContext, rule_id: &str) -> Attributes {
    let Some(cmab) = config
        .experiment_by_id(rule_id)
        .and_then(|rule| rule.cmab.as_ref())
    else {
        return Attributes::new();
    };

    cmab.attribute_ids
        .iter()
        .filter_map(|id| config.attribute_by_id(id))
        .filter_map(|attribute| {
            user.attribute(&attribute.key)
                .map(|value| (attribute.key.clone(), value.clone()))
        })
        .collect()
}

fn cache_key(user_id: &str, rule_id: &str) -> String {
    format!("{}-{}-{}", user_id.len(), user_id, rule_id)
}

/// Hash of the attributes serialized with sorted keys, so insertion order doesn't matter.
fn hash_attributes(rule_id: &str, attributes: &Attributes) -> Result<u32> {
    let sorted: BTreeMap<&str, _> = attributes.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let canonical = serde_json::to_string(&sorted).map_err(|err| Error::CmabFetchFailed {
        rule_id: rule_id.to_owned(),
        message: format!("cannot serialize attributes: {err}"),
    })?;
    murmur_hash(canonical.as_bytes()).map_err(|err| Error::InvalidBucketingInput {
        key: canonical,
        source: Arc::new(err),
    })
}
