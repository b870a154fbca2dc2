//! Layered fix-rule resolution
//!
//! Two independent lookups produce at most one layer each:
//!
//! 1. the family layer, `fixer_name.<name>`, with its `parent` chain merged in
//!    (the parent is the base, the child wins);
//! 2. the source layer, `models.<model>.<exp>.<source>`, falling back to the
//!    `default` experiment and then to the `default` source.
//!
//! The source layer's `method` decides how the two combine.

use super::rules::{merge, EffectiveFixRule, FixConfig, MergeMethod, RuleBlock};
use crate::errors::{ClimNormError, Result};
use log::{debug, info, warn};

/// Where a rule layer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Family,
    Source,
}

/// A rule block tagged with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct RuleLayer {
    pub kind: LayerKind,
    /// Dotted path of the block in the configuration
    pub name: String,
    pub block: RuleBlock,
}

/// Resolves effective rules from a [`FixConfig`]
#[derive(Debug, Clone, Copy)]
pub struct FixRuleResolver<'a> {
    config: &'a FixConfig,
}

impl<'a> FixRuleResolver<'a> {
    pub fn new(config: &'a FixConfig) -> Self {
        Self { config }
    }

    /// Family rule `name` with its parent chain merged in.
    ///
    /// # Errors
    ///
    /// Returns [`ClimNormError::Config`] on a cyclic or dangling `parent`.
    pub fn family_rule(&self, name: &str) -> Result<Option<RuleLayer>> {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = name;
        let mut blocks: Vec<&RuleBlock> = Vec::new();
        loop {
            if chain.contains(&current) {
                return Err(ClimNormError::Config(format!(
                    "fixer '{name}' has a cyclic parent chain: {} -> {current}",
                    chain.join(" -> ")
                )));
            }
            let Some(block) = self.config.fixer_name.get(current) else {
                if chain.is_empty() {
                    return Ok(None);
                }
                return Err(ClimNormError::Config(format!(
                    "fixer '{}' declares unknown parent '{current}'",
                    chain[chain.len() - 1]
                )));
            };
            chain.push(current);
            blocks.push(block);
            match block.parent.as_deref() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        let mut merged = RuleBlock::default();
        for block in blocks.iter().rev() {
            merged = merge(&merged, block, MergeMethod::Merge);
        }
        merged.parent = None;
        debug!("fixer family chain: {}", chain.join(" <- "));
        Ok(Some(RuleLayer {
            kind: LayerKind::Family,
            name: chain.join("<-"),
            block: merged,
        }))
    }

    /// Experiment/source rule for `model`, with `default` fallbacks
    pub fn source_rule(&self, model: &str, exp: &str, source: &str) -> Option<RuleLayer> {
        let exps = self.config.models.get(model)?;
        let (exp_key, sources) = exps
            .get_key_value(exp)
            .or_else(|| exps.get_key_value("default"))?;
        let (src_key, block) = sources
            .get_key_value(source)
            .or_else(|| sources.get_key_value("default"))?;
        Some(RuleLayer {
            kind: LayerKind::Source,
            name: format!("{model}.{exp_key}.{src_key}"),
            block: block.clone(),
        })
    }

    /// Resolve the effective rule for `(model, exp, source)`.
    ///
    /// `fixer_name` defaults to `{model}-default`. Returns `None` when no
    /// layer exists; the caller then passes data through unchanged.
    pub fn resolve(
        &self,
        model: &str,
        exp: &str,
        source: &str,
        fixer_name: Option<&str>,
    ) -> Result<Option<EffectiveFixRule>> {
        let family_name = fixer_name.map_or_else(|| format!("{model}-default"), str::to_string);
        let family = self.family_rule(&family_name)?;
        let specific = self.source_rule(model, exp, source);

        let (name, block) = match (family, specific) {
            (Some(f), Some(s)) => {
                let method = s.block.method.unwrap_or_default();
                info!("combining fixer {} with {} using {method:?}", f.name, s.name);
                let name = match method {
                    MergeMethod::Replace => s.name.clone(),
                    MergeMethod::Default => f.name.clone(),
                    MergeMethod::Merge => format!("{}+{}", f.name, s.name),
                };
                (name, merge(&f.block, &s.block, method))
            }
            (Some(layer), None) | (None, Some(layer)) => {
                info!("using fixer {}", layer.name);
                (layer.name, layer.block)
            }
            (None, None) => {
                warn!("no fix rule found for {model}/{exp}/{source}, data will not be fixed");
                return Ok(None);
            }
        };
        EffectiveFixRule::from_block(&name, block).map(Some)
    }
}
