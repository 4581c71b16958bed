//! Multi-window ensemble scoring.
//!
//! Each lookback window contributes `weight × P(high growth)` from its own
//! model. A window without a model borrows the unscoped default model and is
//! marked as a fallback in the output. Window scores are computed in
//! parallel and summed in sorted window order.

use crate::forecast::artifacts::{ModelArtifact, ModelTag};
use crate::forecast::config::EnsembleConfig;
use crate::forecast::context::PipelineContext;
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::export::{RankedContract, WindowContribution};
use crate::forecast::features::{ContractFeatureVector, FeatureTable};
use crate::forecast::graph::ContractTokens;
use crate::forecast::resolver::TokenResolver;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A loaded model serving one window.
#[derive(Debug, Clone)]
pub struct WindowModel {
    pub window: String,
    pub weight: f64,
    pub fallback: bool,
    pub artifact: Arc<ModelArtifact>,
}

impl WindowModel {
    pub fn contribution(&self) -> WindowContribution {
        WindowContribution {
            window: self.window.clone(),
            weight: self.weight,
            fallback: self.fallback,
        }
    }
}

/// Load one model per window, substituting the default model where a
/// window has none. Windows with no model at all are skipped.
pub fn load_window_models(ctx: &PipelineContext, windows: &[String]) -> Result<Vec<WindowModel>> {
    let windows: BTreeSet<String> = windows
        .iter()
        .map(|w| w.trim().to_uppercase())
        .filter(|w| !w.is_empty())
        .collect();
    let mut models = Vec::new();
    let mut default_model: Option<Option<Arc<ModelArtifact>>> = None;

    for window in &windows {
        let weight = ctx.config.ensemble.weight_for(window);
        match ctx.artifacts.load_model(&ModelTag::lookback(window)) {
            Ok(artifact) => {
                info!("Loaded {} model (weight {:.0}%)", window, weight * 100.0);
                models.push(WindowModel {
                    window: window.clone(),
                    weight,
                    fallback: false,
                    artifact,
                });
                continue;
            }
            Err(PipelineError::ArtifactNotFound(key)) => {
                debug!("No {} model at {}", window, key);
            }
            Err(e) => {
                warn!("Could not load {} model: {}", window, e);
            }
        }

        let fallback = default_model.get_or_insert_with(|| {
            match ctx.artifacts.load_model(&ModelTag::Default) {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    warn!("Default model unavailable: {}", e);
                    None
                }
            }
        });
        match fallback {
            Some(artifact) => {
                warn!(
                    "Window {} has no model; using the default model (weight {:.0}%)",
                    window,
                    weight * 100.0
                );
                models.push(WindowModel {
                    window: window.clone(),
                    weight,
                    fallback: true,
                    artifact: artifact.clone(),
                });
            }
            None => warn!("Skipping window {}: no model and no default", window),
        }
    }

    if models.is_empty() {
        return Err(PipelineError::artifact_not_found(format!(
            "models for windows [{}]",
            windows.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }
    Ok(models)
}

/// Weighted sum of every model's positive-class probability, per contract.
pub fn combine_scores(models: &[WindowModel], features: &[ContractFeatureVector]) -> Vec<f64> {
    let mut ordered: Vec<&WindowModel> = models.iter().collect();
    ordered.sort_by(|a, b| a.window.cmp(&b.window));

    let weighted: Vec<Vec<f64>> = ordered
        .par_iter()
        .map(|m| {
            m.artifact
                .score(features)
                .into_iter()
                .map(|p| p * m.weight)
                .collect()
        })
        .collect();

    let mut combined = vec![0.0; features.len()];
    for scores in &weighted {
        for (total, s) in combined.iter_mut().zip(scores) {
            *total += s;
        }
    }
    combined
}

/// Rank contracts by score, highest first; ties go to the lower address.
/// Token fields carry raw addresses until [`select_top`] resolves them.
pub fn rank_contracts(
    table: &FeatureTable,
    scores: &[f64],
    contributions: &[WindowContribution],
) -> Vec<RankedContract> {
    let mut order: Vec<usize> = (0..table.vectors.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .total_cmp(&scores[a])
            .then_with(|| table.vectors[a].contract_address.cmp(&table.vectors[b].contract_address))
    });

    order
        .into_iter()
        .enumerate()
        .map(|(i, idx)| {
            let fv = &table.vectors[idx];
            RankedContract {
                rank: i + 1,
                contract_address: fv.contract_address.clone(),
                combined_score: scores[idx],
                tx_count: fv.tx_count,
                activity_span: fv.activity_span,
                token_display: String::new(),
                all_tokens: table
                    .tokens
                    .get(&fv.contract_address)
                    .map(|t| t.all().into_iter().collect())
                    .unwrap_or_default(),
                contributions: contributions.to_vec(),
            }
        })
        .collect()
}

// =============================================================================
// TOKEN FILTER
// =============================================================================

/// Accepts a contract only when every one of its token symbols is allowed.
#[derive(Debug, Clone)]
pub struct TokenFilter {
    allowed: HashSet<String>,
}

impl TokenFilter {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.as_ref().to_uppercase())
                .collect(),
        }
    }

    pub fn from_config(config: &EnsembleConfig) -> Self {
        Self::new(&config.allowed_tokens)
    }

    pub fn admits(&self, symbols: &[String]) -> bool {
        symbols.iter().all(|s| self.allowed.contains(&s.to_uppercase()))
    }

    pub fn rejected<'a>(&self, symbols: &'a [String]) -> Vec<&'a str> {
        symbols
            .iter()
            .filter(|s| !self.allowed.contains(&s.to_uppercase()))
            .map(String::as_str)
            .collect()
    }
}

fn token_display(symbols: &[String]) -> String {
    match symbols {
        [] => "Unknown".to_string(),
        [only] => only.clone(),
        [first, second, ..] => format!("{} / {}", first, second),
    }
}

/// Pick the top `top_k` contracts and resolve their token symbols.
///
/// Without a filter only the first two tokens of each contract are
/// resolved. With a filter, at most `top_k × scan_multiplier` candidates
/// are checked and checking stops once `top_k` pass. Ranks are renumbered.
pub fn select_top(
    ranked: &[RankedContract],
    tokens: &BTreeMap<String, ContractTokens>,
    resolver: &TokenResolver,
    top_k: usize,
    filter: Option<&TokenFilter>,
    scan_multiplier: usize,
) -> Vec<RankedContract> {
    let token_set = |contract: &str| tokens.get(contract).map(|t| t.all()).unwrap_or_default();

    let mut selected: Vec<RankedContract> = match filter {
        None => ranked
            .iter()
            .take(top_k)
            .map(|r| {
                let all = token_set(&r.contract_address);
                let mut symbols: Vec<String> = all.iter().take(2).map(|t| resolver.resolve(t)).collect();
                let display = token_display(&symbols);
                if all.len() > symbols.len() {
                    symbols.push(format!("... +{} more", all.len() - symbols.len()));
                }
                RankedContract {
                    token_display: display,
                    all_tokens: symbols,
                    ..r.clone()
                }
            })
            .collect(),
        Some(filter) => {
            let limit = top_k.saturating_mul(scan_multiplier.max(1));
            let mut passed = Vec::new();
            for r in ranked.iter().take(limit) {
                if passed.len() >= top_k {
                    break;
                }
                let symbols = resolver.resolve_all(&token_set(&r.contract_address));
                if filter.admits(&symbols) {
                    passed.push(RankedContract {
                        token_display: token_display(&symbols),
                        all_tokens: symbols,
                        ..r.clone()
                    });
                } else {
                    debug!(
                        "Excluding {}: disallowed tokens {}",
                        r.contract_address,
                        filter.rejected(&symbols).join(", ")
                    );
                }
            }
            if passed.len() < top_k {
                warn!(
                    "Only {} of {} requested contracts pass the token filter (scanned {})",
                    passed.len(),
                    top_k,
                    limit.min(ranked.len())
                );
            }
            passed
        }
    };

    for (i, r) in selected.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    selected
}

// =============================================================================
// SCORER
// =============================================================================

/// The full ranking plus the selected top contracts.
#[derive(Debug, Clone)]
pub struct EnsembleOutput {
    pub ranked: Vec<RankedContract>,
    pub top: Vec<RankedContract>,
}

pub struct EnsembleScorer<'a> {
    ctx: &'a PipelineContext,
    models: Vec<WindowModel>,
}

impl<'a> EnsembleScorer<'a> {
    pub fn load(ctx: &'a PipelineContext, windows: &[String]) -> Result<Self> {
        Ok(Self {
            ctx,
            models: load_window_models(ctx, windows)?,
        })
    }

    pub fn from_models(ctx: &'a PipelineContext, models: Vec<WindowModel>) -> Self {
        Self { ctx, models }
    }

    pub fn models(&self) -> &[WindowModel] {
        &self.models
    }

    pub fn contributions(&self) -> Vec<WindowContribution> {
        let mut out: Vec<WindowContribution> = self.models.iter().map(WindowModel::contribution).collect();
        out.sort_by(|a, b| a.window.cmp(&b.window));
        out
    }

    pub fn rank(&self, table: &FeatureTable) -> Vec<RankedContract> {
        let scores = combine_scores(&self.models, &table.vectors);
        rank_contracts(table, &scores, &self.contributions())
    }

    /// Rank `table`, then select the top `top_k`, optionally through the
    /// configured token allow-list.
    pub fn score(&self, table: &FeatureTable, top_k: usize, filter: bool) -> EnsembleOutput {
        let ranked = self.rank(table);
        let ensemble = &self.ctx.config.ensemble;
        let token_filter = filter.then(|| TokenFilter::from_config(ensemble));
        let top = select_top(
            &ranked,
            &table.tokens,
            &self.ctx.resolver,
            top_k,
            token_filter.as_ref(),
            ensemble.scan_multiplier,
        );
        info!(
            "Ensemble of {} model(s) ranked {} contracts; selected {}",
            self.models.len(),
            ranked.len(),
            top.len()
        );
        EnsembleOutput { ranked, top }
    }
}
