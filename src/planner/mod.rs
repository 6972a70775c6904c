//! Step Planner
//!
//! Turns job parameters into an ordered, weighted step plan and estimates how
//! long the whole plan will take. Fast (depth 1) plans drop the optional
//! modules and collapse every deliberation round into a single decision step;
//! deeper plans add research and risk debate rounds that scale with depth.

pub mod timings;

pub use timings::StepTimings;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::PlannerConfig;
use crate::errors::{ProgressError, ProgressResult};
use crate::models::{AnalysisModule, JobParameters, MAX_DEPTH, MIN_DEPTH, StepInfo};

/// Static step durations in seconds, used until history exists
const PREPARE_SECS: f64 = 5.0;
const DEBATE_ROUND_SECS: f64 = 20.0;
const RESEARCH_JUDGEMENT_SECS: f64 = 15.0;
const TRADING_PLAN_SECS: f64 = 15.0;
const RISK_ROUND_SECS: f64 = 15.0;
const RISK_JUDGEMENT_SECS: f64 = 15.0;
const DECISION_SECS: f64 = 25.0;
const REPORT_SECS: f64 = 10.0;

fn module_default_secs(module: AnalysisModule) -> f64 {
    match module {
        AnalysisModule::Market => 30.0,
        AnalysisModule::Fundamentals => 40.0,
        AnalysisModule::News => 25.0,
        AnalysisModule::Social => 25.0,
    }
}

fn module_description(module: AnalysisModule) -> &'static str {
    match module {
        AnalysisModule::Market => "Market analyst reviews price action and technical indicators",
        AnalysisModule::Fundamentals => "Fundamentals analyst reviews financial statements",
        AnalysisModule::News => "News analyst reviews recent headlines",
        AnalysisModule::Social => "Sentiment analyst reviews social media discussion",
    }
}

/// A step before its duration has been estimated
#[derive(Debug, Clone)]
struct StepDraft {
    name: String,
    description: String,
    default_secs: f64,
}

impl StepDraft {
    fn new(name: impl Into<String>, description: impl Into<String>, default_secs: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default_secs,
        }
    }
}

/// Ordered, weighted plan for one job
#[derive(Debug, Clone, PartialEq)]
pub struct StepPlan {
    pub steps: Vec<StepInfo>,
    pub estimated_total_time: f64,
    /// Effective parameters after depth clamping and module filtering
    pub parameters: Option<JobParameters>,
}

impl StepPlan {
    /// Build a plan from caller-defined phases.
    ///
    /// When `estimated_total_time` is `None` the sum of the step weights is
    /// used, so weights are read as seconds.
    pub fn from_steps(
        steps: Vec<StepInfo>,
        estimated_total_time: Option<f64>,
    ) -> ProgressResult<Self> {
        if steps.is_empty() {
            return Err(ProgressError::invalid_parameters(
                "a step plan needs at least one step",
            ));
        }
        if let Some(step) = steps.iter().find(|s| !s.weight.is_finite() || s.weight < 0.0) {
            return Err(ProgressError::invalid_parameters(format!(
                "step '{}' has invalid weight {}",
                step.name, step.weight
            )));
        }

        let estimated_total_time =
            estimated_total_time.unwrap_or_else(|| steps.iter().map(|s| s.weight).sum());

        Ok(Self {
            steps,
            estimated_total_time: estimated_total_time.max(0.0),
            parameters: None,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn depth(&self) -> Option<u8> {
        self.parameters.as_ref().map(|p| p.depth)
    }

    pub fn total_weight(&self) -> f64 {
        self.steps.iter().map(|s| s.weight).sum()
    }
}

/// Produces step plans from job parameters
#[derive(Debug, Clone)]
pub struct StepPlanner {
    provider_factors: HashMap<String, f64>,
    timings: Arc<StepTimings>,
}

impl StepPlanner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self::with_timings(config, Arc::new(StepTimings::new()))
    }

    pub fn with_timings(config: &PlannerConfig, timings: Arc<StepTimings>) -> Self {
        let provider_factors = config
            .provider_factors
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), *v))
            .collect();
        Self {
            provider_factors,
            timings,
        }
    }

    /// Shared step-duration history; hand this to trackers so they can feed it
    pub fn timings(&self) -> Arc<StepTimings> {
        Arc::clone(&self.timings)
    }

    /// Duration multiplier for a provider; unknown providers get 1.0
    pub fn provider_factor(&self, provider: &str) -> f64 {
        self.provider_factors
            .get(&provider.to_ascii_lowercase())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn plan(&self, params: &JobParameters) -> ProgressResult<StepPlan> {
        let mut modules: Vec<AnalysisModule> = Vec::with_capacity(params.modules.len());
        for module in &params.modules {
            if !modules.contains(module) {
                modules.push(*module);
            }
        }
        if modules.is_empty() {
            return Err(ProgressError::invalid_parameters(
                "at least one analysis module must be selected",
            ));
        }

        let depth = params.depth.clamp(MIN_DEPTH, MAX_DEPTH);
        if depth != params.depth {
            warn!(
                "Research depth {} out of range, clamped to {}",
                params.depth, depth
            );
        }

        let drafts = if depth == MIN_DEPTH {
            modules.retain(|m| !m.is_optional());
            if modules.is_empty() {
                // only optional modules were requested; keep a market pass so
                // the fast plan still analyses something
                modules.push(AnalysisModule::Market);
            }
            fast_drafts(&modules)
        } else {
            full_drafts(&modules, depth)
        };

        let factor = self.provider_factor(&params.provider);
        let steps: Vec<StepInfo> = drafts
            .into_iter()
            .map(|draft| {
                let secs = self
                    .timings
                    .average(&draft.name)
                    .unwrap_or(draft.default_secs);
                StepInfo::new(draft.name, draft.description, secs)
            })
            .collect();
        let estimated_total_time = steps.iter().map(|s| s.weight).sum::<f64>() * factor;

        debug!(
            "Planned {} steps at depth {} for provider '{}' (~{:.0}s)",
            steps.len(),
            depth,
            params.provider,
            estimated_total_time
        );

        Ok(StepPlan {
            steps,
            estimated_total_time,
            parameters: Some(JobParameters::new(modules, depth, params.provider.clone())),
        })
    }
}

fn analysis_drafts(modules: &[AnalysisModule]) -> impl Iterator<Item = StepDraft> + '_ {
    modules.iter().map(|m| {
        StepDraft::new(
            format!("{}_analysis", m.as_str()),
            module_description(*m),
            module_default_secs(*m),
        )
    })
}

fn fast_drafts(modules: &[AnalysisModule]) -> Vec<StepDraft> {
    let mut drafts: Vec<StepDraft> = analysis_drafts(modules).collect();
    drafts.push(StepDraft::new(
        "decision",
        "Combined research, trading and risk decision",
        DECISION_SECS,
    ));
    drafts.push(StepDraft::new("report", "Compile the final report", REPORT_SECS));
    drafts
}

fn full_drafts(modules: &[AnalysisModule], depth: u8) -> Vec<StepDraft> {
    let mut drafts = vec![StepDraft::new(
        "prepare",
        "Validate parameters and prepare data sources",
        PREPARE_SECS,
    )];
    drafts.extend(analysis_drafts(modules));

    for round in 1..depth {
        drafts.push(StepDraft::new(
            format!("debate_round_{round}"),
            format!("Bull and bear researchers debate, round {round}"),
            DEBATE_ROUND_SECS,
        ));
    }
    drafts.push(StepDraft::new(
        "research_judgement",
        "Research manager weighs the debate",
        RESEARCH_JUDGEMENT_SECS,
    ));
    drafts.push(StepDraft::new(
        "trading_plan",
        "Trader drafts the trading plan",
        TRADING_PLAN_SECS,
    ));

    let risk_rounds = (depth / 2).max(1);
    for round in 1..=risk_rounds {
        drafts.push(StepDraft::new(
            format!("risk_round_{round}"),
            format!("Risk analysts debate exposure, round {round}"),
            RISK_ROUND_SECS,
        ));
    }
    drafts.push(StepDraft::new(
        "risk_judgement",
        "Risk manager issues the final decision",
        RISK_JUDGEMENT_SECS,
    ));
    drafts.push(StepDraft::new("report", "Compile the final report", REPORT_SECS));
    drafts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> StepPlanner {
        StepPlanner::new(&PlannerConfig::default())
    }

    fn names(plan: &StepPlan) -> Vec<&str> {
        plan.steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_fast_plan_drops_optional_modules() {
        let params = JobParameters::new(AnalysisModule::ALL.to_vec(), 1, "openai");
        let plan = planner().plan(&params).unwrap();

        assert_eq!(
            names(&plan),
            vec!["market_analysis", "fundamentals_analysis", "decision", "report"]
        );
        let effective = plan.parameters.unwrap();
        assert_eq!(
            effective.modules,
            vec![AnalysisModule::Market, AnalysisModule::Fundamentals]
        );
    }

    #[test]
    fn test_fast_plan_is_shorter_than_standard() {
        let modules = vec![AnalysisModule::Market];
        let fast = planner().plan(&JobParameters::new(modules.clone(), 1, "openai")).unwrap();
        let standard = planner().plan(&JobParameters::new(modules, 2, "openai")).unwrap();

        assert_eq!(fast.len(), 3);
        assert!(fast.len() < standard.len());
        assert!(fast.estimated_total_time < standard.estimated_total_time);
    }

    #[test]
    fn test_rounds_scale_with_depth() {
        let params = JobParameters::new(vec![AnalysisModule::Market], 4, "openai");
        let plan = planner().plan(&params).unwrap();
        let names = names(&plan);

        assert_eq!(names.iter().filter(|n| n.starts_with("debate_round_")).count(), 3);
        assert_eq!(names.iter().filter(|n| n.starts_with("risk_round_")).count(), 2);
        assert_eq!(names.first(), Some(&"prepare"));
        assert_eq!(names.last(), Some(&"report"));
    }

    #[test]
    fn test_depth_is_clamped() {
        let params = JobParameters::new(vec![AnalysisModule::Market], 9, "openai");
        let plan = planner().plan(&params).unwrap();
        assert_eq!(plan.depth(), Some(MAX_DEPTH));

        let params = JobParameters::new(vec![AnalysisModule::Market], 0, "openai");
        let plan = planner().plan(&params).unwrap();
        assert_eq!(plan.depth(), Some(MIN_DEPTH));
    }

    #[test]
    fn test_empty_modules_rejected() {
        let params = JobParameters::new(vec![], 2, "openai");
        let err = planner().plan(&params).unwrap_err();
        assert!(matches!(err, ProgressError::InvalidParameters { .. }));
    }

    #[test]
    fn test_provider_factor_scales_estimate() {
        let params = JobParameters::new(vec![AnalysisModule::Market], 2, "openai");
        let base = planner().plan(&params).unwrap();
        let params = JobParameters::new(vec![AnalysisModule::Market], 2, "DeepSeek");
        let scaled = planner().plan(&params).unwrap();

        let expected = base.estimated_total_time * 0.8;
        assert!((scaled.estimated_total_time - expected).abs() < 1e-9);
        assert_eq!(planner().provider_factor("unheard-of"), 1.0);
    }

    #[test]
    fn test_history_overrides_static_defaults() {
        let timings = Arc::new(StepTimings::new());
        timings.record("report", 100.0);
        let planner = StepPlanner::with_timings(&PlannerConfig::default(), timings);

        let params = JobParameters::new(vec![AnalysisModule::Market], 1, "openai");
        let plan = planner.plan(&params).unwrap();
        let report = plan.steps.iter().find(|s| s.name == "report").unwrap();
        assert_eq!(report.weight, 100.0);
        assert_eq!(plan.estimated_total_time, 30.0 + 25.0 + 100.0);
    }

    #[test]
    fn test_from_steps() {
        let plan = StepPlan::from_steps(
            vec![StepInfo::new("a", "first", 2.0), StepInfo::new("b", "second", 3.0)],
            None,
        )
        .unwrap();
        assert_eq!(plan.estimated_total_time, 5.0);
        assert_eq!(plan.depth(), None);

        assert!(StepPlan::from_steps(vec![], None).is_err());
        assert!(StepPlan::from_steps(vec![StepInfo::new("a", "bad", f64::NAN)], None).is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn modules_strategy() -> impl Strategy<Value = Vec<AnalysisModule>> {
            proptest::sample::subsequence(AnalysisModule::ALL.to_vec(), 1..=4)
        }

        proptest! {
            #[test]
            fn plans_are_well_formed(modules in modules_strategy(), depth in 1u8..=5) {
                let plan = planner()
                    .plan(&JobParameters::new(modules, depth, "openai"))
                    .unwrap();

                prop_assert!(!plan.is_empty());
                prop_assert!(plan.steps.iter().all(|s| s.weight > 0.0));
                prop_assert!(plan.estimated_total_time > 0.0);
                prop_assert_eq!(plan.steps.last().map(|s| s.name.as_str()), Some("report"));
            }

            #[test]
            fn fast_plans_collapse(modules in modules_strategy(), depth in 2u8..=5) {
                let fast = planner()
                    .plan(&JobParameters::new(modules.clone(), 1, "openai"))
                    .unwrap();
                let deeper = planner()
                    .plan(&JobParameters::new(modules, depth, "openai"))
                    .unwrap();

                prop_assert!(fast.len() < deeper.len());
                prop_assert!(!fast.steps.iter().any(|s| s.name.starts_with("news") || s.name.starts_with("social")));
            }

            #[test]
            fn deeper_plans_never_shrink(modules in modules_strategy(), depth in 2u8..5) {
                let shallow = planner()
                    .plan(&JobParameters::new(modules.clone(), depth, "openai"))
                    .unwrap();
                let deep = planner()
                    .plan(&JobParameters::new(modules, depth + 1, "openai"))
                    .unwrap();
                prop_assert!(deep.len() > shallow.len());
            }
        }
    }
}
