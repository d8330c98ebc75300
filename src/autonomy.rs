//! Autonomy & Circuit Breaker: fixes per-level runtime limits and tool-call
//! thresholds, injects per-turn stage checkpoints, forces a final
//! reassessment pass before an apparently-finished session really ends, and
//! enforces a circuit breaker over the tool-call count and wall clock.

use std::time::{Duration, Instant};

/// Operating mode; CEO mode narrows parallelism and adds an executive report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Execution,
    Ceo,
}

/// Fixed per-level configuration, per §4.9.
#[derive(Debug, Clone, Copy)]
pub struct LevelConfig {
    pub level: u8,
    pub default_mode: OperatingMode,
    pub max_runtime: Duration,
    pub warn_at: u32,
    pub pause_at: u32,
    pub hard_stop_at: u32,
    pub max_parallel_tools: usize,
    pub compaction_ratio: f32,
    pub sub_agent_max_depth: u8,
    pub sub_agent_max_concurrency: usize,
    pub run_command_default_allow: bool,
}

/// Returns the fixed configuration for autonomy levels 1 through 5, clamping
/// out-of-range input to the nearest valid level.
pub fn level_config(level: u8) -> LevelConfig {
    let level = level.clamp(1, 5);
    match level {
        1 => LevelConfig {
            level,
            default_mode: OperatingMode::Execution,
            max_runtime: Duration::from_secs(10 * 60),
            warn_at: 10,
            pause_at: 15,
            hard_stop_at: 20,
            max_parallel_tools: 1,
            compaction_ratio: 0.9,
            sub_agent_max_depth: 0,
            sub_agent_max_concurrency: 0,
            run_command_default_allow: false,
        },
        2 => LevelConfig {
            level,
            default_mode: OperatingMode::Execution,
            max_runtime: Duration::from_secs(20 * 60),
            warn_at: 20,
            pause_at: 30,
            hard_stop_at: 40,
            max_parallel_tools: 2,
            compaction_ratio: 0.9,
            sub_agent_max_depth: 1,
            sub_agent_max_concurrency: 1,
            run_command_default_allow: false,
        },
        3 => LevelConfig {
            level,
            default_mode: OperatingMode::Execution,
            max_runtime: Duration::from_secs(30 * 60),
            warn_at: 40,
            pause_at: 60,
            hard_stop_at: 80,
            max_parallel_tools: 3,
            compaction_ratio: 0.85,
            sub_agent_max_depth: 2,
            sub_agent_max_concurrency: 2,
            run_command_default_allow: true,
        },
        4 => LevelConfig {
            level,
            default_mode: OperatingMode::Execution,
            max_runtime: Duration::from_secs(45 * 60),
            warn_at: 60,
            pause_at: 100,
            hard_stop_at: 140,
            max_parallel_tools: 4,
            compaction_ratio: 0.85,
            sub_agent_max_depth: 3,
            sub_agent_max_concurrency: 3,
            run_command_default_allow: true,
        },
        _ => LevelConfig {
            level: 5,
            default_mode: OperatingMode::Execution,
            max_runtime: Duration::from_secs(60 * 60),
            warn_at: 100,
            pause_at: 160,
            hard_stop_at: 220,
            max_parallel_tools: 5,
            compaction_ratio: 0.8,
            sub_agent_max_depth: 4,
            sub_agent_max_concurrency: 4,
            run_command_default_allow: true,
        },
    }
}

/// Applies the CEO-mode adjustments named in §4.9 to a level's base config:
/// one less parallel tool, and a proportionally raised warn threshold.
pub fn apply_ceo_mode(mut config: LevelConfig) -> LevelConfig {
    config.max_parallel_tools = config.max_parallel_tools.saturating_sub(1).max(1);
    config.warn_at = (config.warn_at as f32 * 1.5) as u32;
    config
}

/// The 7-stage cycle injected as a per-turn checkpoint message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Orient,
    Plan,
    Gather,
    Act,
    Verify,
    Reflect,
    Reassess,
}

impl Stage {
    const CYCLE: [Stage; 7] = [
        Stage::Orient,
        Stage::Plan,
        Stage::Gather,
        Stage::Act,
        Stage::Verify,
        Stage::Reflect,
        Stage::Reassess,
    ];

    fn requirement(self) -> &'static str {
        match self {
            Stage::Orient => "Restate the goal and what has changed since the last turn.",
            Stage::Plan => "Name the next concrete step and why it follows from the goal.",
            Stage::Gather => "Collect whatever information the next step needs before acting.",
            Stage::Act => "Execute the planned step.",
            Stage::Verify => "Check the result of the step against its intended effect.",
            Stage::Reflect => "Note anything learned that changes the plan.",
            Stage::Reassess => "Decide whether the goal is met or another cycle is needed.",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Stage::Orient => "orient",
            Stage::Plan => "plan",
            Stage::Gather => "gather",
            Stage::Act => "act",
            Stage::Verify => "verify",
            Stage::Reflect => "reflect",
            Stage::Reassess => "reassess",
        }
    }
}

/// Renders the system-role checkpoint message for one stage, per §4.9:
/// `{cycle, phase k/7, stage, requirement, next stage}`.
pub fn render_stage_checkpoint(cycle: u32, stage_index: usize) -> String {
    let stage = Stage::CYCLE[stage_index % Stage::CYCLE.len()];
    let next = Stage::CYCLE[(stage_index + 1) % Stage::CYCLE.len()];
    format!(
        "cycle: {cycle}\nphase: {}/7\nstage: {}\nrequirement: {}\nnext stage: {}",
        stage_index % Stage::CYCLE.len() + 1,
        stage.label(),
        stage.requirement(),
        next.label(),
    )
}

/// Outcome of a circuit-breaker evaluation after a turn's tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerOutcome {
    Continue,
    WarnOnce,
    Paused,
    HardStop,
    RuntimeBudgetReached,
}

/// Tracks tool-call volume, wall-clock deadline, and the single-shot forced
/// final reassessment pass across a session.
pub struct AutonomyState {
    config: LevelConfig,
    started_at: Instant,
    tool_call_count: u32,
    warned: bool,
    reassessment_fired: bool,
    reassessment_pending: bool,
    headless_continue: bool,
}

impl AutonomyState {
    pub fn new(config: LevelConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            tool_call_count: 0,
            warned: false,
            reassessment_fired: false,
            reassessment_pending: false,
            headless_continue: false,
        }
    }

    pub fn with_headless_continue(mut self, enabled: bool) -> Self {
        self.headless_continue = enabled;
        self
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    pub fn record_tool_calls(&mut self, count: u32) {
        self.tool_call_count += count;
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_call_count
    }

    pub fn runtime_budget_exceeded(&self) -> bool {
        self.started_at.elapsed() >= self.config.max_runtime
    }

    /// Evaluates the circuit breaker. A runtime-budget breach takes priority
    /// over the tool-call thresholds, since it can fire at any turn boundary
    /// regardless of call volume.
    pub fn evaluate_breaker(&mut self) -> BreakerOutcome {
        if self.runtime_budget_exceeded() {
            return BreakerOutcome::RuntimeBudgetReached;
        }
        if self.tool_call_count >= self.config.hard_stop_at {
            return BreakerOutcome::HardStop;
        }
        if self.tool_call_count >= self.config.pause_at {
            if self.config.level >= 4 && self.headless_continue {
                return BreakerOutcome::Continue;
            }
            return BreakerOutcome::Paused;
        }
        if self.tool_call_count >= self.config.warn_at && !self.warned {
            self.warned = true;
            return BreakerOutcome::WarnOnce;
        }
        BreakerOutcome::Continue
    }

    /// §4.9 "Forced final reassessment": when the model returns no tool calls
    /// at level >= 3 and no forced pass has fired yet, don't terminate — mark
    /// pending and let the orchestrator inject the reassessment stage on the
    /// next turn instead. Returns `true` when the caller should continue
    /// rather than finish the session.
    pub fn maybe_force_reassessment(&mut self) -> bool {
        if self.config.level < 3 || self.reassessment_fired {
            return false;
        }
        self.reassessment_fired = true;
        self.reassessment_pending = true;
        true
    }

    pub fn take_pending_reassessment(&mut self) -> bool {
        std::mem::take(&mut self.reassessment_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_config_clamps_out_of_range() {
        assert_eq!(level_config(0).level, 1);
        assert_eq!(level_config(9).level, 5);
    }

    #[test]
    fn ceo_mode_reduces_parallelism_and_raises_warn_threshold() {
        let base = level_config(3);
        let ceo = apply_ceo_mode(base);
        assert_eq!(ceo.max_parallel_tools, base.max_parallel_tools - 1);
        assert!(ceo.warn_at > base.warn_at);
    }

    #[test]
    fn breaker_warns_once_then_stays_quiet() {
        let mut state = AutonomyState::new(level_config(1));
        state.record_tool_calls(10);
        assert_eq!(state.evaluate_breaker(), BreakerOutcome::WarnOnce);
        assert_eq!(state.evaluate_breaker(), BreakerOutcome::Continue);
    }

    #[test]
    fn breaker_hard_stops_past_threshold() {
        let mut state = AutonomyState::new(level_config(1));
        state.record_tool_calls(25);
        assert_eq!(state.evaluate_breaker(), BreakerOutcome::HardStop);
    }

    #[test]
    fn breaker_pauses_between_pause_and_hard_stop() {
        let mut state = AutonomyState::new(level_config(1));
        state.record_tool_calls(16);
        assert_eq!(state.evaluate_breaker(), BreakerOutcome::Paused);
    }

    #[test]
    fn level_four_headless_continue_skips_pause() {
        let mut state = AutonomyState::new(level_config(4)).with_headless_continue(true);
        state.record_tool_calls(105);
        assert_eq!(state.evaluate_breaker(), BreakerOutcome::Continue);
    }

    #[test]
    fn forced_reassessment_fires_at_most_once() {
        let mut state = AutonomyState::new(level_config(3));
        assert!(state.maybe_force_reassessment());
        assert!(state.take_pending_reassessment());
        assert!(!state.maybe_force_reassessment());
    }

    #[test]
    fn forced_reassessment_never_fires_below_level_three() {
        let mut state = AutonomyState::new(level_config(2));
        assert!(!state.maybe_force_reassessment());
    }

    #[test]
    fn stage_checkpoint_cycles_through_seven_stages() {
        let checkpoint = render_stage_checkpoint(1, 0);
        assert!(checkpoint.contains("stage: orient"));
        assert!(checkpoint.contains("next stage: plan"));

        let last = render_stage_checkpoint(1, 6);
        assert!(last.contains("stage: reassess"));
        assert!(last.contains("next stage: orient"));
    }
}
