use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Wall-clock duration of one named stage of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub label: String,
    pub elapsed_ms: f64,
}

/// Stage durations of a registration or fusion run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingBreakdown {
    pub total_ms: f64,
    pub stages: Vec<StageTiming>,
}

impl TimingBreakdown {
    pub fn push(&mut self, label: impl Into<String>, elapsed_ms: f64) {
        self.stages.push(StageTiming {
            label: label.into(),
            elapsed_ms,
        });
    }

    /// Run `f`, recording its duration under `label`.
    pub fn measure<T>(&mut self, label: impl Into<String>, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.push(label, start.elapsed().as_secs_f64() * 1000.0);
        out
    }

    /// Append the stages of `other`, prefixing their labels.
    pub fn extend_prefixed(&mut self, prefix: &str, other: &TimingBreakdown) {
        for stage in &other.stages {
            self.push(format!("{prefix}/{}", stage.label), stage.elapsed_ms);
        }
    }

    pub fn stage_ms(&self, label: &str) -> Option<f64> {
        self.stages
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measured_stages_are_recorded_in_order() {
        let mut t = TimingBreakdown::default();
        let v = t.measure("first", || 3);
        t.push("second", 1.5);
        assert_eq!(v, 3);
        assert_eq!(t.stages.len(), 2);
        assert_eq!(t.stages[0].label, "first");
        assert_eq!(t.stage_ms("second"), Some(1.5));

        let mut outer = TimingBreakdown::default();
        outer.extend_prefixed("registration", &t);
        assert_eq!(outer.stages[1].label, "registration/second");
    }
}
