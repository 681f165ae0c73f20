// Pipeline orchestrator: a named registry of stages
//
// Wiring, start order and stop order stay the caller's decisions; this type
// only saves the bookkeeping. Nothing cascades unless asked for through
// `stop_downstream`.

use crate::pipeline::error::StageError;
use crate::pipeline::stage::Stage;
use crate::pipeline::stats::StageSnapshot;
use crate::pipeline::types::StageState;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub struct Pipeline<J> {
    stages: Vec<Arc<Stage<J>>>,
    start_time: Instant,
}

impl<J: Clone + Send + 'static> Default for Pipeline<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Clone + Send + 'static> Pipeline<J> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Registers a stage. Names must be unique.
    pub fn add(&mut self, stage: Arc<Stage<J>>) -> Result<Arc<Stage<J>>, StageError> {
        if stage.name().is_empty() {
            return Err(StageError::configuration("stage name is required"));
        }
        if self.get(stage.name()).is_some() {
            return Err(StageError::configuration(format!(
                "stage {} is already registered",
                stage.name()
            )));
        }
        self.stages.push(stage.clone());
        Ok(stage)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Stage<J>>> {
        self.stages.iter().find(|s| s.name() == name)
    }

    pub fn stages(&self) -> &[Arc<Stage<J>>] {
        &self.stages
    }

    fn require(&self, name: &str) -> Result<&Arc<Stage<J>>, StageError> {
        self.get(name)
            .ok_or_else(|| StageError::configuration(format!("unknown stage {}", name)))
    }

    /// Links two registered stages by name.
    pub fn link(&self, from: &str, channel: &str, to: &str) -> Result<(), StageError> {
        let source = self.require(from)?;
        let target = self.require(to)?;
        source.link(target, channel)?;
        Ok(())
    }

    /// Starts every stage, downstream first (reverse registration order).
    ///
    /// On a failure the stages already started are stopped again.
    pub fn start_all(&self) -> Result<(), StageError> {
        for stage in self.stages.iter().rev() {
            if let Err(e) = stage.start() {
                error!("Failed to start stage {}: {}", stage.name(), e);
                self.stop_all();
                return Err(e);
            }
        }
        info!("Started {} stages", self.stages.len());
        Ok(())
    }

    /// Signals every stage to stop, in registration order.
    pub fn stop_all(&self) {
        for stage in &self.stages {
            stage.stop();
        }
    }

    /// Waits for every stage thread. Returns the first failure after
    /// joining all of them.
    pub fn join_all(&self) -> Result<(), StageError> {
        let mut first = None;
        for stage in &self.stages {
            if let Err(e) = stage.join() {
                error!("Stage {} ended with error: {}", stage.name(), e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Stops every stage and waits for all of their threads.
    pub fn shutdown_all(&self) -> Result<(), StageError> {
        self.stop_all();
        self.join_all()
    }

    /// Stops `name` and every registered stage reachable from it.
    ///
    /// Returns the names of the stages signalled, in visiting order.
    pub fn stop_downstream(&self, name: &str) -> Result<Vec<String>, StageError> {
        let root = self.require(name)?;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([root.clone()]);
        let mut order = Vec::new();

        while let Some(stage) = queue.pop_front() {
            if !visited.insert(stage.name().to_string()) {
                continue;
            }
            stage.stop();
            order.push(stage.name().to_string());

            for recipient in stage.linked() {
                if let Some(next) = self.get(recipient.recipient_name()) {
                    queue.push_back(next.clone());
                }
            }
        }

        info!("Cascaded stop from {} to {} stages", name, order.len());
        Ok(order)
    }

    /// Whether any stage is still serving or winding down.
    pub fn is_active(&self) -> bool {
        self.stages.iter().any(|s| {
            matches!(s.state(), StageState::Running | StageState::StopRequested)
        })
    }

    pub fn snapshots(&self) -> Vec<StageSnapshot> {
        self.stages.iter().map(|s| s.snapshot()).collect()
    }

    pub fn to_progress_json(&self) -> serde_json::Value {
        let snapshots = self.snapshots();
        let active = snapshots
            .iter()
            .filter(|s| s.state == StageState::Running)
            .count();

        let stages_json: Vec<serde_json::Value> = snapshots
            .iter()
            .map(|s| {
                let mut value = serde_json::to_value(s).unwrap_or(serde_json::Value::Null);
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("jobs_per_sec".to_string(), serde_json::json!(s.jobs_per_sec()));
                }
                value
            })
            .collect();

        serde_json::json!({
            "elapsed_secs": self.start_time.elapsed().as_secs_f64(),
            "active_stages": active,
            "stages": stages_json,
        })
    }
}
